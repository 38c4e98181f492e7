use crate::model::Track;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reselect {
    KeepPlaying,
    TogglePlaying,
}

/// The ordered, in-memory list the user is playing from.
///
/// Entries are unique by [`Track::identity_key`]. `current` is `None` exactly
/// when the queue is empty.
#[derive(Debug)]
pub struct PlaylistQueue {
    tracks: Vec<Track>,
    current: Option<usize>,
    playing: bool,
    rng: StdRng,
}

impl Default for PlaylistQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaylistQueue {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            current: None,
            playing: false,
            rng,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.current?)
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_last(&self) -> bool {
        self.current
            .is_some_and(|idx| idx + 1 == self.tracks.len())
    }

    pub fn position_of(&self, identity_key: &str) -> Option<usize> {
        self.tracks
            .iter()
            .position(|track| track.identity_key() == identity_key)
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing && !self.tracks.is_empty();
    }

    /// Resume-and-play: an already queued track becomes current, a new one is
    /// appended and becomes current. Either way playback is requested.
    pub fn add(&mut self, track: Track) -> usize {
        self.select(track, Reselect::KeepPlaying)
    }

    /// Library variant of [`add`](Self::add): picking the track that is
    /// already current flips play/pause instead of forcing play.
    pub fn activate_or_toggle(&mut self, track: Track) -> usize {
        self.select(track, Reselect::TogglePlaying)
    }

    fn select(&mut self, track: Track, reselect: Reselect) -> usize {
        match self.position_of(track.identity_key()) {
            Some(idx) if self.current == Some(idx) && reselect == Reselect::TogglePlaying => {
                self.playing = !self.playing;
                idx
            }
            Some(idx) => {
                self.current = Some(idx);
                self.playing = true;
                idx
            }
            None => {
                self.tracks.push(track);
                let idx = self.tracks.len() - 1;
                self.current = Some(idx);
                self.playing = true;
                idx
            }
        }
    }

    /// Deletes the entry with catalog id `id`. The cursor keeps pointing at
    /// the same track unless that track was the one removed, in which case it
    /// falls back to the first entry.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(removed) = self.tracks.iter().position(|track| track.id == id) else {
            return false;
        };
        self.tracks.remove(removed);

        if self.tracks.is_empty() {
            self.current = None;
            self.playing = false;
            return true;
        }

        self.current = match self.current {
            Some(current) if current == removed => Some(0),
            Some(current) if current > removed => Some(current - 1),
            other => other,
        };
        true
    }

    /// Replaces the whole sequence. Later duplicates of an identity key are
    /// dropped; the cursor follows the previously current track if it
    /// survived.
    pub fn set_playlist(&mut self, tracks: Vec<Track>) {
        let previous = self
            .current_track()
            .map(|track| track.identity_key().to_string());

        let mut unique: Vec<Track> = Vec::with_capacity(tracks.len());
        for track in tracks {
            if !unique
                .iter()
                .any(|kept| kept.identity_key() == track.identity_key())
            {
                unique.push(track);
            }
        }
        self.tracks = unique;

        if self.tracks.is_empty() {
            self.current = None;
            self.playing = false;
            return;
        }

        self.current = previous
            .and_then(|key| self.position_of(&key))
            .or(Some(0));
    }

    pub fn next(&mut self, shuffle: bool) -> Option<usize> {
        let current = self.current?;
        let len = self.tracks.len();
        let idx = if shuffle {
            self.random_other_index(current)
        } else {
            (current + 1) % len
        };
        self.current = Some(idx);
        Some(idx)
    }

    pub fn prev(&mut self, shuffle: bool) -> Option<usize> {
        let current = self.current?;
        let len = self.tracks.len();
        let idx = if shuffle {
            self.random_other_index(current)
        } else if current == 0 {
            len - 1
        } else {
            current - 1
        };
        self.current = Some(idx);
        Some(idx)
    }

    fn random_other_index(&mut self, current: usize) -> usize {
        let len = self.tracks.len();
        if len <= 1 {
            return current;
        }
        let offset = self.rng.random_range(1..len);
        (current + offset) % len
    }
}
