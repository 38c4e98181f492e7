use crate::audio::MediaClock;
use crate::model::{RepeatMode, Track, format_clock};
use crate::queue::PlaylistQueue;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressBar {
    pub left: f64,
    pub width: f64,
}

impl ProgressBar {
    pub fn new(left: f64, width: f64) -> Self {
        Self { left, width }
    }

    pub fn percent_at(&self, pointer_x: f64) -> f64 {
        if !(self.width > 0.0) || !pointer_x.is_finite() {
            return 0.0;
        }
        ((pointer_x - self.left) / self.width * 100.0).clamp(0.0, 100.0)
    }
}

pub struct PlaybackEngine<C: MediaClock> {
    clock: C,
    queue: PlaylistQueue,
    loaded: Option<String>,
    autoplay_armed: bool,
    clock_playing: bool,
    volume: u8,
    shuffle: bool,
    repeat_mode: RepeatMode,
    dragging: bool,
    progress: f64,
    last_rejection: Option<String>,
}

impl<C: MediaClock> PlaybackEngine<C> {
    pub fn new(clock: C, queue: PlaylistQueue, volume: u8) -> Self {
        let mut engine = Self {
            clock,
            queue,
            loaded: None,
            autoplay_armed: false,
            clock_playing: false,
            volume: volume.min(100),
            shuffle: false,
            repeat_mode: RepeatMode::Off,
            dragging: false,
            progress: 0.0,
            last_rejection: None,
        };
        engine.clock.set_volume(f32::from(engine.volume) / 100.0);
        engine.sync();
        engine
    }

    pub fn queue(&self) -> &PlaylistQueue {
        &self.queue
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.queue.current_track()
    }

    pub fn is_playing(&self) -> bool {
        self.queue.is_playing()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn is_scrubbing(&self) -> bool {
        self.dragging
    }

    /// Percent shown on the progress control: the pointer while dragging,
    /// otherwise the last clock sample.
    pub fn progress_percent(&self) -> f64 {
        self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.position().unwrap_or_default()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.clock.duration()
    }

    pub fn elapsed_label(&self) -> String {
        format_clock(self.elapsed().as_secs_f64())
    }

    pub fn take_rejection(&mut self) -> Option<String> {
        self.last_rejection.take()
    }

    pub fn add(&mut self, track: Track) {
        self.queue.add(track);
        self.sync();
    }

    pub fn activate_or_toggle(&mut self, track: Track) {
        self.queue.activate_or_toggle(track);
        self.sync();
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.queue.remove(id);
        if removed {
            self.sync();
        }
        removed
    }

    pub fn set_playlist(&mut self, tracks: Vec<Track>) {
        self.queue.set_playlist(tracks);
        self.sync();
    }

    pub fn toggle_play(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        self.queue.set_playing(!self.queue.is_playing());
        self.sync();
    }

    pub fn next(&mut self) {
        if self.queue.next(self.shuffle).is_some() {
            self.sync();
        }
    }

    pub fn prev(&mut self) {
        if self.queue.prev(self.shuffle).is_some() {
            self.sync();
        }
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
        self.clock.set_volume(f32::from(self.volume) / 100.0);
    }

    pub fn cycle_repeat_mode(&mut self) -> RepeatMode {
        self.repeat_mode = self.repeat_mode.next();
        self.repeat_mode
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        self.shuffle
    }

    /// Seeks to `percent` of the current track. Ignored while the duration
    /// is unknown.
    pub fn seek(&mut self, percent: f64) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let Some(duration) = self.clock.duration() else {
            debug!("seek ignored: duration unknown");
            return;
        };
        self.progress = percent;
        let target = duration.mul_f64(percent / 100.0);
        if let Err(err) = self.clock.seek_to(target) {
            warn!(error = %err, "seek failed");
        }
    }

    pub fn click_seek(&mut self, pointer_x: f64, bar: ProgressBar) {
        self.seek(bar.percent_at(pointer_x));
    }

    pub fn begin_scrub(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        self.dragging = true;
    }

    /// Moves the displayed progress with the pointer. The clock is left
    /// alone until [`end_scrub`](Self::end_scrub).
    pub fn scrub_to(&mut self, pointer_x: f64, bar: ProgressBar) {
        if self.dragging {
            self.progress = bar.percent_at(pointer_x);
        }
    }

    pub fn end_scrub(&mut self, pointer_x: f64, bar: ProgressBar) {
        if !self.dragging {
            return;
        }
        self.dragging = false;
        self.seek(bar.percent_at(pointer_x));
    }

    /// Pointer left the control mid-drag: drop the drag without seeking.
    pub fn cancel_scrub(&mut self) {
        self.dragging = false;
    }

    pub fn tick(&mut self) {
        if let Err(err) = self.clock.tick() {
            warn!(error = %err, "transport dropped the current source");
            self.last_rejection = Some(err.to_string());
            self.queue.set_playing(false);
            self.clock_playing = false;
        }
        if self.clock.is_finished() {
            self.handle_track_end();
        }
        if !self.dragging {
            self.progress = self.sample_progress();
        }
    }

    fn sample_progress(&self) -> f64 {
        match (self.clock.position(), self.clock.duration()) {
            (Some(position), Some(duration)) if !duration.is_zero() => {
                (position.as_secs_f64() / duration.as_secs_f64() * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        }
    }

    fn handle_track_end(&mut self) {
        match self.repeat_mode {
            RepeatMode::One => self.restart_current(),
            RepeatMode::All => {
                let before = self.queue.current_index();
                self.queue.next(self.shuffle);
                if self.queue.current_index() == before {
                    self.restart_current();
                } else {
                    self.sync();
                }
            }
            RepeatMode::Off => {
                if self.queue.is_last() {
                    debug!("reached end of queue");
                    self.queue.set_playing(false);
                    self.sync();
                } else {
                    self.queue.next(self.shuffle);
                    self.sync();
                }
            }
        }
    }

    fn restart_current(&mut self) {
        if let Err(err) = self.clock.seek_to(Duration::ZERO) {
            warn!(error = %err, "restart seek failed");
        }
        self.progress = 0.0;
        self.queue.set_playing(true);
        self.start_clock();
    }

    fn sync(&mut self) {
        let Some((key, source)) = self
            .queue
            .current_track()
            .map(|track| (track.identity_key().to_string(), track.audio_url.clone()))
        else {
            if self.loaded.take().is_some() {
                self.clock.stop();
                self.clock_playing = false;
                self.progress = 0.0;
            }
            return;
        };

        // An entry that only shifted position keeps its source.
        if self.loaded.as_deref() != Some(key.as_str()) {
            self.load_source(key, &source);
            return;
        }

        if self.queue.is_playing() != self.clock_playing {
            if self.queue.is_playing() {
                self.start_clock();
            } else {
                self.clock.pause();
                self.clock_playing = false;
            }
        }
    }

    fn load_source(&mut self, key: String, source: &str) {
        info!(source, "loading track");
        self.loaded = Some(key);
        self.dragging = false;
        self.progress = 0.0;
        self.clock_playing = false;

        if let Err(err) = self.clock.load(source) {
            warn!(error = %err, "transport refused source");
            self.last_rejection = Some(err.to_string());
            self.queue.set_playing(false);
            return;
        }

        // The first source after startup never starts on its own.
        if !self.autoplay_armed {
            self.autoplay_armed = true;
            self.queue.set_playing(false);
            return;
        }

        self.start_clock();
    }

    fn start_clock(&mut self) {
        match self.clock.play() {
            Ok(()) => {
                self.queue.set_playing(true);
                self.clock_playing = true;
            }
            Err(err) => {
                warn!(error = %err, "transport refused playback");
                self.last_rejection = Some(err.to_string());
                self.queue.set_playing(false);
                self.clock_playing = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, Result};

    #[derive(Default)]
    struct RecordingClock {
        source: Option<String>,
        loads: Vec<String>,
        seeks: Vec<Duration>,
        playing: bool,
        reject_play: bool,
        finished: bool,
        fail_on_tick: Option<String>,
        position: Duration,
        duration: Option<Duration>,
        volume: f32,
    }

    impl MediaClock for RecordingClock {
        fn load(&mut self, source: &str) -> Result<()> {
            self.source = Some(source.to_string());
            self.loads.push(source.to_string());
            self.playing = false;
            self.finished = false;
            self.position = Duration::ZERO;
            Ok(())
        }

        fn tick(&mut self) -> Result<()> {
            match self.fail_on_tick.take() {
                Some(message) => {
                    self.playing = false;
                    Err(ClientError::TransportRejection(message))
                }
                None => Ok(()),
            }
        }

        fn play(&mut self) -> Result<()> {
            if self.reject_play {
                return Err(ClientError::TransportRejection(String::from("autoplay blocked")));
            }
            self.playing = true;
            Ok(())
        }

        fn pause(&mut self) {
            self.playing = false;
        }

        fn stop(&mut self) {
            self.source = None;
            self.playing = false;
        }

        fn is_paused(&self) -> bool {
            !self.playing
        }

        fn source(&self) -> Option<&str> {
            self.source.as_deref()
        }

        fn position(&self) -> Option<Duration> {
            self.source.as_ref().map(|_| self.position)
        }

        fn duration(&self) -> Option<Duration> {
            self.duration
        }

        fn seek_to(&mut self, position: Duration) -> Result<()> {
            self.seeks.push(position);
            self.position = position;
            self.finished = false;
            Ok(())
        }

        fn volume(&self) -> f32 {
            self.volume
        }

        fn set_volume(&mut self, volume: f32) {
            self.volume = volume;
        }

        fn output_name(&self) -> Option<String> {
            None
        }

        fn is_finished(&self) -> bool {
            self.finished && self.playing
        }
    }

    fn track(id: &str) -> Track {
        Track::placeholder(id, format!("http://test/files/{id}.mp3"))
    }

    fn engine_with(ids: &[&str]) -> PlaybackEngine<RecordingClock> {
        let clock = RecordingClock {
            duration: Some(Duration::from_secs(200)),
            ..RecordingClock::default()
        };
        let mut engine = PlaybackEngine::new(clock, PlaylistQueue::with_seed(5), 70);
        engine.set_playlist(ids.iter().map(|id| track(id)).collect());
        engine
    }

    fn finish_track(engine: &mut PlaybackEngine<RecordingClock>) {
        engine.clock.finished = true;
        engine.tick();
    }

    #[test]
    fn first_load_does_not_autoplay() {
        let engine = engine_with(&["a", "b"]);
        assert_eq!(engine.clock.loads, vec!["http://test/files/a.mp3"]);
        assert!(!engine.is_playing());
        assert!(!engine.clock.playing);
    }

    #[test]
    fn later_track_changes_autoplay() {
        let mut engine = engine_with(&["a", "b"]);
        engine.next();
        assert_eq!(engine.clock.loads.len(), 2);
        assert!(engine.is_playing());
        assert!(engine.clock.playing);
    }

    #[test]
    fn rejected_autoplay_leaves_engine_paused() {
        let mut engine = engine_with(&["a", "b"]);
        engine.clock.reject_play = true;
        engine.next();
        assert!(!engine.is_playing());
        assert_eq!(engine.take_rejection().as_deref(), Some("Playback rejected: autoplay blocked"));

        engine.toggle_play();
        assert!(!engine.is_playing(), "failed play must not leave a stale true");
    }

    #[test]
    fn toggle_play_drives_clock() {
        let mut engine = engine_with(&["a"]);
        engine.toggle_play();
        assert!(engine.clock.playing);
        engine.toggle_play();
        assert!(!engine.clock.playing);
        assert_eq!(engine.clock.loads.len(), 1, "toggling never reloads");
    }

    #[test]
    fn adding_new_track_loads_and_plays_it() {
        let mut engine = engine_with(&["a"]);
        engine.add(track("b"));
        assert_eq!(engine.queue().current_index(), Some(1));
        assert_eq!(engine.clock.source.as_deref(), Some("http://test/files/b.mp3"));
        assert!(engine.clock.playing);
    }

    #[test]
    fn volume_maps_to_unit_range() {
        let mut engine = engine_with(&["a"]);
        assert!((engine.clock.volume - 0.7).abs() < f32::EPSILON);
        engine.set_volume(250);
        assert_eq!(engine.volume(), 100);
        assert!((engine.clock.volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn repeat_one_restarts_same_index() {
        let mut engine = engine_with(&["a", "b"]);
        engine.cycle_repeat_mode();
        assert_eq!(engine.repeat_mode(), RepeatMode::One);
        engine.toggle_play();

        finish_track(&mut engine);
        assert_eq!(engine.queue().current_index(), Some(0));
        assert_eq!(engine.clock.seeks, vec![Duration::ZERO]);
        assert!(engine.is_playing());
        assert_eq!(engine.clock.loads.len(), 1);
    }

    #[test]
    fn repeat_all_wraps_from_last() {
        let mut engine = engine_with(&["a", "b"]);
        engine.cycle_repeat_mode();
        engine.cycle_repeat_mode();
        engine.next();

        finish_track(&mut engine);
        assert_eq!(engine.queue().current_index(), Some(0));
        assert!(engine.is_playing());
    }

    #[test]
    fn repeat_all_single_track_restarts() {
        let mut engine = engine_with(&["a"]);
        engine.cycle_repeat_mode();
        engine.cycle_repeat_mode();
        engine.toggle_play();

        finish_track(&mut engine);
        assert_eq!(engine.clock.seeks, vec![Duration::ZERO]);
        assert!(engine.is_playing());
    }

    #[test]
    fn repeat_off_advances_until_last_then_stops() {
        let mut engine = engine_with(&["a", "b"]);
        engine.toggle_play();

        finish_track(&mut engine);
        assert_eq!(engine.queue().current_index(), Some(1));
        assert!(engine.is_playing());

        finish_track(&mut engine);
        assert_eq!(engine.queue().current_index(), Some(1));
        assert!(!engine.is_playing());
        assert!(!engine.clock.playing);
    }

    #[test]
    fn drag_commits_one_seek_on_release() {
        let mut engine = engine_with(&["a"]);
        let bar = ProgressBar::new(100.0, 400.0);

        engine.begin_scrub();
        engine.scrub_to(140.0, bar);
        assert!((engine.progress_percent() - 10.0).abs() < 1e-9);
        for x in [200.0, 300.0, 400.0] {
            engine.scrub_to(x, bar);
        }
        engine.tick();
        assert!(engine.clock.seeks.is_empty());
        assert!((engine.progress_percent() - 75.0).abs() < 1e-9);

        engine.end_scrub(420.0, bar);
        assert_eq!(engine.clock.seeks, vec![Duration::from_secs(160)]);
        assert!(!engine.is_scrubbing());
    }

    #[test]
    fn cancelled_drag_never_seeks() {
        let mut engine = engine_with(&["a"]);
        let bar = ProgressBar::new(0.0, 100.0);
        engine.begin_scrub();
        engine.scrub_to(50.0, bar);
        engine.cancel_scrub();
        engine.end_scrub(50.0, bar);
        assert!(engine.clock.seeks.is_empty());
    }

    #[test]
    fn click_seeks_immediately_and_clamps() {
        let mut engine = engine_with(&["a"]);
        let bar = ProgressBar::new(0.0, 100.0);
        engine.click_seek(-30.0, bar);
        engine.click_seek(500.0, bar);
        assert_eq!(
            engine.clock.seeks,
            vec![Duration::ZERO, Duration::from_secs(200)]
        );
    }

    #[test]
    fn zero_width_bar_maps_to_start() {
        assert_eq!(ProgressBar::new(10.0, 0.0).percent_at(50.0), 0.0);
        assert_eq!(ProgressBar::new(0.0, 200.0).percent_at(50.0), 25.0);
    }

    #[test]
    fn ambient_progress_follows_clock_ratio() {
        let mut engine = engine_with(&["a"]);
        engine.clock.position = Duration::from_secs(50);
        engine.tick();
        assert!((engine.progress_percent() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn removing_everything_stops_clock() {
        let mut engine = engine_with(&["a"]);
        engine.remove("a");
        assert!(engine.clock.source.is_none());
        assert_eq!(engine.queue().current_index(), None);
    }

    #[test]
    fn removing_an_earlier_entry_keeps_the_loaded_source() {
        let mut engine = engine_with(&["a", "b", "c"]);
        engine.next();
        assert!(engine.is_playing());

        engine.remove("a");
        assert_eq!(engine.queue().current_index(), Some(0));
        assert_eq!(engine.clock.loads.len(), 2);
        assert!(engine.clock.playing);
    }

    #[test]
    fn source_failing_after_load_stops_playback() {
        let mut engine = engine_with(&["a", "b"]);
        engine.next();
        assert!(engine.is_playing());

        engine.clock.fail_on_tick = Some(String::from("404 Not Found"));
        engine.tick();

        assert!(!engine.is_playing());
        assert_eq!(
            engine.take_rejection().as_deref(),
            Some("Playback rejected: 404 Not Found")
        );
        assert_eq!(engine.queue().current_index(), Some(1));

        engine.tick();
        assert!(engine.take_rejection().is_none(), "reported once");
    }
}
