mod cache;

pub use cache::{CacheSlot, StreamCache};

use crate::error::{ClientError, Result};
use rodio::Source;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
#[cfg(unix)]
use std::ffi::CString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_VOLUME: f32 = 1.0;
const STREAM_CACHE_DIR: &str = "tunedrop_stream_cache";

pub trait MediaClock {
    /// Replaces the source. The transport starts paused.
    fn load(&mut self, source: &str) -> Result<()>;
    /// Lets the transport finish background work; called at the UI cadence.
    /// Errors once when the current source failed to become playable.
    fn tick(&mut self) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn stop(&mut self);
    fn is_paused(&self) -> bool;
    fn source(&self) -> Option<&str>;
    fn position(&self) -> Option<Duration>;
    fn duration(&self) -> Option<Duration>;
    fn seek_to(&mut self, position: Duration) -> Result<()>;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn output_name(&self) -> Option<String>;
    fn is_finished(&self) -> bool;
}

impl<T: MediaClock + ?Sized> MediaClock for Box<T> {
    fn load(&mut self, source: &str) -> Result<()> {
        (**self).load(source)
    }

    fn tick(&mut self) -> Result<()> {
        (**self).tick()
    }

    fn play(&mut self) -> Result<()> {
        (**self).play()
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }

    fn source(&self) -> Option<&str> {
        (**self).source()
    }

    fn position(&self) -> Option<Duration> {
        (**self).position()
    }

    fn duration(&self) -> Option<Duration> {
        (**self).duration()
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        (**self).seek_to(position)
    }

    fn volume(&self) -> f32 {
        (**self).volume()
    }

    fn set_volume(&mut self, volume: f32) {
        (**self).set_volume(volume)
    }

    fn output_name(&self) -> Option<String> {
        (**self).output_name()
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }
}

type FetchResult = std::result::Result<PathBuf, String>;

/// Speaker output through rodio. Remote sources are fetched into a cache
/// file on a background thread and attached on a later [`tick`](MediaClock::tick).
pub struct RodioMediaClock {
    stream: OutputStream,
    sink: Sink,
    cache: StreamCache,
    source: Option<String>,
    cached: Option<PathBuf>,
    pending: Option<Receiver<FetchResult>>,
    load_error: Option<String>,
    want_playing: bool,
    track_duration: Option<Duration>,
    volume: f32,
}

impl RodioMediaClock {
    pub fn new() -> Result<Self> {
        let stream = Self::open_output_stream()?;
        let sink = Sink::connect_new(stream.mixer());
        sink.pause();
        let cache_dir = std::env::temp_dir()
            .join(STREAM_CACHE_DIR)
            .join(std::process::id().to_string());
        let cache = StreamCache::in_dir(cache_dir.clone()).map_err(|err| {
            ClientError::TransportRejection(format!(
                "failed to create cache dir {}: {err}",
                cache_dir.display()
            ))
        })?;

        Ok(Self {
            stream,
            sink,
            cache,
            source: None,
            cached: None,
            pending: None,
            load_error: None,
            want_playing: false,
            track_duration: None,
            volume: 1.0,
        })
    }

    fn open_output_stream() -> Result<OutputStream> {
        let mut stream = with_silenced_stderr(|| {
            let builder = OutputStreamBuilder::from_default_device().map_err(|err| {
                ClientError::TransportRejection(format!("failed to open audio output: {err}"))
            })?;
            builder
                .with_error_callback(|_| {})
                .open_stream_or_fallback()
                .map_err(|err| {
                    ClientError::TransportRejection(format!("failed to start audio output: {err}"))
                })
        })?;
        stream.log_on_drop(false);
        Ok(stream)
    }

    fn reset_sink(&mut self) {
        self.sink.stop();
        self.sink = Sink::connect_new(self.stream.mixer());
        self.sink.set_volume(self.volume);
        self.sink.pause();
    }

    fn attach(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|err| {
            ClientError::TransportRejection(format!("failed to open {}: {err}", path.display()))
        })?;
        let decoded = Decoder::try_from(file).map_err(|err| {
            ClientError::TransportRejection(format!("failed to decode {}: {err}", path.display()))
        })?;
        self.track_duration = decoded.total_duration();
        self.reset_sink();
        self.sink.append(decoded);
        if self.want_playing {
            self.sink.play();
        }
        self.cached = Some(path.to_path_buf());
        self.cache.prune(path);
        Ok(())
    }

    fn spawn_fetch(&mut self, url: String) {
        let slot = self.cache.slot_for(&url);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(fetch_into(&url, slot));
        });
        self.pending = Some(rx);
    }
}

fn fetch_into(url: &str, slot: CacheSlot) -> FetchResult {
    let response = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .map_err(|err| format!("failed to fetch {url}: {err}"))?;
    slot.write(response)
}

impl MediaClock for RodioMediaClock {
    fn load(&mut self, source: &str) -> Result<()> {
        self.reset_sink();
        self.source = Some(source.to_string());
        self.cached = None;
        self.pending = None;
        self.load_error = None;
        self.want_playing = false;
        self.track_duration = None;

        let local = if source.starts_with("http://") || source.starts_with("https://") {
            match self.cache.is_cached(source) {
                Some(path) => path,
                None => {
                    debug!(source, "fetching remote source");
                    self.spawn_fetch(source.to_string());
                    return Ok(());
                }
            }
        } else {
            PathBuf::from(source)
        };

        if let Err(err) = self.attach(&local) {
            self.load_error = Some(err.to_string());
            return Err(err);
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        let Some(rx) = &self.pending else {
            return Ok(());
        };

        let failure = match rx.try_recv() {
            Ok(Ok(path)) => {
                self.pending = None;
                match self.attach(&path) {
                    Ok(()) => return Ok(()),
                    Err(err) => err.to_string(),
                }
            }
            Ok(Err(message)) => {
                self.pending = None;
                message
            }
            Err(TryRecvError::Empty) => return Ok(()),
            Err(TryRecvError::Disconnected) => {
                self.pending = None;
                String::from("source fetch thread vanished")
            }
        };

        warn!(message = %failure, "source could not be loaded");
        self.want_playing = false;
        self.sink.pause();
        self.load_error = Some(failure.clone());
        Err(ClientError::TransportRejection(failure))
    }

    fn play(&mut self) -> Result<()> {
        if self.source.is_none() {
            return Err(ClientError::TransportRejection(String::from(
                "no source loaded",
            )));
        }
        if let Some(err) = &self.load_error {
            return Err(ClientError::TransportRejection(err.clone()));
        }

        self.want_playing = true;
        if self.sink.empty()
            && let Some(path) = self.cached.clone()
        {
            self.attach(&path)?;
        }
        self.sink.play();
        Ok(())
    }

    fn pause(&mut self) {
        self.want_playing = false;
        self.sink.pause();
    }

    fn stop(&mut self) {
        self.reset_sink();
        self.source = None;
        self.cached = None;
        self.pending = None;
        self.load_error = None;
        self.want_playing = false;
        self.track_duration = None;
    }

    fn is_paused(&self) -> bool {
        !self.want_playing
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.source.as_ref()?;
        if self.cached.is_none() {
            return Some(Duration::ZERO);
        }
        Some(self.sink.get_pos())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        let Some(path) = self.cached.clone() else {
            return Err(ClientError::TransportRejection(String::from(
                "source is not ready",
            )));
        };

        if self.sink.empty() {
            self.attach(&path)?;
        }
        self.sink.try_seek(position).map_err(|err| {
            ClientError::TransportRejection(format!("failed to seek: {err:?}"))
        })
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
        self.sink.set_volume(self.volume);
    }

    fn output_name(&self) -> Option<String> {
        Some(String::from("Default audio output"))
    }

    fn is_finished(&self) -> bool {
        self.want_playing && self.cached.is_some() && self.pending.is_none() && self.sink.empty()
    }
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

pub struct NullMediaClock {
    paused: bool,
    current: Option<String>,
    volume: f32,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    assumed_duration: Option<Duration>,
}

impl NullMediaClock {
    pub fn new() -> Self {
        Self {
            paused: true,
            current: None,
            volume: 1.0,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            assumed_duration: None,
        }
    }

    pub fn with_track_duration(duration: Duration) -> Self {
        Self {
            assumed_duration: Some(duration).filter(|d| !d.is_zero()),
            ..Self::new()
        }
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.current.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }

    fn at_end(&self) -> bool {
        self.track_duration
            .is_some_and(|duration| self.current_position() >= duration)
    }
}

impl Default for NullMediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock for NullMediaClock {
    fn load(&mut self, source: &str) -> Result<()> {
        self.paused = true;
        self.current = Some(source.to_string());
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = self.assumed_duration;
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Err(ClientError::TransportRejection(String::from(
                "no source loaded",
            )));
        }
        if self.at_end() {
            self.position_offset = Duration::ZERO;
            self.started_at = None;
        }
        if self.paused || self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.paused = true;
    }

    fn stop(&mut self) {
        self.current = None;
        self.paused = true;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn source(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        Some(self.current_position())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        if self.current.is_none() {
            return Err(ClientError::TransportRejection(String::from(
                "no active track",
            )));
        }

        self.position_offset = self
            .track_duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = if self.paused {
            None
        } else {
            Some(Instant::now())
        };
        Ok(())
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
    }

    fn output_name(&self) -> Option<String> {
        Some(String::from("Null audio output"))
    }

    fn is_finished(&self) -> bool {
        self.current.is_some() && !self.paused && self.at_end()
    }
}
