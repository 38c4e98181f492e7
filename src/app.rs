use crate::audio::{MediaClock, NullMediaClock, RodioMediaClock};
use crate::backend::{BackendApi, HttpBackend};
use crate::catalog::TrackCatalog;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::jobs::{JobEvent, JobTracker, SubmitOutcome};
use crate::model::{AudioFormat, JobStatus, Track};
use crate::player::PlaybackEngine;
use crate::queue::PlaylistQueue;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

const UI_TICK: Duration = Duration::from_millis(250);

const HELP: &[&str] = &[
    "download <url>    fetch audio from a page URL",
    "jobs              show running downloads",
    "cancel <id>       stop tracking a download",
    "clear             forget failed downloads",
    "list [query]      show the library, filtered by title or uploader",
    "play <id>         play a library track (toggles if already current)",
    "queue             show the play queue",
    "remove <id>       delete a track from the library and the queue",
    "toggle            play/pause",
    "next | prev       skip within the queue",
    "volume <0-100>    set output volume",
    "seek <percent>    jump within the current track",
    "repeat            cycle repeat off/one/all",
    "shuffle           toggle shuffle",
    "refresh           reload the library",
    "quit",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Download(String),
    Jobs,
    Cancel(String),
    ClearJobs,
    List(String),
    Play(String),
    Queue,
    Remove(String),
    Toggle,
    Next,
    Prev,
    Volume(u8),
    Seek(f64),
    Repeat,
    Shuffle,
    Refresh,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("No command")]
    Empty,
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Unknown command {0}. Use help")]
    Unknown(String),
}

pub fn parse_command(raw: &str) -> Result<Command, CommandError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(CommandError::Empty);
    }

    let mut split = input.splitn(2, char::is_whitespace);
    let command = split.next().unwrap_or_default();
    let rest = split.next().unwrap_or("").trim();

    let parsed = match command {
        // A blank URL still goes through submit so it is rejected there.
        "download" | "dl" => Command::Download(rest.to_string()),
        "jobs" => Command::Jobs,
        "cancel" => Command::Cancel(required(rest, "cancel <id>")?),
        "clear" => Command::ClearJobs,
        "list" | "ls" => Command::List(rest.to_string()),
        "play" => Command::Play(required(rest, "play <id>")?),
        "queue" | "q" => Command::Queue,
        "remove" | "rm" => Command::Remove(required(rest, "remove <id>")?),
        "toggle" | "p" => Command::Toggle,
        "next" | "n" => Command::Next,
        "prev" => Command::Prev,
        "volume" | "vol" => Command::Volume(
            rest.parse::<u8>()
                .ok()
                .filter(|volume| *volume <= 100)
                .ok_or(CommandError::Usage("volume <0-100>"))?,
        ),
        "seek" => Command::Seek(
            rest.trim_end_matches('%')
                .parse::<f64>()
                .ok()
                .filter(|percent| percent.is_finite())
                .ok_or(CommandError::Usage("seek <percent>"))?,
        ),
        "repeat" => Command::Repeat,
        "shuffle" => Command::Shuffle,
        "refresh" => Command::Refresh,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(parsed)
}

fn required(rest: &str, usage: &'static str) -> Result<String, CommandError> {
    if rest.is_empty() {
        Err(CommandError::Usage(usage))
    } else {
        Ok(rest.to_string())
    }
}

/// Everything one running client owns. All catalog and queue mutation
/// happens here, on the caller's task; poll tasks only report back.
pub struct Session<B: BackendApi, C: MediaClock> {
    backend: Arc<B>,
    catalog: TrackCatalog,
    jobs: JobTracker<B>,
    player: PlaybackEngine<C>,
    format: AudioFormat,
    status: String,
    dirty: bool,
}

impl<B: BackendApi, C: MediaClock> Session<B, C> {
    pub fn new(
        backend: Arc<B>,
        player: PlaybackEngine<C>,
        poll_interval: Duration,
        format: AudioFormat,
    ) -> Self {
        let jobs = JobTracker::new(Arc::clone(&backend), poll_interval, format);
        Self {
            backend,
            catalog: TrackCatalog::new(),
            jobs,
            player,
            format,
            status: String::from("Ready"),
            dirty: false,
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn take_status(&mut self) -> Option<String> {
        std::mem::take(&mut self.dirty).then(|| self.status.clone())
    }

    pub fn catalog(&self) -> &TrackCatalog {
        &self.catalog
    }

    pub fn jobs(&self) -> &JobTracker<B> {
        &self.jobs
    }

    pub fn player(&self) -> &PlaybackEngine<C> {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut PlaybackEngine<C> {
        &mut self.player
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.dirty = true;
    }

    fn report(&mut self, context: &str, err: &ClientError) {
        warn!(error = %err, "{context}");
        self.set_status(format!("{context}: {err}"));
    }

    fn surface_rejection(&mut self) {
        if let Some(rejection) = self.player.take_rejection() {
            self.set_status(rejection);
        }
    }

    /// Loads the library and seeds the queue with it, paused.
    pub async fn start(&mut self) {
        match self.catalog.refresh(&*self.backend).await {
            Ok(count) => {
                self.player.set_playlist(self.catalog.tracks().to_vec());
                self.set_status(format!("Library: {count} tracks"));
            }
            Err(err) => self.report("Could not load library", &err),
        }
    }

    pub async fn refresh_catalog(&mut self) -> bool {
        match self.catalog.refresh(&*self.backend).await {
            Ok(count) => {
                self.set_status(format!("Library: {count} tracks"));
                true
            }
            Err(err) => {
                self.report("Could not refresh library", &err);
                false
            }
        }
    }

    pub async fn submit(&mut self, source_url: &str) {
        match self.jobs.submit(source_url).await {
            Ok(SubmitOutcome::Started(job)) => {
                self.set_status(format!("Downloading {}...", job.id));
            }
            Ok(SubmitOutcome::AlreadyDownloaded { job_id, entry }) => {
                if let Err(err) = self.catalog.refresh(&*self.backend).await {
                    warn!(error = %err, "library refresh failed");
                }
                let track = self.resolve_track(&job_id, entry);
                self.set_status(format!("Already downloaded: {}", track.title));
                self.player.add(track);
                self.surface_rejection();
            }
            Ok(SubmitOutcome::Rejected(job)) => {
                let err = ClientError::RemoteJob(job.message);
                self.report("Download rejected", &err);
            }
            Err(err) => self.report("Could not start download", &err),
        }
    }

    pub async fn next_job_event(&mut self) -> Option<JobEvent> {
        self.jobs.next_event().await
    }

    pub async fn handle_job_event(&mut self, event: JobEvent) {
        if !self.jobs.apply(&event) {
            return;
        }
        match event {
            JobEvent::Updated(job) => {
                self.set_status(format!("{} [{}] {}", job.id, job.status.label(), job.message));
            }
            JobEvent::Finished(job) if job.status == JobStatus::Completed => {
                self.complete_job(&job.id).await;
            }
            JobEvent::Finished(job) => {
                let err = ClientError::RemoteJob(job.message);
                self.report(&job.id, &err);
            }
            JobEvent::PollFailed { job_id, error } => {
                warn!(%job_id, %error, "job stopped updating");
                self.set_status(format!(
                    "{job_id} stopped updating ({error}). Use refresh to check the library"
                ));
            }
        }
    }

    pub fn cancel(&mut self, job_id: &str) {
        match self.jobs.cancel(job_id) {
            Some(job) => self.set_status(format!("Cancelled {}", job.id)),
            None => self.set_status(format!("No download {job_id}")),
        }
    }

    pub fn clear_settled_jobs(&mut self) {
        let cleared = self.jobs.dismiss_settled();
        self.set_status(format!("Cleared {cleared} finished downloads"));
    }

    pub fn shutdown(&mut self) {
        let stopped = self.jobs.cancel_all();
        if stopped > 0 {
            info!(stopped, "abandoned running downloads");
        }
    }

    async fn complete_job(&mut self, job_id: &str) {
        let refreshed = self.catalog.refresh(&*self.backend).await;
        if let Err(err) = &refreshed {
            warn!(job_id, error = %err, "library refresh after download failed");
        }

        let track = self.resolve_track(job_id, None);
        self.jobs.resolve(job_id, track.clone());
        self.jobs.discard(job_id);
        info!(job_id, title = %track.title, "download ready");

        self.set_status(format!("Downloaded: {}", track.title));
        self.player.add(track);
        self.surface_rejection();
    }

    /// Catalog entry first, then whatever the backend sent along, then a
    /// stand-in built from the served file location.
    fn resolve_track(&self, job_id: &str, entry: Option<Track>) -> Track {
        self.catalog
            .find(job_id)
            .cloned()
            .or(entry)
            .unwrap_or_else(|| {
                debug!(job_id, "track missing from library; using placeholder");
                Track::placeholder(job_id, self.backend.audio_url(job_id, self.format))
            })
    }

    pub async fn remove(&mut self, id: &str) {
        let response = match self.backend.remove(id).await {
            Ok(response) => response,
            Err(err) => {
                self.report("Could not remove track", &err);
                return;
            }
        };

        match response.status.as_str() {
            "removed" => {
                self.catalog.forget(id);
                self.player.remove(id);
                info!(id, "track removed");
                self.set_status(format!("Removed {id}"));
                self.surface_rejection();
            }
            "error" => {
                let message = response
                    .message
                    .unwrap_or_else(|| format!("could not remove {id}"));
                self.set_status(format!("Remove failed: {message}"));
            }
            other => {
                let err =
                    ClientError::UnexpectedResponse(format!("remove returned status {other}"));
                self.report("Could not remove track", &err);
            }
        }
    }

    pub fn play_from_library(&mut self, id: &str) {
        let Some(track) = self.catalog.find(id).cloned() else {
            self.set_status(format!("No track {id} in the library"));
            return;
        };
        self.player.activate_or_toggle(track);
        self.set_status(self.now_playing());
        self.surface_rejection();
    }

    pub fn tick(&mut self) {
        let before = self.player.queue().current_index();
        self.player.tick();
        if self.player.queue().current_index() != before {
            self.set_status(self.now_playing());
        }
        self.surface_rejection();
    }

    pub fn now_playing(&self) -> String {
        match self.player.current_track() {
            None => String::from("Queue is empty"),
            Some(track) => format!(
                "{} {} - {} [{}]",
                if self.player.is_playing() { "Playing" } else { "Paused" },
                track.title,
                track.uploader,
                self.player.elapsed_label()
            ),
        }
    }

    pub async fn execute(&mut self, command: Command) -> Vec<String> {
        debug!(?command, "dispatch");
        match command {
            Command::Download(url) => self.submit(&url).await,
            Command::Jobs => return self.job_lines(),
            Command::Cancel(id) => self.cancel(&id),
            Command::ClearJobs => self.clear_settled_jobs(),
            Command::List(query) => return self.library_lines(&query),
            Command::Play(id) => self.play_from_library(&id),
            Command::Queue => return self.queue_lines(),
            Command::Remove(id) => self.remove(&id).await,
            Command::Toggle => {
                self.player.toggle_play();
                self.set_status(self.now_playing());
            }
            Command::Next => {
                self.player.next();
                self.set_status(self.now_playing());
            }
            Command::Prev => {
                self.player.prev();
                self.set_status(self.now_playing());
            }
            Command::Volume(volume) => {
                self.player.set_volume(volume);
                self.set_status(format!("Volume: {}%", self.player.volume()));
            }
            Command::Seek(percent) => {
                if self.player.duration().is_none() {
                    self.set_status("Nothing seekable is loaded");
                } else {
                    self.player.seek(percent);
                    self.set_status(self.now_playing());
                }
            }
            Command::Repeat => {
                let mode = self.player.cycle_repeat_mode();
                self.set_status(format!("Repeat: {}", mode.label()));
            }
            Command::Shuffle => {
                let on = self.player.toggle_shuffle();
                self.set_status(format!("Shuffle: {}", if on { "on" } else { "off" }));
            }
            Command::Refresh => {
                self.refresh_catalog().await;
            }
            Command::Help => return HELP.iter().map(|line| (*line).to_string()).collect(),
            Command::Quit => {}
        }
        self.surface_rejection();
        Vec::new()
    }

    fn job_lines(&self) -> Vec<String> {
        let lines: Vec<String> = self
            .jobs
            .jobs()
            .map(|job| format!("{} [{}] {}", job.id, job.status.label(), job.message))
            .collect();
        if lines.is_empty() {
            vec![String::from("No downloads running")]
        } else {
            lines
        }
    }

    fn library_lines(&self, query: &str) -> Vec<String> {
        if !self.catalog.is_loaded() {
            return vec![String::from("Library not loaded. Use refresh")];
        }
        let lines: Vec<String> = self
            .catalog
            .search(query)
            .into_iter()
            .map(|track| {
                format!(
                    "{}  {} - {} ({})",
                    track.id,
                    track.title,
                    track.uploader,
                    track.display_duration()
                )
            })
            .collect();
        if lines.is_empty() {
            vec![String::from("No matching tracks")]
        } else {
            lines
        }
    }

    fn queue_lines(&self) -> Vec<String> {
        let current = self.player.queue().current_index();
        let mut lines: Vec<String> = self
            .player
            .queue()
            .tracks()
            .iter()
            .enumerate()
            .map(|(idx, track)| {
                let marker = if Some(idx) == current { '>' } else { ' ' };
                format!("{marker} {:>3}. {} - {}", idx + 1, track.title, track.uploader)
            })
            .collect();
        lines.push(format!(
            "repeat {} | shuffle {} | volume {}%",
            self.player.repeat_mode().label(),
            if self.player.shuffle() { "on" } else { "off" },
            self.player.volume()
        ));
        lines
    }
}

enum Input {
    Line(String),
    Closed,
    Job(JobEvent),
    Tick,
}

pub async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let backend = Arc::new(HttpBackend::new(
        &config.backend_url,
        config.request_timeout(),
    )?);
    info!(backend = %backend.base_url(), format = config.audio_format.as_str(), "starting");

    let clock: Box<dyn MediaClock> = match RodioMediaClock::new() {
        Ok(clock) => Box::new(clock),
        Err(err) => {
            warn!(error = %err, "no audio output; playback runs silently");
            Box::new(NullMediaClock::new())
        }
    };
    if let Some(name) = clock.output_name() {
        info!(output = %name, "audio output ready");
    }

    let player = PlaybackEngine::new(clock, PlaylistQueue::new(), config.default_volume);
    let mut session = Session::new(backend, player, config.poll_interval(), config.audio_format);
    session.start().await;
    print_status(&mut session);
    println!("Type help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = time::interval(UI_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let input = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => Input::Line(line),
                None => Input::Closed,
            },
            Some(event) = session.next_job_event() => Input::Job(event),
            _ = ticker.tick() => Input::Tick,
        };

        match input {
            Input::Closed => break,
            Input::Tick => session.tick(),
            Input::Job(event) => session.handle_job_event(event).await,
            Input::Line(line) => match parse_command(&line) {
                Ok(Command::Quit) => break,
                Ok(command) => {
                    for out in session.execute(command).await {
                        println!("{out}");
                    }
                }
                Err(CommandError::Empty) => {}
                Err(err) => println!("{err}"),
            },
        }
        print_status(&mut session);
    }

    session.shutdown();
    info!("shutting down");
    Ok(())
}

fn print_status<B: BackendApi, C: MediaClock>(session: &mut Session<B, C>) {
    if let Some(status) = session.take_status() {
        println!("{status}");
    }
}
