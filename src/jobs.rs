use crate::backend::BackendApi;
use crate::error::{ClientError, Result};
use crate::model::{AudioFormat, DownloadJob, JobStatus, Track};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MAX_SETTLED_JOBS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Updated(DownloadJob),
    Finished(DownloadJob),
    PollFailed { job_id: String, error: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Updated(job) | Self::Finished(job) => &job.id,
            Self::PollFailed { job_id, .. } => job_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Started(DownloadJob),
    AlreadyDownloaded { job_id: String, entry: Option<Track> },
    Rejected(DownloadJob),
}

impl SubmitOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Started(job) | Self::Rejected(job) => &job.id,
            Self::AlreadyDownloaded { job_id, .. } => job_id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Started(job) | Self::Rejected(job) => job.status,
            Self::AlreadyDownloaded { .. } => JobStatus::Completed,
        }
    }
}

/// Aborts the poll task when dropped.
#[derive(Debug)]
struct PollHandle(JoinHandle<()>);

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug)]
struct TrackedJob {
    job: DownloadJob,
    poll: Option<PollHandle>,
}

pub struct JobTracker<B: BackendApi> {
    backend: Arc<B>,
    poll_interval: Duration,
    format: AudioFormat,
    jobs: Vec<TrackedJob>,
    events_tx: UnboundedSender<JobEvent>,
    events_rx: UnboundedReceiver<JobEvent>,
}

impl<B: BackendApi> JobTracker<B> {
    pub fn new(backend: Arc<B>, poll_interval: Duration, format: AudioFormat) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            poll_interval,
            format,
            jobs: Vec::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &DownloadJob> {
        self.jobs.iter().map(|tracked| &tracked.job)
    }

    pub fn get(&self, job_id: &str) -> Option<&DownloadJob> {
        self.find(job_id).map(|tracked| &tracked.job)
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.find(job_id)
            .is_some_and(|tracked| tracked.poll.is_some())
    }

    pub fn active_polls(&self) -> usize {
        self.jobs
            .iter()
            .filter(|tracked| tracked.poll.is_some())
            .count()
    }

    fn find(&self, job_id: &str) -> Option<&TrackedJob> {
        self.jobs.iter().find(|tracked| tracked.job.id == job_id)
    }

    fn find_mut(&mut self, job_id: &str) -> Option<&mut TrackedJob> {
        self.jobs.iter_mut().find(|tracked| tracked.job.id == job_id)
    }

    pub async fn submit(&mut self, source_url: &str) -> Result<SubmitOutcome> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(ClientError::Validation(String::from(
                "enter a URL to download",
            )));
        }

        let response = self.backend.submit(source_url, self.format).await?;
        let job_id = response
            .video_id
            .clone()
            .or_else(|| response.entry.as_ref().map(|entry| entry.id.clone()))
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| source_url.to_string());

        match response.status.as_str() {
            "started" => {
                if let Some(existing) = self.find(&job_id)
                    && existing.poll.is_some()
                {
                    debug!(%job_id, "job already being polled");
                    return Ok(SubmitOutcome::Started(existing.job.clone()));
                }

                let job = DownloadJob::queued(&job_id, source_url);
                let poll = self.spawn_poll(job.clone());
                info!(%job_id, "download started");
                self.track(job.clone(), Some(poll));
                Ok(SubmitOutcome::Started(job))
            }
            "already_downloaded" => {
                info!(%job_id, "already downloaded");
                Ok(SubmitOutcome::AlreadyDownloaded {
                    job_id,
                    entry: response.entry,
                })
            }
            "error" => {
                let message = response
                    .error
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| String::from("Unknown error"));
                warn!(%job_id, %message, "download rejected");
                let job = DownloadJob::failed(&job_id, source_url, &message);
                self.track(job.clone(), None);
                Ok(SubmitOutcome::Rejected(job))
            }
            other => Err(ClientError::UnexpectedResponse(format!(
                "download returned status {other}"
            ))),
        }
    }

    fn track(&mut self, job: DownloadJob, poll: Option<PollHandle>) {
        match self.find_mut(&job.id) {
            Some(tracked) => {
                tracked.job = job;
                tracked.poll = poll;
            }
            None => self.jobs.push(TrackedJob { job, poll }),
        }
        self.trim_settled();
    }

    fn spawn_poll(&self, job: DownloadJob) -> PollHandle {
        let backend = Arc::clone(&self.backend);
        let events = self.events_tx.clone();
        let every = self.poll_interval;
        PollHandle(tokio::spawn(poll_until_terminal(backend, job, every, events)))
    }

    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<JobEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Folds a task report into the tracked snapshot. False when the job is
    /// no longer tracked, e.g. cancelled while a poll was in flight.
    pub fn apply(&mut self, event: &JobEvent) -> bool {
        let Some(tracked) = self.find_mut(event.job_id()) else {
            debug!(job_id = event.job_id(), "report for untracked job dropped");
            return false;
        };

        match event {
            JobEvent::Updated(job) => tracked.job = job.clone(),
            JobEvent::Finished(job) => {
                tracked.job = job.clone();
                tracked.poll = None;
            }
            JobEvent::PollFailed { error, .. } => {
                tracked.job.message = format!("stopped updating: {error}");
                tracked.poll = None;
            }
        }
        true
    }

    pub fn resolve(&mut self, job_id: &str, track: Track) {
        if let Some(tracked) = self.find_mut(job_id) {
            tracked.job.resolved_track = Some(track);
        }
    }

    /// Forgets a job and aborts its task if it is still running.
    pub fn discard(&mut self, job_id: &str) -> Option<DownloadJob> {
        let idx = self
            .jobs
            .iter()
            .position(|tracked| tracked.job.id == job_id)?;
        Some(self.jobs.remove(idx).job)
    }

    pub fn cancel(&mut self, job_id: &str) -> Option<DownloadJob> {
        let job = self.discard(job_id)?;
        info!(job_id, "download cancelled");
        Some(job)
    }

    pub fn cancel_all(&mut self) -> usize {
        let mut stopped = 0;
        for tracked in &mut self.jobs {
            if tracked.poll.take().is_some() {
                stopped += 1;
            }
        }
        stopped
    }

    /// Forgets every job that is no longer polling: failures and jobs that
    /// stopped updating.
    pub fn dismiss_settled(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|tracked| tracked.poll.is_some());
        before - self.jobs.len()
    }

    fn trim_settled(&mut self) {
        let settled = self
            .jobs
            .iter()
            .filter(|tracked| tracked.poll.is_none())
            .count();
        let mut excess = settled.saturating_sub(MAX_SETTLED_JOBS);
        self.jobs.retain(|tracked| {
            if excess > 0 && tracked.poll.is_none() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

/// One job's poll cycle. A tick is only awaited after the previous response
/// has been applied, so a job never has two requests in flight.
async fn poll_until_terminal<B: BackendApi>(
    backend: Arc<B>,
    mut job: DownloadJob,
    every: Duration,
    events: UnboundedSender<JobEvent>,
) {
    let mut ticker = time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let response = match backend.status(&job.id).await {
            Ok(response) => response,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "status poll failed; giving up on job");
                let _ = events.send(JobEvent::PollFailed {
                    job_id: job.id.clone(),
                    error: err.to_string(),
                });
                return;
            }
        };

        let changed = job.apply_wire_status(&response.status, &response.message);
        if job.is_terminal() {
            info!(job_id = %job.id, status = job.status.label(), "job finished");
            let _ = events.send(JobEvent::Finished(job));
            return;
        }

        if changed {
            debug!(job_id = %job.id, status = job.status.label(), message = %job.message, "job progress");
            if events.send(JobEvent::Updated(job.clone())).is_err() {
                return;
            }
        }
    }
}
