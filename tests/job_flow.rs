use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tunedrop::app::Session;
use tunedrop::audio::{MediaClock, NullMediaClock};
use tunedrop::backend::{BackendApi, ListResponse, RemoveResponse, StatusResponse, SubmitResponse};
use tunedrop::jobs::JobEvent;
use tunedrop::model::{AudioFormat, DownloadJob, JobStatus, Track};
use tunedrop::player::PlaybackEngine;
use tunedrop::queue::PlaylistQueue;
use tunedrop::{ClientError, Result};

/// Backend fake that replays canned answers and counts every request.
#[derive(Default)]
struct ScriptedBackend {
    submit: Mutex<Option<SubmitResponse>>,
    statuses: Mutex<VecDeque<&'static str>>,
    lists: Mutex<VecDeque<Vec<Track>>>,
    requests: AtomicUsize,
    list_calls: AtomicUsize,
}

impl ScriptedBackend {
    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl BackendApi for ScriptedBackend {
    async fn submit(&self, _url: &str, _format: AudioFormat) -> Result<SubmitResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.submit
            .lock()
            .expect("lock")
            .clone()
            .ok_or_else(|| ClientError::Network(String::from("offline")))
    }

    async fn status(&self, _job_id: &str) -> Result<StatusResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or("completed");
        Ok(StatusResponse {
            status: status.to_string(),
            message: format!("{status}..."),
        })
    }

    async fn list(&self) -> Result<ListResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut lists = self.lists.lock().expect("lock");
        let downloads = if lists.len() > 1 {
            lists.pop_front().unwrap_or_default()
        } else {
            lists.front().cloned().unwrap_or_default()
        };
        Ok(ListResponse {
            status: String::from(if downloads.is_empty() { "empty" } else { "success" }),
            downloads,
        })
    }

    async fn remove(&self, id: &str) -> Result<RemoveResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(RemoveResponse {
            status: String::from("removed"),
            message: Some(id.to_string()),
        })
    }

    fn audio_url(&self, id: &str, format: AudioFormat) -> String {
        format!("http://backend/files/{id}.{}", format.as_str())
    }
}

fn track(id: &str, title: &str) -> Track {
    let mut track = Track::placeholder(id, format!("http://backend/files/{id}.mp3"));
    track.title = title.to_string();
    track.uploader = String::from("Someone");
    track
}

fn session(backend: &Arc<ScriptedBackend>) -> Session<ScriptedBackend, NullMediaClock> {
    let player = PlaybackEngine::new(NullMediaClock::new(), PlaylistQueue::with_seed(3), 70);
    Session::new(
        Arc::clone(backend),
        player,
        Duration::from_millis(5),
        AudioFormat::Mp3,
    )
}

async fn drain_until_idle(session: &mut Session<ScriptedBackend, NullMediaClock>) {
    while session.jobs().jobs().count() > 0 {
        let event = tokio::time::timeout(Duration::from_secs(5), session.next_job_event())
            .await
            .expect("job event in time")
            .expect("channel open");
        session.handle_job_event(event).await;
    }
}

#[tokio::test]
async fn completed_download_is_appended_and_played() {
    let backend = Arc::new(ScriptedBackend::default());
    *backend.submit.lock().expect("lock") = Some(SubmitResponse {
        status: String::from("started"),
        video_id: Some(String::from("abc")),
        ..SubmitResponse::default()
    });
    *backend.statuses.lock().expect("lock") =
        VecDeque::from(["downloading", "downloading", "completed"]);
    *backend.lists.lock().expect("lock") = VecDeque::from([
        vec![track("old", "Old Song")],
        vec![track("abc", "Fresh Song"), track("old", "Old Song")],
    ]);

    let mut session = session(&backend);
    session.start().await;
    assert_eq!(session.player().queue().len(), 1);
    assert!(!session.player().is_playing(), "startup never autoplays");

    session.submit("https://valid/url").await;
    assert_eq!(
        session.jobs().get("abc").map(|job| job.status),
        Some(JobStatus::Queued)
    );

    drain_until_idle(&mut session).await;

    let queue = session.player().queue();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.current_index(), Some(queue.len() - 1));
    assert_eq!(
        queue.current_track().map(|track| track.title.as_str()),
        Some("Fresh Song")
    );
    assert!(session.player().is_playing());
    assert_eq!(backend.list_calls.load(Ordering::SeqCst), 2, "refetched once");
    assert!(session.catalog().find("abc").is_some());
    assert!(session.status().contains("Fresh Song"));
}

#[tokio::test]
async fn completed_job_missing_from_library_gets_placeholder() {
    let backend = Arc::new(ScriptedBackend::default());
    *backend.submit.lock().expect("lock") = Some(SubmitResponse {
        status: String::from("started"),
        video_id: Some(String::from("ghost")),
        ..SubmitResponse::default()
    });

    let mut session = session(&backend);
    session.submit("https://valid/url").await;
    drain_until_idle(&mut session).await;

    let current = session.player().current_track().expect("track queued");
    assert_eq!(current.title, "ghost");
    assert_eq!(current.uploader, "Unknown Artist");
    assert_eq!(current.audio_url, "http://backend/files/ghost.mp3");
}

#[tokio::test]
async fn blank_submit_makes_no_requests() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut session = session(&backend);

    session.submit("   ").await;

    assert_eq!(backend.requests(), 0);
    assert!(session.status().starts_with("Could not start download: Invalid input"));
    assert_eq!(session.jobs().jobs().count(), 0);
}

#[tokio::test]
async fn rejected_submit_is_reported_and_never_polled() {
    let backend = Arc::new(ScriptedBackend::default());
    *backend.submit.lock().expect("lock") = Some(SubmitResponse {
        status: String::from("error"),
        error: Some(String::from("Unsupported URL")),
        ..SubmitResponse::default()
    });

    let mut session = session(&backend);
    session.submit("https://nope").await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(backend.requests(), 1);
    assert_eq!(
        session.status(),
        "Download rejected: Download failed: Unsupported URL"
    );
    assert_eq!(
        session.jobs().get("https://nope").map(|job| job.status),
        Some(JobStatus::Error)
    );
    assert!(session.player().queue().is_empty());
}

#[tokio::test]
async fn already_downloaded_is_queued_without_polling() {
    let backend = Arc::new(ScriptedBackend::default());
    *backend.submit.lock().expect("lock") = Some(SubmitResponse {
        status: String::from("already_downloaded"),
        entry: Some(track("abc", "Known Song")),
        ..SubmitResponse::default()
    });
    *backend.lists.lock().expect("lock") = VecDeque::from([vec![track("abc", "Known Song")]]);

    let mut session = session(&backend);
    session.start().await;
    assert!(!session.player().is_playing());
    session.submit("https://valid/url").await;

    assert_eq!(session.jobs().active_polls(), 0);
    assert_eq!(session.player().queue().len(), 1, "deduplicated by identity");
    assert_eq!(
        session.player().current_track().map(|track| track.id.as_str()),
        Some("abc")
    );
    assert!(session.player().is_playing());
}

#[tokio::test]
async fn remove_updates_library_and_queue() {
    let backend = Arc::new(ScriptedBackend::default());
    *backend.lists.lock().expect("lock") =
        VecDeque::from([vec![track("a", "A"), track("b", "B")]]);

    let mut session = session(&backend);
    session.start().await;
    session.play_from_library("b");
    assert_eq!(session.player().queue().current_index(), Some(1));

    session.remove("a").await;

    assert!(session.catalog().find("a").is_none());
    assert_eq!(session.player().queue().len(), 1);
    assert_eq!(
        session.player().current_track().map(|track| track.id.as_str()),
        Some("b")
    );
}

fn started(backend: &ScriptedBackend, id: &str) {
    *backend.submit.lock().expect("lock") = Some(SubmitResponse {
        status: String::from("started"),
        video_id: Some(id.to_string()),
        ..SubmitResponse::default()
    });
}

#[tokio::test]
async fn remote_error_during_polling_is_reported() {
    let backend = Arc::new(ScriptedBackend::default());
    started(&backend, "abc");
    *backend.statuses.lock().expect("lock") = VecDeque::from(["downloading", "error"]);

    let mut session = session(&backend);
    session.submit("https://valid/url").await;
    while session.jobs().active_polls() > 0 {
        let event = tokio::time::timeout(Duration::from_secs(5), session.next_job_event())
            .await
            .expect("job event in time")
            .expect("channel open");
        session.handle_job_event(event).await;
    }

    assert_eq!(session.status(), "abc: Download failed: error...");
    assert_eq!(
        session.jobs().get("abc").map(|job| job.status),
        Some(JobStatus::Error)
    );
    assert!(session.player().queue().is_empty());
    assert_eq!(backend.list_calls.load(Ordering::SeqCst), 0);

    let settled = backend.requests();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(backend.requests(), settled, "no polling after an error");
}

#[tokio::test]
async fn removing_the_current_track_moves_to_the_first_entry() {
    let backend = Arc::new(ScriptedBackend::default());
    *backend.lists.lock().expect("lock") =
        VecDeque::from([vec![track("a", "A"), track("b", "B"), track("c", "C")]]);

    let mut session = session(&backend);
    session.start().await;
    session.play_from_library("b");
    assert!(session.player().is_playing());

    session.remove("b").await;

    let queue = session.player().queue();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.current_index(), Some(0));
    assert_eq!(
        session.player().clock().source(),
        Some("http://backend/files/a.mp3")
    );
    assert!(session.player().is_playing());
    assert_eq!(session.status(), "Removed b");
}

#[tokio::test]
async fn cancelled_job_ignores_late_reports() {
    let backend = Arc::new(ScriptedBackend::default());
    started(&backend, "abc");
    *backend.statuses.lock().expect("lock") = VecDeque::from(["downloading"; 64]);

    let mut session = session(&backend);
    session.submit("https://valid/url").await;
    session.cancel("abc");
    assert_eq!(session.status(), "Cancelled abc");
    assert_eq!(session.jobs().jobs().count(), 0);

    let late = JobEvent::Finished(DownloadJob {
        status: JobStatus::Completed,
        ..DownloadJob::queued("abc", "https://valid/url")
    });
    session.handle_job_event(late).await;

    assert!(session.player().queue().is_empty());
    assert_eq!(backend.list_calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.status(), "Cancelled abc");
}

#[tokio::test]
async fn first_download_into_an_empty_library_waits_for_play() {
    let backend = Arc::new(ScriptedBackend::default());
    started(&backend, "abc");
    *backend.lists.lock().expect("lock") = VecDeque::from([vec![track("abc", "Fresh Song")]]);

    let mut session = session(&backend);
    session.submit("https://valid/url").await;
    drain_until_idle(&mut session).await;

    let queue = session.player().queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.current_index(), Some(0));
    assert!(!session.player().is_playing(), "first source never autoplays");

    session.player_mut().toggle_play();
    assert!(session.player().is_playing());
}
