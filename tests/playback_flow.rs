use std::thread;
use std::time::Duration;
use tunedrop::audio::{MediaClock, NullMediaClock};
use tunedrop::model::{RepeatMode, Track};
use tunedrop::player::{PlaybackEngine, ProgressBar};
use tunedrop::queue::PlaylistQueue;

fn track(id: &str) -> Track {
    Track::placeholder(id, format!("http://backend/files/{id}.mp3"))
}

fn engine(ids: &[&str], length: Duration) -> PlaybackEngine<NullMediaClock> {
    let mut engine = PlaybackEngine::new(
        NullMediaClock::with_track_duration(length),
        PlaylistQueue::with_seed(11),
        70,
    );
    engine.set_playlist(ids.iter().map(|id| track(id)).collect());
    engine
}

#[test]
fn queue_navigation_drives_the_clock() {
    let mut engine = engine(&["a", "b", "c"], Duration::from_secs(180));
    assert_eq!(engine.clock().source(), Some("http://backend/files/a.mp3"));
    assert!(engine.clock().is_paused());

    engine.toggle_play();
    assert!(engine.is_playing());
    assert!(!engine.clock().is_paused());

    engine.next();
    engine.next();
    assert_eq!(engine.clock().source(), Some("http://backend/files/c.mp3"));
    engine.next();
    assert_eq!(engine.queue().current_index(), Some(0));
    engine.prev();
    assert_eq!(engine.queue().current_index(), Some(2));
    assert!(engine.is_playing());
}

#[test]
fn shuffle_never_repeats_the_current_track() {
    let mut engine = engine(&["a", "b", "c", "d"], Duration::from_secs(180));
    assert!(engine.toggle_shuffle());
    for _ in 0..50 {
        let before = engine.queue().current_index();
        engine.next();
        assert_ne!(engine.queue().current_index(), before);
    }
}

#[test]
fn drag_commits_one_seek_on_release() {
    let mut engine = engine(&["a"], Duration::from_secs(200));
    let bar = ProgressBar::new(0.0, 500.0);

    engine.begin_scrub();
    engine.scrub_to(50.0, bar);
    engine.scrub_to(250.0, bar);
    assert!(engine.is_scrubbing());
    assert_eq!(engine.elapsed(), Duration::ZERO, "clock untouched mid-drag");

    engine.end_scrub(400.0, bar);
    assert!(!engine.is_scrubbing());
    assert_eq!(engine.elapsed(), Duration::from_secs(160));
}

#[test]
fn leaving_the_bar_mid_drag_discards_it() {
    let mut engine = engine(&["a"], Duration::from_secs(200));
    let bar = ProgressBar::new(0.0, 500.0);

    engine.begin_scrub();
    engine.scrub_to(450.0, bar);
    engine.cancel_scrub();
    engine.end_scrub(450.0, bar);

    assert_eq!(engine.elapsed(), Duration::ZERO);
}

#[test]
fn end_of_queue_without_repeat_stops() {
    let mut engine = engine(&["a", "b"], Duration::from_millis(20));
    engine.next();
    assert!(engine.is_playing());
    assert_eq!(engine.repeat_mode(), RepeatMode::Off);

    thread::sleep(Duration::from_millis(40));
    engine.tick();

    assert!(!engine.is_playing());
    assert_eq!(engine.queue().current_index(), Some(1));
}

#[test]
fn repeat_one_replays_in_place() {
    let mut engine = engine(&["a", "b"], Duration::from_millis(20));
    engine.cycle_repeat_mode();
    engine.toggle_play();

    thread::sleep(Duration::from_millis(40));
    engine.tick();

    assert!(engine.is_playing());
    assert_eq!(engine.queue().current_index(), Some(0));
    assert!(engine.elapsed() < Duration::from_millis(20));
}

#[test]
fn volume_maps_onto_the_clock() {
    let mut engine = engine(&["a"], Duration::from_secs(10));
    engine.set_volume(150);
    assert_eq!(engine.volume(), 100);
    assert!((engine.clock().volume() - 1.0).abs() < f32::EPSILON);
    engine.set_volume(25);
    assert!((engine.clock().volume() - 0.25).abs() < f32::EPSILON);
}
