use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use picture_frame::slideshow::{
    self, Command, ControllerHandle, ControllerOptions, DisplaySurface, ImageSource, Key, Phase,
    SwipeDirection,
};
use picture_frame::store::ImageRecord;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

fn records(ids: &[&str]) -> Vec<ImageRecord> {
    ids.iter()
        .map(|id| ImageRecord::from_filename(&format!("{id}.jpg"), "/uploads"))
        .collect()
}

#[derive(Default)]
struct FakeSource {
    response: Mutex<Option<Result<Vec<ImageRecord>, String>>>,
    hang: AtomicBool,
    fetches: AtomicUsize,
    preloaded: Mutex<Vec<String>>,
}

impl FakeSource {
    fn serving(ids: &[&str]) -> Arc<Self> {
        let source = Self::default();
        source.set_images(ids);
        Arc::new(source)
    }

    fn set_images(&self, ids: &[&str]) {
        *self.response.lock().unwrap() = Some(Ok(records(ids)));
    }

    fn set_failure(&self, message: &str) {
        *self.response.lock().unwrap() = Some(Err(message.to_string()));
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn preloaded_ids(&self) -> Vec<String> {
        self.preloaded.lock().unwrap().clone()
    }
}

impl ImageSource for FakeSource {
    async fn fetch_images(&self) -> Result<Vec<ImageRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let response = self.response.lock().unwrap().clone();
        match response {
            Some(Ok(images)) => Ok(images),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no response configured")),
        }
    }

    async fn preload(&self, image: &ImageRecord) -> Result<()> {
        self.preloaded.lock().unwrap().push(image.id.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeSurface {
    requests: Mutex<Vec<bool>>,
}

impl DisplaySurface for FakeSurface {
    fn set_fullscreen(&self, fullscreen: bool) -> Result<bool> {
        self.requests.lock().unwrap().push(fullscreen);
        Ok(fullscreen)
    }
}

fn options() -> ControllerOptions {
    ControllerOptions {
        refresh_interval: Duration::from_secs(3600),
        ..ControllerOptions::default()
    }
}

fn start(
    source: Arc<FakeSource>,
    opts: ControllerOptions,
) -> (ControllerHandle, Arc<FakeSurface>) {
    let surface = Arc::new(FakeSurface::default());
    let handle = slideshow::spawn(source, surface.clone(), opts, CancellationToken::new());
    (handle, surface)
}

/// Let every ready task run; the paused clock moves by one millisecond.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

fn current_id(handle: &ControllerHandle) -> Option<String> {
    handle.snapshot().current.map(|img| img.id)
}

async fn swipe(handle: &ControllerHandle, from: f32, to: f32) {
    handle.send(Command::TouchStart { x: from }).await.unwrap();
    handle.send(Command::TouchMove { x: to }).await.unwrap();
    handle.send(Command::TouchEnd).await.unwrap();
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn first_fetch_shows_first_image() {
    let source = FakeSource::serving(&["a", "b", "c"]);
    let (handle, _) = start(source.clone(), options());
    assert_eq!(handle.snapshot().phase, Phase::Loading);

    settle().await;
    let snap = handle.snapshot();
    assert_eq!(snap.phase, Phase::Displaying(0));
    assert_eq!(snap.image_count, 3);
    assert_eq!(current_id(&handle).as_deref(), Some("a"));
    assert_eq!(source.fetch_count(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rotation_wraps_around() {
    let source = FakeSource::serving(&["a", "b", "c"]);
    let (handle, _) = start(source, options());
    settle().await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        sleep(Duration::from_secs(10)).await;
        seen.push(handle.snapshot().current_index);
    }
    assert_eq!(seen, vec![1, 2, 0]);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn single_image_stays_put() {
    let source = FakeSource::serving(&["only"]);
    let (handle, _) = start(source.clone(), options());
    settle().await;
    sleep(Duration::from_secs(25)).await;
    assert_eq!(handle.snapshot().phase, Phase::Displaying(0));
    assert!(source.preloaded_ids().is_empty());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_navigation_keeps_rotation_schedule() {
    let source = FakeSource::serving(&["a", "b", "c", "d"]);
    let (handle, _) = start(source, options());
    settle().await;

    sleep(Duration::from_secs(7)).await;
    handle.send(Command::Next).await.unwrap();
    settle().await;
    assert_eq!(handle.snapshot().current_index, 1);

    // The timer armed at display time fires at t=10s regardless.
    sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.snapshot().current_index, 2);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn arrow_keys_navigate_with_wrap() {
    let source = FakeSource::serving(&["a", "b", "c"]);
    let (handle, _) = start(source, options());
    settle().await;

    handle.send(Command::Key(Key::ArrowLeft)).await.unwrap();
    settle().await;
    assert_eq!(current_id(&handle).as_deref(), Some("c"));

    handle.send(Command::Key(Key::ArrowRight)).await.unwrap();
    handle.send(Command::Key(Key::ArrowRight)).await.unwrap();
    settle().await;
    assert_eq!(current_id(&handle).as_deref(), Some("b"));

    handle.send(Command::Key(Key::Char('x'))).await.unwrap();
    settle().await;
    assert_eq!(current_id(&handle).as_deref(), Some("b"));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn swipe_past_threshold_advances_once() {
    let source = FakeSource::serving(&["a", "b", "c"]);
    let (handle, _) = start(source, options());
    settle().await;

    swipe(&handle, 200.0, 149.0).await;
    let snap = handle.snapshot();
    assert_eq!(snap.current_index, 1);
    assert_eq!(snap.swipe_direction, Some(SwipeDirection::Next));
    assert!(!snap.is_swiping);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.snapshot().swipe_direction, None);

    swipe(&handle, 100.0, 170.0).await;
    assert_eq!(handle.snapshot().current_index, 0);
    assert_eq!(
        handle.snapshot().swipe_direction,
        Some(SwipeDirection::Previous)
    );
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn short_swipe_and_tap_do_nothing() {
    let source = FakeSource::serving(&["a", "b", "c"]);
    let (handle, _) = start(source, options());
    settle().await;

    swipe(&handle, 200.0, 170.0).await;
    assert_eq!(handle.snapshot().current_index, 0);
    assert_eq!(handle.snapshot().swipe_direction, None);

    handle.send(Command::TouchStart { x: 10.0 }).await.unwrap();
    settle().await;
    assert!(handle.snapshot().is_swiping);
    handle.send(Command::TouchEnd).await.unwrap();
    settle().await;
    let snap = handle.snapshot();
    assert!(!snap.is_swiping);
    assert_eq!(snap.current_index, 0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fullscreen_follows_requests_and_external_changes() {
    let source = FakeSource::serving(&["a"]);
    let (handle, surface) = start(source, options());
    settle().await;
    assert!(!handle.snapshot().is_fullscreen);

    handle.send(Command::Key(Key::Char('f'))).await.unwrap();
    settle().await;
    assert!(handle.snapshot().is_fullscreen);

    // Escape pressed outside the app.
    handle.send(Command::FullscreenChanged(false)).await.unwrap();
    settle().await;
    assert!(!handle.snapshot().is_fullscreen);

    handle.send(Command::ToggleFullscreen).await.unwrap();
    settle().await;
    assert!(handle.snapshot().is_fullscreen);
    assert_eq!(*surface.requests.lock().unwrap(), vec![true, true]);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn controls_hide_after_inactivity() {
    let source = FakeSource::serving(&["a", "b"]);
    let (handle, _) = start(source, options());
    settle().await;
    assert!(handle.snapshot().show_controls);

    sleep(Duration::from_secs(3)).await;
    assert!(!handle.snapshot().show_controls);

    handle.send(Command::PointerMoved).await.unwrap();
    settle().await;
    assert!(handle.snapshot().show_controls);

    sleep(Duration::from_secs(2)).await;
    handle.send(Command::PointerMoved).await.unwrap();
    sleep(Duration::from_secs(2)).await;
    assert!(handle.snapshot().show_controls, "movement restarts the countdown");

    sleep(Duration::from_millis(1100)).await;
    assert!(!handle.snapshot().show_controls);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn render_failure_skips_after_delay() {
    let source = FakeSource::serving(&["a", "b", "c"]);
    let (handle, _) = start(source, options());
    settle().await;

    handle
        .send(Command::ImageFailed { id: "a".into() })
        .await
        .unwrap();
    sleep(Duration::from_millis(1900)).await;
    assert_eq!(handle.snapshot().current_index, 0);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(current_id(&handle).as_deref(), Some("b"));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn navigation_cancels_pending_skip() {
    let source = FakeSource::serving(&["a", "b", "c"]);
    let (handle, _) = start(source, options());
    settle().await;

    handle
        .send(Command::ImageFailed { id: "a".into() })
        .await
        .unwrap();
    sleep(Duration::from_secs(1)).await;
    handle.send(Command::Next).await.unwrap();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(current_id(&handle).as_deref(), Some("b"));

    // Reports for images no longer on screen are ignored.
    handle
        .send(Command::ImageFailed { id: "a".into() })
        .await
        .unwrap();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(current_id(&handle).as_deref(), Some("b"));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn neighbours_are_preloaded() {
    let source = FakeSource::serving(&["a", "b", "c", "d"]);
    let (handle, _) = start(source.clone(), options());
    settle().await;

    let mut preloaded = source.preloaded_ids();
    preloaded.sort();
    assert_eq!(preloaded, vec!["b".to_string(), "d".to_string()]);
    assert_eq!(handle.snapshot().preloaded, vec![1, 3]);

    handle.send(Command::Next).await.unwrap();
    settle().await;
    let mut preloaded = source.preloaded_ids();
    preloaded.sort();
    assert_eq!(preloaded, vec!["a", "b", "c", "d"]);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn first_fetch_failure_shows_error() {
    let source = Arc::new(FakeSource::default());
    source.set_failure("connection refused");
    let (handle, _) = start(source.clone(), options());
    settle().await;
    assert_eq!(handle.snapshot().phase, Phase::Error);
    assert!(handle.snapshot().current.is_none());

    source.set_images(&["a"]);
    handle.send(Command::Refresh).await.unwrap();
    settle().await;
    assert_eq!(handle.snapshot().phase, Phase::Displaying(0));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_collection_is_reported() {
    let source = FakeSource::serving(&[]);
    let (handle, _) = start(source, options());
    settle().await;
    let snap = handle.snapshot();
    assert_eq!(snap.phase, Phase::Empty);
    assert_eq!(snap.image_count, 0);

    handle.send(Command::Next).await.unwrap();
    sleep(Duration::from_secs(15)).await;
    assert_eq!(handle.snapshot().phase, Phase::Empty);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_then_populated_starts_displaying() {
    let source = FakeSource::serving(&[]);
    let (handle, _) = start(source.clone(), options());
    settle().await;
    assert_eq!(handle.snapshot().phase, Phase::Empty);

    source.set_images(&["a", "b"]);
    handle.send(Command::Refresh).await.unwrap();
    settle().await;
    let snap = handle.snapshot();
    assert_eq!(snap.phase, Phase::Displaying(0));
    assert_eq!(snap.image_count, 2);
    assert_eq!(current_id(&handle).as_deref(), Some("a"));

    sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.snapshot().phase, Phase::Displaying(1));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_rearms_rotation_against_new_length() {
    let source = FakeSource::serving(&["a", "b", "c"]);
    let (handle, _) = start(source.clone(), options());
    settle().await;

    sleep(Duration::from_secs(6)).await;
    source.set_images(&["a", "b"]);
    handle.send(Command::Refresh).await.unwrap();
    settle().await;
    assert_eq!(handle.snapshot().image_count, 2);

    // The first t=10s tick was replaced by one a full interval after the refresh.
    sleep(Duration::from_millis(4500)).await;
    assert_eq!(handle.snapshot().current_index, 0);
    sleep(Duration::from_millis(5600)).await;
    assert_eq!(handle.snapshot().current_index, 1);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.snapshot().current_index, 0);

    source.set_images(&[]);
    handle.send(Command::Refresh).await.unwrap();
    settle().await;
    assert_eq!(handle.snapshot().phase, Phase::Empty);
    sleep(Duration::from_secs(30)).await;
    let snap = handle.snapshot();
    assert_eq!(snap.phase, Phase::Empty);
    assert!(snap.current.is_none());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stray_touch_events_do_not_start_a_swipe() {
    let source = FakeSource::serving(&["a", "b"]);
    let (handle, _) = start(source, options());
    settle().await;

    handle.send(Command::TouchMove { x: 10.0 }).await.unwrap();
    handle.send(Command::TouchEnd).await.unwrap();
    settle().await;
    let snap = handle.snapshot();
    assert!(!snap.is_swiping);
    assert_eq!(snap.current_index, 0);
    assert_eq!(snap.swipe_direction, None);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_current_frame() {
    let source = FakeSource::serving(&["a", "b"]);
    let opts = ControllerOptions {
        refresh_interval: Duration::from_secs(60),
        rotation_interval: Duration::from_secs(1000),
        ..ControllerOptions::default()
    };
    let (handle, _) = start(source.clone(), opts);
    settle().await;
    handle.send(Command::Next).await.unwrap();
    settle().await;
    let before = handle.snapshot();

    source.set_failure("server went away");
    sleep(Duration::from_secs(60)).await;
    assert_eq!(source.fetch_count(), 2);
    let after = handle.snapshot();
    assert_eq!(after.phase, Phase::Displaying(1));
    assert_eq!(after.current, before.current);
    assert_eq!(after.image_count, 2);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_keeps_current_image_by_id() {
    let source = FakeSource::serving(&["a", "b", "c"]);
    let (handle, _) = start(source.clone(), options());
    settle().await;
    handle.send(Command::Next).await.unwrap();
    settle().await;
    assert_eq!(current_id(&handle).as_deref(), Some("b"));

    source.set_images(&["new", "a", "b", "c"]);
    handle.send(Command::Refresh).await.unwrap();
    settle().await;
    let snap = handle.snapshot();
    assert_eq!(snap.image_count, 4);
    assert_eq!(snap.current_index, 2);
    assert_eq!(current_id(&handle).as_deref(), Some("b"));

    // Current image deleted elsewhere: index is clamped.
    source.set_images(&["new", "a"]);
    handle.send(Command::Refresh).await.unwrap();
    settle().await;
    assert_eq!(handle.snapshot().current_index, 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_in_flight_fetch() {
    let source = FakeSource::serving(&["a"]);
    source.hang.store(true, Ordering::SeqCst);
    let (handle, _) = start(source.clone(), options());
    settle().await;
    assert_eq!(source.fetch_count(), 1);
    assert_eq!(handle.snapshot().phase, Phase::Loading);

    let mut snapshots = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("controller should stop promptly");
    assert_eq!(snapshots.borrow_and_update().phase, Phase::Loading);
    assert!(snapshots.changed().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn parent_cancellation_stops_controller() {
    let source = FakeSource::serving(&["a", "b"]);
    let cancel = CancellationToken::new();
    let handle = slideshow::spawn(
        source,
        Arc::new(FakeSurface::default()),
        options(),
        cancel.clone(),
    );
    settle().await;
    let mut snapshots = handle.subscribe();
    cancel.cancel();
    assert!(snapshots.changed().await.is_err());
    assert!(handle.send(Command::Next).await.is_err());
}
