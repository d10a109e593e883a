use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::gesture::SwipeTracker;
use super::state::{Phase, Slideshow, SwipeDirection};
use super::{Command, DisplaySurface, ImageSource, Key};
use crate::config::SlideshowOptions;
use crate::store::ImageRecord;

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub rotation_interval: Duration,
    pub refresh_interval: Duration,
    pub swipe_min_distance: f32,
    pub swipe_indicator: Duration,
    pub controls_hide_after: Duration,
    pub error_advance_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from(&SlideshowOptions::default())
    }
}

impl From<&SlideshowOptions> for ControllerOptions {
    fn from(opts: &SlideshowOptions) -> Self {
        Self {
            rotation_interval: opts.rotation_interval,
            refresh_interval: opts.refresh_interval,
            swipe_min_distance: opts.swipe_min_distance,
            swipe_indicator: opts.swipe_indicator,
            controls_hide_after: opts.controls_hide_after,
            error_advance_delay: opts.error_advance_delay,
        }
    }
}

/// What the renderer needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub phase: Phase,
    pub current: Option<ImageRecord>,
    pub current_index: usize,
    pub image_count: usize,
    pub preloaded: Vec<usize>,
    pub is_fullscreen: bool,
    pub show_controls: bool,
    pub swipe_direction: Option<SwipeDirection>,
    pub is_swiping: bool,
}

impl From<&Slideshow> for Snapshot {
    fn from(show: &Slideshow) -> Self {
        Self {
            phase: show.phase(),
            current: show.current().cloned(),
            current_index: show.current_index(),
            image_count: show.images().len(),
            preloaded: show.preloaded().iter().copied().collect(),
            is_fullscreen: show.is_fullscreen,
            show_controls: show.show_controls,
            swipe_direction: show.swipe_direction,
            is_swiping: show.is_swiping,
        }
    }
}

pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("slideshow controller has stopped"))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Tear the controller down and wait for its task to finish. Every timer
    /// goes with it, and fetches still in flight are discarded.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "slideshow controller task failed");
        }
    }
}

/// Start a controller on the current runtime. It stops when `cancel` fires,
/// when [`ControllerHandle::shutdown`] is called, or when every command
/// sender is dropped.
pub fn spawn<S, D>(
    source: Arc<S>,
    surface: Arc<D>,
    options: ControllerOptions,
    cancel: CancellationToken,
) -> ControllerHandle
where
    S: ImageSource,
    D: DisplaySurface,
{
    let cancel = cancel.child_token();
    let show = Slideshow::new();
    let (snap_tx, snap_rx) = watch::channel(Snapshot::from(&show));
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(32);
    let controller = Controller {
        show,
        source,
        surface,
        swipe: SwipeTracker::new(options.swipe_min_distance),
        options,
        snapshots: snap_tx,
        cancel: cancel.clone(),
        rotation: None,
        hide_controls_at: None,
        indicator_until: None,
        recover_at: None,
        fetch_in_flight: false,
    };
    let task = tokio::spawn(controller.run(cmd_rx));
    ControllerHandle {
        commands: cmd_tx,
        snapshots: snap_rx,
        cancel,
        task,
    }
}

type FetchResult = Result<Vec<ImageRecord>>;

struct Controller<S, D> {
    show: Slideshow,
    source: Arc<S>,
    surface: Arc<D>,
    swipe: SwipeTracker,
    options: ControllerOptions,
    snapshots: watch::Sender<Snapshot>,
    cancel: CancellationToken,
    rotation: Option<Interval>,
    hide_controls_at: Option<Instant>,
    indicator_until: Option<Instant>,
    recover_at: Option<Instant>,
    fetch_in_flight: bool,
}

impl<S: ImageSource, D: DisplaySurface> Controller<S, D> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (fetch_tx, mut fetch_rx) = mpsc::channel::<FetchResult>(4);
        // First tick is immediate: fetch on start.
        let mut refresh = interval(self.options.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.hide_controls_at = Some(Instant::now() + self.options.controls_hide_after);
        info!(
            rotation = %humantime::format_duration(self.options.rotation_interval),
            refresh = %humantime::format_duration(self.options.refresh_interval),
            "slideshow controller started"
        );

        loop {
            select! {
                biased;
                _ = self.cancel.cancelled() => break,

                Some(result) = fetch_rx.recv() => self.on_fetched(result),

                maybe_cmd = commands.recv() => match maybe_cmd {
                    Some(Command::Refresh) => self.start_fetch(&fetch_tx),
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        debug!("all controller handles dropped");
                        break;
                    }
                },

                _ = refresh.tick() => self.start_fetch(&fetch_tx),

                _ = tick(&mut self.rotation) => {
                    if let Some(index) = self.show.advance() {
                        debug!(index, "auto-advance");
                        self.on_index_changed();
                    }
                }

                _ = wait_until(self.recover_at) => {
                    self.recover_at = None;
                    if let Some(index) = self.show.go_to_next() {
                        info!(index, "skipping image that failed to render");
                        self.on_index_changed();
                    }
                }

                _ = wait_until(self.hide_controls_at) => {
                    self.hide_controls_at = None;
                    self.show.show_controls = false;
                }

                _ = wait_until(self.indicator_until) => {
                    self.indicator_until = None;
                    self.show.swipe_direction = None;
                }
            }
            self.publish();
        }
        info!("slideshow controller stopped");
    }

    fn publish(&self) {
        let next = Snapshot::from(&self.show);
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn start_fetch(&mut self, tx: &mpsc::Sender<FetchResult>) {
        if self.fetch_in_flight {
            debug!("image fetch already in flight; skipping refresh");
            return;
        }
        self.fetch_in_flight = true;
        let source = self.source.clone();
        let tx = tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            select! {
                _ = cancel.cancelled() => debug!("discarding in-flight image fetch"),
                result = source.fetch_images() => {
                    // Receiver is gone once the controller is torn down.
                    let _ = tx.send(result).await;
                }
            }
        });
    }

    fn on_fetched(&mut self, result: FetchResult) {
        self.fetch_in_flight = false;
        let outcome = self.show.apply_fetch(result);
        debug!(?outcome, phase = ?self.show.phase(), "image fetch applied");
        if !outcome.collection_changed() {
            return;
        }
        self.recover_at = None;
        self.rotation = match self.show.phase() {
            Phase::Displaying(_) => Some(rotation_timer(self.options.rotation_interval)),
            _ => None,
        };
        self.preload_neighbours();
    }

    fn on_command(&mut self, cmd: Command) {
        debug!(?cmd, "controller command");
        match cmd {
            Command::Next | Command::Key(Key::ArrowRight) => self.navigate(SwipeDirection::Next),
            Command::Previous | Command::Key(Key::ArrowLeft) => {
                self.navigate(SwipeDirection::Previous)
            }
            Command::ToggleFullscreen | Command::Key(Key::Char('f' | 'F')) => {
                self.toggle_fullscreen()
            }
            Command::Key(Key::Char(_)) => {}
            Command::FullscreenChanged(fullscreen) => self.show.is_fullscreen = fullscreen,
            Command::TouchStart { x } => {
                self.swipe.start(x);
                self.show.is_swiping = self.swipe.is_tracking();
            }
            Command::TouchMove { x } => self.swipe.update(x),
            Command::TouchEnd => {
                let swiped = self.swipe.finish();
                self.show.is_swiping = self.swipe.is_tracking();
                if let Some(direction) = swiped {
                    self.show.swipe_direction = Some(direction);
                    self.indicator_until = Some(Instant::now() + self.options.swipe_indicator);
                    self.navigate(direction);
                }
            }
            Command::PointerMoved => {
                self.show.show_controls = true;
                self.hide_controls_at = Some(Instant::now() + self.options.controls_hide_after);
            }
            Command::ImageFailed { id } => self.on_image_failed(&id),
            Command::Refresh => {}
        }
    }

    /// Manual navigation leaves the rotation timer alone.
    fn navigate(&mut self, direction: SwipeDirection) {
        if self.show.navigate(direction).is_some() {
            self.on_index_changed();
        }
    }

    fn on_index_changed(&mut self) {
        self.recover_at = None;
        self.preload_neighbours();
    }

    fn preload_neighbours(&mut self) {
        for index in self.show.preload_targets() {
            if !self.show.mark_preloaded(index) {
                continue;
            }
            let Some(image) = self.show.image(index).cloned() else {
                continue;
            };
            let source = self.source.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                select! {
                    _ = cancel.cancelled() => {}
                    result = source.preload(&image) => {
                        if let Err(err) = result {
                            debug!(id = %image.id, error = %err, "preload failed");
                        }
                    }
                }
            });
        }
    }

    fn toggle_fullscreen(&mut self) {
        let wanted = !self.show.is_fullscreen;
        match self.surface.set_fullscreen(wanted) {
            Ok(actual) => self.show.is_fullscreen = actual,
            Err(err) => warn!(wanted, error = %err, "fullscreen request failed"),
        }
    }

    fn on_image_failed(&mut self, id: &str) {
        let is_current = self.show.current().is_some_and(|img| img.id == id);
        if !is_current {
            debug!(id, "render failure for an image no longer shown");
            return;
        }
        if self.recover_at.is_none() {
            warn!(id, "image failed to render; skipping shortly");
            self.recover_at = Some(Instant::now() + self.options.error_advance_delay);
        }
    }
}

fn rotation_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
