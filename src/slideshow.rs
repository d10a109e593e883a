//! Client side of the frame: rotates through the collection served by the
//! image store.
//!
//! [`state`] holds the pure state machine, [`gesture`] classifies touch
//! input, and [`controller`] owns the timers and drives both from a single
//! task.

use std::future::Future;

use anyhow::Result;

use crate::store::ImageRecord;

pub mod controller;
pub mod gesture;
pub mod http;
pub mod state;

pub use controller::{ControllerHandle, ControllerOptions, Snapshot, spawn};
pub use gesture::SwipeTracker;
pub use state::{Phase, RefreshOutcome, Slideshow, SwipeDirection};

/// Where the slideshow gets its collection and image bytes from.
pub trait ImageSource: Send + Sync + 'static {
    fn fetch_images(&self) -> impl Future<Output = Result<Vec<ImageRecord>>> + Send;

    /// Fetch an image ahead of display. Failures are only logged.
    fn preload(&self, image: &ImageRecord) -> impl Future<Output = Result<()>> + Send;
}

/// The screen the slideshow renders on.
pub trait DisplaySurface: Send + Sync + 'static {
    /// Request entering or leaving fullscreen; returns the state the platform
    /// actually ended up in.
    fn set_fullscreen(&self, fullscreen: bool) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowLeft,
    ArrowRight,
    Char(char),
}

/// Input delivered to a running controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Next,
    Previous,
    Key(Key),
    TouchStart { x: f32 },
    TouchMove { x: f32 },
    TouchEnd,
    PointerMoved,
    ToggleFullscreen,
    /// Fullscreen changed outside the controller, e.g. the user pressed Escape.
    FullscreenChanged(bool),
    /// The renderer could not display this image.
    ImageFailed { id: String },
    /// Re-fetch the collection now instead of waiting for the next interval.
    Refresh,
}
