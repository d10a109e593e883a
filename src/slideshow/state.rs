use std::collections::BTreeSet;
use std::fmt::Display;

use tracing::{debug, warn};

use crate::store::ImageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Displaying(usize),
    Empty,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Next,
    Previous,
}

/// What a fetch result did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Same images as before.
    Unchanged,
    /// New collection, display continues at the returned index.
    Replaced,
    /// Successful empty result.
    Cleared,
    /// Fetch failed, previous collection kept.
    Retained,
    /// First fetch failed, nothing to keep.
    Failed,
}

impl RefreshOutcome {
    pub fn collection_changed(self) -> bool {
        matches!(self, RefreshOutcome::Replaced | RefreshOutcome::Cleared)
    }
}

#[derive(Debug, Clone)]
pub struct Slideshow {
    images: Vec<ImageRecord>,
    current_index: usize,
    phase: Phase,
    preloaded: BTreeSet<usize>,
    pub is_fullscreen: bool,
    pub show_controls: bool,
    pub swipe_direction: Option<SwipeDirection>,
    pub is_swiping: bool,
}

impl Default for Slideshow {
    fn default() -> Self {
        Self::new()
    }
}

impl Slideshow {
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            current_index: 0,
            phase: Phase::Loading,
            preloaded: BTreeSet::new(),
            is_fullscreen: false,
            show_controls: true,
            swipe_direction: None,
            is_swiping: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&ImageRecord> {
        match self.phase {
            Phase::Displaying(idx) => self.images.get(idx),
            _ => None,
        }
    }

    pub fn preloaded(&self) -> &BTreeSet<usize> {
        &self.preloaded
    }

    /// Apply the result of a collection fetch.
    ///
    /// A failed fetch never clears what is on screen; only a successful empty
    /// result does. When the collection changes the current image keeps its
    /// place if it is still present, otherwise the index is clamped.
    pub fn apply_fetch<E: Display>(
        &mut self,
        result: Result<Vec<ImageRecord>, E>,
    ) -> RefreshOutcome {
        let images = match result {
            Ok(images) => images,
            Err(err) if self.phase == Phase::Loading => {
                warn!(error = %err, "initial image fetch failed");
                self.phase = Phase::Error;
                return RefreshOutcome::Failed;
            }
            Err(err) => {
                warn!(error = %err, "image refresh failed; keeping previous collection");
                return RefreshOutcome::Retained;
            }
        };

        if images.is_empty() {
            let was_empty = self.phase == Phase::Empty;
            self.images.clear();
            self.preloaded.clear();
            self.current_index = 0;
            self.phase = Phase::Empty;
            return if was_empty {
                RefreshOutcome::Unchanged
            } else {
                RefreshOutcome::Cleared
            };
        }

        if images == self.images && matches!(self.phase, Phase::Displaying(_)) {
            return RefreshOutcome::Unchanged;
        }

        let index = self
            .current()
            .and_then(|shown| images.iter().position(|img| img.id == shown.id))
            .unwrap_or_else(|| self.current_index.min(images.len() - 1));
        debug!(count = images.len(), index, "collection replaced");
        self.images = images;
        self.preloaded.clear();
        self.current_index = index;
        self.phase = Phase::Displaying(index);
        RefreshOutcome::Replaced
    }

    fn set_index(&mut self, index: usize) -> Option<usize> {
        if self.images.is_empty() {
            return None;
        }
        self.current_index = index;
        self.phase = Phase::Displaying(index);
        Some(index)
    }

    /// Automatic rotation step.
    pub fn advance(&mut self) -> Option<usize> {
        self.go_to_next()
    }

    pub fn go_to_next(&mut self) -> Option<usize> {
        let len = self.images.len();
        if len == 0 {
            return None;
        }
        self.set_index((self.current_index + 1) % len)
    }

    pub fn go_to_previous(&mut self) -> Option<usize> {
        let len = self.images.len();
        if len == 0 {
            return None;
        }
        self.set_index((self.current_index + len - 1) % len)
    }

    pub fn navigate(&mut self, direction: SwipeDirection) -> Option<usize> {
        match direction {
            SwipeDirection::Next => self.go_to_next(),
            SwipeDirection::Previous => self.go_to_previous(),
        }
    }

    /// Neighbours of the current index, excluding the current one itself.
    pub fn preload_targets(&self) -> Vec<usize> {
        let len = self.images.len();
        if len < 2 {
            return Vec::new();
        }
        let next = (self.current_index + 1) % len;
        let prev = (self.current_index + len - 1) % len;
        if next == prev {
            vec![next]
        } else {
            vec![next, prev]
        }
    }

    /// Record that `index` was preloaded; false when it already was.
    pub fn mark_preloaded(&mut self, index: usize) -> bool {
        index < self.images.len() && self.preloaded.insert(index)
    }

    pub fn image(&self, index: usize) -> Option<&ImageRecord> {
        self.images.get(index)
    }
}
