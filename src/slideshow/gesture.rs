use super::state::SwipeDirection;

/// Classifies a horizontal touch sequence as a swipe.
///
/// A leftward drag (finger moves toward smaller X) means "next", a rightward
/// drag means "previous". Travel must strictly exceed `min_distance`.
#[derive(Debug, Clone)]
pub struct SwipeTracker {
    min_distance: f32,
    start_x: Option<f32>,
    end_x: Option<f32>,
}

impl SwipeTracker {
    pub fn new(min_distance: f32) -> Self {
        Self {
            min_distance,
            start_x: None,
            end_x: None,
        }
    }

    pub fn start(&mut self, x: f32) {
        self.start_x = Some(x);
        self.end_x = None;
    }

    pub fn update(&mut self, x: f32) {
        if self.start_x.is_some() {
            self.end_x = Some(x);
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.start_x.is_some()
    }

    /// Ends the sequence. A touch without movement is a tap, not a swipe.
    pub fn finish(&mut self) -> Option<SwipeDirection> {
        let start = self.start_x.take()?;
        let end = self.end_x.take()?;
        let travel = start - end;
        if travel > self.min_distance {
            Some(SwipeDirection::Next)
        } else if travel < -self.min_distance {
            Some(SwipeDirection::Previous)
        } else {
            None
        }
    }
}
