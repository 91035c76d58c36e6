//! Solid-fill memoization.
//!
//! The fill path paints letterbox/pillarbox bars by blitting a small constant
//! source scaled to the bar rectangle. Re-filling an unchanged rectangle every
//! frame wastes an engine pass, so the last-filled rectangle is remembered and
//! only a change triggers new work.

use crate::geometry::Rect;

/// Remembers the last rectangle the fill path painted.
#[derive(Debug, Default)]
pub struct FillTracker {
    last: Option<Rect>,
}

impl FillTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `rect` differs from the last painted rectangle. Recording
    /// happens on `committed`, not here, so a failed fill retries next frame.
    pub fn needs_fill(&self, rect: Rect) -> bool {
        self.last != Some(rect)
    }

    pub fn committed(&mut self, rect: Rect) {
        self.last = Some(rect);
    }

    /// Forget the memoized rectangle (target reconfigured).
    pub fn reset(&mut self) {
        self.last = None;
    }
}
