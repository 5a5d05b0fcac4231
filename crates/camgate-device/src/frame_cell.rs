//! Single-slot, latest-wins frame exchange between the capture loop and
//! stream clients.

use std::sync::Mutex;

use camgate_types::Frame;

/// Holds the most recent frame from a camera.
///
/// The capture loop overwrites the slot on every read; stream clients take a
/// clone.  Readers use [`FrameCell::try_snapshot`] so a contended lock skips
/// the frame instead of stalling either side.
#[derive(Debug, Default)]
pub struct FrameCell {
    slot: Mutex<Option<Frame>>,
}

impl FrameCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame with `frame`, discarding the previous one.
    pub fn publish(&self, frame: Frame) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(frame);
    }

    /// Clone the current frame without waiting.
    ///
    /// Returns `None` when the slot is empty or the lock is held by the
    /// writer right now.
    pub fn try_snapshot(&self) -> Option<Frame> {
        self.slot.try_lock().ok()?.clone()
    }

    /// Clone the current frame, waiting for the lock if necessary.
    pub fn latest(&self) -> Option<Frame> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Empty the slot.  Used when the camera disconnects so stale frames do
    /// not get served to new stream clients.
    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}
