use std::sync::Arc;

use frameline_core::{FrameMeasurement, FramePacer};
use parking_lot::Mutex;

/// Shared, cloneable handle to the process-wide pacer.
///
/// Every pacer operation runs under one mutex held for its full (microsecond)
/// duration; timestamps are taken by callers, never while holding the lock.
#[derive(Clone, Default)]
pub struct PacerHandle {
    inner: Arc<Mutex<FramePacer>>,
}

impl PacerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait_target(&self, frame_id: u64) -> u64 {
        self.inner.lock().wait_target(frame_id)
    }

    pub fn begin_frame(&self, frame_id: u64, target: u64, timestamp: u64) {
        self.inner.lock().begin_frame(frame_id, target, timestamp);
    }

    pub fn end_frame(&self, frame_id: u64, timestamp: u64) -> FrameMeasurement {
        self.inner.lock().end_frame(frame_id, timestamp)
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    /// Minimum spacing between frame ends in ns; 0 disables the floor.
    pub fn set_target_frame_time(&self, target_frame_time: u64) {
        self.inner.lock().set_target_frame_time(target_frame_time);
    }
}
