//! Producer-side gate limiting the pipeline to one in-flight frame.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Sentinel meaning "no frame yet"; both counters agreeing means idle.
const NONE: u64 = u64::MAX;

struct State {
    last_began_frame: u64,
    last_finished_frame: u64,
}

/// Blocks the producer until the previously begun frame has finished, or a
/// timeout elapses. Finishes arrive from the fence-wait worker.
pub struct IdleTracker {
    state: Mutex<State>,
    idle: Condvar,
}

impl Default for IdleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                last_began_frame: NONE,
                last_finished_frame: NONE,
            }),
            idle: Condvar::new(),
        }
    }

    /// Wait up to `max_wait` for the pipeline to go idle, then mark `frame`
    /// as begun. Returns `true` if the full wait was performed (timeout),
    /// `false` if the pipeline was already idle or went idle early.
    pub fn sleep_and_begin(&self, frame: u64, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        let mut state = self.state.lock();
        let timed_out = self
            .idle
            .wait_while_until(
                &mut state,
                |s| s.last_began_frame != s.last_finished_frame,
                deadline,
            )
            .timed_out()
            && state.last_began_frame != state.last_finished_frame;
        state.last_began_frame = frame;
        timed_out
    }

    /// Record `frame` as finished and wake the producer if the pipeline is
    /// now idle. Broadcast is intentional: only the producer waits today,
    /// but the gate stays correct if more waiters ever appear.
    pub fn end(&self, frame: u64) {
        let mut state = self.state.lock();
        state.last_finished_frame = frame;
        if state.last_began_frame == state.last_finished_frame {
            self.idle.notify_all();
        }
    }
}
