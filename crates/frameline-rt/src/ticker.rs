//! Producer-side frame accounting: counters, desync detection, failsafe
//! and the full per-tick wait sequence.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::clock::monotonic_now;
use crate::handle::PacerHandle;
use crate::idle::IdleTracker;

/// Producer-ahead-of-render distance beyond which the pipeline is assumed
/// to have desynced.
pub const MAX_FRAME_DRIFT: u64 = 16;

/// Upper bound on any single pacing sleep. Keeps the application
/// interactive even if the estimators misbehave completely.
const FAILSAFE_SLEEP_NS: u64 = 50_000_000;

/// Consecutive failsafe trips that arm a recalibration.
const FAILSAFE_STRIKE_LIMIT: u32 = 5;

/// Drain time before resetting state, long enough to flush any in-flight
/// render or RHI work.
const RECALIBRATION_SLEEP: Duration = Duration::from_millis(200);

/// Tracks the producer and render frame counters and drives one simulation
/// tick through the pacer: recalibration detection, wait-target clamping,
/// the idle-gated sleep and the frame begin.
pub struct FrameTicker {
    counter: AtomicU64,
    counter_render: AtomicU64,
    needs_reset: AtomicBool,
    failsafe_strikes: AtomicU32,
    placebo: bool,
}

impl FrameTicker {
    /// `placebo` disables sleeping while keeping all measurements, for A/B
    /// latency comparisons.
    pub fn new(placebo: bool) -> Self {
        Self {
            counter: AtomicU64::new(0),
            counter_render: AtomicU64::new(0),
            needs_reset: AtomicBool::new(false),
            failsafe_strikes: AtomicU32::new(0),
            placebo,
        }
    }

    /// The full producer tick. Call once per simulation frame, before user
    /// input is sampled.
    pub fn wait_and_begin(&self, pacer: &PacerHandle, idle: &IdleTracker) {
        let mut frame = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        let render = self.counter_render.load(Ordering::Acquire);
        if frame <= render {
            // Presentation happened without a tick; typical during
            // initialization when graphics redraw outside the platform loop.
            self.arm_recalibration();
        } else if frame - render > MAX_FRAME_DRIFT {
            self.arm_recalibration();
        }

        if self.needs_reset.load(Ordering::Acquire) {
            frame = self.recalibrate(pacer);
        }

        let now = monotonic_now();
        let target = pacer.wait_target(frame);
        let wakeup = if !self.placebo && target > now {
            let mut wake = if target > now + FAILSAFE_SLEEP_NS {
                self.note_failsafe_trip();
                now + FAILSAFE_SLEEP_NS
            } else {
                self.failsafe_strikes.store(0, Ordering::Release);
                target
            };
            if !idle.sleep_and_begin(frame, Duration::from_nanos(wake - now)) {
                // Pipeline went idle before the target; begin right away.
                wake = monotonic_now();
            }
            wake
        } else {
            idle.sleep_and_begin(frame, Duration::ZERO);
            now
        };
        // The wake time doubles as the begin timestamp so OS wake-up jitter
        // is absorbed by the pacer's forced correction.
        pacer.begin_frame(frame, target, wakeup);
    }

    /// Render-side accounting for one present. Returns the frame id the
    /// present belongs to.
    pub fn note_present(&self) -> u64 {
        let render = self.counter_render.fetch_add(1, Ordering::AcqRel) + 1;
        let produced = self.counter.load(Ordering::Acquire);
        if produced > render + MAX_FRAME_DRIFT {
            self.arm_recalibration();
        }
        render
    }

    /// Request a full reset on the next tick. Also used by the host adapter
    /// when an image acquire fails and the frame will likely never present.
    pub fn arm_recalibration(&self) {
        self.needs_reset.store(true, Ordering::Release);
    }

    pub fn recalibration_armed(&self) -> bool {
        self.needs_reset.load(Ordering::Acquire)
    }

    /// Current (producer, render) counter values.
    pub fn frame_counts(&self) -> (u64, u64) {
        (
            self.counter.load(Ordering::Acquire),
            self.counter_render.load(Ordering::Acquire),
        )
    }

    /// Sleep out any in-flight work, restart the counters and discard the
    /// pacer state. The tick has already incremented the producer counter,
    /// so it restarts from 1 with the render side at 0.
    fn recalibrate(&self, pacer: &PacerHandle) -> u64 {
        warn!("frame pipeline desynced, recalibrating");
        thread::sleep(RECALIBRATION_SLEEP);
        self.counter.store(1, Ordering::Release);
        self.counter_render.store(0, Ordering::Release);
        self.failsafe_strikes.store(0, Ordering::Release);
        self.needs_reset.store(false, Ordering::Release);
        pacer.reset();
        1
    }

    fn note_failsafe_trip(&self) {
        let strikes = self.failsafe_strikes.fetch_add(1, Ordering::AcqRel) + 1;
        if strikes >= FAILSAFE_STRIKE_LIMIT {
            self.arm_recalibration();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FrameTicker;

    #[test]
    fn five_consecutive_failsafe_trips_arm_recalibration() {
        let ticker = FrameTicker::new(false);
        for _ in 0..4 {
            ticker.note_failsafe_trip();
        }
        assert!(!ticker.recalibration_armed());
        ticker.note_failsafe_trip();
        assert!(ticker.recalibration_armed());
    }

    #[test]
    fn an_on_time_wakeup_breaks_the_streak() {
        let ticker = FrameTicker::new(false);
        for _ in 0..4 {
            ticker.note_failsafe_trip();
        }
        ticker.failsafe_strikes.store(0, std::sync::atomic::Ordering::Release);
        for _ in 0..4 {
            ticker.note_failsafe_trip();
        }
        assert!(!ticker.recalibration_armed());
    }
}
