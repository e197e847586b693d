//! Wait-target computation and per-frame estimate tracking.

use tracing::trace;

use crate::ewma::Ewma;

/// Maximum number of simultaneously tracked frames. Exceeding this implies
/// the producer and the pipeline have desynced, which callers resolve with
/// a recalibration rather than a larger window.
pub const INFLIGHT_FRAMES: usize = 16;

/// Ring slot holding no frame.
const EMPTY_SLOT: u64 = u64::MAX;

/// Pacing perturbation applied on the probing half of the frame cycle.
const UP_FACTOR: f64 = 1.10;
/// Target steady-state ratio of producer pace to pipeline drain rate.
/// Keeping it below one lets the submission queue empty toward depth one.
const DOWN_FACTOR: f64 = 0.985;

/// Frame-time samples outside this range (loading screens, single-digit-FPS
/// stalls) would poison the throughput estimator.
const MIN_FRAME_TIME_SAMPLE: u64 = 1_000_000;
const MAX_FRAME_TIME_SAMPLE: u64 = 50_000_000;

const EWMA_ALPHA_LATENCY: f64 = 0.3;
const EWMA_ALPHA_THROUGHPUT: f64 = 0.3;
const EWMA_ALPHA_CORRECTION: f64 = 0.5;

/// Measurements reported by [`FramePacer::end_frame`]. `None` means the
/// sample could not be taken for this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameMeasurement {
    /// Time from the frame's begin to its observed completion, in ns.
    pub latency: Option<u64>,
    /// Clamped wall time between the completions of consecutive frames,
    /// in ns, averaged over skipped frame ids.
    pub frame_time: Option<u64>,
}

/// Tracks frame time, latency and the desired wake-up time before the next
/// simulation tick. All timestamps are nanoseconds from one consistent
/// monotonic clock; the clock domain itself does not matter.
///
/// Access must be externally synchronized.
#[derive(Clone, Debug)]
pub struct FramePacer {
    latency: Ewma,
    inv_throughput: Ewma,
    proj_correction: Ewma,
    frame_begin_ts: [u64; INFLIGHT_FRAMES],
    frame_begin_ids: [u64; INFLIGHT_FRAMES],
    /// Projected end times, stored as offsets from `projection_base` so the
    /// base can be re-anchored without rewriting the ring.
    frame_end_projected_ts: [i64; INFLIGHT_FRAMES],
    /// Correction actually applied when each slot's projection was made.
    comp_applied: [i64; INFLIGHT_FRAMES],
    projection_base: Option<u64>,
    prev_begin_id: u64,
    prev_end_id: Option<u64>,
    prev_end_ts: u64,
    prev_real_end_ts: Option<u64>,
    prev_prediction_error: i64,
    target_frame_time: u64,
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new()
    }
}

impl FramePacer {
    pub fn new() -> Self {
        Self {
            latency: Ewma::new(EWMA_ALPHA_LATENCY),
            inv_throughput: Ewma::new(EWMA_ALPHA_THROUGHPUT),
            proj_correction: Ewma::full_weight(EWMA_ALPHA_CORRECTION),
            frame_begin_ts: [0; INFLIGHT_FRAMES],
            frame_begin_ids: [EMPTY_SLOT; INFLIGHT_FRAMES],
            frame_end_projected_ts: [0; INFLIGHT_FRAMES],
            comp_applied: [0; INFLIGHT_FRAMES],
            projection_base: None,
            prev_begin_id: EMPTY_SLOT,
            prev_end_id: None,
            prev_end_ts: 0,
            prev_real_end_ts: None,
            prev_prediction_error: 0,
            target_frame_time: 0,
        }
    }

    /// Desired absolute wake-up time for `frame_id`, or 0 when no frame has
    /// ended yet and no pacing data exists.
    ///
    /// The projection for `frame_id` is paced at `1 / DOWN_FACTOR` times the
    /// measured inverse throughput; the returned target additionally applies
    /// the probing perturbation on the up phase and begins early by one
    /// measured latency.
    pub fn wait_target(&mut self, frame_id: u64) -> u64 {
        let Some(prev_end_id) = self.prev_end_id else {
            return 0;
        };
        let phase = frame_id % 2;
        let invtpt = self.inv_throughput.get();
        let mut comp_to_apply: i64 = 0;
        let base = match self.projection_base {
            None => {
                // First projection: anchor at the latest observed end and
                // skip the correction update, there is nothing to compare.
                self.projection_base = Some(self.prev_end_ts);
                self.prev_end_ts
            }
            Some(base) => {
                let projected_end =
                    base as i64 + self.frame_end_projected_ts[slot(prev_end_id)];
                let prediction_error = self.prev_end_ts as i64 - projected_end;
                let prev_comp_applied = self.comp_applied[slot(prev_end_id)];
                self.proj_correction.update(correction_sample(
                    prediction_error,
                    self.prev_prediction_error,
                    prev_comp_applied,
                ));
                // Once the delay is accounted for, stop accumulating it.
                self.prev_prediction_error = prediction_error;
                comp_to_apply = self.proj_correction.get().round() as i64;
                base
            }
        };
        self.comp_applied[slot(frame_id)] = comp_to_apply;
        trace!(
            target: "frameline",
            compensation = self.proj_correction.get(),
            "delay compensation"
        );

        let phase_factor = if phase == 0 { UP_FACTOR } else { 1.0 };
        let frames_ahead = frame_id as i64 - self.prev_begin_id as i64;
        let prev_projection = self.frame_end_projected_ts[slot(self.prev_begin_id)];
        let pacing = ((frames_ahead as f64 + 1.0 / phase_factor - 1.0) * invtpt
            / DOWN_FACTOR
            - self.latency.get())
        .round() as i64;
        let target = base as i64 + prev_projection + comp_to_apply + pacing;

        // The projection is paced without the phase perturbation: the probe
        // moves the begin time, not the pipeline's drain rate.
        let new_projection = prev_projection
            + comp_to_apply
            + (frames_ahead as f64 * invtpt / DOWN_FACTOR).round() as i64;
        self.frame_end_projected_ts[slot(frame_id)] = new_projection;
        trace!(
            target: "frameline",
            frame_id,
            wait_target = target,
            projected_end = base as i64 + new_projection,
            "projection"
        );
        target.max(0) as u64
    }

    /// Record that the producer is starting `frame_id` at `timestamp`.
    ///
    /// `target` must be the value the preceding [`Self::wait_target`] call
    /// returned (zero if that returned zero). Any slippage between the two
    /// (OS wake-up jitter, or a late arrival because the producer itself
    /// was backpressured) is folded into this frame's projection so the
    /// correction estimator does not mistake it for pipeline delay.
    ///
    /// Must be called exactly once per `wait_target`; a second begin for
    /// the same slot corrupts that slot's bookkeeping.
    pub fn begin_frame(&mut self, frame_id: u64, target: u64, timestamp: u64) {
        trace!(target: "frameline", frame_id, timestamp, "frame begin");
        let s = slot(frame_id);
        self.frame_begin_ids[s] = frame_id;
        self.frame_begin_ts[s] = timestamp;
        self.prev_begin_id = frame_id;
        if target != 0 {
            let forced_correction = timestamp as i64 - target as i64;
            self.frame_end_projected_ts[s] += forced_correction;
            self.comp_applied[s] += forced_correction;
            self.prev_prediction_error += forced_correction;
        }
    }

    /// Record that `frame_id` completed at `timestamp` and report its
    /// measurements.
    ///
    /// A no-op returning empty measurements unless the slot for `frame_id`
    /// is occupied by that exact frame: double ends and ends outside the
    /// in-flight window leave every estimate untouched.
    pub fn end_frame(&mut self, frame_id: u64, timestamp: u64) -> FrameMeasurement {
        let s = slot(frame_id);
        if self.frame_begin_ids[s] != frame_id {
            return FrameMeasurement::default();
        }
        let phase = frame_id % 2;
        let frame_start = self.frame_begin_ts[s];
        self.frame_begin_ids[s] = EMPTY_SLOT;

        let mut frame_time = self
            .prev_real_end_ts
            .map(|prev| timestamp.saturating_sub(prev));
        self.prev_real_end_ts = Some(timestamp);

        // FPS floor: treat the frame as ending no earlier than one target
        // frame time after the previous end (the zero default before any
        // end). Also keeps end timestamps monotonic, which the estimators
        // assume.
        let timestamp = timestamp.max(self.prev_end_ts + self.target_frame_time);

        let latency = timestamp.saturating_sub(frame_start);
        if phase == 1 {
            self.latency.update(latency as f64);
        }
        trace!(
            target: "frameline",
            frame_id,
            latency,
            latency_estimate = self.latency.get(),
            "frame end"
        );

        if let Some(prev_end_id) = self.prev_end_id {
            if frame_id > prev_end_id {
                let frames_elapsed = frame_id - prev_end_id;
                let per_frame = ((timestamp - self.prev_end_ts) / frames_elapsed)
                    .clamp(MIN_FRAME_TIME_SAMPLE, MAX_FRAME_TIME_SAMPLE);
                if phase == 0 {
                    self.inv_throughput.update(per_frame as f64);
                }
                trace!(
                    target: "frameline",
                    frame_id,
                    frame_time = per_frame,
                    throughput_estimate = self.inv_throughput.get(),
                    "frame time"
                );
                frame_time = Some(per_frame);
            }
        }

        self.prev_end_id = Some(frame_id);
        self.prev_end_ts = timestamp;
        FrameMeasurement {
            latency: Some(latency),
            frame_time,
        }
    }

    /// Discard all pacing state, preserving only the frame-time floor.
    /// Callers must also reset their external frame counters.
    pub fn reset(&mut self) {
        let target_frame_time = self.target_frame_time;
        *self = Self::new();
        self.target_frame_time = target_frame_time;
    }

    /// Minimum spacing between frame ends in ns; 0 disables the floor.
    pub fn set_target_frame_time(&mut self, target_frame_time: u64) {
        self.target_frame_time = target_frame_time;
    }

    pub fn target_frame_time(&self) -> u64 {
        self.target_frame_time
    }

    /// Smoothed per-frame latency estimate in ns.
    pub fn latency_estimate(&self) -> f64 {
        self.latency.get()
    }

    /// Smoothed inverse throughput (wall time per frame) estimate in ns.
    pub fn inv_throughput_estimate(&self) -> f64 {
        self.inv_throughput.get()
    }

    /// Smoothed prediction-error correction in ns.
    pub fn correction_estimate(&self) -> f64 {
        self.proj_correction.get()
    }
}

#[inline]
fn slot(frame_id: u64) -> usize {
    (frame_id % INFLIGHT_FRAMES as u64) as usize
}

/// Sample fed to the correction estimator for one observed end.
///
/// Only positive prediction errors count: the pacing policy intentionally
/// drives delay downward, and reacting to that intended decrease would make
/// the correction drift. Subtracting the still-positive part of the previous
/// error (net of the correction already applied for it) cancels the
/// counter-reaction, so a one-shot spike cannot leave a sustained bias.
#[inline]
fn correction_sample(
    prediction_error: i64,
    prev_prediction_error: i64,
    prev_comp_applied: i64,
) -> f64 {
    (prediction_error.max(0) - (prev_prediction_error - prev_comp_applied).max(0)) as f64
}

#[cfg(test)]
mod tests {
    use super::correction_sample;

    #[test]
    fn correction_sample_ignores_early_ends() {
        assert_eq!(correction_sample(-3_000_000, 0, 0), 0.0);
    }

    #[test]
    fn correction_sample_passes_late_ends() {
        assert_eq!(correction_sample(2_000_000, 0, 0), 2_000_000.0);
    }

    #[test]
    fn correction_sample_cancels_previous_reaction() {
        // Previous end was 5 ms late and 2 ms of correction was applied for
        // it; only the unhandled 3 ms is subtracted from the new error.
        assert_eq!(
            correction_sample(4_000_000, 5_000_000, 2_000_000),
            1_000_000.0
        );
    }

    #[test]
    fn correction_sample_previous_reaction_clamped_at_zero() {
        // An over-corrected previous frame must not inflate the new sample.
        assert_eq!(
            correction_sample(4_000_000, 1_000_000, 2_000_000),
            4_000_000.0
        );
    }
}
