//! Closed-loop behavior against a synthetic pipeline.
//!
//! The pipeline model: a frame submitted at `begin` completes at
//! `max(begin + latency, prev_end + period)`: latency-bound when the queue
//! is empty, throughput-bound (`period`) when the producer runs ahead.

use frameline_core::FramePacer;

const LATENCY: u64 = 15_000_000;
const PERIOD: u64 = 10_000_000;
const DOWN_FACTOR: f64 = 0.985;

struct SyntheticPipeline {
    pacer: FramePacer,
    now: u64,
    prev_end: u64,
    next_frame: u64,
    latency: u64,
    period: u64,
}

impl SyntheticPipeline {
    fn new(latency: u64, period: u64) -> Self {
        Self {
            pacer: FramePacer::new(),
            now: 1_000_000_000,
            prev_end: 0,
            next_frame: 0,
            latency,
            period,
        }
    }

    /// Run one frame; `end_slip` delays its completion, `begin_slip` makes
    /// the producer oversleep its wait target.
    fn step_with(&mut self, begin_slip: u64, end_slip: u64) -> (u64, u64) {
        let frame = self.next_frame;
        self.next_frame += 1;
        let target = self.pacer.wait_target(frame);
        let begin = target.max(self.now) + begin_slip;
        self.pacer.begin_frame(frame, target, begin);
        let end = (begin + self.latency).max(self.prev_end + self.period) + end_slip;
        self.pacer.end_frame(frame, end);
        self.prev_end = end;
        self.now = begin;
        (begin, end)
    }

    fn step(&mut self) -> (u64, u64) {
        self.step_with(0, 0)
    }
}

fn mean_begin_spacing(pipeline: &mut SyntheticPipeline, frames: usize) -> f64 {
    let mut begins = Vec::with_capacity(frames);
    for _ in 0..frames {
        begins.push(pipeline.step().0);
    }
    (begins[frames - 1] - begins[0]) as f64 / (frames - 1) as f64
}

#[test]
fn steady_state_converges_to_paced_throughput() {
    let mut pipeline = SyntheticPipeline::new(LATENCY, PERIOD);
    for _ in 0..3000 {
        pipeline.step();
    }

    let spacing = mean_begin_spacing(&mut pipeline, 400);
    let expected = PERIOD as f64 / DOWN_FACTOR;
    assert!(
        (spacing - expected).abs() / expected < 0.02,
        "begin spacing {spacing} vs expected {expected}"
    );

    let latency_est = pipeline.pacer.latency_estimate();
    assert!(
        (latency_est - LATENCY as f64).abs() / (LATENCY as f64) < 0.05,
        "latency estimate {latency_est}"
    );
    let throughput_est = pipeline.pacer.inv_throughput_estimate();
    assert!(
        (throughput_est - PERIOD as f64).abs() / (PERIOD as f64) < 0.05,
        "throughput estimate {throughput_est}"
    );
    assert!(
        pipeline.pacer.correction_estimate().abs() < 1_000_000.0,
        "correction {}",
        pipeline.pacer.correction_estimate()
    );
}

#[test]
fn one_shot_spike_decays_without_sustained_bias() {
    let mut pipeline = SyntheticPipeline::new(LATENCY, PERIOD);
    for _ in 0..2000 {
        pipeline.step();
    }
    assert!(pipeline.pacer.correction_estimate().abs() < 1_000_000.0);

    // One end arrives 5 ms late.
    pipeline.step_with(0, 5_000_000);
    // The very next wait target observes the positive prediction error.
    pipeline.step();
    assert!(
        pipeline.pacer.correction_estimate() > 1_000_000.0,
        "spike not registered: {}",
        pipeline.pacer.correction_estimate()
    );

    for _ in 0..100 {
        pipeline.step();
    }
    assert!(
        pipeline.pacer.correction_estimate().abs() < 1_000_000.0,
        "correction did not decay: {}",
        pipeline.pacer.correction_estimate()
    );

    // Pacing itself recovers.
    let spacing = mean_begin_spacing(&mut pipeline, 200);
    let expected = PERIOD as f64 / DOWN_FACTOR;
    assert!((spacing - expected).abs() / expected < 0.02);
}

#[test]
fn late_wakeup_is_absorbed_into_the_projection() {
    let mut pipeline = SyntheticPipeline::new(LATENCY, PERIOD);
    for _ in 0..2000 {
        pipeline.step();
    }

    // The producer oversleeps its target by 3 ms. The forced correction in
    // begin_frame shifts this frame's projection, so the correction
    // estimator must not see the slippage as a pipeline delay.
    pipeline.step_with(3_000_000, 0);
    for _ in 0..10 {
        pipeline.step();
        assert!(
            pipeline.pacer.correction_estimate().abs() < 1_000_000.0,
            "wake-up slippage leaked into the correction: {}",
            pipeline.pacer.correction_estimate()
        );
    }
}
