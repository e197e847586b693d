use std::time::{Duration, Instant};

use frameline_rt::clock::monotonic_now;
use frameline_rt::{FrameTicker, IdleTracker, PacerHandle};

#[test]
fn drifting_ahead_of_the_renderer_forces_recalibration() {
    let ticker = FrameTicker::new(false);
    let pacer = PacerHandle::new();
    let idle = IdleTracker::new();

    // Sixteen unpresented ticks are still within the in-flight window.
    for _ in 0..16 {
        ticker.wait_and_begin(&pacer, &idle);
    }
    assert!(!ticker.recalibration_armed());
    assert_eq!(ticker.frame_counts(), (16, 0));

    // The seventeenth observes the desync: 200 ms drain sleep, counters
    // back to (1, 0), pacer discarded.
    let start = Instant::now();
    ticker.wait_and_begin(&pacer, &idle);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(ticker.frame_counts(), (1, 0));
    assert!(!ticker.recalibration_armed());
    assert_eq!(pacer.wait_target(2), 0);
}

#[test]
fn running_behind_the_renderer_forces_recalibration() {
    let ticker = FrameTicker::new(false);
    let pacer = PacerHandle::new();
    let idle = IdleTracker::new();

    ticker.wait_and_begin(&pacer, &idle);
    assert_eq!(ticker.note_present(), 1);
    assert_eq!(ticker.note_present(), 2);
    assert_eq!(ticker.note_present(), 3);

    // Producer at 2, renderer already at 3.
    let start = Instant::now();
    ticker.wait_and_begin(&pacer, &idle);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(ticker.frame_counts(), (1, 0));
}

#[test]
fn failsafe_caps_a_runaway_wait_target() {
    let ticker = FrameTicker::new(false);
    let pacer = PacerHandle::new();
    let idle = IdleTracker::new();

    // First tick is cold and marks the pipeline busy (frame 1 never ends).
    ticker.wait_and_begin(&pacer, &idle);

    // A completion two seconds ahead anchors the projected timeline far in
    // the future, so the next target is ~2 s away.
    let far = monotonic_now() + 2_000_000_000;
    pacer.begin_frame(200, 0, monotonic_now());
    pacer.end_frame(200, far);

    let start = Instant::now();
    ticker.wait_and_begin(&pacer, &idle);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "slept {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "slept {elapsed:?}");
}

#[test]
fn armed_recalibration_runs_on_the_next_tick() {
    let ticker = FrameTicker::new(false);
    let pacer = PacerHandle::new();
    let idle = IdleTracker::new();

    ticker.wait_and_begin(&pacer, &idle);
    ticker.arm_recalibration();

    let start = Instant::now();
    ticker.wait_and_begin(&pacer, &idle);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(ticker.frame_counts(), (1, 0));
    assert!(!ticker.recalibration_armed());
}

#[test]
fn placebo_mode_never_sleeps() {
    let ticker = FrameTicker::new(true);
    let pacer = PacerHandle::new();
    let idle = IdleTracker::new();

    ticker.wait_and_begin(&pacer, &idle);
    let far = monotonic_now() + 2_000_000_000;
    pacer.begin_frame(200, 0, monotonic_now());
    pacer.end_frame(200, far);

    let start = Instant::now();
    ticker.wait_and_begin(&pacer, &idle);
    assert!(start.elapsed() < Duration::from_millis(40));
}
