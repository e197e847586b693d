use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use frameline_rt::{CompletionFence, CompletionWaiter, IdleTracker, PacerHandle, PendingFrame};
use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn fire(&self) {
        *self.fired.lock() = true;
        self.cond.notify_all();
    }
}

struct TestFence {
    signal: Arc<Signal>,
}

impl CompletionFence for TestFence {
    fn wait(&self) {
        let mut fired = self.signal.fired.lock();
        while !*fired {
            self.signal.cond.wait(&mut fired);
        }
    }
}

#[test]
fn completion_reaches_pacer_idle_gate_and_sink() {
    let pacer = PacerHandle::new();
    let idle = Arc::new(IdleTracker::new());
    let latencies: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_latencies = Arc::clone(&latencies);
    let now = Arc::new(AtomicU64::new(5_000_000));
    let clock = Arc::clone(&now);

    let waiter = CompletionWaiter::spawn_with_clock(
        pacer.clone(),
        Arc::clone(&idle),
        Some(Box::new(move |latency| sink_latencies.lock().push(latency))),
        Box::new(move || clock.load(Ordering::SeqCst)),
    )
    .unwrap();

    assert!(!idle.sleep_and_begin(7, Duration::ZERO));
    pacer.begin_frame(7, 0, 1_000_000);
    let signal = Arc::new(Signal::default());
    waiter.push(PendingFrame {
        fence: TestFence {
            signal: Arc::clone(&signal),
        },
        frame_id: 7,
    });

    signal.fire();
    // The idle gate only opens once the worker has ended frame 7.
    assert!(!idle.sleep_and_begin(8, Duration::from_millis(500)));
    // The sink is fed right after the gate opens; give the worker a moment.
    for _ in 0..200 {
        if !latencies.lock().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(latencies.lock().as_slice(), &[4_000_000]);
}

#[test]
fn drop_drains_already_queued_frames() {
    let pacer = PacerHandle::new();
    let idle = Arc::new(IdleTracker::new());
    let waiter =
        CompletionWaiter::spawn(pacer.clone(), Arc::clone(&idle), None).unwrap();

    assert!(!idle.sleep_and_begin(3, Duration::ZERO));
    pacer.begin_frame(3, 0, 0);
    let signal = Arc::new(Signal::default());
    signal.fire();
    waiter.push(PendingFrame {
        fence: TestFence { signal },
        frame_id: 3,
    });
    drop(waiter);

    // The queued frame was processed before the worker exited.
    assert!(!idle.sleep_and_begin(4, Duration::ZERO));
}
