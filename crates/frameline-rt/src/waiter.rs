//! Single-consumer worker that turns fence completions into frame ends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::clock;
use crate::handle::PacerHandle;
use crate::idle::IdleTracker;

/// A completion signal for one frame's submitted work. Implementations own
/// the underlying resource and release it on drop.
pub trait CompletionFence: Send + 'static {
    /// Block until the work this fence guards has completed.
    fn wait(&self);
}

/// One queued present awaiting completion.
pub struct PendingFrame<F> {
    pub fence: F,
    pub frame_id: u64,
}

/// Receives each frame's measured latency, e.g. to forward to an overlay.
pub type LatencySink = Box<dyn Fn(u64) + Send + 'static>;

/// Timestamp source for completion times; injectable for tests.
pub type ClockFn = Box<dyn Fn() -> u64 + Send + 'static>;

struct Queue<F> {
    pending: VecDeque<PendingFrame<F>>,
    running: bool,
}

struct Shared<F> {
    queue: Mutex<Queue<F>>,
    ready: Condvar,
}

/// Owned handle to the per-device fence-wait worker. Dropping it stops the
/// worker: already-queued frames are still waited on and released before
/// the join returns; the host is expected to have drained device work.
pub struct CompletionWaiter<F: CompletionFence> {
    shared: Arc<Shared<F>>,
    thread: Option<JoinHandle<()>>,
}

impl<F: CompletionFence> CompletionWaiter<F> {
    pub fn spawn(
        pacer: PacerHandle,
        idle: Arc<IdleTracker>,
        sink: Option<LatencySink>,
    ) -> anyhow::Result<Self> {
        Self::spawn_with_clock(pacer, idle, sink, Box::new(clock::monotonic_now))
    }

    pub fn spawn_with_clock(
        pacer: PacerHandle,
        idle: Arc<IdleTracker>,
        sink: Option<LatencySink>,
        now: ClockFn,
    ) -> anyhow::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                running: true,
            }),
            ready: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("frameline-fence-wait".into())
            .spawn(move || worker(worker_shared, pacer, idle, sink, now))?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Queue a present for completion tracking. Bounded only by memory.
    pub fn push(&self, frame: PendingFrame<F>) {
        let mut queue = self.shared.queue.lock();
        queue.pending.push_back(frame);
        self.shared.ready.notify_all();
    }
}

impl<F: CompletionFence> Drop for CompletionWaiter<F> {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.running = false;
        }
        self.shared.ready.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("fence-wait worker panicked");
            }
        }
    }
}

fn worker<F: CompletionFence>(
    shared: Arc<Shared<F>>,
    pacer: PacerHandle,
    idle: Arc<IdleTracker>,
    sink: Option<LatencySink>,
    now: ClockFn,
) {
    loop {
        let PendingFrame { fence, frame_id } = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(frame) = queue.pending.pop_front() {
                    break frame;
                }
                // The running flag is only consulted once the queue is
                // drained; anything already queued still completes.
                if !queue.running {
                    return;
                }
                shared.ready.wait(&mut queue);
            }
        };
        fence.wait();
        let completed = now();
        drop(fence);
        let measurement = pacer.end_frame(frame_id, completed);
        idle.end(frame_id);
        if let (Some(sink), Some(latency)) = (sink.as_ref(), measurement.latency) {
            sink(latency);
        }
    }
}
