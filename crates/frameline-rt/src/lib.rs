//! Blocking-thread runtime around [`frameline_core`].
//!
//! Three threads cooperate here: the producer (simulation) thread ticks
//! through [`FrameTicker::wait_and_begin`], the render thread hands
//! completion fences to a [`CompletionWaiter`], and the waiter's worker
//! observes completions and releases the [`IdleTracker`] gate. The pacer
//! itself lives behind the single process-wide lock of [`PacerHandle`].

pub mod clock;
pub mod config;
pub mod handle;
pub mod idle;
pub mod ticker;
pub mod waiter;

pub use config::PacingOptions;
pub use handle::PacerHandle;
pub use idle::IdleTracker;
pub use ticker::FrameTicker;
pub use waiter::{CompletionFence, CompletionWaiter, PendingFrame};
