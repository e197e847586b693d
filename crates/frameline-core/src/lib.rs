//! Core estimation and wait-target logic for the frameline pacer.
//!
//! [`FramePacer`] consumes begin/end timestamps from a single consistent
//! monotonic clock and produces the absolute time at which the simulation
//! thread should start its next frame. It owns no clock and performs no
//! blocking; access must be externally synchronized.

pub mod ewma;
pub mod pacer;

pub use ewma::Ewma;
pub use pacer::{FrameMeasurement, FramePacer, INFLIGHT_FRAMES};
