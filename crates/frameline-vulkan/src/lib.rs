//! Implicit Vulkan layer embedding the frameline pacer.
//!
//! The layer interposes on instance and device creation to capture dispatch
//! tables, injects an empty fence-signalling submit behind every
//! `vkQueuePresentKHR`, and hands the fence to a per-device
//! [`frameline_rt::CompletionWaiter`] whose worker reports frame ends back
//! to the pacer. The producer side is driven through the exported
//! `lfx_WaitAndBeginFrame` entry point (or the optional engine-tick hook).

mod dispatch;
mod fence;
mod layer;
mod loader;
#[cfg(unix)]
mod overlay;

#[cfg(all(feature = "ue4-hook", any(target_arch = "x86", target_arch = "x86_64")))]
mod hook;

pub use layer::{
    lfx_GetDeviceProcAddr, lfx_GetInstanceProcAddr, lfx_SetTargetFrameTime,
    lfx_WaitAndBeginFrame,
};
