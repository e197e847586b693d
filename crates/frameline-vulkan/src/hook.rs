//! Optional interposer for engines that never call the producer entry
//! point themselves: detours the engine tick function named by
//! `LFX_UE4_HOOK` so the pacer tick runs first.

use std::ffi::c_void;
use std::mem;
use std::sync::OnceLock;

use anyhow::{anyhow, Context};
use retour::RawDetour;

type TickFn = unsafe extern "C" fn(*mut c_void);

static TICK_HOOK: OnceLock<RawDetour> = OnceLock::new();

unsafe extern "C" fn tick_with_pacing(engine: *mut c_void) {
    crate::layer::lfx_WaitAndBeginFrame();
    if let Some(hook) = TICK_HOOK.get() {
        let original: TickFn = mem::transmute(hook.trampoline());
        original(engine);
    }
}

/// Install the detour on the engine tick function at `address`.
///
/// # Safety
/// `address` must be the entry point of a function with the
/// `extern "C" fn(*mut c_void)` ABI in this process, and nothing may be
/// executing it during installation.
pub unsafe fn install(address: usize) -> anyhow::Result<()> {
    let detour = RawDetour::new(address as *const (), tick_with_pacing as *const ())
        .context("preparing engine tick detour")?;
    // Publish the trampoline before enabling: once enabled, calls route
    // through tick_with_pacing immediately.
    TICK_HOOK
        .set(detour)
        .map_err(|_| anyhow!("engine tick hook already installed"))?;
    if let Some(hook) = TICK_HOOK.get() {
        hook.enable().context("enabling engine tick detour")?;
    }
    Ok(())
}
