//! Optional latency forwarding to a resident overlay (MangoHud).

use std::ffi::c_char;
use std::mem;

use libloading::os::unix::{Library, Symbol};

type SetMetricsFn = unsafe extern "C" fn(*const *const c_char, *const f32, usize);

pub struct Overlay {
    set_metrics: Symbol<SetMetricsFn>,
}

impl Overlay {
    /// Resolve `overlay_SetMetrics` from an already-resident MangoHud.
    /// RTLD_NOLOAD keeps this a lookup: the overlay is never pulled in by
    /// us, only found if the user enabled it.
    pub fn attach() -> Option<Self> {
        let library = unsafe {
            Library::open(
                Some("libMangoHud.so"),
                libc::RTLD_NOW | libc::RTLD_NOLOAD,
            )
        }
        .ok()?;
        let set_metrics = unsafe { library.get(b"overlay_SetMetrics\0") }.ok()?;
        // The handle is a refcount bump on a library that stays resident
        // for the process lifetime anyway.
        mem::forget(library);
        Some(Self { set_metrics })
    }

    pub fn report_latency(&self, latency_ns: u64) {
        let names = [b"Latency\0".as_ptr() as *const c_char];
        let values = [latency_ns as f32 / 1_000_000.0];
        unsafe { (self.set_metrics)(names.as_ptr(), values.as_ptr(), 1) };
    }
}
