//! Intercepted Vulkan entry points and the layer's process-wide runtime.

use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::mem;
use std::ptr;
use std::sync::{Arc, OnceLock};

use ash::vk;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use frameline_rt::waiter::LatencySink;
use frameline_rt::{
    CompletionWaiter, FrameTicker, IdleTracker, PacerHandle, PacingOptions, PendingFrame,
};

use crate::dispatch::{dispatch_key, DeviceDispatch, InstanceDispatch};
use crate::fence::SignalFence;
use crate::loader;
#[cfg(unix)]
use crate::overlay::Overlay;

const LAYER_NAME: &CStr = c"VK_LAYER_FLN_frameline";
const LAYER_DESCRIPTION: &CStr = c"frameline latency reduction layer";

#[derive(Debug, thiserror::Error)]
enum LayerError {
    #[error("loader link info missing from the create-info chain")]
    MissingLinkInfo,
    #[error("next layer does not provide {0}")]
    MissingEntryPoint(&'static str),
}

struct DeviceState {
    device: vk::Device,
    dispatch: DeviceDispatch,
    waiter: Option<CompletionWaiter<SignalFence>>,
}

// Raw handles are keys and call arguments only; all use is externally
// synchronized by the registry lock and the loader's own guarantees.
unsafe impl Send for DeviceState {}

struct LayerRuntime {
    pacer: PacerHandle,
    idle: Arc<IdleTracker>,
    ticker: FrameTicker,
    #[cfg(unix)]
    overlay: Mutex<Option<Overlay>>,
    instances: Mutex<HashMap<usize, InstanceDispatch>>,
    devices: Mutex<HashMap<usize, DeviceState>>,
}

static RUNTIME: OnceLock<LayerRuntime> = OnceLock::new();

/// Layer bootstrap. A cdylib has no life before main, so this runs lazily
/// on the first loader callback, which precedes all interception.
fn runtime() -> &'static LayerRuntime {
    RUNTIME.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .try_init();
        let options = PacingOptions::from_env();
        info!(version = env!("CARGO_PKG_VERSION"), "frameline layer loaded");
        if options.target_frame_time > 0 {
            info!(
                target_frame_time = options.target_frame_time,
                "frame time floor set from LFX_MAX_FPS"
            );
        }
        if options.placebo {
            info!("placebo mode: measuring without pacing");
        }

        #[cfg(all(feature = "ue4-hook", any(target_arch = "x86", target_arch = "x86_64")))]
        if let Some(address) = options.engine_tick_hook {
            match unsafe { crate::hook::install(address) } {
                Ok(()) => info!(address, "engine tick hook installed"),
                Err(err) => error!(?err, "engine tick hook installation failed"),
            }
        }

        let pacer = PacerHandle::new();
        pacer.set_target_frame_time(options.target_frame_time);
        LayerRuntime {
            pacer,
            idle: Arc::new(IdleTracker::new()),
            ticker: FrameTicker::new(options.placebo),
            #[cfg(unix)]
            overlay: Mutex::new(None),
            instances: Mutex::new(HashMap::new()),
            devices: Mutex::new(HashMap::new()),
        }
    })
}

#[cfg(unix)]
fn latency_sink() -> Option<LatencySink> {
    Some(Box::new(|latency| {
        if let Some(overlay) = runtime().overlay.lock().as_ref() {
            overlay.report_latency(latency);
        }
    }))
}

#[cfg(not(unix))]
fn latency_sink() -> Option<LatencySink> {
    None
}

///////////////////////////////////////////////////////////////////////////
// Producer entry points (exact ABI preserved for the guest-runtime shim)

/// Full producer tick: recalibration detection, wait-target computation,
/// idle-gated sleep and frame begin. Call once per simulation frame.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn lfx_WaitAndBeginFrame() {
    let runtime = runtime();
    runtime.ticker.wait_and_begin(&runtime.pacer, &runtime.idle);
}

/// Set the minimum frame time in nanoseconds; values ≤ 0 disable the floor.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn lfx_SetTargetFrameTime(target_frame_time: i64) {
    let runtime = runtime();
    let target = target_frame_time.max(0) as u64;
    info!(target_frame_time = target, "setting frame time floor");
    runtime.pacer.set_target_frame_time(target);
}

///////////////////////////////////////////////////////////////////////////
// Instance and device lifecycle

unsafe extern "system" fn create_instance(
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    match try_create_instance(p_create_info, p_allocator, p_instance) {
        Ok(result) => result,
        Err(err) => {
            error!(%err, "instance creation failed in layer");
            vk::Result::ERROR_INITIALIZATION_FAILED
        }
    }
}

unsafe fn try_create_instance(
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> Result<vk::Result, LayerError> {
    let runtime = runtime();
    let chain = loader::find_instance_link(p_create_info);
    if chain.is_null() {
        return Err(LayerError::MissingLinkInfo);
    }
    let link = (*chain).u.p_layer_info;
    if link.is_null() {
        return Err(LayerError::MissingLinkInfo);
    }
    let gipa = (*link)
        .pfn_next_get_instance_proc_addr
        .ok_or(LayerError::MissingEntryPoint("vkGetInstanceProcAddr"))?;
    // Advance the chain for the next layer before calling down.
    (*chain).u.p_layer_info = (*link).p_next;

    let create: vk::PFN_vkCreateInstance = gipa(vk::Instance::null(), c"vkCreateInstance".as_ptr())
        .map(|f| mem::transmute(f))
        .ok_or(LayerError::MissingEntryPoint("vkCreateInstance"))?;
    let result = create(p_create_info, p_allocator, p_instance);
    if result != vk::Result::SUCCESS {
        return Ok(result);
    }

    let instance = *p_instance;
    let dispatch = InstanceDispatch::load(gipa, instance);
    runtime
        .instances
        .lock()
        .insert(dispatch_key(instance), dispatch);

    #[cfg(unix)]
    {
        let mut overlay = runtime.overlay.lock();
        if overlay.is_none() {
            *overlay = Overlay::attach();
            if overlay.is_some() {
                info!("overlay attached, forwarding latency metrics");
            }
        }
    }

    Ok(vk::Result::SUCCESS)
}

unsafe extern "system" fn destroy_instance(
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks,
) {
    let dispatch = runtime().instances.lock().remove(&dispatch_key(instance));
    if let Some(destroy) = dispatch.and_then(|dispatch| dispatch.destroy_instance) {
        destroy(instance, p_allocator);
    }
}

unsafe extern "system" fn create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    match try_create_device(physical_device, p_create_info, p_allocator, p_device) {
        Ok(result) => result,
        Err(err) => {
            error!(%err, "device creation failed in layer");
            vk::Result::ERROR_INITIALIZATION_FAILED
        }
    }
}

unsafe fn try_create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> Result<vk::Result, LayerError> {
    let runtime = runtime();
    let chain = loader::find_device_link(p_create_info);
    if chain.is_null() {
        return Err(LayerError::MissingLinkInfo);
    }
    let link = (*chain).u.p_layer_info;
    if link.is_null() {
        return Err(LayerError::MissingLinkInfo);
    }
    let gipa = (*link)
        .pfn_next_get_instance_proc_addr
        .ok_or(LayerError::MissingEntryPoint("vkGetInstanceProcAddr"))?;
    let gdpa = (*link)
        .pfn_next_get_device_proc_addr
        .ok_or(LayerError::MissingEntryPoint("vkGetDeviceProcAddr"))?;
    (*chain).u.p_layer_info = (*link).p_next;

    let create: vk::PFN_vkCreateDevice = gipa(vk::Instance::null(), c"vkCreateDevice".as_ptr())
        .map(|f| mem::transmute(f))
        .ok_or(LayerError::MissingEntryPoint("vkCreateDevice"))?;
    let result = create(physical_device, p_create_info, p_allocator, p_device);
    if result != vk::Result::SUCCESS {
        return Ok(result);
    }

    let device = *p_device;
    let dispatch = DeviceDispatch::load(gdpa, device);
    let waiter = match CompletionWaiter::spawn(
        runtime.pacer.clone(),
        Arc::clone(&runtime.idle),
        latency_sink(),
    ) {
        Ok(waiter) => Some(waiter),
        Err(err) => {
            // Degrade to passthrough: presents will simply not be paced.
            error!(?err, "failed to spawn the fence-wait worker");
            None
        }
    };
    runtime.devices.lock().insert(
        dispatch_key(device),
        DeviceState {
            device,
            dispatch,
            waiter,
        },
    );
    Ok(vk::Result::SUCCESS)
}

unsafe extern "system" fn destroy_device(
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks,
) {
    let state = runtime().devices.lock().remove(&dispatch_key(device));
    if let Some(mut state) = state {
        // Join the fence-wait worker before the device goes away.
        state.waiter.take();
        if let Some(destroy) = state.dispatch.destroy_device {
            destroy(device, p_allocator);
        }
    }
}

///////////////////////////////////////////////////////////////////////////
// Frame interception

unsafe extern "system" fn queue_present_khr(
    queue: vk::Queue,
    p_present_info: *const vk::PresentInfoKHR,
) -> vk::Result {
    let runtime = runtime();
    let frame_id = runtime.ticker.note_present();

    let present = {
        let devices = runtime.devices.lock();
        let Some(state) = devices.get(&dispatch_key(queue)) else {
            error!("present on a queue with no registered device");
            return vk::Result::ERROR_DEVICE_LOST;
        };
        inject_signal_fence(state, queue, &*p_present_info, frame_id);
        state.dispatch.queue_present_khr
    };
    // The registry lock is released before calling into the driver.
    match present {
        Some(present) => present(queue, p_present_info),
        None => vk::Result::ERROR_EXTENSION_NOT_PRESENT,
    }
}

/// Submit an empty batch that waits on the app's present semaphores,
/// re-signals them (ordering with the real present preserved) and signals a
/// fresh fence, then queue the fence for completion tracking. Failures are
/// logged and the frame is skipped; the present itself goes ahead.
unsafe fn inject_signal_fence(
    state: &DeviceState,
    queue: vk::Queue,
    present_info: &vk::PresentInfoKHR,
    frame_id: u64,
) {
    let Some(waiter) = state.waiter.as_ref() else {
        return;
    };
    let (Some(create_fence), Some(destroy_fence), Some(queue_submit), Some(wait_for_fences)) = (
        state.dispatch.create_fence,
        state.dispatch.destroy_fence,
        state.dispatch.queue_submit,
        state.dispatch.wait_for_fences,
    ) else {
        return;
    };

    let fence_info = vk::FenceCreateInfo::default();
    let mut fence = vk::Fence::null();
    let result = create_fence(state.device, &fence_info, ptr::null(), &mut fence);
    if result != vk::Result::SUCCESS {
        warn!(?result, frame_id, "fence creation failed, skipping frame");
        return;
    }

    let wait_stages =
        vec![vk::PipelineStageFlags::ALL_COMMANDS; present_info.wait_semaphore_count as usize];
    let submit_info = vk::SubmitInfo {
        wait_semaphore_count: present_info.wait_semaphore_count,
        p_wait_semaphores: present_info.p_wait_semaphores,
        p_wait_dst_stage_mask: wait_stages.as_ptr(),
        signal_semaphore_count: present_info.wait_semaphore_count,
        p_signal_semaphores: present_info.p_wait_semaphores,
        ..Default::default()
    };
    let result = queue_submit(queue, 1, &submit_info, fence);
    if result != vk::Result::SUCCESS {
        warn!(?result, frame_id, "signal submit failed, skipping frame");
        destroy_fence(state.device, fence, ptr::null());
        return;
    }

    waiter.push(PendingFrame {
        fence: SignalFence::new(state.device, fence, wait_for_fences, destroy_fence),
        frame_id,
    });
}

unsafe extern "system" fn acquire_next_image_khr(
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    timeout: u64,
    semaphore: vk::Semaphore,
    fence: vk::Fence,
    p_image_index: *mut u32,
) -> vk::Result {
    let runtime = runtime();
    let acquire = {
        let devices = runtime.devices.lock();
        devices
            .get(&dispatch_key(device))
            .and_then(|state| state.dispatch.acquire_next_image_khr)
    };
    let Some(acquire) = acquire else {
        return vk::Result::ERROR_EXTENSION_NOT_PRESENT;
    };
    let result = acquire(device, swapchain, timeout, semaphore, fence, p_image_index);
    if result.as_raw() < 0 {
        // Likely an Alt-Tab or resize; the app will probably skip this
        // frame's present and desync the counters.
        runtime.ticker.arm_recalibration();
    }
    result
}

unsafe extern "system" fn acquire_next_image2_khr(
    device: vk::Device,
    p_acquire_info: *const vk::AcquireNextImageInfoKHR,
    p_image_index: *mut u32,
) -> vk::Result {
    let runtime = runtime();
    let acquire = {
        let devices = runtime.devices.lock();
        devices
            .get(&dispatch_key(device))
            .and_then(|state| state.dispatch.acquire_next_image2_khr)
    };
    let Some(acquire) = acquire else {
        return vk::Result::ERROR_EXTENSION_NOT_PRESENT;
    };
    let result = acquire(device, p_acquire_info, p_image_index);
    if result.as_raw() < 0 {
        runtime.ticker.arm_recalibration();
    }
    result
}

///////////////////////////////////////////////////////////////////////////
// Enumeration

unsafe fn write_layer_name(target: &mut [c_char], value: &CStr) {
    let bytes = value.to_bytes_with_nul();
    for (dst, src) in target.iter_mut().zip(bytes) {
        *dst = *src as c_char;
    }
}

unsafe extern "system" fn enumerate_instance_layer_properties(
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    if !p_property_count.is_null() {
        *p_property_count = 1;
    }
    if !p_properties.is_null() {
        let properties = &mut *p_properties;
        write_layer_name(&mut properties.layer_name, LAYER_NAME);
        write_layer_name(&mut properties.description, LAYER_DESCRIPTION);
        properties.implementation_version = 1;
        properties.spec_version = vk::make_api_version(0, 1, 2, 136);
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn enumerate_device_layer_properties(
    _physical_device: vk::PhysicalDevice,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    enumerate_instance_layer_properties(p_property_count, p_properties)
}

unsafe extern "system" fn enumerate_instance_extension_properties(
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    _p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if p_layer_name.is_null() || CStr::from_ptr(p_layer_name) != LAYER_NAME {
        return vk::Result::ERROR_LAYER_NOT_PRESENT;
    }
    // The layer exposes no extensions.
    if !p_property_count.is_null() {
        *p_property_count = 0;
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn enumerate_device_extension_properties(
    physical_device: vk::PhysicalDevice,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    // Queries that are not about us pass through.
    if p_layer_name.is_null() || CStr::from_ptr(p_layer_name) != LAYER_NAME {
        if physical_device == vk::PhysicalDevice::null() {
            return vk::Result::SUCCESS;
        }
        let enumerate = {
            let instances = runtime().instances.lock();
            instances
                .get(&dispatch_key(physical_device))
                .and_then(|dispatch| dispatch.enumerate_device_extension_properties)
        };
        return match enumerate {
            Some(enumerate) => {
                enumerate(physical_device, p_layer_name, p_property_count, p_properties)
            }
            None => vk::Result::ERROR_LAYER_NOT_PRESENT,
        };
    }
    if !p_property_count.is_null() {
        *p_property_count = 0;
    }
    vk::Result::SUCCESS
}

///////////////////////////////////////////////////////////////////////////
// GetProcAddr entry points

unsafe fn instance_intercept(name: &CStr) -> vk::PFN_vkVoidFunction {
    let f: *const () = match name.to_bytes() {
        b"vkGetInstanceProcAddr" => lfx_GetInstanceProcAddr as *const (),
        b"vkEnumerateInstanceLayerProperties" => {
            enumerate_instance_layer_properties as *const ()
        }
        b"vkEnumerateInstanceExtensionProperties" => {
            enumerate_instance_extension_properties as *const ()
        }
        b"vkCreateInstance" => create_instance as *const (),
        b"vkDestroyInstance" => destroy_instance as *const (),
        _ => return None,
    };
    Some(mem::transmute(f))
}

unsafe fn device_intercept(name: &CStr) -> vk::PFN_vkVoidFunction {
    let f: *const () = match name.to_bytes() {
        b"vkGetDeviceProcAddr" => lfx_GetDeviceProcAddr as *const (),
        b"vkEnumerateDeviceLayerProperties" => enumerate_device_layer_properties as *const (),
        b"vkEnumerateDeviceExtensionProperties" => {
            enumerate_device_extension_properties as *const ()
        }
        b"vkCreateDevice" => create_device as *const (),
        b"vkDestroyDevice" => destroy_device as *const (),
        b"vkQueuePresentKHR" => queue_present_khr as *const (),
        b"vkAcquireNextImageKHR" => acquire_next_image_khr as *const (),
        b"vkAcquireNextImage2KHR" => acquire_next_image2_khr as *const (),
        _ => return None,
    };
    Some(mem::transmute(f))
}

/// The loader's device-chain entry point into the layer.
///
/// # Safety
/// Called by the Vulkan loader with a live device handle and a
/// NUL-terminated name.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn lfx_GetDeviceProcAddr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = CStr::from_ptr(p_name);
    if let Some(intercepted) = device_intercept(name) {
        return Some(intercepted);
    }
    if device == vk::Device::null() {
        return None;
    }
    let gdpa = {
        let devices = runtime().devices.lock();
        devices
            .get(&dispatch_key(device))
            .map(|state| state.dispatch.get_device_proc_addr)
    };
    match gdpa {
        Some(gdpa) => gdpa(device, p_name),
        None => None,
    }
}

/// The loader's instance-chain entry point into the layer.
///
/// # Safety
/// Called by the Vulkan loader with a NUL-terminated name; `instance` may
/// be null for global commands.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn lfx_GetInstanceProcAddr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let runtime = runtime();
    let name = CStr::from_ptr(p_name);
    if let Some(intercepted) = instance_intercept(name) {
        return Some(intercepted);
    }
    if let Some(intercepted) = device_intercept(name) {
        return Some(intercepted);
    }
    if instance == vk::Instance::null() {
        return None;
    }
    let gipa = {
        let instances = runtime.instances.lock();
        instances
            .get(&dispatch_key(instance))
            .map(|dispatch| dispatch.get_instance_proc_addr)
    };
    match gipa {
        Some(gipa) => gipa(instance, p_name),
        None => None,
    }
}
