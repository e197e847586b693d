//! Per-instance and per-device dispatch tables.

use std::ffi::CStr;
use std::mem;

use ash::vk::{self, Handle};

/// The loader writes a dispatch-table pointer at the start of every
/// dispatchable handle; handles sharing it (a queue and its device) share
/// one table, so it doubles as the registry key.
///
/// # Safety
/// `handle` must be a live dispatchable Vulkan handle.
pub unsafe fn dispatch_key<T: Handle>(handle: T) -> usize {
    *(handle.as_raw() as usize as *const usize)
}

unsafe fn load<T>(
    gipa: vk::PFN_vkGetInstanceProcAddr,
    instance: vk::Instance,
    name: &CStr,
) -> Option<T> {
    gipa(instance, name.as_ptr()).map(|f| mem::transmute_copy(&f))
}

unsafe fn load_device<T>(
    gdpa: vk::PFN_vkGetDeviceProcAddr,
    device: vk::Device,
    name: &CStr,
) -> Option<T> {
    gdpa(device, name.as_ptr()).map(|f| mem::transmute_copy(&f))
}

/// Next-layer functions the layer needs per instance.
#[derive(Clone, Copy)]
pub struct InstanceDispatch {
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub destroy_instance: Option<vk::PFN_vkDestroyInstance>,
    pub enumerate_device_extension_properties:
        Option<vk::PFN_vkEnumerateDeviceExtensionProperties>,
}

impl InstanceDispatch {
    /// # Safety
    /// `gipa` must be the next layer's GetInstanceProcAddr and `instance`
    /// the handle it was created for.
    pub unsafe fn load(gipa: vk::PFN_vkGetInstanceProcAddr, instance: vk::Instance) -> Self {
        Self {
            get_instance_proc_addr: load(gipa, instance, c"vkGetInstanceProcAddr")
                .unwrap_or(gipa),
            destroy_instance: load(gipa, instance, c"vkDestroyInstance"),
            enumerate_device_extension_properties: load(
                gipa,
                instance,
                c"vkEnumerateDeviceExtensionProperties",
            ),
        }
    }
}

/// Next-layer functions the layer needs per device.
#[derive(Clone, Copy)]
pub struct DeviceDispatch {
    pub get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    pub destroy_device: Option<vk::PFN_vkDestroyDevice>,
    pub queue_present_khr: Option<vk::PFN_vkQueuePresentKHR>,
    pub acquire_next_image_khr: Option<vk::PFN_vkAcquireNextImageKHR>,
    pub acquire_next_image2_khr: Option<vk::PFN_vkAcquireNextImage2KHR>,
    pub create_fence: Option<vk::PFN_vkCreateFence>,
    pub destroy_fence: Option<vk::PFN_vkDestroyFence>,
    pub queue_submit: Option<vk::PFN_vkQueueSubmit>,
    pub wait_for_fences: Option<vk::PFN_vkWaitForFences>,
}

impl DeviceDispatch {
    /// # Safety
    /// `gdpa` must be the next layer's GetDeviceProcAddr and `device` the
    /// handle it was created for.
    pub unsafe fn load(gdpa: vk::PFN_vkGetDeviceProcAddr, device: vk::Device) -> Self {
        Self {
            get_device_proc_addr: load_device(gdpa, device, c"vkGetDeviceProcAddr")
                .unwrap_or(gdpa),
            destroy_device: load_device(gdpa, device, c"vkDestroyDevice"),
            queue_present_khr: load_device(gdpa, device, c"vkQueuePresentKHR"),
            acquire_next_image_khr: load_device(gdpa, device, c"vkAcquireNextImageKHR"),
            acquire_next_image2_khr: load_device(gdpa, device, c"vkAcquireNextImage2KHR"),
            create_fence: load_device(gdpa, device, c"vkCreateFence"),
            destroy_fence: load_device(gdpa, device, c"vkDestroyFence"),
            queue_submit: load_device(gdpa, device, c"vkQueueSubmit"),
            wait_for_fences: load_device(gdpa, device, c"vkWaitForFences"),
        }
    }
}
