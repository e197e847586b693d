//! The `vk_layer.h` subset a layer receives from the Vulkan loader.
//!
//! ash does not ship the loader-negotiation structs, so the link-info chain
//! is declared here; handle and PFN types come from `ash::vk`.

use std::ffi::c_void;

use ash::vk;

pub const LOADER_INSTANCE_CREATE_INFO: vk::StructureType = vk::StructureType::from_raw(47);
pub const LOADER_DEVICE_CREATE_INFO: vk::StructureType = vk::StructureType::from_raw(48);

pub type VkLayerFunction = i32;
pub const VK_LAYER_LINK_INFO: VkLayerFunction = 0;

#[repr(C)]
pub struct VkLayerInstanceLink {
    pub p_next: *mut VkLayerInstanceLink,
    pub pfn_next_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_next_get_physical_device_proc_addr: Option<unsafe extern "system" fn()>,
}

#[allow(non_camel_case_types)]
pub type PFN_vkSetInstanceLoaderData =
    unsafe extern "system" fn(instance: vk::Instance, object: *mut c_void) -> vk::Result;
#[allow(non_camel_case_types)]
pub type PFN_vkSetDeviceLoaderData =
    unsafe extern "system" fn(device: vk::Device, object: *mut c_void) -> vk::Result;

#[repr(C)]
pub union LayerInstanceInfo {
    pub p_layer_info: *mut VkLayerInstanceLink,
    /// Valid when `function` is the loader-data callback; unread here.
    pub pfn_set_instance_loader_data: Option<PFN_vkSetInstanceLoaderData>,
}

#[repr(C)]
pub struct VkLayerInstanceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: VkLayerFunction,
    pub u: LayerInstanceInfo,
}

#[repr(C)]
pub struct VkLayerDeviceLink {
    pub p_next: *mut VkLayerDeviceLink,
    pub pfn_next_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_next_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
}

#[repr(C)]
pub union LayerDeviceInfo {
    pub p_layer_info: *mut VkLayerDeviceLink,
    /// Valid when `function` is the loader-data callback; unread here.
    pub pfn_set_device_loader_data: Option<PFN_vkSetDeviceLoaderData>,
}

#[repr(C)]
pub struct VkLayerDeviceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: VkLayerFunction,
    pub u: LayerDeviceInfo,
}

/// Walk an instance create-info pNext chain to the loader's link info.
///
/// # Safety
/// `p_create_info` must point to a valid `VkInstanceCreateInfo` whose chain
/// is well formed, as guaranteed by the loader.
pub unsafe fn find_instance_link(
    p_create_info: *const vk::InstanceCreateInfo,
) -> *mut VkLayerInstanceCreateInfo {
    let mut chain = (*p_create_info).p_next as *mut VkLayerInstanceCreateInfo;
    while !chain.is_null()
        && !((*chain).s_type == LOADER_INSTANCE_CREATE_INFO
            && (*chain).function == VK_LAYER_LINK_INFO)
    {
        chain = (*chain).p_next as *mut VkLayerInstanceCreateInfo;
    }
    chain
}

/// Walk a device create-info pNext chain to the loader's link info.
///
/// # Safety
/// As for [`find_instance_link`].
pub unsafe fn find_device_link(
    p_create_info: *const vk::DeviceCreateInfo,
) -> *mut VkLayerDeviceCreateInfo {
    let mut chain = (*p_create_info).p_next as *mut VkLayerDeviceCreateInfo;
    while !chain.is_null()
        && !((*chain).s_type == LOADER_DEVICE_CREATE_INFO
            && (*chain).function == VK_LAYER_LINK_INFO)
    {
        chain = (*chain).p_next as *mut VkLayerDeviceCreateInfo;
    }
    chain
}
