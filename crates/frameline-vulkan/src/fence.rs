use std::ptr;

use ash::vk;
use frameline_rt::CompletionFence;
use tracing::warn;

/// Owned fence signalled by the empty submit injected behind a present.
/// Destroyed when the waiter releases it.
pub struct SignalFence {
    device: vk::Device,
    fence: vk::Fence,
    wait_for_fences: vk::PFN_vkWaitForFences,
    destroy_fence: vk::PFN_vkDestroyFence,
}

// The handles are only ever used from the fence-wait worker once pushed;
// the device outlives the waiter by construction (the waiter is joined in
// DestroyDevice before the device is torn down).
unsafe impl Send for SignalFence {}

impl SignalFence {
    pub fn new(
        device: vk::Device,
        fence: vk::Fence,
        wait_for_fences: vk::PFN_vkWaitForFences,
        destroy_fence: vk::PFN_vkDestroyFence,
    ) -> Self {
        Self {
            device,
            fence,
            wait_for_fences,
            destroy_fence,
        }
    }
}

impl CompletionFence for SignalFence {
    fn wait(&self) {
        let result =
            unsafe { (self.wait_for_fences)(self.device, 1, &self.fence, vk::TRUE, u64::MAX) };
        if result != vk::Result::SUCCESS {
            warn!(?result, "waiting for the present signal fence failed");
        }
    }
}

impl Drop for SignalFence {
    fn drop(&mut self) {
        unsafe { (self.destroy_fence)(self.device, self.fence, ptr::null()) };
    }
}
