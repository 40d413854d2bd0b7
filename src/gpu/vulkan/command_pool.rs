use ash::vk;

use crate::gpu::Result;

use super::device::Core;

/// Thin wrapper around a Vulkan command pool on the graphics queue family.
///
/// Handles allocation and recycling of primary command buffers. Everything
/// here runs on the thread that owns the driver.
pub(super) struct CommandPool {
    raw: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
}

impl CommandPool {
    pub(super) fn new(core: &Core) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(core.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let raw = unsafe { core.device.create_command_pool(&info, None)? };
        Ok(Self {
            raw,
            free: Vec::new(),
        })
    }

    /// A reset primary command buffer, recycled when one is available.
    pub(super) fn allocate(&mut self, core: &Core) -> Result<vk::CommandBuffer> {
        if let Some(buf) = self.free.pop() {
            unsafe {
                core.device
                    .reset_command_buffer(buf, vk::CommandBufferResetFlags::empty())?;
            }
            return Ok(buf);
        }
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let bufs = unsafe { core.device.allocate_command_buffers(&info)? };
        Ok(bufs[0])
    }

    /// Returns a command buffer whose execution has completed.
    pub(super) fn recycle(&mut self, buf: vk::CommandBuffer) {
        self.free.push(buf);
    }

    /// Records with `record`, submits and blocks until the GPU is done.
    pub(super) fn oneshot<F>(&mut self, core: &Core, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let buf = self.allocate(core)?;
        let fence = unsafe { core.device.create_fence(&vk::FenceCreateInfo::default(), None)? };
        let result = (|| -> Result<()> {
            unsafe {
                core.device.begin_command_buffer(
                    buf,
                    &vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )?;
                record(buf);
                core.device.end_command_buffer(buf)?;
                let bufs = [buf];
                let submit = vk::SubmitInfo::builder().command_buffers(&bufs);
                core.device.queue_submit(core.queue, &[submit.build()], fence)?;
                core.device.wait_for_fences(&[fence], true, u64::MAX)?;
            }
            Ok(())
        })();
        unsafe { core.device.destroy_fence(fence, None) };
        self.recycle(buf);
        result
    }

    /// Destroys the pool. Command buffers allocated from it become invalid.
    pub(super) fn destroy(&mut self, core: &Core) {
        unsafe { core.device.destroy_command_pool(self.raw, None) };
        self.raw = vk::CommandPool::null();
        self.free.clear();
    }
}
