//! Buffers and images backed by `vk_mem` allocations.

use ash::vk;
use vk_mem::Alloc;

use crate::gpu::Result;

use super::device::Core;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MemoryLocation {
    DeviceLocal,
    /// Host-visible, written once from the CPU and read by transfers.
    Upload,
    /// Host-visible, written by transfers and read back on the CPU.
    Readback,
}

impl MemoryLocation {
    fn allocation_info(self) -> vk_mem::AllocationCreateInfo {
        let (usage, flags) = match self {
            MemoryLocation::DeviceLocal => (vk_mem::MemoryUsage::AutoPreferDevice, vk_mem::AllocationCreateFlags::empty()),
            MemoryLocation::Upload => (
                vk_mem::MemoryUsage::AutoPreferHost,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ),
            MemoryLocation::Readback => (
                vk_mem::MemoryUsage::AutoPreferHost,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ),
        };
        vk_mem::AllocationCreateInfo {
            usage,
            flags,
            ..Default::default()
        }
    }

    fn mappable(self) -> bool {
        self != MemoryLocation::DeviceLocal
    }
}

#[derive(Debug)]
pub struct VkBuffer {
    pub(super) raw: vk::Buffer,
    allocation: vk_mem::Allocation,
    pub(super) size: u64,
    mapped: Option<*mut u8>,
}

impl VkBuffer {
    pub(super) fn new(core: &Core, size: u64, usage: vk::BufferUsageFlags, location: MemoryLocation) -> Result<Self> {
        let info = vk::BufferCreateInfo::builder()
            .size(size.max(4))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (raw, mut allocation) = unsafe { core.allocator.create_buffer(&info, &location.allocation_info())? };
        let mapped = if location.mappable() {
            match unsafe { core.allocator.map_memory(&mut allocation) } {
                Ok(ptr) => Some(ptr),
                Err(err) => {
                    unsafe { core.allocator.destroy_buffer(raw, &mut allocation) };
                    return Err(err.into());
                }
            }
        } else {
            None
        };
        Ok(Self {
            raw,
            allocation,
            size,
            mapped,
        })
    }

    /// Copies `data` into a mapped buffer and makes it visible to the device.
    pub(super) fn write(&mut self, core: &Core, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self.mapped.expect("write to an unmapped buffer");
        assert!(offset + data.len() as u64 <= self.size);
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len()) };
        core.allocator
            .flush_allocation(&self.allocation, offset as usize, data.len())?;
        Ok(())
    }

    pub(super) fn read(&self, core: &Core, len: usize) -> Result<Vec<u8>> {
        let ptr = self.mapped.expect("read from an unmapped buffer");
        let len = len.min(self.size as usize);
        core.allocator.invalidate_allocation(&self.allocation, 0, len)?;
        Ok(unsafe { std::slice::from_raw_parts(ptr, len).to_vec() })
    }

    pub(super) fn destroy(mut self, core: &Core) {
        unsafe {
            if self.mapped.is_some() {
                core.allocator.unmap_memory(&mut self.allocation);
            }
            core.allocator.destroy_buffer(self.raw, &mut self.allocation);
        }
    }
}

#[derive(Debug, Default)]
pub struct VkTexture {
    pub(super) image: vk::Image,
    pub(super) view: vk::ImageView,
    /// `None` for images owned by a swapchain.
    allocation: Option<vk_mem::Allocation>,
    pub(super) format: vk::Format,
    pub(super) aspect: vk::ImageAspectFlags,
    pub(super) mip_levels: u32,
}

impl VkTexture {
    pub(super) fn new(
        core: &Core,
        extent: vk::Extent2D,
        format: vk::Format,
        mip_levels: u32,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let (image, mut allocation) = unsafe {
            core.allocator
                .create_image(&info, &MemoryLocation::DeviceLocal.allocation_info())?
        };
        let view = match create_view(core, image, format, aspect, mip_levels) {
            Ok(view) => view,
            Err(err) => {
                unsafe { core.allocator.destroy_image(image, &mut allocation) };
                return Err(err);
            }
        };
        Ok(Self {
            image,
            view,
            allocation: Some(allocation),
            format,
            aspect,
            mip_levels,
        })
    }

    /// Wraps an image whose memory belongs to someone else.
    pub(super) fn borrowed(core: &Core, image: vk::Image, format: vk::Format) -> Result<Self> {
        let aspect = vk::ImageAspectFlags::COLOR;
        Ok(Self {
            image,
            view: create_view(core, image, format, aspect, 1)?,
            allocation: None,
            format,
            aspect,
            mip_levels: 1,
        })
    }

    pub(super) fn range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    pub(super) fn destroy(self, core: &Core) {
        unsafe {
            core.device.destroy_image_view(self.view, None);
            if let Some(mut allocation) = self.allocation {
                core.allocator.destroy_image(self.image, &mut allocation);
            }
        }
    }
}

fn create_view(
    core: &Core,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        });
    Ok(unsafe { core.device.create_image_view(&info, None)? })
}
