//! The backbuffer: a window swapchain, or a single offscreen image when the
//! device was created without a window.

use ash::extensions::khr;
use ash::vk;

use crate::gpu::{GPUError, Result};

use super::command_pool::CommandPool;
use super::device::Core;
use super::memory::VkTexture;
use super::{create_depth_stencil, image_barrier, Scope};

pub(super) const BACKBUFFER_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;
const OFFSCREEN_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Scope of a presentable image nobody has touched yet. The stage mask
/// chains onto the acquire semaphore wait.
const UNUSED: Scope = (
    vk::ImageLayout::UNDEFINED,
    vk::PipelineStageFlags2::ALL_COMMANDS,
    vk::AccessFlags2::NONE,
);
pub(super) const PRESENT: Scope = (
    vk::ImageLayout::PRESENT_SRC_KHR,
    vk::PipelineStageFlags2::ALL_COMMANDS,
    vk::AccessFlags2::NONE,
);

struct Swapchain {
    loader: khr::Swapchain,
    surface: vk::SurfaceKHR,
    raw: vk::SwapchainKHR,
}

pub(super) struct Display {
    swapchain: Option<Swapchain>,
    images: Vec<VkTexture>,
    /// Last recorded scope of every image.
    scopes: Vec<Scope>,
    pub(super) depth: VkTexture,
    pub(super) extent: vk::Extent2D,
    pub(super) format: vk::Format,
    current: Option<u32>,
    vsync: bool,
    stale: bool,
}

fn present_mode(core: &Core, surface: vk::SurfaceKHR, vsync: bool) -> Result<vk::PresentModeKHR> {
    if vsync {
        return Ok(vk::PresentModeKHR::FIFO);
    }
    let modes = unsafe {
        core.surface_loader
            .get_physical_device_surface_present_modes(core.pdevice, surface)?
    };
    Ok([vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO))
}

fn surface_format(core: &Core, surface: vk::SurfaceKHR) -> Result<vk::SurfaceFormatKHR> {
    let formats = unsafe {
        core.surface_loader
            .get_physical_device_surface_formats(core.pdevice, surface)?
    };
    formats
        .iter()
        .find(|f| f.format == BACKBUFFER_FORMAT)
        .copied()
        .ok_or(GPUError::NoSuitableDevice)
}

impl Swapchain {
    fn new(
        core: &Core,
        loader: khr::Swapchain,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
        old: vk::SwapchainKHR,
    ) -> Result<(Self, vk::Extent2D)> {
        let caps = unsafe {
            core.surface_loader
                .get_physical_device_surface_capabilities(core.pdevice, surface)?
        };
        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };
        let extent = vk::Extent2D {
            width: extent.width.max(1),
            height: extent.height.max(1),
        };
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }
        let format = surface_format(core, surface)?;
        let composite_alpha = if caps
            .supported_composite_alpha
            .contains(vk::CompositeAlphaFlagsKHR::OPAQUE)
        {
            vk::CompositeAlphaFlagsKHR::OPAQUE
        } else {
            vk::CompositeAlphaFlagsKHR::INHERIT
        };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode(core, surface, vsync)?)
            .clipped(true)
            .old_swapchain(old);
        let raw = unsafe { loader.create_swapchain(&info, None)? };
        log::debug!(
            "swapchain {}x{} with {} images (vsync {})",
            extent.width,
            extent.height,
            image_count,
            vsync
        );
        Ok((Self { loader, surface, raw }, extent))
    }

    fn images(&self, core: &Core) -> Result<Vec<VkTexture>> {
        let raw = unsafe { self.loader.get_swapchain_images(self.raw)? };
        raw.into_iter()
            .map(|image| VkTexture::borrowed(core, image, BACKBUFFER_FORMAT))
            .collect()
    }
}

fn offscreen_image(core: &Core, extent: vk::Extent2D) -> Result<VkTexture> {
    VkTexture::new(
        core,
        extent,
        OFFSCREEN_FORMAT,
        1,
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        vk::ImageAspectFlags::COLOR,
    )
}

impl Display {
    pub(super) fn new(
        core: &Core,
        pool: &mut CommandPool,
        surface: Option<vk::SurfaceKHR>,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<Self> {
        let requested = vk::Extent2D {
            width: width.max(1),
            height: height.max(1),
        };
        let (swapchain, images, extent, format, current) = match surface {
            Some(surface) => {
                let loader = khr::Swapchain::new(&core.instance, &core.device);
                let (chain, extent) = Swapchain::new(
                    core,
                    loader,
                    surface,
                    requested.width,
                    requested.height,
                    vsync,
                    vk::SwapchainKHR::null(),
                )?;
                let images = chain.images(core)?;
                (Some(chain), images, extent, BACKBUFFER_FORMAT, None)
            }
            None => (
                None,
                vec![offscreen_image(core, requested)?],
                requested,
                OFFSCREEN_FORMAT,
                Some(0),
            ),
        };
        let depth = create_depth_stencil(core, pool, extent)?;
        Ok(Self {
            scopes: vec![UNUSED; images.len()],
            swapchain,
            images,
            depth,
            extent,
            format,
            current,
            vsync,
            stale: false,
        })
    }

    /// Takes the next presentable image if none is held. Returns whether
    /// `signal` will be signalled by the acquire.
    pub(super) fn acquire(&mut self, core: &Core, pool: &mut CommandPool, signal: vk::Semaphore) -> Result<bool> {
        if self.current.is_some() {
            return Ok(false);
        }
        for _ in 0..2 {
            let Some(chain) = &self.swapchain else {
                self.current = Some(0);
                return Ok(false);
            };
            match unsafe {
                chain
                    .loader
                    .acquire_next_image(chain.raw, u64::MAX, signal, vk::Fence::null())
            } {
                Ok((index, suboptimal)) => {
                    self.stale |= suboptimal;
                    self.current = Some(index);
                    return Ok(true);
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    log::debug!("swapchain out of date on acquire");
                    self.rebuild(core, pool, self.extent.width, self.extent.height)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(GPUError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
    }

    /// The image the current frame renders into.
    pub(super) fn image(&self) -> &VkTexture {
        let index = self.current.expect("backbuffer used before an image was acquired");
        &self.images[index as usize]
    }

    /// Records a barrier moving the current image into `to`.
    pub(super) fn transition(&mut self, core: &Core, cmd: vk::CommandBuffer, to: Scope) {
        let index = self.current.expect("backbuffer used before an image was acquired") as usize;
        let from = self.scopes[index];
        if from.0 == to.0 {
            return;
        }
        let image = &self.images[index];
        image_barrier(&core.device, cmd, image.image, image.range(), from, to);
        self.scopes[index] = to;
    }

    pub(super) fn is_swapchain(&self) -> bool {
        self.swapchain.is_some()
    }

    /// Queues the current image for presentation once `wait` signals.
    pub(super) fn present(&mut self, core: &Core, wait: vk::Semaphore) -> Result<()> {
        let Some(chain) = &self.swapchain else {
            return Ok(());
        };
        let Some(index) = self.current.take() else {
            return Ok(());
        };
        let waits = [wait];
        let chains = [chain.raw];
        let indices = [index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&waits)
            .swapchains(&chains)
            .image_indices(&indices);
        match unsafe { chain.loader.queue_present(core.queue, &info) } {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => self.stale = true,
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Rebuilds the swapchain if presentation reported it stale or a
    /// setting changed. Must be called with no image held.
    pub(super) fn refresh(&mut self, core: &Core, pool: &mut CommandPool) -> Result<()> {
        if self.stale && self.current.is_none() {
            self.rebuild(core, pool, self.extent.width, self.extent.height)?;
        }
        Ok(())
    }

    pub(super) fn set_vsync(&mut self, vsync: bool) {
        if self.vsync == vsync {
            return;
        }
        self.vsync = vsync;
        if self.swapchain.is_some() {
            self.stale = true;
        } else {
            log::warn!("vsync has no effect on an offscreen backbuffer");
        }
    }

    pub(super) fn resize(&mut self, core: &Core, pool: &mut CommandPool, width: u32, height: u32) -> Result<()> {
        if self.swapchain.is_some() {
            self.current = None;
        }
        self.rebuild(core, pool, width, height)
    }

    fn rebuild(&mut self, core: &Core, pool: &mut CommandPool, width: u32, height: u32) -> Result<()> {
        unsafe { core.device.device_wait_idle()? };
        let requested = vk::Extent2D {
            width: width.max(1),
            height: height.max(1),
        };
        for image in self.images.drain(..) {
            image.destroy(core);
        }
        let extent = match self.swapchain.take() {
            Some(old) => {
                let (chain, extent) = Swapchain::new(
                    core,
                    old.loader.clone(),
                    old.surface,
                    requested.width,
                    requested.height,
                    self.vsync,
                    old.raw,
                )?;
                unsafe { old.loader.destroy_swapchain(old.raw, None) };
                self.images = chain.images(core)?;
                self.swapchain = Some(chain);
                extent
            }
            None => {
                self.images.push(offscreen_image(core, requested)?);
                requested
            }
        };
        if extent != self.extent {
            let depth = create_depth_stencil(core, pool, extent)?;
            std::mem::replace(&mut self.depth, depth).destroy(core);
        }
        self.extent = extent;
        self.scopes = vec![UNUSED; self.images.len()];
        self.stale = false;
        Ok(())
    }

    pub(super) fn destroy(&mut self, core: &Core) {
        for image in self.images.drain(..) {
            image.destroy(core);
        }
        if let Some(chain) = self.swapchain.take() {
            unsafe {
                chain.loader.destroy_swapchain(chain.raw, None);
                core.surface_loader.destroy_surface(chain.surface, None);
            }
        }
        std::mem::take(&mut self.depth).destroy(core);
    }
}
