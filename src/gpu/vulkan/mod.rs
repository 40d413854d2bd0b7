//! Vulkan 1.3 driver: dynamic rendering, push descriptors and extended
//! dynamic state, so pipelines only ever depend on the cached key.

mod command_pool;
mod conversions;
mod device;
mod display;
mod memory;
mod pipelines;

use ash::vk;
use smallvec::SmallVec;

use crate::gpu::{
    BackendType, BindPoint, BoundResource, BufferKind, ClearValues, ContextInfo, CopySource, CullMode, DepthBias,
    DrawArgs, Driver, Features, Format, FrontFace, GPUError, IndexType, InstanceDesc, Layout, NativeShaderCode,
    NativeShaderInfo, PassTarget, PipelineState, ResourceBinding, Result, SamplerState, Scissor, TargetFormat,
    TextureDesc, TextureKind, TextureRegion, Topology, Viewport, WindowHandle,
};

use command_pool::CommandPool;
use conversions::{flipped_viewport, layout_scope, sampler_info, vk_format};
use device::Core;
use display::{Display, PRESENT};
pub use memory::{VkBuffer, VkTexture};
use memory::MemoryLocation;
pub use pipelines::{VkPipeline, VkShader};

/// Layout plus the stage and access masks it is used with.
type Scope = (vk::ImageLayout, vk::PipelineStageFlags2, vk::AccessFlags2);

const DEPTH_ATTACHMENT: Scope = (
    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    vk::PipelineStageFlags2::from_raw(
        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
    ),
    vk::AccessFlags2::from_raw(
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
    ),
);

fn image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    from: Scope,
    to: Scope,
) {
    let barrier = [vk::ImageMemoryBarrier2::builder()
        .old_layout(from.0)
        .src_stage_mask(from.1)
        .src_access_mask(from.2)
        .new_layout(to.0)
        .dst_stage_mask(to.1)
        .dst_access_mask(to.2)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build()];
    let info = vk::DependencyInfo::builder().image_memory_barriers(&barrier);
    unsafe { device.cmd_pipeline_barrier2(cmd, &info) };
}

fn memory_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: (vk::PipelineStageFlags2, vk::AccessFlags2),
    dst: (vk::PipelineStageFlags2, vk::AccessFlags2),
) {
    let barrier = [vk::MemoryBarrier2::builder()
        .src_stage_mask(src.0)
        .src_access_mask(src.1)
        .dst_stage_mask(dst.0)
        .dst_access_mask(dst.1)
        .build()];
    let info = vk::DependencyInfo::builder().memory_barriers(&barrier);
    unsafe { device.cmd_pipeline_barrier2(cmd, &info) };
}

const ANY_ACCESS: (vk::PipelineStageFlags2, vk::AccessFlags2) = (
    vk::PipelineStageFlags2::ALL_COMMANDS,
    vk::AccessFlags2::from_raw(vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw()),
);
const TRANSFER_WRITE: (vk::PipelineStageFlags2, vk::AccessFlags2) =
    (vk::PipelineStageFlags2::ALL_TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);

fn create_depth_stencil(core: &Core, pool: &mut CommandPool, extent: vk::Extent2D) -> Result<VkTexture> {
    let texture = VkTexture::new(
        core,
        extent,
        core.depth_format,
        1,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
    )?;
    let (image, range) = (texture.image, texture.range());
    let undefined = (
        vk::ImageLayout::UNDEFINED,
        vk::PipelineStageFlags2::TOP_OF_PIPE,
        vk::AccessFlags2::NONE,
    );
    // Depth attachments never leave this layout.
    if let Err(err) = pool.oneshot(core, |cmd| {
        image_barrier(&core.device, cmd, image, range, undefined, DEPTH_ATTACHMENT)
    }) {
        texture.destroy(core);
        return Err(err);
    }
    Ok(texture)
}

fn color_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn color_level(mip_level: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: mip_level,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn offset3(xy: [u32; 2]) -> vk::Offset3D {
    vk::Offset3D {
        x: xy[0] as i32,
        y: xy[1] as i32,
        z: 0,
    }
}

/// Whether a Vulkan device able to run this backend is present.
pub fn is_available(features: Features) -> bool {
    if features.contains(Features::RAYTRACING) {
        return false;
    }
    device::adapter_present()
}

pub struct VkCommandList {
    frame: usize,
    raw: vk::CommandBuffer,
    fence: vk::Fence,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    waits_on_acquire: bool,
    submitted: bool,
    /// Render area of the open pass.
    pass: Option<vk::Extent2D>,
}

pub struct VulkanDriver {
    core: Core,
    pool: CommandPool,
    display: Display,
}

impl VulkanDriver {
    pub fn new(window: Option<WindowHandle>, width: u32, height: u32, info: &ContextInfo) -> Result<Self> {
        if info.features.contains(Features::RAYTRACING) {
            return Err(GPUError::UnsupportedFeature(Features::RAYTRACING));
        }
        let (mut core, surface) = Core::new(window.as_ref(), info.adapter, info.validation)?;
        let mut pool = match CommandPool::new(&core) {
            Ok(pool) => pool,
            Err(err) => {
                if let Some(surface) = surface {
                    unsafe { core.surface_loader.destroy_surface(surface, None) };
                }
                core.destroy();
                return Err(err);
            }
        };
        let display = match Display::new(&core, &mut pool, surface, width, height, info.vsync) {
            Ok(display) => display,
            Err(err) => {
                pool.destroy(&core);
                if let Some(surface) = surface {
                    unsafe { core.surface_loader.destroy_surface(surface, None) };
                }
                core.destroy();
                return Err(err);
            }
        };
        log::info!(
            "Vulkan backbuffer {}x{} ({})",
            display.extent.width,
            display.extent.height,
            if display.is_swapchain() { "swapchain" } else { "offscreen" }
        );
        Ok(Self { core, pool, display })
    }

    fn bind_point(bind_point: BindPoint) -> vk::PipelineBindPoint {
        match bind_point {
            BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
            BindPoint::Raytracing => vk::PipelineBindPoint::RAY_TRACING_KHR,
        }
    }

    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.core
                .instance
                .get_physical_device_format_properties(self.core.pdevice, format)
        }
        .optimal_tiling_features
    }
}

impl Drop for VulkanDriver {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.core.device.device_wait_idle() } {
            log::error!("device_wait_idle failed during shutdown: {}", err);
        }
        self.display.destroy(&self.core);
        self.pool.destroy(&self.core);
        self.core.destroy();
    }
}

impl Driver for VulkanDriver {
    type Texture = VkTexture;
    type Buffer = VkBuffer;
    type Shader = VkShader;
    type Pipeline = VkPipeline;
    type Sampler = vk::Sampler;
    type AccelerationStructure = ();
    type CommandList = VkCommandList;

    fn backend_type(&self) -> BackendType {
        BackendType::Vulkan
    }

    fn features(&self) -> Features {
        Features::empty()
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        (self.display.extent.width, self.display.extent.height)
    }

    fn backbuffer_format(&self) -> Format {
        Format::Byte4
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<VkTexture> {
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        if desc.kind == TextureKind::DepthStencil {
            return create_depth_stencil(&self.core, &mut self.pool, extent);
        }
        if !desc.format.is_texture_format() {
            return Err(GPUError::UnsupportedFormat(desc.format));
        }
        let format = vk_format(desc.format);
        let supported = self.format_features(format);
        if !supported.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE) {
            return Err(GPUError::UnsupportedFormat(desc.format));
        }
        let mut usage =
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        if supported.contains(vk::FormatFeatureFlags::STORAGE_IMAGE) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if desc.kind == TextureKind::RenderTarget {
            if !supported.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT) {
                return Err(GPUError::UnsupportedFormat(desc.format));
            }
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        VkTexture::new(
            &self.core,
            extent,
            format,
            desc.mip_levels,
            usage,
            vk::ImageAspectFlags::COLOR,
        )
    }

    fn destroy_texture(&mut self, texture: VkTexture) {
        texture.destroy(&self.core);
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Result<VkBuffer> {
        let usage = match kind {
            BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        } | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC;
        VkBuffer::new(&self.core, size, usage, MemoryLocation::DeviceLocal)
    }

    fn create_staging_buffer(&mut self, data: &[u8]) -> Result<VkBuffer> {
        let mut buffer = VkBuffer::new(
            &self.core,
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::Upload,
        )?;
        if let Err(err) = buffer.write(&self.core, 0, data) {
            buffer.destroy(&self.core);
            return Err(err);
        }
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: VkBuffer) {
        buffer.destroy(&self.core);
    }

    fn create_shader(&mut self, info: &NativeShaderInfo<'_>) -> Result<VkShader> {
        match &info.code {
            NativeShaderCode::Spirv(stages) => VkShader::new(
                &self.core,
                info.debug_name,
                stages,
                info.reflection,
                info.vertex_layout,
            ),
            NativeShaderCode::Host(_) | NativeShaderCode::HostRaytracing(_) => {
                Err(GPUError::UnsupportedShaderCode(BackendType::Vulkan))
            }
        }
    }

    fn destroy_shader(&mut self, shader: VkShader) {
        shader.destroy(&self.core);
    }

    fn create_pipeline(&mut self, shader: &VkShader, state: &PipelineState) -> Result<VkPipeline> {
        let color_format = match state.color_target {
            TargetFormat::Backbuffer => self.display.format,
            TargetFormat::Texture(format) => vk_format(format),
        };
        VkPipeline::graphics(&self.core, shader, state, color_format)
    }

    fn create_raytracing_pipeline(&mut self, _shader: &VkShader) -> Result<VkPipeline> {
        Err(GPUError::UnsupportedFeature(Features::RAYTRACING))
    }

    fn destroy_pipeline(&mut self, pipeline: VkPipeline) {
        pipeline.destroy(&self.core);
    }

    fn create_sampler(&mut self, state: &SamplerState) -> Result<vk::Sampler> {
        Ok(unsafe { self.core.device.create_sampler(&sampler_info(state), None)? })
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        unsafe { self.core.device.destroy_sampler(sampler, None) };
    }

    fn create_bottom_level(&mut self, _vertices: &[[f32; 3]], _indices: &[u32]) -> Result<()> {
        Err(GPUError::UnsupportedFeature(Features::RAYTRACING))
    }

    fn create_top_level(&mut self, _instances: &[InstanceDesc<'_, Self>]) -> Result<()> {
        Err(GPUError::UnsupportedFeature(Features::RAYTRACING))
    }

    fn destroy_acceleration_structure(&mut self, _structure: ()) {}

    fn create_command_list(&mut self, frame: usize) -> Result<VkCommandList> {
        let device = &self.core.device;
        let raw = self.pool.allocate(&self.core)?;
        self.core.set_name(raw, &format!("frame{}.commands", frame));
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None)? };
        let image_available = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
        let render_finished = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
        Ok(VkCommandList {
            frame,
            raw,
            fence,
            image_available,
            render_finished,
            waits_on_acquire: false,
            submitted: false,
            pass: None,
        })
    }

    fn destroy_command_list(&mut self, cmd: VkCommandList) {
        debug_assert!(!cmd.submitted, "command list destroyed while in flight");
        unsafe {
            self.core.device.destroy_fence(cmd.fence, None);
            self.core.device.destroy_semaphore(cmd.image_available, None);
            self.core.device.destroy_semaphore(cmd.render_finished, None);
        }
        self.pool.recycle(cmd.raw);
    }

    fn begin(&mut self, cmd: &mut VkCommandList) -> Result<()> {
        let acquired = self
            .display
            .acquire(&self.core, &mut self.pool, cmd.image_available)?;
        cmd.waits_on_acquire |= acquired;
        unsafe {
            self.core
                .device
                .reset_command_buffer(cmd.raw, vk::CommandBufferResetFlags::empty())?;
            self.core.device.begin_command_buffer(
                cmd.raw,
                &vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }
        cmd.pass = None;
        log::trace!("frame slot {} begun", cmd.frame);
        Ok(())
    }

    fn submit(&mut self, cmd: &mut VkCommandList, present: bool) -> Result<()> {
        debug_assert!(cmd.pass.is_none(), "submitting inside a render pass");
        let present = present && self.display.is_swapchain();
        if present {
            self.display.transition(&self.core, cmd.raw, PRESENT);
        }
        let device = &self.core.device;
        unsafe { device.end_command_buffer(cmd.raw)? };

        let mut waits = SmallVec::<[vk::Semaphore; 1]>::new();
        if cmd.waits_on_acquire {
            waits.push(cmd.image_available);
        }
        let stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.len()];
        let signals: &[vk::Semaphore] = if present {
            std::slice::from_ref(&cmd.render_finished)
        } else {
            &[]
        };
        let bufs = [cmd.raw];
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&bufs)
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .signal_semaphores(signals);
        unsafe {
            device.reset_fences(&[cmd.fence])?;
            device.queue_submit(self.core.queue, &[submit.build()], cmd.fence)?;
        }
        cmd.waits_on_acquire = false;
        cmd.submitted = true;

        if present {
            self.display.present(&self.core, cmd.render_finished)?;
            self.display.refresh(&self.core, &mut self.pool)?;
        }
        Ok(())
    }

    fn wait(&mut self, cmd: &mut VkCommandList) -> Result<()> {
        if cmd.submitted {
            unsafe { self.core.device.wait_for_fences(&[cmd.fence], true, u64::MAX)? };
            cmd.submitted = false;
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.core.device.device_wait_idle()? };
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.display.resize(&self.core, &mut self.pool, width, height)
    }

    fn set_vsync(&mut self, vsync: bool) -> Result<()> {
        self.display.set_vsync(vsync);
        Ok(())
    }

    fn read_texture(&mut self, texture: &VkTexture, width: u32, height: u32, format: Format) -> Result<Vec<u8>> {
        let size = (width * height * format.bytes_per_pixel()) as u64;
        let staging = VkBuffer::new(
            &self.core,
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::Readback,
        )?;
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: color_layers(0),
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };
        let core = &self.core;
        let result = self.pool.oneshot(core, |cmd| unsafe {
            core.device.cmd_copy_image_to_buffer(
                cmd,
                texture.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging.raw,
                &[region],
            );
            memory_barrier(
                &core.device,
                cmd,
                TRANSFER_WRITE,
                (vk::PipelineStageFlags2::HOST, vk::AccessFlags2::HOST_READ),
            );
        });
        let data = result.and_then(|_| staging.read(core, size as usize));
        staging.destroy(core);
        data
    }

    fn cmd_begin_pass(&mut self, cmd: &mut VkCommandList, target: PassTarget<'_, Self>) {
        let (color_view, depth_view, extent) = match target {
            PassTarget::Backbuffer => {
                self.display
                    .transition(&self.core, cmd.raw, layout_scope(Layout::ColorAttachment));
                (self.display.image().view, self.display.depth.view, self.display.extent)
            }
            PassTarget::Texture {
                color,
                depth_stencil,
                width,
                height,
            } => (color.view, depth_stencil.view, vk::Extent2D { width, height }),
        };
        let color = [vk::RenderingAttachmentInfo::builder()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .build()];
        let depth = vk::RenderingAttachmentInfo::builder()
            .image_view(depth_view)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE);
        let info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(&color)
            .depth_attachment(&depth)
            .stencil_attachment(&depth);
        unsafe { self.core.device.cmd_begin_rendering(cmd.raw, &info) };
        cmd.pass = Some(extent);
    }

    fn cmd_end_pass(&mut self, cmd: &mut VkCommandList) {
        if cmd.pass.take().is_none() {
            return;
        }
        unsafe { self.core.device.cmd_end_rendering(cmd.raw) };
        // Attachment writes must land before the next pass, copy or sample.
        memory_barrier(
            &self.core.device,
            cmd.raw,
            (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            ANY_ACCESS,
        );
    }

    fn cmd_transition(&mut self, cmd: &mut VkCommandList, texture: &VkTexture, from: Layout, to: Layout) {
        image_barrier(
            &self.core.device,
            cmd.raw,
            texture.image,
            texture.range(),
            layout_scope(from),
            layout_scope(to),
        );
    }

    fn cmd_bind_pipeline(&mut self, cmd: &mut VkCommandList, bind_point: BindPoint, pipeline: &VkPipeline) {
        unsafe {
            self.core
                .device
                .cmd_bind_pipeline(cmd.raw, Self::bind_point(bind_point), pipeline.raw)
        };
    }

    fn cmd_bind_resources(
        &mut self,
        cmd: &mut VkCommandList,
        bind_point: BindPoint,
        pipeline: &VkPipeline,
        bindings: &[ResourceBinding<'_, Self>],
    ) {
        enum Info {
            Image(vk::DescriptorImageInfo),
            Buffer(vk::DescriptorBufferInfo),
        }

        let mut infos = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let (kind, info) = match &binding.resource {
                BoundResource::Texture { texture, sampler } => (
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    Info::Image(vk::DescriptorImageInfo {
                        sampler: **sampler,
                        image_view: texture.view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }),
                ),
                BoundResource::StorageImage(texture) => (
                    vk::DescriptorType::STORAGE_IMAGE,
                    Info::Image(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: texture.view,
                        image_layout: vk::ImageLayout::GENERAL,
                    }),
                ),
                BoundResource::UniformBuffer(buffer) => (
                    vk::DescriptorType::UNIFORM_BUFFER,
                    Info::Buffer(vk::DescriptorBufferInfo {
                        buffer: buffer.raw,
                        offset: 0,
                        range: vk::WHOLE_SIZE,
                    }),
                ),
                BoundResource::StorageBuffer(buffer) => (
                    vk::DescriptorType::STORAGE_BUFFER,
                    Info::Buffer(vk::DescriptorBufferInfo {
                        buffer: buffer.raw,
                        offset: 0,
                        range: vk::WHOLE_SIZE,
                    }),
                ),
                BoundResource::AccelerationStructure(_) => continue,
            };
            infos.push((binding.binding, kind, info));
        }
        if infos.is_empty() {
            return;
        }

        let writes: Vec<_> = infos
            .iter()
            .map(|(binding, kind, info)| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_binding(*binding)
                    .descriptor_type(*kind);
                match info {
                    Info::Image(image) => write.image_info(std::slice::from_ref(image)).build(),
                    Info::Buffer(buffer) => write.buffer_info(std::slice::from_ref(buffer)).build(),
                }
            })
            .collect();
        unsafe {
            self.core.push_descriptor.cmd_push_descriptor_set(
                cmd.raw,
                Self::bind_point(bind_point),
                pipeline.layout.pipeline_layout,
                0,
                &writes,
            )
        };
    }

    fn cmd_bind_vertex_buffer(&mut self, cmd: &mut VkCommandList, buffer: &VkBuffer) {
        unsafe {
            self.core
                .device
                .cmd_bind_vertex_buffers(cmd.raw, 0, &[buffer.raw], &[0])
        };
    }

    fn cmd_bind_index_buffer(&mut self, cmd: &mut VkCommandList, buffer: &VkBuffer, index_type: IndexType) {
        let index_type = match index_type {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        };
        unsafe {
            self.core
                .device
                .cmd_bind_index_buffer(cmd.raw, buffer.raw, 0, index_type)
        };
    }

    fn cmd_set_topology(&mut self, cmd: &mut VkCommandList, topology: Topology) {
        unsafe {
            self.core
                .device
                .cmd_set_primitive_topology(cmd.raw, topology.into())
        };
    }

    fn cmd_set_viewport(&mut self, cmd: &mut VkCommandList, viewport: &Viewport) {
        unsafe {
            self.core
                .device
                .cmd_set_viewport(cmd.raw, 0, &[flipped_viewport(viewport)])
        };
    }

    fn cmd_set_scissor(&mut self, cmd: &mut VkCommandList, scissor: &Scissor) {
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.position[0].max(0),
                y: scissor.position[1].max(0),
            },
            extent: vk::Extent2D {
                width: scissor.size[0],
                height: scissor.size[1],
            },
        };
        unsafe { self.core.device.cmd_set_scissor(cmd.raw, 0, &[rect]) };
    }

    fn cmd_set_cull_mode(&mut self, cmd: &mut VkCommandList, cull_mode: CullMode) {
        unsafe { self.core.device.cmd_set_cull_mode(cmd.raw, cull_mode.into()) };
    }

    fn cmd_set_front_face(&mut self, cmd: &mut VkCommandList, front_face: FrontFace) {
        unsafe { self.core.device.cmd_set_front_face(cmd.raw, front_face.into()) };
    }

    fn cmd_set_depth_bias(&mut self, cmd: &mut VkCommandList, bias: Option<DepthBias>) {
        let device = &self.core.device;
        unsafe {
            device.cmd_set_depth_bias_enable(cmd.raw, bias.is_some());
            if let Some(bias) = bias {
                device.cmd_set_depth_bias(cmd.raw, bias.units, 0.0, bias.factor);
            }
        }
    }

    fn cmd_clear(&mut self, cmd: &mut VkCommandList, values: &ClearValues) {
        let extent = cmd.pass.expect("clear recorded outside a render pass");
        let mut attachments = SmallVec::<[vk::ClearAttachment; 2]>::new();
        if let Some(color) = values.color {
            attachments.push(vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
            });
        }
        let mut aspect = vk::ImageAspectFlags::empty();
        if values.depth.is_some() {
            aspect |= vk::ImageAspectFlags::DEPTH;
        }
        if values.stencil.is_some() {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        if !aspect.is_empty() {
            attachments.push(vk::ClearAttachment {
                aspect_mask: aspect,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: values.depth.unwrap_or(1.0),
                        stencil: values.stencil.unwrap_or(0) as u32,
                    },
                },
            });
        }
        if attachments.is_empty() {
            return;
        }
        let rect = vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.core
                .device
                .cmd_clear_attachments(cmd.raw, &attachments, &[rect])
        };
    }

    fn cmd_draw(&mut self, cmd: &mut VkCommandList, args: DrawArgs) {
        unsafe {
            self.core
                .device
                .cmd_draw(cmd.raw, args.count, args.instance_count, args.offset, 0)
        };
    }

    fn cmd_draw_indexed(&mut self, cmd: &mut VkCommandList, args: DrawArgs) {
        unsafe {
            self.core
                .device
                .cmd_draw_indexed(cmd.raw, args.count, args.instance_count, args.offset, 0, 0)
        };
    }

    fn cmd_dispatch_rays(&mut self, _cmd: &mut VkCommandList, _pipeline: &VkPipeline, _size: [u32; 3]) {
        unreachable!("raytracing pipelines cannot be created on Vulkan");
    }

    fn cmd_update_buffer(&mut self, cmd: &mut VkCommandList, buffer: &VkBuffer, offset: u64, data: &[u8]) {
        let device = &self.core.device;
        memory_barrier(device, cmd.raw, ANY_ACCESS, TRANSFER_WRITE);
        unsafe { device.cmd_update_buffer(cmd.raw, buffer.raw, offset, data) };
        memory_barrier(device, cmd.raw, TRANSFER_WRITE, ANY_ACCESS);
    }

    fn cmd_copy_buffer(&mut self, cmd: &mut VkCommandList, src: &VkBuffer, dst: &VkBuffer, dst_offset: u64, size: u64) {
        let device = &self.core.device;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset,
            size,
        };
        memory_barrier(device, cmd.raw, ANY_ACCESS, TRANSFER_WRITE);
        unsafe { device.cmd_copy_buffer(cmd.raw, src.raw, dst.raw, &[region]) };
        memory_barrier(device, cmd.raw, TRANSFER_WRITE, ANY_ACCESS);
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        cmd: &mut VkCommandList,
        src: &VkBuffer,
        dst: &VkTexture,
        region: &TextureRegion,
    ) {
        let copy = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: color_layers(region.mip_level),
            image_offset: offset3(region.offset),
            image_extent: vk::Extent3D {
                width: region.size[0],
                height: region.size[1],
                depth: 1,
            },
        };
        unsafe {
            self.core.device.cmd_copy_buffer_to_image(
                cmd.raw,
                src.raw,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            )
        };
    }

    fn cmd_copy_to_texture(
        &mut self,
        cmd: &mut VkCommandList,
        src: CopySource<'_, Self>,
        src_offset: [u32; 2],
        dst: &VkTexture,
        dst_offset: [u32; 2],
        size: [u32; 2],
    ) {
        match src {
            CopySource::Backbuffer => {
                // Blit rather than copy: the swapchain format swizzles channels.
                self.display
                    .transition(&self.core, cmd.raw, layout_scope(Layout::TransferSrc));
                let blit = vk::ImageBlit {
                    src_subresource: color_layers(0),
                    src_offsets: [
                        offset3(src_offset),
                        vk::Offset3D {
                            x: (src_offset[0] + size[0]) as i32,
                            y: (src_offset[1] + size[1]) as i32,
                            z: 1,
                        },
                    ],
                    dst_subresource: color_layers(0),
                    dst_offsets: [
                        offset3(dst_offset),
                        vk::Offset3D {
                            x: (dst_offset[0] + size[0]) as i32,
                            y: (dst_offset[1] + size[1]) as i32,
                            z: 1,
                        },
                    ],
                };
                unsafe {
                    self.core.device.cmd_blit_image(
                        cmd.raw,
                        self.display.image().image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::NEAREST,
                    )
                };
            }
            CopySource::Texture(texture) => {
                let copy = vk::ImageCopy {
                    src_subresource: color_layers(0),
                    src_offset: offset3(src_offset),
                    dst_subresource: color_layers(0),
                    dst_offset: offset3(dst_offset),
                    extent: vk::Extent3D {
                        width: size[0],
                        height: size[1],
                        depth: 1,
                    },
                };
                unsafe {
                    self.core.device.cmd_copy_image(
                        cmd.raw,
                        texture.image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[copy],
                    )
                };
            }
        }
    }

    fn cmd_generate_mips(&mut self, cmd: &mut VkCommandList, texture: &VkTexture, width: u32, height: u32, mip_levels: u32) {
        let filter = if self
            .format_features(texture.format)
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            vk::Filter::LINEAR
        } else {
            vk::Filter::NEAREST
        };
        let device = &self.core.device;
        let dst = layout_scope(Layout::TransferDst);
        let src = layout_scope(Layout::TransferSrc);
        let read = layout_scope(Layout::ShaderReadOnly);
        let corner = |level: u32| vk::Offset3D {
            x: (width >> level).max(1) as i32,
            y: (height >> level).max(1) as i32,
            z: 1,
        };

        for level in 1..mip_levels {
            image_barrier(device, cmd.raw, texture.image, color_level(level - 1), dst, src);
            let blit = vk::ImageBlit {
                src_subresource: color_layers(level - 1),
                src_offsets: [vk::Offset3D::default(), corner(level - 1)],
                dst_subresource: color_layers(level),
                dst_offsets: [vk::Offset3D::default(), corner(level)],
            };
            unsafe {
                device.cmd_blit_image(
                    cmd.raw,
                    texture.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    texture.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    filter,
                )
            };
            image_barrier(device, cmd.raw, texture.image, color_level(level - 1), src, read);
        }
        image_barrier(device, cmd.raw, texture.image, color_level(mip_levels - 1), dst, read);
    }
}
