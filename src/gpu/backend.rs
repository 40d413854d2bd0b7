use std::cell::RefCell;
use std::rc::Rc;

use super::software::SoftwareDriver;
use super::{
    AccelerationStructureId, BackendType, BlendMode, BufferId, BufferKind, ContextInfo, Context,
    CullMode, DepthBias, DepthMode, Features, Format, FrontFace, GPUError, IndexType,
    RaytracingShaderInfo, Result, Sampler, Scissor, ShaderId, ShaderInfo, Stats, StencilMode,
    TextureAddress, TextureId, TextureInfo, TextureRegion, Topology, Viewport, WindowHandle,
};

/// An object the application dropped, waiting to be reclaimed by its
/// backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retired {
    Texture(TextureId),
    Buffer(BufferId),
    Shader(ShaderId),
    AccelerationStructure(AccelerationStructureId),
}

/// Shared between a backend and the resource wrappers it handed out, so
/// dropping a wrapper never needs the device.
#[derive(Debug, Default)]
pub struct RetireQueue {
    items: RefCell<Vec<Retired>>,
}

impl RetireQueue {
    pub fn push(&self, item: Retired) {
        self.items.borrow_mut().push(item);
    }

    pub fn take(&self) -> Vec<Retired> {
        std::mem::take(&mut *self.items.borrow_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub kind: BufferKind,
    pub size: u64,
    pub stride: u32,
    pub index_type: IndexType,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerationInstance {
    pub blas: AccelerationStructureId,
    pub transform: [[f32; 4]; 3],
}

/// Uniform rendering interface every backend exposes. Chosen once when a
/// [`crate::RenderDevice`] is built and used through dynamic dispatch.
pub trait Backend {
    fn backend_type(&self) -> BackendType;
    fn features(&self) -> Features;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn backbuffer_format(&self) -> Format;
    fn is_vsync_enabled(&self) -> bool;
    fn stats(&self) -> Stats;
    fn retire_queue(&self) -> Rc<RetireQueue>;
    /// Reclaims everything dropped since the last call.
    fn collect_retired(&mut self);

    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
    fn set_vsync(&mut self, vsync: bool) -> Result<()>;

    fn set_topology(&mut self, topology: Topology);
    fn set_viewport(&mut self, viewport: Option<Viewport>);
    fn set_scissor(&mut self, scissor: Option<Scissor>);
    fn set_texture(&mut self, binding: u32, texture: TextureId);
    fn set_render_target(&mut self, target: Option<TextureId>);
    fn set_shader(&mut self, shader: ShaderId);
    fn set_raytracing_shader(&mut self, shader: ShaderId);
    fn set_vertex_buffer(&mut self, buffer: BufferId);
    fn set_index_buffer(&mut self, buffer: BufferId);
    fn set_uniform_buffer(&mut self, binding: u32, buffer: BufferId);
    fn set_storage_buffer(&mut self, binding: u32, buffer: BufferId);
    fn set_acceleration_structure(&mut self, binding: u32, tlas: AccelerationStructureId);
    fn set_blend_mode(&mut self, mode: Option<BlendMode>);
    fn set_depth_mode(&mut self, mode: Option<DepthMode>);
    fn set_stencil_mode(&mut self, mode: Option<StencilMode>);
    fn set_cull_mode(&mut self, mode: CullMode);
    fn set_sampler(&mut self, sampler: Sampler);
    fn set_texture_address(&mut self, address: TextureAddress);
    fn set_front_face(&mut self, face: FrontFace);
    fn set_depth_bias(&mut self, bias: Option<DepthBias>);

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>, stencil: Option<u8>) -> Result<()>;
    fn draw(&mut self, vertex_count: u32, vertex_offset: u32, instance_count: u32) -> Result<()>;
    fn draw_indexed(&mut self, index_count: u32, index_offset: u32, instance_count: u32) -> Result<()>;
    fn dispatch_rays(&mut self, width: u32, height: u32, depth: u32) -> Result<()>;
    fn read_pixels(&mut self, pos: [u32; 2], size: [u32; 2], dst: TextureId) -> Result<()>;
    fn present(&mut self) -> Result<()>;
    fn flush(&mut self) -> Result<()>;

    fn create_texture(&mut self, info: &TextureInfo, render_target: bool) -> Result<TextureId>;
    fn write_texture(&mut self, texture: TextureId, region: &TextureRegion, data: &[u8]) -> Result<()>;
    fn generate_mips(&mut self, texture: TextureId) -> Result<()>;
    fn read_texture(&mut self, texture: TextureId) -> Result<Vec<u8>>;
    fn create_shader(&mut self, info: &ShaderInfo) -> Result<ShaderId>;
    fn create_raytracing_shader(&mut self, info: &RaytracingShaderInfo) -> Result<ShaderId>;
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId>;
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()>;
    fn create_bottom_level(&mut self, vertices: &[[f32; 3]], indices: &[u32]) -> Result<AccelerationStructureId>;
    fn create_top_level(&mut self, instances: &[AccelerationInstance]) -> Result<AccelerationStructureId>;
}

/// Backends compiled into this build that can serve `features`, most
/// preferred first.
pub fn get_available_backends(features: Features) -> Vec<BackendType> {
    let mut backends = Vec::new();
    #[cfg(feature = "prism-vulkan")]
    if super::vulkan::is_available(features) {
        backends.push(BackendType::Vulkan);
    }
    if SoftwareDriver::supported_features().contains(features) {
        backends.push(BackendType::Software);
    }
    backends
}

pub fn get_default_backend(features: Features) -> Option<BackendType> {
    get_available_backends(features).into_iter().next()
}

pub(crate) fn create_backend(
    window: Option<WindowHandle>,
    width: u32,
    height: u32,
    info: &ContextInfo,
) -> Result<Box<dyn Backend>> {
    let backend = match info.backend {
        Some(backend) => backend,
        None => get_default_backend(info.features).ok_or(GPUError::UnsupportedFeature(info.features))?,
    };
    log::info!("initializing {} backend ({}x{})", backend.name(), width, height);

    match backend {
        BackendType::Software => {
            if !SoftwareDriver::supported_features().contains(info.features) {
                return Err(GPUError::UnsupportedFeature(info.features));
            }
            let driver = SoftwareDriver::new(width, height);
            Ok(Box::new(Context::new(driver, info)?))
        }
        #[cfg(feature = "prism-vulkan")]
        BackendType::Vulkan => {
            let driver = super::vulkan::VulkanDriver::new(window, width, height, info)?;
            Ok(Box::new(Context::new(driver, info)?))
        }
        other => {
            let _ = window;
            Err(GPUError::UnsupportedBackend(other))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_is_always_available() {
        assert!(get_available_backends(Features::empty()).contains(&BackendType::Software));
        assert!(get_available_backends(Features::RAYTRACING).contains(&BackendType::Software));
    }

    #[test]
    fn raytracing_never_selects_vulkan() {
        assert_eq!(get_default_backend(Features::RAYTRACING), Some(BackendType::Software));
    }

    #[test]
    fn uncompiled_backends_are_rejected() {
        let info = ContextInfo::default().with_backend(BackendType::Metal);
        assert!(matches!(
            create_backend(None, 4, 4, &info),
            Err(GPUError::UnsupportedBackend(BackendType::Metal))
        ));
    }

    #[test]
    fn retire_queue_drains() {
        let queue = RetireQueue::default();
        queue.push(Retired::Buffer(BufferId::new(0, 0)));
        assert!(!queue.is_empty());
        assert_eq!(queue.take().len(), 1);
        assert!(queue.is_empty());
    }
}
