use std::rc::Rc;

use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use super::backend::create_backend;
use super::{
    Backend, BackendType, BlendMode, ContextInfo, CullMode, DepthBias, DepthMode, Features,
    Format, FrontFace, IndexBuffer, RaytracingShader, RenderTarget, Result, RetireQueue, Sampler,
    Scissor, Shader, Stats, StencilMode, StorageBuffer, Texture, TextureAddress,
    TopLevelAccelerationStructure, Topology, UniformBuffer, VertexBuffer, Viewport, WindowHandle,
};

/// The one GPU device an application drives.
///
/// Every call forwards to the backend chosen at construction. Resources
/// created from a device may be dropped at any time; their native objects
/// are reclaimed once no in-flight frame can reference them.
pub struct RenderDevice {
    backend: Box<dyn Backend>,
    retire: Rc<RetireQueue>,
}

impl RenderDevice {
    /// Creates a device presenting into `window`, or rendering into an
    /// offscreen backbuffer when `window` is `None`.
    pub fn new(window: Option<WindowHandle>, width: u32, height: u32, info: &ContextInfo) -> Result<Self> {
        let info = info.clone().from_env();
        let backend = create_backend(window, width, height, &info)?;
        let retire = backend.retire_queue();
        Ok(Self { backend, retire })
    }

    pub fn with_window<W>(window: &W, width: u32, height: u32, info: &ContextInfo) -> Result<Self>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        Self::new(Some(WindowHandle::new(window)), width, height, info)
    }

    pub fn headless(width: u32, height: u32, info: &ContextInfo) -> Result<Self> {
        Self::new(None, width, height, info)
    }

    /// The backend, with everything dropped since the last call reclaimed.
    pub(crate) fn backend(&mut self) -> &mut dyn Backend {
        self.backend.collect_retired();
        &mut *self.backend
    }

    pub(crate) fn retire_queue(&self) -> Rc<RetireQueue> {
        self.retire.clone()
    }

    pub(crate) fn owns(&self, retire: &Rc<RetireQueue>) -> bool {
        Rc::ptr_eq(&self.retire, retire)
    }

    pub fn backend_type(&self) -> BackendType {
        self.backend.backend_type()
    }

    pub fn features(&self) -> Features {
        self.backend.features()
    }

    pub fn width(&self) -> u32 {
        self.backend.width()
    }

    pub fn height(&self) -> u32 {
        self.backend.height()
    }

    pub fn backbuffer_format(&self) -> Format {
        self.backend.backbuffer_format()
    }

    pub fn is_vsync_enabled(&self) -> bool {
        self.backend.is_vsync_enabled()
    }

    pub fn stats(&self) -> Stats {
        self.backend.stats()
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.backend().resize(width, height)
    }

    pub fn set_vsync(&mut self, vsync: bool) -> Result<()> {
        self.backend().set_vsync(vsync)
    }

    pub fn set_topology(&mut self, topology: Topology) {
        self.backend().set_topology(topology);
    }

    pub fn set_viewport(&mut self, viewport: Option<Viewport>) {
        self.backend().set_viewport(viewport);
    }

    pub fn set_scissor(&mut self, scissor: Option<Scissor>) {
        self.backend().set_scissor(scissor);
    }

    pub fn set_texture(&mut self, binding: u32, texture: &Texture) {
        debug_assert!(self.owns(texture.retire()), "texture belongs to another device");
        self.backend().set_texture(binding, texture.id());
    }

    /// Directs subsequent draws into `target`, or back to the backbuffer.
    pub fn set_render_target(&mut self, target: Option<&RenderTarget>) {
        self.backend().set_render_target(target.map(|t| t.id()));
    }

    pub fn set_shader(&mut self, shader: &Shader) {
        debug_assert!(self.owns(shader.retire()), "shader belongs to another device");
        self.backend().set_shader(shader.id());
    }

    pub fn set_raytracing_shader(&mut self, shader: &RaytracingShader) {
        self.backend().set_raytracing_shader(shader.id());
    }

    pub fn set_vertex_buffer(&mut self, buffer: &VertexBuffer) {
        debug_assert!(self.owns(buffer.retire()), "buffer belongs to another device");
        self.backend().set_vertex_buffer(buffer.id());
    }

    pub fn set_index_buffer(&mut self, buffer: &IndexBuffer) {
        debug_assert!(self.owns(buffer.retire()), "buffer belongs to another device");
        self.backend().set_index_buffer(buffer.id());
    }

    pub fn set_uniform_buffer(&mut self, binding: u32, buffer: &UniformBuffer) {
        debug_assert!(self.owns(buffer.retire()), "buffer belongs to another device");
        self.backend().set_uniform_buffer(binding, buffer.id());
    }

    pub fn set_storage_buffer(&mut self, binding: u32, buffer: &StorageBuffer) {
        debug_assert!(self.owns(buffer.retire()), "buffer belongs to another device");
        self.backend().set_storage_buffer(binding, buffer.id());
    }

    pub fn set_acceleration_structure(&mut self, binding: u32, tlas: &TopLevelAccelerationStructure) {
        self.backend().set_acceleration_structure(binding, tlas.id());
    }

    pub fn set_blend_mode(&mut self, mode: Option<BlendMode>) {
        self.backend().set_blend_mode(mode);
    }

    pub fn set_depth_mode(&mut self, mode: Option<DepthMode>) {
        self.backend().set_depth_mode(mode);
    }

    pub fn set_stencil_mode(&mut self, mode: Option<StencilMode>) {
        self.backend().set_stencil_mode(mode);
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) {
        self.backend().set_cull_mode(mode);
    }

    pub fn set_sampler(&mut self, sampler: Sampler) {
        self.backend().set_sampler(sampler);
    }

    pub fn set_texture_address(&mut self, address: TextureAddress) {
        self.backend().set_texture_address(address);
    }

    pub fn set_front_face(&mut self, face: FrontFace) {
        self.backend().set_front_face(face);
    }

    pub fn set_depth_bias(&mut self, bias: Option<DepthBias>) {
        self.backend().set_depth_bias(bias);
    }

    pub fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>, stencil: Option<u8>) -> Result<()> {
        self.backend().clear(color, depth, stencil)
    }

    pub fn draw(&mut self, vertex_count: u32, vertex_offset: u32, instance_count: u32) -> Result<()> {
        self.backend().draw(vertex_count, vertex_offset, instance_count)
    }

    pub fn draw_indexed(&mut self, index_count: u32, index_offset: u32, instance_count: u32) -> Result<()> {
        self.backend().draw_indexed(index_count, index_offset, instance_count)
    }

    pub fn dispatch_rays(&mut self, width: u32, height: u32, depth: u32) -> Result<()> {
        self.backend().dispatch_rays(width, height, depth)
    }

    /// Copies a region of the current render target into `dst` at its
    /// origin.
    pub fn read_pixels(&mut self, pos: [u32; 2], size: [u32; 2], dst: &Texture) -> Result<()> {
        self.backend().read_pixels(pos, size, dst.id())
    }

    /// Submits the frame, presents it and opens the next one.
    pub fn present(&mut self) -> Result<()> {
        self.backend().present()
    }

    /// Submits recorded work and blocks until the GPU is done with it.
    pub fn flush(&mut self) -> Result<()> {
        self.backend().flush()
    }

    /// Tightly packed mip-0 texels of `texture`. Stalls on the GPU.
    pub fn read_texture(&mut self, texture: &Texture) -> Result<Vec<u8>> {
        self.backend().read_texture(texture.id())
    }
}
