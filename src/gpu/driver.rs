//! The seam between the backend-agnostic [`Context`](super::Context) and a
//! native graphics API.
//!
//! A driver owns its device objects and records into its own command lists;
//! it never decides *when* something is recorded. Ordering, redundancy
//! elimination and object lifetimes are the context's job.

use super::{
    BackendType, BufferKind, CullMode, DepthBias, Features, Format, FrontFace, IndexType,
    NativeShaderInfo, PipelineState, Result, SamplerState, Scissor, Topology, Viewport,
};

/// Image layouts the context tracks per texture.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    #[default]
    Undefined,
    General,
    ShaderReadOnly,
    ColorAttachment,
    TransferSrc,
    TransferDst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    Sampled,
    RenderTarget,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// Ignored for [`TextureKind::DepthStencil`].
    pub format: Format,
    pub mip_levels: u32,
    pub kind: TextureKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub mip_level: u32,
    pub offset: [u32; 2],
    pub size: [u32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPoint {
    Graphics,
    Raytracing,
}

pub enum PassTarget<'a, D: Driver + ?Sized> {
    Backbuffer,
    Texture {
        color: &'a D::Texture,
        depth_stencil: &'a D::Texture,
        width: u32,
        height: u32,
    },
}

pub enum CopySource<'a, D: Driver + ?Sized> {
    Backbuffer,
    Texture(&'a D::Texture),
}

pub enum BoundResource<'a, D: Driver + ?Sized> {
    Texture {
        texture: &'a D::Texture,
        sampler: &'a D::Sampler,
    },
    StorageImage(&'a D::Texture),
    UniformBuffer(&'a D::Buffer),
    StorageBuffer(&'a D::Buffer),
    AccelerationStructure(&'a D::AccelerationStructure),
}

pub struct ResourceBinding<'a, D: Driver + ?Sized> {
    pub binding: u32,
    pub resource: BoundResource<'a, D>,
}

pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
    pub stencil: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawArgs {
    pub count: u32,
    pub offset: u32,
    pub instance_count: u32,
}

pub struct InstanceDesc<'a, D: Driver + ?Sized> {
    pub blas: &'a D::AccelerationStructure,
    /// Row-major 3x4 object-to-world transform.
    pub transform: [[f32; 4]; 3],
}

pub trait Driver: 'static {
    type Texture;
    type Buffer;
    type Shader;
    type Pipeline;
    type Sampler;
    type AccelerationStructure;
    type CommandList;

    fn backend_type(&self) -> BackendType;
    fn features(&self) -> Features;
    fn backbuffer_size(&self) -> (u32, u32);
    fn backbuffer_format(&self) -> Format;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Self::Texture>;
    fn destroy_texture(&mut self, texture: Self::Texture);
    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Result<Self::Buffer>;
    /// Host-visible transfer source pre-filled with `data`.
    fn create_staging_buffer(&mut self, data: &[u8]) -> Result<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
    fn create_shader(&mut self, info: &NativeShaderInfo<'_>) -> Result<Self::Shader>;
    fn destroy_shader(&mut self, shader: Self::Shader);
    fn create_pipeline(&mut self, shader: &Self::Shader, state: &PipelineState) -> Result<Self::Pipeline>;
    fn create_raytracing_pipeline(&mut self, shader: &Self::Shader) -> Result<Self::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);
    fn create_sampler(&mut self, state: &SamplerState) -> Result<Self::Sampler>;
    fn destroy_sampler(&mut self, sampler: Self::Sampler);
    fn create_bottom_level(&mut self, vertices: &[[f32; 3]], indices: &[u32]) -> Result<Self::AccelerationStructure>;
    fn create_top_level(&mut self, instances: &[InstanceDesc<'_, Self>]) -> Result<Self::AccelerationStructure>;
    fn destroy_acceleration_structure(&mut self, structure: Self::AccelerationStructure);

    fn create_command_list(&mut self, frame: usize) -> Result<Self::CommandList>;
    fn destroy_command_list(&mut self, cmd: Self::CommandList);
    fn begin(&mut self, cmd: &mut Self::CommandList) -> Result<()>;
    /// Ends recording and queues the work, signalling the list's fence.
    fn submit(&mut self, cmd: &mut Self::CommandList, present: bool) -> Result<()>;
    fn wait(&mut self, cmd: &mut Self::CommandList) -> Result<()>;
    fn wait_idle(&mut self) -> Result<()>;
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
    fn set_vsync(&mut self, vsync: bool) -> Result<()>;
    /// Tightly packed mip-0 texels. The texture is in `TransferSrc` and no
    /// work touching it is pending.
    fn read_texture(&mut self, texture: &Self::Texture, width: u32, height: u32, format: Format) -> Result<Vec<u8>>;

    fn cmd_begin_pass(&mut self, cmd: &mut Self::CommandList, target: PassTarget<'_, Self>);
    fn cmd_end_pass(&mut self, cmd: &mut Self::CommandList);
    fn cmd_transition(&mut self, cmd: &mut Self::CommandList, texture: &Self::Texture, from: Layout, to: Layout);
    fn cmd_bind_pipeline(&mut self, cmd: &mut Self::CommandList, bind_point: BindPoint, pipeline: &Self::Pipeline);
    fn cmd_bind_resources(
        &mut self,
        cmd: &mut Self::CommandList,
        bind_point: BindPoint,
        pipeline: &Self::Pipeline,
        bindings: &[ResourceBinding<'_, Self>],
    );
    fn cmd_bind_vertex_buffer(&mut self, cmd: &mut Self::CommandList, buffer: &Self::Buffer);
    fn cmd_bind_index_buffer(&mut self, cmd: &mut Self::CommandList, buffer: &Self::Buffer, index_type: IndexType);
    fn cmd_set_topology(&mut self, cmd: &mut Self::CommandList, topology: Topology);
    fn cmd_set_viewport(&mut self, cmd: &mut Self::CommandList, viewport: &Viewport);
    fn cmd_set_scissor(&mut self, cmd: &mut Self::CommandList, scissor: &Scissor);
    fn cmd_set_cull_mode(&mut self, cmd: &mut Self::CommandList, cull_mode: CullMode);
    fn cmd_set_front_face(&mut self, cmd: &mut Self::CommandList, front_face: FrontFace);
    fn cmd_set_depth_bias(&mut self, cmd: &mut Self::CommandList, bias: Option<DepthBias>);
    /// Clears the whole active pass target.
    fn cmd_clear(&mut self, cmd: &mut Self::CommandList, values: &ClearValues);
    fn cmd_draw(&mut self, cmd: &mut Self::CommandList, args: DrawArgs);
    fn cmd_draw_indexed(&mut self, cmd: &mut Self::CommandList, args: DrawArgs);
    fn cmd_dispatch_rays(&mut self, cmd: &mut Self::CommandList, pipeline: &Self::Pipeline, size: [u32; 3]);
    fn cmd_update_buffer(&mut self, cmd: &mut Self::CommandList, buffer: &Self::Buffer, offset: u64, data: &[u8]);
    fn cmd_copy_buffer(&mut self, cmd: &mut Self::CommandList, src: &Self::Buffer, dst: &Self::Buffer, dst_offset: u64, size: u64);
    /// Copies tightly packed texels from `src` into a `TransferDst` texture.
    fn cmd_copy_buffer_to_texture(
        &mut self,
        cmd: &mut Self::CommandList,
        src: &Self::Buffer,
        dst: &Self::Texture,
        region: &TextureRegion,
    );
    fn cmd_copy_to_texture(
        &mut self,
        cmd: &mut Self::CommandList,
        src: CopySource<'_, Self>,
        src_offset: [u32; 2],
        dst: &Self::Texture,
        dst_offset: [u32; 2],
        size: [u32; 2],
    );
    /// Fills every level below mip 0. All levels enter in `TransferDst` and
    /// leave in `ShaderReadOnly`.
    fn cmd_generate_mips(&mut self, cmd: &mut Self::CommandList, texture: &Self::Texture, width: u32, height: u32, mip_levels: u32);
}
