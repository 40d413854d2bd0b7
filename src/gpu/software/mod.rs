//! CPU reference backend.
//!
//! Commands are recorded into plain lists and executed when the list is
//! submitted, so fences are always signalled by the time `submit` returns.
//! Programs are [`HostShader`]s; SPIR-V is rejected.

mod image;
mod raster;
mod raytrace;

use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use self::image::{decode_texel, DepthStencil, Image};
use self::raster::{Program, Raster, Target};
use self::raytrace::{invert_affine, Accel, Instance};
use super::{
    BackendType, BindPoint, BoundResource, BufferKind, ClearValues, CopySource, CullMode, DepthBias, DrawArgs,
    Driver, Features, Format, FrontFace, GPUError, HostRaytracingShader, HostShader, IndexType, InstanceDesc, Layout,
    NativeShaderCode, NativeShaderInfo, PassTarget, PipelineState, Ray, RayHit, RaygenContext, ResourceBinding,
    Result, SamplerState, Scissor, ShaderResources, Topology, TopologyKind, TextureDesc, TextureKind, TextureRegion,
    VertexLayout, VertexOutput, VertexInput, Viewport,
};

pub enum SoftTexture {
    Color(Rc<RefCell<Image>>),
    DepthStencil(Rc<RefCell<DepthStencil>>),
}

impl SoftTexture {
    fn color(&self) -> &Rc<RefCell<Image>> {
        match self {
            SoftTexture::Color(image) => image,
            SoftTexture::DepthStencil(_) => panic!("depth-stencil texture used as a color image"),
        }
    }

    fn depth_stencil(&self) -> &Rc<RefCell<DepthStencil>> {
        match self {
            SoftTexture::DepthStencil(ds) => ds,
            SoftTexture::Color(_) => panic!("color texture used as a depth-stencil attachment"),
        }
    }
}

pub type SoftBuffer = Rc<RefCell<Vec<u8>>>;

pub enum SoftProgram {
    Graphics {
        shader: Arc<dyn HostShader>,
        vertex_layout: VertexLayout,
    },
    Raytracing(Arc<dyn HostRaytracingShader>),
}

pub struct SoftPipeline {
    program: Rc<SoftProgram>,
    state: Option<PipelineState>,
}

pub struct SoftCommandList {
    frame: usize,
    commands: Vec<Command>,
}

#[derive(Clone)]
enum Bound {
    Texture(Rc<RefCell<Image>>, SamplerState),
    StorageImage(Rc<RefCell<Image>>),
    Buffer(SoftBuffer),
    Structure(Rc<Accel>),
}

enum Command {
    BeginPass {
        color: Rc<RefCell<Image>>,
        depth_stencil: Rc<RefCell<DepthStencil>>,
    },
    EndPass,
    BindPipeline(BindPoint, Rc<SoftPipeline>),
    BindResources(BindPoint, Vec<(u32, Bound)>),
    BindVertexBuffer(SoftBuffer),
    BindIndexBuffer(SoftBuffer, IndexType),
    SetTopology(Topology),
    SetViewport(Viewport),
    SetScissor(Scissor),
    SetCullMode(CullMode),
    SetFrontFace(FrontFace),
    SetDepthBias(Option<DepthBias>),
    Clear {
        color: Option<[f32; 4]>,
        depth: Option<f32>,
        stencil: Option<u8>,
    },
    Draw { args: DrawArgs, indexed: bool },
    DispatchRays(Rc<SoftPipeline>, [u32; 3]),
    UpdateBuffer(SoftBuffer, u64, Vec<u8>),
    CopyBuffer {
        src: SoftBuffer,
        dst: SoftBuffer,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture(SoftBuffer, Rc<RefCell<Image>>, TextureRegion),
    CopyTexture {
        src: Rc<RefCell<Image>>,
        src_offset: [u32; 2],
        dst: Rc<RefCell<Image>>,
        dst_offset: [u32; 2],
        size: [u32; 2],
    },
    GenerateMips(Rc<RefCell<Image>>),
}

pub struct SoftwareDriver {
    backbuffer: Rc<RefCell<Image>>,
    backbuffer_depth: Rc<RefCell<DepthStencil>>,
    vsync: bool,
}

impl SoftwareDriver {
    pub fn new(width: u32, height: u32) -> Self {
        log::info!("software backend: {}x{} backbuffer", width, height);
        Self {
            backbuffer: Rc::new(RefCell::new(Image::new(width, height, Format::Byte4, 1))),
            backbuffer_depth: Rc::new(RefCell::new(DepthStencil::new(width, height))),
            vsync: false,
        }
    }

    pub fn supported_features() -> Features {
        Features::RAYTRACING
    }

    /// Tightly packed RGBA8 contents of the backbuffer.
    pub fn backbuffer_pixels(&self) -> Vec<u8> {
        self.backbuffer.borrow().read()
    }

    pub fn is_vsync_enabled(&self) -> bool {
        self.vsync
    }

    fn push(cmd: &mut SoftCommandList, command: Command) {
        cmd.commands.push(command);
    }
}

/// Resources visible to a program for one draw or dispatch. Textures are
/// borrowed on access so a stale slot never conflicts with the target.
#[derive(Default)]
struct BoundResources<'a> {
    buffers: BTreeMap<u32, Ref<'a, Vec<u8>>>,
    textures: BTreeMap<u32, (&'a RefCell<Image>, SamplerState)>,
    storage_images: BTreeMap<u32, &'a RefCell<Image>>,
    structures: BTreeMap<u32, &'a Accel>,
}

impl<'a> BoundResources<'a> {
    fn new(bindings: &'a BTreeMap<u32, Bound>) -> Self {
        let mut view = Self::default();
        for (&binding, bound) in bindings {
            match bound {
                Bound::Texture(image, sampler) => {
                    view.textures.insert(binding, (image.as_ref(), *sampler));
                }
                Bound::StorageImage(image) => {
                    view.storage_images.insert(binding, image.as_ref());
                }
                Bound::Buffer(buffer) => {
                    view.buffers.insert(binding, buffer.borrow());
                }
                Bound::Structure(structure) => {
                    view.structures.insert(binding, structure.as_ref());
                }
            }
        }
        view
    }
}

impl ShaderResources for BoundResources<'_> {
    fn uniform(&self, binding: u32) -> Option<&[u8]> {
        self.buffers.get(&binding).map(|b| b.as_slice())
    }

    fn storage(&self, binding: u32) -> Option<&[u8]> {
        self.buffers.get(&binding).map(|b| b.as_slice())
    }

    fn sample(&self, binding: u32, uv: [f32; 2]) -> [f32; 4] {
        self.textures
            .get(&binding)
            .map_or([0.0; 4], |(image, sampler)| image.borrow().sample(uv, sampler))
    }

    fn image_store(&self, binding: u32, coord: [u32; 2], value: [f32; 4]) {
        if let Some(image) = self.storage_images.get(&binding) {
            let mut image = image.borrow_mut();
            if coord[0] < image.width && coord[1] < image.height {
                image.store(0, coord[0], coord[1], value);
            }
        }
    }

    fn intersect(&self, binding: u32, ray: &Ray) -> Option<RayHit> {
        self.structures.get(&binding)?.intersect(ray)
    }
}

/// Replays a command list.
#[derive(Default)]
struct Executor {
    pass: Option<(Rc<RefCell<Image>>, Rc<RefCell<DepthStencil>>)>,
    graphics: Option<Rc<SoftPipeline>>,
    graphics_bindings: BTreeMap<u32, Bound>,
    raytracing_bindings: BTreeMap<u32, Bound>,
    vertex_buffer: Option<SoftBuffer>,
    index_buffer: Option<(SoftBuffer, IndexType)>,
    topology: Topology,
    viewport: Option<Viewport>,
    scissor: Option<Scissor>,
    cull_mode: CullMode,
    front_face: FrontFace,
    depth_bias: Option<DepthBias>,
}

fn read_index(data: &[u8], index_type: IndexType, at: usize) -> Option<u32> {
    match index_type {
        IndexType::U16 => data
            .get(at * 2..at * 2 + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as u32),
        IndexType::U32 => data
            .get(at * 4..at * 4 + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    }
}

fn fetch_attributes(layout: &VertexLayout, data: Option<&[u8]>, vertex: u32, out: &mut Vec<[f32; 4]>) {
    out.clear();
    for attribute in &layout.attributes {
        let location = attribute.location as usize;
        if out.len() <= location {
            out.resize(location + 1, [0.0, 0.0, 0.0, 1.0]);
        }
        let base = vertex as usize * layout.stride as usize + attribute.offset as usize;
        let size = attribute.format.bytes_per_pixel() as usize;
        if let Some(bytes) = data.and_then(|d| d.get(base..base + size)) {
            out[location] = decode_texel(attribute.format, bytes);
        }
    }
}

impl Executor {
    fn run(&mut self, command: Command) {
        match command {
            Command::BeginPass { color, depth_stencil } => self.pass = Some((color, depth_stencil)),
            Command::EndPass => self.pass = None,
            Command::BindPipeline(BindPoint::Graphics, pipeline) => self.graphics = Some(pipeline),
            // Dispatches carry their pipeline.
            Command::BindPipeline(BindPoint::Raytracing, _) => {}
            Command::BindResources(bind_point, bindings) => {
                let slots = match bind_point {
                    BindPoint::Graphics => &mut self.graphics_bindings,
                    BindPoint::Raytracing => &mut self.raytracing_bindings,
                };
                slots.extend(bindings);
            }
            Command::BindVertexBuffer(buffer) => self.vertex_buffer = Some(buffer),
            Command::BindIndexBuffer(buffer, index_type) => self.index_buffer = Some((buffer, index_type)),
            Command::SetTopology(topology) => self.topology = topology,
            Command::SetViewport(viewport) => self.viewport = Some(viewport),
            Command::SetScissor(scissor) => self.scissor = Some(scissor),
            Command::SetCullMode(cull_mode) => self.cull_mode = cull_mode,
            Command::SetFrontFace(front_face) => self.front_face = front_face,
            Command::SetDepthBias(bias) => self.depth_bias = bias,
            Command::Clear { color, depth, stencil } => self.clear(color, depth, stencil),
            Command::Draw { args, indexed } => self.draw(args, indexed),
            Command::DispatchRays(pipeline, size) => self.dispatch_rays(&pipeline, size),
            Command::UpdateBuffer(buffer, offset, data) => {
                let offset = offset as usize;
                buffer.borrow_mut()[offset..offset + data.len()].copy_from_slice(&data);
            }
            Command::CopyBuffer {
                src,
                dst,
                dst_offset,
                size,
            } => {
                let (offset, size) = (dst_offset as usize, size as usize);
                let src = src.borrow();
                dst.borrow_mut()[offset..offset + size].copy_from_slice(&src[..size]);
            }
            Command::CopyBufferToTexture(src, dst, region) => {
                dst.borrow_mut().write_region(&region, &src.borrow());
            }
            Command::CopyTexture {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let texels: Vec<[f32; 4]> = {
                    let src = src.borrow();
                    (0..size[1])
                        .flat_map(|y| (0..size[0]).map(move |x| (x, y)))
                        .map(|(x, y)| src.load(0, src_offset[0] + x, src_offset[1] + y))
                        .collect()
                };
                let mut dst = dst.borrow_mut();
                for (i, texel) in texels.into_iter().enumerate() {
                    let (x, y) = (i as u32 % size[0], i as u32 / size[0]);
                    dst.store(0, dst_offset[0] + x, dst_offset[1] + y, texel);
                }
            }
            Command::GenerateMips(image) => image.borrow_mut().generate_mips(),
        }
    }

    fn clear(&self, color: Option<[f32; 4]>, depth: Option<f32>, stencil: Option<u8>) {
        let Some((target, ds)) = &self.pass else {
            log::warn!("software: clear outside of a pass ignored");
            return;
        };
        if let Some(color) = color {
            target.borrow_mut().clear(color);
        }
        let mut ds = ds.borrow_mut();
        if let Some(depth) = depth {
            ds.depth.fill(depth);
        }
        if let Some(stencil) = stencil {
            ds.stencil.fill(stencil);
        }
    }

    fn draw(&self, args: DrawArgs, indexed: bool) {
        let (Some(pipeline), Some((color, ds))) = (&self.graphics, &self.pass) else {
            log::warn!("software: draw without a pipeline or pass ignored");
            return;
        };
        let (SoftProgram::Graphics { shader, vertex_layout }, Some(state)) =
            (pipeline.program.as_ref(), &pipeline.state)
        else {
            return;
        };

        let vertices: Vec<u32> = if indexed {
            let Some((buffer, index_type)) = &self.index_buffer else {
                log::warn!("software: indexed draw without an index buffer ignored");
                return;
            };
            let data = buffer.borrow();
            (args.offset..args.offset + args.count)
                .map_while(|i| read_index(&data, *index_type, i as usize))
                .collect()
        } else {
            (args.offset..args.offset + args.count).collect()
        };

        let resources = BoundResources::new(&self.graphics_bindings);
        let vertex_data = self.vertex_buffer.as_ref().map(|b| b.borrow());
        let mut color = color.borrow_mut();
        let mut ds = ds.borrow_mut();
        let (width, height) = (color.width, color.height);
        let raster = Raster {
            viewport: self.viewport.unwrap_or_else(|| Viewport::full(width, height)),
            scissor: self.scissor.unwrap_or_else(|| Scissor::full(width, height)),
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            depth_bias: self.depth_bias,
            blend: state.blend,
            depth: state.depth,
            stencil: state.stencil,
        };
        let program = Program {
            shader: shader.as_ref(),
            resources: &resources,
        };
        let mut target = Target {
            color: &mut *color,
            depth_stencil: Some(&mut *ds),
        };

        let mut attributes = Vec::new();
        for instance in 0..args.instance_count {
            let mut outputs: HashMap<u32, VertexOutput> = HashMap::new();
            for &vertex in &vertices {
                outputs.entry(vertex).or_insert_with(|| {
                    fetch_attributes(vertex_layout, vertex_data.as_deref().map(|d| d.as_slice()), vertex, &mut attributes);
                    shader.vertex(&VertexInput {
                        vertex_index: vertex,
                        instance_index: instance,
                        attributes: &attributes,
                        resources: &resources,
                    })
                });
            }
            let out = |i: usize| &outputs[&vertices[i]];

            match (self.topology.kind(), self.topology) {
                (TopologyKind::Point, _) => {
                    for i in 0..vertices.len() {
                        raster.draw_point(&mut target, &program, out(i));
                    }
                }
                (TopologyKind::Line, Topology::LineStrip) => {
                    for i in 1..vertices.len() {
                        raster.draw_line(&mut target, &program, [out(i - 1), out(i)]);
                    }
                }
                (TopologyKind::Line, _) => {
                    for i in (0..vertices.len() / 2 * 2).step_by(2) {
                        raster.draw_line(&mut target, &program, [out(i), out(i + 1)]);
                    }
                }
                (TopologyKind::Triangle, Topology::TriangleStrip) => {
                    for i in 2..vertices.len() {
                        // Odd triangles swap their first two vertices to keep winding.
                        let tri = if i % 2 == 0 {
                            [out(i - 2), out(i - 1), out(i)]
                        } else {
                            [out(i - 1), out(i - 2), out(i)]
                        };
                        raster.draw_triangle(&mut target, &program, tri);
                    }
                }
                (TopologyKind::Triangle, _) => {
                    for i in (0..vertices.len() / 3 * 3).step_by(3) {
                        raster.draw_triangle(&mut target, &program, [out(i), out(i + 1), out(i + 2)]);
                    }
                }
            }
        }
    }

    fn dispatch_rays(&self, pipeline: &SoftPipeline, size: [u32; 3]) {
        let SoftProgram::Raytracing(program) = pipeline.program.as_ref() else {
            return;
        };
        let resources = BoundResources::new(&self.raytracing_bindings);
        for z in 0..size[2] {
            for y in 0..size[1] {
                for x in 0..size[0] {
                    program.raygen(&RaygenContext {
                        launch_id: [x, y, z],
                        launch_size: size,
                        resources: &resources,
                        program: program.as_ref(),
                    });
                }
            }
        }
    }
}

impl Driver for SoftwareDriver {
    type Texture = SoftTexture;
    type Buffer = SoftBuffer;
    type Shader = Rc<SoftProgram>;
    type Pipeline = Rc<SoftPipeline>;
    type Sampler = SamplerState;
    type AccelerationStructure = Rc<Accel>;
    type CommandList = SoftCommandList;

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn features(&self) -> Features {
        Self::supported_features()
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        let image = self.backbuffer.borrow();
        (image.width, image.height)
    }

    fn backbuffer_format(&self) -> Format {
        Format::Byte4
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Self::Texture> {
        Ok(match desc.kind {
            TextureKind::DepthStencil => {
                SoftTexture::DepthStencil(Rc::new(RefCell::new(DepthStencil::new(desc.width, desc.height))))
            }
            TextureKind::Sampled | TextureKind::RenderTarget => SoftTexture::Color(Rc::new(RefCell::new(
                Image::new(desc.width, desc.height, desc.format, desc.mip_levels),
            ))),
        })
    }

    fn destroy_texture(&mut self, _texture: Self::Texture) {}

    fn create_buffer(&mut self, _kind: BufferKind, size: u64) -> Result<Self::Buffer> {
        Ok(Rc::new(RefCell::new(vec![0; size as usize])))
    }

    fn create_staging_buffer(&mut self, data: &[u8]) -> Result<Self::Buffer> {
        Ok(Rc::new(RefCell::new(data.to_vec())))
    }

    fn destroy_buffer(&mut self, _buffer: Self::Buffer) {}

    fn create_shader(&mut self, info: &NativeShaderInfo<'_>) -> Result<Self::Shader> {
        let program = match &info.code {
            NativeShaderCode::Host(shader) => SoftProgram::Graphics {
                shader: Arc::clone(shader),
                vertex_layout: info.vertex_layout.clone(),
            },
            NativeShaderCode::HostRaytracing(shader) => SoftProgram::Raytracing(Arc::clone(shader)),
            NativeShaderCode::Spirv(_) => return Err(GPUError::UnsupportedShaderCode(BackendType::Software)),
        };
        log::debug!("software: created program '{}'", info.debug_name);
        Ok(Rc::new(program))
    }

    fn destroy_shader(&mut self, _shader: Self::Shader) {}

    fn create_pipeline(&mut self, shader: &Self::Shader, state: &PipelineState) -> Result<Self::Pipeline> {
        if !matches!(shader.as_ref(), SoftProgram::Graphics { .. }) {
            return Err(GPUError::Shader("raytracing program used as a graphics pipeline".into()));
        }
        Ok(Rc::new(SoftPipeline {
            program: Rc::clone(shader),
            state: Some(*state),
        }))
    }

    fn create_raytracing_pipeline(&mut self, shader: &Self::Shader) -> Result<Self::Pipeline> {
        if !matches!(shader.as_ref(), SoftProgram::Raytracing(_)) {
            return Err(GPUError::Shader("graphics program used as a raytracing pipeline".into()));
        }
        Ok(Rc::new(SoftPipeline {
            program: Rc::clone(shader),
            state: None,
        }))
    }

    fn destroy_pipeline(&mut self, _pipeline: Self::Pipeline) {}

    fn create_sampler(&mut self, state: &SamplerState) -> Result<Self::Sampler> {
        Ok(*state)
    }

    fn destroy_sampler(&mut self, _sampler: Self::Sampler) {}

    fn create_bottom_level(&mut self, vertices: &[[f32; 3]], indices: &[u32]) -> Result<Self::AccelerationStructure> {
        Ok(Rc::new(Accel::triangles(vertices, indices)))
    }

    fn create_top_level(&mut self, instances: &[InstanceDesc<'_, Self>]) -> Result<Self::AccelerationStructure> {
        let instances = instances
            .iter()
            .map(|desc| {
                let inverse = invert_affine(&desc.transform);
                if inverse.is_none() {
                    log::warn!("software: singular instance transform, instance will never be hit");
                }
                Instance {
                    blas: Rc::clone(desc.blas),
                    inverse,
                }
            })
            .collect();
        Ok(Rc::new(Accel::Top { instances }))
    }

    fn destroy_acceleration_structure(&mut self, _structure: Self::AccelerationStructure) {}

    fn create_command_list(&mut self, frame: usize) -> Result<Self::CommandList> {
        Ok(SoftCommandList {
            frame,
            commands: Vec::new(),
        })
    }

    fn destroy_command_list(&mut self, _cmd: Self::CommandList) {}

    fn begin(&mut self, cmd: &mut Self::CommandList) -> Result<()> {
        cmd.commands.clear();
        Ok(())
    }

    fn submit(&mut self, cmd: &mut Self::CommandList, present: bool) -> Result<()> {
        log::trace!(
            "software: frame slot {} executing {} commands (present: {})",
            cmd.frame,
            cmd.commands.len(),
            present
        );
        let mut executor = Executor::default();
        for command in cmd.commands.drain(..) {
            executor.run(command);
        }
        Ok(())
    }

    fn wait(&mut self, _cmd: &mut Self::CommandList) -> Result<()> {
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.backbuffer = Rc::new(RefCell::new(Image::new(width, height, Format::Byte4, 1)));
        self.backbuffer_depth = Rc::new(RefCell::new(DepthStencil::new(width, height)));
        Ok(())
    }

    fn set_vsync(&mut self, vsync: bool) -> Result<()> {
        if vsync {
            log::warn!("software: vsync requested but frames are never paced");
        }
        self.vsync = vsync;
        Ok(())
    }

    fn read_texture(&mut self, texture: &Self::Texture, width: u32, height: u32, format: Format) -> Result<Vec<u8>> {
        let image = texture.color().borrow();
        debug_assert_eq!((image.width, image.height, image.format), (width, height, format));
        Ok(image.read())
    }

    fn cmd_begin_pass(&mut self, cmd: &mut Self::CommandList, target: PassTarget<'_, Self>) {
        let (color, depth_stencil) = match target {
            PassTarget::Backbuffer => (Rc::clone(&self.backbuffer), Rc::clone(&self.backbuffer_depth)),
            PassTarget::Texture {
                color, depth_stencil, ..
            } => (Rc::clone(color.color()), Rc::clone(depth_stencil.depth_stencil())),
        };
        Self::push(cmd, Command::BeginPass { color, depth_stencil });
    }

    fn cmd_end_pass(&mut self, cmd: &mut Self::CommandList) {
        Self::push(cmd, Command::EndPass);
    }

    // Layouts only matter to GPU memory; the CPU image is always coherent.
    fn cmd_transition(&mut self, _cmd: &mut Self::CommandList, _texture: &Self::Texture, _from: Layout, _to: Layout) {}

    fn cmd_bind_pipeline(&mut self, cmd: &mut Self::CommandList, bind_point: BindPoint, pipeline: &Self::Pipeline) {
        Self::push(cmd, Command::BindPipeline(bind_point, Rc::clone(pipeline)));
    }

    fn cmd_bind_resources(
        &mut self,
        cmd: &mut Self::CommandList,
        bind_point: BindPoint,
        _pipeline: &Self::Pipeline,
        bindings: &[ResourceBinding<'_, Self>],
    ) {
        let bindings = bindings
            .iter()
            .map(|b| {
                let bound = match &b.resource {
                    BoundResource::Texture { texture, sampler } => Bound::Texture(Rc::clone(texture.color()), **sampler),
                    BoundResource::StorageImage(texture) => Bound::StorageImage(Rc::clone(texture.color())),
                    BoundResource::UniformBuffer(buffer) | BoundResource::StorageBuffer(buffer) => {
                        Bound::Buffer(Rc::clone(buffer))
                    }
                    BoundResource::AccelerationStructure(structure) => Bound::Structure(Rc::clone(structure)),
                };
                (b.binding, bound)
            })
            .collect();
        Self::push(cmd, Command::BindResources(bind_point, bindings));
    }

    fn cmd_bind_vertex_buffer(&mut self, cmd: &mut Self::CommandList, buffer: &Self::Buffer) {
        Self::push(cmd, Command::BindVertexBuffer(Rc::clone(buffer)));
    }

    fn cmd_bind_index_buffer(&mut self, cmd: &mut Self::CommandList, buffer: &Self::Buffer, index_type: IndexType) {
        Self::push(cmd, Command::BindIndexBuffer(Rc::clone(buffer), index_type));
    }

    fn cmd_set_topology(&mut self, cmd: &mut Self::CommandList, topology: Topology) {
        Self::push(cmd, Command::SetTopology(topology));
    }

    fn cmd_set_viewport(&mut self, cmd: &mut Self::CommandList, viewport: &Viewport) {
        Self::push(cmd, Command::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&mut self, cmd: &mut Self::CommandList, scissor: &Scissor) {
        Self::push(cmd, Command::SetScissor(*scissor));
    }

    fn cmd_set_cull_mode(&mut self, cmd: &mut Self::CommandList, cull_mode: CullMode) {
        Self::push(cmd, Command::SetCullMode(cull_mode));
    }

    fn cmd_set_front_face(&mut self, cmd: &mut Self::CommandList, front_face: FrontFace) {
        Self::push(cmd, Command::SetFrontFace(front_face));
    }

    fn cmd_set_depth_bias(&mut self, cmd: &mut Self::CommandList, bias: Option<DepthBias>) {
        Self::push(cmd, Command::SetDepthBias(bias));
    }

    fn cmd_clear(&mut self, cmd: &mut Self::CommandList, values: &ClearValues) {
        Self::push(
            cmd,
            Command::Clear {
                color: values.color,
                depth: values.depth,
                stencil: values.stencil,
            },
        );
    }

    fn cmd_draw(&mut self, cmd: &mut Self::CommandList, args: DrawArgs) {
        Self::push(cmd, Command::Draw { args, indexed: false });
    }

    fn cmd_draw_indexed(&mut self, cmd: &mut Self::CommandList, args: DrawArgs) {
        Self::push(cmd, Command::Draw { args, indexed: true });
    }

    fn cmd_dispatch_rays(&mut self, cmd: &mut Self::CommandList, pipeline: &Self::Pipeline, size: [u32; 3]) {
        Self::push(cmd, Command::DispatchRays(Rc::clone(pipeline), size));
    }

    fn cmd_update_buffer(&mut self, cmd: &mut Self::CommandList, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        Self::push(cmd, Command::UpdateBuffer(Rc::clone(buffer), offset, data.to_vec()));
    }

    fn cmd_copy_buffer(&mut self, cmd: &mut Self::CommandList, src: &Self::Buffer, dst: &Self::Buffer, dst_offset: u64, size: u64) {
        Self::push(
            cmd,
            Command::CopyBuffer {
                src: Rc::clone(src),
                dst: Rc::clone(dst),
                dst_offset,
                size,
            },
        );
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        cmd: &mut Self::CommandList,
        src: &Self::Buffer,
        dst: &Self::Texture,
        region: &TextureRegion,
    ) {
        Self::push(cmd, Command::CopyBufferToTexture(Rc::clone(src), Rc::clone(dst.color()), *region));
    }

    fn cmd_copy_to_texture(
        &mut self,
        cmd: &mut Self::CommandList,
        src: CopySource<'_, Self>,
        src_offset: [u32; 2],
        dst: &Self::Texture,
        dst_offset: [u32; 2],
        size: [u32; 2],
    ) {
        let src = match src {
            CopySource::Backbuffer => Rc::clone(&self.backbuffer),
            CopySource::Texture(texture) => Rc::clone(texture.color()),
        };
        Self::push(
            cmd,
            Command::CopyTexture {
                src,
                src_offset,
                dst: Rc::clone(dst.color()),
                dst_offset,
                size,
            },
        );
    }

    fn cmd_generate_mips(&mut self, cmd: &mut Self::CommandList, texture: &Self::Texture, _width: u32, _height: u32, _mip_levels: u32) {
        Self::push(cmd, Command::GenerateMips(Rc::clone(texture.color())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{FragmentInput, Reflection};
    use smallvec::smallvec;

    /// Passes clip-space position through and paints a constant.
    struct Solid([f32; 4]);

    impl HostShader for Solid {
        fn vertex(&self, input: &VertexInput<'_>) -> VertexOutput {
            let p = input.attribute(0);
            VertexOutput {
                position: [p[0], p[1], 0.0, 1.0],
                varyings: smallvec![],
            }
        }

        fn fragment(&self, _: &FragmentInput<'_>) -> Option<[f32; 4]> {
            Some(self.0)
        }
    }

    fn record(driver: &mut SoftwareDriver, f: impl FnOnce(&mut SoftwareDriver, &mut SoftCommandList)) {
        let mut cmd = driver.create_command_list(0).unwrap();
        driver.begin(&mut cmd).unwrap();
        f(driver, &mut cmd);
        driver.submit(&mut cmd, false).unwrap();
    }

    #[test]
    fn spirv_is_rejected() {
        let mut driver = SoftwareDriver::new(4, 4);
        let words = [0x0723_0203u32];
        let err = driver
            .create_shader(&NativeShaderInfo {
                debug_name: "spirv",
                vertex_layout: &VertexLayout::default(),
                reflection: &Reflection::default(),
                code: NativeShaderCode::Spirv(vec![(crate::gpu::ShaderStage::Vertex, &words[..])]),
            })
            .err();
        assert!(matches!(err, Some(GPUError::UnsupportedShaderCode(BackendType::Software))));
    }

    #[test]
    fn clear_then_draw_into_backbuffer() {
        let mut driver = SoftwareDriver::new(4, 4);
        let host: Arc<dyn HostShader> = Arc::new(Solid([1.0, 0.0, 0.0, 1.0]));
        let layout = VertexLayout::packed(&[Format::Float2]);
        let shader = driver
            .create_shader(&NativeShaderInfo {
                debug_name: "solid",
                vertex_layout: &layout,
                reflection: &Reflection::default(),
                code: NativeShaderCode::Host(&host),
            })
            .unwrap();
        let state = PipelineState {
            shader: crate::gpu::ShaderId::new(0, 0),
            topology: TopologyKind::Triangle,
            color_target: crate::gpu::TargetFormat::Backbuffer,
            blend: None,
            depth: None,
            stencil: None,
        };
        let pipeline = driver.create_pipeline(&shader, &state).unwrap();
        // Left half of the screen.
        let quad: [[f32; 2]; 6] = [[-1.0, -1.0], [0.0, -1.0], [0.0, 1.0], [-1.0, -1.0], [0.0, 1.0], [-1.0, 1.0]];
        let vertices = driver.create_staging_buffer(bytemuck::cast_slice(&quad)).unwrap();

        record(&mut driver, |d, cmd| {
            d.cmd_begin_pass(cmd, PassTarget::Backbuffer);
            d.cmd_clear(
                cmd,
                &ClearValues {
                    color: Some([0.0, 0.0, 1.0, 1.0]),
                    depth: Some(1.0),
                    stencil: Some(0),
                },
            );
            d.cmd_bind_pipeline(cmd, BindPoint::Graphics, &pipeline);
            d.cmd_bind_vertex_buffer(cmd, &vertices);
            d.cmd_draw(
                cmd,
                DrawArgs {
                    count: 6,
                    offset: 0,
                    instance_count: 1,
                },
            );
            d.cmd_end_pass(cmd);
        });

        let pixels = driver.backbuffer_pixels();
        assert_eq!(&pixels[0..4], &[255, 0, 0, 255]);
        assert_eq!(&pixels[12..16], &[0, 0, 255, 255]);
    }

    #[test]
    fn buffer_updates_and_copies_run_in_order() {
        let mut driver = SoftwareDriver::new(1, 1);
        let dst = driver.create_buffer(BufferKind::Uniform, 8).unwrap();
        let staging = driver.create_staging_buffer(&[9, 9, 9, 9]).unwrap();
        record(&mut driver, |d, cmd| {
            d.cmd_update_buffer(cmd, &dst, 0, &[1, 2, 3, 4]);
            d.cmd_copy_buffer(cmd, &staging, &dst, 4, 4);
        });
        assert_eq!(*dst.borrow(), vec![1, 2, 3, 4, 9, 9, 9, 9]);
    }

    #[test]
    fn indices_decode_little_endian() {
        let data = [1u8, 0, 2, 0];
        assert_eq!(read_index(&data, IndexType::U16, 1), Some(2));
        assert_eq!(read_index(&data, IndexType::U32, 0), Some(0x0002_0001));
        assert_eq!(read_index(&data, IndexType::U32, 1), None);
    }
}
