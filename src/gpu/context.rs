use std::rc::Rc;
use std::sync::Arc;

use super::backend::{AccelerationInstance, Backend, BufferDesc, RetireQueue, Retired};
use super::cache::ObjectCache;
use super::frame::{FrameRing, Recycled, Staged};
use super::recorder::{PassTargetId, Recorder};
use super::shader::spirv;
use super::state::{DirtyFlags, PipelineState, RenderState, SamplerState, TargetFormat};
use super::{
    AccelerationStructureId, BackendType, BindPoint, BindingKind, BlendMode, BoundResource,
    BufferId, ClearValues, ContextInfo, CopySource, CullMode, DepthBias, DepthMode,
    DrawArgs, Driver, Features, Format, FrameState, FrontFace, GPUError, InstanceDesc, Layout,
    NativeShaderCode, NativeShaderInfo, PassTarget, RaytracingShaderCode, RaytracingShaderInfo,
    Reflection, ResourceBinding, Result, Sampler, Scissor, ShaderCode, ShaderCompiler, ShaderId,
    ShaderInfo, ShaderStage, Stats, StencilMode, TextureAddress, TextureDesc, TextureId,
    TextureInfo, TextureKind, TextureRegion, Topology, VertexLayout, Viewport,
};
use crate::utils::{Handle, Pool};

/// Buffer writes up to this size are recorded inline in the command list;
/// larger ones go through a staging buffer.
pub const INLINE_UPDATE_LIMIT: usize = 64 * 1024;

struct TextureRecord<D: Driver> {
    native: D::Texture,
    depth_stencil: Option<D::Texture>,
    info: TextureInfo,
}

struct BufferRecord<D: Driver> {
    native: D::Buffer,
    desc: BufferDesc,
}

struct ShaderRecord<D: Driver> {
    native: D::Shader,
    reflection: Reflection,
    vertex_layout: VertexLayout,
    raytracing: bool,
}

struct StructureRecord<D: Driver> {
    native: D::AccelerationStructure,
    top_level: bool,
}

fn texture_handle<D: Driver>(id: TextureId) -> Handle<TextureRecord<D>> {
    id.cast()
}

fn buffer_handle<D: Driver>(id: BufferId) -> Handle<BufferRecord<D>> {
    id.cast()
}

fn shader_handle<D: Driver>(id: ShaderId) -> Handle<ShaderRecord<D>> {
    id.cast()
}

fn structure_handle<D: Driver>(id: AccelerationStructureId) -> Handle<StructureRecord<D>> {
    id.cast()
}

fn texture_in<D: Driver>(pool: &Pool<TextureRecord<D>>, id: TextureId) -> &TextureRecord<D> {
    pool.get_ref(texture_handle::<D>(id))
        .unwrap_or_else(|| panic!("texture {:?} used after it was destroyed", id))
}

fn buffer_in<D: Driver>(pool: &Pool<BufferRecord<D>>, id: BufferId) -> &BufferRecord<D> {
    pool.get_ref(buffer_handle::<D>(id))
        .unwrap_or_else(|| panic!("buffer {:?} used after it was destroyed", id))
}

fn shader_in<D: Driver>(pool: &Pool<ShaderRecord<D>>, id: ShaderId) -> &ShaderRecord<D> {
    pool.get_ref(shader_handle::<D>(id))
        .unwrap_or_else(|| panic!("shader {:?} used after it was destroyed", id))
}

fn structure_in<D: Driver>(pool: &Pool<StructureRecord<D>>, id: AccelerationStructureId) -> &StructureRecord<D> {
    pool.get_ref(structure_handle::<D>(id))
        .unwrap_or_else(|| panic!("acceleration structure {:?} used after it was destroyed", id))
}

/// Backend-agnostic state tracker over one native [`Driver`].
///
/// `Set*` calls only touch [`RenderState`]. Draws resolve the dirty parts in
/// a fixed order (pipeline, bindings, vertex/index buffers, dynamic state,
/// render pass) and record only what changed.
pub struct Context<D: Driver> {
    driver: D,
    frames: FrameRing<D>,
    recorder: Recorder,
    state: RenderState,
    bound_pipeline: Option<PipelineState>,
    textures: Pool<TextureRecord<D>>,
    buffers: Pool<BufferRecord<D>>,
    shaders: Pool<ShaderRecord<D>>,
    structures: Pool<StructureRecord<D>>,
    pipelines: ObjectCache<PipelineState, D::Pipeline>,
    raytracing_pipelines: ObjectCache<ShaderId, D::Pipeline>,
    samplers: ObjectCache<SamplerState, D::Sampler>,
    retired: Rc<RetireQueue>,
    shader_compiler: Option<Arc<dyn ShaderCompiler>>,
    vsync: bool,
    stats: Stats,
}

impl<D: Driver> Context<D> {
    pub fn new(mut driver: D, info: &ContextInfo) -> Result<Self> {
        let missing = info.features - driver.features();
        if !missing.is_empty() {
            return Err(GPUError::UnsupportedFeature(missing));
        }
        let mut frames = FrameRing::new(&mut driver, info.frames_in_flight.max(1))?;
        frames.begin(&mut driver)?;
        if info.vsync {
            driver.set_vsync(true)?;
        }

        Ok(Self {
            driver,
            frames,
            recorder: Recorder::default(),
            state: RenderState::default(),
            bound_pipeline: None,
            textures: Pool::default(),
            buffers: Pool::default(),
            shaders: Pool::default(),
            structures: Pool::default(),
            pipelines: ObjectCache::default(),
            raytracing_pipelines: ObjectCache::default(),
            samplers: ObjectCache::default(),
            retired: Rc::new(RetireQueue::default()),
            shader_compiler: info.shader_compiler.clone(),
            vsync: info.vsync,
            stats: Stats::default(),
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn target_size(&self) -> (u32, u32) {
        match self.state.render_target {
            Some(id) => {
                let info = &texture_in(&self.textures, id).info;
                (info.width, info.height)
            }
            None => self.driver.backbuffer_size(),
        }
    }

    fn end_pass(&mut self) {
        let cmd = self.frames.commands();
        self.recorder.end_pass(&mut self.driver, cmd);
    }

    fn transition(&mut self, id: TextureId, to: Layout) {
        let record = texture_in(&self.textures, id);
        let cmd = self.frames.commands();
        self.recorder.transition(&mut self.driver, cmd, id, &record.native, to);
    }

    fn stage(&mut self, obj: Staged<D>) {
        self.frames.stage(obj);
    }

    fn account(&mut self, recycled: Recycled) {
        self.stats.fence_waits += recycled.fence_waits;
        self.stats.objects_destroyed += recycled.released;
    }

    /// Native command state does not survive a new command list.
    fn forget_committed_state(&mut self) {
        self.recorder.reset();
        self.state.invalidate();
        self.bound_pipeline = None;
    }

    fn reclaim(&mut self, item: Retired) {
        match item {
            Retired::Texture(id) => {
                if self.recorder.active() == Some(PassTargetId::Texture(id)) {
                    self.end_pass();
                }
                let Some(record) = self.textures.release(texture_handle::<D>(id)) else {
                    return;
                };
                self.state.forget_texture(id);
                self.recorder.forget(id);
                self.stage(Staged::Texture(record.native));
                if let Some(depth) = record.depth_stencil {
                    self.stage(Staged::Texture(depth));
                }
            }
            Retired::Buffer(id) => {
                let Some(record) = self.buffers.release(buffer_handle::<D>(id)) else {
                    return;
                };
                self.state.forget_buffer(id);
                self.stage(Staged::Buffer(record.native));
            }
            Retired::Shader(id) => {
                let Some(record) = self.shaders.release(shader_handle::<D>(id)) else {
                    return;
                };
                self.state.forget_shader(id);
                if self.bound_pipeline.map(|k| k.shader) == Some(id) {
                    self.bound_pipeline = None;
                }
                let evicted = self.pipelines.evict_where(|key| key.shader == id);
                log::debug!("shader {:?} destroyed, evicting {} pipelines", id, evicted.len());
                for pipeline in evicted {
                    self.stage(Staged::Pipeline(pipeline));
                }
                for pipeline in self.raytracing_pipelines.evict_where(|key| *key == id) {
                    self.stage(Staged::Pipeline(pipeline));
                }
                self.stage(Staged::Shader(record.native));
            }
            Retired::AccelerationStructure(id) => {
                let Some(record) = self.structures.release(structure_handle::<D>(id)) else {
                    return;
                };
                self.state.forget_acceleration_structure(id);
                self.stage(Staged::AccelerationStructure(record.native));
            }
        }
    }

    fn compile(&self, stage: ShaderStage, source: &str, defines: &[String]) -> Result<Vec<u32>> {
        let compiler = self
            .shader_compiler
            .as_ref()
            .ok_or(GPUError::MissingShaderCompiler)?;
        compiler.compile_glsl(stage, source, defines)
    }

    fn reflect_stages(stages: &[(ShaderStage, &[u32])]) -> Result<Reflection> {
        let mut reflection = Reflection::default();
        for (_, words) in stages {
            reflection.merge(spirv::reflect(words)?)?;
        }
        Ok(reflection)
    }

    fn current_pass_target(&self) -> PassTargetId {
        match self.state.render_target {
            Some(id) => PassTargetId::Texture(id),
            None => PassTargetId::Backbuffer,
        }
    }

    /// Opens a pass on the current render target unless one is open already.
    fn activate_pass(&mut self) {
        let wanted = self.current_pass_target();
        if self.recorder.active() == Some(wanted) {
            return;
        }
        self.end_pass();
        if let PassTargetId::Texture(id) = wanted {
            self.transition(id, Layout::ColorAttachment);
        }

        let Self {
            driver,
            frames,
            recorder,
            textures,
            ..
        } = self;
        let target = match wanted {
            PassTargetId::Backbuffer => PassTarget::Backbuffer,
            PassTargetId::Texture(id) => {
                let record = texture_in(textures, id);
                PassTarget::Texture {
                    color: &record.native,
                    depth_stencil: record
                        .depth_stencil
                        .as_ref()
                        .unwrap_or_else(|| panic!("texture {:?} is not a render target", id)),
                    width: record.info.width,
                    height: record.info.height,
                }
            }
        };
        recorder.begin_pass(driver, frames.commands(), wanted, target);
    }

    fn resolve_pipeline(&mut self, shader: ShaderId) -> Result<()> {
        if !self.state.dirty.contains(DirtyFlags::PIPELINE) {
            return Ok(());
        }
        let color_target = match self.state.render_target {
            Some(id) => TargetFormat::Texture(texture_in(&self.textures, id).info.format),
            None => TargetFormat::Backbuffer,
        };
        let key = PipelineState {
            shader,
            topology: self.state.topology.kind(),
            color_target,
            blend: self.state.blend_mode,
            depth: self.state.depth_mode,
            stencil: self.state.stencil_mode,
        };

        if self.bound_pipeline != Some(key) {
            let Self {
                driver,
                frames,
                shaders,
                pipelines,
                ..
            } = self;
            let record = shader_in(shaders, shader);
            let pipeline = pipelines.get_or_create(&key, |key| {
                log::debug!("pipeline cache miss: {:?}", key);
                driver.create_pipeline(&record.native, key)
            })?;
            driver.cmd_bind_pipeline(frames.commands(), BindPoint::Graphics, pipeline);
            self.bound_pipeline = Some(key);
            self.stats.pipeline_binds += 1;
        }
        self.state.dirty.remove(DirtyFlags::PIPELINE);
        Ok(())
    }

    fn ensure_sampler(&mut self) -> Result<SamplerState> {
        let key = self.state.sampler_state();
        let driver = &mut self.driver;
        self.samplers.get_or_create(&key, |key| {
            log::debug!("sampler cache miss: {:?}", key);
            driver.create_sampler(key)
        })?;
        Ok(key)
    }

    /// Puts every texture the shader reads into the layout its binding
    /// expects. Runs each draw, since writes and copies move layouts behind
    /// the bindings' back.
    fn prepare_texture_layouts(&mut self, reflection: &Reflection) {
        for binding in reflection.bindings.values() {
            let layout = match binding.kind {
                BindingKind::CombinedImageSampler => Layout::ShaderReadOnly,
                BindingKind::StorageImage => Layout::General,
                _ => continue,
            };
            if let Some(&id) = self.state.textures.get(&binding.binding) {
                assert!(
                    self.state.render_target != Some(id),
                    "texture {:?} is bound at binding {} while it is the render target",
                    id,
                    binding.binding
                );
                self.transition(id, layout);
            }
        }
    }

    fn push_bindings(
        &mut self,
        bind_point: BindPoint,
        pipeline_key: Option<PipelineState>,
        shader: ShaderId,
        reflection: &Reflection,
        only: Option<&[u32]>,
    ) -> Result<()> {
        let sampler_key = self.ensure_sampler()?;
        let Self {
            driver,
            frames,
            state,
            textures,
            buffers,
            structures,
            pipelines,
            raytracing_pipelines,
            samplers,
            ..
        } = self;

        let pipeline = match bind_point {
            BindPoint::Graphics => pipeline_key.and_then(|k| pipelines.get(&k)),
            BindPoint::Raytracing => raytracing_pipelines.get(&shader),
        };
        let Some(pipeline) = pipeline else {
            return Ok(());
        };
        let Some(sampler) = samplers.get(&sampler_key) else {
            return Ok(());
        };

        let mut bindings: Vec<ResourceBinding<'_, D>> = Vec::new();
        for binding in reflection.bindings.values() {
            if let Some(only) = only {
                if !only.contains(&binding.binding) {
                    continue;
                }
            }
            let index = binding.binding;
            let resource = match binding.kind {
                BindingKind::CombinedImageSampler | BindingKind::StorageImage => state
                    .textures
                    .get(&index)
                    .and_then(|id| textures.get_ref(texture_handle::<D>(*id)))
                    .map(|t| match binding.kind {
                        BindingKind::StorageImage => BoundResource::StorageImage(&t.native),
                        _ => BoundResource::Texture {
                            texture: &t.native,
                            sampler,
                        },
                    }),
                BindingKind::UniformBuffer => state
                    .uniform_buffers
                    .get(&index)
                    .and_then(|id| buffers.get_ref(buffer_handle::<D>(*id)))
                    .map(|b| BoundResource::UniformBuffer(&b.native)),
                BindingKind::StorageBuffer => state
                    .storage_buffers
                    .get(&index)
                    .and_then(|id| buffers.get_ref(buffer_handle::<D>(*id)))
                    .map(|b| BoundResource::StorageBuffer(&b.native)),
                BindingKind::AccelerationStructure => state
                    .acceleration_structures
                    .get(&index)
                    .and_then(|id| structures.get_ref(structure_handle::<D>(*id)))
                    .map(|a| BoundResource::AccelerationStructure(&a.native)),
            };
            match resource {
                Some(resource) => bindings.push(ResourceBinding {
                    binding: index,
                    resource,
                }),
                None => log::warn!(
                    "shader binding {} ('{}') has nothing bound",
                    index,
                    binding.name
                ),
            }
        }

        if !bindings.is_empty() {
            driver.cmd_bind_resources(frames.commands(), bind_point, pipeline, &bindings);
            self.stats.binding_updates += 1;
        }
        Ok(())
    }

    fn resolve_bindings(&mut self, shader: ShaderId, reflection: &Reflection) -> Result<()> {
        if self.state.dirty.contains(DirtyFlags::SAMPLER) {
            for binding in self.state.textures.keys() {
                self.state.dirty_bindings |= 1u64 << binding;
            }
            self.state.dirty.remove(DirtyFlags::SAMPLER);
            self.state.dirty.insert(DirtyFlags::BINDINGS);
        }
        if !self.state.dirty.contains(DirtyFlags::BINDINGS) {
            return Ok(());
        }
        let dirty = self.state.take_dirty_bindings();
        let key = self.bound_pipeline;
        self.push_bindings(BindPoint::Graphics, key, shader, reflection, Some(dirty.as_slice()))
    }

    fn resolve_vertex_input(&mut self, vertex_layout_used: bool, indexed: bool) {
        let Self {
            driver,
            frames,
            state,
            buffers,
            stats,
            ..
        } = self;

        if state.dirty.contains(DirtyFlags::VERTEX_BUFFER) {
            match state.vertex_buffer {
                Some(id) => {
                    let record = buffer_in(buffers, id);
                    driver.cmd_bind_vertex_buffer(frames.commands(), &record.native);
                    stats.vertex_buffer_binds += 1;
                    state.dirty.remove(DirtyFlags::VERTEX_BUFFER);
                }
                None => assert!(!vertex_layout_used, "draw without a vertex buffer bound"),
            }
        }

        if indexed && state.dirty.contains(DirtyFlags::INDEX_BUFFER) {
            let id = state.index_buffer.expect("indexed draw without an index buffer bound");
            let record = buffer_in(buffers, id);
            driver.cmd_bind_index_buffer(frames.commands(), &record.native, record.desc.index_type);
            stats.index_buffer_binds += 1;
            state.dirty.remove(DirtyFlags::INDEX_BUFFER);
        }
    }

    fn resolve_dynamic_state(&mut self) {
        let (width, height) = self.target_size();
        let Self {
            driver,
            frames,
            state,
            ..
        } = self;
        let cmd = frames.commands();
        let dirty = state.dirty;

        if dirty.contains(DirtyFlags::TOPOLOGY) {
            driver.cmd_set_topology(cmd, state.topology);
        }
        if dirty.contains(DirtyFlags::VIEWPORT) {
            let viewport = state.viewport.unwrap_or_else(|| Viewport::full(width, height));
            driver.cmd_set_viewport(cmd, &viewport);
        }
        if dirty.contains(DirtyFlags::SCISSOR) {
            let scissor = state
                .scissor
                .unwrap_or_else(|| Scissor::full(width, height))
                .clamped(width, height);
            driver.cmd_set_scissor(cmd, &scissor);
        }
        if dirty.contains(DirtyFlags::CULL_MODE) {
            driver.cmd_set_cull_mode(cmd, state.cull_mode);
        }
        if dirty.contains(DirtyFlags::FRONT_FACE) {
            driver.cmd_set_front_face(cmd, state.front_face);
        }
        if dirty.contains(DirtyFlags::DEPTH_BIAS) {
            driver.cmd_set_depth_bias(cmd, state.depth_bias);
        }
        state.dirty.remove(
            DirtyFlags::TOPOLOGY
                | DirtyFlags::VIEWPORT
                | DirtyFlags::SCISSOR
                | DirtyFlags::CULL_MODE
                | DirtyFlags::FRONT_FACE
                | DirtyFlags::DEPTH_BIAS,
        );
    }

    /// Brings the command list in line with [`RenderState`] ahead of a draw.
    fn prepare_draw(&mut self, indexed: bool) -> Result<()> {
        self.collect_retired();
        let shader = self.state.shader.expect("draw without a shader bound");
        let (reflection, uses_vertices) = {
            let record = shader_in(&self.shaders, shader);
            assert!(!record.raytracing, "raytracing shaders cannot be used for draws");
            (
                record.reflection.clone(),
                !record.vertex_layout.attributes.is_empty(),
            )
        };

        self.prepare_texture_layouts(&reflection);
        self.resolve_pipeline(shader)?;
        self.resolve_bindings(shader, &reflection)?;
        self.resolve_vertex_input(uses_vertices, indexed);
        self.resolve_dynamic_state();
        self.activate_pass();
        Ok(())
    }

    fn submit_and_wait(&mut self) -> Result<()> {
        self.end_pass();
        self.frames.submit(&mut self.driver, false)?;
        let recycled = self.frames.wait_all(&mut self.driver)?;
        self.account(recycled);
        self.frames.begin(&mut self.driver)?;
        self.forget_committed_state();
        Ok(())
    }

    fn stage_upload(&mut self, data: &[u8]) -> Result<D::Buffer> {
        self.stats.staging_uploads += 1;
        self.driver.create_staging_buffer(data)
    }
}

impl<D: Driver> Backend for Context<D> {
    fn backend_type(&self) -> BackendType {
        self.driver.backend_type()
    }

    fn features(&self) -> Features {
        self.driver.features()
    }

    fn width(&self) -> u32 {
        self.driver.backbuffer_size().0
    }

    fn height(&self) -> u32 {
        self.driver.backbuffer_size().1
    }

    fn backbuffer_format(&self) -> Format {
        self.driver.backbuffer_format()
    }

    fn is_vsync_enabled(&self) -> bool {
        self.vsync
    }

    fn stats(&self) -> Stats {
        Stats {
            frame_index: self.frames.index(),
            frames: self.frames.frame_number(),
            pipelines_created: self.pipelines.created() + self.raytracing_pipelines.created(),
            samplers_created: self.samplers.created(),
            render_passes: self.recorder.render_passes,
            layout_transitions: self.recorder.transitions,
            pending_destruction: self.frames.pending(),
            ..self.stats
        }
    }

    fn retire_queue(&self) -> Rc<RetireQueue> {
        self.retired.clone()
    }

    fn collect_retired(&mut self) {
        if self.retired.is_empty() {
            return;
        }
        for item in self.retired.take() {
            self.reclaim(item);
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.collect_retired();
        self.end_pass();
        self.frames.submit(&mut self.driver, false)?;
        let recycled = self.frames.wait_all(&mut self.driver)?;
        self.account(recycled);
        self.driver.wait_idle()?;
        self.driver.resize(width, height)?;
        log::info!("resized backbuffer to {}x{}", width, height);
        self.frames.begin(&mut self.driver)?;
        self.forget_committed_state();
        Ok(())
    }

    fn set_vsync(&mut self, vsync: bool) -> Result<()> {
        if self.vsync != vsync {
            self.driver.set_vsync(vsync)?;
            self.vsync = vsync;
        }
        Ok(())
    }

    fn set_topology(&mut self, topology: Topology) {
        self.state.set_topology(topology);
    }

    fn set_viewport(&mut self, viewport: Option<Viewport>) {
        self.state.set_viewport(viewport);
    }

    fn set_scissor(&mut self, scissor: Option<Scissor>) {
        self.state.set_scissor(scissor);
    }

    fn set_texture(&mut self, binding: u32, texture: TextureId) {
        self.state.set_texture(binding, texture);
    }

    fn set_render_target(&mut self, target: Option<TextureId>) {
        self.state.set_render_target(target);
    }

    fn set_shader(&mut self, shader: ShaderId) {
        self.state.set_shader(shader);
    }

    fn set_raytracing_shader(&mut self, shader: ShaderId) {
        self.state.set_raytracing_shader(shader);
    }

    fn set_vertex_buffer(&mut self, buffer: BufferId) {
        self.state.set_vertex_buffer(buffer);
    }

    fn set_index_buffer(&mut self, buffer: BufferId) {
        self.state.set_index_buffer(buffer);
    }

    fn set_uniform_buffer(&mut self, binding: u32, buffer: BufferId) {
        self.state.set_uniform_buffer(binding, buffer);
    }

    fn set_storage_buffer(&mut self, binding: u32, buffer: BufferId) {
        self.state.set_storage_buffer(binding, buffer);
    }

    fn set_acceleration_structure(&mut self, binding: u32, tlas: AccelerationStructureId) {
        self.state.set_acceleration_structure(binding, tlas);
    }

    fn set_blend_mode(&mut self, mode: Option<BlendMode>) {
        self.state.set_blend_mode(mode);
    }

    fn set_depth_mode(&mut self, mode: Option<DepthMode>) {
        self.state.set_depth_mode(mode);
    }

    fn set_stencil_mode(&mut self, mode: Option<StencilMode>) {
        self.state.set_stencil_mode(mode);
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.state.set_cull_mode(mode);
    }

    fn set_sampler(&mut self, sampler: Sampler) {
        self.state.set_sampler(sampler);
    }

    fn set_texture_address(&mut self, address: TextureAddress) {
        self.state.set_texture_address(address);
    }

    fn set_front_face(&mut self, face: FrontFace) {
        self.state.set_front_face(face);
    }

    fn set_depth_bias(&mut self, bias: Option<DepthBias>) {
        self.state.set_depth_bias(bias);
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>, stencil: Option<u8>) -> Result<()> {
        self.collect_retired();
        self.activate_pass();
        let values = ClearValues {
            color,
            depth,
            stencil,
        };
        self.driver.cmd_clear(self.frames.commands(), &values);
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, vertex_offset: u32, instance_count: u32) -> Result<()> {
        self.prepare_draw(false)?;
        let args = DrawArgs {
            count: vertex_count,
            offset: vertex_offset,
            instance_count,
        };
        self.driver.cmd_draw(self.frames.commands(), args);
        self.stats.draw_calls += 1;
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, index_offset: u32, instance_count: u32) -> Result<()> {
        self.prepare_draw(true)?;
        let args = DrawArgs {
            count: index_count,
            offset: index_offset,
            instance_count,
        };
        self.driver.cmd_draw_indexed(self.frames.commands(), args);
        self.stats.draw_calls += 1;
        Ok(())
    }

    fn dispatch_rays(&mut self, width: u32, height: u32, depth: u32) -> Result<()> {
        self.collect_retired();
        let shader = self
            .state
            .raytracing_shader
            .expect("dispatch_rays without a raytracing shader bound");
        let reflection = {
            let record = shader_in(&self.shaders, shader);
            assert!(record.raytracing, "dispatch_rays needs a raytracing shader");
            record.reflection.clone()
        };

        self.end_pass();
        self.prepare_texture_layouts(&reflection);
        {
            let Self {
                driver,
                shaders,
                raytracing_pipelines,
                ..
            } = self;
            let record = shader_in(shaders, shader);
            raytracing_pipelines.get_or_create(&shader, |_| {
                log::debug!("raytracing pipeline cache miss: {:?}", shader);
                driver.create_raytracing_pipeline(&record.native)
            })?;
        }
        // Ray dispatches rebind the full set; graphics bindings are untouched.
        self.push_bindings(BindPoint::Raytracing, None, shader, &reflection, None)?;

        let Self {
            driver,
            frames,
            raytracing_pipelines,
            stats,
            ..
        } = self;
        if let Some(pipeline) = raytracing_pipelines.get(&shader) {
            let cmd = frames.commands();
            driver.cmd_bind_pipeline(cmd, BindPoint::Raytracing, pipeline);
            driver.cmd_dispatch_rays(cmd, pipeline, [width, height, depth]);
            stats.pipeline_binds += 1;
        }
        Ok(())
    }

    fn read_pixels(&mut self, pos: [u32; 2], size: [u32; 2], dst: TextureId) -> Result<()> {
        self.collect_retired();
        let (width, height) = self.target_size();
        assert!(
            pos[0] + size[0] <= width && pos[1] + size[1] <= height,
            "read_pixels region exceeds the render target"
        );
        let dst_info = texture_in(&self.textures, dst).info;
        assert!(
            size[0] <= dst_info.width && size[1] <= dst_info.height,
            "read_pixels destination is too small"
        );
        let src_format = match self.state.render_target {
            Some(id) => texture_in(&self.textures, id).info.format,
            None => self.driver.backbuffer_format(),
        };
        assert_eq!(src_format, dst_info.format, "read_pixels format mismatch");

        self.end_pass();
        if let Some(src) = self.state.render_target {
            self.transition(src, Layout::TransferSrc);
        }
        self.transition(dst, Layout::TransferDst);

        let Self {
            driver,
            frames,
            state,
            textures,
            ..
        } = self;
        let src = match state.render_target {
            Some(id) => CopySource::Texture(&texture_in(textures, id).native),
            None => CopySource::Backbuffer,
        };
        let dst_native = &texture_in(textures, dst).native;
        driver.cmd_copy_to_texture(frames.commands(), src, pos, dst_native, [0, 0], size);
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.collect_retired();
        self.end_pass();
        self.frames.submit(&mut self.driver, true)?;
        let recycled = self.frames.advance(&mut self.driver)?;
        self.account(recycled);
        self.forget_committed_state();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.collect_retired();
        self.submit_and_wait()
    }

    fn create_texture(&mut self, info: &TextureInfo, render_target: bool) -> Result<TextureId> {
        if !info.format.is_texture_format() {
            return Err(GPUError::UnsupportedFormat(info.format));
        }
        assert!(info.width > 0 && info.height > 0, "texture dimensions must be non-zero");
        let native = self.driver.create_texture(&TextureDesc {
            width: info.width,
            height: info.height,
            format: info.format,
            mip_levels: info.mip_count(),
            kind: if render_target {
                TextureKind::RenderTarget
            } else {
                TextureKind::Sampled
            },
        })?;
        let depth_stencil = if render_target {
            Some(self.driver.create_texture(&TextureDesc {
                width: info.width,
                height: info.height,
                format: info.format,
                mip_levels: 1,
                kind: TextureKind::DepthStencil,
            })?)
        } else {
            None
        };
        let handle = self.textures.insert(TextureRecord {
            native,
            depth_stencil,
            info: *info,
        });
        Ok(handle.cast())
    }

    fn write_texture(&mut self, texture: TextureId, region: &TextureRegion, data: &[u8]) -> Result<()> {
        self.collect_retired();
        let info = texture_in(&self.textures, texture).info;
        assert!(region.mip_level < info.mip_count(), "mip level out of range");
        let mip_w = (info.width >> region.mip_level).max(1);
        let mip_h = (info.height >> region.mip_level).max(1);
        assert!(
            region.offset[0] + region.size[0] <= mip_w && region.offset[1] + region.size[1] <= mip_h,
            "texture write exceeds mip {} bounds",
            region.mip_level
        );
        assert_eq!(
            data.len(),
            (region.size[0] * region.size[1] * info.format.bytes_per_pixel()) as usize,
            "texture write data does not match the region size"
        );

        let staging = self.stage_upload(data)?;
        self.end_pass();
        self.transition(texture, Layout::TransferDst);
        let record = texture_in(&self.textures, texture);
        self.driver
            .cmd_copy_buffer_to_texture(self.frames.commands(), &staging, &record.native, region);
        self.stage(Staged::Buffer(staging));
        Ok(())
    }

    fn generate_mips(&mut self, texture: TextureId) -> Result<()> {
        self.collect_retired();
        let info = texture_in(&self.textures, texture).info;
        if info.mip_count() <= 1 {
            return Ok(());
        }
        self.end_pass();
        self.transition(texture, Layout::TransferDst);
        let record = texture_in(&self.textures, texture);
        self.driver.cmd_generate_mips(
            self.frames.commands(),
            &record.native,
            info.width,
            info.height,
            info.mip_count(),
        );
        self.recorder.set_layout(texture, Layout::ShaderReadOnly);
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<Vec<u8>> {
        self.collect_retired();
        self.end_pass();
        self.transition(texture, Layout::TransferSrc);
        self.submit_and_wait()?;
        let record = texture_in(&self.textures, texture);
        self.driver
            .read_texture(&record.native, record.info.width, record.info.height, record.info.format)
    }

    fn create_shader(&mut self, info: &ShaderInfo) -> Result<ShaderId> {
        let compiled;
        let (code, reflection) = match &info.code {
            ShaderCode::Host(program) => (NativeShaderCode::Host(program), program.reflection()),
            ShaderCode::Spirv { vertex, fragment } => {
                let stages = vec![
                    (ShaderStage::Vertex, vertex.as_slice()),
                    (ShaderStage::Fragment, fragment.as_slice()),
                ];
                let reflection = Self::reflect_stages(&stages)?;
                (NativeShaderCode::Spirv(stages), reflection)
            }
            ShaderCode::Glsl { vertex, fragment } => {
                compiled = (
                    self.compile(ShaderStage::Vertex, vertex, &info.defines)?,
                    self.compile(ShaderStage::Fragment, fragment, &info.defines)?,
                );
                let stages = vec![
                    (ShaderStage::Vertex, compiled.0.as_slice()),
                    (ShaderStage::Fragment, compiled.1.as_slice()),
                ];
                let reflection = Self::reflect_stages(&stages)?;
                (NativeShaderCode::Spirv(stages), reflection)
            }
        };

        let native = self.driver.create_shader(&NativeShaderInfo {
            debug_name: &info.debug_name,
            vertex_layout: &info.vertex_layout,
            reflection: &reflection,
            code,
        })?;
        log::debug!(
            "created shader '{}' with {} bindings",
            info.debug_name,
            reflection.bindings.len()
        );
        let handle = self.shaders.insert(ShaderRecord {
            native,
            reflection,
            vertex_layout: info.vertex_layout.clone(),
            raytracing: false,
        });
        Ok(handle.cast())
    }

    fn create_raytracing_shader(&mut self, info: &RaytracingShaderInfo) -> Result<ShaderId> {
        if !self.driver.features().contains(Features::RAYTRACING) {
            return Err(GPUError::UnsupportedFeature(Features::RAYTRACING));
        }
        let compiled;
        let (code, reflection) = match &info.code {
            RaytracingShaderCode::Host(program) => {
                (NativeShaderCode::HostRaytracing(program), program.reflection())
            }
            RaytracingShaderCode::Spirv {
                raygen,
                miss,
                closest_hit,
            } => {
                let stages = vec![
                    (ShaderStage::Raygen, raygen.as_slice()),
                    (ShaderStage::Miss, miss.as_slice()),
                    (ShaderStage::ClosestHit, closest_hit.as_slice()),
                ];
                let reflection = Self::reflect_stages(&stages)?;
                (NativeShaderCode::Spirv(stages), reflection)
            }
            RaytracingShaderCode::Glsl {
                raygen,
                miss,
                closest_hit,
            } => {
                compiled = (
                    self.compile(ShaderStage::Raygen, raygen, &info.defines)?,
                    self.compile(ShaderStage::Miss, miss, &info.defines)?,
                    self.compile(ShaderStage::ClosestHit, closest_hit, &info.defines)?,
                );
                let stages = vec![
                    (ShaderStage::Raygen, compiled.0.as_slice()),
                    (ShaderStage::Miss, compiled.1.as_slice()),
                    (ShaderStage::ClosestHit, compiled.2.as_slice()),
                ];
                let reflection = Self::reflect_stages(&stages)?;
                (NativeShaderCode::Spirv(stages), reflection)
            }
        };

        let vertex_layout = VertexLayout::default();
        let native = self.driver.create_shader(&NativeShaderInfo {
            debug_name: &info.debug_name,
            vertex_layout: &vertex_layout,
            reflection: &reflection,
            code,
        })?;
        let handle = self.shaders.insert(ShaderRecord {
            native,
            reflection,
            vertex_layout,
            raytracing: true,
        });
        Ok(handle.cast())
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        assert!(desc.size > 0, "buffers must have a non-zero size");
        let native = self.driver.create_buffer(desc.kind, desc.size)?;
        let handle = self.buffers.insert(BufferRecord {
            native,
            desc: *desc,
        });
        Ok(handle.cast())
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        self.collect_retired();
        if data.is_empty() {
            return Ok(());
        }
        let size = buffer_in(&self.buffers, buffer).desc.size;
        assert!(
            offset + data.len() as u64 <= size,
            "write of {} bytes at offset {} overflows a {} byte buffer",
            data.len(),
            offset,
            size
        );

        let inline = data.len() <= INLINE_UPDATE_LIMIT && offset % 4 == 0 && data.len() % 4 == 0;
        let staging = if inline {
            None
        } else {
            Some(self.stage_upload(data)?)
        };
        self.end_pass();

        let record = buffer_in(&self.buffers, buffer);
        let cmd = self.frames.commands();
        match &staging {
            None => self.driver.cmd_update_buffer(cmd, &record.native, offset, data),
            Some(staging) => {
                self.driver
                    .cmd_copy_buffer(cmd, staging, &record.native, offset, data.len() as u64)
            }
        }
        if let Some(staging) = staging {
            self.stage(Staged::Buffer(staging));
        }
        Ok(())
    }

    fn create_bottom_level(&mut self, vertices: &[[f32; 3]], indices: &[u32]) -> Result<AccelerationStructureId> {
        if !self.driver.features().contains(Features::RAYTRACING) {
            return Err(GPUError::UnsupportedFeature(Features::RAYTRACING));
        }
        assert!(indices.len() % 3 == 0, "acceleration structure indices must form triangles");
        let native = self.driver.create_bottom_level(vertices, indices)?;
        let handle = self.structures.insert(StructureRecord {
            native,
            top_level: false,
        });
        Ok(handle.cast())
    }

    fn create_top_level(&mut self, instances: &[AccelerationInstance]) -> Result<AccelerationStructureId> {
        if !self.driver.features().contains(Features::RAYTRACING) {
            return Err(GPUError::UnsupportedFeature(Features::RAYTRACING));
        }
        let Self {
            driver, structures, ..
        } = self;
        let descs = instances
            .iter()
            .map(|instance| {
                let record = structure_in(structures, instance.blas);
                assert!(!record.top_level, "top-level instances must reference bottom-level structures");
                InstanceDesc {
                    blas: &record.native,
                    transform: instance.transform,
                }
            })
            .collect::<Vec<_>>();
        let native = driver.create_top_level(&descs)?;
        let handle = self.structures.insert(StructureRecord {
            native,
            top_level: true,
        });
        Ok(handle.cast())
    }
}

impl<D: Driver> Drop for Context<D> {
    fn drop(&mut self) {
        self.collect_retired();
        if self.frames.state() == FrameState::Recording {
            self.end_pass();
        }
        if let Err(err) = self.frames.destroy(&mut self.driver) {
            log::error!("failed to retire frames on shutdown: {}", err);
        }
        if let Err(err) = self.driver.wait_idle() {
            log::error!("wait for idle on shutdown failed: {}", err);
        }
        for pipeline in self.pipelines.drain() {
            self.driver.destroy_pipeline(pipeline);
        }
        for pipeline in self.raytracing_pipelines.drain() {
            self.driver.destroy_pipeline(pipeline);
        }
        for sampler in self.samplers.drain() {
            self.driver.destroy_sampler(sampler);
        }
        for shader in self.shaders.drain() {
            self.driver.destroy_shader(shader.native);
        }
        for structure in self.structures.drain() {
            self.driver.destroy_acceleration_structure(structure.native);
        }
        for buffer in self.buffers.drain() {
            self.driver.destroy_buffer(buffer.native);
        }
        for texture in self.textures.drain() {
            self.driver.destroy_texture(texture.native);
            if let Some(depth) = texture.depth_stencil {
                self.driver.destroy_texture(depth);
            }
        }
        log::info!("{} backend shut down", self.driver.backend_type().name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDriver;
    use crate::gpu::{BufferKind, IndexType};

    fn context() -> Context<SoftwareDriver> {
        Context::new(SoftwareDriver::new(4, 4), &ContextInfo::default()).unwrap()
    }

    #[test]
    #[should_panic(expected = "used after it was destroyed")]
    fn reclaimed_texture_cannot_be_read() {
        let mut ctx = context();
        let id = ctx.create_texture(&TextureInfo::new(2, 2, Format::Byte4), false).unwrap();
        ctx.retire_queue().push(Retired::Texture(id));
        let _ = ctx.read_texture(id);
    }

    #[test]
    #[should_panic(expected = "used after it was destroyed")]
    fn reclaimed_buffer_cannot_be_written() {
        let mut ctx = context();
        let id = ctx
            .create_buffer(&BufferDesc {
                kind: BufferKind::Uniform,
                size: 16,
                stride: 0,
                index_type: IndexType::U32,
            })
            .unwrap();
        ctx.retire_queue().push(Retired::Buffer(id));
        let _ = ctx.write_buffer(id, 0, &[0; 16]);
    }

    #[test]
    #[should_panic(expected = "acceleration structure")]
    fn top_level_rejects_reclaimed_geometry() {
        let mut ctx = context();
        let blas = ctx
            .create_bottom_level(&[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], &[0, 1, 2])
            .unwrap();
        ctx.retire_queue().push(Retired::AccelerationStructure(blas));
        ctx.collect_retired();
        let _ = ctx.create_top_level(&[AccelerationInstance {
            blas,
            transform: crate::gpu::IDENTITY_TRANSFORM,
        }]);
    }

    #[test]
    fn reclaimed_objects_wait_for_the_frame_fence() {
        let mut ctx = context();
        let id = ctx.create_texture(&TextureInfo::new(2, 2, Format::Byte4), true).unwrap();
        ctx.retire_queue().push(Retired::Texture(id));
        ctx.collect_retired();
        // Color plus depth-stencil.
        assert_eq!(ctx.stats().pending_destruction, 2);
        ctx.flush().unwrap();
        assert_eq!(ctx.stats().pending_destruction, 0);
        assert_eq!(ctx.stats().objects_destroyed, 2);
    }
}
