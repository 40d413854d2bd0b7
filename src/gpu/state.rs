use std::collections::BTreeMap;

use bitflags::bitflags;

use super::{
    AccelerationStructureId, BlendMode, BufferId, CullMode, DepthBias, DepthMode, Format,
    FrontFace, Sampler, Scissor, ShaderId, StencilMode, TextureAddress, TextureId, Topology,
    TopologyKind, Viewport,
};

/// Highest binding index (exclusive) the dirty tracker follows.
pub const MAX_BINDINGS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Backbuffer,
    Texture(Format),
}

/// Everything a native graphics pipeline is compiled from. State the
/// backends set dynamically (viewport, scissor, cull mode, front face,
/// exact topology, depth bias) stays out of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub shader: ShaderId,
    pub topology: TopologyKind,
    pub color_target: TargetFormat,
    pub blend: Option<BlendMode>,
    pub depth: Option<DepthMode>,
    pub stencil: Option<StencilMode>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerState {
    pub sampler: Sampler,
    pub address: TextureAddress,
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u32 {
        const PIPELINE = 1 << 0;
        const BINDINGS = 1 << 1;
        const VERTEX_BUFFER = 1 << 2;
        const INDEX_BUFFER = 1 << 3;
        const TOPOLOGY = 1 << 4;
        const VIEWPORT = 1 << 5;
        const SCISSOR = 1 << 6;
        const CULL_MODE = 1 << 7;
        const FRONT_FACE = 1 << 8;
        const DEPTH_BIAS = 1 << 9;
        const SAMPLER = 1 << 10;
    }
}

/// The state the caller asked for. Nothing here touches the native API;
/// the context reconciles it with the command stream at draw time.
#[derive(Debug, Clone)]
pub struct RenderState {
    pub topology: Topology,
    pub viewport: Option<Viewport>,
    pub scissor: Option<Scissor>,
    pub shader: Option<ShaderId>,
    pub raytracing_shader: Option<ShaderId>,
    pub render_target: Option<TextureId>,
    pub textures: BTreeMap<u32, TextureId>,
    pub uniform_buffers: BTreeMap<u32, BufferId>,
    pub storage_buffers: BTreeMap<u32, BufferId>,
    pub acceleration_structures: BTreeMap<u32, AccelerationStructureId>,
    pub vertex_buffer: Option<BufferId>,
    pub index_buffer: Option<BufferId>,
    pub blend_mode: Option<BlendMode>,
    pub depth_mode: Option<DepthMode>,
    pub stencil_mode: Option<StencilMode>,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias: Option<DepthBias>,
    pub sampler: Sampler,
    pub texture_address: TextureAddress,
    pub dirty: DirtyFlags,
    pub dirty_bindings: u64,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            topology: Topology::TriangleList,
            viewport: None,
            scissor: None,
            shader: None,
            raytracing_shader: None,
            render_target: None,
            textures: BTreeMap::new(),
            uniform_buffers: BTreeMap::new(),
            storage_buffers: BTreeMap::new(),
            acceleration_structures: BTreeMap::new(),
            vertex_buffer: None,
            index_buffer: None,
            blend_mode: None,
            depth_mode: None,
            stencil_mode: None,
            cull_mode: CullMode::None,
            front_face: FrontFace::Clockwise,
            depth_bias: None,
            sampler: Sampler::Linear,
            texture_address: TextureAddress::Clamp,
            dirty: DirtyFlags::all(),
            dirty_bindings: u64::MAX,
        }
    }
}

fn bit(binding: u32) -> u64 {
    1u64 << binding
}

fn set_binding<T: Copy + PartialEq>(
    map: &mut BTreeMap<u32, T>,
    binding: u32,
    value: T,
    dirty: &mut DirtyFlags,
    dirty_bindings: &mut u64,
) -> bool {
    if binding >= MAX_BINDINGS {
        log::error!("binding {} is out of range (max {})", binding, MAX_BINDINGS - 1);
        return false;
    }
    if map.get(&binding) == Some(&value) {
        return false;
    }
    map.insert(binding, value);
    *dirty |= DirtyFlags::BINDINGS;
    *dirty_bindings |= bit(binding);
    true
}

macro_rules! set_field {
    ($self:ident, $field:ident, $value:expr, $flags:expr) => {{
        let value = $value;
        if $self.$field == value {
            false
        } else {
            $self.$field = value;
            $self.dirty |= $flags;
            true
        }
    }};
}

impl RenderState {
    /// Native command state is lost with every new command list; forget
    /// what was applied.
    pub fn invalidate(&mut self) {
        self.dirty = DirtyFlags::all();
        self.dirty_bindings = u64::MAX;
    }

    pub fn set_topology(&mut self, topology: Topology) -> bool {
        let mut flags = DirtyFlags::TOPOLOGY;
        if topology.kind() != self.topology.kind() {
            flags |= DirtyFlags::PIPELINE;
        }
        set_field!(self, topology, topology, flags)
    }

    pub fn set_viewport(&mut self, viewport: Option<Viewport>) -> bool {
        set_field!(self, viewport, viewport, DirtyFlags::VIEWPORT)
    }

    pub fn set_scissor(&mut self, scissor: Option<Scissor>) -> bool {
        set_field!(self, scissor, scissor, DirtyFlags::SCISSOR)
    }

    pub fn set_shader(&mut self, shader: ShaderId) -> bool {
        let changed = set_field!(
            self,
            shader,
            Some(shader),
            DirtyFlags::PIPELINE | DirtyFlags::BINDINGS | DirtyFlags::VERTEX_BUFFER
        );
        if changed {
            self.dirty_bindings = u64::MAX;
        }
        changed
    }

    pub fn set_raytracing_shader(&mut self, shader: ShaderId) -> bool {
        set_field!(self, raytracing_shader, Some(shader), DirtyFlags::empty())
    }

    pub fn set_render_target(&mut self, target: Option<TextureId>) -> bool {
        set_field!(
            self,
            render_target,
            target,
            DirtyFlags::PIPELINE | DirtyFlags::VIEWPORT | DirtyFlags::SCISSOR
        )
    }

    pub fn set_texture(&mut self, binding: u32, texture: TextureId) -> bool {
        set_binding(
            &mut self.textures,
            binding,
            texture,
            &mut self.dirty,
            &mut self.dirty_bindings,
        )
    }

    pub fn set_uniform_buffer(&mut self, binding: u32, buffer: BufferId) -> bool {
        set_binding(
            &mut self.uniform_buffers,
            binding,
            buffer,
            &mut self.dirty,
            &mut self.dirty_bindings,
        )
    }

    pub fn set_storage_buffer(&mut self, binding: u32, buffer: BufferId) -> bool {
        set_binding(
            &mut self.storage_buffers,
            binding,
            buffer,
            &mut self.dirty,
            &mut self.dirty_bindings,
        )
    }

    pub fn set_acceleration_structure(&mut self, binding: u32, tlas: AccelerationStructureId) -> bool {
        set_binding(
            &mut self.acceleration_structures,
            binding,
            tlas,
            &mut self.dirty,
            &mut self.dirty_bindings,
        )
    }

    pub fn set_vertex_buffer(&mut self, buffer: BufferId) -> bool {
        set_field!(self, vertex_buffer, Some(buffer), DirtyFlags::VERTEX_BUFFER)
    }

    pub fn set_index_buffer(&mut self, buffer: BufferId) -> bool {
        set_field!(self, index_buffer, Some(buffer), DirtyFlags::INDEX_BUFFER)
    }

    pub fn set_blend_mode(&mut self, mode: Option<BlendMode>) -> bool {
        set_field!(self, blend_mode, mode, DirtyFlags::PIPELINE)
    }

    pub fn set_depth_mode(&mut self, mode: Option<DepthMode>) -> bool {
        set_field!(self, depth_mode, mode, DirtyFlags::PIPELINE)
    }

    pub fn set_stencil_mode(&mut self, mode: Option<StencilMode>) -> bool {
        set_field!(self, stencil_mode, mode, DirtyFlags::PIPELINE)
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) -> bool {
        set_field!(self, cull_mode, mode, DirtyFlags::CULL_MODE)
    }

    pub fn set_front_face(&mut self, face: FrontFace) -> bool {
        set_field!(self, front_face, face, DirtyFlags::FRONT_FACE)
    }

    pub fn set_depth_bias(&mut self, bias: Option<DepthBias>) -> bool {
        set_field!(self, depth_bias, bias, DirtyFlags::DEPTH_BIAS)
    }

    pub fn set_sampler(&mut self, sampler: Sampler) -> bool {
        set_field!(self, sampler, sampler, DirtyFlags::SAMPLER)
    }

    pub fn set_texture_address(&mut self, address: TextureAddress) -> bool {
        set_field!(self, texture_address, address, DirtyFlags::SAMPLER)
    }

    pub fn sampler_state(&self) -> SamplerState {
        SamplerState {
            sampler: self.sampler,
            address: self.texture_address,
        }
    }

    /// Drops every reference to `texture`, returning whether it was the
    /// current render target.
    pub fn forget_texture(&mut self, texture: TextureId) -> bool {
        self.textures.retain(|_, t| *t != texture);
        if self.render_target == Some(texture) {
            self.set_render_target(None);
            true
        } else {
            false
        }
    }

    pub fn forget_buffer(&mut self, buffer: BufferId) {
        self.uniform_buffers.retain(|_, b| *b != buffer);
        self.storage_buffers.retain(|_, b| *b != buffer);
        if self.vertex_buffer == Some(buffer) {
            self.vertex_buffer = None;
        }
        if self.index_buffer == Some(buffer) {
            self.index_buffer = None;
        }
    }

    pub fn forget_shader(&mut self, shader: ShaderId) {
        if self.shader == Some(shader) {
            self.shader = None;
            self.dirty |= DirtyFlags::PIPELINE;
        }
        if self.raytracing_shader == Some(shader) {
            self.raytracing_shader = None;
        }
    }

    pub fn forget_acceleration_structure(&mut self, tlas: AccelerationStructureId) {
        self.acceleration_structures.retain(|_, a| *a != tlas);
    }

    /// Bindings pending an update, in ascending order.
    pub fn take_dirty_bindings(&mut self) -> Vec<u32> {
        let mask = std::mem::take(&mut self.dirty_bindings);
        self.dirty.remove(DirtyFlags::BINDINGS);
        (0..MAX_BINDINGS).filter(|b| mask & bit(*b) != 0).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Handle;

    fn clean() -> RenderState {
        let mut state = RenderState::default();
        state.dirty = DirtyFlags::empty();
        state.dirty_bindings = 0;
        state
    }

    #[test]
    fn identical_sets_leave_state_clean() {
        let mut state = clean();
        assert!(!state.set_topology(Topology::TriangleList));
        assert!(!state.set_cull_mode(CullMode::None));
        assert!(state.dirty.is_empty());
    }

    #[test]
    fn topology_class_change_dirties_pipeline() {
        let mut state = clean();
        state.set_topology(Topology::TriangleStrip);
        assert_eq!(state.dirty, DirtyFlags::TOPOLOGY);
        state.set_topology(Topology::LineList);
        assert!(state.dirty.contains(DirtyFlags::PIPELINE));
    }

    #[test]
    fn binding_bits_track_individual_slots() {
        let mut state = clean();
        let tex = Handle::new(1, 0);
        assert!(state.set_texture(3, tex));
        assert!(!state.set_texture(3, tex));
        state.set_uniform_buffer(5, Handle::new(0, 0));
        assert_eq!(state.take_dirty_bindings(), vec![3, 5]);
        assert!(!state.dirty.contains(DirtyFlags::BINDINGS));
        assert!(state.take_dirty_bindings().is_empty());
    }

    #[test]
    fn out_of_range_binding_is_ignored() {
        let mut state = clean();
        assert!(!state.set_texture(MAX_BINDINGS, Handle::new(0, 0)));
        assert!(state.textures.is_empty());
    }

    #[test]
    fn forgetting_render_target_falls_back_to_backbuffer() {
        let mut state = clean();
        let rt = Handle::new(2, 0);
        state.set_render_target(Some(rt));
        state.set_texture(0, rt);
        assert!(state.forget_texture(rt));
        assert_eq!(state.render_target, None);
        assert!(state.textures.is_empty());
    }
}
