use bitflags::bitflags;
#[cfg(feature = "prism-serde")]
use serde::{Deserialize, Serialize};

/// Native graphics API a [`crate::RenderDevice`] dispatches to.
#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendType {
    D3D11,
    D3D12,
    Vulkan,
    Metal,
    OpenGL,
    WebGpu,
    Software,
}

impl BackendType {
    pub fn name(&self) -> &'static str {
        match self {
            BackendType::D3D11 => "d3d11",
            BackendType::D3D12 => "d3d12",
            BackendType::Vulkan => "vulkan",
            BackendType::Metal => "metal",
            BackendType::OpenGL => "opengl",
            BackendType::WebGpu => "webgpu",
            BackendType::Software => "software",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        [
            BackendType::D3D11,
            BackendType::D3D12,
            BackendType::Vulkan,
            BackendType::Metal,
            BackendType::OpenGL,
            BackendType::WebGpu,
            BackendType::Software,
        ]
        .into_iter()
        .find(|b| b.name() == name)
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Adapter {
    #[default]
    HighPerformance,
    LowPower,
}

bitflags! {
    #[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u32 {
        const RAYTRACING = 1 << 0;
    }
}

/// Element format shared by vertex attributes and texture pixels.
#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Float1,
    Float2,
    Float3,
    Float4,
    Byte1,
    Byte2,
    Byte3,
    #[default]
    Byte4,
}

impl Format {
    pub fn channels(&self) -> u32 {
        match self {
            Format::Float1 | Format::Byte1 => 1,
            Format::Float2 | Format::Byte2 => 2,
            Format::Float3 | Format::Byte3 => 3,
            Format::Float4 | Format::Byte4 => 4,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Format::Float1 | Format::Float2 | Format::Float3 | Format::Float4
        )
    }

    pub fn channel_size(&self) -> u32 {
        if self.is_float() {
            4
        } else {
            1
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.channels() * self.channel_size()
    }

    /// Three-channel formats are vertex-only; no backend stores them as
    /// texels.
    pub fn is_texture_format(&self) -> bool {
        self.channels() != 3
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Primitive class; pipelines are compiled per class, the exact topology
/// inside a class is dynamic state.
#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyKind {
    Point,
    Line,
    Triangle,
}

impl Topology {
    pub fn kind(&self) -> TopologyKind {
        match self {
            Topology::PointList => TopologyKind::Point,
            Topology::LineList | Topology::LineStrip => TopologyKind::Line,
            Topology::TriangleList | Topology::TriangleStrip => TopologyKind::Triangle,
        }
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub position: [f32; 2],
    pub size: [f32; 2],
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            position: [0.0, 0.0],
            size: [width as f32, height as f32],
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scissor {
    pub position: [i32; 2],
    pub size: [u32; 2],
}

impl Scissor {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            position: [0, 0],
            size: [width, height],
        }
    }

    /// Clamps the rectangle to a `width` x `height` target.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let x0 = self.position[0].clamp(0, width as i32);
        let y0 = self.position[1].clamp(0, height as i32);
        let x1 = (self.position[0] + self.size[0] as i32).clamp(0, width as i32);
        let y1 = (self.position[1] + self.size[1] as i32).clamp(0, height as i32);
        Self {
            position: [x0, y0],
            size: [(x1 - x0).max(0) as u32, (y1 - y0).max(0) as u32],
        }
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    #[default]
    Clockwise,
    CounterClockwise,
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blend {
    One,
    Zero,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstColor,
    InvDstColor,
    DstAlpha,
    InvDstAlpha,
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFunction {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorMask {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
    pub alpha: bool,
}

impl Default for ColorMask {
    fn default() -> Self {
        Self {
            red: true,
            green: true,
            blue: true,
            alpha: true,
        }
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendMode {
    pub color_mask: ColorMask,
    pub color_func: BlendFunction,
    pub color_src: Blend,
    pub color_dst: Blend,
    pub alpha_func: BlendFunction,
    pub alpha_src: Blend,
    pub alpha_dst: Blend,
}

impl BlendMode {
    pub const fn new(src: Blend, dst: Blend) -> Self {
        Self::separate(src, dst, src, dst)
    }

    pub const fn separate(color_src: Blend, color_dst: Blend, alpha_src: Blend, alpha_dst: Blend) -> Self {
        Self {
            color_mask: ColorMask {
                red: true,
                green: true,
                blue: true,
                alpha: true,
            },
            color_func: BlendFunction::Add,
            color_src,
            color_dst,
            alpha_func: BlendFunction::Add,
            alpha_src,
            alpha_dst,
        }
    }

    pub const OPAQUE: BlendMode = BlendMode::new(Blend::One, Blend::Zero);
    pub const ALPHA_BLEND: BlendMode = BlendMode::new(Blend::One, Blend::InvSrcAlpha);
    pub const ADDITIVE: BlendMode = BlendMode::new(Blend::SrcAlpha, Blend::One);
    pub const NON_PREMULTIPLIED: BlendMode = BlendMode::new(Blend::SrcAlpha, Blend::InvSrcAlpha);
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonFunc {
    #[default]
    Always,
    Never,
    Less,
    Equal,
    NotEqual,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl ComparisonFunc {
    pub fn test<T: PartialOrd>(&self, value: T, reference: T) -> bool {
        match self {
            ComparisonFunc::Always => true,
            ComparisonFunc::Never => false,
            ComparisonFunc::Less => value < reference,
            ComparisonFunc::Equal => value == reference,
            ComparisonFunc::NotEqual => value != reference,
            ComparisonFunc::LessEqual => value <= reference,
            ComparisonFunc::Greater => value > reference,
            ComparisonFunc::GreaterEqual => value >= reference,
        }
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthMode {
    pub write_mask: bool,
    pub func: ComparisonFunc,
}

impl Default for DepthMode {
    fn default() -> Self {
        Self {
            write_mask: true,
            func: ComparisonFunc::Less,
        }
    }
}

impl DepthMode {
    pub fn new(func: ComparisonFunc) -> Self {
        Self {
            write_mask: true,
            func,
        }
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementSaturation,
    DecrementSaturation,
    Invert,
    Increment,
    Decrement,
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilMode {
    pub read_mask: u8,
    pub write_mask: u8,
    pub depth_fail_op: StencilOp,
    pub fail_op: StencilOp,
    pub func: ComparisonFunc,
    pub pass_op: StencilOp,
    pub reference: u8,
}

impl Default for StencilMode {
    fn default() -> Self {
        Self {
            read_mask: 255,
            write_mask: 255,
            depth_fail_op: StencilOp::Keep,
            fail_op: StencilOp::Keep,
            func: ComparisonFunc::Always,
            pass_op: StencilOp::Keep,
            reference: 1,
        }
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sampler {
    #[default]
    Linear,
    Nearest,
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureAddress {
    #[default]
    Clamp,
    Wrap,
    MirrorWrap,
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub factor: f32,
    pub units: f32,
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    pub fn size(&self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: Format,
    pub offset: u32,
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Builds a tightly packed layout with consecutive locations.
    pub fn packed(formats: &[Format]) -> Self {
        let mut offset = 0;
        let attributes = formats
            .iter()
            .enumerate()
            .map(|(location, format)| {
                let attr = VertexAttribute {
                    location: location as u32,
                    format: *format,
                    offset,
                };
                offset += format.bytes_per_pixel();
                attr
            })
            .collect();
        Self {
            stride: offset,
            attributes,
        }
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub mipmap: bool,
}

impl TextureInfo {
    pub fn new(width: u32, height: u32, format: Format) -> Self {
        Self {
            width,
            height,
            format,
            mipmap: false,
        }
    }

    pub fn with_mipmap(mut self) -> Self {
        self.mipmap = true;
        self
    }

    /// Full mip chain length down to 1x1.
    pub fn mip_count(&self) -> u32 {
        if self.mipmap {
            32 - self.width.max(self.height).max(1).leading_zeros()
        } else {
            1
        }
    }

    pub fn byte_size(&self) -> usize {
        (self.width * self.height * self.format.bytes_per_pixel()) as usize
    }
}

#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    Storage,
}

/// Counters for work the deferred state machine actually issued.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub frames: u64,
    pub frame_index: usize,
    pub draw_calls: u64,
    pub pipelines_created: u64,
    pub pipeline_binds: u64,
    pub samplers_created: u64,
    pub binding_updates: u64,
    pub vertex_buffer_binds: u64,
    pub index_buffer_binds: u64,
    pub render_passes: u64,
    pub layout_transitions: u64,
    pub fence_waits: u64,
    pub staging_uploads: u64,
    /// Native objects waiting in a frame's deferred-destruction queue.
    pub pending_destruction: u64,
    pub objects_destroyed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layout_offsets() {
        let layout = VertexLayout::packed(&[Format::Float3, Format::Float4, Format::Byte4]);
        assert_eq!(layout.stride, 12 + 16 + 4);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[2].location, 2);
    }

    #[test]
    fn scissor_clamps_to_target() {
        let s = Scissor {
            position: [-4, 6],
            size: [10, 10],
        };
        let c = s.clamped(8, 8);
        assert_eq!(c.position, [0, 6]);
        assert_eq!(c.size, [6, 2]);
    }

    #[test]
    fn mip_chain_length() {
        assert_eq!(TextureInfo::new(256, 64, Format::Byte4).mip_count(), 1);
        assert_eq!(TextureInfo::new(256, 64, Format::Byte4).with_mipmap().mip_count(), 9);
        assert_eq!(TextureInfo::new(1, 1, Format::Byte4).with_mipmap().mip_count(), 1);
    }

    #[test]
    fn backend_names_round_trip() {
        assert_eq!(BackendType::from_name("Vulkan"), Some(BackendType::Vulkan));
        assert_eq!(BackendType::from_name(" software "), Some(BackendType::Software));
        assert_eq!(BackendType::from_name("glide"), None);
    }
}
