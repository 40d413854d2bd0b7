use ash::vk;

use crate::gpu::{
    Blend, BlendFunction, BlendMode, BindingKind, ColorMask, ComparisonFunc, CullMode, Format, FrontFace, Layout,
    Sampler, SamplerState, ShaderStage, ShaderStages, StencilMode, StencilOp, TextureAddress, Topology, TopologyKind,
    Viewport,
};

impl From<Blend> for vk::BlendFactor {
    fn from(blend: Blend) -> Self {
        match blend {
            Blend::One => vk::BlendFactor::ONE,
            Blend::Zero => vk::BlendFactor::ZERO,
            Blend::SrcColor => vk::BlendFactor::SRC_COLOR,
            Blend::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            Blend::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            Blend::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            Blend::DstColor => vk::BlendFactor::DST_COLOR,
            Blend::InvDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            Blend::DstAlpha => vk::BlendFactor::DST_ALPHA,
            Blend::InvDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        }
    }
}

impl From<BlendFunction> for vk::BlendOp {
    fn from(op: BlendFunction) -> Self {
        match op {
            BlendFunction::Add => vk::BlendOp::ADD,
            BlendFunction::Subtract => vk::BlendOp::SUBTRACT,
            BlendFunction::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendFunction::Min => vk::BlendOp::MIN,
            BlendFunction::Max => vk::BlendOp::MAX,
        }
    }
}

impl From<ColorMask> for vk::ColorComponentFlags {
    fn from(mask: ColorMask) -> Self {
        let mut flags = vk::ColorComponentFlags::empty();
        if mask.red {
            flags |= vk::ColorComponentFlags::R;
        }
        if mask.green {
            flags |= vk::ColorComponentFlags::G;
        }
        if mask.blue {
            flags |= vk::ColorComponentFlags::B;
        }
        if mask.alpha {
            flags |= vk::ColorComponentFlags::A;
        }
        flags
    }
}

pub(super) fn blend_attachment(blend: Option<BlendMode>) -> vk::PipelineColorBlendAttachmentState {
    match blend {
        Some(mode) => vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .color_write_mask(mode.color_mask.into())
            .src_color_blend_factor(mode.color_src.into())
            .dst_color_blend_factor(mode.color_dst.into())
            .color_blend_op(mode.color_func.into())
            .src_alpha_blend_factor(mode.alpha_src.into())
            .dst_alpha_blend_factor(mode.alpha_dst.into())
            .alpha_blend_op(mode.alpha_func.into())
            .build(),
        None => vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build(),
    }
}

impl From<ComparisonFunc> for vk::CompareOp {
    fn from(func: ComparisonFunc) -> Self {
        match func {
            ComparisonFunc::Always => vk::CompareOp::ALWAYS,
            ComparisonFunc::Never => vk::CompareOp::NEVER,
            ComparisonFunc::Less => vk::CompareOp::LESS,
            ComparisonFunc::Equal => vk::CompareOp::EQUAL,
            ComparisonFunc::NotEqual => vk::CompareOp::NOT_EQUAL,
            ComparisonFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
            ComparisonFunc::Greater => vk::CompareOp::GREATER,
            ComparisonFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        }
    }
}

impl From<StencilOp> for vk::StencilOp {
    fn from(op: StencilOp) -> Self {
        match op {
            StencilOp::Keep => vk::StencilOp::KEEP,
            StencilOp::Zero => vk::StencilOp::ZERO,
            StencilOp::Replace => vk::StencilOp::REPLACE,
            StencilOp::IncrementSaturation => vk::StencilOp::INCREMENT_AND_CLAMP,
            StencilOp::DecrementSaturation => vk::StencilOp::DECREMENT_AND_CLAMP,
            StencilOp::Invert => vk::StencilOp::INVERT,
            StencilOp::Increment => vk::StencilOp::INCREMENT_AND_WRAP,
            StencilOp::Decrement => vk::StencilOp::DECREMENT_AND_WRAP,
        }
    }
}

impl From<StencilMode> for vk::StencilOpState {
    fn from(mode: StencilMode) -> Self {
        vk::StencilOpState {
            fail_op: mode.fail_op.into(),
            pass_op: mode.pass_op.into(),
            depth_fail_op: mode.depth_fail_op.into(),
            compare_op: mode.func.into(),
            compare_mask: mode.read_mask as u32,
            write_mask: mode.write_mask as u32,
            reference: mode.reference as u32,
        }
    }
}

impl From<CullMode> for vk::CullModeFlags {
    fn from(mode: CullMode) -> Self {
        match mode {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

// Winding is judged on screen, where the flipped viewport keeps clip-space y up.
impl From<FrontFace> for vk::FrontFace {
    fn from(face: FrontFace) -> Self {
        match face {
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

impl From<Topology> for vk::PrimitiveTopology {
    fn from(topology: Topology) -> Self {
        match topology {
            Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
            Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

impl From<TopologyKind> for vk::PrimitiveTopology {
    fn from(kind: TopologyKind) -> Self {
        match kind {
            TopologyKind::Point => vk::PrimitiveTopology::POINT_LIST,
            TopologyKind::Line => vk::PrimitiveTopology::LINE_LIST,
            TopologyKind::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
        }
    }
}

/// Y-up clip space through a negative-height viewport.
pub(super) fn flipped_viewport(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.position[0],
        y: viewport.position[1] + viewport.size[1],
        width: viewport.size[0],
        height: -viewport.size[1],
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

impl From<TextureAddress> for vk::SamplerAddressMode {
    fn from(address: TextureAddress) -> Self {
        match address {
            TextureAddress::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            TextureAddress::Wrap => vk::SamplerAddressMode::REPEAT,
            TextureAddress::MirrorWrap => vk::SamplerAddressMode::MIRRORED_REPEAT,
        }
    }
}

pub(super) fn sampler_info(state: &SamplerState) -> vk::SamplerCreateInfo {
    let (filter, mipmap_mode) = match state.sampler {
        Sampler::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
        Sampler::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
    };
    let address = state.address.into();
    vk::SamplerCreateInfo {
        mag_filter: filter,
        min_filter: filter,
        mipmap_mode,
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        max_lod: vk::LOD_CLAMP_NONE,
        border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        ..Default::default()
    }
}

/// Texel or vertex attribute format. Byte formats are unsigned normalized.
pub(super) fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Float1 => vk::Format::R32_SFLOAT,
        Format::Float2 => vk::Format::R32G32_SFLOAT,
        Format::Float3 => vk::Format::R32G32B32_SFLOAT,
        Format::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        Format::Byte1 => vk::Format::R8_UNORM,
        Format::Byte2 => vk::Format::R8G8_UNORM,
        Format::Byte3 => vk::Format::R8G8B8_UNORM,
        Format::Byte4 => vk::Format::R8G8B8A8_UNORM,
    }
}

/// Stage and access scope of an image in `layout`, for either side of a
/// barrier.
pub(super) fn layout_scope(layout: Layout) -> (vk::ImageLayout, vk::PipelineStageFlags2, vk::AccessFlags2) {
    use vk::{AccessFlags2 as A, ImageLayout as L, PipelineStageFlags2 as S};
    match layout {
        Layout::Undefined => (L::UNDEFINED, S::TOP_OF_PIPE, A::NONE),
        Layout::General => (
            L::GENERAL,
            S::ALL_COMMANDS,
            A::SHADER_STORAGE_READ | A::SHADER_STORAGE_WRITE,
        ),
        Layout::ShaderReadOnly => (
            L::SHADER_READ_ONLY_OPTIMAL,
            S::FRAGMENT_SHADER | S::VERTEX_SHADER,
            A::SHADER_SAMPLED_READ,
        ),
        Layout::ColorAttachment => (
            L::COLOR_ATTACHMENT_OPTIMAL,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        Layout::TransferSrc => (L::TRANSFER_SRC_OPTIMAL, S::ALL_TRANSFER, A::TRANSFER_READ),
        Layout::TransferDst => (L::TRANSFER_DST_OPTIMAL, S::ALL_TRANSFER, A::TRANSFER_WRITE),
    }
}

impl From<BindingKind> for vk::DescriptorType {
    fn from(kind: BindingKind) -> Self {
        match kind {
            BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            BindingKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Raygen => vk::ShaderStageFlags::RAYGEN_KHR,
            ShaderStage::Miss => vk::ShaderStageFlags::MISS_KHR,
            ShaderStage::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        }
    }
}

impl From<ShaderStages> for vk::ShaderStageFlags {
    fn from(stages: ShaderStages) -> Self {
        let mut flags = vk::ShaderStageFlags::empty();
        for (flag, stage) in [
            (ShaderStages::VERTEX, ShaderStage::Vertex),
            (ShaderStages::FRAGMENT, ShaderStage::Fragment),
            (ShaderStages::RAYGEN, ShaderStage::Raygen),
            (ShaderStages::MISS, ShaderStage::Miss),
            (ShaderStages::CLOSEST_HIT, ShaderStage::ClosestHit),
        ] {
            if stages.contains(flag) {
                flags |= vk::ShaderStageFlags::from(stage);
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_is_flipped() {
        let vp = flipped_viewport(&Viewport::full(800, 600));
        assert_eq!(vp.y, 600.0);
        assert_eq!(vp.height, -600.0);
    }

    #[test]
    fn stages_fold_into_flags() {
        let flags: vk::ShaderStageFlags = (ShaderStages::VERTEX | ShaderStages::FRAGMENT).into();
        assert_eq!(flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn byte_formats_are_unorm() {
        assert_eq!(vk_format(Format::Byte4), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(vk_format(Format::Float2), vk::Format::R32G32_SFLOAT);
    }
}
