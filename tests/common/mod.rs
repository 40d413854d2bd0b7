#![allow(dead_code)]

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use prism::{
    BackendType, BindingKind, ContextInfo, Features, Format, FragmentInput, HostShader, Reflection,
    RenderDevice, Shader, ShaderInfo, ShaderStages, Texture, TextureInfo, VertexInput,
    VertexLayout, VertexOutput,
};
use smallvec::smallvec;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Headless device on the CPU backend, independent of installed drivers.
pub fn software_device(width: u32, height: u32) -> RenderDevice {
    init_logging();
    let info = ContextInfo::default()
        .with_backend(BackendType::Software)
        .with_features(Features::RAYTRACING);
    RenderDevice::headless(width, height, &info).expect("software device")
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    pub fn new(position: [f32; 2], color: [f32; 4]) -> Self {
        Self { position, color }
    }

    pub fn layout() -> VertexLayout {
        VertexLayout::packed(&[Format::Float2, Format::Float4])
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl TexturedVertex {
    pub fn layout() -> VertexLayout {
        VertexLayout::packed(&[Format::Float2, Format::Float2])
    }
}

fn clip_position(input: &VertexInput<'_>) -> [f32; 4] {
    let p = input.attribute(0);
    [p[0], p[1], 0.0, 1.0]
}

/// Interpolates the per-vertex color at location 1.
pub struct ColorShader;

impl HostShader for ColorShader {
    fn vertex(&self, input: &VertexInput<'_>) -> VertexOutput {
        let c = input.attribute(1);
        VertexOutput {
            position: clip_position(input),
            varyings: smallvec![c[0], c[1], c[2], c[3]],
        }
    }

    fn fragment(&self, input: &FragmentInput<'_>) -> Option<[f32; 4]> {
        let v = input.varyings;
        Some([v[0], v[1], v[2], v[3]])
    }
}

/// Samples binding 0 at the uv in location 1.
pub struct TexturedShader;

impl HostShader for TexturedShader {
    fn reflection(&self) -> Reflection {
        Reflection::default().with_binding(0, BindingKind::CombinedImageSampler, "albedo", ShaderStages::FRAGMENT)
    }

    fn vertex(&self, input: &VertexInput<'_>) -> VertexOutput {
        let uv = input.attribute(1);
        VertexOutput {
            position: clip_position(input),
            varyings: smallvec![uv[0], uv[1]],
        }
    }

    fn fragment(&self, input: &FragmentInput<'_>) -> Option<[f32; 4]> {
        Some(input.resources.sample(0, [input.varyings[0], input.varyings[1]]))
    }
}

/// Fills with the color stored in the uniform buffer at binding 0.
pub struct UniformColorShader;

impl HostShader for UniformColorShader {
    fn reflection(&self) -> Reflection {
        Reflection::default().with_binding(0, BindingKind::UniformBuffer, "tint", ShaderStages::FRAGMENT)
    }

    fn vertex(&self, input: &VertexInput<'_>) -> VertexOutput {
        VertexOutput {
            position: clip_position(input),
            varyings: smallvec![],
        }
    }

    fn fragment(&self, input: &FragmentInput<'_>) -> Option<[f32; 4]> {
        input.resources.read_uniform::<[f32; 4]>(0)
    }
}

pub fn color_shader(device: &mut RenderDevice) -> Shader {
    Shader::new(device, &ShaderInfo::host("color", Vertex::layout(), Arc::new(ColorShader))).expect("color shader")
}

pub fn textured_shader(device: &mut RenderDevice) -> Shader {
    Shader::new(
        device,
        &ShaderInfo::host("textured", TexturedVertex::layout(), Arc::new(TexturedShader)),
    )
    .expect("textured shader")
}

/// Two triangles covering the whole target, uv (0, 0) at the top left.
pub fn fullscreen_quad() -> [TexturedVertex; 6] {
    let tl = TexturedVertex {
        position: [-1.0, 1.0],
        uv: [0.0, 0.0],
    };
    let tr = TexturedVertex {
        position: [1.0, 1.0],
        uv: [1.0, 0.0],
    };
    let bl = TexturedVertex {
        position: [-1.0, -1.0],
        uv: [0.0, 1.0],
    };
    let br = TexturedVertex {
        position: [1.0, -1.0],
        uv: [1.0, 1.0],
    };
    [tl, bl, tr, tr, bl, br]
}

/// RGBA8 contents of the backbuffer. No render target may be bound.
pub fn read_backbuffer(device: &mut RenderDevice) -> Vec<u8> {
    let (width, height) = (device.width(), device.height());
    let copy = Texture::new(device, &TextureInfo::new(width, height, Format::Byte4)).expect("readback texture");
    device
        .read_pixels([0, 0], [width, height], &copy)
        .expect("read_pixels");
    copy.read(device).expect("read texture")
}

pub fn pixel(data: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let at = ((y * width + x) * 4) as usize;
    [data[at], data[at + 1], data[at + 2], data[at + 3]]
}
