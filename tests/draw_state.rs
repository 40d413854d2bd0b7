mod common;

use std::sync::Arc;

use common::{pixel, read_backbuffer, software_device, textured_shader, TexturedVertex, UniformColorShader, Vertex};
use prism::{
    BlendMode, ComparisonFunc, DepthBias, DepthMode, Format, RenderDevice, Sampler, Scissor, Shader, ShaderInfo,
    StencilMode, StencilOp, Texture, TextureAddress, TextureInfo, UniformBuffer, VertexBuffer, Viewport,
};

fn fullscreen(device: &mut RenderDevice) -> VertexBuffer {
    let c = [0.0; 4];
    VertexBuffer::from_slice(
        device,
        &[
            Vertex::new([-1.0, -1.0], c),
            Vertex::new([3.0, -1.0], c),
            Vertex::new([-1.0, 3.0], c),
        ],
    )
    .unwrap()
}

fn uniform_shader(device: &mut RenderDevice) -> Shader {
    Shader::new(device, &ShaderInfo::host("tint", Vertex::layout(), Arc::new(UniformColorShader))).unwrap()
}

#[test]
fn uniform_buffer_feeds_the_fragment_stage() {
    let mut device = software_device(4, 4);
    let shader = uniform_shader(&mut device);
    let triangle = fullscreen(&mut device);
    let tint = UniformBuffer::from_value(&mut device, &[0.0f32, 1.0, 1.0, 1.0]).unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&triangle);
    device.set_uniform_buffer(0, &tint);
    device.draw(3, 0, 1).unwrap();
    assert_eq!(pixel(&read_backbuffer(&mut device), 4, 2, 2), [0, 255, 255, 255]);

    tint.write_value(&mut device, &[1.0f32, 0.0, 0.0, 1.0]).unwrap();
    device.draw(3, 0, 1).unwrap();
    assert_eq!(pixel(&read_backbuffer(&mut device), 4, 2, 2), [255, 0, 0, 255]);
}

#[test]
fn alpha_blending_mixes_with_the_target() {
    let mut device = software_device(4, 4);
    let shader = uniform_shader(&mut device);
    let triangle = fullscreen(&mut device);
    let tint = UniformBuffer::from_value(&mut device, &[1.0f32, 1.0, 1.0, 0.5]).unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&triangle);
    device.set_uniform_buffer(0, &tint);
    device.set_blend_mode(Some(BlendMode::NON_PREMULTIPLIED));
    device.clear(Some([0.0, 0.0, 0.0, 1.0]), None, None).unwrap();
    device.draw(3, 0, 1).unwrap();

    let [r, g, b, _] = pixel(&read_backbuffer(&mut device), 4, 1, 1);
    for c in [r, g, b] {
        assert!((127..=128).contains(&c), "channel {}", c);
    }
}

#[test]
fn scissor_and_viewport_limit_coverage() {
    let mut device = software_device(8, 8);
    let shader = uniform_shader(&mut device);
    let triangle = fullscreen(&mut device);
    let tint = UniformBuffer::from_value(&mut device, &[1.0f32; 4]).unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&triangle);
    device.set_uniform_buffer(0, &tint);
    device.clear(Some([0.0, 0.0, 0.0, 1.0]), None, None).unwrap();
    device.set_scissor(Some(Scissor {
        position: [2, 2],
        size: [2, 2],
    }));
    device.draw(3, 0, 1).unwrap();
    device.set_scissor(None);
    device.set_viewport(Some(Viewport {
        position: [6.0, 0.0],
        size: [2.0, 2.0],
        min_depth: 0.0,
        max_depth: 1.0,
    }));
    device.draw(3, 0, 1).unwrap();
    device.set_viewport(None);

    let pixels = read_backbuffer(&mut device);
    let white = [255, 255, 255, 255];
    let black = [0, 0, 0, 255];
    assert_eq!(pixel(&pixels, 8, 2, 2), white);
    assert_eq!(pixel(&pixels, 8, 3, 3), white);
    assert_eq!(pixel(&pixels, 8, 4, 4), black);
    assert_eq!(pixel(&pixels, 8, 1, 2), black);
    assert_eq!(pixel(&pixels, 8, 7, 0), white);
    assert_eq!(pixel(&pixels, 8, 6, 1), white);
    assert_eq!(pixel(&pixels, 8, 5, 0), black);
    assert_eq!(pixel(&pixels, 8, 6, 2), black);
}

#[test]
fn depth_test_rejects_farther_fragments() {
    let mut device = software_device(4, 4);
    let shader = uniform_shader(&mut device);
    let triangle = fullscreen(&mut device);
    let red = UniformBuffer::from_value(&mut device, &[1.0f32, 0.0, 0.0, 1.0]).unwrap();
    let green = UniformBuffer::from_value(&mut device, &[0.0f32, 1.0, 0.0, 1.0]).unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&triangle);
    device.set_depth_mode(Some(DepthMode::new(ComparisonFunc::Less)));
    device.clear(Some([0.0, 0.0, 0.0, 1.0]), Some(1.0), None).unwrap();
    device.set_uniform_buffer(0, &red);
    device.draw(3, 0, 1).unwrap();
    // Same depth again; Less keeps the first.
    device.set_uniform_buffer(0, &green);
    device.draw(3, 0, 1).unwrap();

    assert_eq!(pixel(&read_backbuffer(&mut device), 4, 1, 1), [255, 0, 0, 255]);
}

#[test]
fn depth_bias_pushes_fragments_back() {
    let mut device = software_device(4, 4);
    let shader = uniform_shader(&mut device);
    let triangle = fullscreen(&mut device);
    let red = UniformBuffer::from_value(&mut device, &[1.0f32, 0.0, 0.0, 1.0]).unwrap();
    let green = UniformBuffer::from_value(&mut device, &[0.0f32, 1.0, 0.0, 1.0]).unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&triangle);
    device.set_depth_mode(Some(DepthMode::new(ComparisonFunc::Less)));
    device.clear(Some([0.0, 0.0, 0.0, 1.0]), Some(1.0), None).unwrap();

    // Half the depth range in units of 2^-24.
    device.set_depth_bias(Some(DepthBias {
        factor: 0.0,
        units: (1 << 23) as f32,
    }));
    device.set_uniform_buffer(0, &red);
    device.draw(3, 0, 1).unwrap();

    device.set_depth_bias(None);
    device.set_uniform_buffer(0, &green);
    device.draw(3, 0, 1).unwrap();

    assert_eq!(pixel(&read_backbuffer(&mut device), 4, 1, 1), [0, 255, 0, 255]);
}

#[test]
fn stencil_masks_later_draws() {
    let mut device = software_device(4, 4);
    let shader = uniform_shader(&mut device);
    let triangle = fullscreen(&mut device);
    let red = UniformBuffer::from_value(&mut device, &[1.0f32, 0.0, 0.0, 1.0]).unwrap();
    let green = UniformBuffer::from_value(&mut device, &[0.0f32, 1.0, 0.0, 1.0]).unwrap();
    let blue = UniformBuffer::from_value(&mut device, &[0.0f32, 0.0, 1.0, 1.0]).unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&triangle);
    device.clear(Some([0.0, 0.0, 0.0, 1.0]), None, Some(0)).unwrap();

    // Tag the left half with 1.
    device.set_scissor(Some(Scissor {
        position: [0, 0],
        size: [2, 4],
    }));
    device.set_stencil_mode(Some(StencilMode {
        pass_op: StencilOp::Replace,
        reference: 1,
        ..Default::default()
    }));
    device.set_uniform_buffer(0, &red);
    device.draw(3, 0, 1).unwrap();
    device.set_scissor(None);

    device.set_stencil_mode(Some(StencilMode {
        func: ComparisonFunc::Equal,
        reference: 1,
        ..Default::default()
    }));
    device.set_uniform_buffer(0, &green);
    device.draw(3, 0, 1).unwrap();
    let pixels = read_backbuffer(&mut device);
    assert_eq!(pixel(&pixels, 4, 1, 1), [0, 255, 0, 255]);
    assert_eq!(pixel(&pixels, 4, 3, 1), [0, 0, 0, 255]);

    device.set_stencil_mode(Some(StencilMode {
        func: ComparisonFunc::NotEqual,
        reference: 1,
        ..Default::default()
    }));
    device.set_uniform_buffer(0, &blue);
    device.draw(3, 0, 1).unwrap();
    let pixels = read_backbuffer(&mut device);
    assert_eq!(pixel(&pixels, 4, 1, 1), [0, 255, 0, 255]);
    assert_eq!(pixel(&pixels, 4, 3, 1), [0, 0, 255, 255]);
}

#[test]
fn texture_address_picks_texels_outside_the_unit_square() {
    let mut device = software_device(4, 4);
    let shader = textured_shader(&mut device);
    // uv runs from 0 to 2 across the target.
    let quad = common::fullscreen_quad().map(|v| TexturedVertex {
        position: v.position,
        uv: [v.uv[0] * 2.0, v.uv[1]],
    });
    let vertices = VertexBuffer::from_slice(&mut device, &quad).unwrap();
    let texture = Texture::with_data(
        &mut device,
        &TextureInfo::new(2, 1, Format::Byte4),
        &[255, 0, 0, 255, 0, 255, 0, 255],
    )
    .unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&vertices);
    device.set_texture(0, &texture);
    device.set_sampler(Sampler::Nearest);

    let (r, g) = ([255, 0, 0, 255], [0, 255, 0, 255]);
    let cases = [
        (TextureAddress::Clamp, [r, g, g, g]),
        (TextureAddress::Wrap, [r, g, r, g]),
        (TextureAddress::MirrorWrap, [r, g, g, r]),
    ];
    for (address, expected) in cases {
        device.set_texture_address(address);
        device.draw(6, 0, 1).unwrap();
        let pixels = read_backbuffer(&mut device);
        let row: Vec<[u8; 4]> = (0..4).map(|x| pixel(&pixels, 4, x, 2)).collect();
        assert_eq!(row, expected, "{:?}", address);
    }
    assert_eq!(device.stats().samplers_created, 3);
}
