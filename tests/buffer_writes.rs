mod common;

use std::sync::Arc;

use common::{color_shader, pixel, read_backbuffer, software_device, UniformColorShader, Vertex};
use prism::{Shader, ShaderInfo, UniformBuffer, VertexBuffer, INLINE_UPDATE_LIMIT};

#[test]
fn large_vertex_writes_go_through_staging() {
    let mut device = software_device(8, 8);
    let shader = color_shader(&mut device);
    let white = [1.0; 4];
    let mut vertices = vec![Vertex::new([0.0, 0.0], [0.0; 4]); 4096];
    vertices[..3].copy_from_slice(&[
        Vertex::new([-1.0, -1.0], white),
        Vertex::new([3.0, -1.0], white),
        Vertex::new([-1.0, 3.0], white),
    ]);
    let bytes = bytemuck::cast_slice::<_, u8>(&vertices).len() as u64;
    assert!(bytes > INLINE_UPDATE_LIMIT as u64);

    let buffer = VertexBuffer::new(&mut device, bytes, std::mem::size_of::<Vertex>() as u32).unwrap();
    // Exactly at the limit still updates inline.
    buffer.write(&mut device, &vec![0u8; INLINE_UPDATE_LIMIT]).unwrap();
    assert_eq!(device.stats().staging_uploads, 0);

    buffer.write_slice(&mut device, &vertices).unwrap();
    assert_eq!(device.stats().staging_uploads, 1);

    device.set_shader(&shader);
    device.set_vertex_buffer(&buffer);
    device.clear(Some([0.0, 0.0, 0.0, 1.0]), None, None).unwrap();
    device.draw(3, 0, 1).unwrap();

    let pixels = read_backbuffer(&mut device);
    assert!(pixels.chunks_exact(4).all(|t| t == [255, 255, 255, 255]));
}

#[test]
fn unaligned_writes_patch_the_middle_of_a_buffer() {
    let mut device = software_device(4, 4);
    let shader = Shader::new(
        &mut device,
        &ShaderInfo::host("tint", Vertex::layout(), Arc::new(UniformColorShader)),
    )
    .unwrap();
    let c = [0.0; 4];
    let triangle = VertexBuffer::from_slice(
        &mut device,
        &[
            Vertex::new([-1.0, -1.0], c),
            Vertex::new([3.0, -1.0], c),
            Vertex::new([-1.0, 3.0], c),
        ],
    )
    .unwrap();
    let tint = UniformBuffer::from_value(&mut device, &[1.0f32; 4]).unwrap();
    let before = device.stats().staging_uploads;

    // 1.0 is [00, 00, 80, 3f]; zeroing its top three bytes leaves 0.0 in green.
    tint.write_at(&mut device, 5, &[0, 0, 0]).unwrap();
    assert_eq!(device.stats().staging_uploads, before + 1);

    device.set_shader(&shader);
    device.set_vertex_buffer(&triangle);
    device.set_uniform_buffer(0, &tint);
    device.draw(3, 0, 1).unwrap();
    assert_eq!(pixel(&read_backbuffer(&mut device), 4, 2, 2), [255, 0, 255, 255]);
}
