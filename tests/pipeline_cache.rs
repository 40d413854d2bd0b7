mod common;

use common::{color_shader, fullscreen_quad, software_device, textured_shader, Vertex};
use prism::{BlendMode, Format, Texture, TextureInfo, Topology, VertexBuffer};

fn strip() -> [Vertex; 4] {
    let c = [0.2, 0.4, 0.6, 1.0];
    [
        Vertex::new([-1.0, -1.0], c),
        Vertex::new([1.0, -1.0], c),
        Vertex::new([-1.0, 1.0], c),
        Vertex::new([1.0, 1.0], c),
    ]
}

#[test]
fn repeated_draws_reuse_the_bound_pipeline() {
    let mut device = software_device(8, 8);
    let shader = color_shader(&mut device);
    let vertices = VertexBuffer::from_slice(&mut device, &strip()).unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&vertices);
    for _ in 0..4 {
        device.draw(3, 0, 1).unwrap();
    }

    let stats = device.stats();
    assert_eq!(stats.draw_calls, 4);
    assert_eq!(stats.pipelines_created, 1);
    assert_eq!(stats.pipeline_binds, 1);
    assert_eq!(stats.vertex_buffer_binds, 1);
}

#[test]
fn blend_change_compiles_once_and_hits_the_cache_after() {
    let mut device = software_device(8, 8);
    let shader = color_shader(&mut device);
    let vertices = VertexBuffer::from_slice(&mut device, &strip()).unwrap();
    device.set_shader(&shader);
    device.set_vertex_buffer(&vertices);

    device.draw(3, 0, 1).unwrap();
    device.set_blend_mode(Some(BlendMode::ALPHA_BLEND));
    device.draw(3, 0, 1).unwrap();
    assert_eq!(device.stats().pipelines_created, 2);

    device.set_blend_mode(None);
    device.draw(3, 0, 1).unwrap();
    device.set_blend_mode(Some(BlendMode::ALPHA_BLEND));
    device.draw(3, 0, 1).unwrap();

    let stats = device.stats();
    assert_eq!(stats.pipelines_created, 2);
    assert_eq!(stats.pipeline_binds, 4);
}

#[test]
fn topology_within_a_class_is_dynamic() {
    let mut device = software_device(8, 8);
    let shader = color_shader(&mut device);
    let vertices = VertexBuffer::from_slice(&mut device, &strip()).unwrap();
    device.set_shader(&shader);
    device.set_vertex_buffer(&vertices);

    device.draw(3, 0, 1).unwrap();
    device.set_topology(Topology::TriangleStrip);
    device.draw(4, 0, 1).unwrap();
    assert_eq!(device.stats().pipelines_created, 1);

    device.set_topology(Topology::LineList);
    device.draw(4, 0, 1).unwrap();
    assert_eq!(device.stats().pipelines_created, 2);
}

#[test]
fn rebinding_the_same_texture_is_free() {
    let mut device = software_device(8, 8);
    let shader = textured_shader(&mut device);
    let quad = VertexBuffer::from_slice(&mut device, &fullscreen_quad()).unwrap();
    let texture = Texture::with_data(&mut device, &TextureInfo::new(1, 1, Format::Byte4), &[9, 9, 9, 255]).unwrap();
    let other = Texture::with_data(&mut device, &TextureInfo::new(1, 1, Format::Byte4), &[1, 2, 3, 255]).unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&quad);
    device.set_texture(0, &texture);
    device.draw(6, 0, 1).unwrap();
    device.set_texture(0, &texture);
    device.draw(6, 0, 1).unwrap();
    assert_eq!(device.stats().binding_updates, 1);

    device.set_texture(0, &other);
    device.draw(6, 0, 1).unwrap();
    assert_eq!(device.stats().binding_updates, 2);
}

#[test]
fn present_forgets_committed_state() {
    let mut device = software_device(8, 8);
    let shader = color_shader(&mut device);
    let vertices = VertexBuffer::from_slice(&mut device, &strip()).unwrap();
    device.set_shader(&shader);
    device.set_vertex_buffer(&vertices);

    device.draw(3, 0, 1).unwrap();
    device.present().unwrap();
    device.draw(3, 0, 1).unwrap();

    let stats = device.stats();
    assert_eq!(stats.pipelines_created, 1);
    assert_eq!(stats.pipeline_binds, 2);
    assert_eq!(stats.vertex_buffer_binds, 2);
}

#[test]
fn dropping_a_shader_evicts_its_pipelines() {
    let mut device = software_device(8, 8);
    let shader = color_shader(&mut device);
    let vertices = VertexBuffer::from_slice(&mut device, &strip()).unwrap();
    device.set_shader(&shader);
    device.set_vertex_buffer(&vertices);
    device.draw(3, 0, 1).unwrap();
    drop(shader);

    // The shader and its one pipeline wait out the frame that drew with them.
    device.present().unwrap();
    let stats = device.stats();
    assert_eq!(stats.pending_destruction, 2);
    assert_eq!(stats.objects_destroyed, 0);

    device.present().unwrap();
    let stats = device.stats();
    assert_eq!(stats.pending_destruction, 0);
    assert_eq!(stats.objects_destroyed, 2);

    let replacement = color_shader(&mut device);
    device.set_shader(&replacement);
    device.draw(3, 0, 1).unwrap();
    assert_eq!(device.stats().pipelines_created, 2);
}
