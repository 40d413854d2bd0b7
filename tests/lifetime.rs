mod common;

use common::{color_shader, software_device, Vertex};
use prism::{Format, Texture, TextureInfo, UniformBuffer, VertexBuffer};

#[test]
fn dropped_buffer_waits_for_its_frame_slot() {
    let mut device = software_device(8, 8);
    let buffer = UniformBuffer::new(&mut device, 64).unwrap();
    drop(buffer);

    device.present().unwrap();
    let stats = device.stats();
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.frame_index, 1);
    assert_eq!(stats.pending_destruction, 1);
    assert_eq!(stats.objects_destroyed, 0);

    device.present().unwrap();
    let stats = device.stats();
    assert_eq!(stats.frame_index, 0);
    assert!(stats.fence_waits >= 1);
    assert_eq!(stats.pending_destruction, 0);
    assert_eq!(stats.objects_destroyed, 1);
}

#[test]
fn flush_releases_everything_pending() {
    let mut device = software_device(8, 8);
    let texture = Texture::new(&mut device, &TextureInfo::new(4, 4, Format::Byte4)).unwrap();
    drop(texture);
    device.flush().unwrap();
    let stats = device.stats();
    assert_eq!(stats.pending_destruction, 0);
    assert_eq!(stats.objects_destroyed, 1);
}

#[test]
fn buffer_dropped_after_draw_still_renders() {
    let mut device = software_device(8, 8);
    let shader = color_shader(&mut device);
    let white = [1.0; 4];
    let vertices = VertexBuffer::from_slice(
        &mut device,
        &[
            Vertex::new([-1.0, -1.0], white),
            Vertex::new([3.0, -1.0], white),
            Vertex::new([-1.0, 3.0], white),
        ],
    )
    .unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&vertices);
    device.clear(Some([0.0, 0.0, 0.0, 1.0]), None, None).unwrap();
    device.draw(3, 0, 1).unwrap();
    drop(vertices);

    let pixels = common::read_backbuffer(&mut device);
    assert!(pixels.chunks_exact(4).all(|t| t == [255, 255, 255, 255]));
}

#[test]
fn drawn_vertex_buffer_outlives_its_frame() {
    let mut device = software_device(8, 8);
    let shader = color_shader(&mut device);
    let vertices = VertexBuffer::from_slice(
        &mut device,
        &[
            Vertex::new([-1.0, -1.0], [1.0; 4]),
            Vertex::new([3.0, -1.0], [1.0; 4]),
            Vertex::new([-1.0, 3.0], [1.0; 4]),
        ],
    )
    .unwrap();
    device.set_shader(&shader);
    device.set_vertex_buffer(&vertices);
    device.draw(3, 0, 1).unwrap();
    drop(vertices);

    device.present().unwrap();
    let stats = device.stats();
    assert_eq!(stats.pending_destruction, 1);
    assert_eq!(stats.objects_destroyed, 0);
    let waits = stats.fence_waits;

    device.present().unwrap();
    let stats = device.stats();
    assert_eq!(stats.fence_waits, waits + 1);
    assert_eq!(stats.pending_destruction, 0);
    assert_eq!(stats.objects_destroyed, 1);
}

#[test]
fn frame_ring_cycles_through_slots() {
    let mut device = software_device(4, 4);
    for frame in 1..=5u64 {
        device.present().unwrap();
        let stats = device.stats();
        assert_eq!(stats.frames, frame);
        assert_eq!(stats.frame_index, (frame % 2) as usize);
    }
    assert!(device.stats().fence_waits >= 3);
}
