mod common;

use common::{pixel, read_backbuffer, software_device};
use prism::{Format, RenderTarget};

#[test]
fn clear_render_target_to_green() {
    let mut device = software_device(16, 16);
    let target = RenderTarget::new(&mut device, 8, 8, Format::Byte4).unwrap();

    device.set_render_target(Some(&target));
    device.clear(Some([0.0, 1.0, 0.0, 1.0]), Some(1.0), Some(0)).unwrap();

    let pixels = target.read(&mut device).unwrap();
    assert_eq!(pixels.len(), 8 * 8 * 4);
    for texel in pixels.chunks_exact(4) {
        assert_eq!(texel, [0, 255, 0, 255]);
    }
}

#[test]
fn clear_backbuffer() {
    let mut device = software_device(4, 3);
    device.clear(Some([1.0, 0.0, 0.0, 1.0]), None, None).unwrap();
    let pixels = read_backbuffer(&mut device);
    assert_eq!(pixels.len(), 4 * 3 * 4);
    assert_eq!(pixel(&pixels, 4, 0, 0), [255, 0, 0, 255]);
    assert_eq!(pixel(&pixels, 4, 3, 2), [255, 0, 0, 255]);
}

#[test]
fn later_clear_wins() {
    let mut device = software_device(2, 2);
    device.clear(Some([1.0, 1.0, 1.0, 1.0]), None, None).unwrap();
    device.clear(Some([0.0, 0.0, 1.0, 0.5]), None, None).unwrap();
    let pixels = read_backbuffer(&mut device);
    assert_eq!(pixel(&pixels, 2, 1, 1), [0, 0, 255, 128]);
}
