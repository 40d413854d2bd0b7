mod common;

use common::{fullscreen_quad, pixel, read_backbuffer, software_device, textured_shader};
use prism::{Format, GPUError, Sampler, Texture, TextureInfo, TextureRegion, VertexBuffer};

fn checker(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let v = if (x + y) % 2 == 0 { 255 } else { 0 };
            pixels.extend_from_slice(&[v, (x * 16) as u8, (y * 16) as u8, 255]);
        }
    }
    pixels
}

#[test]
fn byte_texture_reads_back_what_was_written() {
    let mut device = software_device(4, 4);
    let pixels = checker(7, 5);
    let texture = Texture::with_data(&mut device, &TextureInfo::new(7, 5, Format::Byte4), &pixels).unwrap();
    assert_eq!(texture.read(&mut device).unwrap(), pixels);
    assert_eq!(device.stats().staging_uploads, 1);
}

#[test]
fn float_texture_keeps_full_precision() {
    let mut device = software_device(4, 4);
    let texels: Vec<f32> = (0..3 * 2 * 4).map(|i| i as f32 * 0.37 - 2.0).collect();
    let info = TextureInfo::new(3, 2, Format::Float4);
    let texture = Texture::with_data(&mut device, &info, bytemuck::cast_slice(&texels)).unwrap();
    let back = texture.read(&mut device).unwrap();
    let back: Vec<f32> = back
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    assert_eq!(back, texels);
}

#[test]
fn write_region_updates_only_the_region() {
    let mut device = software_device(4, 4);
    let texture = Texture::with_data(&mut device, &TextureInfo::new(4, 4, Format::Byte1), &[10; 16]).unwrap();
    let region = TextureRegion {
        mip_level: 0,
        offset: [1, 2],
        size: [2, 1],
    };
    texture.write_region(&mut device, &region, &[200, 201]).unwrap();

    let back = texture.read(&mut device).unwrap();
    let mut expected = vec![10u8; 16];
    expected[2 * 4 + 1] = 200;
    expected[2 * 4 + 2] = 201;
    assert_eq!(back, expected);
}

#[test]
fn three_channel_textures_are_rejected() {
    let mut device = software_device(4, 4);
    let result = Texture::new(&mut device, &TextureInfo::new(4, 4, Format::Byte3));
    assert!(matches!(result, Err(GPUError::UnsupportedFormat(Format::Byte3))));
}

#[test]
fn mipmapped_texture_keeps_its_base_level() {
    let mut device = software_device(4, 4);
    let pixels = checker(8, 4);
    let info = TextureInfo::new(8, 4, Format::Byte4).with_mipmap();
    let texture = Texture::with_data(&mut device, &info, &pixels).unwrap();
    assert_eq!(texture.mip_count(), 4);
    texture.generate_mips(&mut device).unwrap();
    assert_eq!(texture.read(&mut device).unwrap(), pixels);
}

#[test]
fn nearest_sampling_maps_texels_to_quadrants() {
    let mut device = software_device(4, 4);
    let texels: [u8; 16] = [
        255, 0, 0, 255, /* */ 0, 255, 0, 255, //
        0, 0, 255, 255, /* */ 255, 255, 255, 255,
    ];
    let texture = Texture::with_data(&mut device, &TextureInfo::new(2, 2, Format::Byte4), &texels).unwrap();
    let shader = textured_shader(&mut device);
    let quad = VertexBuffer::from_slice(&mut device, &fullscreen_quad()).unwrap();

    device.set_shader(&shader);
    device.set_vertex_buffer(&quad);
    device.set_texture(0, &texture);
    device.set_sampler(Sampler::Nearest);
    device.clear(Some([0.0; 4]), None, None).unwrap();
    device.draw(6, 0, 1).unwrap();

    let pixels = read_backbuffer(&mut device);
    assert_eq!(pixel(&pixels, 4, 0, 0), [255, 0, 0, 255]);
    assert_eq!(pixel(&pixels, 4, 1, 1), [255, 0, 0, 255]);
    assert_eq!(pixel(&pixels, 4, 3, 0), [0, 255, 0, 255]);
    assert_eq!(pixel(&pixels, 4, 0, 3), [0, 0, 255, 255]);
    assert_eq!(pixel(&pixels, 4, 2, 2), [255, 255, 255, 255]);
    assert_eq!(device.stats().samplers_created, 1);
}
