use crate::gpu::{Format, Sampler, SamplerState, TextureAddress, TextureRegion};

fn quantize(v: f32) -> f32 {
    (v.clamp(0.0, 1.0) * 255.0).round() / 255.0
}

/// Unpacks one texel or vertex attribute. Byte formats are unsigned
/// normalized; absent channels read as `(0, 0, 0, 1)`.
pub fn decode_texel(format: Format, bytes: &[u8]) -> [f32; 4] {
    let mut out = [0.0, 0.0, 0.0, 1.0];
    for (c, slot) in out.iter_mut().enumerate().take(format.channels() as usize) {
        *slot = if format.is_float() {
            bytemuck::pod_read_unaligned::<f32>(&bytes[c * 4..c * 4 + 4])
        } else {
            bytes[c] as f32 / 255.0
        };
    }
    out
}

/// CPU-side texel storage. Color levels hold linear floats; byte formats
/// are quantized on every store so blending sees what an 8-bit target
/// would hold.
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub levels: Vec<Vec<[f32; 4]>>,
}

pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

impl Image {
    pub fn new(width: u32, height: u32, format: Format, mip_levels: u32) -> Self {
        let levels = (0..mip_levels.max(1))
            .map(|level| {
                let (w, h) = mip_extent(width, height, level);
                vec![[0.0, 0.0, 0.0, 0.0]; (w * h) as usize]
            })
            .collect();
        Self {
            width,
            height,
            format,
            levels,
        }
    }

    pub fn extent(&self, level: u32) -> (u32, u32) {
        mip_extent(self.width, self.height, level)
    }

    /// Normalizes a value to what the format can represent.
    pub fn representable(&self, value: [f32; 4]) -> [f32; 4] {
        let channels = self.format.channels() as usize;
        let mut out = [0.0, 0.0, 0.0, 1.0];
        for c in 0..channels {
            out[c] = if self.format.is_float() {
                value[c]
            } else {
                quantize(value[c])
            };
        }
        out
    }

    pub fn load(&self, level: u32, x: u32, y: u32) -> [f32; 4] {
        let (w, _) = self.extent(level);
        self.levels[level as usize][(y * w + x) as usize]
    }

    pub fn store(&mut self, level: u32, x: u32, y: u32, value: [f32; 4]) {
        let (w, _) = self.extent(level);
        let value = self.representable(value);
        self.levels[level as usize][(y * w + x) as usize] = value;
    }

    pub fn clear(&mut self, value: [f32; 4]) {
        let value = self.representable(value);
        for texel in &mut self.levels[0] {
            *texel = value;
        }
    }

    fn encode(&self, texel: [f32; 4], out: &mut Vec<u8>) {
        for value in texel.iter().take(self.format.channels() as usize) {
            if self.format.is_float() {
                out.extend_from_slice(&value.to_le_bytes());
            } else {
                out.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }
    }

    pub fn write_region(&mut self, region: &TextureRegion, data: &[u8]) {
        let bpp = self.format.bytes_per_pixel() as usize;
        for y in 0..region.size[1] {
            for x in 0..region.size[0] {
                let src = ((y * region.size[0] + x) as usize) * bpp;
                let texel = decode_texel(self.format, &data[src..src + bpp]);
                self.store(
                    region.mip_level,
                    region.offset[0] + x,
                    region.offset[1] + y,
                    texel,
                );
            }
        }
    }

    /// Tightly packed mip-0 bytes.
    pub fn read(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((self.width * self.height * self.format.bytes_per_pixel()) as usize);
        for texel in &self.levels[0] {
            self.encode(*texel, &mut out);
        }
        out
    }

    /// Box-filters every level from the one above it.
    pub fn generate_mips(&mut self) {
        for level in 1..self.levels.len() as u32 {
            let (w, h) = self.extent(level);
            let (pw, ph) = self.extent(level - 1);
            for y in 0..h {
                for x in 0..w {
                    let mut sum = [0.0f32; 4];
                    let mut n = 0.0;
                    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        let sx = (x * 2 + dx).min(pw - 1);
                        let sy = (y * 2 + dy).min(ph - 1);
                        let t = self.load(level - 1, sx, sy);
                        for c in 0..4 {
                            sum[c] += t[c];
                        }
                        n += 1.0;
                    }
                    self.store(level, x, y, sum.map(|s| s / n));
                }
            }
        }
    }

    fn address(coord: i64, size: u32, mode: TextureAddress) -> u32 {
        let size = size as i64;
        let wrapped = match mode {
            TextureAddress::Clamp => coord.clamp(0, size - 1),
            TextureAddress::Wrap => coord.rem_euclid(size),
            TextureAddress::MirrorWrap => {
                let period = coord.rem_euclid(size * 2);
                if period < size {
                    period
                } else {
                    size * 2 - 1 - period
                }
            }
        };
        wrapped as u32
    }

    /// Samples mip 0 at normalized coordinates.
    pub fn sample(&self, uv: [f32; 2], sampler: &SamplerState) -> [f32; 4] {
        let (w, h) = (self.width, self.height);
        let fetch = |x: i64, y: i64| {
            self.load(
                0,
                Self::address(x, w, sampler.address),
                Self::address(y, h, sampler.address),
            )
        };
        match sampler.sampler {
            Sampler::Nearest => {
                let x = (uv[0] * w as f32).floor() as i64;
                let y = (uv[1] * h as f32).floor() as i64;
                fetch(x, y)
            }
            Sampler::Linear => {
                let fx = uv[0] * w as f32 - 0.5;
                let fy = uv[1] * h as f32 - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let (tx, ty) = (fx - x0, fy - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let a = fetch(x0, y0);
                let b = fetch(x0 + 1, y0);
                let c = fetch(x0, y0 + 1);
                let d = fetch(x0 + 1, y0 + 1);
                let mut out = [0.0; 4];
                for i in 0..4 {
                    let top = a[i] + (b[i] - a[i]) * tx;
                    let bottom = c[i] + (d[i] - c[i]) * tx;
                    out[i] = top + (bottom - top) * ty;
                }
                out
            }
        }
    }
}

/// Depth and stencil planes of a render target.
pub struct DepthStencil {
    pub width: u32,
    pub height: u32,
    pub depth: Vec<f32>,
    pub stencil: Vec<u8>,
}

impl DepthStencil {
    pub fn new(width: u32, height: u32) -> Self {
        let n = (width * height) as usize;
        Self {
            width,
            height,
            depth: vec![1.0; n],
            stencil: vec![0; n],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn byte_texels_round_trip_exactly() {
        let mut image = Image::new(2, 1, Format::Byte4, 1);
        let bytes = [10u8, 20, 30, 40, 250, 128, 0, 255];
        image.write_region(
            &TextureRegion {
                mip_level: 0,
                offset: [0, 0],
                size: [2, 1],
            },
            &bytes,
        );
        assert_eq!(image.read(), bytes.to_vec());
    }

    #[test]
    fn missing_channels_read_as_default() {
        let mut image = Image::new(1, 1, Format::Float1, 1);
        image.store(0, 0, 0, [0.25, 0.5, 0.75, 0.0]);
        assert_eq!(image.load(0, 0, 0), [0.25, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn linear_sampling_hits_texel_centers() {
        let mut image = Image::new(2, 1, Format::Float1, 1);
        image.store(0, 0, 0, [0.0; 4]);
        image.store(0, 1, 0, [1.0; 4]);
        let linear = SamplerState::default();
        assert_abs_diff_eq!(image.sample([0.25, 0.5], &linear)[0], 0.0);
        assert_abs_diff_eq!(image.sample([0.5, 0.5], &linear)[0], 0.5);
        assert_abs_diff_eq!(image.sample([0.75, 0.5], &linear)[0], 1.0);
    }

    #[test]
    fn address_modes() {
        assert_eq!(Image::address(-1, 4, TextureAddress::Clamp), 0);
        assert_eq!(Image::address(5, 4, TextureAddress::Wrap), 1);
        assert_eq!(Image::address(4, 4, TextureAddress::MirrorWrap), 3);
        assert_eq!(Image::address(-1, 4, TextureAddress::MirrorWrap), 0);
    }

    #[test]
    fn mips_average_down() {
        let mut image = Image::new(2, 2, Format::Float1, 2);
        for (i, (x, y)) in [(0, 0), (1, 0), (0, 1), (1, 1)].into_iter().enumerate() {
            image.store(0, x, y, [i as f32, 0.0, 0.0, 1.0]);
        }
        image.generate_mips();
        assert_abs_diff_eq!(image.load(1, 0, 0)[0], 1.5);
    }
}
