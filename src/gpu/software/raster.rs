//! Scanline-free triangle, line and point rasterization over an [`Image`].
//!
//! Clip space follows the usual convention: `x, y` in `[-w, w]` with `+y`
//! pointing up, depth in `[0, w]`.

use smallvec::SmallVec;

use super::image::{DepthStencil, Image};
use crate::gpu::{
    Blend, BlendFunction, BlendMode, CullMode, DepthBias, DepthMode, FragmentInput, FrontFace,
    HostShader, Scissor, ShaderResources, StencilMode, StencilOp, VertexOutput, Viewport,
};

/// Fixed-function state a draw runs with.
#[derive(Clone, Copy)]
pub struct Raster {
    pub viewport: Viewport,
    pub scissor: Scissor,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias: Option<DepthBias>,
    pub blend: Option<BlendMode>,
    pub depth: Option<DepthMode>,
    pub stencil: Option<StencilMode>,
}

pub struct Target<'a> {
    pub color: &'a mut Image,
    pub depth_stencil: Option<&'a mut DepthStencil>,
}

pub struct Program<'a> {
    pub shader: &'a dyn HostShader,
    pub resources: &'a dyn ShaderResources,
}

struct WindowVertex {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
    varyings: SmallVec<[f32; 16]>,
}

fn lerp_output(a: &VertexOutput, b: &VertexOutput, t: f32) -> VertexOutput {
    let mut position = [0.0; 4];
    for i in 0..4 {
        position[i] = a.position[i] + (b.position[i] - a.position[i]) * t;
    }
    let varyings = a
        .varyings
        .iter()
        .zip(b.varyings.iter())
        .map(|(x, y)| x + (y - x) * t)
        .collect();
    VertexOutput { position, varyings }
}

/// Sutherland-Hodgman against one plane; `distance` is positive inside.
fn clip_polygon(polygon: Vec<VertexOutput>, distance: impl Fn(&[f32; 4]) -> f32) -> Vec<VertexOutput> {
    let mut out = Vec::with_capacity(polygon.len() + 1);
    for i in 0..polygon.len() {
        let current = &polygon[i];
        let next = &polygon[(i + 1) % polygon.len()];
        let dc = distance(&current.position);
        let dn = distance(&next.position);
        if dc >= 0.0 {
            out.push(current.clone());
        }
        if (dc >= 0.0) != (dn >= 0.0) {
            out.push(lerp_output(current, next, dc / (dc - dn)));
        }
    }
    out
}

impl Raster {
    fn to_window(&self, v: &VertexOutput) -> WindowVertex {
        let [x, y, z, w] = v.position;
        let inv_w = 1.0 / w;
        let vp = &self.viewport;
        WindowVertex {
            x: vp.position[0] + (x * inv_w + 1.0) * 0.5 * vp.size[0],
            y: vp.position[1] + (1.0 - y * inv_w) * 0.5 * vp.size[1],
            z: vp.min_depth + z * inv_w * (vp.max_depth - vp.min_depth),
            inv_w,
            varyings: v.varyings.iter().map(|a| a * inv_w).collect(),
        }
    }

    /// Pixel bounds `[x0, y0, x1, y1)` a fragment may land in: the scissor
    /// clipped to the target and the viewport rectangle.
    fn bounds(&self, target: &Target<'_>) -> [i32; 4] {
        let s = self.scissor.clamped(target.color.width, target.color.height);
        let vp = &self.viewport;
        let vx0 = vp.position[0].min(vp.position[0] + vp.size[0]).floor() as i32;
        let vy0 = vp.position[1].min(vp.position[1] + vp.size[1]).floor() as i32;
        let vx1 = vp.position[0].max(vp.position[0] + vp.size[0]).ceil() as i32;
        let vy1 = vp.position[1].max(vp.position[1] + vp.size[1]).ceil() as i32;
        [
            s.position[0].max(vx0),
            s.position[1].max(vy0),
            (s.position[0] + s.size[0] as i32).min(vx1),
            (s.position[1] + s.size[1] as i32).min(vy1),
        ]
    }

    pub fn draw_triangle(&self, target: &mut Target<'_>, program: &Program<'_>, vertices: [&VertexOutput; 3]) {
        let mut polygon: Vec<VertexOutput> = vertices.iter().map(|v| (*v).clone()).collect();
        polygon = clip_polygon(polygon, |p| p[2]);
        polygon = clip_polygon(polygon, |p| p[3] - p[2]);
        if polygon.len() < 3 {
            return;
        }
        let window: Vec<WindowVertex> = polygon.iter().map(|v| self.to_window(v)).collect();
        for i in 1..window.len() - 1 {
            self.fill_triangle(target, program, [&window[0], &window[i], &window[i + 1]]);
        }
    }

    fn fill_triangle(&self, target: &mut Target<'_>, program: &Program<'_>, v: [&WindowVertex; 3]) {
        let edge = |a: &WindowVertex, b: &WindowVertex, px: f32, py: f32| {
            (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
        };
        let area = edge(v[0], v[1], v[2].x, v[2].y);
        if area == 0.0 || !area.is_finite() {
            return;
        }
        // Window space flips y, so positive area is clockwise in clip space.
        let counter_clockwise = area < 0.0;
        let front_facing = match self.front_face {
            FrontFace::CounterClockwise => counter_clockwise,
            FrontFace::Clockwise => !counter_clockwise,
        };
        match self.cull_mode {
            CullMode::Back if !front_facing => return,
            CullMode::Front if front_facing => return,
            _ => {}
        }
        let v = if area > 0.0 { v } else { [v[0], v[2], v[1]] };
        let area = area.abs();

        let top_left = |a: &WindowVertex, b: &WindowVertex| {
            let dx = b.x - a.x;
            let dy = b.y - a.y;
            (dy == 0.0 && dx > 0.0) || dy < 0.0
        };
        let owns = [top_left(v[1], v[2]), top_left(v[2], v[0]), top_left(v[0], v[1])];

        let bias = self.depth_bias.map_or(0.0, |bias| {
            // Depth plane gradients for the slope term.
            let dzdx = ((v[1].z - v[0].z) * (v[2].y - v[0].y) - (v[2].z - v[0].z) * (v[1].y - v[0].y)) / area;
            let dzdy = ((v[2].z - v[0].z) * (v[1].x - v[0].x) - (v[1].z - v[0].z) * (v[2].x - v[0].x)) / area;
            bias.units / (1 << 24) as f32 + bias.factor * dzdx.abs().max(dzdy.abs())
        });

        let [bx0, by0, bx1, by1] = self.bounds(target);
        let min_x = (v.iter().map(|p| p.x).fold(f32::MAX, f32::min).floor() as i32).max(bx0);
        let max_x = (v.iter().map(|p| p.x).fold(f32::MIN, f32::max).ceil() as i32).min(bx1);
        let min_y = (v.iter().map(|p| p.y).fold(f32::MAX, f32::min).floor() as i32).max(by0);
        let max_y = (v.iter().map(|p| p.y).fold(f32::MIN, f32::max).ceil() as i32).min(by1);

        let mut varyings: SmallVec<[f32; 16]> = SmallVec::new();
        for y in min_y..max_y {
            for x in min_x..max_x {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let w = [
                    edge(v[1], v[2], px, py),
                    edge(v[2], v[0], px, py),
                    edge(v[0], v[1], px, py),
                ];
                let inside = w
                    .iter()
                    .zip(owns.iter())
                    .all(|(w, owned)| *w > 0.0 || (*w == 0.0 && *owned));
                if !inside {
                    continue;
                }
                let l = w.map(|w| w / area);
                let z = l[0] * v[0].z + l[1] * v[1].z + l[2] * v[2].z + bias;
                let inv_w = l[0] * v[0].inv_w + l[1] * v[1].inv_w + l[2] * v[2].inv_w;
                varyings.clear();
                for i in 0..v[0].varyings.len() {
                    let sum = l[0] * v[0].varyings[i] + l[1] * v[1].varyings[i] + l[2] * v[2].varyings[i];
                    varyings.push(sum / inv_w);
                }
                self.shade(target, program, x as u32, y as u32, [px, py, z, inv_w], &varyings, front_facing);
            }
        }
    }

    pub fn draw_line(&self, target: &mut Target<'_>, program: &Program<'_>, vertices: [&VertexOutput; 2]) {
        if vertices.iter().any(|v| v.position[3] <= 0.0) {
            return;
        }
        let a = self.to_window(vertices[0]);
        let b = self.to_window(vertices[1]);
        let steps = (b.x - a.x).abs().max((b.y - a.y).abs()).ceil().max(1.0) as u32;
        let [bx0, by0, bx1, by1] = self.bounds(target);
        let mut varyings: SmallVec<[f32; 16]> = SmallVec::new();
        // The end point is excluded so strips do not shade joints twice.
        for step in 0..steps {
            let t = step as f32 / steps as f32;
            let x = (a.x + (b.x - a.x) * t).floor() as i32;
            let y = (a.y + (b.y - a.y) * t).floor() as i32;
            if x < bx0 || x >= bx1 || y < by0 || y >= by1 {
                continue;
            }
            let inv_w = a.inv_w + (b.inv_w - a.inv_w) * t;
            varyings.clear();
            for i in 0..a.varyings.len() {
                varyings.push((a.varyings[i] + (b.varyings[i] - a.varyings[i]) * t) / inv_w);
            }
            let z = a.z + (b.z - a.z) * t;
            let coord = [x as f32 + 0.5, y as f32 + 0.5, z, inv_w];
            self.shade(target, program, x as u32, y as u32, coord, &varyings, true);
        }
    }

    pub fn draw_point(&self, target: &mut Target<'_>, program: &Program<'_>, vertex: &VertexOutput) {
        if vertex.position[3] <= 0.0 {
            return;
        }
        let p = self.to_window(vertex);
        let (x, y) = (p.x.floor() as i32, p.y.floor() as i32);
        let [bx0, by0, bx1, by1] = self.bounds(target);
        if x < bx0 || x >= bx1 || y < by0 || y >= by1 {
            return;
        }
        let varyings: SmallVec<[f32; 16]> = p.varyings.iter().map(|a| a / p.inv_w).collect();
        let coord = [x as f32 + 0.5, y as f32 + 0.5, p.z, p.inv_w];
        self.shade(target, program, x as u32, y as u32, coord, &varyings, true);
    }

    #[allow(clippy::too_many_arguments)]
    fn shade(
        &self,
        target: &mut Target<'_>,
        program: &Program<'_>,
        x: u32,
        y: u32,
        frag_coord: [f32; 4],
        varyings: &[f32],
        front_facing: bool,
    ) {
        let color = program.shader.fragment(&FragmentInput {
            frag_coord,
            front_facing,
            varyings,
            resources: program.resources,
        });
        let Some(color) = color else {
            return;
        };

        if let Some(ds) = target.depth_stencil.as_deref_mut() {
            let index = (y * ds.width + x) as usize;
            if let Some(stencil) = &self.stencil {
                let stored = ds.stencil[index];
                let passed = stencil
                    .func
                    .test(stencil.reference & stencil.read_mask, stored & stencil.read_mask);
                if !passed {
                    ds.stencil[index] = apply_stencil(stencil, stencil.fail_op, stored);
                    return;
                }
            }
            if let Some(depth) = &self.depth {
                let z = frag_coord[2].clamp(0.0, 1.0);
                if !depth.func.test(z, ds.depth[index]) {
                    if let Some(stencil) = &self.stencil {
                        ds.stencil[index] = apply_stencil(stencil, stencil.depth_fail_op, ds.stencil[index]);
                    }
                    return;
                }
                if depth.write_mask {
                    ds.depth[index] = z;
                }
            }
            if let Some(stencil) = &self.stencil {
                ds.stencil[index] = apply_stencil(stencil, stencil.pass_op, ds.stencil[index]);
            }
        }

        let out = match &self.blend {
            Some(blend) => {
                let dst = target.color.load(0, x, y);
                let blended = blend_color(blend, color, dst);
                let mask = [
                    blend.color_mask.red,
                    blend.color_mask.green,
                    blend.color_mask.blue,
                    blend.color_mask.alpha,
                ];
                let mut out = dst;
                for c in 0..4 {
                    if mask[c] {
                        out[c] = blended[c];
                    }
                }
                out
            }
            None => color,
        };
        target.color.store(0, x, y, out);
    }
}

fn apply_stencil(mode: &StencilMode, op: StencilOp, stored: u8) -> u8 {
    let value = match op {
        StencilOp::Keep => stored,
        StencilOp::Zero => 0,
        StencilOp::Replace => mode.reference,
        StencilOp::IncrementSaturation => stored.saturating_add(1),
        StencilOp::DecrementSaturation => stored.saturating_sub(1),
        StencilOp::Invert => !stored,
        StencilOp::Increment => stored.wrapping_add(1),
        StencilOp::Decrement => stored.wrapping_sub(1),
    };
    (stored & !mode.write_mask) | (value & mode.write_mask)
}

fn factor(blend: Blend, src: [f32; 4], dst: [f32; 4], channel: usize) -> f32 {
    match blend {
        Blend::One => 1.0,
        Blend::Zero => 0.0,
        Blend::SrcColor => src[channel],
        Blend::InvSrcColor => 1.0 - src[channel],
        Blend::SrcAlpha => src[3],
        Blend::InvSrcAlpha => 1.0 - src[3],
        Blend::DstColor => dst[channel],
        Blend::InvDstColor => 1.0 - dst[channel],
        Blend::DstAlpha => dst[3],
        Blend::InvDstAlpha => 1.0 - dst[3],
    }
}

fn combine(func: BlendFunction, s: f32, d: f32, sf: f32, df: f32) -> f32 {
    match func {
        BlendFunction::Add => s * sf + d * df,
        BlendFunction::Subtract => s * sf - d * df,
        BlendFunction::ReverseSubtract => d * df - s * sf,
        BlendFunction::Min => s.min(d),
        BlendFunction::Max => s.max(d),
    }
}

pub fn blend_color(mode: &BlendMode, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for c in 0..3 {
        out[c] = combine(
            mode.color_func,
            src[c],
            dst[c],
            factor(mode.color_src, src, dst, c),
            factor(mode.color_dst, src, dst, c),
        );
    }
    out[3] = combine(
        mode.alpha_func,
        src[3],
        dst[3],
        factor(mode.alpha_src, src, dst, 3),
        factor(mode.alpha_dst, src, dst, 3),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{ComparisonFunc, Format, Ray, RayHit, VertexInput};
    use approx::assert_abs_diff_eq;
    use smallvec::smallvec;

    struct NoResources;

    impl ShaderResources for NoResources {
        fn uniform(&self, _: u32) -> Option<&[u8]> {
            None
        }
        fn storage(&self, _: u32) -> Option<&[u8]> {
            None
        }
        fn sample(&self, _: u32, _: [f32; 2]) -> [f32; 4] {
            [0.0; 4]
        }
        fn image_store(&self, _: u32, _: [u32; 2], _: [f32; 4]) {}
        fn intersect(&self, _: u32, _: &Ray) -> Option<RayHit> {
            None
        }
    }

    /// Writes its first varying as a grey level.
    struct Flat;

    impl HostShader for Flat {
        fn vertex(&self, _: &VertexInput<'_>) -> VertexOutput {
            unreachable!()
        }

        fn fragment(&self, input: &FragmentInput<'_>) -> Option<[f32; 4]> {
            let v = input.varyings.first().copied().unwrap_or(1.0);
            Some([v, v, v, 1.0])
        }
    }

    fn raster(width: u32, height: u32) -> Raster {
        Raster {
            viewport: Viewport::full(width, height),
            scissor: Scissor::full(width, height),
            cull_mode: CullMode::None,
            front_face: FrontFace::Clockwise,
            depth_bias: None,
            blend: None,
            depth: None,
            stencil: None,
        }
    }

    fn vertex(x: f32, y: f32, z: f32, value: f32) -> VertexOutput {
        VertexOutput {
            position: [x, y, z, 1.0],
            varyings: smallvec![value],
        }
    }

    fn covered(image: &Image) -> usize {
        image.levels[0].iter().filter(|t| t[0] > 0.0).count()
    }

    #[test]
    fn adjacent_triangles_share_edges_without_overlap() {
        let mut color = Image::new(16, 16, Format::Float4, 1);
        let mut r = raster(16, 16);
        r.blend = Some(BlendMode::ADDITIVE);
        let program = Program {
            shader: &Flat,
            resources: &NoResources,
        };
        let a = vertex(-1.0, -1.0, 0.0, 0.5);
        let b = vertex(1.0, -1.0, 0.0, 0.5);
        let c = vertex(1.0, 1.0, 0.0, 0.5);
        let d = vertex(-1.0, 1.0, 0.0, 0.5);
        let mut target = Target {
            color: &mut color,
            depth_stencil: None,
        };
        r.draw_triangle(&mut target, &program, [&a, &b, &c]);
        r.draw_triangle(&mut target, &program, [&a, &c, &d]);
        assert!(color.levels[0].iter().all(|t| (t[0] - 0.5).abs() < 1e-5));
    }

    #[test]
    fn back_faces_are_culled() {
        let mut color = Image::new(8, 8, Format::Float4, 1);
        let mut r = raster(8, 8);
        r.cull_mode = CullMode::Back;
        r.front_face = FrontFace::CounterClockwise;
        let program = Program {
            shader: &Flat,
            resources: &NoResources,
        };
        let a = vertex(-1.0, -1.0, 0.0, 1.0);
        let b = vertex(1.0, -1.0, 0.0, 1.0);
        let c = vertex(0.0, 1.0, 0.0, 1.0);
        let mut target = Target {
            color: &mut color,
            depth_stencil: None,
        };
        // Counter-clockwise in clip space: drawn.
        r.draw_triangle(&mut target, &program, [&a, &b, &c]);
        let drawn = covered(target.color);
        assert!(drawn > 0);
        target.color.clear([0.0; 4]);
        r.draw_triangle(&mut target, &program, [&a, &c, &b]);
        assert_eq!(covered(target.color), 0);
    }

    #[test]
    fn depth_test_keeps_nearest() {
        let mut color = Image::new(4, 4, Format::Float4, 1);
        let mut ds = DepthStencil::new(4, 4);
        let mut r = raster(4, 4);
        r.depth = Some(DepthMode::new(ComparisonFunc::Less));
        let program = Program {
            shader: &Flat,
            resources: &NoResources,
        };
        let quad = |z: f32, value: f32| {
            [
                vertex(-1.0, -1.0, z, value),
                vertex(3.0, -1.0, z, value),
                vertex(-1.0, 3.0, z, value),
            ]
        };
        let near = quad(0.2, 0.25);
        let far = quad(0.8, 0.75);
        let mut target = Target {
            color: &mut color,
            depth_stencil: Some(&mut ds),
        };
        r.draw_triangle(&mut target, &program, [&near[0], &near[1], &near[2]]);
        r.draw_triangle(&mut target, &program, [&far[0], &far[1], &far[2]]);
        assert_abs_diff_eq!(color.load(0, 1, 1)[0], 0.25, epsilon = 1e-5);
        assert_abs_diff_eq!(ds.depth[5], 0.2, epsilon = 1e-5);
    }

    #[test]
    fn stencil_replace_then_equal() {
        let mut color = Image::new(4, 4, Format::Float4, 1);
        let mut ds = DepthStencil::new(4, 4);
        let mut r = raster(4, 4);
        let program = Program {
            shader: &Flat,
            resources: &NoResources,
        };
        // Left half writes stencil 1.
        r.stencil = Some(StencilMode {
            pass_op: StencilOp::Replace,
            ..StencilMode::default()
        });
        let left = [
            vertex(-1.0, -1.0, 0.0, 0.1),
            vertex(0.0, -1.0, 0.0, 0.1),
            vertex(0.0, 1.0, 0.0, 0.1),
        ];
        let left2 = vertex(-1.0, 1.0, 0.0, 0.1);
        {
            let mut target = Target {
                color: &mut color,
                depth_stencil: Some(&mut ds),
            };
            r.draw_triangle(&mut target, &program, [&left[0], &left[1], &left[2]]);
            r.draw_triangle(&mut target, &program, [&left[0], &left[2], &left2]);
        }
        assert_eq!(ds.stencil[0], 1);
        assert_eq!(ds.stencil[3], 0);

        r.stencil = Some(StencilMode {
            func: ComparisonFunc::Equal,
            ..StencilMode::default()
        });
        let full = [
            vertex(-1.0, -1.0, 0.0, 0.9),
            vertex(3.0, -1.0, 0.0, 0.9),
            vertex(-1.0, 3.0, 0.0, 0.9),
        ];
        let mut target = Target {
            color: &mut color,
            depth_stencil: Some(&mut ds),
        };
        r.draw_triangle(&mut target, &program, [&full[0], &full[1], &full[2]]);
        assert_abs_diff_eq!(color.load(0, 0, 0)[0], 0.9, epsilon = 1e-5);
        assert_abs_diff_eq!(color.load(0, 3, 0)[0], 0.0);
    }

    #[test]
    fn scissor_limits_coverage() {
        let mut color = Image::new(8, 8, Format::Float4, 1);
        let mut r = raster(8, 8);
        r.scissor = Scissor {
            position: [2, 2],
            size: [3, 3],
        };
        let program = Program {
            shader: &Flat,
            resources: &NoResources,
        };
        let tri = [
            vertex(-1.0, -1.0, 0.0, 1.0),
            vertex(3.0, -1.0, 0.0, 1.0),
            vertex(-1.0, 3.0, 0.0, 1.0),
        ];
        let mut target = Target {
            color: &mut color,
            depth_stencil: None,
        };
        r.draw_triangle(&mut target, &program, [&tri[0], &tri[1], &tri[2]]);
        assert_eq!(covered(&color), 9);
    }

    #[test]
    fn alpha_blend_mixes() {
        let out = blend_color(&BlendMode::NON_PREMULTIPLIED, [1.0, 0.0, 0.0, 0.25], [0.0, 0.0, 1.0, 1.0]);
        assert_abs_diff_eq!(out[0], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(out[2], 0.75, epsilon = 1e-6);
    }

    #[test]
    fn triangles_behind_the_eye_are_clipped() {
        let mut color = Image::new(8, 8, Format::Float4, 1);
        let r = raster(8, 8);
        let program = Program {
            shader: &Flat,
            resources: &NoResources,
        };
        let tri = [
            vertex(-1.0, -1.0, -0.5, 1.0),
            vertex(1.0, -1.0, -0.5, 1.0),
            vertex(0.0, 1.0, -0.5, 1.0),
        ];
        let mut target = Target {
            color: &mut color,
            depth_stencil: None,
        };
        r.draw_triangle(&mut target, &program, [&tri[0], &tri[1], &tri[2]]);
        assert_eq!(covered(&color), 0);
    }
}
