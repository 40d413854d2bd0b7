use std::rc::Rc;

use crate::gpu::{Ray, RayHit};

pub enum Accel {
    Bottom {
        triangles: Vec<[[f32; 3]; 3]>,
    },
    Top {
        instances: Vec<Instance>,
    },
}

pub struct Instance {
    pub blas: Rc<Accel>,
    /// World-to-object, row-major 3x4. Singular instances are never hit.
    pub inverse: Option<[[f32; 4]; 3]>,
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Inverts an affine row-major 3x4 transform. Singular transforms yield
/// `None`.
pub fn invert_affine(m: &[[f32; 4]; 3]) -> Option<[[f32; 4]; 3]> {
    let r = [
        [m[0][0], m[0][1], m[0][2]],
        [m[1][0], m[1][1], m[1][2]],
        [m[2][0], m[2][1], m[2][2]],
    ];
    let c0 = cross(r[1], r[2]);
    let det = dot(r[0], c0);
    if det.abs() < f32::EPSILON {
        return None;
    }
    let c1 = cross(r[2], r[0]);
    let c2 = cross(r[0], r[1]);
    // Columns of the adjugate are the row cross products.
    let inv = [
        [c0[0] / det, c1[0] / det, c2[0] / det],
        [c0[1] / det, c1[1] / det, c2[1] / det],
        [c0[2] / det, c1[2] / det, c2[2] / det],
    ];
    let t = [m[0][3], m[1][3], m[2][3]];
    let mut out = [[0.0; 4]; 3];
    for i in 0..3 {
        out[i][..3].copy_from_slice(&inv[i]);
        out[i][3] = -dot(inv[i], t);
    }
    Some(out)
}

fn transform_point(m: &[[f32; 4]; 3], p: [f32; 3]) -> [f32; 3] {
    [0, 1, 2].map(|i| m[i][0] * p[0] + m[i][1] * p[1] + m[i][2] * p[2] + m[i][3])
}

fn transform_vector(m: &[[f32; 4]; 3], v: [f32; 3]) -> [f32; 3] {
    [0, 1, 2].map(|i| m[i][0] * v[0] + m[i][1] * v[1] + m[i][2] * v[2])
}

/// Moller-Trumbore; returns `(t, u, v)`. Both faces hit.
fn intersect_triangle(ray: &Ray, tri: &[[f32; 3]; 3]) -> Option<(f32, f32, f32)> {
    let e1 = sub(tri[1], tri[0]);
    let e2 = sub(tri[2], tri[0]);
    let p = cross(ray.direction, e2);
    let det = dot(e1, p);
    if det.abs() < 1e-8 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = sub(ray.origin, tri[0]);
    let u = dot(s, p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = cross(s, e1);
    let v = dot(ray.direction, q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = dot(e2, q) * inv_det;
    Some((t, u, v))
}

impl Accel {
    pub fn triangles(vertices: &[[f32; 3]], indices: &[u32]) -> Self {
        let triangles = if indices.is_empty() {
            vertices
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect()
        } else {
            indices
                .chunks_exact(3)
                .map(|c| [0, 1, 2].map(|i| vertices[c[i] as usize]))
                .collect()
        };
        Accel::Bottom { triangles }
    }

    fn closest_in_bottom(triangles: &[[[f32; 3]; 3]], ray: &Ray, instance_index: u32) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        for (primitive, tri) in triangles.iter().enumerate() {
            let Some((t, u, v)) = intersect_triangle(ray, tri) else {
                continue;
            };
            if t < ray.t_min || t > ray.t_max {
                continue;
            }
            if best.map_or(true, |b| t < b.t) {
                best = Some(RayHit {
                    t,
                    instance_index,
                    primitive_index: primitive as u32,
                    barycentrics: [u, v],
                });
            }
        }
        best
    }

    /// Closest hit in `[t_min, t_max]`. Object-space rays keep the
    /// world-space parameterization, so `t` is comparable across instances.
    pub fn intersect(&self, ray: &Ray) -> Option<RayHit> {
        match self {
            Accel::Bottom { triangles } => Self::closest_in_bottom(triangles, ray, 0),
            Accel::Top { instances } => {
                let mut best: Option<RayHit> = None;
                let mut ray = *ray;
                for (index, instance) in instances.iter().enumerate() {
                    let (Accel::Bottom { triangles }, Some(inverse)) = (instance.blas.as_ref(), &instance.inverse) else {
                        continue;
                    };
                    let local = Ray {
                        origin: transform_point(inverse, ray.origin),
                        direction: transform_vector(inverse, ray.direction),
                        ..ray
                    };
                    if let Some(hit) = Self::closest_in_bottom(triangles, &local, index as u32) {
                        ray.t_max = hit.t;
                        best = Some(hit);
                    }
                }
                best
            }
        }
    }
}
