use bytemuck::Pod;
use smallvec::SmallVec;

use super::Reflection;

/// Resources bound at draw time, as seen by a host program.
pub trait ShaderResources {
    fn uniform(&self, binding: u32) -> Option<&[u8]>;
    fn storage(&self, binding: u32) -> Option<&[u8]>;
    /// Filtered lookup through the bound sampler state. Unbound slots read
    /// as transparent black.
    fn sample(&self, binding: u32, uv: [f32; 2]) -> [f32; 4];
    fn image_store(&self, binding: u32, coord: [u32; 2], value: [f32; 4]);
    fn intersect(&self, binding: u32, ray: &Ray) -> Option<RayHit>;
}

impl dyn ShaderResources + '_ {
    pub fn read_uniform<T: Pod>(&self, binding: u32) -> Option<T> {
        let bytes = self.uniform(binding)?;
        (bytes.len() >= std::mem::size_of::<T>())
            .then(|| bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()]))
    }
}

pub struct VertexInput<'a> {
    pub vertex_index: u32,
    pub instance_index: u32,
    /// Decoded attributes indexed by location; missing components read as
    /// `(0, 0, 0, 1)`.
    pub attributes: &'a [[f32; 4]],
    pub resources: &'a dyn ShaderResources,
}

impl VertexInput<'_> {
    pub fn attribute(&self, location: u32) -> [f32; 4] {
        self.attributes
            .get(location as usize)
            .copied()
            .unwrap_or([0.0, 0.0, 0.0, 1.0])
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexOutput {
    /// Clip-space position.
    pub position: [f32; 4],
    pub varyings: SmallVec<[f32; 16]>,
}

pub struct FragmentInput<'a> {
    /// Window coordinates of the pixel center, depth in `z`, `1/w` in `w`.
    pub frag_coord: [f32; 4],
    pub front_facing: bool,
    pub varyings: &'a [f32],
    pub resources: &'a dyn ShaderResources,
}

/// Graphics program executed on the CPU by the software backend.
pub trait HostShader: Send + Sync {
    fn reflection(&self) -> Reflection {
        Reflection::default()
    }

    fn vertex(&self, input: &VertexInput<'_>) -> VertexOutput;

    /// Returns `None` to discard the fragment.
    fn fragment(&self, input: &FragmentInput<'_>) -> Option<[f32; 4]>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: [f32; 3],
    pub direction: [f32; 3],
    pub t_min: f32,
    pub t_max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub t: f32,
    pub instance_index: u32,
    pub primitive_index: u32,
    pub barycentrics: [f32; 2],
}

pub struct RaygenContext<'a> {
    pub launch_id: [u32; 3],
    pub launch_size: [u32; 3],
    pub resources: &'a dyn ShaderResources,
    pub program: &'a dyn HostRaytracingShader,
}

impl RaygenContext<'_> {
    /// Traces `ray` against the acceleration structure at `binding` and runs
    /// the closest-hit or miss stage.
    pub fn trace(&self, binding: u32, ray: &Ray) -> [f32; 4] {
        match self.resources.intersect(binding, ray) {
            Some(hit) => self.program.closest_hit(ray, &hit),
            None => self.program.miss(ray),
        }
    }
}

pub trait HostRaytracingShader: Send + Sync {
    fn reflection(&self) -> Reflection;
    fn raygen(&self, ctx: &RaygenContext<'_>);
    fn miss(&self, ray: &Ray) -> [f32; 4];
    fn closest_hit(&self, ray: &Ray, hit: &RayHit) -> [f32; 4];
}
