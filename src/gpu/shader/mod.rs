//! Shader descriptions, binding reflection and the host-program interface
//! used by the software backend.

mod host;
pub mod spirv;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

pub use host::*;

use super::{Result, VertexLayout};

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const RAYGEN = 1 << 2;
        const MISS = 1 << 3;
        const CLOSEST_HIT = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Raygen,
    Miss,
    ClosestHit,
}

impl From<ShaderStage> for ShaderStages {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::Fragment => ShaderStages::FRAGMENT,
            ShaderStage::Raygen => ShaderStages::RAYGEN,
            ShaderStage::Miss => ShaderStages::MISS,
            ShaderStage::ClosestHit => ShaderStages::CLOSEST_HIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    CombinedImageSampler,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    AccelerationStructure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinding {
    pub set: u32,
    pub binding: u32,
    pub kind: BindingKind,
    pub name: String,
    pub stages: ShaderStages,
}

/// Resource bindings a shader declares, keyed by binding index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    pub bindings: BTreeMap<u32, ShaderBinding>,
}

impl Reflection {
    pub fn get(&self, binding: u32) -> Option<&ShaderBinding> {
        self.bindings.get(&binding)
    }

    pub fn with_binding(mut self, binding: u32, kind: BindingKind, name: &str, stages: ShaderStages) -> Self {
        self.bindings.insert(
            binding,
            ShaderBinding {
                set: 0,
                binding,
                kind,
                name: name.to_string(),
                stages,
            },
        );
        self
    }

    /// Folds another stage's bindings in. Two stages declaring the same
    /// binding with different kinds is an error.
    pub fn merge(&mut self, other: Reflection) -> Result<()> {
        for (index, binding) in other.bindings {
            match self.bindings.get_mut(&index) {
                Some(existing) if existing.kind != binding.kind => {
                    return Err(super::GPUError::Shader(format!(
                        "binding {} is {:?} in one stage and {:?} in another",
                        index, existing.kind, binding.kind
                    )));
                }
                Some(existing) => existing.stages |= binding.stages,
                None => {
                    self.bindings.insert(index, binding);
                }
            }
        }
        Ok(())
    }

    /// Groups bindings per descriptor set.
    pub fn sets(&self) -> BTreeMap<u32, Vec<&ShaderBinding>> {
        let mut sets: BTreeMap<u32, Vec<&ShaderBinding>> = BTreeMap::new();
        for binding in self.bindings.values() {
            sets.entry(binding.set).or_default().push(binding);
        }
        sets
    }
}

/// External service turning GLSL into SPIR-V.
pub trait ShaderCompiler: Send + Sync {
    fn compile_glsl(&self, stage: ShaderStage, source: &str, defines: &[String]) -> Result<Vec<u32>>;
}

#[derive(Clone)]
pub enum ShaderCode {
    Spirv { vertex: Vec<u32>, fragment: Vec<u32> },
    Glsl { vertex: String, fragment: String },
    Host(Arc<dyn HostShader>),
}

impl fmt::Debug for ShaderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderCode::Spirv { vertex, fragment } => f
                .debug_struct("Spirv")
                .field("vertex_words", &vertex.len())
                .field("fragment_words", &fragment.len())
                .finish(),
            ShaderCode::Glsl { .. } => f.write_str("Glsl"),
            ShaderCode::Host(_) => f.write_str("Host"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShaderInfo {
    pub debug_name: String,
    pub vertex_layout: VertexLayout,
    pub code: ShaderCode,
    pub defines: Vec<String>,
}

impl ShaderInfo {
    pub fn host(debug_name: &str, vertex_layout: VertexLayout, program: Arc<dyn HostShader>) -> Self {
        Self {
            debug_name: debug_name.to_string(),
            vertex_layout,
            code: ShaderCode::Host(program),
            defines: Vec::new(),
        }
    }

    pub fn spirv(debug_name: &str, vertex_layout: VertexLayout, vertex: Vec<u32>, fragment: Vec<u32>) -> Self {
        Self {
            debug_name: debug_name.to_string(),
            vertex_layout,
            code: ShaderCode::Spirv { vertex, fragment },
            defines: Vec::new(),
        }
    }

    /// GLSL sources, compiled through the device's [`ShaderCompiler`].
    pub fn glsl(debug_name: &str, vertex_layout: VertexLayout, vertex: &str, fragment: &str) -> Self {
        Self {
            debug_name: debug_name.to_string(),
            vertex_layout,
            code: ShaderCode::Glsl {
                vertex: vertex.to_string(),
                fragment: fragment.to_string(),
            },
            defines: Vec::new(),
        }
    }

    pub fn with_define(mut self, define: &str) -> Self {
        self.defines.push(define.to_string());
        self
    }
}

#[derive(Clone)]
pub enum RaytracingShaderCode {
    Spirv {
        raygen: Vec<u32>,
        miss: Vec<u32>,
        closest_hit: Vec<u32>,
    },
    Glsl {
        raygen: String,
        miss: String,
        closest_hit: String,
    },
    Host(Arc<dyn HostRaytracingShader>),
}

impl fmt::Debug for RaytracingShaderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaytracingShaderCode::Spirv { .. } => f.write_str("Spirv"),
            RaytracingShaderCode::Glsl { .. } => f.write_str("Glsl"),
            RaytracingShaderCode::Host(_) => f.write_str("Host"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RaytracingShaderInfo {
    pub debug_name: String,
    pub code: RaytracingShaderCode,
    pub defines: Vec<String>,
}

/// Shader code after GLSL compilation, as handed to a driver.
pub enum NativeShaderCode<'a> {
    Spirv(Vec<(ShaderStage, &'a [u32])>),
    Host(&'a Arc<dyn HostShader>),
    HostRaytracing(&'a Arc<dyn HostRaytracingShader>),
}

pub struct NativeShaderInfo<'a> {
    pub debug_name: &'a str,
    pub vertex_layout: &'a VertexLayout,
    pub reflection: &'a Reflection,
    pub code: NativeShaderCode<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_stages() {
        let mut a = Reflection::default().with_binding(0, BindingKind::UniformBuffer, "ubo", ShaderStages::VERTEX);
        let b = Reflection::default()
            .with_binding(0, BindingKind::UniformBuffer, "ubo", ShaderStages::FRAGMENT)
            .with_binding(1, BindingKind::CombinedImageSampler, "tex", ShaderStages::FRAGMENT);
        a.merge(b).unwrap();
        assert_eq!(a.bindings.len(), 2);
        assert_eq!(a.get(0).unwrap().stages, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
    }

    #[test]
    fn merge_rejects_kind_mismatch() {
        let mut a = Reflection::default().with_binding(2, BindingKind::UniformBuffer, "a", ShaderStages::VERTEX);
        let b = Reflection::default().with_binding(2, BindingKind::StorageBuffer, "b", ShaderStages::FRAGMENT);
        assert!(a.merge(b).is_err());
    }
}
