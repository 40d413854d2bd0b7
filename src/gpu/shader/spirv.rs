//! Minimal SPIR-V reader extracting descriptor bindings.

use std::collections::HashMap;

use super::{BindingKind, Reflection, ShaderBinding, ShaderStages};
use crate::gpu::{GPUError, Result};

pub const MAGIC: u32 = 0x0723_0203;

const OP_NAME: u32 = 5;
const OP_ENTRY_POINT: u32 = 15;
const OP_TYPE_IMAGE: u32 = 25;
const OP_TYPE_SAMPLER: u32 = 26;
const OP_TYPE_SAMPLED_IMAGE: u32 = 27;
const OP_TYPE_ARRAY: u32 = 28;
const OP_TYPE_RUNTIME_ARRAY: u32 = 29;
const OP_TYPE_STRUCT: u32 = 30;
const OP_TYPE_POINTER: u32 = 32;
const OP_VARIABLE: u32 = 59;
const OP_DECORATE: u32 = 71;
const OP_TYPE_ACCELERATION_STRUCTURE: u32 = 5341;

const DECORATION_BLOCK: u32 = 2;
const DECORATION_BUFFER_BLOCK: u32 = 3;
const DECORATION_BINDING: u32 = 33;
const DECORATION_DESCRIPTOR_SET: u32 = 34;

const STORAGE_UNIFORM_CONSTANT: u32 = 0;
const STORAGE_UNIFORM: u32 = 2;
const STORAGE_STORAGE_BUFFER: u32 = 12;

#[derive(Debug, Clone, Copy)]
enum Type {
    Image { sampled: u32 },
    Sampler,
    SampledImage,
    Array(u32),
    Struct,
    Pointer { pointee: u32 },
    AccelerationStructure,
}

fn execution_model_stage(model: u32) -> ShaderStages {
    match model {
        0 => ShaderStages::VERTEX,
        4 => ShaderStages::FRAGMENT,
        5313 => ShaderStages::RAYGEN,
        5316 => ShaderStages::CLOSEST_HIT,
        5317 => ShaderStages::MISS,
        _ => ShaderStages::empty(),
    }
}

fn decode_string(words: &[u32]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .take_while(|b| *b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn malformed(what: &str) -> GPUError {
    GPUError::Shader(format!("malformed SPIR-V: {}", what))
}

/// Extracts uniform, storage, sampler and acceleration-structure bindings
/// from a SPIR-V module.
pub fn reflect(words: &[u32]) -> Result<Reflection> {
    if words.len() < 5 || words[0] != MAGIC {
        return Err(malformed("bad header"));
    }

    let mut names: HashMap<u32, String> = HashMap::new();
    let mut types: HashMap<u32, Type> = HashMap::new();
    let mut bindings: HashMap<u32, u32> = HashMap::new();
    let mut sets: HashMap<u32, u32> = HashMap::new();
    let mut buffer_blocks: Vec<u32> = Vec::new();
    let mut variables: Vec<(u32, u32, u32)> = Vec::new();
    let mut stages = ShaderStages::empty();

    let mut cursor = 5;
    while cursor < words.len() {
        let word_count = (words[cursor] >> 16) as usize;
        let opcode = words[cursor] & 0xffff;
        if word_count == 0 || cursor + word_count > words.len() {
            return Err(malformed("truncated instruction"));
        }
        let ops = &words[cursor + 1..cursor + word_count];
        match opcode {
            OP_NAME if !ops.is_empty() => {
                names.insert(ops[0], decode_string(&ops[1..]));
            }
            OP_ENTRY_POINT if !ops.is_empty() => {
                stages |= execution_model_stage(ops[0]);
            }
            OP_DECORATE if ops.len() >= 2 => match ops[1] {
                DECORATION_BINDING if ops.len() >= 3 => {
                    bindings.insert(ops[0], ops[2]);
                }
                DECORATION_DESCRIPTOR_SET if ops.len() >= 3 => {
                    sets.insert(ops[0], ops[2]);
                }
                DECORATION_BUFFER_BLOCK => buffer_blocks.push(ops[0]),
                DECORATION_BLOCK => {}
                _ => {}
            },
            OP_TYPE_IMAGE if ops.len() >= 7 => {
                types.insert(ops[0], Type::Image { sampled: ops[6] });
            }
            OP_TYPE_SAMPLER if !ops.is_empty() => {
                types.insert(ops[0], Type::Sampler);
            }
            OP_TYPE_SAMPLED_IMAGE if !ops.is_empty() => {
                types.insert(ops[0], Type::SampledImage);
            }
            OP_TYPE_ARRAY | OP_TYPE_RUNTIME_ARRAY if ops.len() >= 2 => {
                types.insert(ops[0], Type::Array(ops[1]));
            }
            OP_TYPE_STRUCT if !ops.is_empty() => {
                types.insert(ops[0], Type::Struct);
            }
            OP_TYPE_POINTER if ops.len() >= 3 => {
                types.insert(ops[0], Type::Pointer { pointee: ops[2] });
            }
            OP_TYPE_ACCELERATION_STRUCTURE if !ops.is_empty() => {
                types.insert(ops[0], Type::AccelerationStructure);
            }
            OP_VARIABLE if ops.len() >= 3 => {
                // (result type, result id, storage class)
                variables.push((ops[0], ops[1], ops[2]));
            }
            _ => {}
        }
        cursor += word_count;
    }

    let mut reflection = Reflection::default();
    for (ty, id, storage) in variables {
        if !matches!(
            storage,
            STORAGE_UNIFORM_CONSTANT | STORAGE_UNIFORM | STORAGE_STORAGE_BUFFER
        ) {
            continue;
        }
        let Some(&binding) = bindings.get(&id) else {
            continue;
        };

        let mut pointee = match types.get(&ty) {
            Some(Type::Pointer { pointee }) => *pointee,
            _ => return Err(malformed("variable without pointer type")),
        };
        while let Some(Type::Array(element)) = types.get(&pointee) {
            pointee = *element;
        }

        let kind = match (types.get(&pointee), storage) {
            (Some(Type::SampledImage), _) => BindingKind::CombinedImageSampler,
            (Some(Type::Image { sampled: 2 }), _) => BindingKind::StorageImage,
            (Some(Type::AccelerationStructure), _) => BindingKind::AccelerationStructure,
            (Some(Type::Struct), STORAGE_STORAGE_BUFFER) => BindingKind::StorageBuffer,
            (Some(Type::Struct), STORAGE_UNIFORM) if buffer_blocks.contains(&pointee) => {
                BindingKind::StorageBuffer
            }
            (Some(Type::Struct), STORAGE_UNIFORM) => BindingKind::UniformBuffer,
            (Some(Type::Image { .. }) | Some(Type::Sampler), _) => {
                return Err(GPUError::Shader(format!(
                    "binding {} uses a separate image or sampler; only combined image samplers are supported",
                    binding
                )))
            }
            _ => continue,
        };

        let name = names
            .get(&id)
            .filter(|n| !n.is_empty())
            .or_else(|| names.get(&pointee))
            .cloned()
            .unwrap_or_default();

        reflection.merge(Reflection {
            bindings: [(
                binding,
                ShaderBinding {
                    set: sets.get(&id).copied().unwrap_or(0),
                    binding,
                    kind,
                    name,
                    stages,
                },
            )]
            .into_iter()
            .collect(),
        })?;
    }

    Ok(reflection)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tiny assembler for hand-written test modules.
    struct Module(Vec<u32>);

    impl Module {
        fn new() -> Self {
            Module(vec![MAGIC, 0x0001_0300, 0, 100, 0])
        }

        fn op(mut self, opcode: u32, operands: &[u32]) -> Self {
            self.0.push(((operands.len() as u32 + 1) << 16) | opcode);
            self.0.extend_from_slice(operands);
            self
        }

        fn name(self, id: u32, name: &str) -> Self {
            let mut bytes = name.as_bytes().to_vec();
            bytes.push(0);
            while bytes.len() % 4 != 0 {
                bytes.push(0);
            }
            let mut operands = vec![id];
            operands.extend(
                bytes
                    .chunks(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            );
            self.op(OP_NAME, &operands)
        }
    }

    #[test]
    fn reflects_uniform_and_sampler() {
        let words = Module::new()
            .op(OP_ENTRY_POINT, &[4, 1])
            .name(10, "Globals")
            .name(20, "u_texture")
            .op(OP_DECORATE, &[10, DECORATION_BLOCK])
            .op(OP_DECORATE, &[12, DECORATION_BINDING, 3])
            .op(OP_DECORATE, &[12, DECORATION_DESCRIPTOR_SET, 0])
            .op(OP_DECORATE, &[20, DECORATION_BINDING, 0])
            .op(OP_TYPE_STRUCT, &[10, 50])
            .op(OP_TYPE_POINTER, &[11, STORAGE_UNIFORM, 10])
            .op(OP_VARIABLE, &[11, 12, STORAGE_UNIFORM])
            .op(OP_TYPE_IMAGE, &[30, 51, 1, 0, 0, 0, 1, 0])
            .op(OP_TYPE_SAMPLED_IMAGE, &[31, 30])
            .op(OP_TYPE_POINTER, &[32, STORAGE_UNIFORM_CONSTANT, 31])
            .op(OP_VARIABLE, &[32, 20, STORAGE_UNIFORM_CONSTANT])
            .0;

        let reflection = reflect(&words).unwrap();
        let ubo = reflection.get(3).unwrap();
        assert_eq!(ubo.kind, BindingKind::UniformBuffer);
        assert_eq!(ubo.name, "Globals");
        assert_eq!(ubo.stages, ShaderStages::FRAGMENT);
        let tex = reflection.get(0).unwrap();
        assert_eq!(tex.kind, BindingKind::CombinedImageSampler);
        assert_eq!(tex.name, "u_texture");
    }

    #[test]
    fn storage_buffers_both_encodings() {
        let words = Module::new()
            .op(OP_ENTRY_POINT, &[0, 1])
            .op(OP_DECORATE, &[10, DECORATION_BUFFER_BLOCK])
            .op(OP_DECORATE, &[12, DECORATION_BINDING, 1])
            .op(OP_DECORATE, &[22, DECORATION_BINDING, 2])
            .op(OP_TYPE_STRUCT, &[10, 50])
            .op(OP_TYPE_POINTER, &[11, STORAGE_UNIFORM, 10])
            .op(OP_VARIABLE, &[11, 12, STORAGE_UNIFORM])
            .op(OP_TYPE_STRUCT, &[20, 50])
            .op(OP_TYPE_POINTER, &[21, STORAGE_STORAGE_BUFFER, 20])
            .op(OP_VARIABLE, &[21, 22, STORAGE_STORAGE_BUFFER])
            .0;

        let reflection = reflect(&words).unwrap();
        assert_eq!(reflection.get(1).unwrap().kind, BindingKind::StorageBuffer);
        assert_eq!(reflection.get(2).unwrap().kind, BindingKind::StorageBuffer);
        assert_eq!(reflection.get(1).unwrap().stages, ShaderStages::VERTEX);
    }

    #[test]
    fn skips_undecorated_and_io_variables() {
        let words = Module::new()
            .op(OP_TYPE_STRUCT, &[10, 50])
            .op(OP_TYPE_POINTER, &[11, 1, 10])
            .op(OP_VARIABLE, &[11, 12, 1])
            .op(OP_TYPE_POINTER, &[13, STORAGE_UNIFORM, 10])
            .op(OP_VARIABLE, &[13, 14, STORAGE_UNIFORM])
            .0;
        assert!(reflect(&words).unwrap().bindings.is_empty());
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(reflect(&[0xdead_beef, 0, 0, 0, 0]).is_err());
        let mut words = Module::new().0;
        words.push((4 << 16) | OP_DECORATE);
        assert!(reflect(&words).is_err());
    }

    #[test]
    fn separate_samplers_are_rejected() {
        let words = Module::new()
            .op(OP_DECORATE, &[12, DECORATION_BINDING, 0])
            .op(OP_TYPE_SAMPLER, &[10])
            .op(OP_TYPE_POINTER, &[11, STORAGE_UNIFORM_CONSTANT, 10])
            .op(OP_VARIABLE, &[11, 12, STORAGE_UNIFORM_CONSTANT])
            .0;
        assert!(reflect(&words).is_err());
    }
}
