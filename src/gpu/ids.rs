//! Typed handles naming core-owned objects.

use crate::utils::Handle;

pub enum TextureTag {}
pub enum BufferTag {}
pub enum ShaderTag {}
pub enum AccelerationStructureTag {}

pub type TextureId = Handle<TextureTag>;
pub type BufferId = Handle<BufferTag>;
pub type ShaderId = Handle<ShaderTag>;
pub type AccelerationStructureId = Handle<AccelerationStructureTag>;
