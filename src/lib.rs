//! Immediate-style rendering with deferred native state resolution.
//!
//! Callers set state and issue draws on a [`RenderDevice`]; the active
//! backend folds redundant state changes, builds and caches native pipeline
//! and sampler objects on demand, and keeps every GPU-visible object alive
//! until the frame that used it has retired.

pub mod gpu;
pub mod utils;

pub use gpu::*;
