//! Backend-agnostic rendering core.
//!
//! [`RenderDevice`] is the public entry point. It forwards to one
//! [`Backend`], in practice a [`Context`] over a native [`Driver`].

mod backend;
mod cache;
mod config;
mod context;
mod device;
mod driver;
mod error;
mod frame;
mod ids;
mod recorder;
mod resources;
pub mod shader;
pub mod software;
mod state;
mod structs;
#[cfg(feature = "prism-vulkan")]
pub mod vulkan;

pub use backend::*;
pub use cache::ObjectCache;
pub use config::*;
pub use context::{Context, INLINE_UPDATE_LIMIT};
pub use device::*;
pub use driver::*;
pub use error::*;
pub use frame::FrameState;
pub use ids::*;
pub use resources::*;
pub use shader::*;
pub use state::*;
pub use structs::*;
