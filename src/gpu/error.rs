use thiserror::Error;

use super::{BackendType, Features, Format};

#[derive(Debug, Error)]
pub enum GPUError {
    #[error("backend {0:?} is not available in this build or on this platform")]
    UnsupportedBackend(BackendType),
    #[error("no available backend supports the requested features {0:?}")]
    UnsupportedFeature(Features),
    #[error("format {0:?} cannot be used here")]
    UnsupportedFormat(Format),
    #[error("GLSL shader code requires a shader compiler in ContextInfo")]
    MissingShaderCompiler,
    #[error("shader code kind is not accepted by the {0:?} backend")]
    UnsupportedShaderCode(BackendType),
    #[error("shader error: {0}")]
    Shader(String),
    #[error("no suitable graphics adapter was found")]
    NoSuitableDevice,
    #[error("out of device memory")]
    OutOfMemory,
    #[cfg(feature = "prism-vulkan")]
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),
    #[cfg(feature = "prism-vulkan")]
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;
