use std::fmt;
use std::sync::Arc;

use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
#[cfg(feature = "prism-serde")]
use serde::{Deserialize, Serialize};

use super::{Adapter, BackendType, Features, ShaderCompiler};

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Native window a device presents into.
#[derive(Debug, Clone, Copy)]
pub struct WindowHandle {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

impl WindowHandle {
    pub fn new<W: HasRawWindowHandle + HasRawDisplayHandle>(window: &W) -> Self {
        Self {
            window: window.raw_window_handle(),
            display: window.raw_display_handle(),
        }
    }
}

/// Device creation parameters.
///
/// `PRISM_BACKEND=<name>` overrides `backend`, `PRISM_VALIDATION=1` turns
/// on API validation layers where the backend has them.
#[cfg_attr(feature = "prism-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "prism-serde", serde(default))]
#[derive(Clone)]
pub struct ContextInfo {
    pub backend: Option<BackendType>,
    pub adapter: Adapter,
    pub features: Features,
    pub frames_in_flight: usize,
    pub vsync: bool,
    pub validation: bool,
    #[cfg_attr(feature = "prism-serde", serde(skip))]
    pub shader_compiler: Option<Arc<dyn ShaderCompiler>>,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            backend: None,
            adapter: Adapter::HighPerformance,
            features: Features::empty(),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            vsync: false,
            validation: false,
            shader_compiler: None,
        }
    }
}

impl fmt::Debug for ContextInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextInfo")
            .field("backend", &self.backend)
            .field("adapter", &self.adapter)
            .field("features", &self.features)
            .field("frames_in_flight", &self.frames_in_flight)
            .field("vsync", &self.vsync)
            .field("validation", &self.validation)
            .field("shader_compiler", &self.shader_compiler.is_some())
            .finish()
    }
}

impl ContextInfo {
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    pub fn with_shader_compiler(mut self, compiler: Arc<dyn ShaderCompiler>) -> Self {
        self.shader_compiler = Some(compiler);
        self
    }

    /// Applies `PRISM_*` environment overrides.
    pub fn from_env(mut self) -> Self {
        if let Ok(name) = std::env::var("PRISM_BACKEND") {
            match BackendType::from_name(&name) {
                Some(backend) => self.backend = Some(backend),
                None => log::warn!("ignoring unknown PRISM_BACKEND value '{}'", name),
            }
        }
        if std::env::var("PRISM_VALIDATION")
            .map(|v| v == "1")
            .unwrap_or(false)
        {
            self.validation = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_overrides_backend_and_validation() {
        std::env::set_var("PRISM_BACKEND", "software");
        std::env::set_var("PRISM_VALIDATION", "1");
        let info = ContextInfo::default().from_env();
        std::env::remove_var("PRISM_BACKEND");
        std::env::remove_var("PRISM_VALIDATION");
        assert_eq!(info.backend, Some(BackendType::Software));
        assert!(info.validation);
        assert_eq!(info.frames_in_flight, DEFAULT_FRAMES_IN_FLIGHT);
    }

    #[test]
    #[serial]
    fn unknown_backend_name_is_ignored() {
        std::env::set_var("PRISM_BACKEND", "glide");
        let info = ContextInfo::default().with_backend(BackendType::Vulkan).from_env();
        std::env::remove_var("PRISM_BACKEND");
        assert_eq!(info.backend, Some(BackendType::Vulkan));
    }
}
