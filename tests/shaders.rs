mod common;

use std::sync::{Arc, Mutex};

use prism::shader::spirv;
use prism::{
    BackendType, ContextInfo, GPUError, RenderDevice, Result, Shader, ShaderCompiler, ShaderInfo, ShaderStage,
};

const VERTEX: &str = "void main() { gl_Position = vec4(0.0); }";
const FRAGMENT: &str = "void main() {}";

/// Emits an empty but well-formed module and remembers what it was asked.
#[derive(Default)]
struct RecordingCompiler {
    calls: Mutex<Vec<(ShaderStage, Vec<String>)>>,
}

impl ShaderCompiler for RecordingCompiler {
    fn compile_glsl(&self, stage: ShaderStage, _source: &str, defines: &[String]) -> Result<Vec<u32>> {
        self.calls.lock().unwrap().push((stage, defines.to_vec()));
        Ok(vec![spirv::MAGIC, 0x0001_0300, 0, 1, 0])
    }
}

struct BrokenCompiler;

impl ShaderCompiler for BrokenCompiler {
    fn compile_glsl(&self, _stage: ShaderStage, _source: &str, _defines: &[String]) -> Result<Vec<u32>> {
        Ok(vec![0xdead_beef])
    }
}

fn device_with(compiler: Option<Arc<dyn ShaderCompiler>>) -> RenderDevice {
    common::init_logging();
    let mut info = ContextInfo::default().with_backend(BackendType::Software);
    if let Some(compiler) = compiler {
        info = info.with_shader_compiler(compiler);
    }
    RenderDevice::headless(4, 4, &info).unwrap()
}

#[test]
fn glsl_needs_a_compiler() {
    let mut device = device_with(None);
    let info = ShaderInfo::glsl("plain", common::Vertex::layout(), VERTEX, FRAGMENT);
    let err = Shader::new(&mut device, &info).err().expect("shader creation fails");
    assert!(matches!(err, GPUError::MissingShaderCompiler), "{err:?}");
}

#[test]
fn glsl_goes_through_the_compiler_with_defines() {
    let compiler = Arc::new(RecordingCompiler::default());
    let mut device = device_with(Some(compiler.clone() as Arc<dyn ShaderCompiler>));
    let info = ShaderInfo::glsl("plain", common::Vertex::layout(), VERTEX, FRAGMENT).with_define("USE_FOG=1");
    let err = Shader::new(&mut device, &info).err().expect("shader creation fails");

    // The CPU backend only runs host programs.
    assert!(matches!(err, GPUError::UnsupportedShaderCode(BackendType::Software)), "{err:?}");
    let calls = compiler.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, ShaderStage::Vertex);
    assert_eq!(calls[1].0, ShaderStage::Fragment);
    assert!(calls.iter().all(|(_, defines)| defines == &["USE_FOG=1".to_string()]));
}

#[test]
fn malformed_compiler_output_is_a_shader_error() {
    let mut device = device_with(Some(Arc::new(BrokenCompiler) as Arc<dyn ShaderCompiler>));
    let info = ShaderInfo::glsl("broken", common::Vertex::layout(), VERTEX, FRAGMENT);
    let err = Shader::new(&mut device, &info).err().expect("shader creation fails");
    assert!(matches!(err, GPUError::Shader(_)), "{err:?}");
    assert_eq!(device.stats().pipelines_created, 0);
}
