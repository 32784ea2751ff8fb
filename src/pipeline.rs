//! Build pipeline: assemble, compile, load, resolve, wire the host program.
//!
//! Build-time flow is a straight-line sequence of fallible transformations:
//! IR functions -> source text -> device artifact -> loaded module -> bound
//! kernels -> host program. Any failure aborts the whole build; no partial
//! program is ever returned.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::codegen::{SourceUnit, assemble, stackvm};
use crate::error::{Error, Result};
use crate::ir::LoweredFunc;
use crate::runtime::{
    BoundKernel, Callable, DeviceArtifact, DeviceBackend, KernelCompiler, SourceTransform, Value,
    default_backend, resolve,
};
use crate::vm::{KernelId, StackProgram};

/// Source post-processing and compilation strategy for one device build.
///
/// Both strategies are injected explicitly; absent strategies mean default
/// behavior (no post-processing, the backend's built-in compiler).
pub struct CompilationPipeline {
    backend: Arc<dyn DeviceBackend>,
    postprocess: Option<Arc<dyn SourceTransform>>,
    compiler: Option<Arc<dyn KernelCompiler>>,
}

impl CompilationPipeline {
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            postprocess: None,
            compiler: None,
        }
    }

    pub fn with_postprocess(mut self, transform: Arc<dyn SourceTransform>) -> Self {
        self.postprocess = Some(transform);
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn KernelCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Compile one assembled source unit to a device artifact.
    ///
    /// The built-in compiler receives the same post-processed text an
    /// override compiler would.
    pub fn compile(&self, unit: &SourceUnit) -> Result<DeviceArtifact> {
        let text = match &self.postprocess {
            Some(transform) => transform.transform(unit.text())?,
            None => unit.text().to_string(),
        };
        let artifact = match &self.compiler {
            Some(compiler) => compiler.compile(&text)?,
            None => self.backend.compile(&text)?,
        };
        debug!(
            source_bytes = text.len(),
            artifact_bytes = artifact.bytes().len(),
            "compiled device source"
        );
        Ok(artifact)
    }
}

/// Orchestrates the whole pipeline for one host function plus its device
/// functions, producing a single top-level callable.
pub struct ProgramBuilder {
    backend: Arc<dyn DeviceBackend>,
    pipeline: CompilationPipeline,
}

impl ProgramBuilder {
    /// Builder over the default backend for this build.
    pub fn new() -> Self {
        Self::with_backend(default_backend())
    }

    pub fn with_backend(backend: Arc<dyn DeviceBackend>) -> Self {
        let pipeline = CompilationPipeline::new(Arc::clone(&backend));
        Self { backend, pipeline }
    }

    pub fn with_postprocess(mut self, transform: Arc<dyn SourceTransform>) -> Self {
        self.pipeline = self.pipeline.with_postprocess(transform);
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn KernelCompiler>) -> Self {
        self.pipeline = self.pipeline.with_compiler(compiler);
        self
    }

    /// Build a callable program. `functions[0]` is the host function; the
    /// rest are device functions compiled into one source unit.
    pub fn build(&self, functions: &[LoweredFunc], host_mode: &str) -> Result<HostProgram> {
        if functions.len() < 2 {
            return Err(Error::InvalidProgram {
                count: functions.len(),
            });
        }
        let (host, devices) = functions.split_first().expect("checked above");

        let unit = assemble(devices)?;
        debug!(
            functions = devices.len(),
            source_bytes = unit.text().len(),
            "assembled device source unit"
        );
        let artifact = self.pipeline.compile(&unit)?;
        let module = self.backend.load(&artifact)?;

        let mut slots: IndexMap<String, KernelId> = IndexMap::with_capacity(devices.len());
        let mut kernels = Vec::with_capacity(devices.len());
        for (i, func) in devices.iter().enumerate() {
            let bound = resolve(&module, func)?;
            slots.insert(func.name.clone(), KernelId(i as u32));
            kernels.push(bound);
        }

        match host_mode {
            "stackvm" => {
                let program = stackvm::compile(host, &slots)?;
                info!(
                    host = %host.name,
                    kernels = kernels.len(),
                    backend = self.backend.name(),
                    "built host program"
                );
                Ok(HostProgram {
                    program,
                    kernels,
                    slots,
                    backend: Arc::clone(&self.backend),
                })
            }
            other => Err(Error::UnknownHostMode {
                mode: other.to_string(),
            }),
        }
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level callable spanning host control flow and device kernels.
///
/// Invocations may run concurrently; each one performs device selection
/// against its own arguments before executing the host program.
pub struct HostProgram {
    program: StackProgram,
    kernels: Vec<BoundKernel>,
    slots: IndexMap<String, KernelId>,
    backend: Arc<dyn DeviceBackend>,
}

impl std::fmt::Debug for HostProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProgram")
            .field("program", &self.program)
            .field("slots", &self.slots)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl HostProgram {
    /// Number of device functions wired into this program.
    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    /// Bound kernel by device-function name.
    pub fn kernel(&self, name: &str) -> Option<&BoundKernel> {
        let id = self.slots.get(name)?;
        self.kernels.get(id.index())
    }

    /// Device-function names in build order.
    pub fn device_functions(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

impl Callable for HostProgram {
    fn call(&self, args: &[Value]) -> Result<Value> {
        self.backend.select_device(args)?;
        self.program.run(args, &self.kernels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, Stmt, ThreadAxis, ValueType};
    use crate::runtime::UnavailableBackend;

    fn device_func() -> LoweredFunc {
        let mut f = LoweredFunc::new("scale");
        f.add_param("a", ValueType::handle())
            .add_axis(ThreadAxis::thread_x());
        f
    }

    fn host_func() -> LoweredFunc {
        let mut f = LoweredFunc::new("main");
        f.add_param("a", ValueType::handle())
            .add_param("n", ValueType::int32());
        f.push_stmt(Stmt::Eval(Expr::Call {
            callee: "scale".into(),
            args: vec![Expr::var("a"), Expr::var("n")],
        }));
        f.push_stmt(Stmt::Return(Expr::var("n")));
        f
    }

    #[test]
    fn test_build_requires_host_and_device() {
        let builder = ProgramBuilder::with_backend(Arc::new(UnavailableBackend));
        match builder.build(&[host_func()], "stackvm") {
            Err(Error::InvalidProgram { count }) => assert_eq!(count, 1),
            other => panic!("expected InvalidProgram, got {:?}", other),
        }
        assert!(matches!(
            builder.build(&[], "stackvm"),
            Err(Error::InvalidProgram { count: 0 })
        ));
    }

    #[test]
    fn test_unavailable_runtime_fails_uniformly() {
        let builder = ProgramBuilder::with_backend(Arc::new(UnavailableBackend));
        let funcs = vec![host_func(), device_func()];
        // failure is independent of the host mode
        assert!(matches!(
            builder.build(&funcs, "stackvm"),
            Err(Error::RuntimeUnavailable)
        ));
        assert!(matches!(
            builder.build(&funcs, "graalhost"),
            Err(Error::RuntimeUnavailable)
        ));
    }

    #[test]
    fn test_pipeline_prefers_override_compiler() {
        let backend = Arc::new(UnavailableBackend);
        let pipeline =
            CompilationPipeline::new(backend).with_compiler(Arc::new(
                |source: &str| -> Result<DeviceArtifact> {
                    Ok(DeviceArtifact::from_text(source))
                },
            ));
        let unit = assemble(&[device_func()]).unwrap();
        // the unavailable built-in compiler is never reached
        let artifact = pipeline.compile(&unit).unwrap();
        assert_eq!(artifact.bytes(), unit.text().as_bytes());
    }

    #[test]
    fn test_postprocess_feeds_both_compile_paths() {
        let backend = Arc::new(UnavailableBackend);
        let pipeline = CompilationPipeline::new(backend)
            .with_postprocess(Arc::new(|source: &str| -> Result<String> {
                Ok(format!("// banner\n{}", source))
            }))
            .with_compiler(Arc::new(
                |source: &str| -> Result<DeviceArtifact> {
                    Ok(DeviceArtifact::from_text(source))
                },
            ));
        let unit = assemble(&[device_func()]).unwrap();
        let artifact = pipeline.compile(&unit).unwrap();
        assert!(artifact.bytes().starts_with(b"// banner\n"));
    }
}
