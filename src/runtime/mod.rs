//! Call-time runtime model: values, callables, device modules.
//!
//! Everything that executes after a build goes through one type-erased
//! calling convention: ordered [`Value`]s in, one [`Value`] out, typed
//! errors. [`BoundKernel`] and the pipeline's `HostProgram` both implement
//! [`Callable`], so device kernels and host programs are interchangeable to
//! their callers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::ir::{LoweredFunc, MarshalClass, ValueType};

#[cfg(feature = "cuda")]
pub mod cuda;

/// Host-visible handle to a device-resident buffer.
///
/// The backend owns the representation behind `raw`; this crate only
/// carries the handle and the device ordinal it lives on.
#[derive(Clone)]
pub struct DeviceBuffer {
    device: u32,
    raw: Arc<dyn Any + Send + Sync>,
}

impl DeviceBuffer {
    pub fn new(device: u32, raw: Arc<dyn Any + Send + Sync>) -> Self {
        Self { device, raw }
    }

    pub fn device(&self) -> u32 {
        self.device
    }

    /// Backend-defined payload; backends downcast to their own buffer type.
    pub fn raw(&self) -> &(dyn Any + Send + Sync) {
        &*self.raw
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceBuffer(device {})", self.device)
    }
}

/// Runtime argument/result value.
#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Int(i64),
    Float(f64),
    Buffer(DeviceBuffer),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Buffer(_) => "buffer",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Marshaling check against a declared parameter type. Scalar widths are
    /// erased at the host boundary; only the marshal class is checked.
    pub fn matches(&self, ty: &ValueType) -> bool {
        match (self, ty.marshal_class()) {
            (Value::Int(_), MarshalClass::Int) => true,
            (Value::Float(_), MarshalClass::Float) => true,
            (Value::Buffer(_), MarshalClass::Buffer) => true,
            _ => false,
        }
    }
}

/// Uniform invocation convention shared by host programs and bound kernels.
pub trait Callable: Send + Sync {
    fn call(&self, args: &[Value]) -> Result<Value>;
}

/// Opaque compiled device binary (PTX text or cubin bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceArtifact {
    bytes: Vec<u8>,
}

impl DeviceArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Launch geometry derived from thread-axis tags and call-time extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Grid dimensions (blocks)
    pub grid: (u32, u32, u32),
    /// Block dimensions (threads)
    pub block: (u32, u32, u32),
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            grid: (1, 1, 1),
            block: (1, 1, 1),
        }
    }
}

impl LaunchConfig {
    /// Fill grid and block dimensions from `tags` in order, one extent per
    /// tag. Unfilled dimensions stay 1.
    pub fn from_axes(tags: &[String], extents: &[i64]) -> Result<Self> {
        if tags.len() != extents.len() {
            return Err(Error::LaunchFailed {
                reason: format!(
                    "{} thread-axis tags but {} extents",
                    tags.len(),
                    extents.len()
                ),
            });
        }
        let mut config = Self::default();
        for (tag, &extent) in tags.iter().zip(extents) {
            let extent = u32::try_from(extent).map_err(|_| Error::LaunchFailed {
                reason: format!("extent {} for axis `{}` is out of range", extent, tag),
            })?;
            let slot = match tag.as_str() {
                "blockIdx.x" => &mut config.grid.0,
                "blockIdx.y" => &mut config.grid.1,
                "blockIdx.z" => &mut config.grid.2,
                "threadIdx.x" => &mut config.block.0,
                "threadIdx.y" => &mut config.block.1,
                "threadIdx.z" => &mut config.block.2,
                _ => return Err(Error::UnknownAxisTag { tag: tag.clone() }),
            };
            *slot = extent;
        }
        Ok(config)
    }

    pub fn total_threads(&self) -> u64 {
        let grid = self.grid.0 as u64 * self.grid.1 as u64 * self.grid.2 as u64;
        let block = self.block.0 as u64 * self.block.1 as u64 * self.block.2 as u64;
        grid * block
    }
}

/// Source post-processing strategy, applied to an assembled unit before
/// compilation.
pub trait SourceTransform: Send + Sync {
    fn transform(&self, source: &str) -> Result<String>;
}

impl<F> SourceTransform for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn transform(&self, source: &str) -> Result<String> {
        self(source)
    }
}

/// Compiler strategy substituted for the backend's built-in dynamic
/// compiler when present.
pub trait KernelCompiler: Send + Sync {
    fn compile(&self, source: &str) -> Result<DeviceArtifact>;
}

impl<F> KernelCompiler for F
where
    F: Fn(&str) -> Result<DeviceArtifact> + Send + Sync,
{
    fn compile(&self, source: &str) -> Result<DeviceArtifact> {
        self(source)
    }
}

/// One device entry point, type-erased by the backend.
pub trait KernelEntry: Send + Sync {
    fn launch(&self, args: &[Value], config: LaunchConfig) -> Result<Value>;
}

/// Runtime handle over one loaded artifact. Lives as long as any callable
/// resolved from it.
pub trait KernelModule: Send + Sync {
    /// Resolve a named entry point bound to an ordered argument-type
    /// signature and an ordered thread-axis tag list. Both lists are passed
    /// through unmodified; the backend performs the argument-to-launch
    /// mapping at call time.
    fn entry(
        &self,
        name: &str,
        signature: &[ValueType],
        axis_tags: &[String],
    ) -> Result<Arc<dyn KernelEntry>>;
}

/// Dynamic compilation and module loading for one accelerator runtime.
pub trait DeviceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Built-in dynamic compiler: device source text to a binary artifact.
    fn compile(&self, source: &str) -> Result<DeviceArtifact>;

    /// Load a compiled artifact into an executable module.
    fn load(&self, artifact: &DeviceArtifact) -> Result<Arc<dyn KernelModule>>;

    /// Per-invocation device selection against the call's arguments.
    ///
    /// Selection typically mutates process-wide "current device" state
    /// outside this crate; concurrent invocations targeting different
    /// devices must be serialized by the backend or scoped per thread by
    /// the caller.
    fn select_device(&self, _args: &[Value]) -> Result<()> {
        Ok(())
    }
}

/// Device ordinal of the first buffer argument, the default selection policy.
pub fn first_buffer_device(args: &[Value]) -> Option<u32> {
    args.iter().find_map(|v| match v {
        Value::Buffer(buffer) => Some(buffer.device()),
        _ => None,
    })
}

/// Stand-in backend for builds without a device runtime. Every operation
/// fails with `RuntimeUnavailable`, so `build` is a total failing function
/// on unsupported platforms.
pub struct UnavailableBackend;

impl DeviceBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn compile(&self, _source: &str) -> Result<DeviceArtifact> {
        Err(Error::RuntimeUnavailable)
    }

    fn load(&self, _artifact: &DeviceArtifact) -> Result<Arc<dyn KernelModule>> {
        Err(Error::RuntimeUnavailable)
    }

    fn select_device(&self, _args: &[Value]) -> Result<()> {
        Err(Error::RuntimeUnavailable)
    }
}

/// Default backend for this build.
pub fn default_backend() -> Arc<dyn DeviceBackend> {
    #[cfg(feature = "cuda")]
    {
        Arc::new(cuda::CudaBackend::new())
    }
    #[cfg(not(feature = "cuda"))]
    {
        Arc::new(UnavailableBackend)
    }
}

/// Host-invocable handle over one device entry point, closed over its
/// argument-type signature and thread-axis tags.
pub struct BoundKernel {
    name: String,
    signature: Vec<ValueType>,
    axis_tags: Vec<String>,
    entry: Arc<dyn KernelEntry>,
    /// Keeps the loaded artifact alive as long as this callable is
    #[allow(dead_code)]
    module: Arc<dyn KernelModule>,
}

impl BoundKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &[ValueType] {
        &self.signature
    }

    pub fn axis_tags(&self) -> &[String] {
        &self.axis_tags
    }

    /// Check arity and marshal classes, and derive the launch geometry from
    /// the trailing extent arguments.
    fn check_args(&self, args: &[Value]) -> Result<LaunchConfig> {
        let expected = self.signature.len() + self.axis_tags.len();
        if args.len() != expected {
            return Err(Error::ArityMismatch {
                name: self.name.clone(),
                expected,
                got: args.len(),
            });
        }
        for (index, (ty, value)) in self.signature.iter().zip(args).enumerate() {
            if !value.matches(ty) {
                return Err(Error::ArgumentType {
                    name: self.name.clone(),
                    index,
                    expected: ty.to_string(),
                    got: value.type_name().to_string(),
                });
            }
        }
        let mut extents = Vec::with_capacity(self.axis_tags.len());
        for (offset, value) in args[self.signature.len()..].iter().enumerate() {
            match value {
                Value::Int(v) => extents.push(*v),
                other => {
                    return Err(Error::ArgumentType {
                        name: self.name.clone(),
                        index: self.signature.len() + offset,
                        expected: "int extent".to_string(),
                        got: other.type_name().to_string(),
                    });
                }
            }
        }
        LaunchConfig::from_axes(&self.axis_tags, &extents)
    }
}

impl Callable for BoundKernel {
    fn call(&self, args: &[Value]) -> Result<Value> {
        let config = self.check_args(args)?;
        self.entry.launch(&args[..self.signature.len()], config)
    }
}

impl fmt::Debug for BoundKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundKernel")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("axis_tags", &self.axis_tags)
            .finish_non_exhaustive()
    }
}

/// Bind `func`'s entry point in `module` to its ordered parameter types and
/// thread-axis tags.
pub fn resolve(module: &Arc<dyn KernelModule>, func: &LoweredFunc) -> Result<BoundKernel> {
    let signature = func.signature();
    let axis_tags = func.axis_tags();
    let entry = module.entry(&func.name, &signature, &axis_tags)?;
    debug!(
        kernel = %func.name,
        args = signature.len(),
        axes = axis_tags.len(),
        "resolved device entry point"
    );
    Ok(BoundKernel {
        name: func.name.clone(),
        signature,
        axis_tags,
        entry,
        module: Arc::clone(module),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ThreadAxis;

    struct EchoEntry;

    impl KernelEntry for EchoEntry {
        fn launch(&self, _args: &[Value], config: LaunchConfig) -> Result<Value> {
            Ok(Value::Int(config.total_threads() as i64))
        }
    }

    struct OneEntryModule {
        name: &'static str,
    }

    impl KernelModule for OneEntryModule {
        fn entry(
            &self,
            name: &str,
            _signature: &[ValueType],
            _axis_tags: &[String],
        ) -> Result<Arc<dyn KernelEntry>> {
            if name == self.name {
                Ok(Arc::new(EchoEntry))
            } else {
                Err(Error::EntryNotFound {
                    name: name.to_string(),
                })
            }
        }
    }

    fn sample_func() -> LoweredFunc {
        let mut f = LoweredFunc::new("scale");
        f.add_param("a", ValueType::handle())
            .add_param("s", ValueType::float32())
            .add_axis(ThreadAxis::block_x())
            .add_axis(ThreadAxis::thread_x());
        f
    }

    fn sample_buffer() -> Value {
        Value::Buffer(DeviceBuffer::new(0, Arc::new(())))
    }

    #[test]
    fn test_launch_config_from_axes() {
        let tags = vec!["blockIdx.x".to_string(), "threadIdx.x".to_string()];
        let config = LaunchConfig::from_axes(&tags, &[8, 128]).unwrap();
        assert_eq!(config.grid, (8, 1, 1));
        assert_eq!(config.block, (128, 1, 1));
        assert_eq!(config.total_threads(), 1024);
    }

    #[test]
    fn test_launch_config_rejects_unknown_tag() {
        let tags = vec!["vthread".to_string()];
        let err = LaunchConfig::from_axes(&tags, &[4]).unwrap_err();
        assert!(matches!(err, Error::UnknownAxisTag { .. }));
    }

    #[test]
    fn test_launch_config_rejects_negative_extent() {
        let tags = vec!["threadIdx.x".to_string()];
        let err = LaunchConfig::from_axes(&tags, &[-1]).unwrap_err();
        assert!(matches!(err, Error::LaunchFailed { .. }));
    }

    #[test]
    fn test_resolve_binds_signature_and_tags() {
        let module: Arc<dyn KernelModule> = Arc::new(OneEntryModule { name: "scale" });
        let bound = resolve(&module, &sample_func()).unwrap();
        assert_eq!(bound.signature().len(), 2);
        assert_eq!(bound.axis_tags(), ["blockIdx.x", "threadIdx.x"]);
    }

    #[test]
    fn test_resolve_missing_entry() {
        let module: Arc<dyn KernelModule> = Arc::new(OneEntryModule { name: "other" });
        let err = resolve(&module, &sample_func()).unwrap_err();
        match err {
            Error::EntryNotFound { name } => assert_eq!(name, "scale"),
            other => panic!("expected EntryNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_bound_kernel_checks_arity_and_types() {
        let module: Arc<dyn KernelModule> = Arc::new(OneEntryModule { name: "scale" });
        let bound = resolve(&module, &sample_func()).unwrap();

        // signature args + one extent per axis tag
        let result = bound
            .call(&[
                sample_buffer(),
                Value::Float(2.0),
                Value::Int(4),
                Value::Int(64),
            ])
            .unwrap();
        assert!(matches!(result, Value::Int(256)));

        let err = bound.call(&[sample_buffer()]).unwrap_err();
        assert!(matches!(err, Error::ArityMismatch { expected: 4, got: 1, .. }));

        let err = bound
            .call(&[
                Value::Int(1),
                Value::Float(2.0),
                Value::Int(4),
                Value::Int(64),
            ])
            .unwrap_err();
        match err {
            Error::ArgumentType { index, expected, got, .. } => {
                assert_eq!(index, 0);
                assert_eq!(expected, "handle");
                assert_eq!(got, "int");
            }
            other => panic!("expected ArgumentType, got {:?}", other),
        }
    }

    #[test]
    fn test_unavailable_backend_fails_everything() {
        let backend = UnavailableBackend;
        assert!(matches!(
            backend.compile("void k() {}"),
            Err(Error::RuntimeUnavailable)
        ));
        assert!(matches!(
            backend.load(&DeviceArtifact::new(vec![])),
            Err(Error::RuntimeUnavailable)
        ));
        assert!(matches!(
            backend.select_device(&[]),
            Err(Error::RuntimeUnavailable)
        ));
    }

    #[test]
    fn test_first_buffer_device() {
        assert_eq!(first_buffer_device(&[Value::Int(1)]), None);
        let args = [
            Value::Int(1),
            Value::Buffer(DeviceBuffer::new(3, Arc::new(()))),
        ];
        assert_eq!(first_buffer_device(&args), Some(3));
    }
}
