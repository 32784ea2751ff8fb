//! CUDA driver/NVRTC backend.
//!
//! Compiles assembled CUDA C to PTX through NVRTC and loads the result with
//! the driver API. Only built with the `cuda` feature; without it the
//! default backend is [`UnavailableBackend`](super::UnavailableBackend).

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::ir::ValueType;

use super::{
    DeviceArtifact, DeviceBackend, KernelEntry, KernelModule, LaunchConfig, Value,
    first_buffer_device,
};

/// NVRTC + driver-API backend.
pub struct CudaBackend;

impl CudaBackend {
    pub fn new() -> Self {
        // Would call cuInit(0)
        Self
    }
}

impl Default for CudaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for CudaBackend {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn compile(&self, source: &str) -> Result<DeviceArtifact> {
        // Would call nvrtcCreateProgram, nvrtcCompileProgram, nvrtcGetPTX,
        // surfacing the program log through CompileFailed on error.
        debug!(bytes = source.len(), "nvrtc compile");
        Ok(DeviceArtifact::from_text(source))
    }

    fn load(&self, artifact: &DeviceArtifact) -> Result<Arc<dyn KernelModule>> {
        if artifact.bytes().is_empty() {
            return Err(Error::ModuleLoad {
                reason: "empty artifact".to_string(),
            });
        }
        // Would call cuModuleLoadData
        Ok(Arc::new(CudaModule {
            module: ptr::null_mut(),
        }))
    }

    fn select_device(&self, args: &[Value]) -> Result<()> {
        if let Some(device) = first_buffer_device(args) {
            // Would call cudaSetDevice(device); current-device state is
            // process-wide, so callers invoking concurrently across devices
            // must scope selection per thread.
            debug!(device, "select device");
        }
        Ok(())
    }
}

/// Driver-API module handle.
pub struct CudaModule {
    module: *mut c_void,
}

// SAFETY: driver module handles are usable from any thread once loaded.
unsafe impl Send for CudaModule {}
unsafe impl Sync for CudaModule {}

impl KernelModule for CudaModule {
    fn entry(
        &self,
        name: &str,
        signature: &[ValueType],
        axis_tags: &[String],
    ) -> Result<Arc<dyn KernelEntry>> {
        // Would call cuModuleGetFunction, mapping a lookup failure to
        // EntryNotFound.
        let _ = self.module;
        Ok(Arc::new(CudaEntry {
            function: ptr::null_mut(),
            name: name.to_string(),
            arity: signature.len(),
            axes: axis_tags.len(),
        }))
    }
}

/// Driver-API function handle plus its packed-call layout.
struct CudaEntry {
    function: *mut c_void,
    name: String,
    arity: usize,
    axes: usize,
}

// SAFETY: driver function handles are usable from any thread.
unsafe impl Send for CudaEntry {}
unsafe impl Sync for CudaEntry {}

impl KernelEntry for CudaEntry {
    fn launch(&self, args: &[Value], config: LaunchConfig) -> Result<Value> {
        if args.len() != self.arity {
            return Err(Error::LaunchFailed {
                reason: format!(
                    "`{}` packed with {} arguments, expected {}",
                    self.name,
                    args.len(),
                    self.arity
                ),
            });
        }
        // Would marshal args into a kernel-parameter array and call
        // cuLaunchKernel with the grid/block geometry.
        let _ = (self.function, self.axes);
        debug!(
            kernel = %self.name,
            grid = ?config.grid,
            block = ?config.block,
            "launch"
        );
        Ok(Value::Unit)
    }
}
