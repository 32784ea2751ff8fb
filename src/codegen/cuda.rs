//! CUDA source emission.
//!
//! [`CudaDialect`] supplies the accelerator-specific syntax on top of the
//! generic printer: the `__global__` entry qualifier, the `__shared__`
//! storage qualifier, and the block-level `__syncthreads()` barrier.
//! [`assemble`] concatenates a batch of kernels into one compilable
//! translation unit.

use crate::error::{Error, Result};
use crate::ir::{LoweredFunc, StorageScope};

use super::source::{Dialect, SourcePrinter};

/// CUDA C dialect.
pub struct CudaDialect;

impl Dialect for CudaDialect {
    fn entry_qualifier(&self) -> &'static str {
        "extern \"C\" __global__"
    }

    fn storage_qualifier(&self, scope: StorageScope) -> Result<&'static str> {
        match scope {
            StorageScope::Shared => Ok("__shared__ "),
            // Global storage is the unqualified default; asking for its
            // qualifier is a caller contract violation, not a no-op.
            StorageScope::Global => Err(Error::UnsupportedScope {
                scope: scope.to_string(),
            }),
        }
    }

    fn barrier(&self, scope: StorageScope) -> Result<&'static str> {
        match scope {
            StorageScope::Shared => Ok("__syncthreads();"),
            // No cross-group barrier exists at source level.
            StorageScope::Global => Err(Error::UnsupportedSync {
                scope: scope.to_string(),
            }),
        }
    }
}

/// Fixed-width aliases NVRTC does not provide on its own.
pub const PREAMBLE: &str = "\
typedef signed char int8_t;
typedef short int16_t;
typedef int int32_t;
typedef long long int64_t;
typedef unsigned char uint8_t;
typedef unsigned short uint16_t;
typedef unsigned int uint32_t;
typedef unsigned long long uint64_t;
";

/// Emit the CUDA text of exactly one function.
pub fn compile_function(func: &LoweredFunc, ssa: bool) -> Result<String> {
    SourcePrinter::new(CudaDialect).compile(func, ssa)
}

/// One compilable device source unit, assembled from an ordered batch of
/// lowered functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    text: String,
}

impl SourceUnit {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Assemble `funcs` into one source unit: the typedef preamble, then each
/// function's text in list order, separated by a single line break. Pure.
pub fn assemble(funcs: &[LoweredFunc]) -> Result<SourceUnit> {
    let mut text = String::from(PREAMBLE);
    text.push('\n');
    for func in funcs {
        text.push_str(&compile_function(func, false)?);
        text.push('\n');
    }
    Ok(SourceUnit { text })
}
