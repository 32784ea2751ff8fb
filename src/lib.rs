//! kernelgen — JIT pipeline from lowered kernel IR to callable GPU programs.
//!
//! Turns a batch of lowered functions describing a parallel kernel into
//! device source text, a dynamically compiled device artifact, and a
//! host-callable program that marshals arguments and launch geometry.
//!
//! # Architecture
//!
//! ```text
//! LoweredFunc[] -> assemble -> SourceUnit -> CompilationPipeline
//!               -> DeviceArtifact -> KernelModule -> BoundKernel[]
//!               -> HostProgram
//! ```
//!
//! Build time flows one direction through fallible, synchronous steps. At
//! call time a [`HostProgram`] selects the active device from its own
//! arguments and dispatches into its kernels through one type-erased
//! [`Callable`] convention.
//!
//! # Example
//!
//! ```no_run
//! use kernelgen::ir::{Expr, LoweredFunc, Stmt, ThreadAxis, ValueType};
//! use kernelgen::build;
//!
//! let mut scale = LoweredFunc::new("scale");
//! scale
//!     .add_param("a", ValueType::handle())
//!     .add_param("s", ValueType::float32())
//!     .add_axis(ThreadAxis::thread_x());
//!
//! let mut main = LoweredFunc::new("main");
//! main.add_param("a", ValueType::handle())
//!     .add_param("s", ValueType::float32())
//!     .add_param("n", ValueType::int32());
//! main.push_stmt(Stmt::Eval(Expr::Call {
//!     callee: "scale".into(),
//!     args: vec![Expr::var("a"), Expr::var("s"), Expr::var("n")],
//! }));
//! main.push_stmt(Stmt::Return(Expr::var("s")));
//!
//! let program = build(&[main, scale], "stackvm")?;
//! # let _ = program;
//! # Ok::<(), kernelgen::Error>(())
//! ```

pub mod codegen;
pub mod error;
pub mod ir;
pub mod pipeline;
pub mod runtime;
pub mod vm;

pub use codegen::{SourceUnit, assemble, compile_function};
pub use error::{Error, Result};
pub use pipeline::{CompilationPipeline, HostProgram, ProgramBuilder};
pub use runtime::{
    BoundKernel, Callable, DeviceArtifact, DeviceBackend, DeviceBuffer, KernelCompiler,
    KernelEntry, KernelModule, LaunchConfig, SourceTransform, UnavailableBackend, Value,
    default_backend, resolve,
};
pub use vm::{KernelId, StackProgram};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build a callable program with the default backend for this build.
///
/// `functions[0]` is the host function, the rest are device functions;
/// `host_mode` selects the host-execution backend (`"stackvm"`).
pub fn build(functions: &[ir::LoweredFunc], host_mode: &str) -> Result<HostProgram> {
    ProgramBuilder::new().build(functions, host_mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
