//! Code generation: device source emission and host stack programs.
//!
//! ```text
//! LoweredFunc -> SourcePrinter<CudaDialect> -> SourceUnit   (device)
//! LoweredFunc -> stackvm::compile           -> StackProgram (host)
//! ```

pub mod cuda;
pub mod source;
pub mod stackvm;

pub use cuda::{CudaDialect, PREAMBLE, SourceUnit, assemble, compile_function};
pub use source::{CDialect, Dialect, SourcePrinter, c_type};
