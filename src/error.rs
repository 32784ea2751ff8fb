//! Error taxonomy for the kernel build pipeline.
//!
//! Every failure here is treated as a programmer or configuration defect:
//! errors surface immediately to the caller of `build`/`compile`/`resolve`
//! and nothing is caught or retried internally.

use miette::Diagnostic;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    // === Source emission ===
    #[error("storage scope `{scope}` takes no qualifier in device source")]
    #[diagnostic(
        code(codegen::unsupported_scope),
        help("`global` buffers are the unqualified default; only `shared` carries an explicit qualifier")
    )]
    UnsupportedScope { scope: String },

    #[error("no synchronization barrier exists for storage scope `{scope}`")]
    #[diagnostic(code(codegen::unsupported_sync))]
    UnsupportedSync { scope: String },

    #[error("value type `{ty}` has no device source representation")]
    #[diagnostic(code(codegen::unsupported_type))]
    UnsupportedType { ty: String },

    // === Host compilation ===
    #[error("`{construct}` cannot appear in a host function body")]
    #[diagnostic(code(codegen::host_construct))]
    UnsupportedHostConstruct { construct: String },

    #[error("unknown symbol `{name}` in host function body")]
    #[diagnostic(code(codegen::unknown_symbol))]
    UnknownSymbol { name: String },

    #[error("host code calls `{name}`, which is not a device function of this build")]
    #[diagnostic(code(codegen::unknown_callee))]
    UnknownCallee { name: String },

    // === Dynamic compilation and loading ===
    #[error("device runtime is not enabled in this build")]
    #[diagnostic(
        code(runtime::unavailable),
        help("rebuild with `--features cuda` or inject a compilation backend")
    )]
    RuntimeUnavailable,

    #[error("device compilation failed: {reason}")]
    #[diagnostic(code(runtime::compile_failed))]
    CompileFailed { reason: String },

    #[error("failed to load device module: {reason}")]
    #[diagnostic(code(runtime::module_load))]
    ModuleLoad { reason: String },

    #[error("device module has no entry point named `{name}`")]
    #[diagnostic(code(runtime::entry_not_found))]
    EntryNotFound { name: String },

    #[error("unknown thread-axis tag `{tag}`")]
    #[diagnostic(code(runtime::unknown_axis))]
    UnknownAxisTag { tag: String },

    // === Program building ===
    #[error("a program needs one host function and at least one device function, got {count}")]
    #[diagnostic(code(build::invalid_program))]
    InvalidProgram { count: usize },

    #[error("unknown host mode `{mode}`")]
    #[diagnostic(
        code(build::unknown_host_mode),
        help("the only recognized host mode is `stackvm`")
    )]
    UnknownHostMode { mode: String },

    // === Invocation ===
    #[error("kernel `{name}` expects {expected} arguments, got {got}")]
    #[diagnostic(code(call::arity))]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("argument {index} of `{name}`: expected {expected}, got {got}")]
    #[diagnostic(code(call::argument_type))]
    ArgumentType {
        name: String,
        index: usize,
        expected: String,
        got: String,
    },

    #[error("kernel launch failed: {reason}")]
    #[diagnostic(code(call::launch_failed))]
    LaunchFailed { reason: String },

    #[error("host program fault: {reason}")]
    #[diagnostic(code(call::host_fault))]
    HostFault { reason: String },
}
