//! Lowered kernel IR consumed by the code generators.
//!
//! A [`LoweredFunc`] is one kernel past optimization and lowering, ready for
//! target-specific text emission: a name, ordered typed parameters, ordered
//! thread-axis bindings, and an opaque statement body. Upstream passes build
//! these values; this crate only reads them.

use std::fmt;

/// Scalar kind of a value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Signed integer
    Int,
    /// Unsigned integer
    UInt,
    /// Floating point
    Float,
    /// Opaque pointer (device buffer)
    Handle,
}

/// How a value crosses the host/device call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarshalClass {
    /// Passed as a 64-bit integer
    Int,
    /// Passed as a 64-bit float
    Float,
    /// Passed as a device-buffer handle
    Buffer,
}

/// Semantic value type: scalar kind, bit width, vector lane count.
///
/// A `ValueType` determines both the printed device-source declaration and
/// the runtime marshaling rule for a parameter; the two must never diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueType {
    pub kind: ScalarKind,
    pub bits: u8,
    pub lanes: u16,
}

impl ValueType {
    pub const fn scalar(kind: ScalarKind, bits: u8) -> Self {
        Self {
            kind,
            bits,
            lanes: 1,
        }
    }

    pub const fn vector(kind: ScalarKind, bits: u8, lanes: u16) -> Self {
        Self { kind, bits, lanes }
    }

    pub const fn int32() -> Self {
        Self::scalar(ScalarKind::Int, 32)
    }

    pub const fn int64() -> Self {
        Self::scalar(ScalarKind::Int, 64)
    }

    pub const fn uint32() -> Self {
        Self::scalar(ScalarKind::UInt, 32)
    }

    pub const fn float32() -> Self {
        Self::scalar(ScalarKind::Float, 32)
    }

    pub const fn float64() -> Self {
        Self::scalar(ScalarKind::Float, 64)
    }

    /// Opaque device pointer. Width is the machine pointer width.
    pub const fn handle() -> Self {
        Self::scalar(ScalarKind::Handle, 64)
    }

    pub fn is_handle(&self) -> bool {
        self.kind == ScalarKind::Handle
    }

    pub fn is_float(&self) -> bool {
        self.kind == ScalarKind::Float
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.kind, ScalarKind::Int | ScalarKind::UInt)
    }

    /// Marshaling rule for call-time argument checking.
    pub fn marshal_class(&self) -> MarshalClass {
        match self.kind {
            ScalarKind::Handle => MarshalClass::Buffer,
            ScalarKind::Float => MarshalClass::Float,
            ScalarKind::Int | ScalarKind::UInt => MarshalClass::Int,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == ScalarKind::Handle {
            return write!(f, "handle");
        }
        let kind = match self.kind {
            ScalarKind::Int => "int",
            ScalarKind::UInt => "uint",
            ScalarKind::Float => "float",
            ScalarKind::Handle => unreachable!(),
        };
        write!(f, "{}{}", kind, self.bits)?;
        if self.lanes > 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

/// Typed kernel parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: ValueType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Role of a thread axis in the launch grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRole {
    /// Grid dimension (number of blocks)
    BlockIndex,
    /// Block dimension (threads per block)
    ThreadIndex,
}

/// Declared mapping from a symbolic execution-dimension tag to its role in
/// the function's launch grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadAxis {
    pub role: AxisRole,
    pub tag: String,
}

impl ThreadAxis {
    pub fn new(role: AxisRole, tag: impl Into<String>) -> Self {
        Self {
            role,
            tag: tag.into(),
        }
    }

    pub fn block_x() -> Self {
        Self::new(AxisRole::BlockIndex, "blockIdx.x")
    }

    pub fn block_y() -> Self {
        Self::new(AxisRole::BlockIndex, "blockIdx.y")
    }

    pub fn block_z() -> Self {
        Self::new(AxisRole::BlockIndex, "blockIdx.z")
    }

    pub fn thread_x() -> Self {
        Self::new(AxisRole::ThreadIndex, "threadIdx.x")
    }

    pub fn thread_y() -> Self {
        Self::new(AxisRole::ThreadIndex, "threadIdx.y")
    }

    pub fn thread_z() -> Self {
        Self::new(AxisRole::ThreadIndex, "threadIdx.z")
    }
}

/// Buffer storage scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Device memory, the unqualified default
    Global,
    /// On-chip memory shared by one thread block
    Shared,
}

impl fmt::Display for StorageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageScope::Global => write!(f, "global"),
            StorageScope::Shared => write!(f, "shared"),
        }
    }
}

/// Binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    /// Source token for C-like emission.
    pub fn token(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntImm {
        ty: ValueType,
        value: i64,
    },
    FloatImm {
        ty: ValueType,
        value: f64,
    },
    /// Parameter or local binding, by name
    Var(String),
    /// Symbolic thread-axis read, e.g. `threadIdx.x`
    AxisIndex(String),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Element load from a buffer
    Load {
        buffer: String,
        elem: ValueType,
        index: Box<Expr>,
    },
    /// Host-side invocation of a device function
    Call {
        callee: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn int32(value: i64) -> Self {
        Expr::IntImm {
            ty: ValueType::int32(),
            value,
        }
    }

    pub fn float32(value: f64) -> Self {
        Expr::FloatImm {
            ty: ValueType::float32(),
            value,
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn load(buffer: impl Into<String>, elem: ValueType, index: Expr) -> Self {
        Expr::Load {
            buffer: buffer.into(),
            elem,
            index: Box::new(index),
        }
    }
}

/// Statement tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Local buffer declaration with an explicit storage scope
    DeclBuffer {
        name: String,
        elem: ValueType,
        scope: StorageScope,
        len: u32,
    },
    /// Local value binding
    LetValue {
        name: String,
        ty: ValueType,
        value: Expr,
    },
    /// Element store into a buffer
    Store {
        buffer: String,
        elem: ValueType,
        index: Expr,
        value: Expr,
    },
    /// Cross-thread synchronization point
    Barrier { scope: StorageScope },
    /// Counted loop over `0..extent`
    For {
        var: String,
        extent: Expr,
        body: Vec<Stmt>,
    },
    /// Expression evaluated for effect
    Eval(Expr),
    /// Host-function result
    Return(Expr),
}

/// One lowered kernel or host function.
#[derive(Debug, Clone, PartialEq)]
pub struct LoweredFunc {
    pub name: String,
    pub params: Vec<Parameter>,
    pub thread_axes: Vec<ThreadAxis>,
    pub body: Vec<Stmt>,
}

impl LoweredFunc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            thread_axes: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn add_param(&mut self, name: impl Into<String>, ty: ValueType) -> &mut Self {
        self.params.push(Parameter::new(name, ty));
        self
    }

    pub fn add_axis(&mut self, axis: ThreadAxis) -> &mut Self {
        self.thread_axes.push(axis);
        self
    }

    pub fn push_stmt(&mut self, stmt: Stmt) -> &mut Self {
        self.body.push(stmt);
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Ordered parameter value types, for entry-point binding.
    pub fn signature(&self) -> Vec<ValueType> {
        self.params.iter().map(|p| p.ty).collect()
    }

    /// Ordered thread-axis tags, for launch-configuration binding.
    pub fn axis_tags(&self) -> Vec<String> {
        self.thread_axes.iter().map(|a| a.tag.clone()).collect()
    }
}
