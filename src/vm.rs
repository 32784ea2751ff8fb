//! Stack-machine host programs.
//!
//! The host half of a split program compiles down to a small stack program:
//! straight-line glue that moves argument values around, does scalar
//! arithmetic, and dispatches into device kernels through an arena of
//! [`BoundKernel`]s indexed by [`KernelId`].

use crate::error::{Error, Result};
use crate::ir::BinOp;
use crate::runtime::{BoundKernel, Callable, Value};

/// Stable handle for one device function of a build, assigned positionally
/// by the program builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(pub u32);

impl KernelId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One stack-machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Push the caller's argument `n`
    PushArg(u16),
    /// Push local slot `n`
    PushLocal(u16),
    /// Pop into local slot `n`
    StoreLocal(u16),
    PushInt(i64),
    PushFloat(f64),
    /// Pop two operands, push the result
    Binary(BinOp),
    /// Pop `argc` arguments (call order restored), dispatch, push the result
    CallKernel { kernel: KernelId, argc: u16 },
    Pop,
    /// Pop the program result and stop
    Ret,
}

/// Compiled host program.
#[derive(Debug, Clone, PartialEq)]
pub struct StackProgram {
    pub(crate) code: Vec<Instr>,
    pub(crate) locals: u16,
}

fn fault(reason: impl Into<String>) -> Error {
    Error::HostFault {
        reason: reason.into(),
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack.pop().ok_or_else(|| fault("stack underflow"))
}

fn apply(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let out = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => a
                    .checked_div(b)
                    .ok_or_else(|| fault("integer division by zero"))?,
                BinOp::Rem => a
                    .checked_rem(b)
                    .ok_or_else(|| fault("integer remainder by zero"))?,
            };
            Ok(Value::Int(out))
        }
        _ => {
            // Mixed operands promote to float.
            let a = lhs
                .as_f64()
                .ok_or_else(|| fault(format!("arithmetic on {} value", lhs.type_name())))?;
            let b = rhs
                .as_f64()
                .ok_or_else(|| fault(format!("arithmetic on {} value", rhs.type_name())))?;
            let out = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Rem => a % b,
            };
            Ok(Value::Float(out))
        }
    }
}

impl StackProgram {
    pub fn code(&self) -> &[Instr] {
        &self.code
    }

    /// Execute against `args`, dispatching device calls through `kernels`.
    pub fn run(&self, args: &[Value], kernels: &[BoundKernel]) -> Result<Value> {
        let mut stack: Vec<Value> = Vec::new();
        let mut locals = vec![Value::Unit; self.locals as usize];

        for instr in &self.code {
            match instr {
                Instr::PushArg(n) => {
                    let value = args
                        .get(*n as usize)
                        .cloned()
                        .ok_or_else(|| fault(format!("missing argument {}", n)))?;
                    stack.push(value);
                }
                Instr::PushLocal(n) => {
                    let value = locals
                        .get(*n as usize)
                        .cloned()
                        .ok_or_else(|| fault(format!("local slot {} out of range", n)))?;
                    stack.push(value);
                }
                Instr::StoreLocal(n) => {
                    let value = pop(&mut stack)?;
                    let slot = locals
                        .get_mut(*n as usize)
                        .ok_or_else(|| fault(format!("local slot {} out of range", n)))?;
                    *slot = value;
                }
                Instr::PushInt(v) => stack.push(Value::Int(*v)),
                Instr::PushFloat(v) => stack.push(Value::Float(*v)),
                Instr::Binary(op) => {
                    let rhs = pop(&mut stack)?;
                    let lhs = pop(&mut stack)?;
                    stack.push(apply(*op, lhs, rhs)?);
                }
                Instr::CallKernel { kernel, argc } => {
                    let bound = kernels
                        .get(kernel.index())
                        .ok_or_else(|| fault(format!("kernel slot {} out of range", kernel.0)))?;
                    let n = *argc as usize;
                    if stack.len() < n {
                        return Err(fault("stack underflow"));
                    }
                    let argv = stack.split_off(stack.len() - n);
                    stack.push(bound.call(&argv)?);
                }
                Instr::Pop => {
                    pop(&mut stack)?;
                }
                Instr::Ret => return pop(&mut stack),
            }
        }
        Ok(Value::Unit)
    }
}
