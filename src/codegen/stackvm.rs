//! Host-side compiler from lowered functions to stack programs.
//!
//! The host function of a split program is straight-line glue: local
//! bindings, scalar arithmetic, device-kernel calls, and a result. Device
//! constructs (barriers, buffer accesses, thread-axis reads) have no host
//! meaning and are rejected outright.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::ir::{Expr, LoweredFunc, Stmt};
use crate::vm::{Instr, KernelId, StackProgram};

/// Compile `func` against the build's device-function table.
pub fn compile(func: &LoweredFunc, kernels: &IndexMap<String, KernelId>) -> Result<StackProgram> {
    let mut compiler = Compiler {
        kernels,
        params: FxHashMap::default(),
        locals: FxHashMap::default(),
        code: Vec::new(),
    };
    for (i, param) in func.params.iter().enumerate() {
        compiler.params.insert(param.name.clone(), i as u16);
    }
    for stmt in &func.body {
        compiler.stmt(stmt)?;
    }
    let locals = compiler.locals.len() as u16;
    Ok(StackProgram {
        code: compiler.code,
        locals,
    })
}

struct Compiler<'a> {
    kernels: &'a IndexMap<String, KernelId>,
    params: FxHashMap<String, u16>,
    locals: FxHashMap<String, u16>,
    code: Vec<Instr>,
}

impl Compiler<'_> {
    fn local_slot(&mut self, name: &str) -> u16 {
        if let Some(slot) = self.locals.get(name) {
            return *slot;
        }
        let slot = self.locals.len() as u16;
        self.locals.insert(name.to_string(), slot);
        slot
    }

    fn unsupported(construct: &str) -> Error {
        Error::UnsupportedHostConstruct {
            construct: construct.to_string(),
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::LetValue { name, value, .. } => {
                self.expr(value)?;
                let slot = self.local_slot(name);
                self.code.push(Instr::StoreLocal(slot));
            }
            Stmt::Eval(expr) => {
                self.expr(expr)?;
                self.code.push(Instr::Pop);
            }
            Stmt::Return(expr) => {
                self.expr(expr)?;
                self.code.push(Instr::Ret);
            }
            Stmt::DeclBuffer { .. } => return Err(Self::unsupported("buffer declaration")),
            Stmt::Store { .. } => return Err(Self::unsupported("buffer store")),
            Stmt::Barrier { .. } => return Err(Self::unsupported("barrier")),
            Stmt::For { .. } => return Err(Self::unsupported("for loop")),
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::IntImm { value, .. } => self.code.push(Instr::PushInt(*value)),
            Expr::FloatImm { value, .. } => self.code.push(Instr::PushFloat(*value)),
            Expr::Var(name) => {
                if let Some(slot) = self.params.get(name) {
                    self.code.push(Instr::PushArg(*slot));
                } else if let Some(slot) = self.locals.get(name) {
                    self.code.push(Instr::PushLocal(*slot));
                } else {
                    return Err(Error::UnknownSymbol { name: name.clone() });
                }
            }
            Expr::AxisIndex(_) => return Err(Self::unsupported("thread-axis read")),
            Expr::Load { .. } => return Err(Self::unsupported("buffer load")),
            Expr::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.code.push(Instr::Binary(*op));
            }
            Expr::Call { callee, args } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let kernel = *self
                    .kernels
                    .get(callee)
                    .ok_or_else(|| Error::UnknownCallee {
                        name: callee.clone(),
                    })?;
                self.code.push(Instr::CallKernel {
                    kernel,
                    argc: args.len() as u16,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, StorageScope, ValueType};
    use pretty_assertions::assert_eq;

    fn table() -> IndexMap<String, KernelId> {
        let mut table = IndexMap::new();
        table.insert("scale".to_string(), KernelId(0));
        table
    }

    #[test]
    fn test_host_glue_compiles() {
        let mut host = LoweredFunc::new("main");
        host.add_param("a", ValueType::handle())
            .add_param("n", ValueType::int32());
        host.push_stmt(Stmt::Eval(Expr::Call {
            callee: "scale".into(),
            args: vec![Expr::var("a"), Expr::var("n")],
        }));
        host.push_stmt(Stmt::Return(Expr::binary(
            BinOp::Mul,
            Expr::var("n"),
            Expr::int32(2),
        )));

        let program = compile(&host, &table()).unwrap();
        assert_eq!(
            program.code(),
            &[
                Instr::PushArg(0),
                Instr::PushArg(1),
                Instr::CallKernel {
                    kernel: KernelId(0),
                    argc: 2
                },
                Instr::Pop,
                Instr::PushArg(1),
                Instr::PushInt(2),
                Instr::Binary(BinOp::Mul),
                Instr::Ret,
            ]
        );
    }

    #[test]
    fn test_let_bindings_use_local_slots() {
        let mut host = LoweredFunc::new("main");
        host.add_param("n", ValueType::int32());
        host.push_stmt(Stmt::LetValue {
            name: "m".into(),
            ty: ValueType::int32(),
            value: Expr::binary(BinOp::Add, Expr::var("n"), Expr::int32(1)),
        });
        host.push_stmt(Stmt::Return(Expr::var("m")));

        let program = compile(&host, &table()).unwrap();
        assert_eq!(
            program.code(),
            &[
                Instr::PushArg(0),
                Instr::PushInt(1),
                Instr::Binary(BinOp::Add),
                Instr::StoreLocal(0),
                Instr::PushLocal(0),
                Instr::Ret,
            ]
        );
    }

    #[test]
    fn test_unknown_callee() {
        let mut host = LoweredFunc::new("main");
        host.push_stmt(Stmt::Eval(Expr::Call {
            callee: "missing".into(),
            args: vec![],
        }));
        match compile(&host, &table()) {
            Err(Error::UnknownCallee { name }) => assert_eq!(name, "missing"),
            other => panic!("expected UnknownCallee, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_symbol() {
        let mut host = LoweredFunc::new("main");
        host.push_stmt(Stmt::Return(Expr::var("ghost")));
        assert!(matches!(
            compile(&host, &table()),
            Err(Error::UnknownSymbol { .. })
        ));
    }

    #[test]
    fn test_device_constructs_rejected() {
        let mut host = LoweredFunc::new("main");
        host.push_stmt(Stmt::Barrier {
            scope: StorageScope::Shared,
        });
        assert!(matches!(
            compile(&host, &table()),
            Err(Error::UnsupportedHostConstruct { .. })
        ));
    }
}
