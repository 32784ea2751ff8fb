//! Generic C-like source printer for lowered functions.
//!
//! [`SourcePrinter`] owns everything that is not accelerator-specific:
//! signatures, statements, expressions, and type spelling. Target dialects
//! plug in through [`Dialect`], which covers exactly the three points where
//! device syntax diverges: the entry-point qualifier, storage-scope
//! qualifiers, and synchronization barriers.

use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::ir::{Expr, LoweredFunc, ScalarKind, Stmt, StorageScope, ValueType};

/// Target-specific syntax hooks layered over the generic printer.
pub trait Dialect {
    /// Qualifier prepended to a function so the target compiler recognizes
    /// it as a device entry point. Empty for host dialects.
    fn entry_qualifier(&self) -> &'static str {
        ""
    }

    /// Storage qualifier written immediately before a buffer declaration in
    /// `scope`. Scopes whose storage is the unqualified default must fail
    /// rather than silently print nothing.
    fn storage_qualifier(&self, scope: StorageScope) -> Result<&'static str>;

    /// Barrier statement for `scope`, without indentation or newline.
    fn barrier(&self, scope: StorageScope) -> Result<&'static str>;
}

/// Plain C dialect: no entry qualifier, no scoped storage, no barriers.
pub struct CDialect;

impl Dialect for CDialect {
    fn storage_qualifier(&self, scope: StorageScope) -> Result<&'static str> {
        Err(Error::UnsupportedScope {
            scope: scope.to_string(),
        })
    }

    fn barrier(&self, scope: StorageScope) -> Result<&'static str> {
        Err(Error::UnsupportedSync {
            scope: scope.to_string(),
        })
    }
}

/// Spell a value type in C source.
pub fn c_type(ty: &ValueType) -> Result<String> {
    if ty.is_handle() {
        return Ok("void*".to_string());
    }
    if ty.lanes == 1 {
        let name = match (ty.kind, ty.bits) {
            (ScalarKind::Float, 16) => "half",
            (ScalarKind::Float, 32) => "float",
            (ScalarKind::Float, 64) => "double",
            (ScalarKind::Int, 8) => "int8_t",
            (ScalarKind::Int, 16) => "int16_t",
            (ScalarKind::Int, 32) => "int32_t",
            (ScalarKind::Int, 64) => "int64_t",
            (ScalarKind::UInt, 8) => "uint8_t",
            (ScalarKind::UInt, 16) => "uint16_t",
            (ScalarKind::UInt, 32) => "uint32_t",
            (ScalarKind::UInt, 64) => "uint64_t",
            _ => {
                return Err(Error::UnsupportedType { ty: ty.to_string() });
            }
        };
        return Ok(name.to_string());
    }
    // Vector spellings follow the CUDA built-ins: int2..float4.
    if (2..=4).contains(&ty.lanes) && ty.bits == 32 {
        let base = match ty.kind {
            ScalarKind::Int => "int",
            ScalarKind::UInt => "uint",
            ScalarKind::Float => "float",
            ScalarKind::Handle => unreachable!(),
        };
        return Ok(format!("{}{}", base, ty.lanes));
    }
    Err(Error::UnsupportedType { ty: ty.to_string() })
}

/// Statement/expression printer for one lowered function.
pub struct SourcePrinter<D: Dialect> {
    dialect: D,
    buf: String,
    indent: usize,
    /// Single-static-assignment form: local bindings become `const`
    ssa: bool,
    /// Handle-typed parameters; loads and stores through these need a cast
    handles: FxHashSet<String>,
}

impl<D: Dialect> SourcePrinter<D> {
    pub fn new(dialect: D) -> Self {
        Self {
            dialect,
            buf: String::new(),
            indent: 0,
            ssa: false,
            handles: FxHashSet::default(),
        }
    }

    /// Emit the full text of `func`. Deterministic for identical input and
    /// printer configuration.
    pub fn compile(mut self, func: &LoweredFunc, ssa: bool) -> Result<String> {
        self.ssa = ssa;
        for param in &func.params {
            if param.ty.is_handle() {
                self.handles.insert(param.name.clone());
            }
        }

        let qualifier = self.dialect.entry_qualifier();
        if !qualifier.is_empty() {
            self.buf.push_str(qualifier);
            self.buf.push(' ');
        }
        self.buf.push_str("void ");
        self.buf.push_str(&func.name);
        self.buf.push('(');
        for (i, param) in func.params.iter().enumerate() {
            if i > 0 {
                self.buf.push_str(", ");
            }
            let ty = c_type(&param.ty)?;
            self.buf.push_str(&ty);
            self.buf.push(' ');
            self.buf.push_str(&param.name);
        }
        self.buf.push_str(") {\n");

        self.indent = 1;
        for stmt in &func.body {
            self.print_stmt(stmt)?;
        }
        self.buf.push_str("}\n");
        Ok(self.buf)
    }

    fn print_indent(&mut self) {
        for _ in 0..self.indent {
            self.buf.push_str("  ");
        }
    }

    /// Write the storage qualifier for `scope` at the current position.
    fn print_storage_scope(&mut self, scope: StorageScope) -> Result<()> {
        let qualifier = self.dialect.storage_qualifier(scope)?;
        self.buf.push_str(qualifier);
        Ok(())
    }

    /// Emit one synchronization statement for `scope`.
    fn print_storage_sync(&mut self, scope: StorageScope) -> Result<()> {
        let barrier = self.dialect.barrier(scope)?;
        self.print_indent();
        self.buf.push_str(barrier);
        self.buf.push('\n');
        Ok(())
    }

    fn print_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::DeclBuffer {
                name,
                elem,
                scope,
                len,
            } => {
                self.print_indent();
                self.print_storage_scope(*scope)?;
                let ty = c_type(elem)?;
                self.buf.push_str(&format!("{} {}[{}];\n", ty, name, len));
            }
            Stmt::LetValue { name, ty, value } => {
                self.print_indent();
                if self.ssa {
                    self.buf.push_str("const ");
                }
                let ty = c_type(ty)?;
                let value = self.expr_text(value)?;
                self.buf.push_str(&format!("{} {} = {};\n", ty, name, value));
            }
            Stmt::Store {
                buffer,
                elem,
                index,
                value,
            } => {
                self.print_indent();
                let target = self.element_ref(buffer, elem, index)?;
                let value = self.expr_text(value)?;
                self.buf.push_str(&format!("{} = {};\n", target, value));
            }
            Stmt::Barrier { scope } => {
                self.print_storage_sync(*scope)?;
            }
            Stmt::For { var, extent, body } => {
                self.print_indent();
                let extent = self.expr_text(extent)?;
                self.buf.push_str(&format!(
                    "for (int32_t {var} = 0; {var} < {extent}; ++{var}) {{\n"
                ));
                self.indent += 1;
                for stmt in body {
                    self.print_stmt(stmt)?;
                }
                self.indent -= 1;
                self.print_indent();
                self.buf.push_str("}\n");
            }
            Stmt::Eval(expr) => {
                self.print_indent();
                let expr = self.expr_text(expr)?;
                self.buf.push_str(&expr);
                self.buf.push_str(";\n");
            }
            Stmt::Return(expr) => {
                self.print_indent();
                let expr = self.expr_text(expr)?;
                self.buf.push_str(&format!("return {};\n", expr));
            }
        }
        Ok(())
    }

    /// Indexed element access; handle parameters are typed through a cast.
    fn element_ref(&self, buffer: &str, elem: &ValueType, index: &Expr) -> Result<String> {
        let index = self.expr_text(index)?;
        if self.handles.contains(buffer) {
            let ty = c_type(elem)?;
            Ok(format!("(({}*){})[{}]", ty, buffer, index))
        } else {
            Ok(format!("{}[{}]", buffer, index))
        }
    }

    fn expr_text(&self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::IntImm { value, .. } => Ok(value.to_string()),
            Expr::FloatImm { ty, value } => {
                if ty.bits == 32 {
                    Ok(format!("{:?}f", value))
                } else {
                    Ok(format!("{:?}", value))
                }
            }
            Expr::Var(name) => Ok(name.clone()),
            Expr::AxisIndex(tag) => Ok(tag.clone()),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.expr_text(lhs)?;
                let rhs = self.expr_text(rhs)?;
                Ok(format!("({} {} {})", lhs, op.token(), rhs))
            }
            Expr::Load {
                buffer,
                elem,
                index,
            } => self.element_ref(buffer, elem, index),
            Expr::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|a| self.expr_text(a))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{}({})", callee, args.join(", ")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinOp;
    use pretty_assertions::assert_eq;

    fn plain(func: &LoweredFunc) -> String {
        SourcePrinter::new(CDialect).compile(func, false).unwrap()
    }

    #[test]
    fn test_c_type_scalars() {
        assert_eq!(c_type(&ValueType::int32()).unwrap(), "int32_t");
        assert_eq!(c_type(&ValueType::uint32()).unwrap(), "uint32_t");
        assert_eq!(c_type(&ValueType::float32()).unwrap(), "float");
        assert_eq!(c_type(&ValueType::float64()).unwrap(), "double");
        assert_eq!(c_type(&ValueType::handle()).unwrap(), "void*");
    }

    #[test]
    fn test_c_type_vectors() {
        let v4 = ValueType::vector(ScalarKind::Float, 32, 4);
        assert_eq!(c_type(&v4).unwrap(), "float4");
        let bad = ValueType::vector(ScalarKind::Float, 64, 8);
        assert!(matches!(
            c_type(&bad),
            Err(Error::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_plain_function() {
        let mut f = LoweredFunc::new("scale");
        f.add_param("a", ValueType::handle())
            .add_param("s", ValueType::float32());
        f.push_stmt(Stmt::Store {
            buffer: "a".into(),
            elem: ValueType::float32(),
            index: Expr::int32(0),
            value: Expr::binary(
                BinOp::Mul,
                Expr::load("a", ValueType::float32(), Expr::int32(0)),
                Expr::var("s"),
            ),
        });

        let text = plain(&f);
        assert_eq!(
            text,
            "void scale(void* a, float s) {\n  ((float*)a)[0] = (((float*)a)[0] * s);\n}\n"
        );
    }

    #[test]
    fn test_ssa_makes_bindings_const() {
        let mut f = LoweredFunc::new("f");
        f.add_param("n", ValueType::int32());
        f.push_stmt(Stmt::LetValue {
            name: "m".into(),
            ty: ValueType::int32(),
            value: Expr::binary(BinOp::Add, Expr::var("n"), Expr::int32(1)),
        });

        let loose = SourcePrinter::new(CDialect).compile(&f, false).unwrap();
        let ssa = SourcePrinter::new(CDialect).compile(&f, true).unwrap();
        assert!(loose.contains("  int32_t m = (n + 1);\n"));
        assert!(ssa.contains("  const int32_t m = (n + 1);\n"));
        assert_eq!(ssa.replace("const ", ""), loose);
    }

    #[test]
    fn test_plain_dialect_rejects_scoped_storage() {
        let mut f = LoweredFunc::new("f");
        f.push_stmt(Stmt::DeclBuffer {
            name: "cache".into(),
            elem: ValueType::float32(),
            scope: StorageScope::Shared,
            len: 64,
        });
        assert!(matches!(
            SourcePrinter::new(CDialect).compile(&f, false),
            Err(Error::UnsupportedScope { .. })
        ));

        let mut g = LoweredFunc::new("g");
        g.push_stmt(Stmt::Barrier {
            scope: StorageScope::Shared,
        });
        assert!(matches!(
            SourcePrinter::new(CDialect).compile(&g, false),
            Err(Error::UnsupportedSync { .. })
        ));
    }

    #[test]
    fn test_for_loop() {
        let mut f = LoweredFunc::new("fill");
        f.add_param("a", ValueType::handle())
            .add_param("n", ValueType::int32());
        f.push_stmt(Stmt::For {
            var: "i".into(),
            extent: Expr::var("n"),
            body: vec![Stmt::Store {
                buffer: "a".into(),
                elem: ValueType::float32(),
                index: Expr::var("i"),
                value: Expr::float32(0.0),
            }],
        });

        let text = plain(&f);
        assert!(text.contains("for (int32_t i = 0; i < n; ++i) {\n"));
        assert!(text.contains("    ((float*)a)[i] = 0.0f;\n"));
    }
}
