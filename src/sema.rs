//! Symbol resolution and type checking (`spec.md` §4.5 step 1, §6).
//!
//! Produces the AST contract `spec.md` §6 describes as consumed by the
//! backend: every expression gets a resolved [`Type`], every identifier
//! gets a resolved [`SymbolKind`]. Re-run from scratch on every compile-time
//! fixed-point iteration, per `spec.md` §9's note that re-running the whole
//! typing pipeline each time is "simple and correct".

use crate::ast::*;
use crate::error::{Loc, SemaError};
use crate::types::Type;
use std::collections::HashMap;

struct Checker<'a> {
    module: &'a Module,
    errors: Vec<SemaError>,
}

type Scope = HashMap<String, (SymbolKind, Type)>;

/// Runs sema over the whole module, collecting every error rather than
/// stopping at the first (`spec.md` §4.5: typing errors are collected;
/// compilation terminates before lowering if any are present).
pub fn check(module: &Module) -> Result<(), Vec<SemaError>> {
    let mut checker = Checker {
        module,
        errors: Vec::new(),
    };
    for function in &module.functions {
        checker.check_function(function);
    }
    if checker.errors.is_empty() {
        Ok(())
    } else {
        Err(checker.errors)
    }
}

impl<'a> Checker<'a> {
    fn check_function(&mut self, f: &Function) {
        let mut base = Scope::new();
        for param in &f.params {
            if param.ty != Type::S32 {
                self.errors.push(SemaError::NonScalarParam {
                    loc: f.loc,
                    name: param.name.clone(),
                    ty: param.ty.to_string(),
                });
            }
            base.insert(param.name.clone(), (SymbolKind::Parameter, param.ty.clone()));
        }
        if f.return_type != Type::S32 {
            self.errors.push(SemaError::NonScalarReturn {
                loc: f.loc,
                ty: f.return_type.to_string(),
            });
        }
        let mut scopes = vec![base];
        self.check_stmts(&f.body, &mut scopes, 0, f);
    }

    fn check_stmts(&mut self, stmts: &[Statement], scopes: &mut Vec<Scope>, loop_depth: u32, f: &Function) {
        for stmt in stmts {
            self.check_stmt(stmt, scopes, loop_depth, f);
        }
    }

    fn check_stmt(&mut self, stmt: &Statement, scopes: &mut Vec<Scope>, loop_depth: u32, f: &Function) {
        match &stmt.kind {
            StmtKind::VarDecl { name, ty } => {
                let scope = scopes.last_mut().expect("at least one scope always present");
                if scope.contains_key(name) {
                    self.errors.push(SemaError::DuplicateSymbol {
                        loc: stmt.loc,
                        name: name.clone(),
                    });
                } else {
                    scope.insert(name.clone(), (SymbolKind::Local, ty.clone()));
                }
            }
            StmtKind::Assign { lhs, rhs } => {
                if !is_lvalue(lhs) {
                    self.errors.push(SemaError::NotAssignable { loc: lhs.loc });
                }
                let lty = self.infer(lhs, scopes);
                let rty = self.infer(rhs, scopes);
                self.expect_eq(stmt.loc, &lty, &rty);
                if lty != Type::S32 {
                    self.errors.push(SemaError::NonScalarAssign {
                        loc: stmt.loc,
                        ty: lty.to_string(),
                    });
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cty = self.infer(cond, scopes);
                self.expect_eq(cond.loc, &Type::S32, &cty);
                self.check_stmt(then_branch, scopes, loop_depth, f);
                if let Some(else_branch) = else_branch {
                    self.check_stmt(else_branch, scopes, loop_depth, f);
                }
            }
            StmtKind::While { cond, body } => {
                let cty = self.infer(cond, scopes);
                self.expect_eq(cond.loc, &Type::S32, &cty);
                self.check_stmt(body, scopes, loop_depth + 1, f);
            }
            StmtKind::Block(stmts) => {
                scopes.push(Scope::new());
                self.check_stmts(stmts, scopes, loop_depth, f);
                scopes.pop();
            }
            StmtKind::Print(args) => {
                for arg in args {
                    let ty = self.infer(arg, scopes);
                    self.expect_eq(arg.loc, &Type::S32, &ty);
                }
            }
            StmtKind::Return(expr) => {
                let ty = self.infer(expr, scopes);
                self.expect_eq(expr.loc, &f.return_type, &ty);
            }
            StmtKind::Break => {
                if loop_depth == 0 {
                    self.errors.push(SemaError::BreakOutsideLoop { loc: stmt.loc });
                }
            }
            StmtKind::Continue => {
                if loop_depth == 0 {
                    self.errors.push(SemaError::ContinueOutsideLoop { loc: stmt.loc });
                }
            }
        }
    }

    fn expect_eq(&mut self, loc: Loc, expected: &Type, found: &Type) {
        if expected != found {
            self.errors.push(SemaError::TypeMismatch {
                loc,
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
    }

    fn infer(&mut self, expr: &Expression, scopes: &Vec<Scope>) -> Type {
        let ty = self.infer_kind(expr, scopes);
        *expr.ty.borrow_mut() = Some(ty.clone());
        ty
    }

    fn infer_kind(&mut self, expr: &Expression, scopes: &Vec<Scope>) -> Type {
        match &expr.kind {
            ExprKind::IntLiteral(_) => Type::S32,
            ExprKind::Identifier { name, symbol } => {
                for scope in scopes.iter().rev() {
                    if let Some((kind, ty)) = scope.get(name) {
                        *symbol.borrow_mut() = Some(*kind);
                        return ty.clone();
                    }
                }
                if let Some(global) = self.module.global(name) {
                    *symbol.borrow_mut() = Some(SymbolKind::Global);
                    return global.ty.clone();
                }
                self.errors.push(SemaError::UndefinedSymbol {
                    loc: expr.loc,
                    name: name.clone(),
                });
                Type::S32
            }
            ExprKind::Unary { operand, .. } => {
                let ty = self.infer(operand, scopes);
                self.expect_eq(operand.loc, &Type::S32, &ty);
                Type::S32
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                let lty = self.infer(lhs, scopes);
                let rty = self.infer(rhs, scopes);
                self.expect_eq(lhs.loc, &Type::S32, &lty);
                self.expect_eq(rhs.loc, &Type::S32, &rty);
                Type::S32
            }
            ExprKind::Field { base, field } => {
                let bty = self.infer(base, scopes);
                match &bty {
                    Type::Struct(def) => match def.field(field) {
                        Some(f) => f.ty.clone(),
                        None => {
                            self.errors.push(SemaError::NoSuchField {
                                loc: expr.loc,
                                ty: bty.to_string(),
                                field: field.clone(),
                            });
                            Type::S32
                        }
                    },
                    _ => {
                        self.errors.push(SemaError::NotAStruct {
                            loc: expr.loc,
                            name: bty.to_string(),
                        });
                        Type::S32
                    }
                }
            }
            ExprKind::Index { base, index } => {
                let bty = self.infer(base, scopes);
                let ity = self.infer(index, scopes);
                self.expect_eq(index.loc, &Type::S32, &ity);
                match bty {
                    Type::Array(elem, _) => *elem,
                    other => {
                        self.errors.push(SemaError::NotIndexable {
                            loc: expr.loc,
                            ty: other.to_string(),
                        });
                        Type::S32
                    }
                }
            }
            ExprKind::Call {
                callee,
                args,
                resolution,
                ..
            } => {
                if matches!(*resolution.borrow(), CallResolution::Resolved(_)) {
                    // Idempotent resolution (spec.md §8): a resolved comptime
                    // call always re-types as the literal it evaluated to.
                    for arg in args {
                        self.infer(arg, scopes);
                    }
                    return Type::S32;
                }
                let Some(function) = self.module.function(callee) else {
                    self.errors.push(SemaError::UndefinedSymbol {
                        loc: expr.loc,
                        name: callee.clone(),
                    });
                    for arg in args {
                        self.infer(arg, scopes);
                    }
                    return Type::S32;
                };
                if function.params.len() != args.len() {
                    self.errors.push(SemaError::ArityMismatch {
                        loc: expr.loc,
                        name: callee.clone(),
                        expected: function.params.len(),
                        found: args.len(),
                    });
                }
                for (arg, param) in args.iter().zip(function.params.iter()) {
                    let ty = self.infer(arg, scopes);
                    self.expect_eq(arg.loc, &param.ty, &ty);
                }
                for arg in args.iter().skip(function.params.len()) {
                    self.infer(arg, scopes);
                }
                function.return_type.clone()
            }
        }
    }
}

fn is_lvalue(expr: &Expression) -> bool {
    matches!(
        expr.kind,
        ExprKind::Identifier { .. } | ExprKind::Field { .. } | ExprKind::Index { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn accepts_well_typed_fib() {
        let src = "func fib(n: s32): s32 begin \
                    if n = 0 then return 0 \
                    if n = 1 then return 1 \
                    return fib(n-1) + fib(n-2) \
                    end \
                    func main(): s32 begin print fib(10) return 0 end";
        let module = parse(src).unwrap();
        check(&module).unwrap();
    }

    #[test]
    fn rejects_break_outside_loop() {
        let src = "func main(): s32 begin break return 0 end";
        let module = parse(src).unwrap();
        let errors = check(&module).unwrap_err();
        assert!(matches!(errors[0], SemaError::BreakOutsideLoop { .. }));
    }

    #[test]
    fn rejects_arity_mismatch() {
        let src = "func f(a: s32): s32 begin return a end \
                    func main(): s32 begin print f(1, 2) return 0 end";
        let module = parse(src).unwrap();
        let errors = check(&module).unwrap_err();
        assert!(matches!(errors[0], SemaError::ArityMismatch { .. }));
    }

    #[test]
    fn rejects_struct_valued_parameter() {
        let src = "struct P := a: s32, b: s32 \
                    func f(p: P): s32 begin return p.a end \
                    func main(): s32 begin var q: P q.a := 1 print f(q) return 0 end";
        let module = parse(src).unwrap();
        let errors = check(&module).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, SemaError::NonScalarParam { .. })));
    }

    #[test]
    fn rejects_whole_struct_assignment() {
        let src = "struct P := a: s32, b: s32 \
                    func main(): s32 begin var q: P var r: P q := r return 0 end";
        let module = parse(src).unwrap();
        let errors = check(&module).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, SemaError::NonScalarAssign { .. })));
    }

    #[test]
    fn resolves_struct_field_types() {
        let src = "struct P := a: s32, b: s32 \
                    func main(): s32 begin var p: P p.a := 10 p.b := 32 print p.a + p.b return 0 end";
        let module = parse(src).unwrap();
        check(&module).unwrap();
    }
}
