//! The compile-time evaluation driver (`spec.md` §5).
//!
//! Runs a fixed-point loop: re-check the module, find `@eval(...)` call
//! sites that haven't been resolved yet, constant-fold their arguments,
//! synthesize and run a bytecode image for each, and substitute the result
//! back into the AST. Repeats until no site makes further progress.

use crate::ast::{BinOp, CallResolution, ExprKind, Expression, Module, StmtKind, UnOp};
use crate::error::{CompileError, SemaError};
use crate::lower::lower_call_for_comptime;
use crate::sema;
use crate::vm::Vm;

/// How many instructions a single `@eval` call may take before it's
/// considered non-terminating.
const COMPTIME_INSTRUCTION_BUDGET: u64 = 1_000_000;

/// Resolves every `@eval(...)` call site in `module` in place. Mutation
/// happens through each call's `RefCell` resolution cell, not through
/// `module` itself — see the interior-mutability note on [`crate::ast`].
pub fn resolve(module: &Module) -> Result<(), CompileError> {
    loop {
        sema::check(module).map_err(|mut errors| CompileError::from(errors.remove(0)))?;

        let sites = collect_sites(module);
        if sites.is_empty() {
            return Ok(());
        }

        let mut progressed = false;
        for site in &sites {
            let ExprKind::Call { callee, args, resolution, .. } = &site.kind else {
                unreachable!("collect_sites only yields Call expressions");
            };
            let Some(folded) = args
                .iter()
                .map(const_eval)
                .collect::<Option<Vec<i64>>>()
            else {
                continue;
            };

            let image = lower_call_for_comptime(module, callee, &folded)?;
            let mut vm = Vm::new().with_instruction_budget(COMPTIME_INSTRUCTION_BUDGET);
            let value = vm.run(&image).map_err(|trap| CompileError::ComptimeTrap {
                loc: site.loc,
                trap,
            })?;
            *resolution.borrow_mut() = CallResolution::Resolved(value);
            progressed = true;
        }

        if !progressed {
            let loc = sites[0].loc;
            return Err(CompileError::from(SemaError::NotConstant { loc }));
        }
    }
}

fn collect_sites(module: &Module) -> Vec<&Expression> {
    let mut out = Vec::new();
    for f in &module.functions {
        collect_sites_stmts(&f.body, &mut out);
    }
    out
}

fn collect_sites_stmts<'a>(stmts: &'a [crate::ast::Statement], out: &mut Vec<&'a Expression>) {
    for s in stmts {
        collect_sites_stmt(s, out);
    }
}

fn collect_sites_stmt<'a>(s: &'a crate::ast::Statement, out: &mut Vec<&'a Expression>) {
    match &s.kind {
        StmtKind::VarDecl { .. } | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::Assign { lhs, rhs } => {
            collect_sites_expr(lhs, out);
            collect_sites_expr(rhs, out);
        }
        StmtKind::If { cond, then_branch, else_branch } => {
            collect_sites_expr(cond, out);
            collect_sites_stmt(then_branch, out);
            if let Some(e) = else_branch {
                collect_sites_stmt(e, out);
            }
        }
        StmtKind::While { cond, body } => {
            collect_sites_expr(cond, out);
            collect_sites_stmt(body, out);
        }
        StmtKind::Block(stmts) => collect_sites_stmts(stmts, out),
        StmtKind::Print(args) => {
            for a in args {
                collect_sites_expr(a, out);
            }
        }
        StmtKind::Return(e) => collect_sites_expr(e, out),
    }
}

fn collect_sites_expr<'a>(e: &'a Expression, out: &mut Vec<&'a Expression>) {
    match &e.kind {
        ExprKind::IntLiteral(_) | ExprKind::Identifier { .. } => {}
        ExprKind::Unary { operand, .. } => collect_sites_expr(operand, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_sites_expr(lhs, out);
            collect_sites_expr(rhs, out);
        }
        ExprKind::Field { base, .. } => collect_sites_expr(base, out),
        ExprKind::Index { base, index } => {
            collect_sites_expr(base, out);
            collect_sites_expr(index, out);
        }
        ExprKind::Call { args, is_comptime, resolution, .. } => {
            for a in args {
                collect_sites_expr(a, out);
            }
            if *is_comptime && matches!(*resolution.borrow(), CallResolution::Unresolved) {
                out.push(e);
            }
        }
    }
}

/// Folds an expression to a literal if every subexpression it touches is
/// already known at compile time. Used both for `@eval` call arguments and,
/// transitively, for nested unresolved calls.
fn const_eval(e: &Expression) -> Option<i64> {
    match &e.kind {
        ExprKind::IntLiteral(v) => Some(*v),
        ExprKind::Unary { op, operand } => {
            let v = const_eval(operand)?;
            Some(match op {
                UnOp::Neg => -v,
                UnOp::Not => (v == 0) as i64,
            })
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let a = const_eval(lhs)?;
            let b = const_eval(rhs)?;
            Some(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a.checked_div(b)?,
                BinOp::Shl => a << b,
                BinOp::Shr => a >> b,
                BinOp::Eq => (a == b) as i64,
                BinOp::Neq => (a != b) as i64,
                BinOp::Lt => (a < b) as i64,
                BinOp::Le => (a <= b) as i64,
                BinOp::Gt => (a > b) as i64,
                BinOp::Ge => (a >= b) as i64,
            })
        }
        ExprKind::Call { resolution, .. } => match &*resolution.borrow() {
            CallResolution::Resolved(v) => Some(*v),
            CallResolution::Unresolved => None,
        },
        ExprKind::Identifier { .. } | ExprKind::Field { .. } | ExprKind::Index { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn resolves_simple_comptime_call() {
        let module = parse(
            "func answer(): s32 begin return 42 end \
             func main(): s32 begin print @eval(answer()) return 0 end",
        )
        .unwrap();
        resolve(&module).unwrap();
        let StmtKind::Print(args) = &module.functions[1].body[0].kind else {
            unreachable!()
        };
        let ExprKind::Call { resolution, .. } = &args[0].kind else {
            unreachable!()
        };
        assert!(matches!(&*resolution.borrow(), CallResolution::Resolved(42)));
    }

    #[test]
    fn resolves_recursive_comptime_call() {
        let module = parse(
            "func fib(n: s32): s32 begin \
             if n = 0 then return 0 \
             if n = 1 then return 1 \
             return fib(n-1) + fib(n-2) \
             end \
             func main(): s32 begin print @eval(fib(10)) return 0 end",
        )
        .unwrap();
        resolve(&module).unwrap();
        let StmtKind::Print(args) = &module.functions[1].body[0].kind else {
            unreachable!()
        };
        let ExprKind::Call { resolution, .. } = &args[0].kind else {
            unreachable!()
        };
        assert!(matches!(&*resolution.borrow(), CallResolution::Resolved(55)));
    }
}
