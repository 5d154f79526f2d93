//! Lowers a type-checked [`Module`] to a [`Bytecode`] image (`spec.md` §6).
//!
//! Expression lowering leaves exactly one word on top of the stack.
//! Statement lowering leaves the stack exactly as it found it (besides the
//! scope's own `PUSHN`/`POPN` pair), per `spec.md` §8's scope-symmetry
//! property. See [`crate::layout`] for the calling convention this module
//! emits against. `sema.rs` has already rejected any parameter, return
//! value, or assignment wider than one word, so identifier loads/stores and
//! call-site argument/return handling below never need to move more than one.

use crate::ast::*;
use crate::bytecode::{Bytecode, Opcode};
use crate::error::LowerError;
use crate::layout::{param_offset, return_slot_offset};
use crate::types::{word_align, Type, WORD};
use std::collections::{HashMap, HashSet};

fn word_count(ty: &Type) -> usize {
    word_align(ty.byte_size()) / WORD
}

/// Lowers an entire program: globals, `main` inlined at the entry point,
/// then every other function, with forward/recursive calls patched once
/// every function's address is known.
pub fn lower_module(module: &Module) -> Result<Bytecode, LowerError> {
    let mut image = Bytecode::new();
    let mut pending_calls = Vec::new();

    let mut globals = HashMap::new();
    let mut global_offset = 0i32;
    for g in &module.globals {
        globals.insert(g.name.clone(), global_offset);
        global_offset += word_align(g.ty.byte_size()) as i32;
    }
    let global_words = (global_offset as usize) / WORD;

    image.mark_line(0);
    image.emit_quarter(Opcode::Pushn, global_words as i16);

    let main = module
        .function("main")
        .ok_or_else(|| LowerError::UnresolvedSymbol("main".into()))?;
    lower_function(main, &mut image, &mut pending_calls, &globals, true)?;
    image.emit_imm64(Opcode::Li, 0);
    image.emit(Opcode::Exit);

    let mut function_pcs = HashMap::new();
    function_pcs.insert("main".to_string(), 0usize);
    for f in &module.functions {
        if f.name == "main" {
            continue;
        }
        let start = image.len();
        function_pcs.insert(f.name.clone(), start);
        lower_function(f, &mut image, &mut pending_calls, &globals, false)?;
    }

    for (at, callee) in pending_calls {
        let target = function_pcs
            .get(&callee)
            .copied()
            .ok_or(LowerError::UnpatchedCall(callee))?;
        image.patch_imm64(at, target as i64);
    }

    Ok(image)
}

/// Lowers just enough of `module` to execute a single call to `callee` with
/// `args` already reduced to literal words, for the compile-time driver
/// (`spec.md` §5). Only `callee` and the functions it transitively calls
/// are emitted.
pub fn lower_call_for_comptime(
    module: &Module,
    callee: &str,
    args: &[i64],
) -> Result<Bytecode, LowerError> {
    let mut image = Bytecode::new();
    let mut pending_calls = Vec::new();
    let globals = HashMap::new();

    image.emit_quarter(Opcode::Pushn, 1);
    for arg in args {
        image.emit_imm64(Opcode::Li, *arg);
    }
    let at = image.emit_imm64(Opcode::Li, 0);
    pending_calls.push((at, callee.to_string()));
    image.emit(Opcode::Call);
    image.emit_quarter(Opcode::Popn, args.len() as i16);
    image.emit(Opcode::Exit);

    let mut function_pcs = HashMap::new();
    for f in collect_reachable(module, callee) {
        let start = image.len();
        function_pcs.insert(f.name.clone(), start);
        lower_function(f, &mut image, &mut pending_calls, &globals, false)?;
    }

    for (at, callee) in pending_calls {
        let target = function_pcs
            .get(&callee)
            .copied()
            .ok_or(LowerError::UnpatchedCall(callee))?;
        image.patch_imm64(at, target as i64);
    }

    Ok(image)
}

fn collect_reachable<'m>(module: &'m Module, root: &str) -> Vec<&'m Function> {
    let mut seen = HashSet::new();
    let mut stack = vec![root.to_string()];
    let mut order = Vec::new();
    while let Some(name) = stack.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(f) = module.function(&name) {
            collect_calls_stmts(&f.body, &mut stack);
            order.push(f);
        }
    }
    order
}

fn collect_calls_stmts(stmts: &[Statement], out: &mut Vec<String>) {
    for s in stmts {
        collect_calls_stmt(s, out);
    }
}

fn collect_calls_stmt(s: &Statement, out: &mut Vec<String>) {
    match &s.kind {
        StmtKind::VarDecl { .. } | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::Assign { lhs, rhs } => {
            collect_calls_expr(lhs, out);
            collect_calls_expr(rhs, out);
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            collect_calls_expr(cond, out);
            collect_calls_stmt(then_branch, out);
            if let Some(e) = else_branch {
                collect_calls_stmt(e, out);
            }
        }
        StmtKind::While { cond, body } => {
            collect_calls_expr(cond, out);
            collect_calls_stmt(body, out);
        }
        StmtKind::Block(stmts) => collect_calls_stmts(stmts, out),
        StmtKind::Print(args) => {
            for a in args {
                collect_calls_expr(a, out);
            }
        }
        StmtKind::Return(e) => collect_calls_expr(e, out),
    }
}

fn collect_calls_expr(e: &Expression, out: &mut Vec<String>) {
    match &e.kind {
        ExprKind::IntLiteral(_) | ExprKind::Identifier { .. } => {}
        ExprKind::Unary { operand, .. } => collect_calls_expr(operand, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_calls_expr(lhs, out);
            collect_calls_expr(rhs, out);
        }
        ExprKind::Field { base, .. } => collect_calls_expr(base, out),
        ExprKind::Index { base, index } => {
            collect_calls_expr(base, out);
            collect_calls_expr(index, out);
        }
        ExprKind::Call { callee, args, .. } => {
            out.push(callee.clone());
            for a in args {
                collect_calls_expr(a, out);
            }
        }
    }
}

struct LoopCtx {
    entry_offset: i32,
    continue_pc: usize,
    break_patches: Vec<usize>,
}

struct FnLower<'m> {
    globals: &'m HashMap<String, i32>,
    param_offsets: HashMap<String, i16>,
    return_offset: i16,
    scopes: Vec<HashMap<String, i32>>,
    local_offset: i32,
    loop_stack: Vec<LoopCtx>,
    is_entry: bool,
}

enum Addr {
    Local(i16),
    Global(i32),
}

fn count_direct_locals(stmts: &[Statement]) -> usize {
    stmts.iter().map(count_direct_locals_stmt).sum()
}

fn count_direct_locals_stmt(s: &Statement) -> usize {
    match &s.kind {
        StmtKind::VarDecl { ty, .. } => word_count(ty),
        StmtKind::If {
            then_branch,
            else_branch,
            ..
        } => {
            count_direct_locals_stmt(then_branch)
                + else_branch.as_deref().map(count_direct_locals_stmt).unwrap_or(0)
        }
        StmtKind::While { body, .. } => count_direct_locals_stmt(body),
        _ => 0,
    }
}

pub fn lower_function(
    f: &Function,
    image: &mut Bytecode,
    pending_calls: &mut Vec<(usize, String)>,
    globals: &HashMap<String, i32>,
    is_entry: bool,
) -> Result<(), LowerError> {
    let mut param_offsets = HashMap::new();
    for (i, p) in f.params.iter().enumerate() {
        param_offsets.insert(p.name.clone(), param_offset(f.params.len(), i));
    }
    let mut lower = FnLower {
        globals,
        param_offsets,
        return_offset: return_slot_offset(f.params.len()),
        scopes: vec![HashMap::new()],
        local_offset: 0,
        loop_stack: Vec::new(),
        is_entry,
    };

    image.mark_line(f.loc.line);
    image.emit(Opcode::Funcpro);
    lower.lower_block(&f.body, image, pending_calls)?;

    if !matches!(f.body.last().map(|s| &s.kind), Some(StmtKind::Return(_))) {
        if is_entry {
            image.emit_imm64(Opcode::Li, 0);
            image.emit(Opcode::Exit);
        } else {
            image.emit_imm64(Opcode::Li, 0);
            image.emit_quarter(Opcode::Stbp, lower.return_offset);
            image.emit(Opcode::Ret);
        }
    }
    Ok(())
}

impl<'m> FnLower<'m> {
    fn resolve(&self, name: &str) -> Result<Addr, LowerError> {
        for scope in self.scopes.iter().rev() {
            if let Some(off) = scope.get(name) {
                return Ok(Addr::Local(*off as i16));
            }
        }
        if let Some(off) = self.param_offsets.get(name) {
            return Ok(Addr::Local(*off));
        }
        if let Some(off) = self.globals.get(name) {
            return Ok(Addr::Global(*off));
        }
        Err(LowerError::UnresolvedSymbol(name.to_string()))
    }

    fn lower_block(
        &mut self,
        stmts: &[Statement],
        image: &mut Bytecode,
        pending_calls: &mut Vec<(usize, String)>,
    ) -> Result<(), LowerError> {
        let k = count_direct_locals(stmts);
        if k > 0 {
            image.emit_quarter(Opcode::Pushn, k as i16);
        }
        let saved_offset = self.local_offset;
        self.scopes.push(HashMap::new());
        for stmt in stmts {
            self.lower_stmt(stmt, image, pending_calls)?;
        }
        self.scopes.pop();
        self.local_offset = saved_offset;
        if k > 0 {
            image.emit_quarter(Opcode::Popn, k as i16);
        }
        Ok(())
    }

    fn lower_stmt(
        &mut self,
        stmt: &Statement,
        image: &mut Bytecode,
        pending_calls: &mut Vec<(usize, String)>,
    ) -> Result<(), LowerError> {
        image.mark_line(stmt.loc.line);
        match &stmt.kind {
            StmtKind::VarDecl { name, ty } => {
                let offset = self.local_offset;
                self.scopes
                    .last_mut()
                    .expect("function body always has an open scope")
                    .insert(name.clone(), offset);
                self.local_offset += word_count(ty) as i32 * WORD as i32;
            }
            StmtKind::Assign { lhs, rhs } => {
                self.lower_expr(rhs, image, pending_calls)?;
                match &lhs.kind {
                    ExprKind::Identifier { name, .. } => match self.resolve(name)? {
                        Addr::Local(off) => {
                            image.emit_quarter(Opcode::Stbp, off);
                        }
                        Addr::Global(off) => {
                            image.emit_imm64(Opcode::Sta, off as i64);
                        }
                    },
                    ExprKind::Field { .. } | ExprKind::Index { .. } => {
                        self.lower_addr(lhs, image, pending_calls)?;
                        image.emit(Opcode::Sti);
                    }
                    _ => return Err(LowerError::UnresolvedSymbol("assignment target".into())),
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.lower_expr(cond, image, pending_calls)?;
                let biz_at = image.emit_quarter(Opcode::Biz, 0);
                self.lower_stmt(then_branch, image, pending_calls)?;
                if let Some(else_branch) = else_branch {
                    let li_at = image.emit_imm64(Opcode::Li, 0);
                    image.emit(Opcode::Jmp);
                    let else_pc = image.len();
                    image.patch_quarter(biz_at, (else_pc - biz_at) as i16);
                    self.lower_stmt(else_branch, image, pending_calls)?;
                    let end_pc = image.len();
                    image.patch_imm64(li_at, end_pc as i64);
                } else {
                    let end_pc = image.len();
                    image.patch_quarter(biz_at, (end_pc - biz_at) as i16);
                }
            }
            StmtKind::While { cond, body } => {
                let loop_start = image.len();
                self.lower_expr(cond, image, pending_calls)?;
                let biz_at = image.emit_quarter(Opcode::Biz, 0);
                self.loop_stack.push(LoopCtx {
                    entry_offset: self.local_offset,
                    continue_pc: loop_start,
                    break_patches: Vec::new(),
                });
                self.lower_stmt(body, image, pending_calls)?;
                image.emit_imm64(Opcode::Li, loop_start as i64);
                image.emit(Opcode::Jmp);
                let loop_end = image.len();
                image.patch_quarter(biz_at, (loop_end - biz_at) as i16);
                let ctx = self.loop_stack.pop().expect("just pushed");
                for at in ctx.break_patches {
                    image.patch_imm64(at, loop_end as i64);
                }
            }
            StmtKind::Block(stmts) => self.lower_block(stmts, image, pending_calls)?,
            StmtKind::Print(args) => {
                for arg in args {
                    self.lower_expr(arg, image, pending_calls)?;
                    image.emit(Opcode::Print);
                }
            }
            StmtKind::Return(expr) => {
                self.lower_expr(expr, image, pending_calls)?;
                if self.is_entry {
                    image.emit(Opcode::Exit);
                } else {
                    image.emit_quarter(Opcode::Stbp, self.return_offset);
                    image.emit(Opcode::Ret);
                }
            }
            StmtKind::Break => {
                let ctx = self
                    .loop_stack
                    .last()
                    .ok_or(LowerError::BreakOutsideLoop)?;
                let words = (self.local_offset - ctx.entry_offset) / WORD as i32;
                if words > 0 {
                    image.emit_quarter(Opcode::Popn, words as i16);
                }
                let at = image.emit_imm64(Opcode::Li, 0);
                image.emit(Opcode::Jmp);
                self.loop_stack
                    .last_mut()
                    .expect("checked above")
                    .break_patches
                    .push(at);
            }
            StmtKind::Continue => {
                let ctx = self
                    .loop_stack
                    .last()
                    .ok_or(LowerError::ContinueOutsideLoop)?;
                let words = (self.local_offset - ctx.entry_offset) / WORD as i32;
                if words > 0 {
                    image.emit_quarter(Opcode::Popn, words as i16);
                }
                image.emit_imm64(Opcode::Li, ctx.continue_pc as i64);
                image.emit(Opcode::Jmp);
            }
        }
        Ok(())
    }

    /// Pushes the absolute address an lvalue expression refers to, for use
    /// by `Field`/`Index` loads and stores.
    fn lower_addr(
        &mut self,
        expr: &Expression,
        image: &mut Bytecode,
        pending_calls: &mut Vec<(usize, String)>,
    ) -> Result<(), LowerError> {
        match &expr.kind {
            ExprKind::Identifier { name, .. } => match self.resolve(name)? {
                Addr::Local(off) => {
                    image.emit_quarter(Opcode::Lea, off);
                }
                Addr::Global(off) => {
                    image.emit_imm64(Opcode::Li, off as i64);
                }
            },
            ExprKind::Field { base, field } => {
                self.lower_addr(base, image, pending_calls)?;
                let ty = base.ty();
                let Type::Struct(def) = &ty else {
                    return Err(LowerError::UnresolvedSymbol(field.clone()));
                };
                let offset = def
                    .field(field)
                    .ok_or_else(|| LowerError::UnresolvedSymbol(field.clone()))?
                    .offset;
                image.emit_imm64(Opcode::Li, offset as i64);
                image.emit(Opcode::Add);
            }
            ExprKind::Index { base, index } => {
                self.lower_addr(base, image, pending_calls)?;
                self.lower_expr(index, image, pending_calls)?;
                let ty = base.ty();
                let Type::Array(elem, _) = &ty else {
                    return Err(LowerError::UnresolvedSymbol("index base".into()));
                };
                let elem_size = word_align(elem.byte_size());
                image.emit_imm64(Opcode::Li, elem_size as i64);
                image.emit(Opcode::Mul);
                image.emit(Opcode::Add);
            }
            _ => return Err(LowerError::UnresolvedSymbol("not an lvalue".into())),
        }
        Ok(())
    }

    fn lower_expr(
        &mut self,
        expr: &Expression,
        image: &mut Bytecode,
        pending_calls: &mut Vec<(usize, String)>,
    ) -> Result<(), LowerError> {
        match &expr.kind {
            ExprKind::IntLiteral(v) => {
                image.emit_imm64(Opcode::Li, *v);
            }
            ExprKind::Identifier { name, .. } => match self.resolve(name)? {
                Addr::Local(off) => {
                    image.emit_quarter(Opcode::Ldbp, off);
                }
                Addr::Global(off) => {
                    image.emit_imm64(Opcode::Lda, off as i64);
                }
            },
            ExprKind::Unary { op, operand } => {
                self.lower_expr(operand, image, pending_calls)?;
                match op {
                    UnOp::Neg => {
                        image.emit_imm64(Opcode::Li, -1);
                        image.emit(Opcode::Mul);
                    }
                    UnOp::Not => {
                        image.emit(Opcode::Not);
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.lower_expr(lhs, image, pending_calls)?;
                self.lower_expr(rhs, image, pending_calls)?;
                image.emit(match op {
                    BinOp::Add => Opcode::Add,
                    BinOp::Sub => Opcode::Sub,
                    BinOp::Mul => Opcode::Mul,
                    BinOp::Div => Opcode::Div,
                    BinOp::Shl => Opcode::Shl,
                    BinOp::Shr => Opcode::Shr,
                    BinOp::Eq => Opcode::Eq,
                    BinOp::Neq => Opcode::Neq,
                    BinOp::Lt => Opcode::Lt,
                    BinOp::Le => Opcode::Le,
                    BinOp::Gt => Opcode::Gt,
                    BinOp::Ge => Opcode::Ge,
                });
            }
            ExprKind::Field { .. } | ExprKind::Index { .. } => {
                self.lower_addr(expr, image, pending_calls)?;
                image.emit(Opcode::Ldi);
            }
            ExprKind::Call {
                callee,
                args,
                resolution,
                ..
            } => {
                if let CallResolution::Resolved(value) = &*resolution.borrow() {
                    image.emit_imm64(Opcode::Li, *value);
                    return Ok(());
                }
                image.emit_quarter(Opcode::Pushn, 1);
                for arg in args {
                    self.lower_expr(arg, image, pending_calls)?;
                }
                let at = image.emit_imm64(Opcode::Li, 0);
                pending_calls.push((at, callee.clone()));
                image.emit(Opcode::Call);
                image.emit_quarter(Opcode::Popn, args.len() as i16);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comptime;
    use crate::parser::parse;
    use crate::sema;

    fn compile(src: &str) -> Bytecode {
        let module = parse(src).unwrap();
        comptime::resolve(&module).unwrap();
        sema::check(&module).unwrap();
        lower_module(&module).unwrap()
    }

    #[test]
    fn lowers_arithmetic_main() {
        let image = compile("func main(): s32 begin print 1 + 2 * 3 return 0 end");
        assert!(!image.is_empty());
        let text = image.disassemble();
        assert!(text.contains("MUL"));
        assert!(text.contains("ADD"));
    }

    #[test]
    fn lowers_recursive_call_with_balanced_frame() {
        let image = compile(
            "func fib(n: s32): s32 begin \
             if n = 0 then return 0 \
             if n = 1 then return 1 \
             return fib(n-1) + fib(n-2) \
             end \
             func main(): s32 begin print fib(10) return 0 end",
        );
        let text = image.disassemble();
        assert!(text.contains("CALL"));
        assert!(text.contains("FUNCPRO"));
    }
}
