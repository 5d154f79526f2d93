//! The core AST as consumed by the backend (`spec.md` §3, §6).
//!
//! Expressions and statements are tagged sum types per `spec.md` §9's design
//! note, each carrying a common `loc` header. Fields the sema pass and the
//! compile-time driver fill in after parsing (resolved types, resolved
//! symbols, comptime resolution) live behind `RefCell`s so that repeated
//! sema/driver passes can annotate a shared, immutably-walked tree instead
//! of threading `&mut` through the whole program on every fixed-point
//! iteration (`spec.md` §5: "the AST is mutated in-place by the driver").

use crate::error::Loc;
use crate::types::Type;
use std::cell::RefCell;
use std::rc::Rc;

/// What kind of thing an identifier turned out to name, resolved by sema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Local,
    Parameter,
    Global,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Shl,
    Shr,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// The result of resolving a compile-time call: either still pending, or
/// replaced by the literal it evaluated to. `spec.md` §3's `is_resolved` /
/// `resolved_node` pair, collapsed into one state.
#[derive(Debug, Clone)]
pub enum CallResolution {
    Unresolved,
    Resolved(i64),
}

#[derive(Debug)]
pub enum ExprKind {
    IntLiteral(i64),
    Identifier {
        name: String,
        symbol: RefCell<Option<SymbolKind>>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Field {
        base: Box<Expression>,
        field: String,
    },
    Index {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    Call {
        callee: String,
        args: Vec<Expression>,
        is_comptime: bool,
        resolution: RefCell<CallResolution>,
    },
}

#[derive(Debug)]
pub struct Expression {
    pub loc: Loc,
    pub ty: RefCell<Option<Type>>,
    pub kind: ExprKind,
}

impl Expression {
    pub fn new(loc: Loc, kind: ExprKind) -> Self {
        Self {
            loc,
            ty: RefCell::new(None),
            kind,
        }
    }

    pub fn ty(&self) -> Type {
        self.ty
            .borrow()
            .clone()
            .expect("expression type queried before sema resolved it")
    }
}

#[derive(Debug)]
pub enum StmtKind {
    VarDecl {
        name: String,
        ty: Type,
    },
    Assign {
        lhs: Expression,
        rhs: Expression,
    },
    If {
        cond: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        cond: Expression,
        body: Box<Statement>,
    },
    Block(Vec<Statement>),
    Print(Vec<Expression>),
    Return(Expression),
    Break,
    Continue,
}

#[derive(Debug)]
pub struct Statement {
    pub loc: Loc,
    pub kind: StmtKind,
}

impl Statement {
    pub fn new(loc: Loc, kind: StmtKind) -> Self {
        Self { loc, kind }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug)]
pub struct Function {
    pub loc: Loc,
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub body: Vec<Statement>,
}

#[derive(Debug)]
pub struct GlobalVar {
    pub loc: Loc,
    pub name: String,
    pub ty: Type,
}

#[derive(Debug)]
pub struct Module {
    pub structs: Vec<Rc<crate::types::StructDef>>,
    pub globals: Vec<GlobalVar>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVar> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn struct_def(&self, name: &str) -> Option<&Rc<crate::types::StructDef>> {
        self.structs.iter().find(|s| s.name == name)
    }
}
