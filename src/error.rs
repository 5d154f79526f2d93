//! Error types for every stage of the pipeline.
//!
//! Mirrors the teacher's approach (`wasmi`'s `v2/error.rs`): plain enums
//! with hand-written `Display` and `From` impls, no `thiserror`.

use core::fmt;
use std::error::Error as StdError;

/// A source position, used to point at the offending token or AST node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Loc {
    pub line: u32,
}

impl Loc {
    pub fn new(line: u32) -> Self {
        Self { line }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}", self.line)
    }
}

/// Errors produced while lexing or parsing source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    UnexpectedChar { loc: Loc, found: char },
    UnterminatedNumber { loc: Loc },
    UnexpectedToken { loc: Loc, found: String, expected: String },
    UnexpectedEof { expected: String },
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyntaxError::UnexpectedChar { loc, found } => {
                write!(f, "{loc}: unexpected character '{found}'")
            }
            SyntaxError::UnterminatedNumber { loc } => {
                write!(f, "{loc}: malformed numeric literal")
            }
            SyntaxError::UnexpectedToken { loc, found, expected } => {
                write!(f, "{loc}: expected {expected}, found `{found}`")
            }
            SyntaxError::UnexpectedEof { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
        }
    }
}

impl StdError for SyntaxError {}

/// Errors produced while resolving symbols and checking types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemaError {
    UndefinedSymbol { loc: Loc, name: String },
    UndefinedType { loc: Loc, name: String },
    DuplicateSymbol { loc: Loc, name: String },
    TypeMismatch { loc: Loc, expected: String, found: String },
    NotCallable { loc: Loc, name: String },
    ArityMismatch { loc: Loc, name: String, expected: usize, found: usize },
    NotAStruct { loc: Loc, name: String },
    NoSuchField { loc: Loc, ty: String, field: String },
    NotIndexable { loc: Loc, ty: String },
    BreakOutsideLoop { loc: Loc },
    ContinueOutsideLoop { loc: Loc },
    NotAssignable { loc: Loc },
    /// An `@eval(...)` call site whose arguments don't reduce to compile-time
    /// constants.
    NotConstant { loc: Loc },
    /// A function parameter typed as a struct or array. The calling
    /// convention only ever moves one word per parameter; passing anything
    /// wider would silently read past the argument instead of copying it.
    NonScalarParam { loc: Loc, name: String, ty: String },
    /// A function return type wider than one word, for the same reason.
    NonScalarReturn { loc: Loc, ty: String },
    /// An assignment whose value type is wider than one word. `q := other`
    /// for a struct/array `q` would silently copy only its first word.
    NonScalarAssign { loc: Loc, ty: String },
}

impl fmt::Display for SemaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SemaError::UndefinedSymbol { loc, name } => {
                write!(f, "{loc}: undefined symbol `{name}`")
            }
            SemaError::UndefinedType { loc, name } => {
                write!(f, "{loc}: undefined type `{name}`")
            }
            SemaError::DuplicateSymbol { loc, name } => {
                write!(f, "{loc}: `{name}` is already defined in this scope")
            }
            SemaError::TypeMismatch { loc, expected, found } => {
                write!(f, "{loc}: expected type `{expected}`, found `{found}`")
            }
            SemaError::NotCallable { loc, name } => {
                write!(f, "{loc}: `{name}` is not callable")
            }
            SemaError::ArityMismatch { loc, name, expected, found } => {
                write!(
                    f,
                    "{loc}: `{name}` expects {expected} argument(s), found {found}"
                )
            }
            SemaError::NotAStruct { loc, name } => {
                write!(f, "{loc}: `{name}` is not a struct type")
            }
            SemaError::NoSuchField { loc, ty, field } => {
                write!(f, "{loc}: struct `{ty}` has no field `{field}`")
            }
            SemaError::NotIndexable { loc, ty } => {
                write!(f, "{loc}: type `{ty}` cannot be indexed")
            }
            SemaError::BreakOutsideLoop { loc } => {
                write!(f, "{loc}: `break` outside of a loop")
            }
            SemaError::ContinueOutsideLoop { loc } => {
                write!(f, "{loc}: `continue` outside of a loop")
            }
            SemaError::NotAssignable { loc } => {
                write!(f, "{loc}: expression is not assignable")
            }
            SemaError::NotConstant { loc } => {
                write!(f, "{loc}: argument to a compile-time call must be a constant expression")
            }
            SemaError::NonScalarParam { loc, name, ty } => {
                write!(f, "{loc}: parameter `{name}` has type `{ty}`, but only `s32` parameters are supported")
            }
            SemaError::NonScalarReturn { loc, ty } => {
                write!(f, "{loc}: return type `{ty}` is wider than one word; only `s32` returns are supported")
            }
            SemaError::NonScalarAssign { loc, ty } => {
                write!(f, "{loc}: cannot assign a value of type `{ty}`; assignment is only supported for `s32`")
            }
        }
    }
}

impl StdError for SemaError {}

/// Errors the front end (lexer, parser, sema) can report about an invalid
/// input program, as opposed to a bug in the compiler's own core
/// (`spec.md` §7's "Internal compiler bug" kind is [`LowerError`]
/// instead, since an input the front end accepted should never reach
/// lowering in a shape lowering can't handle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendError {
    Syntax(SyntaxError),
    Sema(SemaError),
}

impl fmt::Display for FrontendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrontendError::Syntax(e) => fmt::Display::fmt(e, f),
            FrontendError::Sema(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl StdError for FrontendError {}

impl From<SyntaxError> for FrontendError {
    fn from(e: SyntaxError) -> Self {
        Self::Syntax(e)
    }
}

impl From<SemaError> for FrontendError {
    fn from(e: SemaError) -> Self {
        Self::Sema(e)
    }
}

/// Internal compiler bugs surfaced by the lowering stage: invariant
/// violations that indicate a defect in the compiler itself, not the
/// input program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerError {
    UnresolvedSymbol(String),
    UnpatchedCall(String),
    BreakOutsideLoop,
    ContinueOutsideLoop,
    CodeBufferOverflow,
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LowerError::UnresolvedSymbol(name) => {
                write!(f, "internal compiler error: unresolved symbol `{name}` survived sema")
            }
            LowerError::UnpatchedCall(name) => {
                write!(f, "internal compiler error: call to `{name}` was never patched")
            }
            LowerError::BreakOutsideLoop => {
                write!(f, "internal compiler error: break emitted outside loop context")
            }
            LowerError::ContinueOutsideLoop => {
                write!(f, "internal compiler error: continue emitted outside loop context")
            }
            LowerError::CodeBufferOverflow => {
                write!(f, "bytecode buffer exceeded its size limit")
            }
        }
    }
}

impl StdError for LowerError {}

/// Faults raised by the virtual machine while executing a bytecode image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    UnknownOpcode(u8),
    StackUnderflow,
    StackOverflow,
    ComptimeTimeout,
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrapKind::UnknownOpcode(op) => write!(f, "unknown opcode 0x{op:02x}"),
            TrapKind::StackUnderflow => write!(f, "stack underflow"),
            TrapKind::StackOverflow => write!(f, "stack overflow"),
            TrapKind::ComptimeTimeout => {
                write!(f, "compile-time evaluation exceeded its instruction quota")
            }
        }
    }
}

impl StdError for TrapKind {}

/// The union of every error the compiler driver can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The input program itself is invalid.
    Frontend(FrontendError),
    /// An invariant the front end was supposed to guarantee didn't hold by
    /// the time lowering ran — a bug in the compiler, not the input.
    Lower(LowerError),
    /// A trap raised while executing a compile-time call, annotated with
    /// the source location of the `@eval(...)` site that triggered it.
    ComptimeTrap { loc: Loc, trap: TrapKind },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompileError::Frontend(e) => fmt::Display::fmt(e, f),
            CompileError::Lower(e) => fmt::Display::fmt(e, f),
            CompileError::ComptimeTrap { loc, trap } => {
                write!(f, "{loc}: compile-time evaluation failed: {trap}")
            }
        }
    }
}

impl StdError for CompileError {}

impl From<FrontendError> for CompileError {
    fn from(e: FrontendError) -> Self {
        Self::Frontend(e)
    }
}

impl From<SyntaxError> for CompileError {
    fn from(e: SyntaxError) -> Self {
        Self::Frontend(FrontendError::Syntax(e))
    }
}

impl From<SemaError> for CompileError {
    fn from(e: SemaError) -> Self {
        Self::Frontend(FrontendError::Sema(e))
    }
}

impl From<LowerError> for CompileError {
    fn from(e: LowerError) -> Self {
        Self::Lower(e)
    }
}
