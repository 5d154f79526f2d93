//! A small statically typed imperative language with a bytecode compiler,
//! a stack virtual machine, and compile-time AST evaluation of designated
//! call sites via `@eval(...)`.

pub mod ast;
pub mod bytecode;
pub mod comptime;
pub mod config;
pub mod error;
pub mod layout;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod sema;
pub mod types;
pub mod vm;

use error::CompileError;

/// The compiled artifact: a bytecode image plus the source line each
/// instruction was generated from, for the disassembler and for trap
/// reporting.
pub struct CompiledModule {
    pub image: bytecode::Bytecode,
}

/// Runs the full front end (parse, sema, compile-time evaluation) and
/// lowers the result to a bytecode image, ready for [`vm::Vm::run`].
pub fn compile(src: &str) -> Result<CompiledModule, CompileError> {
    let module = parser::parse(src)?;
    comptime::resolve(&module)?;
    sema::check(&module).map_err(|mut errors| errors.remove(0))?;
    let image = lower::lower_module(&module)?;
    Ok(CompiledModule { image })
}
