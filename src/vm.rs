//! The stack virtual machine that executes a [`Bytecode`] image (`spec.md` §6).
//!
//! Memory is one flat, word-addressed array shared by globals and every
//! call frame: globals live at the low addresses, the stack grows upward
//! from there. `sp`/`bp` are absolute byte addresses into it.

use crate::bytecode::{Bytecode, Opcode};
use crate::error::TrapKind;
use crate::types::WORD;
use std::convert::TryFrom;
use std::io::Write;

/// Caps how much memory a single run may grow to, so a runaway program
/// traps instead of exhausting the host.
const MAX_WORDS: usize = 1 << 20;

pub struct Vm {
    memory: Vec<i64>,
    sp: usize,
    bp: i64,
    pc: usize,
    instructions_run: u64,
    instruction_budget: Option<u64>,
    trace: bool,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            memory: Vec::new(),
            sp: 0,
            bp: 0,
            pc: 0,
            instructions_run: 0,
            instruction_budget: None,
            trace: false,
        }
    }

    /// Bounds how many instructions a single [`Vm::run`] may execute before
    /// raising [`TrapKind::ComptimeTimeout`]. Used by the compile-time
    /// driver to guard against a non-terminating `@eval` call.
    pub fn with_instruction_budget(mut self, budget: u64) -> Self {
        self.instruction_budget = Some(budget);
        self
    }

    /// Enables the CLI's `--debug-bytecode` mode: logs the decoded
    /// instruction and the full stack (as words above `bp`'s frame base, 0
    /// if no frame is open yet) after every step, via `tracing`.
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    fn word_index(&self, addr: i64) -> Result<usize, TrapKind> {
        if addr < 0 || addr as usize % WORD != 0 {
            return Err(TrapKind::StackUnderflow);
        }
        Ok(addr as usize / WORD)
    }

    fn read(&mut self, addr: i64) -> Result<i64, TrapKind> {
        let idx = self.word_index(addr)?;
        if idx >= self.memory.len() {
            if idx >= MAX_WORDS {
                return Err(TrapKind::StackOverflow);
            }
            self.memory.resize(idx + 1, 0);
        }
        Ok(self.memory[idx])
    }

    fn write(&mut self, addr: i64, value: i64) -> Result<(), TrapKind> {
        let idx = self.word_index(addr)?;
        if idx >= MAX_WORDS {
            return Err(TrapKind::StackOverflow);
        }
        if idx >= self.memory.len() {
            self.memory.resize(idx + 1, 0);
        }
        self.memory[idx] = value;
        Ok(())
    }

    fn push(&mut self, value: i64) -> Result<(), TrapKind> {
        self.write(self.sp as i64, value)?;
        self.sp += WORD;
        if self.sp / WORD >= MAX_WORDS {
            return Err(TrapKind::StackOverflow);
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<i64, TrapKind> {
        if self.sp < WORD {
            return Err(TrapKind::StackUnderflow);
        }
        self.sp -= WORD;
        self.read(self.sp as i64)
    }

    /// Runs `image` to completion (an `EXIT` instruction), returning the
    /// value left on top of the stack, or the trap that stopped it.
    pub fn run(&mut self, image: &Bytecode) -> Result<i64, TrapKind> {
        self.run_to(image, &mut std::io::sink())
    }

    /// Like [`Vm::run`], but `PRINT` writes decimal lines to `out`.
    pub fn run_to(&mut self, image: &Bytecode, out: &mut impl Write) -> Result<i64, TrapKind> {
        loop {
            if self.pc >= image.len() {
                return Err(TrapKind::UnknownOpcode(0));
            }
            if let Some(budget) = self.instruction_budget {
                if self.instructions_run >= budget {
                    return Err(TrapKind::ComptimeTimeout);
                }
            }
            self.instructions_run += 1;

            let ins = image.decode_at(self.pc)?;
            let this_pc = self.pc;
            self.pc += ins.len;

            match ins.opcode {
                Opcode::Nop => {}
                Opcode::Add => self.binop(|a, b| Ok(a.wrapping_add(b)))?,
                Opcode::Sub => self.binop(|a, b| Ok(a.wrapping_sub(b)))?,
                Opcode::Mul => self.binop(|a, b| Ok(a.wrapping_mul(b)))?,
                Opcode::Div => self.binop(|a, b| if b == 0 { Err(TrapKind::StackUnderflow) } else { Ok(a / b) })?,
                Opcode::Shl => self.binop(|a, b| Ok(a.wrapping_shl(b as u32)))?,
                Opcode::Shr => self.binop(|a, b| Ok(a.wrapping_shr(b as u32)))?,
                Opcode::Eq => self.binop(|a, b| Ok((a == b) as i64))?,
                Opcode::Neq => self.binop(|a, b| Ok((a != b) as i64))?,
                Opcode::Lt => self.binop(|a, b| Ok((a < b) as i64))?,
                Opcode::Le => self.binop(|a, b| Ok((a <= b) as i64))?,
                Opcode::Gt => self.binop(|a, b| Ok((a > b) as i64))?,
                Opcode::Ge => self.binop(|a, b| Ok((a >= b) as i64))?,
                Opcode::Not => {
                    let a = self.pop()?;
                    self.push((a == 0) as i64)?;
                }
                Opcode::Jmp => {
                    let target = self.pop()?;
                    self.pc = target as usize;
                }
                Opcode::Biz => {
                    let a = self.pop()?;
                    if a == 0 {
                        self.pc = (this_pc as i64 + ins.operand) as usize;
                    }
                }
                Opcode::Bnz => {
                    let a = self.pop()?;
                    if a != 0 {
                        self.pc = (this_pc as i64 + ins.operand) as usize;
                    }
                }
                Opcode::Li => self.push(ins.operand)?,
                Opcode::Pushn => self.sp += ins.operand as usize * WORD,
                Opcode::Popn => {
                    let bytes = ins.operand as usize * WORD;
                    if self.sp < bytes {
                        return Err(TrapKind::StackUnderflow);
                    }
                    self.sp -= bytes;
                }
                Opcode::Ldbp => {
                    let v = self.read(self.bp + ins.operand)?;
                    self.push(v)?;
                }
                Opcode::Stbp => {
                    let v = self.pop()?;
                    self.write(self.bp + ins.operand, v)?;
                }
                Opcode::Lea => self.push(self.bp + ins.operand)?,
                Opcode::Lda => {
                    let v = self.read(ins.operand)?;
                    self.push(v)?;
                }
                Opcode::Sta => {
                    let v = self.pop()?;
                    self.write(ins.operand, v)?;
                }
                Opcode::Ldi => {
                    let addr = self.pop()?;
                    let v = self.read(addr)?;
                    self.push(v)?;
                }
                Opcode::Sti => {
                    let addr = self.pop()?;
                    let v = self.pop()?;
                    self.write(addr, v)?;
                }
                Opcode::Print => {
                    let v = self.pop()?;
                    let _ = writeln!(out, "{v}");
                }
                Opcode::Call => {
                    let target = self.pop()?;
                    self.push(this_pc as i64 + ins.len as i64)?;
                    self.push(self.bp)?;
                    self.pc = target as usize;
                }
                Opcode::Funcpro => self.bp = self.sp as i64,
                Opcode::Ret => {
                    self.sp = self.bp as usize;
                    let saved_bp = self.pop()?;
                    let saved_pc = self.pop()?;
                    self.bp = saved_bp;
                    self.pc = saved_pc as usize;
                }
                Opcode::Exit => {
                    if self.sp < WORD {
                        return Err(TrapKind::StackUnderflow);
                    }
                    let result = self.read((self.sp - WORD) as i64)?;
                    self.trace_step(this_pc, &ins);
                    return Ok(result);
                }
            }
            self.trace_step(this_pc, &ins);
        }
    }

    /// Logs the instruction just executed and the stack it left behind, for
    /// `--debug-bytecode`. A no-op unless [`Vm::with_trace`] enabled it.
    fn trace_step(&self, pc: usize, ins: &crate::bytecode::Instruction) {
        if !self.trace {
            return;
        }
        let stack_words = self.sp / WORD;
        let stack: Vec<i64> = self.memory[..stack_words.min(self.memory.len())].to_vec();
        tracing::trace!(pc, op = ins.opcode.name(), operand = ins.operand, sp = self.sp, bp = self.bp, ?stack, "step");
    }

    fn binop(&mut self, f: impl FnOnce(i64, i64) -> Result<i64, TrapKind>) -> Result<(), TrapKind> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(a, b)?)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;

    #[test]
    fn runs_simple_arithmetic_program() {
        let mut image = Bytecode::new();
        image.emit_imm64(Opcode::Li, 2);
        image.emit_imm64(Opcode::Li, 3);
        image.emit(Opcode::Add);
        image.emit(Opcode::Exit);
        let mut vm = Vm::new();
        assert_eq!(vm.run(&image).unwrap(), 5);
    }

    #[test]
    fn traced_run_produces_same_result_as_untraced() {
        let mut image = Bytecode::new();
        image.emit_imm64(Opcode::Li, 2);
        image.emit_imm64(Opcode::Li, 3);
        image.emit(Opcode::Add);
        image.emit(Opcode::Exit);
        let mut vm = Vm::new().with_trace(true);
        assert_eq!(vm.run(&image).unwrap(), 5);
    }

    #[test]
    fn trips_instruction_budget() {
        let mut image = Bytecode::new();
        let start = image.len();
        image.emit(Opcode::Nop);
        image.emit_imm64(Opcode::Li, start as i64);
        image.emit(Opcode::Jmp);
        let mut vm = Vm::new().with_instruction_budget(10);
        assert!(matches!(vm.run(&image), Err(TrapKind::ComptimeTimeout)));
    }
}
