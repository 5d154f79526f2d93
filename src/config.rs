//! CLI flags of the enclosing compiler (`spec.md` §6).
//!
//! Mirrors `wasmi-labs-wasmi/crates/cli/src/args.rs`: a single flat
//! `clap`-derived struct with accessor methods, rather than the
//! feature-gated subcommand tree used by `wasmi`'s own CLI app (this
//! compiler has exactly one thing to do, so one flat command suffices).

use clap::Parser;
use std::path::{Path, PathBuf};

/// How far the driver should carry a source file through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Stage {
    /// Parse only; report syntax errors and stop.
    Parse,
    /// Parse, resolve `@eval` sites, typecheck, and lower to bytecode.
    Bytecode,
    /// Lower to bytecode and run it on the VM (the default).
    Run,
}

/// A small statically typed language compiler with compile-time AST
/// evaluation of `@eval(...)` call sites.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// The source file to compile.
    #[clap(value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    source_file: PathBuf,

    /// How far to carry the file through the pipeline.
    #[clap(long = "stage", value_enum, default_value_t = Stage::Run)]
    stage: Stage,

    /// Emit the disassembled bytecode image to stdout before running it.
    #[clap(long = "debug-bytecode")]
    debug_bytecode: bool,

    /// Increase logging verbosity. May be given multiple times.
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// The instruction budget given to the VM when `--stage=run`.
    #[clap(long = "fuel", value_name = "N")]
    fuel: Option<u64>,
}

impl Config {
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn debug_bytecode(&self) -> bool {
        self.debug_bytecode
    }

    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    /// Translates the repeated `-v` count into a `tracing` filter directive.
    /// `--debug-bytecode` implies at least `trace`, since the VM's
    /// per-instruction stack dump is logged at that level.
    pub fn log_filter(&self) -> &'static str {
        if self.debug_bytecode {
            return "trace";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
