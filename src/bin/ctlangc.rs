//! Entry point for the `ctlangc` CLI, wiring [`ctlang::config::Config`] to
//! the compiler pipeline and the VM. Mirrors
//! `wasmi-labs-wasmi/crates/cli/src/main.rs`'s thin `main` plus
//! `commands/run.rs`'s execute-and-report-errors shape.

use anyhow::{Context, Result, bail};
use clap::Parser;
use ctlang::config::{Config, Stage};
use ctlang::vm::Vm;
use std::fs;
use std::io;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter()))
        .with_target(false)
        .init();

    if let Err(err) = run(&config) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

fn run(config: &Config) -> Result<()> {
    let src = fs::read_to_string(config.source_file()).with_context(|| {
        format!("failed to read source file `{}`", config.source_file().display())
    })?;

    tracing::info!(file = %config.source_file().display(), "parsing source");
    let module = ctlang::parser::parse(&src).map_err(|e| anyhow::anyhow!("{e}"))?;
    if matches!(config.stage(), Stage::Parse) {
        return Ok(());
    }

    tracing::info!("resolving compile-time call sites");
    ctlang::comptime::resolve(&module).map_err(|e| anyhow::anyhow!("{e}"))?;

    tracing::info!("type checking");
    ctlang::sema::check(&module).map_err(|errors| {
        let rendered = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        anyhow::anyhow!("{rendered}")
    })?;

    tracing::info!("lowering to bytecode");
    let image = ctlang::lower::lower_module(&module).map_err(|e| anyhow::anyhow!("{e}"))?;

    if config.debug_bytecode() {
        print!("{}", image.disassemble());
    }
    if matches!(config.stage(), Stage::Bytecode) {
        return Ok(());
    }

    let mut vm = match config.fuel() {
        Some(budget) => Vm::new().with_instruction_budget(budget),
        None => Vm::new(),
    }
    .with_trace(config.debug_bytecode());
    tracing::info!("running bytecode image");
    let exit_code = vm
        .run_to(&image, &mut io::stdout())
        .map_err(|trap| anyhow::anyhow!("trap: {trap}"))?;
    if exit_code != 0 {
        bail!("program exited with code {exit_code}");
    }
    Ok(())
}
