//! `mini-wasm`: a minimal command-line driver for the `miniwasm` interpreter.
//!
//! ```text
//! mini-wasm <WASM_FILE> <EXPORT_NAME> [ARGS...]
//! ```
//!
//! Loads a `.wasm` module, instantiates it (host imports are resolved against
//! a table of no-op stubs; the interpreter itself never calls out to a real
//! host, it only routes through whatever resolver the embedder supplies),
//! invokes the named export with the given arguments, and prints the result.

use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{bail, Context, Result};
use clap::Parser;
use miniwasm::{ImportsBuilder, ModuleInstance, NopExternals, RuntimeValue};

/// Run an exported function from a WebAssembly module.
#[derive(Parser, Debug)]
#[command(name = "mini-wasm", version, about)]
struct Cli {
    /// Path to a `.wasm` module.
    wasm_file: PathBuf,

    /// Name of the exported function to invoke.
    export_name: String,

    /// Arguments to pass to the export, in order.
    ///
    /// Each is parsed as `i32` unless it is prefixed `L` (interpreted as
    /// `i64`) or parses as a floating point literal (interpreted as `f32`).
    args: Vec<String>,
}

fn parse_arg(raw: &str) -> Result<RuntimeValue> {
    if let Some(digits) = raw.strip_prefix('L') {
        let value: i64 = digits
            .parse()
            .with_context(|| format!("'{}' is not a valid i64 argument", raw))?;
        return Ok(RuntimeValue::I64(value));
    }
    if let Ok(value) = raw.parse::<i32>() {
        return Ok(RuntimeValue::I32(value));
    }
    if let Ok(value) = raw.parse::<f32>() {
        return Ok(RuntimeValue::F32(value.into()));
    }
    bail!("'{}' is not a valid i32, i64 (prefix 'L') or f32 argument", raw)
}

/// Exit code used when the invocation traps.
const EXIT_TRAP: u8 = 2;

fn run(cli: &Cli) -> Result<Option<RuntimeValue>> {
    let bytes = fs::read(&cli.wasm_file)
        .with_context(|| format!("failed to read {}", cli.wasm_file.display()))?;
    log::debug!(
        "loaded {} bytes from {}",
        bytes.len(),
        cli.wasm_file.display()
    );

    let module = miniwasm::Module::from_buffer(&bytes)
        .with_context(|| format!("failed to parse {}", cli.wasm_file.display()))?;

    let instance = ModuleInstance::new(&module, &ImportsBuilder::default())
        .context("failed to instantiate module")?
        .run_start(&mut NopExternals)
        .context("failed to run start function")?;

    let args = cli
        .args
        .iter()
        .map(|raw| parse_arg(raw))
        .collect::<Result<Vec<_>>>()?;

    match instance.invoke_export(&cli.export_name, &args, &mut NopExternals) {
        Ok(result) => Ok(result),
        Err(miniwasm::Error::Trap(trap)) => {
            eprintln!("trap: {}", trap);
            std::process::exit(EXIT_TRAP as i32);
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to invoke export '{}'", cli.export_name))
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(Some(value)) => {
            println!("{:?}", value);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:?}", err);
            ExitCode::FAILURE
        }
    }
}
