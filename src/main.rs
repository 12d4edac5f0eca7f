use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use varia::ast::Program;
use varia::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use varia::{CompileOptions, Halt, VmConfig};

#[derive(Parser)]
#[command(name = "varia", version, about = "Compile and run varia programs on the BlueCode VM")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Skip the peephole optimizer
    #[arg(long, global = true)]
    no_opt: bool,

    /// Maximum nested calls before the VM gives up
    #[arg(long, global = true, default_value_t = 1024)]
    max_call_depth: usize,

    /// Report errors as JSON lines on stderr
    #[arg(long, global = true)]
    json: bool,

    /// Disable coloured error output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and execute a program (.vr source or .json AST)
    Run { file: PathBuf },
    /// Compile a program to BlueCode
    Build {
        file: PathBuf,
        /// Write BlueCode here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Execute a BlueCode file
    Exec { file: PathBuf },
    /// Print the parsed AST as JSON
    Ast { file: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("VARIA_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    match dispatch(&cli) {
        Ok(Some(code)) => {
            let _ = io::stdout().flush();
            std::process::exit(code)
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(d) => {
            report(&cli, &d);
            ExitCode::FAILURE
        }
    }
}

fn report(cli: &Cli, d: &Diagnostic) {
    if cli.json {
        eprintln!("{}", json::render(d));
    } else {
        let renderer = AnsiRenderer { use_color: !cli.no_color && io::stderr().is_terminal() };
        eprint!("{}", renderer.render(d));
    }
}

/// Returns `Some(status)` when the program asked to exit.
fn dispatch(cli: &Cli) -> Result<Option<i32>, Diagnostic> {
    let options = CompileOptions { optimize: !cli.no_opt };
    let config = VmConfig { max_call_depth: cli.max_call_depth };

    match &cli.command {
        Command::Run { file } => {
            let program = read_program(file)?;
            let mut stdout = io::stdout().lock();
            let halt = varia::run_program(&program, &options, &config, &mut stdout)
                .map_err(|e| Diagnostic::from(&e))?;
            finish(halt, &mut stdout)
        }
        Command::Build { file, output } => {
            let program = read_program(file)?;
            let text = varia::build_program(&program, &options).map_err(|e| Diagnostic::from(&e))?;
            match output {
                Some(path) => std::fs::write(path, text).map_err(|e| io_failure(path, e))?,
                None => print!("{text}"),
            }
            Ok(None)
        }
        Command::Exec { file } => {
            let text = read(file)?;
            let image = varia::load(&text).map_err(|e| Diagnostic::from(&e))?;
            let mut stdout = io::stdout().lock();
            let halt = varia::vm::run_with(&image, &config, &mut stdout).map_err(|e| Diagnostic::from(&e))?;
            finish(halt, &mut stdout)
        }
        Command::Ast { file } => {
            let program = read_program(file)?;
            let pretty = serde_json::to_string_pretty(&program)
                .map_err(|e| Diagnostic::error(format!("cannot serialize AST: {e}")))?;
            println!("{pretty}");
            Ok(None)
        }
    }
}

/// Print the final accumulator, or hand back the `exit` status.
fn finish(halt: Halt, out: &mut impl Write) -> Result<Option<i32>, Diagnostic> {
    match halt {
        Halt::Returned(varia::Value::Null) => Ok(None),
        Halt::Returned(value) => {
            writeln!(out, "{value}").map_err(|e| Diagnostic::error(format!("cannot write output: {e}")))?;
            Ok(None)
        }
        Halt::Exit(code) => Ok(Some(code)),
    }
}

fn read(path: &Path) -> Result<String, Diagnostic> {
    std::fs::read_to_string(path).map_err(|e| io_failure(path, e))
}

fn io_failure(path: &Path, e: io::Error) -> Diagnostic {
    Diagnostic::error(format!("{}: {e}", path.display()))
}

/// Load a program from source, or from a JSON AST when the file ends in `.json`.
fn read_program(path: &Path) -> Result<Program, Diagnostic> {
    let text = read(path)?;
    if path.extension().is_some_and(|ext| ext == "json") {
        return serde_json::from_str(&text)
            .map_err(|e| Diagnostic::error(format!("invalid AST JSON: {e}")).with_note(path.display().to_string()));
    }
    varia::parse_source(&text).map_err(|e| Diagnostic::from(&e).with_source(text.clone()))
}
