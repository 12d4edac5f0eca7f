//! varia: a small imperative language compiled to BlueCode text and run on
//! a register/stack virtual machine.
//!
//! ```text
//! source ─lex─▶ tokens ─parse─▶ ast ─codegen─▶ IR ─peephole─▶ IR ─asm─▶ BlueCode ─load─▶ Image ─vm─▶ Halt
//! ```

use std::io::Write;

use tracing::debug;

pub mod ast;
pub mod codegen;
pub mod diagnostic;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod vm;

pub use codegen::asm::assemble;
pub use codegen::{CompileError, CompileOptions, compile};
pub use vm::{Halt, Image, LoadError, Value, VmConfig, VmError, load};

use ast::Program;
use diagnostic::Diagnostic;
use lexer::LexError;
use parser::ParseError;

/// Any failure along the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Lex(e) => e.code(),
            Error::Parse(e) => e.code,
            Error::Compile(e) => e.code(),
            Error::Load(e) => e.code(),
            Error::Vm(e) => e.code(),
        }
    }
}

impl From<&Error> for Diagnostic {
    fn from(e: &Error) -> Self {
        match e {
            Error::Lex(e) => e.into(),
            Error::Parse(e) => e.into(),
            Error::Compile(e) => e.into(),
            Error::Load(e) => e.into(),
            Error::Vm(e) => e.into(),
        }
    }
}

pub fn parse_source(source: &str) -> Result<Program, Error> {
    let tokens = lexer::lex(source)?;
    debug!(tokens = tokens.len(), "lexed source");
    let program = parser::parse(tokens)?;
    debug!(functions = program.functions.len(), "parsed program");
    Ok(program)
}

/// Compile a program down to BlueCode text.
pub fn build_program(program: &Program, options: &CompileOptions) -> Result<String, CompileError> {
    Ok(assemble(&compile(program, options)?))
}

/// Compile, assemble, reload and execute `program`.
pub fn run_program<W: Write>(
    program: &Program,
    options: &CompileOptions,
    config: &VmConfig,
    out: W,
) -> Result<Halt, Error> {
    let text = build_program(program, options)?;
    let image = load(&text)?;
    Ok(vm::run_with(&image, config, out)?)
}

pub fn run_source<W: Write>(
    source: &str,
    options: &CompileOptions,
    config: &VmConfig,
    out: W,
) -> Result<Halt, Error> {
    let program = parse_source(source)?;
    run_program(&program, options, config, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn returned(source: &str) -> Value {
        match run_source(source, &CompileOptions::default(), &VmConfig::default(), Vec::new()).unwrap() {
            Halt::Returned(v) => v,
            other => panic!("expected return, got {other:?}"),
        }
    }

    #[test]
    fn pipeline_end_to_end() {
        assert_eq!(returned("func main() { return 2 + 3 }"), Value::Int(5));
    }

    #[test]
    fn errors_carry_stage_codes() {
        let opts = CompileOptions::default();
        let cfg = VmConfig::default();
        let code = |src: &str| run_source(src, &opts, &cfg, Vec::new()).unwrap_err().code();
        assert_eq!(code("func main() { $ }"), "VAR-L001");
        assert_eq!(code("func main() {"), "VAR-P002");
        assert_eq!(code("func main() { return q }"), "VAR-C001");
        assert_eq!(code("func main() { return 1 / 0 }"), "VAR-R004");
    }

    #[test]
    fn build_emits_bluecode() {
        let program = parse_source("func main() { var x = 5; return x }").unwrap();
        let text = build_program(&program, &CompileOptions::default()).unwrap();
        assert_eq!(text, "--main\nmov 5 ra\nmov ra [0]\nret\n");
        let plain = build_program(&program, &CompileOptions { optimize: false }).unwrap();
        assert_eq!(plain, "--main\nmov 5 ra\nmov ra [0]\nmov [0] ra\nret\n");
    }

    #[test]
    fn diagnostic_from_pipeline_error() {
        let err = parse_source("func main() { var = 1 }").unwrap_err();
        let d = Diagnostic::from(&err);
        assert_eq!(d.code, Some("VAR-P003"));
        assert!(d.label.is_some());
    }
}
