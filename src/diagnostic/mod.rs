pub mod ansi;
pub mod json;

use crate::ast::Span;
use crate::codegen::CompileError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::vm::{LoadError, VmError};

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// A reportable failure from any pipeline stage.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub label: Option<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    /// Text the label's span points into.
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic { code: None, message: message.into(), label: None, notes: Vec::new(), suggestion: None, source: None }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.label = Some(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for the stage errors ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span::new(e.position, e.position + e.snippet.len().max(1));
        let mut d = Diagnostic::error(format!("unexpected '{}'", e.snippet))
            .with_code(e.code())
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let mut d = Diagnostic::error(e.to_string()).with_code(e.code());
        if let Some(function) = e.function() {
            d = d.with_note(format!("in function '{function}'"));
        }
        match e {
            CompileError::UndefinedVariable { name, .. } => {
                d.with_suggestion(format!("declare it first: var {name} = ..."))
            }
            CompileError::TooManyParameters { .. } | CompileError::ArityMismatch { .. } => {
                d.with_suggestion("functions take at most one argument, passed in the accumulator")
            }
            _ => d,
        }
    }
}

impl From<&LoadError> for Diagnostic {
    fn from(e: &LoadError) -> Self {
        let d = Diagnostic::error(e.to_string()).with_code(e.code());
        match e.line() {
            Some(line) => d.with_note(format!("at bytecode line {line}")),
            None => d,
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        Diagnostic::error(e.to_string()).with_code(e.code())
    }
}
