use serde::{Deserialize, Serialize};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span { start: r.start, end: r.end }
    }
}

// ---- Core AST types ----

/// A whole source file: a flat list of function declarations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Function>,
}

/// `func name(param) { body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `var name = expr`
    Var { name: String, value: Expr },

    /// `return expr` or bare `return`
    Return(Option<Expr>),

    /// `if cond { .. } else { .. }`
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },

    /// `while cond { .. }`
    While { condition: Expr, body: Vec<Stmt> },

    /// `break`
    Break,

    /// Expression evaluated for its effect (calls, assignments).
    Expr(Expr),
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),

    /// Variable reference
    Ident(String),

    /// Arithmetic or assignment: `a + b`, `x = expr`
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Comparison producing 1 or 0: `a < b`
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `name(arg, ...)`
    Call { function: String, args: Vec<Expr> },
}

impl Expr {
    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn compare(op: CmpOp, left: Expr, right: Expr) -> Self {
        Expr::Compare { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn int(n: i64) -> Self {
        Expr::Literal(Literal::Int(n))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_serializes_to_json() {
        let prog = Program {
            functions: vec![Function {
                name: "main".to_string(),
                params: vec![],
                body: vec![Stmt::Return(Some(Expr::binary(BinOp::Add, Expr::int(2), Expr::int(3))))],
            }],
        };
        let json = serde_json::to_string(&prog).unwrap();
        assert!(json.contains("\"main\""));
        assert!(json.contains("\"Add\""));
    }

    #[test]
    fn program_json_roundtrip() {
        let prog = Program {
            functions: vec![Function {
                name: "main".to_string(),
                params: vec![],
                body: vec![
                    Stmt::Var { name: "s".into(), value: Expr::Literal(Literal::Str("hi".into())) },
                    Stmt::While {
                        condition: Expr::compare(CmpOp::Lt, Expr::ident("s"), Expr::int(1)),
                        body: vec![Stmt::Break],
                    },
                ],
            }],
        };
        let json = serde_json::to_string(&prog).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, prog);
    }

    #[test]
    fn params_default_when_absent() {
        let json = r#"{"functions":[{"name":"main","body":[{"Return":null}]}]}"#;
        let prog: Program = serde_json::from_str(json).unwrap();
        assert!(prog.functions[0].params.is_empty());
        assert_eq!(prog.functions[0].body, vec![Stmt::Return(None)]);
    }
}
