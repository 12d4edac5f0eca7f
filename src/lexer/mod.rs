use logos::Logos;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum Token {
    // Keywords
    #[token("func")]
    Func,
    #[token("var")]
    Var,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("break")]
    Break,

    // Comparison operators
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,

    // Arithmetic and assignment
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,

    // Literals
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""[^"\n]*""#, |lex| {
        let s = lex.slice();
        Some(s[1..s.len()-1].to_string())
    })]
    Str(String),

    #[regex(r"[a-zA-Z_][a-zA-Z_0-9]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Short human form used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Int(n) => format!("number {n}"),
            Token::Float(n) => format!("number {n:?}"),
            Token::Str(s) => format!("string \"{s}\""),
            Token::Ident(name) => format!("identifier '{name}'"),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::Func => "func",
            Token::Var => "var",
            Token::Return => "return",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::Break => "break",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::LessEq => "<=",
            Token::GreaterEq => ">=",
            Token::Less => "<",
            Token::Greater => ">",
            Token::Assign => "=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Semi => ";",
            Token::Comma => ",",
            Token::Int(_) | Token::Float(_) | Token::Str(_) | Token::Ident(_) => "literal",
        }
    }
}

/// Lex source code into a stream of tokens with byte ranges.
pub fn lex(source: &str) -> Result<Vec<(Token, std::ops::Range<usize>)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                let span = lexer.span();
                let snippet = source[span.clone()].to_string();
                return Err(LexError {
                    position: span.start,
                    suggestion: suggest_fix(&snippet),
                    snippet,
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad: &str) -> String {
    match bad.chars().next() {
        Some('"') => "String literals must close on the same line with '\"'".to_string(),
        Some('!') => "Did you mean '!='?".to_string(),
        Some(c) if c.is_ascii_digit() => format!("Number '{bad}' does not fit in a 64-bit integer"),
        _ => format!("Unexpected character(s): '{bad}'"),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}

impl LexError {
    pub fn code(&self) -> &'static str {
        "VAR-L001"
    }
}
