use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    /// End of input, used for EOF error spans.
    eof: Span,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

/// Parse a lexed token stream into a program.
pub fn parse(tokens: Vec<(Token, std::ops::Range<usize>)>) -> Result<Program> {
    let tokens = tokens.into_iter().map(|(t, r)| (t, Span::from(r))).collect();
    Parser::new(tokens).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        let end = tokens.last().map(|(_, s)| s.end).unwrap_or(0);
        Parser { tokens, pos: 0, eof: Span::new(end, end) }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens.get(self.pos).map(|(_, s)| *s).unwrap_or(self.eof)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.pos += 1;
                Ok(span)
            }
            Some(tok) => Err(self.error(
                "VAR-P001",
                format!("expected {}, got {}", expected.describe(), tok.describe()),
            )),
            None => Err(self.error("VAR-P002", format!("expected {}, got EOF", expected.describe()))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(name)
            }
            Some(tok) => Err(self.error("VAR-P003", format!("expected identifier, got {}", tok.describe()))),
            None => Err(self.error("VAR-P002", "expected identifier, got EOF".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    // ---- Declarations ----

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut functions = Vec::new();
        while self.peek().is_some() {
            functions.push(self.parse_function()?);
        }
        Ok(Program { functions })
    }

    fn parse_function(&mut self) -> Result<Function> {
        if !self.check(&Token::Func) {
            let found = self.peek().map(Token::describe).unwrap_or_default();
            return Err(self.error("VAR-P004", format!("expected 'func' declaration, got {found}")));
        }
        self.pos += 1;
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            params.push(self.expect_ident()?);
            while self.eat(&Token::Comma) {
                params.push(self.expect_ident()?);
            }
        }
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        Ok(Function { name, params, body })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => break,
                None => return Err(self.error("VAR-P002", "expected '}', got EOF".into())),
                Some(_) => body.push(self.parse_stmt()?),
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(body)
    }

    // ---- Statements ----

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let stmt = match self.peek() {
            Some(Token::Var) => {
                self.pos += 1;
                let name = self.expect_ident()?;
                self.expect(&Token::Assign)?;
                let value = self.parse_expr()?;
                Stmt::Var { name, value }
            }
            Some(Token::Return) => {
                self.pos += 1;
                if matches!(self.peek(), Some(Token::Semi | Token::RBrace) | None) {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.parse_expr()?))
                }
            }
            Some(Token::If) => return self.parse_if(),
            Some(Token::While) => {
                self.pos += 1;
                let condition = self.parse_expr()?;
                let body = self.parse_block()?;
                return Ok(Stmt::While { condition, body });
            }
            Some(Token::Break) => {
                self.pos += 1;
                Stmt::Break
            }
            _ => Stmt::Expr(self.parse_expr()?),
        };
        self.eat(&Token::Semi);
        Ok(stmt)
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(&Token::If)?;
        let condition = self.parse_expr()?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { condition, then_branch, else_branch })
    }

    // ---- Expressions ----

    fn parse_expr(&mut self) -> Result<Expr> {
        let left = self.parse_comparison()?;
        if self.eat(&Token::Assign) {
            let right = self.parse_expr()?;
            return Ok(Expr::binary(BinOp::Assign, left, right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => CmpOp::Eq,
                Some(Token::NotEq) => CmpOp::Ne,
                Some(Token::Less) => CmpOp::Lt,
                Some(Token::Greater) => CmpOp::Gt,
                Some(Token::LessEq) => CmpOp::Le,
                Some(Token::GreaterEq) => CmpOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::compare(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_factor()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Int(n)))
            }
            Some(Token::Float(n)) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Float(n)))
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Str(s)))
            }
            Some(Token::Ident(name)) => {
                if self.peek_at(1) == Some(&Token::LParen) {
                    self.parse_call(name)
                } else {
                    self.pos += 1;
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(tok) => Err(self.error("VAR-P005", format!("expected expression, got {}", tok.describe()))),
            None => Err(self.error("VAR-P002", "expected expression, got EOF".into())),
        }
    }

    fn parse_call(&mut self, function: String) -> Result<Expr> {
        self.advance();
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            args.push(self.parse_expr()?);
            while self.eat(&Token::Comma) {
                args.push(self.parse_expr()?);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(Expr::Call { function, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    fn parse_str(source: &str) -> Program {
        parse(lexer::lex(source).unwrap()).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        parse(lexer::lex(source).unwrap()).unwrap_err()
    }

    fn main_body(source: &str) -> Vec<Stmt> {
        parse_str(source).functions.remove(0).body
    }

    #[test]
    fn parse_empty_function() {
        let prog = parse_str("func main() {}");
        assert_eq!(prog.functions.len(), 1);
        assert_eq!(prog.functions[0].name, "main");
        assert!(prog.functions[0].body.is_empty());
    }

    #[test]
    fn parse_params() {
        let prog = parse_str("func add(a, b) { return a + b; }");
        assert_eq!(prog.functions[0].params, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn multiplication_binds_tighter() {
        let body = main_body("func main() { return 2 + 3 * 4 }");
        assert_eq!(
            body,
            vec![Stmt::Return(Some(Expr::binary(
                BinOp::Add,
                Expr::int(2),
                Expr::binary(BinOp::Mul, Expr::int(3), Expr::int(4)),
            )))]
        );
    }

    #[test]
    fn subtraction_is_left_associative() {
        let body = main_body("func main() { return 10 - 4 - 3 }");
        assert_eq!(
            body,
            vec![Stmt::Return(Some(Expr::binary(
                BinOp::Sub,
                Expr::binary(BinOp::Sub, Expr::int(10), Expr::int(4)),
                Expr::int(3),
            )))]
        );
    }

    #[test]
    fn comparison_below_arithmetic() {
        let body = main_body("func main() { return i + 1 < 5 }");
        assert_eq!(
            body,
            vec![Stmt::Return(Some(Expr::compare(
                CmpOp::Lt,
                Expr::binary(BinOp::Add, Expr::ident("i"), Expr::int(1)),
                Expr::int(5),
            )))]
        );
    }

    #[test]
    fn assignment_is_right_associative() {
        let body = main_body("func main() { a = b = 1; }");
        assert_eq!(
            body,
            vec![Stmt::Expr(Expr::binary(
                BinOp::Assign,
                Expr::ident("a"),
                Expr::binary(BinOp::Assign, Expr::ident("b"), Expr::int(1)),
            ))]
        );
    }

    #[test]
    fn parse_while_with_break() {
        let body = main_body("func main() { while 1 { break; } }");
        assert_eq!(body, vec![Stmt::While { condition: Expr::int(1), body: vec![Stmt::Break] }]);
    }

    #[test]
    fn else_if_chains_nest() {
        let body = main_body("func main() { if a { return 1 } else if b { return 2 } else { return 3 } }");
        let Stmt::If { else_branch: Some(else_branch), .. } = &body[0] else {
            panic!("expected if, got {:?}", body[0]);
        };
        assert!(matches!(else_branch[0], Stmt::If { else_branch: Some(_), .. }));
    }

    #[test]
    fn parse_call_with_args() {
        let body = main_body(r#"func main() { print("hi"); }"#);
        assert_eq!(
            body,
            vec![Stmt::Expr(Expr::Call {
                function: "print".into(),
                args: vec![Expr::Literal(Literal::Str("hi".into()))],
            })]
        );
    }

    #[test]
    fn bare_return() {
        assert_eq!(main_body("func main() { return }"), vec![Stmt::Return(None)]);
    }

    #[test]
    fn parenthesised_expression() {
        let body = main_body("func main() { return (1 + 2) * 3 }");
        assert_eq!(
            body,
            vec![Stmt::Return(Some(Expr::binary(
                BinOp::Mul,
                Expr::binary(BinOp::Add, Expr::int(1), Expr::int(2)),
                Expr::int(3),
            )))]
        );
    }

    #[test]
    fn missing_brace_is_error() {
        let err = parse_err("func main() { return 1");
        assert_eq!(err.code, "VAR-P002");
        assert!(err.message.contains("EOF"));
    }

    #[test]
    fn top_level_statement_is_error() {
        let err = parse_err("var x = 1");
        assert_eq!(err.code, "VAR-P004");
        assert_eq!(err.span, Span::new(0, 3));
    }

    #[test]
    fn bad_factor_reports_token() {
        let err = parse_err("func main() { return * }");
        assert!(err.message.contains("'*'"), "got: {}", err.message);
    }
}
