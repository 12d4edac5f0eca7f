use super::Diagnostic;
use crate::ast::SourceMap;

/// Human-readable terminal output, optionally coloured.
pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn bold_red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        let head = match d.code {
            Some(code) => format!("error[{code}]"),
            None => "error".to_string(),
        };
        out.push_str(&format!("{}: {}\n", self.bold_red(&head), self.bold(&d.message)));

        if let (Some(label), Some(source)) = (&d.label, &d.source) {
            let map = SourceMap::new(source);
            let (line, col) = map.lookup(label.span.start);
            let line_text = map.line_text(source, line);

            out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col));

            let gutter = line.to_string().len();
            let pipe = self.cyan("|");
            let pad = " ".repeat(gutter);
            out.push_str(&format!("{pad} {pipe}\n"));
            let line_num = self.cyan(&format!("{line:>gutter$}"));
            out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

            // carets stop at the end of the line even for spans that run past it
            let room = line_text.len().saturating_sub(col - 1).max(1);
            let span_len = label.span.end.saturating_sub(label.span.start).clamp(1, room);
            let carets = self.bold_red(&"^".repeat(span_len));
            let indent = " ".repeat(col - 1);
            if label.message.is_empty() {
                out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
            } else {
                out.push_str(&format!("{pad} {pipe} {indent}{carets} {}\n", self.bold_red(&label.message)));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }
        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} help: {}\n", self.dim("="), suggestion));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    const SRC: &str = "func main() {\n    return y\n}";

    fn plain() -> AnsiRenderer {
        AnsiRenderer { use_color: false }
    }

    fn undefined_y() -> Diagnostic {
        let at = SRC.find('y').unwrap();
        Diagnostic::error("undefined variable: y")
            .with_code("VAR-C001")
            .with_span(Span::new(at, at + 1), "not declared")
            .with_source(SRC)
            .with_note("in function 'main'")
            .with_suggestion("declare it first")
    }

    #[test]
    fn header_carries_code() {
        let out = plain().render(&undefined_y());
        assert!(out.starts_with("error[VAR-C001]: undefined variable: y\n"), "got:\n{out}");
    }

    #[test]
    fn snippet_points_at_span() {
        let out = plain().render(&undefined_y());
        assert!(out.contains("--> 2:12"), "got:\n{out}");
        assert!(out.contains("2 |     return y"), "got:\n{out}");
        assert!(out.contains("  |            ^ not declared"), "got:\n{out}");
    }

    #[test]
    fn notes_and_help() {
        let out = plain().render(&undefined_y());
        assert!(out.contains("= note: in function 'main'"));
        assert!(out.contains("= help: declare it first"));
    }

    #[test]
    fn no_source_no_snippet() {
        let out = plain().render(&Diagnostic::error("division by zero"));
        assert_eq!(out, "error: division by zero\n");
    }

    #[test]
    fn carets_clamped_to_line() {
        let d = Diagnostic::error("bad").with_span(Span::new(0, 400), "").with_source("abc\ndef");
        let out = plain().render(&d);
        assert!(out.contains("^^^\n"), "got:\n{out}");
        assert!(!out.contains("^^^^"), "got:\n{out}");
    }

    #[test]
    fn colour_toggle() {
        assert!(AnsiRenderer { use_color: true }.render(&undefined_y()).contains("\x1b["));
        assert!(!plain().render(&undefined_y()).contains("\x1b["));
    }
}
