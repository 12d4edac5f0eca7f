use serde_json::{Value, json};

use super::Diagnostic;
use crate::ast::SourceMap;

/// One diagnostic as a single-line JSON object.
pub fn render(d: &Diagnostic) -> String {
    let mut obj = json!({
        "severity": "error",
        "message": d.message,
        "notes": d.notes,
    });

    if let Some(code) = d.code {
        obj["code"] = Value::from(code);
    }

    if let Some(label) = &d.label {
        let mut l = json!({
            "start": label.span.start,
            "end": label.span.end,
            "message": label.message,
        });
        if let Some(source) = &d.source {
            let (line, col) = SourceMap::new(source).lookup(label.span.start);
            l["line"] = Value::from(line);
            l["col"] = Value::from(col);
        }
        obj["label"] = l;
    }

    if let Some(s) = &d.suggestion {
        obj["suggestion"] = Value::from(s.as_str());
    }

    obj.to_string()
}
