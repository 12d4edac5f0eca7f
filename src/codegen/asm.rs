//! IR → BlueCode text.

use crate::ir::Instruction;

/// One BlueCode line per instruction.
pub fn lines(code: &[Instruction]) -> Vec<String> {
    code.iter().map(Instruction::to_string).collect()
}

/// The full textual stream, newline-terminated.
pub fn assemble(code: &[Instruction]) -> String {
    let mut out = String::new();
    for line in lines(code) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}
