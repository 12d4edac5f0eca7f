//! BlueCode text → executable [`Image`].
//!
//! Each line is decoded once into a typed [`Instruction`]; `--name` lines
//! open a new function and `pt` lines are indexed into that function's label
//! table. Label *references* are left unresolved until a jump executes.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::ir::{DEF_PREFIX, Instruction, Opcode, Operand, Register};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("line {line}: unrecognized instruction '{text}'")]
    UnrecognizedInstruction { line: usize, text: String },
    #[error("line {line}: unrecognized operand '{operand}'")]
    UnrecognizedOperand { line: usize, operand: String },
    #[error("line {line}: instruction appears before any function marker")]
    OrphanInstruction { line: usize },
    #[error("function {name} is defined more than once")]
    DuplicateFunction { name: String },
    #[error("label {label} is defined more than once in {function}")]
    DuplicateLabel { function: String, label: String },
}

impl LoadError {
    pub fn code(&self) -> &'static str {
        match self {
            LoadError::UnrecognizedInstruction { .. } => "VAR-A001",
            LoadError::UnrecognizedOperand { .. } => "VAR-A002",
            LoadError::OrphanInstruction { .. } => "VAR-A003",
            LoadError::DuplicateFunction { .. } => "VAR-A004",
            LoadError::DuplicateLabel { .. } => "VAR-A005",
        }
    }

    /// 1-based line of the offending instruction, when there is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            LoadError::UnrecognizedInstruction { line, .. }
            | LoadError::UnrecognizedOperand { line, .. }
            | LoadError::OrphanInstruction { line } => Some(*line),
            LoadError::DuplicateFunction { .. } | LoadError::DuplicateLabel { .. } => None,
        }
    }
}

type Result<T> = std::result::Result<T, LoadError>;

/// One loaded function.
#[derive(Debug, Clone)]
pub struct FunctionCode {
    pub name: String,
    pub code: Vec<Instruction>,
    /// Label name → index of its `pt` instruction.
    pub labels: HashMap<String, usize>,
    /// Heap cells the function addresses: one past the largest `[N]`.
    pub frame_size: i64,
}

impl FunctionCode {
    fn new(name: String) -> Self {
        FunctionCode { name, code: Vec::new(), labels: HashMap::new(), frame_size: 0 }
    }
}

/// A loaded program: function name → code.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub functions: HashMap<String, FunctionCode>,
}

impl Image {
    pub fn function(&self, name: &str) -> Option<&FunctionCode> {
        self.functions.get(name)
    }

    /// Build an image straight from IR, skipping the text round trip.
    pub fn from_instructions(code: &[Instruction]) -> Result<Image> {
        let mut builder = Builder::default();
        for (i, inst) in code.iter().enumerate() {
            builder.add(i + 1, inst.clone())?;
        }
        Ok(builder.finish())
    }
}

/// Parse a BlueCode stream.
pub fn load(text: &str) -> Result<Image> {
    let mut builder = Builder::default();
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let body = strip_comment(raw).trim();
        if body.is_empty() {
            continue;
        }
        builder.add(line, decode_line(line, body)?)?;
    }
    Ok(builder.finish())
}

#[derive(Default)]
struct Builder {
    done: HashMap<String, FunctionCode>,
    current: Option<FunctionCode>,
}

impl Builder {
    fn add(&mut self, line: usize, inst: Instruction) -> Result<()> {
        if inst.op == Opcode::Def {
            let name = inst.target().unwrap_or_default().to_string();
            self.close();
            if self.done.contains_key(&name) {
                return Err(LoadError::DuplicateFunction { name });
            }
            self.current = Some(FunctionCode::new(name));
            return Ok(());
        }

        let func = self.current.as_mut().ok_or(LoadError::OrphanInstruction { line })?;
        if inst.op == Opcode::Label {
            let label = inst.target().unwrap_or_default().to_string();
            if func.labels.insert(label.clone(), func.code.len()).is_some() {
                return Err(LoadError::DuplicateLabel { function: func.name.clone(), label });
            }
        }
        for operand in [&inst.src, &inst.dst].into_iter().flatten() {
            if let Operand::Heap(addr) = operand {
                let end = addr
                    .checked_add(1)
                    .ok_or_else(|| LoadError::UnrecognizedOperand { line, operand: operand.to_string() })?;
                func.frame_size = func.frame_size.max(end);
            }
        }
        func.code.push(inst);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(func) = self.current.take() {
            debug!(
                function = %func.name,
                instructions = func.code.len(),
                labels = func.labels.len(),
                frame_size = func.frame_size,
                "loaded function"
            );
            self.done.insert(func.name.clone(), func);
        }
    }

    fn finish(mut self) -> Image {
        self.close();
        Image { functions: self.done }
    }
}

/// Drop a `;` comment that is not inside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_str = !in_str,
            ';' if !in_str => return &line[..i],
            _ => {}
        }
    }
    line
}

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""[^"]*"|\S+"#).expect("static regex"));
static IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// What an instruction slot may hold.
#[derive(Clone, Copy)]
enum Slot {
    /// Any readable operand.
    Value,
    /// A register, `rsp`, `[rsp]` or `[N]`.
    Writable,
    /// A function or label name.
    Name,
}

fn shape(op: Opcode) -> &'static [Slot] {
    use Slot::*;
    match op {
        Opcode::Mov => &[Value, Writable],
        Opcode::Push => &[Value],
        Opcode::Pop => &[Writable],
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => &[Value, Writable],
        op if op.is_comparison() => &[Value, Value],
        Opcode::Call | Opcode::Jmp | Opcode::Label | Opcode::Def => &[Name],
        Opcode::JmpIfNot => &[Value, Name],
        _ => &[],
    }
}

fn decode_line(line: usize, text: &str) -> Result<Instruction> {
    if let Some(name) = text.strip_prefix(DEF_PREFIX) {
        let name = name.trim();
        if !IDENT.is_match(name) {
            return Err(LoadError::UnrecognizedInstruction { line, text: text.to_string() });
        }
        return Ok(Instruction::def(name));
    }

    let tokens: Vec<&str> = TOKEN.find_iter(text).map(|m| m.as_str()).collect();
    let unrecognized = || LoadError::UnrecognizedInstruction { line, text: text.to_string() };
    let (mnemonic, args) = tokens.split_first().ok_or_else(unrecognized)?;
    let op = Opcode::from_mnemonic(&mnemonic.to_ascii_lowercase()).ok_or_else(unrecognized)?;

    let slots = shape(op);
    if args.len() != slots.len() {
        return Err(unrecognized());
    }
    let mut operands = args.iter().zip(slots).map(|(tok, slot)| {
        decode_operand(tok, *slot).ok_or_else(|| LoadError::UnrecognizedOperand { line, operand: tok.to_string() })
    });

    // Single-operand `pop` stores its operand as the destination.
    let inst = match (op, slots.len()) {
        (_, 0) => Instruction::new(op, None, None),
        (Opcode::Pop, 1) => Instruction::pop(operands.next().transpose()?.ok_or_else(unrecognized)?),
        (_, 1) => Instruction::new(op, operands.next().transpose()?, None),
        _ => {
            let src = operands.next().transpose()?;
            let dst = operands.next().transpose()?;
            Instruction::new(op, src, dst)
        }
    };
    Ok(inst)
}

fn decode_operand(tok: &str, slot: Slot) -> Option<Operand> {
    if let Slot::Name = slot {
        return IDENT.is_match(tok).then(|| Operand::name(tok));
    }
    let operand = parse_operand(tok)?;
    match slot {
        Slot::Writable if !operand.is_writable() => None,
        _ => Some(operand),
    }
}

fn parse_operand(tok: &str) -> Option<Operand> {
    let lower = tok.to_ascii_lowercase();
    if lower == "rsp" {
        return Some(Operand::StackPointer);
    }
    if lower == "[rsp]" {
        return Some(Operand::StackTop);
    }
    if let Some(reg) = Register::from_name(&lower) {
        return Some(Operand::Reg(reg));
    }
    if let Some(inner) = tok.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        return inner.parse::<i64>().ok().filter(|addr| *addr >= 0).map(Operand::Heap);
    }
    if tok.len() >= 2 && tok.starts_with('"') && tok.ends_with('"') {
        return Some(Operand::Str(tok[1..tok.len() - 1].to_string()));
    }
    let numeric_start = tok.chars().next().is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    if !numeric_start {
        return None;
    }
    if let Ok(n) = tok.parse::<i64>() {
        return Some(Operand::Int(n));
    }
    tok.parse::<f64>().ok().filter(|n| n.is_finite()).map(Operand::Float)
}
