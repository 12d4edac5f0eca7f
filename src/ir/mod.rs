//! Instruction model shared by the code generator, the optimizer, the
//! assembler and the loader.
//!
//! An [`Instruction`] is `{opcode, src, dst}` with both operands optional.
//! Its `Display` impl is the BlueCode line for that instruction, so the
//! textual stream is exactly `instructions.map(to_string)`.

use std::fmt;

/// Function-start marker prefix in BlueCode (`--main`).
pub const DEF_PREFIX: &str = "--";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Mov,
    Push,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Def,
    Call,
    Ret,
    Jmp,
    JmpIfNot,
    Label,
    CmpEq,
    CmpNe,
    CmpLt,
    CmpGt,
    CmpLe,
    CmpGe,
}

impl Opcode {
    /// BlueCode mnemonic. `Def` has none; it renders as `--name`.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Mov => "mov",
            Opcode::Push => "push",
            Opcode::Pop => "pop",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Def => DEF_PREFIX,
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Jmp => "jmp",
            Opcode::JmpIfNot => "jne",
            Opcode::Label => "pt",
            Opcode::CmpEq => "cmpeq",
            Opcode::CmpNe => "cmpne",
            Opcode::CmpLt => "cmplt",
            Opcode::CmpGt => "cmpgt",
            Opcode::CmpLe => "cmple",
            Opcode::CmpGe => "cmpge",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Some(match s {
            "mov" => Opcode::Mov,
            "push" => Opcode::Push,
            "pop" => Opcode::Pop,
            "add" => Opcode::Add,
            "sub" => Opcode::Sub,
            "mul" => Opcode::Mul,
            "div" => Opcode::Div,
            "call" => Opcode::Call,
            "ret" => Opcode::Ret,
            "jmp" => Opcode::Jmp,
            "jne" => Opcode::JmpIfNot,
            "pt" => Opcode::Label,
            "cmpeq" => Opcode::CmpEq,
            "cmpne" => Opcode::CmpNe,
            "cmplt" => Opcode::CmpLt,
            "cmpgt" => Opcode::CmpGt,
            "cmple" => Opcode::CmpLe,
            "cmpge" => Opcode::CmpGe,
            _ => return None,
        })
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Opcode::CmpEq | Opcode::CmpNe | Opcode::CmpLt | Opcode::CmpGt | Opcode::CmpLe | Opcode::CmpGe
        )
    }
}

/// The eight general registers. `ra` is the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Ra,
    Rb,
    Rc,
    Rd,
    Re,
    Rf,
    Rg,
    Rh,
}

impl Register {
    pub const ALL: [Register; 8] = [
        Register::Ra,
        Register::Rb,
        Register::Rc,
        Register::Rd,
        Register::Re,
        Register::Rf,
        Register::Rg,
        Register::Rh,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Ra => "ra",
            Register::Rb => "rb",
            Register::Rc => "rc",
            Register::Rd => "rd",
            Register::Re => "re",
            Register::Rf => "rf",
            Register::Rg => "rg",
            Register::Rh => "rh",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Register::ALL.into_iter().find(|r| r.name() == s)
    }
}

/// A typed instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `ra`..`rh`
    Reg(Register),
    /// `rsp` as a value: the stack pointer itself.
    StackPointer,
    /// `[rsp]`: the stack cell at the current stack pointer.
    StackTop,
    /// `[N]`: a heap cell.
    Heap(i64),
    Int(i64),
    Float(f64),
    Str(String),
    /// Function or label name.
    Name(String),
}

impl Operand {
    pub const ACC: Operand = Operand::Reg(Register::Ra);

    pub fn name(s: impl Into<String>) -> Self {
        Operand::Name(s.into())
    }

    /// Can this operand be a write destination?
    pub fn is_writable(&self) -> bool {
        matches!(self, Operand::Reg(_) | Operand::StackPointer | Operand::StackTop | Operand::Heap(_))
    }

    pub fn as_register(&self) -> Option<Register> {
        match self {
            Operand::Reg(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => f.write_str(r.name()),
            Operand::StackPointer => f.write_str("rsp"),
            Operand::StackTop => f.write_str("[rsp]"),
            Operand::Heap(addr) => write!(f, "[{addr}]"),
            Operand::Int(n) => write!(f, "{n}"),
            // Debug keeps the fractional part ("2.0"), so the loader reads it back as a float.
            Operand::Float(n) => write!(f, "{n:?}"),
            Operand::Str(s) => write!(f, "\"{s}\""),
            Operand::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Opcode,
    pub src: Option<Operand>,
    pub dst: Option<Operand>,
}

impl Instruction {
    pub fn new(op: Opcode, src: Option<Operand>, dst: Option<Operand>) -> Self {
        Instruction { op, src, dst }
    }

    pub fn mov(src: Operand, dst: Operand) -> Self {
        Instruction::new(Opcode::Mov, Some(src), Some(dst))
    }

    pub fn push(src: Operand) -> Self {
        Instruction::new(Opcode::Push, Some(src), None)
    }

    pub fn pop(dst: Operand) -> Self {
        Instruction::new(Opcode::Pop, None, Some(dst))
    }

    pub fn binary(op: Opcode, src: Operand, dst: Operand) -> Self {
        Instruction::new(op, Some(src), Some(dst))
    }

    pub fn def(name: impl Into<String>) -> Self {
        Instruction::new(Opcode::Def, Some(Operand::name(name)), None)
    }

    pub fn call(name: impl Into<String>) -> Self {
        Instruction::new(Opcode::Call, Some(Operand::name(name)), None)
    }

    pub fn ret() -> Self {
        Instruction::new(Opcode::Ret, None, None)
    }

    pub fn jmp(label: impl Into<String>) -> Self {
        Instruction::new(Opcode::Jmp, Some(Operand::name(label)), None)
    }

    pub fn jmp_if_not(cond: Operand, label: impl Into<String>) -> Self {
        Instruction::new(Opcode::JmpIfNot, Some(cond), Some(Operand::name(label)))
    }

    pub fn label(name: impl Into<String>) -> Self {
        Instruction::new(Opcode::Label, Some(Operand::name(name)), None)
    }

    /// The name carried by `Def`, `Call`, `Jmp` and `Label`.
    pub fn target(&self) -> Option<&str> {
        let operand = match self.op {
            Opcode::Def | Opcode::Call | Opcode::Jmp | Opcode::Label => self.src.as_ref(),
            Opcode::JmpIfNot => self.dst.as_ref(),
            _ => None,
        };
        match operand {
            Some(Operand::Name(name)) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == Opcode::Def {
            return write!(f, "{DEF_PREFIX}{}", self.target().unwrap_or_default());
        }
        f.write_str(self.op.mnemonic())?;
        for operand in [&self.src, &self.dst].into_iter().flatten() {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}
