//! BlueCode virtual machine.
//!
//! Execution is a flat fetch/decode loop over an explicit frame stack, so
//! guest recursion never recurses on the host. Call return addresses live in
//! stack memory next to `push`/`pop` temporaries, indexed by `rsp`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use tracing::{debug, trace};

use crate::ir::{Instruction, Opcode, Operand, Register};

pub mod loader;
pub mod registers;
pub mod value;

pub use loader::{FunctionCode, Image, LoadError, load};
use registers::Registers;
pub use value::Value;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("undefined function: {name}")]
    MissingFunction { name: String },
    #[error("label {label} not found in {function}")]
    UnresolvedLabel { function: String, label: String },
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("read of uninitialized heap cell [{address}]")]
    UndefinedVariable { address: i64 },
    #[error("pop from empty stack")]
    StackUnderflow,
    #[error("call depth limit of {limit} exceeded")]
    CallDepthExceeded { limit: usize },
    #[error("operand {operand} cannot be written")]
    NotWritable { operand: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VmError {
    pub fn code(&self) -> &'static str {
        match self {
            VmError::MissingFunction { .. } => "VAR-R001",
            VmError::UnresolvedLabel { .. } => "VAR-R002",
            VmError::TypeMismatch(_) => "VAR-R003",
            VmError::DivisionByZero => "VAR-R004",
            VmError::UndefinedVariable { .. } => "VAR-R005",
            VmError::StackUnderflow => "VAR-R006",
            VmError::CallDepthExceeded { .. } => "VAR-R007",
            VmError::NotWritable { .. } => "VAR-R008",
            VmError::Io(_) => "VAR-R009",
        }
    }
}

type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum number of live frames, `main` included.
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { max_call_depth: 1024 }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Halt {
    /// `ret` (or end of code) in `main`; carries the accumulator.
    Returned(Value),
    /// The `exit` builtin; the host should terminate with this status.
    Exit(i32),
}

/// Run `main` with the default configuration, printing to `out`.
pub fn run<W: Write>(image: &Image, out: W) -> VmResult<Halt> {
    run_with(image, &VmConfig::default(), out)
}

pub fn run_with<W: Write>(image: &Image, config: &VmConfig, out: W) -> VmResult<Halt> {
    Vm::new(image, config, out).run()
}

// ── Machine ──────────────────────────────────────────────────────────

struct Frame<'a> {
    func: &'a FunctionCode,
    ip: usize,
    /// Absolute heap address of this activation's `[0]`.
    heap_base: i64,
}

enum Step<'a> {
    Next,
    Jump(usize),
    Enter(&'a FunctionCode),
    Return,
    Halt(Halt),
}

pub struct Vm<'a, W: Write> {
    image: &'a Image,
    config: &'a VmConfig,
    regs: Registers,
    heap: HashMap<i64, Value>,
    stack: HashMap<i64, Value>,
    frames: Vec<Frame<'a>>,
    out: W,
}

impl<'a, W: Write> Vm<'a, W> {
    pub fn new(image: &'a Image, config: &'a VmConfig, out: W) -> Self {
        Vm {
            image,
            config,
            regs: Registers::new(),
            heap: HashMap::new(),
            stack: HashMap::new(),
            frames: Vec::with_capacity(16),
            out,
        }
    }

    pub fn run(mut self) -> VmResult<Halt> {
        let main = self
            .image
            .function("main")
            .ok_or_else(|| VmError::MissingFunction { name: "main".into() })?;
        self.frames.push(Frame { func: main, ip: 0, heap_base: 0 });

        loop {
            let Some(frame) = self.frames.last() else {
                return Ok(Halt::Returned(self.regs.take_acc()));
            };
            let (func, ip) = (frame.func, frame.ip);
            let step = match func.code.get(ip) {
                Some(inst) => {
                    trace!(function = %func.name, ip, rsp = self.regs.rsp, "{inst}");
                    self.step(inst)?
                }
                // Running off the end behaves like `ret`.
                None => Step::Return,
            };

            match step {
                Step::Next => self.frame_mut().ip += 1,
                Step::Jump(target) => self.frame_mut().ip = target,
                Step::Enter(callee) => self.enter(callee)?,
                Step::Return => {
                    if self.frames.len() == 1 {
                        return Ok(Halt::Returned(self.regs.take_acc()));
                    }
                    self.leave()?;
                }
                Step::Halt(halt) => return Ok(halt),
            }
        }
    }

    fn frame(&self) -> &Frame<'a> {
        // `run` only steps while a frame is live.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame<'a> {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    fn step(&mut self, inst: &Instruction) -> VmResult<Step<'a>> {
        match inst.op {
            Opcode::Mov => {
                let value = self.read(&inst.src)?;
                self.write(&inst.dst, value)?;
            }
            Opcode::Push => {
                let value = self.read(&inst.src)?;
                self.push(value)?;
            }
            Opcode::Pop => {
                let value = self.pop()?;
                self.write(&inst.dst, value)?;
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                let lhs = self.read(&inst.src)?;
                let rhs = self.read(&inst.dst)?;
                let result = match inst.op {
                    Opcode::Add => lhs.add(&rhs)?,
                    Opcode::Sub => lhs.sub(&rhs)?,
                    Opcode::Mul => lhs.mul(&rhs)?,
                    _ => lhs.div(&rhs)?,
                };
                self.write(&inst.dst, result)?;
            }
            op if op.is_comparison() => {
                let lhs = self.read(&inst.src)?;
                let rhs = self.read(&inst.dst)?;
                let holds = match op {
                    Opcode::CmpEq => lhs.equals(&rhs),
                    Opcode::CmpNe => !lhs.equals(&rhs),
                    Opcode::CmpLt => lhs.order(&rhs)? == Ordering::Less,
                    Opcode::CmpGt => lhs.order(&rhs)? == Ordering::Greater,
                    Opcode::CmpLe => lhs.order(&rhs)? != Ordering::Greater,
                    _ => lhs.order(&rhs)? != Ordering::Less,
                };
                self.regs.set(Register::Ra, Value::from_bool(holds));
            }
            Opcode::Jmp => return self.jump(inst),
            Opcode::JmpIfNot => {
                if self.read(&inst.src)?.as_int()? == 0 {
                    return self.jump(inst);
                }
            }
            Opcode::Call => return self.call(inst.target().unwrap_or_default()),
            Opcode::Ret => return Ok(Step::Return),
            _ => {} // `pt` and stray markers
        }
        Ok(Step::Next)
    }

    fn jump(&self, inst: &Instruction) -> VmResult<Step<'a>> {
        let func = self.frame().func;
        let label = inst.target().unwrap_or_default();
        func.labels.get(label).map(|&at| Step::Jump(at)).ok_or_else(|| VmError::UnresolvedLabel {
            function: func.name.clone(),
            label: label.to_string(),
        })
    }

    fn call(&mut self, name: &str) -> VmResult<Step<'a>> {
        let return_to = self.frame().ip as i64 + 1;
        self.push(Value::Int(return_to))?;
        if let Some(halt) = self.builtin(name)? {
            return Ok(Step::Halt(halt));
        }
        if crate::codegen::builtin_arity(name).is_some() {
            // builtin calls return in place
            self.pop()?;
            return Ok(Step::Next);
        }
        self.image
            .function(name)
            .map(Step::Enter)
            .ok_or_else(|| VmError::MissingFunction { name: name.to_string() })
    }

    /// Runs `name` if it is a builtin. `Some` means the VM must stop.
    fn builtin(&mut self, name: &str) -> VmResult<Option<Halt>> {
        match name {
            "print" => {
                writeln!(self.out, "{}", self.regs.acc())?;
            }
            "exit" => {
                let code = self.regs.acc().as_int()?;
                let status = i32::try_from(code)
                    .map_err(|_| VmError::TypeMismatch(format!("exit status {code} is out of range")))?;
                self.out.flush()?;
                debug!(status, "exit builtin");
                return Ok(Some(Halt::Exit(status)));
            }
            "sleep" => {
                let secs = self.regs.acc().as_float()?;
                let pause = Duration::try_from_secs_f64(secs)
                    .map_err(|_| VmError::TypeMismatch(format!("cannot sleep for {secs} seconds")))?;
                self.out.flush()?;
                std::thread::sleep(pause);
            }
            _ => {}
        }
        Ok(None)
    }

    fn enter(&mut self, callee: &'a FunctionCode) -> VmResult<()> {
        let limit = self.config.max_call_depth;
        if self.frames.len() >= limit {
            return Err(VmError::CallDepthExceeded { limit });
        }
        let caller = self.frame();
        let heap_base = offset(caller.heap_base, caller.func.frame_size)?;
        let heap_end = offset(heap_base, callee.frame_size)?;
        // A fresh activation never sees a previous call's locals.
        if callee.frame_size as usize <= self.heap.len() {
            for addr in heap_base..heap_end {
                self.heap.remove(&addr);
            }
        } else {
            self.heap.retain(|addr, _| !(heap_base..heap_end).contains(addr));
        }
        self.frames.push(Frame { func: callee, ip: 0, heap_base });
        debug!(function = %callee.name, depth = self.frames.len(), rsp = self.regs.rsp, "call");
        Ok(())
    }

    fn leave(&mut self) -> VmResult<()> {
        let return_to = self.pop()?.as_int()?;
        let ip = usize::try_from(return_to)
            .map_err(|_| VmError::TypeMismatch(format!("{return_to} is not a return address")))?;
        if let Some(done) = self.frames.pop() {
            debug!(function = %done.func.name, depth = self.frames.len(), rsp = self.regs.rsp, "return");
        }
        self.frame_mut().ip = ip;
        Ok(())
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        let next = self
            .regs
            .rsp
            .checked_add(1)
            .ok_or_else(|| VmError::TypeMismatch("stack pointer overflow".into()))?;
        self.stack.insert(self.regs.rsp, value);
        self.regs.rsp = next;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        let top = self.regs.rsp.checked_sub(1).ok_or(VmError::StackUnderflow)?;
        let value = self.stack.remove(&top).ok_or(VmError::StackUnderflow)?;
        self.regs.rsp = top;
        Ok(value)
    }

    fn read(&self, operand: &Option<Operand>) -> VmResult<Value> {
        match operand {
            Some(Operand::Reg(reg)) => Ok(self.regs.get(*reg).clone()),
            Some(Operand::StackPointer) => Ok(Value::Int(self.regs.rsp)),
            Some(Operand::StackTop) => self.stack.get(&self.regs.rsp).cloned().ok_or(VmError::StackUnderflow),
            Some(Operand::Heap(addr)) => self
                .heap
                .get(&offset(self.frame().heap_base, *addr)?)
                .cloned()
                .ok_or(VmError::UndefinedVariable { address: *addr }),
            Some(Operand::Int(n)) => Ok(Value::Int(*n)),
            Some(Operand::Float(n)) => Ok(Value::Float(*n)),
            Some(Operand::Str(s)) => Ok(Value::Str(s.clone())),
            Some(Operand::Name(name)) => Err(VmError::TypeMismatch(format!("'{name}' is not a value"))),
            None => Err(VmError::TypeMismatch("missing operand".into())),
        }
    }

    fn write(&mut self, operand: &Option<Operand>, value: Value) -> VmResult<()> {
        match operand {
            Some(Operand::Reg(reg)) => self.regs.set(*reg, value),
            Some(Operand::StackPointer) => self.regs.rsp = value.as_int()?,
            Some(Operand::StackTop) => {
                self.stack.insert(self.regs.rsp, value);
            }
            Some(Operand::Heap(addr)) => {
                let at = offset(self.frame().heap_base, *addr)?;
                self.heap.insert(at, value);
            }
            Some(other) => return Err(VmError::NotWritable { operand: other.to_string() }),
            None => return Err(VmError::NotWritable { operand: "<none>".into() }),
        }
        Ok(())
    }
}

/// Absolute heap address of `addr` in a frame starting at `base`.
fn offset(base: i64, addr: i64) -> VmResult<i64> {
    base.checked_add(addr)
        .ok_or_else(|| VmError::TypeMismatch(format!("heap address {base} + {addr} is out of range")))
}
