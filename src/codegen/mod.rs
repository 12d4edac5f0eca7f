//! AST → IR lowering.
//!
//! Every expression leaves its value in the accumulator `ra` and leaves the
//! stack pointer where it found it. Locals live in heap cells `[0]`, `[1]`, …
//! numbered per function in declaration order.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::*;
use crate::ir::{Instruction, Opcode, Operand, Register};

pub mod asm;
pub mod peephole;

/// Functions the VM dispatches natively, with their accepted argument counts.
pub const BUILTINS: &[(&str, std::ops::RangeInclusive<usize>)] = &[("print", 0..=1), ("exit", 1..=1), ("sleep", 1..=1)];

pub fn builtin_arity(name: &str) -> Option<&'static std::ops::RangeInclusive<usize>> {
    BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, arity)| arity)
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String, function: String },
    #[error("'break' outside of a loop")]
    BreakOutsideLoop { function: String },
    #[error("left side of '=' must be a variable")]
    InvalidAssignmentTarget { function: String },
    #[error("{name} expects {expected} argument(s), got {found}")]
    ArityMismatch { name: String, expected: String, found: usize },
    #[error("function {function} declares {count} parameters; at most one is supported")]
    TooManyParameters { function: String, count: usize },
    #[error("function {name} is defined more than once")]
    DuplicateFunction { name: String },
    #[error("string literal {literal:?} cannot hold a quote or line break")]
    InvalidStringLiteral { literal: String, function: String },
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UndefinedVariable { .. } => "VAR-C001",
            CompileError::BreakOutsideLoop { .. } => "VAR-C002",
            CompileError::InvalidAssignmentTarget { .. } => "VAR-C003",
            CompileError::ArityMismatch { .. } => "VAR-C004",
            CompileError::TooManyParameters { .. } => "VAR-C005",
            CompileError::DuplicateFunction { .. } => "VAR-C006",
            CompileError::InvalidStringLiteral { .. } => "VAR-C007",
        }
    }

    /// The function being compiled when the error was raised, if known.
    pub fn function(&self) -> Option<&str> {
        match self {
            CompileError::UndefinedVariable { function, .. }
            | CompileError::BreakOutsideLoop { function }
            | CompileError::InvalidAssignmentTarget { function }
            | CompileError::TooManyParameters { function, .. }
            | CompileError::InvalidStringLiteral { function, .. } => Some(function),
            CompileError::ArityMismatch { .. } | CompileError::DuplicateFunction { .. } => None,
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Run the peephole pass over the generated IR.
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { optimize: true }
    }
}

/// Lower a whole program, optionally followed by the peephole pass.
pub fn compile(program: &Program, options: &CompileOptions) -> Result<Vec<Instruction>> {
    let mut code = CodeGenerator::new(program)?.generate(program)?;
    if options.optimize {
        peephole::optimize(&mut code);
    }
    Ok(code)
}

// ── Per-function state ───────────────────────────────────────────────

/// Compilation state for the function currently being lowered.
/// Built fresh at every function boundary and threaded through the visitors.
#[derive(Debug)]
struct FunctionCtx<'p> {
    name: &'p str,
    variables: HashMap<String, i64>,
    next_address: i64,
    next_label: usize,
    /// End labels of the enclosing loops, innermost last.
    loops: Vec<String>,
}

impl<'p> FunctionCtx<'p> {
    fn new(name: &'p str) -> Self {
        FunctionCtx { name, variables: HashMap::new(), next_address: 0, next_label: 0, loops: Vec::new() }
    }

    /// Address for `name`, allocating the next free cell on first sight.
    fn declare(&mut self, name: &str) -> i64 {
        if let Some(&addr) = self.variables.get(name) {
            return addr;
        }
        let addr = self.next_address;
        self.next_address += 1;
        self.variables.insert(name.to_string(), addr);
        addr
    }

    fn resolve(&self, name: &str) -> Result<i64> {
        self.variables.get(name).copied().ok_or_else(|| CompileError::UndefinedVariable {
            name: name.to_string(),
            function: self.name.to_string(),
        })
    }

    fn fresh_label(&mut self, prefix: &str) -> String {
        let label = format!("{prefix}_{}", self.next_label);
        self.next_label += 1;
        label
    }
}

// ── Generator ────────────────────────────────────────────────────────

pub struct CodeGenerator {
    code: Vec<Instruction>,
    /// Declared parameter count of every user function.
    arities: HashMap<String, usize>,
}

impl CodeGenerator {
    /// Collect signatures; rejects duplicate functions and multi-parameter declarations.
    pub fn new(program: &Program) -> Result<Self> {
        let mut arities = HashMap::new();
        for func in &program.functions {
            if func.params.len() > 1 {
                return Err(CompileError::TooManyParameters {
                    function: func.name.clone(),
                    count: func.params.len(),
                });
            }
            if arities.insert(func.name.clone(), func.params.len()).is_some() {
                return Err(CompileError::DuplicateFunction { name: func.name.clone() });
            }
        }
        Ok(CodeGenerator { code: Vec::new(), arities })
    }

    pub fn generate(mut self, program: &Program) -> Result<Vec<Instruction>> {
        for func in &program.functions {
            let before = self.code.len();
            self.gen_function(func)?;
            debug!(function = %func.name, instructions = self.code.len() - before, "compiled function");
        }
        Ok(self.code)
    }

    fn emit(&mut self, inst: Instruction) {
        self.code.push(inst);
    }

    fn gen_function(&mut self, func: &Function) -> Result<()> {
        let mut ctx = FunctionCtx::new(&func.name);
        self.emit(Instruction::def(&func.name));
        // The caller leaves the argument in the accumulator.
        if let Some(param) = func.params.first() {
            let addr = ctx.declare(param);
            self.emit(Instruction::mov(Operand::ACC, Operand::Heap(addr)));
        }
        self.gen_block(&mut ctx, &func.body)
    }

    fn gen_block(&mut self, ctx: &mut FunctionCtx<'_>, stmts: &[Stmt]) -> Result<()> {
        stmts.iter().try_for_each(|stmt| self.gen_stmt(ctx, stmt))
    }

    fn gen_stmt(&mut self, ctx: &mut FunctionCtx<'_>, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Var { name, value } => {
                self.gen_expr(ctx, value)?;
                let addr = ctx.declare(name);
                self.emit(Instruction::mov(Operand::ACC, Operand::Heap(addr)));
            }

            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.gen_expr(ctx, value)?;
                }
                self.emit(Instruction::ret());
            }

            Stmt::If { condition, then_branch, else_branch } => {
                self.gen_expr(ctx, condition)?;
                let end = ctx.fresh_label("PT");
                self.emit(Instruction::jmp_if_not(Operand::ACC, &end));
                self.gen_block(ctx, then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let else_end = ctx.fresh_label("PT");
                        self.emit(Instruction::jmp(&else_end));
                        self.emit(Instruction::label(end));
                        self.gen_block(ctx, else_branch)?;
                        self.emit(Instruction::label(else_end));
                    }
                    None => self.emit(Instruction::label(end)),
                }
            }

            Stmt::While { condition, body } => {
                let start = ctx.fresh_label("LOOP_START");
                let end = ctx.fresh_label("LOOP_END");
                self.emit(Instruction::label(&start));
                self.gen_expr(ctx, condition)?;
                self.emit(Instruction::jmp_if_not(Operand::ACC, &end));
                ctx.loops.push(end.clone());
                let body_result = self.gen_block(ctx, body);
                ctx.loops.pop();
                body_result?;
                self.emit(Instruction::jmp(start));
                self.emit(Instruction::label(end));
            }

            Stmt::Break => {
                let target = ctx
                    .loops
                    .last()
                    .cloned()
                    .ok_or_else(|| CompileError::BreakOutsideLoop { function: ctx.name.to_string() })?;
                self.emit(Instruction::jmp(target));
            }

            Stmt::Expr(expr) => self.gen_expr(ctx, expr)?,
        }
        Ok(())
    }

    fn gen_expr(&mut self, ctx: &mut FunctionCtx<'_>, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal(lit) => {
                let operand = match lit {
                    Literal::Int(n) => Operand::Int(*n),
                    Literal::Float(n) => Operand::Float(*n),
                    // BlueCode strings are one line and unescaped.
                    Literal::Str(s) if s.contains(['"', '\n', '\r']) => {
                        return Err(CompileError::InvalidStringLiteral {
                            literal: s.clone(),
                            function: ctx.name.to_string(),
                        });
                    }
                    Literal::Str(s) => Operand::Str(s.clone()),
                };
                self.emit(Instruction::mov(operand, Operand::ACC));
            }

            Expr::Ident(name) => {
                let addr = ctx.resolve(name)?;
                self.emit(Instruction::mov(Operand::Heap(addr), Operand::ACC));
            }

            Expr::Binary { op, left, right } => {
                let opcode = match op {
                    BinOp::Assign => return self.gen_assign(ctx, left, right),
                    BinOp::Add => Opcode::Add,
                    BinOp::Sub => Opcode::Sub,
                    BinOp::Mul => Opcode::Mul,
                    BinOp::Div => Opcode::Div,
                };
                self.gen_operands(ctx, left, right)?;
                self.emit(Instruction::binary(opcode, Operand::Reg(Register::Rb), Operand::ACC));
            }

            Expr::Compare { op, left, right } => {
                let opcode = match op {
                    CmpOp::Eq => Opcode::CmpEq,
                    CmpOp::Ne => Opcode::CmpNe,
                    CmpOp::Lt => Opcode::CmpLt,
                    CmpOp::Gt => Opcode::CmpGt,
                    CmpOp::Le => Opcode::CmpLe,
                    CmpOp::Ge => Opcode::CmpGe,
                };
                self.gen_operands(ctx, left, right)?;
                self.emit(Instruction::binary(opcode, Operand::Reg(Register::Rb), Operand::ACC));
            }

            Expr::Call { function, args } => {
                self.check_arity(function, args.len())?;
                for arg in args {
                    self.gen_expr(ctx, arg)?;
                }
                self.emit(Instruction::call(function));
            }
        }
        Ok(())
    }

    fn gen_assign(&mut self, ctx: &mut FunctionCtx<'_>, target: &Expr, value: &Expr) -> Result<()> {
        let Expr::Ident(name) = target else {
            return Err(CompileError::InvalidAssignmentTarget { function: ctx.name.to_string() });
        };
        let addr = ctx.resolve(name)?;
        self.gen_expr(ctx, value)?;
        self.emit(Instruction::mov(Operand::ACC, Operand::Heap(addr)));
        Ok(())
    }

    /// Left operand in `rb`, right operand in `ra`; the stack is balanced afterwards.
    fn gen_operands(&mut self, ctx: &mut FunctionCtx<'_>, left: &Expr, right: &Expr) -> Result<()> {
        self.gen_expr(ctx, left)?;
        self.emit(Instruction::push(Operand::ACC));
        self.gen_expr(ctx, right)?;
        self.emit(Instruction::pop(Operand::Reg(Register::Rb)));
        Ok(())
    }

    fn check_arity(&self, name: &str, found: usize) -> Result<()> {
        if let Some(arity) = builtin_arity(name) {
            if !arity.contains(&found) {
                let expected = if arity.start() == arity.end() {
                    arity.start().to_string()
                } else {
                    format!("{} to {}", arity.start(), arity.end())
                };
                return Err(CompileError::ArityMismatch { name: name.to_string(), expected, found });
            }
        } else if let Some(&expected) = self.arities.get(name) {
            if expected != found {
                return Err(CompileError::ArityMismatch {
                    name: name.to_string(),
                    expected: expected.to_string(),
                    found,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};

    fn parse_program(source: &str) -> Program {
        parser::parse(lexer::lex(source).unwrap()).unwrap()
    }

    fn lines(source: &str) -> Vec<String> {
        let code = compile(&parse_program(source), &CompileOptions { optimize: false }).unwrap();
        code.iter().map(|i| i.to_string()).collect()
    }

    fn compile_err(source: &str) -> CompileError {
        compile(&parse_program(source), &CompileOptions::default()).unwrap_err()
    }

    #[test]
    fn addition_uses_push_pop_protocol() {
        assert_eq!(
            lines("func main() { return 2 + 3 }"),
            vec!["--main", "mov 2 ra", "push ra", "mov 3 ra", "pop rb", "add rb ra", "ret"]
        );
    }

    #[test]
    fn variables_get_sequential_addresses() {
        assert_eq!(
            lines("func main() { var a = 1; var b = 2; var a = 3; return b }"),
            vec!["--main", "mov 1 ra", "mov ra [0]", "mov 2 ra", "mov ra [1]", "mov 3 ra", "mov ra [0]", "mov [1] ra", "ret"]
        );
    }

    #[test]
    fn addresses_reset_per_function() {
        let out = lines("func f() { var y = 1; return y } func main() { var x = 2; return x }");
        assert_eq!(out.iter().filter(|l| *l == "mov ra [0]").count(), 2);
        assert!(!out.iter().any(|l| l.contains("[1]")));
    }

    #[test]
    fn assignment_stores_without_stack_traffic() {
        assert_eq!(
            lines("func main() { var x = 1; x = 5 }"),
            vec!["--main", "mov 1 ra", "mov ra [0]", "mov 5 ra", "mov ra [0]"]
        );
    }

    #[test]
    fn comparison_emits_cmp_opcode() {
        assert_eq!(
            lines("func main() { return 1 < 2 }"),
            vec!["--main", "mov 1 ra", "push ra", "mov 2 ra", "pop rb", "cmplt rb ra", "ret"]
        );
    }

    #[test]
    fn if_else_labels() {
        assert_eq!(
            lines("func main() { if 1 { return 2 } else { return 3 } }"),
            vec![
                "--main", "mov 1 ra", "jne ra PT_0", "mov 2 ra", "ret", "jmp PT_1", "pt PT_0", "mov 3 ra", "ret",
                "pt PT_1",
            ]
        );
    }

    #[test]
    fn while_loop_labels_are_a_consecutive_pair() {
        assert_eq!(
            lines("func main() { while 1 { break } }"),
            vec![
                "--main", "pt LOOP_START_0", "mov 1 ra", "jne ra LOOP_END_1", "jmp LOOP_END_1", "jmp LOOP_START_0",
                "pt LOOP_END_1",
            ]
        );
    }

    #[test]
    fn break_targets_innermost_loop_even_after_ifs() {
        let out = lines(
            "func main() { while 1 { while 2 { if 3 { break } } if 4 { break } } }",
        );
        // outer loop: LOOP_START_0 / LOOP_END_1, inner: LOOP_START_2 / LOOP_END_3
        let inner_break = out.iter().position(|l| l == "pt PT_4").unwrap() - 1;
        assert_eq!(out[inner_break], "jmp LOOP_END_3");
        let outer_break = out.iter().position(|l| l == "pt PT_5").unwrap() - 1;
        assert_eq!(out[outer_break], "jmp LOOP_END_1");
    }

    #[test]
    fn labels_restart_per_function() {
        let out = lines("func f() { if 1 { return 1 } } func main() { if 1 { return 2 } }");
        assert_eq!(out.iter().filter(|l| *l == "pt PT_0").count(), 2);
    }

    #[test]
    fn parameter_is_bound_from_accumulator() {
        assert_eq!(
            lines("func twice(n) { return n * 2 } func main() { return twice(4) }"),
            vec![
                "--twice", "mov ra [0]", "mov [0] ra", "push ra", "mov 2 ra", "pop rb", "mul rb ra", "ret", "--main",
                "mov 4 ra", "call twice", "ret",
            ]
        );
    }

    #[test]
    fn string_and_float_literals() {
        assert_eq!(
            lines(r#"func main() { print("hi there"); return 1.5 }"#),
            vec!["--main", "mov \"hi there\" ra", "call print", "mov 1.5 ra", "ret"]
        );
    }

    #[test]
    fn undefined_variable() {
        let err = compile_err("func main() { return nope }");
        assert!(matches!(err, CompileError::UndefinedVariable { ref name, .. } if name == "nope"));
        assert_eq!(err.function(), Some("main"));
    }

    #[test]
    fn assignment_to_undeclared_variable() {
        assert!(matches!(compile_err("func main() { y = 1 }"), CompileError::UndefinedVariable { .. }));
    }

    #[test]
    fn break_outside_loop() {
        assert!(matches!(compile_err("func main() { break }"), CompileError::BreakOutsideLoop { .. }));
    }

    #[test]
    fn assignment_target_must_be_identifier() {
        assert!(matches!(
            compile_err("func main() { 1 = 2 }"),
            CompileError::InvalidAssignmentTarget { .. }
        ));
    }

    #[test]
    fn multi_argument_call_is_rejected() {
        let err = compile_err("func f(a) { return a } func main() { return f(1, 2) }");
        assert!(matches!(err, CompileError::ArityMismatch { found: 2, .. }));
    }

    #[test]
    fn multi_parameter_function_is_rejected() {
        assert!(matches!(
            compile_err("func f(a, b) { return a } func main() { return 0 }"),
            CompileError::TooManyParameters { count: 2, .. }
        ));
    }

    #[test]
    fn builtin_arity_is_checked() {
        assert!(matches!(compile_err("func main() { exit() }"), CompileError::ArityMismatch { .. }));
        assert!(matches!(compile_err("func main() { sleep(1, 2) }"), CompileError::ArityMismatch { .. }));
    }

    #[test]
    fn unknown_callee_compiles() {
        assert_eq!(lines("func main() { return mystery() }"), vec!["--main", "call mystery", "ret"]);
    }

    #[test]
    fn string_literal_must_fit_one_bluecode_line() {
        for bad in ["say \"hi\"", "two\nlines", "cr\r"] {
            let program = Program {
                functions: vec![Function {
                    name: "main".into(),
                    params: vec![],
                    body: vec![Stmt::Return(Some(Expr::Literal(Literal::Str(bad.into()))))],
                }],
            };
            let err = compile(&program, &CompileOptions::default()).unwrap_err();
            assert!(matches!(err, CompileError::InvalidStringLiteral { .. }), "got {err:?}");
            assert_eq!(err.code(), "VAR-C007");
            assert_eq!(err.function(), Some("main"));
        }
    }

    #[test]
    fn duplicate_function() {
        assert!(matches!(
            compile_err("func main() {} func main() {}"),
            CompileError::DuplicateFunction { .. }
        ));
    }

    #[test]
    fn compilation_is_deterministic() {
        let prog = parse_program("func main() { var i = 0; while i < 3 { if i == 1 { break } i = i + 1 } return i }");
        let opts = CompileOptions::default();
        assert_eq!(compile(&prog, &opts).unwrap(), compile(&prog, &opts).unwrap());
    }
}
