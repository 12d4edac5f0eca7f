//! Local IR cleanup run after code generation.
//!
//! Two rewrites, applied until nothing matches:
//! - `mov A B; mov B A` drops the second move.
//! - `push X; pop r; add r D` becomes `add X D` when `r` is dead afterwards.

use tracing::debug;

use crate::ir::{Instruction, Opcode, Operand, Register};

/// Rewrite `code` in place. Returns the number of instructions removed.
pub fn optimize(code: &mut Vec<Instruction>) -> usize {
    let before = code.len();
    let mut i = 0;
    while i + 1 < code.len() {
        if is_double_move(&code[i], &code[i + 1]) {
            code.remove(i + 1);
            i = i.saturating_sub(1);
            continue;
        }
        if let Some(src) = fusable_push(code, i) {
            code[i + 2].src = Some(src);
            code.drain(i..i + 2);
            i = i.saturating_sub(1);
            continue;
        }
        i += 1;
    }
    let removed = before - code.len();
    debug!(before, after = code.len(), removed, "peephole pass");
    removed
}

fn is_double_move(first: &Instruction, second: &Instruction) -> bool {
    first.op == Opcode::Mov
        && second.op == Opcode::Mov
        && first.src.is_some()
        && first.src == second.dst
        && first.dst == second.src
}

/// If `code[i..i + 3]` is `push X; pop r; add r D` and folding `X` into the add
/// is unobservable, returns `X`.
fn fusable_push(code: &[Instruction], i: usize) -> Option<Operand> {
    let [push, pop, add] = code.get(i..i + 3)? else {
        return None;
    };
    if push.op != Opcode::Push || pop.op != Opcode::Pop || add.op != Opcode::Add {
        return None;
    }
    let reg = pop.dst.as_ref()?.as_register()?;
    if add.src != pop.dst || add.dst == pop.dst {
        return None;
    }
    let src = push.src.clone()?;
    // `[rsp]` is the cell the pop removes, so it cannot be re-read in place.
    if src == Operand::StackTop {
        return None;
    }
    is_dead_after(&code[i + 3..], reg).then_some(src)
}

/// True when `reg` is overwritten before any read in the straight-line run
/// starting at `rest`. Control flow and the end of the stream count as reads.
fn is_dead_after(rest: &[Instruction], reg: Register) -> bool {
    let target = Operand::Reg(reg);
    for inst in rest {
        let reads = |slot: &Option<Operand>| slot.as_ref() == Some(&target);
        match inst.op {
            Opcode::Mov => {
                if reads(&inst.src) {
                    return false;
                }
                if reads(&inst.dst) {
                    return true;
                }
            }
            Opcode::Push => {
                if reads(&inst.src) {
                    return false;
                }
            }
            Opcode::Pop => {
                if reads(&inst.dst) {
                    return true;
                }
            }
            op if op.is_arithmetic() => {
                if reads(&inst.src) || reads(&inst.dst) {
                    return false;
                }
            }
            op if op.is_comparison() => {
                if reads(&inst.src) || reads(&inst.dst) {
                    return false;
                }
                // comparisons always leave their result in the accumulator
                if reg == Register::Ra {
                    return true;
                }
            }
            _ => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const RA: Operand = Operand::Reg(Register::Ra);
    const RB: Operand = Operand::Reg(Register::Rb);

    #[test]
    fn double_move_is_collapsed() {
        let mut code = vec![
            Instruction::mov(RA, Operand::Heap(0)),
            Instruction::mov(Operand::Heap(0), RA),
            Instruction::ret(),
        ];
        assert_eq!(optimize(&mut code), 1);
        assert_eq!(code, vec![Instruction::mov(RA, Operand::Heap(0)), Instruction::ret()]);
    }

    #[test]
    fn same_direction_moves_are_kept() {
        let mut code = vec![Instruction::mov(RA, Operand::Heap(0)), Instruction::mov(RA, Operand::Heap(0))];
        assert_eq!(optimize(&mut code), 0);
    }

    #[test]
    fn rewind_catches_newly_adjacent_moves() {
        // removing the middle reversal exposes another one
        let mut code = vec![
            Instruction::mov(RA, Operand::Heap(1)),
            Instruction::mov(Operand::Heap(1), RA),
            Instruction::mov(Operand::Heap(1), RA),
        ];
        optimize(&mut code);
        assert_eq!(code, vec![Instruction::mov(RA, Operand::Heap(1))]);
    }

    #[test]
    fn push_pop_add_fuses_when_register_is_dead() {
        let mut code = vec![
            Instruction::push(Operand::Heap(2)),
            Instruction::pop(RB),
            Instruction::binary(Opcode::Add, RB, RA),
            Instruction::pop(RB),
            Instruction::ret(),
        ];
        assert_eq!(optimize(&mut code), 2);
        assert_eq!(code[0], Instruction::binary(Opcode::Add, Operand::Heap(2), RA));
        assert_eq!(code.len(), 3);
    }

    #[test]
    fn fusion_skipped_when_register_is_read_later() {
        let mut code = vec![
            Instruction::push(Operand::Int(7)),
            Instruction::pop(RB),
            Instruction::binary(Opcode::Add, RB, RA),
            Instruction::mov(RB, Operand::Heap(0)),
        ];
        assert_eq!(optimize(&mut code), 0);
    }

    #[test]
    fn fusion_skipped_before_control_flow() {
        let mut code = vec![
            Instruction::push(Operand::Int(7)),
            Instruction::pop(RB),
            Instruction::binary(Opcode::Add, RB, RA),
            Instruction::ret(),
        ];
        assert_eq!(optimize(&mut code), 0);
    }

    #[test]
    fn fusion_skipped_when_add_targets_popped_register() {
        let mut code = vec![
            Instruction::push(Operand::Int(7)),
            Instruction::pop(RB),
            Instruction::binary(Opcode::Add, RB, RB),
            Instruction::mov(Operand::Int(0), RB),
        ];
        assert_eq!(optimize(&mut code), 0);
    }

    #[test]
    fn fusion_only_applies_to_add() {
        let mut code = vec![
            Instruction::push(Operand::Int(7)),
            Instruction::pop(RB),
            Instruction::binary(Opcode::Sub, RB, RA),
            Instruction::mov(Operand::Int(0), RB),
        ];
        assert_eq!(optimize(&mut code), 0);
    }

    #[test]
    fn generated_expression_code_is_untouched() {
        let mut code = vec![
            Instruction::mov(Operand::Int(2), RA),
            Instruction::push(RA),
            Instruction::mov(Operand::Int(3), RA),
            Instruction::pop(RB),
            Instruction::binary(Opcode::Add, RB, RA),
            Instruction::ret(),
        ];
        let before = code.clone();
        assert_eq!(optimize(&mut code), 0);
        assert_eq!(code, before);
    }
}
