//! Constant folding and local dead-code elimination: `spec.md` §4.8.
//!
//! Two independent intra-block passes, as `original_source`'s
//! `ConstFoldPass`/`LocalDCEPass` are: folding never looks across block
//! boundaries, and DCE's use-count is scoped to a single block rather than
//! the whole function (a temporary is never read from a different block than
//! the one that defines it, per `spec.md` §3's SSA-after-Mem2Reg shape, so
//! this is not an approximation — it is exact).

use log::{debug, trace};

use crate::ir::{Function, Opcode, Operand};

/// Fold each instruction's constant operands, then strip now-dead pure
/// instructions whose result is unused within their own block. Runs both to
/// a fixpoint, since folding can make an operand feeding another instruction
/// constant only after its own fold, and DCE can expose a chain of now-dead
/// producers once the instruction that only consumer was is removed.
pub fn run(f: &mut Function) -> bool {
    trace!("fold: folding and locally eliminating dead code in {}", f.name);
    let mut changed = false;
    loop {
        let mut local_changed = false;
        local_changed |= const_fold(f);
        local_changed |= local_dce(f);
        if !local_changed {
            break;
        }
        changed = true;
    }
    if changed {
        debug!("fold: simplified {}", f.name);
    }
    changed
}

fn eval_binary(op: Opcode, a: i32, b: i32) -> Option<i32> {
    match op {
        Opcode::Add => Some(a.wrapping_add(b)),
        Opcode::Sub => Some(a.wrapping_sub(b)),
        Opcode::Mul => Some(a.wrapping_mul(b)),
        Opcode::Div => (b != 0).then(|| a / b),
        Opcode::Mod => (b != 0).then(|| a % b),
        Opcode::Eq => Some((a == b) as i32),
        Opcode::Neq => Some((a != b) as i32),
        Opcode::Lt => Some((a < b) as i32),
        Opcode::Le => Some((a <= b) as i32),
        Opcode::Gt => Some((a > b) as i32),
        Opcode::Ge => Some((a >= b) as i32),
        Opcode::And => Some((a != 0 && b != 0) as i32),
        Opcode::Or => Some((a != 0 || b != 0) as i32),
        _ => None,
    }
}

fn eval_unary(op: Opcode, a: i32) -> Option<i32> {
    match op {
        Opcode::Neg => Some(a.wrapping_neg()),
        Opcode::Not => Some((a == 0) as i32),
        _ => None,
    }
}

fn const_fold(f: &mut Function) -> bool {
    let mut changed = false;
    for (_, blk) in f.blocks.iter_mut() {
        let mut if_outcome: Option<bool> = None;
        for inst in &mut blk.insts {
            let op = inst.op;
            if op.is_binary() {
                if let (Operand::ConstantInt(a), Operand::ConstantInt(b)) = (&inst.arg1, &inst.arg2) {
                    if let Some(res) = eval_binary(op, *a, *b) {
                        inst.op = Opcode::Assign;
                        inst.arg1 = Operand::ConstantInt(res);
                        inst.arg2 = Operand::Empty;
                        changed = true;
                    }
                }
            } else if op.is_unary() {
                if let Operand::ConstantInt(a) = &inst.arg1 {
                    if let Some(res) = eval_unary(op, *a) {
                        inst.op = Opcode::Assign;
                        inst.arg1 = Operand::ConstantInt(res);
                        changed = true;
                    }
                }
            } else if op == Opcode::If {
                if let Operand::ConstantInt(cond) = &inst.arg1 {
                    if *cond == 0 {
                        if_outcome = Some(false);
                        inst.make_nop();
                    } else {
                        let target = inst.result.clone();
                        inst.op = Opcode::Goto;
                        inst.arg1 = Operand::Empty;
                        inst.result = target;
                        if_outcome = Some(true);
                    }
                    changed = true;
                }
            }
        }
        // The instruction stream and the block's cached edges must agree: a
        // folded-away IF leaves exactly one of `next`/`jump_target` still
        // reachable from this block's tail.
        match if_outcome {
            Some(false) => blk.jump_target = None,
            Some(true) => blk.next = None,
            None => {}
        }
    }
    changed
}

fn local_dce(f: &mut Function) -> bool {
    let mut changed = false;
    for (_, blk) in f.blocks.iter_mut() {
        let mut use_count: std::collections::HashMap<crate::ir::Temp, u32> = std::collections::HashMap::new();
        for inst in &blk.insts {
            for t in inst.used_temps() {
                *use_count.entry(t).or_default() += 1;
            }
        }

        let before = blk.insts.len();
        blk.insts.retain(|inst| {
            if inst.op.is_pure() {
                if let Operand::Temporary(t) = &inst.result {
                    return use_count.get(t).copied().unwrap_or(0) > 0;
                }
            }
            true
        });
        if blk.insts.len() != before {
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Instruction, Type};

    fn tmp(n: u32) -> crate::ir::Temp {
        cranelift_entity::EntityRef::new(n as usize)
    }

    #[test]
    fn folds_constant_arithmetic_chain() {
        let t0 = Operand::Temporary(tmp(0));
        let insts = vec![
            Instruction::binary(Opcode::Add, Operand::ConstantInt(3), Operand::ConstantInt(4), t0.clone()),
            Instruction::return_(t0),
        ];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        assert!(const_fold(&mut f));
        let entry = f.entry();
        assert_eq!(f.blocks[entry].insts[0].op, Opcode::Assign);
        assert_eq!(f.blocks[entry].insts[0].arg1, Operand::ConstantInt(7));
    }

    #[test]
    fn dead_pure_result_is_removed() {
        let dead = Operand::Temporary(tmp(0));
        let insts = vec![
            Instruction::binary(Opcode::Add, Operand::ConstantInt(1), Operand::ConstantInt(2), dead),
            Instruction::return_(Operand::ConstantInt(0)),
        ];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        assert!(local_dce(&mut f));
        let entry = f.entry();
        assert_eq!(f.blocks[entry].insts.len(), 1);
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let t0 = Operand::Temporary(tmp(0));
        let insts = vec![
            Instruction::binary(Opcode::Div, Operand::ConstantInt(1), Operand::ConstantInt(0), t0.clone()),
            Instruction::return_(t0),
        ];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        assert!(!const_fold(&mut f));
    }
}
