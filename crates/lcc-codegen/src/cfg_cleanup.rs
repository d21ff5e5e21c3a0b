//! CFG cleanup: `spec.md` §4.5.
//!
//! Removes unreachable blocks, folds single-predecessor fallthrough/GOTO
//! edges into their predecessor, and drops `NOP` tombstones, iterated to a
//! fixpoint exactly as `original_source`'s `CFGCleanupPass::run` does.
//!
//! `BlockId`s are `PrimaryMap` keys and so, unlike the reference
//! implementation's `vector<shared_ptr<BasicBlock>>`, are never physically
//! removed: "deleting" a block here means clearing its instructions and
//! edges so nothing still reachable from the entry block points to it. Every
//! downstream pass only walks blocks reachable through `next`/`jump_target`,
//! so an orphaned empty block is equivalent to a removed one.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::flowgraph;
use crate::ir::{BlockId, Function, Opcode};

/// Run CFG cleanup to a fixpoint. Returns whether anything changed.
pub fn run(f: &mut Function) -> bool {
    trace!("cfg_cleanup: cleaning {}", f.name);
    let mut changed = false;
    loop {
        let mut local_changed = false;
        local_changed |= remove_unreachable_blocks(f);
        local_changed |= merge_blocks(f);
        local_changed |= remove_nops(f);
        if !local_changed {
            break;
        }
        changed = true;
    }
    if changed {
        debug!("cfg_cleanup: simplified {}", f.name);
    }
    changed
}

fn remove_nops(f: &mut Function) -> bool {
    let mut changed = false;
    for (_, blk) in f.blocks.iter_mut() {
        let before = blk.insts.len();
        blk.insts.retain(|inst| inst.op != Opcode::Nop);
        if blk.insts.len() != before {
            changed = true;
        }
    }
    changed
}

fn remove_unreachable_blocks(f: &mut Function) -> bool {
    if f.blocks.is_empty() {
        return false;
    }
    let entry = f.entry();
    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut worklist = vec![entry];
    visited.insert(entry);
    while let Some(b) = worklist.pop() {
        for succ in f.blocks[b].successors() {
            if visited.insert(succ) {
                worklist.push(succ);
            }
        }
    }

    let mut changed = false;
    let ids: Vec<BlockId> = f.blocks.keys().collect();
    for id in ids {
        if !visited.contains(&id) && !f.blocks[id].insts.is_empty() {
            f.blocks[id].insts.clear();
            f.blocks[id].next = None;
            f.blocks[id].jump_target = None;
            changed = true;
        }
    }
    changed
}

/// Merge a block into its sole predecessor when the edge between them is the
/// predecessor's only outgoing edge and the successor's only incoming one.
/// Restarts (returns after the first merge) exactly as the reference pass
/// does, relying on the caller's fixpoint loop to find the next opportunity.
fn merge_blocks(f: &mut Function) -> bool {
    let preds = flowgraph::predecessors(f);
    let entry = f.entry();
    let ids: Vec<BlockId> = f.blocks.keys().collect();

    for bb in ids {
        let blk = &f.blocks[bb];
        let has_fallthrough_only = blk.next.is_some() && blk.jump_target.is_none();
        let has_goto_only = blk.jump_target.is_some() && blk.next.is_none();

        if has_fallthrough_only {
            let succ = blk.next.unwrap();
            if is_sole_pred(&preds, succ, bb) && succ != entry {
                merge_into(f, bb, succ, false);
                return true;
            }
        }
        if has_goto_only {
            let succ = blk.jump_target.unwrap();
            if is_sole_pred(&preds, succ, bb) && succ != entry {
                merge_into(f, bb, succ, true);
                return true;
            }
        }
    }
    false
}

fn is_sole_pred(preds: &HashMap<BlockId, Vec<BlockId>>, succ: BlockId, bb: BlockId) -> bool {
    matches!(preds.get(&succ).map(Vec::as_slice), Some([only]) if *only == bb)
}

/// Append `succ`'s non-`LABEL` instructions onto `bb`, adopt its outgoing
/// edges, and orphan `succ`. When `drop_goto` is set, `bb`'s trailing `GOTO`
/// (the edge being folded away) is dropped first.
fn merge_into(f: &mut Function, bb: BlockId, succ: BlockId, drop_goto: bool) {
    if drop_goto {
        if matches!(f.blocks[bb].insts.last().map(|i| i.op), Some(Opcode::Goto)) {
            f.blocks[bb].insts.pop();
        }
    }

    let succ_insts: Vec<_> = f.blocks[succ]
        .insts
        .iter()
        .filter(|i| i.op != Opcode::Label)
        .cloned()
        .collect();
    for inst in succ_insts {
        f.blocks[bb].push(inst);
    }

    let succ_next = f.blocks[succ].next;
    let succ_jump = f.blocks[succ].jump_target;
    f.blocks[bb].next = succ_next;
    f.blocks[bb].jump_target = succ_jump;

    f.blocks[succ].insts.clear();
    f.blocks[succ].next = None;
    f.blocks[succ].jump_target = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Instruction, Operand, Type};

    fn lbl(n: u32) -> crate::ir::Label {
        cranelift_entity::EntityRef::new(n as usize)
    }

    #[test]
    fn fallthrough_chain_merges_into_one_block() {
        let insts = vec![
            Instruction::assign(Operand::ConstantInt(1), Operand::Temporary(cranelift_entity::EntityRef::new(0))),
            Instruction::label(Operand::Label(lbl(0))),
            Instruction::return_(Operand::ConstantInt(1)),
        ];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        flowgraph::build(&mut f).unwrap();
        assert_eq!(f.block_count(), 2);
        let changed = run(&mut f);
        assert!(changed);
        let entry = f.entry();
        assert!(f.blocks[entry].terminator().is_some());
        let live = f.blocks.iter().filter(|(_, b)| !b.insts.is_empty()).count();
        assert_eq!(live, 1);
    }

    #[test]
    fn dead_block_after_unconditional_return_is_orphaned() {
        let insts = vec![
            Instruction::return_(Operand::ConstantInt(1)),
            Instruction::label(Operand::Label(lbl(0))),
            Instruction::return_(Operand::ConstantInt(2)),
        ];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        flowgraph::build(&mut f).unwrap();
        let changed = run(&mut f);
        assert!(changed);
        let live = f.blocks.iter().filter(|(_, b)| !b.insts.is_empty()).count();
        assert_eq!(live, 1);
    }

    #[test]
    fn no_change_on_already_clean_function() {
        let insts = vec![Instruction::return_(Operand::ConstantInt(1))];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        flowgraph::build(&mut f).unwrap();
        assert!(!run(&mut f));
    }
}
