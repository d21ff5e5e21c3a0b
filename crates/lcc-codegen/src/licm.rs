//! Loop-invariant code motion: `spec.md` §4.6.
//!
//! Hoists instructions whose operands are all either constants or defined
//! outside the loop (or already proven invariant) to the loop's unique
//! preheader-like predecessor, following `original_source`'s `LICMPass`.
//! Pointer identity in the reference implementation becomes `(BlockId,
//! index-in-block)` identity here, since instructions are owned by value.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::ir::{BlockId, Function, Instruction, Opcode, Operand};
use crate::loop_analysis::LoopInfo;

type InstKey = (BlockId, usize);

/// Run LICM over every loop in `loops`, hoisting what it can. Returns
/// whether anything moved.
pub fn run(f: &mut Function, loops: &[LoopInfo]) -> bool {
    if loops.is_empty() {
        return false;
    }
    trace!("licm: scanning {} loop(s) in {}", loops.len(), f.name);

    let (temp_defs, var_defs) = collect_definitions(f);
    let mut changed = false;

    for loop_info in loops {
        let Some(insert_block) = find_insert_block(f, loop_info) else {
            continue;
        };

        let invariant = find_invariant_instructions(f, loop_info, &temp_defs, &var_defs);
        if invariant.is_empty() {
            continue;
        }

        let to_hoist = select_hoistable(f, loop_info, &invariant);
        if to_hoist.is_empty() {
            continue;
        }

        hoist(f, &to_hoist, insert_block);
        debug!("licm: hoisted {} instruction(s) out of loop at {:?} in {}", to_hoist.len(), loop_info.header, f.name);
        changed = true;
    }

    changed
}

fn collect_definitions(f: &Function) -> (HashMap<crate::ir::Temp, InstKey>, HashMap<u32, InstKey>) {
    let mut temp_defs = HashMap::new();
    let mut var_defs = HashMap::new();
    for (id, blk) in f.blocks.iter() {
        for (idx, inst) in blk.insts.iter().enumerate() {
            match &inst.result {
                Operand::Temporary(t) => {
                    temp_defs.insert(*t, (id, idx));
                }
                Operand::Variable(sym) => {
                    var_defs.insert(sym.id, (id, idx));
                }
                _ => {}
            }
        }
    }
    (temp_defs, var_defs)
}

/// A block outside the loop whose fallthrough or jump edge enters the
/// header: where hoisted instructions land.
fn find_insert_block(f: &Function, loop_info: &LoopInfo) -> Option<BlockId> {
    f.blocks
        .keys()
        .find(|&id| {
            !loop_info.blocks.contains(&id)
                && (f.blocks[id].next == Some(loop_info.header) || f.blocks[id].jump_target == Some(loop_info.header))
        })
}

fn find_invariant_instructions(
    f: &Function,
    loop_info: &LoopInfo,
    temp_defs: &HashMap<crate::ir::Temp, InstKey>,
    var_defs: &HashMap<u32, InstKey>,
) -> HashSet<InstKey> {
    let mut invariant: HashSet<InstKey> = HashSet::new();
    let mut changed = true;
    while changed {
        changed = false;
        let mut blocks: Vec<BlockId> = loop_info.blocks.iter().copied().collect();
        blocks.sort_by_key(|b| cranelift_entity::EntityRef::index(*b));

        for bb in blocks {
            for (idx, inst) in f.blocks[bb].insts.iter().enumerate() {
                let key = (bb, idx);
                if invariant.contains(&key) {
                    continue;
                }
                if is_invariant(inst, loop_info, temp_defs, var_defs, &invariant) {
                    invariant.insert(key);
                    changed = true;
                }
            }
        }
    }
    invariant
}

fn check_operand(
    op: &Operand,
    loop_info: &LoopInfo,
    temp_defs: &HashMap<crate::ir::Temp, InstKey>,
    var_defs: &HashMap<u32, InstKey>,
    invariant: &HashSet<InstKey>,
) -> bool {
    match op {
        Operand::ConstantInt(_) => true,
        Operand::Temporary(t) => match temp_defs.get(t) {
            Some(&(def_blk, def_idx)) => !loop_info.blocks.contains(&def_blk) || invariant.contains(&(def_blk, def_idx)),
            None => true,
        },
        Operand::Variable(sym) => match var_defs.get(&sym.id) {
            Some(&(def_blk, def_idx)) => !loop_info.blocks.contains(&def_blk) || invariant.contains(&(def_blk, def_idx)),
            None => true,
        },
        _ => true,
    }
}

fn is_invariant(
    inst: &Instruction,
    loop_info: &LoopInfo,
    temp_defs: &HashMap<crate::ir::Temp, InstKey>,
    var_defs: &HashMap<u32, InstKey>,
    invariant: &HashSet<InstKey>,
) -> bool {
    match inst.op {
        Opcode::Assign => check_operand(&inst.arg1, loop_info, temp_defs, var_defs, invariant),
        Opcode::Store
        | Opcode::Call
        | Opcode::If
        | Opcode::Goto
        | Opcode::Return
        | Opcode::Alloca
        | Opcode::Param
        | Opcode::Arg
        | Opcode::Label
        | Opcode::Phi
        | Opcode::Printf
        | Opcode::Nop
        | Opcode::Load => false,
        _ => {
            if !check_operand(&inst.arg1, loop_info, temp_defs, var_defs, invariant) {
                return false;
            }
            if inst.op.is_unary() {
                return true;
            }
            check_operand(&inst.arg2, loop_info, temp_defs, var_defs, invariant)
        }
    }
}

/// Of the instructions proven invariant, keep only those whose result is not
/// also produced by some other instruction inside the loop (a redefinition
/// would make hoisting unsound).
fn select_hoistable(f: &Function, loop_info: &LoopInfo, invariant: &HashSet<InstKey>) -> Vec<InstKey> {
    let mut results: Vec<&Operand> = Vec::new();
    for &bb in &loop_info.blocks {
        for inst in &f.blocks[bb].insts {
            if !inst.result.is_empty() {
                results.push(&inst.result);
            }
        }
    }

    let mut out: Vec<InstKey> = invariant
        .iter()
        .copied()
        .filter(|&(bb, idx)| {
            let result = &f.blocks[bb].insts[idx].result;
            result.is_empty() || results.iter().filter(|r| ***r == *result).count() <= 1
        })
        .collect();
    out.sort_by_key(|&(bb, idx)| (cranelift_entity::EntityRef::index(bb), idx));
    out
}

fn hoist(f: &mut Function, to_hoist: &[InstKey], insert_block: BlockId) {
    let mut by_block: HashMap<BlockId, Vec<usize>> = HashMap::new();
    for &(bb, idx) in to_hoist {
        by_block.entry(bb).or_default().push(idx);
    }

    let mut moved: Vec<Instruction> = Vec::with_capacity(to_hoist.len());
    // Preserve the order `to_hoist` was produced in (sorted by (block, idx)),
    // removing from the highest index downward within each block so earlier
    // indices stay valid.
    let mut taken: HashMap<InstKey, Instruction> = HashMap::new();
    for (&bb, idxs) in &by_block {
        let mut idxs = idxs.clone();
        idxs.sort_unstable_by(|a, b| b.cmp(a));
        for idx in idxs {
            let inst = f.blocks[bb].insts.remove(idx);
            taken.insert((bb, idx), inst);
        }
    }
    for key in to_hoist {
        if let Some(inst) = taken.remove(key) {
            moved.push(inst);
        }
    }

    for inst in moved {
        f.blocks[insert_block].insert_before_terminator(inst);
    }
}
