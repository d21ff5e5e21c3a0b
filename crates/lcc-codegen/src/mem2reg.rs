//! SSA promotion: `spec.md` §4.4.
//!
//! Promotes scalar `ALLOCA`s with no array type into `PHI`-joined temporaries,
//! following `original_source`'s `Mem2RegPass` step for step: collect
//! promotable allocas and their defining blocks, compute dominance frontiers
//! via Cytron's algorithm, insert `PHI`s at iterated-dominance-frontier
//! blocks, rename in dominator-tree pre-order with a per-variable operand
//! stack, strip the now-dead `ALLOCA`s, then lower `PHI`s to copies in
//! predecessor blocks.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::dominator_tree::DominatorTree;
use crate::flowgraph;
use crate::ir::{BasicBlock, BlockId, Function, Instruction, Opcode, Operand, Temp};

/// Per-variable bookkeeping while collecting promotable allocas.
struct AllocaInfo {
    var_id: u32,
    def_blocks: HashSet<BlockId>,
}

/// Run SSA promotion over `f`. Returns `false` (leaving `f` untouched) when
/// there is nothing to promote, exactly as the reference pass reports no
/// change rather than rebuilding an identical function.
pub fn run(f: &mut Function, dt: &DominatorTree) -> bool {
    trace!("mem2reg: scanning {} for promotable allocas", f.name);
    let mut allocas = collect_promotable_allocas(f);
    if allocas.is_empty() {
        return false;
    }
    debug!("mem2reg: promoting {} scalar(s) in {}", allocas.len(), f.name);

    let frontiers = dominance_frontiers(f, dt);
    let mut phi_to_var: HashMap<Temp, u32> = HashMap::new();
    insert_phi_nodes(f, &frontiers, &mut allocas, &mut phi_to_var);

    let mut var_stacks: HashMap<u32, Vec<Operand>> = HashMap::new();
    let promotable_ids: HashSet<u32> = allocas.keys().copied().collect();
    rename_variables(f, dt, f.entry(), &promotable_ids, &phi_to_var, &mut var_stacks);

    strip_promoted_allocas(f, &promotable_ids);
    eliminate_phis(f);
    true
}

fn collect_promotable_allocas(f: &Function) -> HashMap<u32, AllocaInfo> {
    let mut allocas: HashMap<u32, AllocaInfo> = HashMap::new();

    for (_, blk) in f.blocks.iter() {
        for inst in &blk.insts {
            if inst.op != Opcode::Alloca {
                continue;
            }
            if let Operand::Variable(sym) = &inst.arg1 {
                if sym.ty.is_basic() {
                    allocas.entry(sym.id).or_insert_with(|| AllocaInfo {
                        var_id: sym.id,
                        def_blocks: HashSet::new(),
                    });
                }
            }
        }
    }

    for (id, blk) in f.blocks.iter() {
        for inst in &blk.insts {
            match inst.op {
                Opcode::Assign => {
                    if let Operand::Variable(sym) = &inst.result {
                        if let Some(info) = allocas.get_mut(&sym.id) {
                            info.def_blocks.insert(id);
                        }
                    }
                }
                Opcode::Store => {
                    let is_scalar_store = inst.result.is_empty();
                    if is_scalar_store {
                        if let Operand::Variable(sym) = &inst.arg2 {
                            if let Some(info) = allocas.get_mut(&sym.id) {
                                info.def_blocks.insert(id);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    allocas
}

/// Cytron's dominance-frontier algorithm: for every block `b` with two or
/// more predecessors, walk each predecessor up its idom chain until it
/// reaches `b`'s immediate dominator, adding `b` to the frontier of every
/// block visited along the way.
fn dominance_frontiers(f: &Function, dt: &DominatorTree) -> HashMap<BlockId, HashSet<BlockId>> {
    let preds = flowgraph::predecessors(f);
    let mut frontiers: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for (b, ps) in &preds {
        if ps.len() < 2 {
            continue;
        }
        let idom_b = dt.immediate_dominator(*b);
        for &p in ps {
            let mut runner = Some(p);
            while runner != idom_b {
                let Some(r) = runner else { break };
                frontiers.entry(r).or_default().insert(*b);
                runner = dt.immediate_dominator(r);
            }
        }
    }
    frontiers
}

fn insert_phi_nodes(
    f: &mut Function,
    frontiers: &HashMap<BlockId, HashSet<BlockId>>,
    allocas: &mut HashMap<u32, AllocaInfo>,
    phi_to_var: &mut HashMap<Temp, u32>,
) {
    let var_ids: Vec<u32> = allocas.keys().copied().collect();
    for var_id in var_ids {
        let mut worklist: Vec<BlockId> = allocas[&var_id].def_blocks.iter().copied().collect();
        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut has_phi: HashSet<BlockId> = HashSet::new();
        let mut i = 0;
        while i < worklist.len() {
            let x = worklist[i];
            i += 1;
            for &y in frontiers.get(&x).into_iter().flatten() {
                if has_phi.contains(&y) {
                    continue;
                }
                let result = Operand::Temporary(f.new_temp());
                let phi = Instruction::phi(result.clone());
                f.blocks[y].insts.insert(0, phi);
                for inst in &mut f.blocks[y].insts {
                    inst.parent = Some(y);
                }
                phi_to_var.insert(result.as_temp(), var_id);
                has_phi.insert(y);
                if visited.insert(y) {
                    worklist.push(y);
                }
            }
        }
    }
}

/// Substitute a promotable `Variable` use with the current stack top, or
/// `ConstantInt(0)` for a read with no reaching definition (an uninitialized
/// scalar, per `spec.md` §4.4's edge case).
fn try_replace_use(
    operand: &mut Operand,
    promotable: &HashSet<u32>,
    var_stacks: &HashMap<u32, Vec<Operand>>,
) {
    if let Operand::Variable(sym) = operand {
        if promotable.contains(&sym.id) {
            *operand = match var_stacks.get(&sym.id).and_then(|s| s.last()) {
                Some(top) => top.clone(),
                None => Operand::ConstantInt(0),
            };
        }
    }
}

fn rename_variables(
    f: &mut Function,
    dt: &DominatorTree,
    bb: BlockId,
    promotable: &HashSet<u32>,
    phi_to_var: &HashMap<Temp, u32>,
    var_stacks: &mut HashMap<u32, Vec<Operand>>,
) {
    let mut push_count: HashMap<u32, u32> = HashMap::new();

    for inst in &f.blocks[bb].insts {
        if inst.op == Opcode::Phi {
            if let Some(&var_id) = phi_to_var.get(&inst.result.as_temp()) {
                var_stacks.entry(var_id).or_default().push(inst.result.clone());
                *push_count.entry(var_id).or_default() += 1;
            }
        }
    }

    for inst in &mut f.blocks[bb].insts {
        let op = inst.op;
        if op != Opcode::Phi && op != Opcode::Alloca {
            try_replace_use(&mut inst.arg1, promotable, var_stacks);
            if op != Opcode::Store {
                try_replace_use(&mut inst.arg2, promotable, var_stacks);
            }
        }

        match op {
            Opcode::Assign => {
                if let Operand::Variable(sym) = &inst.result {
                    if promotable.contains(&sym.id) {
                        let id = sym.id;
                        let new_val = inst.arg1.clone();
                        var_stacks.entry(id).or_default().push(new_val);
                        *push_count.entry(id).or_default() += 1;
                        inst.op = Opcode::Alloca;
                        inst.arg1 = Operand::Empty;
                    }
                }
            }
            Opcode::Store => {
                let is_scalar_store = inst.result.is_empty();
                if is_scalar_store {
                    if let Operand::Variable(sym) = &inst.arg2 {
                        if promotable.contains(&sym.id) {
                            let id = sym.id;
                            let new_val = inst.arg1.clone();
                            var_stacks.entry(id).or_default().push(new_val);
                            *push_count.entry(id).or_default() += 1;
                            inst.op = Opcode::Alloca;
                            inst.arg1 = Operand::Empty;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    for succ in f.blocks[bb].successors().collect::<Vec<_>>() {
        for inst in &mut f.blocks[succ].insts {
            if inst.op != Opcode::Phi {
                continue;
            }
            let Some(&var_id) = phi_to_var.get(&inst.result.as_temp()) else {
                continue;
            };
            let val = match var_stacks.get(&var_id).and_then(|s| s.last()) {
                Some(top) => top.clone(),
                None => Operand::ConstantInt(0),
            };
            inst.add_phi_incoming(val, bb);
        }
    }

    let mut children: Vec<BlockId> = dt.dominated_blocks(bb).iter().copied().collect();
    children.sort_by_key(|b| cranelift_entity::EntityRef::index(*b));
    for child in children {
        rename_variables(f, dt, child, promotable, phi_to_var, var_stacks);
    }

    for (var_id, count) in push_count {
        let stack = var_stacks.get_mut(&var_id).expect("pushed above");
        for _ in 0..count {
            stack.pop();
        }
    }
}

/// Drop every `ALLOCA` whose symbol was promoted (the rename pass already
/// turned promoted `ASSIGN`/`STORE` defs into `ALLOCA` tombstones with an
/// empty `arg1`, so both the original declaration and the rewritten defs are
/// removed here in one sweep).
fn strip_promoted_allocas(f: &mut Function, promotable: &HashSet<u32>) {
    for (_, blk) in f.blocks.iter_mut() {
        blk.insts.retain(|inst| {
            if inst.op != Opcode::Alloca {
                return true;
            }
            match &inst.arg1 {
                Operand::Variable(sym) => !promotable.contains(&sym.id),
                Operand::Empty => false,
                _ => true,
            }
        });
    }
}

/// Lower every `PHI` into an `ASSIGN` copy appended at the end of each
/// predecessor (before its terminator, if any), as `spec.md` §4.4 step 5
/// requires. `PHI`s are only ever the leading instructions of a block, so a
/// block's phis are exactly its longest `PHI`-opcode prefix.
fn eliminate_phis(f: &mut Function) {
    let mut pending: Vec<Instruction> = Vec::new();
    for (_, blk) in f.blocks.iter_mut() {
        let split = blk.insts.iter().take_while(|i| i.op == Opcode::Phi).count();
        if split == 0 {
            continue;
        }
        pending.extend(blk.insts.drain(0..split));
    }

    // Performed as a second pass since a phi's predecessor is, in general, a
    // different block than the one the phi itself was removed from.
    for phi in pending {
        let dest = phi.result;
        for (src, pred) in phi.phi_args {
            let copy = Instruction::assign(src, dest.clone());
            insert_copy_in_predecessor(f, pred, copy);
        }
    }
}

fn insert_copy_in_predecessor(f: &mut Function, pred: BlockId, copy: Instruction) {
    let blk: &mut BasicBlock = &mut f.blocks[pred];
    blk.insert_before_terminator(copy);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instruction, Operand, Symbol, Type};
    use std::rc::Rc;

    fn lbl(n: u32) -> crate::ir::Label {
        cranelift_entity::EntityRef::new(n as usize)
    }
    fn tmp(n: u32) -> Temp {
        cranelift_entity::EntityRef::new(n as usize)
    }

    /// `int x; if (t0) x = 1; else x = 2; return x;` — the textbook diamond
    /// that forces a single PHI for `x` at the join block.
    #[test]
    fn diamond_assign_promotes_to_phi() {
        let x = Operand::Variable(Rc::new(Symbol::new(0, "x", Type::Basic)));
        let insts = vec![
            Instruction::alloca(x.clone(), 1),
            Instruction::if_(Operand::Temporary(tmp(0)), Operand::Label(lbl(1))),
            Instruction::assign(Operand::ConstantInt(1), x.clone()),
            Instruction::goto(Operand::Label(lbl(2))),
            Instruction::label(Operand::Label(lbl(1))),
            Instruction::assign(Operand::ConstantInt(2), x.clone()),
            Instruction::label(Operand::Label(lbl(2))),
            Instruction::return_(x.clone()),
        ];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        flowgraph::build(&mut f).unwrap();
        let dt = DominatorTree::compute(&f);
        let changed = run(&mut f, &dt);
        assert!(changed);

        for (_, blk) in f.blocks.iter() {
            for inst in &blk.insts {
                assert_ne!(inst.op, Opcode::Phi, "phis must be eliminated by the end of the pass");
                assert_ne!(inst.op, Opcode::Alloca, "the promoted alloca must be stripped");
                if let Operand::Variable(_) = &inst.result {
                    panic!("no instruction should still define the promoted variable");
                }
            }
        }
    }

    #[test]
    fn no_allocas_reports_no_change() {
        let insts = vec![Instruction::return_(Operand::ConstantInt(0))];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        flowgraph::build(&mut f).unwrap();
        let dt = DominatorTree::compute(&f);
        assert!(!run(&mut f, &dt));
    }

    /// `int x; return x;` with no preceding def: the uninitialized read
    /// resolves to the `ConstantInt(0)` default, per `spec.md` §4.4.
    #[test]
    fn uninitialized_read_defaults_to_zero() {
        let x = Operand::Variable(Rc::new(Symbol::new(0, "x", Type::Basic)));
        let insts = vec![Instruction::alloca(x.clone(), 1), Instruction::return_(x.clone())];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        flowgraph::build(&mut f).unwrap();
        let dt = DominatorTree::compute(&f);
        assert!(run(&mut f, &dt));
        let entry = f.entry();
        let ret = f.blocks[entry].insts.last().unwrap();
        assert_eq!(ret.result, Operand::ConstantInt(0));
    }
}
