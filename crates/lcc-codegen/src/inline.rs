//! Function inlining: `spec.md` §4.10.
//!
//! Splices a callee's blocks into the caller at a `CALL` site, remapping
//! every temporary, label, and promoted-variable reference the copied
//! instructions carry. Grounded on `original_source`'s `InlinerPass`: one
//! call is inlined per pass over a caller, the caller's CFG is rebuilt from
//! scratch afterwards (new blocks are always appended, never spliced in at
//! their logical position, exactly as the reference `createBlock` does), and
//! the whole thing repeats for up to ten rounds.

use std::collections::HashMap;

use log::{debug, trace};

use crate::flowgraph;
use crate::ir::{BlockId, Function, Instruction, Label, Opcode, Operand, Temp};

const MAX_ROUNDS: u32 = 10;

/// Inline calls under `threshold` callee instructions, to a ten-round
/// fixpoint. Returns whether anything was inlined.
pub fn run(functions: &mut [Function], threshold: usize) -> bool {
    let mut overall_changed = false;
    for round in 0..MAX_ROUNDS {
        let snapshot: Vec<Function> = functions.to_vec();
        let mut changed = false;

        for i in 0..functions.len() {
            if functions[i].blocks.is_empty() {
                continue;
            }
            if inline_one_call(&mut functions[i], &snapshot, threshold) {
                flowgraph::build(&mut functions[i])
                    .expect("a caller with a freshly spliced-in callee body still resolves every label");
                changed = true;
            }
        }

        if !changed {
            break;
        }
        overall_changed = true;
        trace!("inline: round {round} inlined at least one call site");
    }
    if overall_changed {
        debug!("inline: inlining converged after at least one round");
    }
    overall_changed
}

fn instruction_count(f: &Function) -> usize {
    f.blocks.values().map(|b| b.insts.len()).sum()
}

fn callee_name(op: &Operand) -> Option<String> {
    match op {
        Operand::Variable(sym) => Some(sym.global_name.clone().unwrap_or_else(|| sym.name.clone())),
        _ => None,
    }
}

/// Find and inline the first eligible call site in `caller`, scanning blocks
/// in id order. Returns whether one was inlined.
fn inline_one_call(caller: &mut Function, snapshot: &[Function], threshold: usize) -> bool {
    let Some((call_block, call_idx)) = find_call_site(caller, snapshot, threshold) else {
        return false;
    };
    let name = callee_name(&caller.blocks[call_block].insts[call_idx].arg2)
        .expect("find_call_site only returns Variable-callee call sites");
    let callee = snapshot.iter().find(|f| f.name == name).expect("resolved above");
    inline_call(caller, call_block, call_idx, callee);
    true
}

fn find_call_site(caller: &Function, snapshot: &[Function], threshold: usize) -> Option<(BlockId, usize)> {
    let mut ids: Vec<BlockId> = caller.blocks.keys().collect();
    ids.sort_by_key(|b| cranelift_entity::EntityRef::index(*b));
    for id in ids {
        for (idx, inst) in caller.blocks[id].insts.iter().enumerate() {
            if inst.op != Opcode::Call {
                continue;
            }
            let Some(name) = callee_name(&inst.arg2) else { continue };
            if name == caller.name {
                continue;
            }
            let Some(callee) = snapshot.iter().find(|f| f.name == name) else { continue };
            if callee.blocks.is_empty() {
                continue;
            }
            if instruction_count(callee) >= threshold {
                continue;
            }
            return Some((id, idx));
        }
    }
    None
}

struct RemapTables {
    temps: HashMap<Temp, Temp>,
    labels: HashMap<Label, Label>,
    vars: HashMap<u32, Temp>,
}

fn map_operand(op: &Operand, tables: &mut RemapTables, caller: &mut Function) -> Operand {
    match op {
        Operand::Temporary(t) => Operand::Temporary(new_temp(*t, &mut tables.temps, caller)),
        Operand::Label(l) => Operand::Label(new_label(*l, &mut tables.labels, caller)),
        Operand::Variable(sym) => match tables.vars.get(&sym.id) {
            Some(&t) => Operand::Temporary(t),
            None => op.clone(),
        },
        other => other.clone(),
    }
}

fn new_temp(old: Temp, map: &mut HashMap<Temp, Temp>, caller: &mut Function) -> Temp {
    *map.entry(old).or_insert_with(|| caller.new_temp())
}

fn new_label(old: Label, map: &mut HashMap<Label, Label>, caller: &mut Function) -> Label {
    *map.entry(old).or_insert_with(|| caller.new_label())
}

/// The label a block can be jumped to by, minting and prepending one if it
/// doesn't already open with a `LABEL`.
fn ensure_block_label(caller: &mut Function, block: BlockId) -> Label {
    if let Some(existing) = caller.blocks[block].label_id() {
        return existing;
    }
    let label = caller.new_label();
    let mut inst = Instruction::label(Operand::Label(label));
    inst.parent = Some(block);
    caller.blocks[block].insts.insert(0, inst);
    label
}

fn copy_instruction(inst: &Instruction, tables: &mut RemapTables, caller: &mut Function) -> Instruction {
    let arg1 = map_operand(&inst.arg1, tables, caller);
    let arg2 = map_operand(&inst.arg2, tables, caller);
    let result = map_operand(&inst.result, tables, caller);
    Instruction {
        op: inst.op,
        arg1,
        arg2,
        result,
        parent: None,
        phi_args: Vec::new(),
    }
}

fn inline_call(caller: &mut Function, call_block: BlockId, call_idx: usize, callee: &Function) {
    let mut tables = RemapTables {
        temps: HashMap::new(),
        labels: HashMap::new(),
        vars: HashMap::new(),
    };

    let orig_next = caller.blocks[call_block].next;

    let split_after = caller.push_block();
    let split_after_label = caller.new_label();
    caller.blocks[split_after].push(Instruction::label(Operand::Label(split_after_label)));

    let tail: Vec<Instruction> = caller.blocks[call_block].insts.drain(call_idx + 1..).collect();
    for inst in tail {
        caller.blocks[split_after].push(inst);
    }
    // `call_block` may have been an open, fall-through-only block: its own
    // `.insts` never carried a terminator for that edge, so the drained tail
    // doesn't either. Once the callee's blocks are appended after
    // `split_after`, physical adjacency no longer reaches the real
    // continuation, so make the edge explicit before rebuilding the CFG.
    let split_after_terminated = matches!(
        caller.blocks[split_after].insts.last(),
        Some(inst) if inst.op.is_terminator()
    );
    if !split_after_terminated {
        if let Some(target) = orig_next {
            let label = ensure_block_label(caller, target);
            caller.blocks[split_after].push(Instruction::goto(Operand::Label(label)));
        }
    }

    let argc = caller.blocks[call_block].insts[call_idx].arg1.as_int() as usize;
    let (real_args, args_to_remove) = collect_preceding_args(caller, call_block, call_idx, argc);
    let call_result = caller.blocks[call_block].insts[call_idx].result.clone();

    let callee_entry = callee.entry();
    let mut param_idx = 0usize;
    let mut param_assigns: Vec<Instruction> = Vec::new();
    for inst in &callee.blocks[callee_entry].insts {
        if inst.op != Opcode::Param {
            continue;
        }
        if param_idx < real_args.len() {
            let new_param_temp = caller.new_temp();
            match &inst.result {
                Operand::Variable(sym) => {
                    tables.vars.insert(sym.id, new_param_temp);
                }
                Operand::Temporary(t) => {
                    tables.temps.insert(*t, new_param_temp);
                }
                _ => {}
            }
            param_assigns.push(Instruction::assign(real_args[param_idx].clone(), Operand::Temporary(new_param_temp)));
        }
        param_idx += 1;
    }
    for assign in param_assigns {
        caller.blocks[call_block].push(assign);
    }

    for idx in args_to_remove {
        caller.blocks[call_block].insts[idx].make_nop();
    }
    caller.blocks[call_block].insts[call_idx].make_nop();

    for cbb in callee.blocks.keys() {
        if let Some(old_label) = callee.blocks[cbb].label_id() {
            new_label(old_label, &mut tables.labels, caller);
        }
    }

    let mut first_entry_label: Option<Label> = None;
    for cbb in callee.blocks.keys() {
        let new_bb = caller.push_block();
        let old_label = callee.blocks[cbb].label_id();
        let has_label_inst = matches!(callee.blocks[cbb].insts.first(), Some(i) if i.op == Opcode::Label);

        let new_label_id = match old_label {
            Some(old) => new_label(old, &mut tables.labels, caller),
            None => caller.new_label(),
        };
        if cbb == callee_entry {
            first_entry_label = Some(new_label_id);
        }
        if !has_label_inst {
            caller.blocks[new_bb].push(Instruction::label(Operand::Label(new_label_id)));
        }

        for cinst in &callee.blocks[cbb].insts {
            if cinst.op == Opcode::Param {
                continue;
            }
            let mut new_inst = copy_instruction(cinst, &mut tables, caller);
            if new_inst.op == Opcode::Return {
                let ret_val = new_inst.result.clone();
                if !ret_val.is_empty() {
                    new_inst.op = Opcode::Assign;
                    new_inst.arg1 = ret_val;
                    new_inst.arg2 = Operand::Empty;
                    new_inst.result = call_result.clone();
                    caller.blocks[new_bb].push(new_inst);
                }
                caller.blocks[new_bb].push(Instruction::goto(Operand::Label(split_after_label)));
            } else {
                caller.blocks[new_bb].push(new_inst);
            }
        }
    }

    let entry_label = first_entry_label.expect("a non-empty callee has an entry block");
    caller.blocks[call_block].push(Instruction::goto(Operand::Label(entry_label)));
}

/// Walk backward from the call, skipping any non-`ARG` instructions, to find
/// `argc` preceding `ARG`s (their indices, and their argument operands in
/// source order).
fn collect_preceding_args(
    caller: &Function,
    call_block: BlockId,
    call_idx: usize,
    argc: usize,
) -> (Vec<Operand>, Vec<usize>) {
    let insts = &caller.blocks[call_block].insts;
    let mut real_args: Vec<Operand> = Vec::new();
    let mut args_to_remove: Vec<usize> = Vec::new();
    let mut cursor = call_idx;

    for _ in 0..argc {
        if cursor == 0 {
            break;
        }
        cursor -= 1;
        while cursor != 0 && insts[cursor].op != Opcode::Arg {
            cursor -= 1;
        }
        if insts[cursor].op == Opcode::Arg {
            real_args.insert(0, insts[cursor].arg1.clone());
            args_to_remove.push(cursor);
        }
    }
    (real_args, args_to_remove)
}
