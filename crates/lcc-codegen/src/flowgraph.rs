//! The CFG builder: `spec.md` §4.1.
//!
//! Converts a `Function` whose blocks collectively hold a flat, pre-CFG
//! instruction stream into one whose blocks are real basic blocks wired by
//! `next`/`jump_target`. Mirrors `original_source`'s `Function::buildCFG`:
//! one pass to cut the stream at block boundaries, a second to resolve
//! `GOTO`/`IF` targets against the labels just seen.

use log::trace;
use std::collections::HashMap;

use crate::error::IrError;
use crate::ir::{BlockId, Function, Instruction, Label, Opcode};

/// Partition `f`'s flattened instruction stream into basic blocks and wire
/// their `next`/`jump_target` edges. Destroys whatever block structure `f`
/// had before the call (per `spec.md` §3's builder lifecycle: CFG
/// construction "destroys the flat form").
pub fn build(f: &mut Function) -> Result<(), IrError> {
    trace!("flowgraph: building CFG for {}", f.name);
    let insts = f.flatten();
    f.blocks.clear();
    if insts.is_empty() {
        f.push_block();
        return Ok(());
    }

    let mut label_to_block: HashMap<Label, BlockId> = HashMap::new();
    let mut cur = f.push_block();

    let mut i = 0;
    while i < insts.len() {
        let op = insts[i].op;

        if op == Opcode::Label {
            if !f.blocks[cur].insts.is_empty() {
                let next_blk = f.push_block();
                f.blocks[cur].next = Some(next_blk);
                cur = next_blk;
            }
            let label = insts[i].result.as_label();
            if label_to_block.insert(label, cur).is_some() {
                return Err(IrError::DuplicateLabel(cranelift_entity::EntityRef::index(label) as u32));
            }
        }

        push_into(f, cur, insts[i].clone());

        if matches!(op, Opcode::Goto | Opcode::If | Opcode::Return) && i + 1 < insts.len() {
            let next_blk = f.push_block();
            if op == Opcode::If {
                f.blocks[cur].next = Some(next_blk);
            }
            cur = next_blk;
        }
        i += 1;
    }

    // Second pass: resolve jump_target edges now that every label is known.
    let block_ids: Vec<BlockId> = f.blocks.keys().collect();
    for id in block_ids {
        let last_op = f.blocks[id].insts.last().map(|inst| inst.op);
        let target_label = match last_op {
            Some(Opcode::Goto) | Some(Opcode::If) => {
                Some(f.blocks[id].insts.last().unwrap().result.as_label())
            }
            _ => None,
        };
        if let Some(label) = target_label {
            let target = label_to_block
                .get(&label)
                .copied()
                .ok_or_else(|| IrError::unresolved_label(label))?;
            f.blocks[id].jump_target = Some(target);
        }
    }

    trace!("flowgraph: {} produced {} blocks", f.name, f.blocks.len());
    Ok(())
}

fn push_into(f: &mut Function, block: BlockId, inst: Instruction) {
    f.blocks[block].push(inst);
}

/// Predecessors of every block, discovered by scanning all blocks for edges
/// into it (`spec.md` §4.2): there is no incremental predecessor cache,
/// mirroring the reference implementation's `getPredecessors` helper.
pub fn predecessors(f: &Function) -> HashMap<BlockId, Vec<BlockId>> {
    let mut preds: HashMap<BlockId, Vec<BlockId>> =
        f.blocks.keys().map(|id| (id, Vec::new())).collect();
    for (id, blk) in f.blocks.iter() {
        for succ in blk.successors() {
            preds.entry(succ).or_default().push(id);
        }
    }
    preds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operand, Type};

    fn lbl(n: u32) -> crate::ir::Label {
        cranelift_entity::EntityRef::new(n as usize)
    }

    #[test]
    fn straight_line_is_one_block() {
        let insts = vec![
            Instruction::assign(Operand::ConstantInt(1), Operand::Temporary(cranelift_entity::EntityRef::new(0))),
            Instruction::return_(Operand::Temporary(cranelift_entity::EntityRef::new(0))),
        ];
        let mut f = Function::from_flat_instructions("main", Type::Basic, vec![], insts);
        build(&mut f).unwrap();
        assert_eq!(f.block_count(), 1);
    }

    #[test]
    fn if_creates_fallthrough_and_jump() {
        let t0 = Operand::Temporary(cranelift_entity::EntityRef::new(0));
        let l_else = Operand::Label(lbl(0));
        let insts = vec![
            Instruction::if_(t0.clone(), l_else.clone()),
            Instruction::return_(Operand::ConstantInt(1)),
            Instruction::label(l_else),
            Instruction::return_(Operand::ConstantInt(2)),
        ];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        build(&mut f).unwrap();
        assert_eq!(f.block_count(), 3);
        let entry = f.entry();
        assert!(f.blocks[entry].next.is_some());
        assert!(f.blocks[entry].jump_target.is_some());
    }

    #[test]
    fn unresolved_label_is_an_error() {
        let insts = vec![Instruction::goto(Operand::Label(lbl(0)))];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        assert!(build(&mut f).is_err());
    }
}
