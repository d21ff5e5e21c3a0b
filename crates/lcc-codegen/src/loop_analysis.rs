//! Natural loop discovery from back edges: `spec.md` §4.3.

use std::collections::HashSet;

use log::trace;

use crate::dominator_tree::DominatorTree;
use crate::flowgraph;
use crate::ir::{BlockId, Function};

#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub header: BlockId,
    pub blocks: HashSet<BlockId>,
    pub exit_blocks: HashSet<BlockId>,
}

/// Find every natural loop in `f`. Multiple back edges into the same header
/// are merged into one loop whose body is the union, as `spec.md` §4.3
/// requires; nesting is not computed, so the result is a flat list.
pub fn analyze(f: &Function, dt: &DominatorTree) -> Vec<LoopInfo> {
    trace!("loop_analysis: analyzing {}", f.name);
    let preds = flowgraph::predecessors(f);
    let mut by_header: Vec<(BlockId, HashSet<BlockId>)> = Vec::new();

    for (u, _) in f.blocks.iter() {
        for h in f.blocks[u].successors() {
            if dt.dominates(h, u) {
                let body = find_loop_blocks(u, h, f, &preds);
                match by_header.iter_mut().find(|(header, _)| *header == h) {
                    Some((_, existing)) => {
                        existing.extend(body);
                    }
                    None => by_header.push((h, body)),
                }
            }
        }
    }

    by_header
        .into_iter()
        .map(|(header, blocks)| {
            let mut exit_blocks = HashSet::new();
            for &b in &blocks {
                for s in f.blocks[b].successors() {
                    if !blocks.contains(&s) {
                        exit_blocks.insert(s);
                    }
                }
            }
            LoopInfo {
                header,
                blocks,
                exit_blocks,
            }
        })
        .collect()
}

/// Every block that can reach `back_edge_src` without passing through
/// `header`, plus `header` itself.
fn find_loop_blocks(
    back_edge_src: BlockId,
    header: BlockId,
    f: &Function,
    preds: &std::collections::HashMap<BlockId, Vec<BlockId>>,
) -> HashSet<BlockId> {
    let mut body = HashSet::from([header, back_edge_src]);
    let mut stack = vec![back_edge_src];
    while let Some(b) = stack.pop() {
        if b == header {
            continue;
        }
        for &p in preds.get(&b).into_iter().flatten() {
            if body.insert(p) {
                stack.push(p);
            }
        }
        let _ = f; // blocks are addressed purely by id here
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dominator_tree::DominatorTree;
    use crate::ir::{Function, Instruction, Operand, Type};

    fn lbl(n: u32) -> crate::ir::Label {
        cranelift_entity::EntityRef::new(n as usize)
    }
    fn tmp(n: u32) -> crate::ir::Temp {
        cranelift_entity::EntityRef::new(n as usize)
    }

    #[test]
    fn simple_counted_loop_is_found() {
        // L0: header; IF t0 < 4 goto L0-body else exit; body falls back to L0 via GOTO.
        let insts = vec![
            Instruction::label(Operand::Label(lbl(0))),
            Instruction::if_(Operand::Temporary(tmp(0)), Operand::Label(lbl(1))),
            Instruction::goto(Operand::Label(lbl(2))),
            Instruction::label(Operand::Label(lbl(1))),
            Instruction::goto(Operand::Label(lbl(0))),
            Instruction::label(Operand::Label(lbl(2))),
            Instruction::return_(Operand::ConstantInt(0)),
        ];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        flowgraph::build(&mut f).unwrap();
        let dt = DominatorTree::compute(&f);
        let loops = analyze(&f, &dt);
        assert_eq!(loops.len(), 1);
        let header = f.block_with_label(lbl(0)).unwrap();
        assert_eq!(loops[0].header, header);
    }
}
