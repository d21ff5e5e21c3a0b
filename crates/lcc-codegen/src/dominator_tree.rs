//! Dominator tree: `spec.md` §4.2.
//!
//! A classical iterative data-flow computation, exactly as the reference
//! `DominatorTree` class does it (no Lengauer-Tarjan fast path — the
//! functions this compiler handles are small enough that fixpoint iteration
//! over `dom` sets is simply not worth replacing).

use std::collections::{HashMap, HashSet};

use log::trace;

use crate::flowgraph;
use crate::ir::{BlockId, Function};

#[derive(Debug, Default)]
pub struct DominatorTree {
    dom: HashMap<BlockId, HashSet<BlockId>>,
    idom: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, HashSet<BlockId>>,
}

impl DominatorTree {
    pub fn compute(f: &Function) -> DominatorTree {
        trace!("dominator_tree: computing for {}", f.name);
        let entry = f.entry();
        let all_blocks: Vec<BlockId> = f.blocks.keys().collect();
        let preds = flowgraph::predecessors(f);
        let reachable = reachable_blocks(f, entry);

        let mut dom: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
        for &b in &all_blocks {
            if b == entry {
                dom.insert(b, HashSet::from([entry]));
            } else if reachable.contains(&b) {
                dom.insert(b, all_blocks.iter().copied().collect());
            } else {
                dom.insert(b, HashSet::new());
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &all_blocks {
                if b == entry || !reachable.contains(&b) {
                    continue;
                }
                let mut new_dom: Option<HashSet<BlockId>> = None;
                for &p in preds.get(&b).into_iter().flatten() {
                    if !reachable.contains(&p) {
                        continue;
                    }
                    new_dom = Some(match new_dom {
                        None => dom[&p].clone(),
                        Some(acc) => acc.intersection(&dom[&p]).copied().collect(),
                    });
                }
                let mut new_dom = new_dom.unwrap_or_default();
                new_dom.insert(b);
                if new_dom != dom[&b] {
                    dom.insert(b, new_dom);
                    changed = true;
                }
            }
        }

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        let mut children: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
        for &b in &all_blocks {
            children.entry(b).or_default();
            if b == entry || !reachable.contains(&b) {
                continue;
            }
            let candidates: Vec<BlockId> = dom[&b].iter().copied().filter(|&d| d != b).collect();
            let chosen = candidates
                .into_iter()
                .max_by_key(|d| (dom[d].len(), std::cmp::Reverse(block_num(*d))))
                .expect("a reachable non-entry block dominates at least the entry");
            idom.insert(b, chosen);
            children.entry(chosen).or_default().insert(b);
        }

        DominatorTree { dom, idom, children }
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dom.get(&b).is_some_and(|set| set.contains(&a))
    }

    pub fn immediate_dominator(&self, b: BlockId) -> Option<BlockId> {
        self.idom.get(&b).copied()
    }

    pub fn dominated_blocks(&self, b: BlockId) -> &HashSet<BlockId> {
        static EMPTY: std::sync::OnceLock<HashSet<BlockId>> = std::sync::OnceLock::new();
        self.children.get(&b).unwrap_or_else(|| EMPTY.get_or_init(HashSet::new))
    }

    pub fn dominator_set(&self, b: BlockId) -> &HashSet<BlockId> {
        static EMPTY: std::sync::OnceLock<HashSet<BlockId>> = std::sync::OnceLock::new();
        self.dom.get(&b).unwrap_or_else(|| EMPTY.get_or_init(HashSet::new))
    }

    /// Pre-order traversal of the dominator tree rooted at `entry`, as
    /// Mem2Reg's renamer requires (`spec.md` §4.4 step 4).
    pub fn preorder(&self, entry: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack = vec![entry];
        while let Some(b) = stack.pop() {
            out.push(b);
            let mut kids: Vec<BlockId> = self.dominated_blocks(b).iter().copied().collect();
            kids.sort_by_key(|b| std::cmp::Reverse(block_num(*b)));
            stack.extend(kids);
        }
        out
    }
}

fn block_num(b: BlockId) -> u32 {
    cranelift_entity::EntityRef::index(b) as u32
}

fn reachable_blocks(f: &Function, entry: BlockId) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut stack = vec![entry];
    while let Some(b) = stack.pop() {
        if !seen.insert(b) {
            continue;
        }
        for s in f.blocks[b].successors() {
            stack.push(s);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph;
    use crate::ir::{Function, Instruction, Operand, Type};

    fn lbl(n: u32) -> crate::ir::Label {
        cranelift_entity::EntityRef::new(n as usize)
    }
    fn tmp(n: u32) -> crate::ir::Temp {
        cranelift_entity::EntityRef::new(n as usize)
    }

    #[test]
    fn diamond_idom_is_header() {
        // if (t0) goto L1 else fallthrough; both branches join at L2.
        let insts = vec![
            Instruction::if_(Operand::Temporary(tmp(0)), Operand::Label(lbl(1))),
            Instruction::goto(Operand::Label(lbl(2))),
            Instruction::label(Operand::Label(lbl(1))),
            Instruction::label(Operand::Label(lbl(2))),
            Instruction::return_(Operand::ConstantInt(0)),
        ];
        let mut f = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
        flowgraph::build(&mut f).unwrap();
        let dt = DominatorTree::compute(&f);
        let entry = f.entry();
        let join = f.block_with_label(lbl(2)).unwrap();
        assert_eq!(dt.immediate_dominator(join), Some(entry));
        assert!(dt.dominates(entry, join));
    }
}
