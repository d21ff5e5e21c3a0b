//! `BasicBlock`: an ordered, owned run of instructions plus its two edges.

use super::entities::{BlockId, Label};
use super::instruction::{Instruction, Opcode};
use super::operand::Operand;

/// A straight-line run of instructions with at most one fall-through edge
/// (`next`) and at most one explicit jump edge (`jump_target`).
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub insts: Vec<Instruction>,
    pub next: Option<BlockId>,
    pub jump_target: Option<BlockId>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> BasicBlock {
        BasicBlock {
            id,
            insts: Vec::new(),
            next: None,
            jump_target: None,
        }
    }

    pub fn push(&mut self, mut inst: Instruction) {
        inst.parent = Some(self.id);
        self.insts.push(inst);
    }

    /// The label id of this block's first instruction, or `None` if it
    /// doesn't open with a `LABEL`.
    pub fn label_id(&self) -> Option<Label> {
        match self.insts.first() {
            Some(inst) if inst.op == Opcode::Label => Some(inst.result.as_label()),
            _ => None,
        }
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.insts.last().filter(|i| i.op.is_terminator())
    }

    /// The two (at most) CFG successors of this block, in `next`-then-`jump`
    /// order, as the register allocator and dominator computation want them.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> {
        self.next.into_iter().chain(self.jump_target)
    }

    pub fn is_empty_of_real_insts(&self) -> bool {
        self.insts.iter().all(|i| i.op == Opcode::Nop)
    }

    /// Index of this block's terminator, i.e. where a `GOTO`/`IF`/`RETURN`
    /// insertion must happen *before*, per the φ-elimination and LICM
    /// contract that new instructions precede any terminating branch.
    pub fn insertion_point_before_terminator(&self) -> usize {
        match self.insts.last() {
            Some(inst) if inst.op.is_terminator() => self.insts.len() - 1,
            _ => self.insts.len(),
        }
    }

    pub fn insert_before_terminator(&mut self, mut inst: Instruction) {
        inst.parent = Some(self.id);
        let at = self.insertion_point_before_terminator();
        self.insts.insert(at, inst);
    }
}

/// Placeholder `Operand::Label` helper used by callers constructing `GOTO`s
/// and `IF`s against a `Label` entity rather than a raw `BlockId`.
pub fn label_operand(label: Label) -> Operand {
    Operand::Label(label)
}
