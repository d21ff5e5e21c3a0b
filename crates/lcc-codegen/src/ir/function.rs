//! `Function`: the unit every pass in this crate rewrites in place.

use cranelift_entity::PrimaryMap;

use super::basic_block::BasicBlock;
use super::entities::{BlockId, Label, Temp};
use super::instruction::Instruction;
use super::symbol::Type;

/// A function: an ordered, owned list of blocks (the first is the entry)
/// plus the two monotonic id counters described in `spec.md` §3.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ret_ty: Type,
    pub param_tys: Vec<Type>,
    pub blocks: PrimaryMap<BlockId, BasicBlock>,
    next_temp: u32,
    next_label: u32,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_ty: Type, param_tys: Vec<Type>) -> Function {
        Function {
            name: name.into(),
            ret_ty,
            param_tys,
            blocks: PrimaryMap::new(),
            next_temp: 0,
            next_label: 0,
        }
    }

    /// Build a function in pre-CFG form: every instruction collectively held
    /// by a single block, in source order, as `spec.md` §4.1 assumes of the
    /// IR builder's output. Temp/label counters are derived by scanning the
    /// stream for the highest id already used, so a caller handing in
    /// instructions built with its own counters never collides with ids this
    /// `Function` allocates afterwards.
    pub fn from_flat_instructions(
        name: impl Into<String>,
        ret_ty: Type,
        param_tys: Vec<Type>,
        insts: Vec<Instruction>,
    ) -> Function {
        let mut f = Function::new(name, ret_ty, param_tys);
        let mut max_temp: i64 = -1;
        let mut max_label: i64 = -1;
        for inst in &insts {
            for op in [&inst.arg1, &inst.arg2, &inst.result] {
                match op {
                    super::operand::Operand::Temporary(t) => {
                        max_temp = max_temp.max(cranelift_entity::EntityRef::index(*t) as i64)
                    }
                    super::operand::Operand::Label(l) => {
                        max_label = max_label.max(cranelift_entity::EntityRef::index(*l) as i64)
                    }
                    _ => {}
                }
            }
        }
        f.next_temp = (max_temp + 1) as u32;
        f.next_label = (max_label + 1) as u32;
        let id = f.blocks.push(BasicBlock::new(BlockId::from_u32(0)));
        let blk = &mut f.blocks[id];
        for inst in insts {
            blk.push(inst);
        }
        f
    }

    pub fn entry(&self) -> BlockId {
        self.blocks
            .keys()
            .next()
            .expect("a function always has at least one block once constructed")
    }

    pub fn new_temp(&mut self) -> Temp {
        let t = Temp::from_u32(self.next_temp);
        self.next_temp += 1;
        t
    }

    pub fn new_label(&mut self) -> Label {
        let l = Label::from_u32(self.next_label);
        self.next_label += 1;
        l
    }

    /// Push a fresh, empty block and return its id. The new block is never
    /// the entry block unless it happens to be the first one pushed.
    pub fn push_block(&mut self) -> BlockId {
        let id_slot = self.blocks.next_key();
        self.blocks.push(BasicBlock::new(id_slot))
    }

    pub fn block_with_label(&self, label: Label) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|(_, b)| b.label_id() == Some(label))
            .map(|(id, _)| id)
    }

    /// Concatenate every block's instructions in block-list order. Used by
    /// the CFG builder's own re-partitioning step and by the round-trip
    /// property in `spec.md` §8.
    pub fn flatten(&mut self) -> Vec<Instruction> {
        let mut out = Vec::new();
        for (_, blk) in self.blocks.iter_mut() {
            out.append(&mut blk.insts);
        }
        out
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}
