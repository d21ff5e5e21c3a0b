//! `Instruction` and its `Opcode`.
//!
//! Every instruction carries exactly three operand slots regardless of
//! opcode; `spec.md` §3's table fixes what each slot means per opcode. `PHI`
//! additionally carries an ordered incoming list, since its arity depends on
//! predecessor count rather than being fixed at three.

use super::entities::BlockId;
use super::operand::Operand;

/// The quadruple opcode set. See `spec.md` §3 for the arg1/arg2/result
/// convention of each variant; `Arg` and `Printf` are supplements recovered
/// from `original_source` (see `SPEC_FULL.md` §3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Assign,
    Load,
    Store,
    If,
    Goto,
    Label,
    Param,
    Arg,
    Call,
    Return,
    Alloca,
    Phi,
    /// `printf` intrinsic: `arg1` = format-slot count, `arg2` = `Label` into
    /// the module's string-literal table. Never pure; see `SPEC_FULL.md` §3.
    Printf,
    /// Tombstone left behind by a rewrite; elided by CFG cleanup.
    Nop,
}

impl Opcode {
    /// Binary arithmetic/compare/boolean opcodes: `result = arg1 OP arg2`.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Eq
                | Opcode::Neq
                | Opcode::Lt
                | Opcode::Le
                | Opcode::Gt
                | Opcode::Ge
                | Opcode::And
                | Opcode::Or
        )
    }

    /// Unary arithmetic/boolean opcodes: `result = OP arg1`.
    pub fn is_unary(self) -> bool {
        matches!(self, Opcode::Neg | Opcode::Not)
    }

    /// Must be the last instruction in its block (`spec.md` §3 invariant).
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::If | Opcode::Goto | Opcode::Return)
    }

    /// Pure data-producing opcodes with no observable side effect: safe to
    /// delete when their result is unused, and (LICM) safe to hoist out of a
    /// loop when their operands are loop-invariant.
    pub fn is_pure(self) -> bool {
        self.is_binary() || self.is_unary() || matches!(self, Opcode::Assign | Opcode::Load)
    }

    /// Candidate opcodes for LICM hoisting: pure arithmetic/logical/compare,
    /// unary ops, and `Assign`. `Load` is excluded (memory may alias a later
    /// `Store` in the loop) even though it is otherwise pure for DCE purposes.
    pub fn is_licm_candidate(self) -> bool {
        self.is_binary() || self.is_unary() || matches!(self, Opcode::Assign)
    }
}

/// One quadruple. `parent` is set once the instruction is owned by a
/// `BasicBlock`; it is `None` only transiently, between construction and
/// insertion.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub op: Opcode,
    pub arg1: Operand,
    pub arg2: Operand,
    pub result: Operand,
    pub parent: Option<BlockId>,
    /// `(incoming value, predecessor block)` pairs; only meaningful when
    /// `op == Opcode::Phi`.
    pub phi_args: Vec<(Operand, BlockId)>,
}

impl Instruction {
    fn raw(op: Opcode, arg1: Operand, arg2: Operand, result: Operand) -> Instruction {
        Instruction {
            op,
            arg1,
            arg2,
            result,
            parent: None,
            phi_args: Vec::new(),
        }
    }

    pub fn binary(op: Opcode, lhs: Operand, rhs: Operand, dst: Operand) -> Instruction {
        debug_assert!(op.is_binary());
        Instruction::raw(op, lhs, rhs, dst)
    }

    pub fn unary(op: Opcode, src: Operand, dst: Operand) -> Instruction {
        debug_assert!(op.is_unary());
        Instruction::raw(op, src, Operand::Empty, dst)
    }

    pub fn assign(src: Operand, dst: Operand) -> Instruction {
        Instruction::raw(Opcode::Assign, src, Operand::Empty, dst)
    }

    pub fn load(base: Operand, index: Operand, dst: Operand) -> Instruction {
        Instruction::raw(Opcode::Load, base, index, dst)
    }

    pub fn store(value: Operand, base: Operand, index: Operand) -> Instruction {
        Instruction {
            op: Opcode::Store,
            arg1: value,
            arg2: base,
            result: index,
            parent: None,
            phi_args: Vec::new(),
        }
    }

    pub fn if_(cond: Operand, label: Operand) -> Instruction {
        Instruction::raw(Opcode::If, cond, Operand::Empty, label)
    }

    pub fn goto(label: Operand) -> Instruction {
        Instruction::raw(Opcode::Goto, Operand::Empty, Operand::Empty, label)
    }

    pub fn label(label: Operand) -> Instruction {
        Instruction::raw(Opcode::Label, Operand::Empty, Operand::Empty, label)
    }

    pub fn param(ordinal: i32, var: Operand) -> Instruction {
        Instruction::raw(Opcode::Param, Operand::ConstantInt(ordinal), Operand::Empty, var)
    }

    pub fn arg(value: Operand) -> Instruction {
        Instruction::raw(Opcode::Arg, value, Operand::Empty, Operand::Empty)
    }

    pub fn call(argc: i32, callee: Operand, dst: Operand) -> Instruction {
        Instruction::raw(Opcode::Call, Operand::ConstantInt(argc), callee, dst)
    }

    pub fn return_(value: Operand) -> Instruction {
        Instruction::raw(Opcode::Return, Operand::Empty, Operand::Empty, value)
    }

    pub fn alloca(symbol: Operand, element_count: i32) -> Instruction {
        Instruction::raw(Opcode::Alloca, symbol, Operand::Empty, Operand::ConstantInt(element_count))
    }

    pub fn phi(dst: Operand) -> Instruction {
        Instruction::raw(Opcode::Phi, Operand::Empty, Operand::Empty, dst)
    }

    pub fn printf(format_slots: i32, literal: Operand) -> Instruction {
        Instruction::raw(Opcode::Printf, Operand::ConstantInt(format_slots), literal, Operand::Empty)
    }

    pub fn nop() -> Instruction {
        Instruction::raw(Opcode::Nop, Operand::Empty, Operand::Empty, Operand::Empty)
    }

    /// Turn this instruction into a tombstone in place, clearing operands so
    /// it carries no stale references forward.
    pub fn make_nop(&mut self) {
        self.op = Opcode::Nop;
        self.arg1 = Operand::Empty;
        self.arg2 = Operand::Empty;
        self.result = Operand::Empty;
        self.phi_args.clear();
    }

    pub fn add_phi_incoming(&mut self, value: Operand, pred: BlockId) {
        debug_assert_eq!(self.op, Opcode::Phi);
        self.phi_args.push((value, pred));
    }

    /// Every `Temporary` operand this instruction reads (not `result`, and
    /// not the index/value-producing slots `STORE` writes through).
    pub fn used_temps(&self) -> smallvec::SmallVec<[super::entities::Temp; 2]> {
        let mut out = smallvec::SmallVec::new();
        if self.op == Opcode::Store {
            // arg1 = value, arg2 = base (Variable, never a temp), result = index.
            if let Operand::Temporary(t) = &self.arg1 {
                out.push(*t);
            }
            if let Operand::Temporary(t) = &self.result {
                out.push(*t);
            }
            return out;
        }
        if let Operand::Temporary(t) = &self.arg1 {
            out.push(*t);
        }
        if let Operand::Temporary(t) = &self.arg2 {
            out.push(*t);
        }
        if self.op == Opcode::If {
            // result holds the branch Label, not a use.
        }
        out
    }

    /// The `Temporary` this instruction defines, if any.
    pub fn defined_temp(&self) -> Option<super::entities::Temp> {
        if self.op == Opcode::Store {
            return None;
        }
        match &self.result {
            Operand::Temporary(t) => Some(*t),
            _ => None,
        }
    }
}
