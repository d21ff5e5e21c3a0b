//! `Operand`: the closed, five-case sum every instruction slot holds.

use super::entities::{Label, Temp};
use super::symbol::SymbolRef;
use std::fmt;

/// One operand slot of an instruction.
///
/// Equality is structural: two `Variable` operands are equal iff they name
/// the same symbol id, regardless of which `Rc` instance is held.
#[derive(Clone, Debug)]
pub enum Operand {
    /// An absent argument slot.
    Empty,
    /// A reference to a named symbol (local, parameter, or global).
    Variable(SymbolRef),
    /// A function-scoped virtual register.
    Temporary(Temp),
    /// A 32-bit signed literal.
    ConstantInt(i32),
    /// A jump target.
    Label(Label),
}

impl Operand {
    pub fn is_empty(&self) -> bool {
        matches!(self, Operand::Empty)
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Operand::ConstantInt(_))
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Operand::Temporary(_))
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Operand::Variable(_))
    }

    /// Valid only for `ConstantInt`. Panics otherwise: accessor tag mismatch
    /// is a structural IR contract violation (`spec.md` §7 layer 2), never a
    /// recoverable condition callers are expected to handle.
    pub fn as_int(&self) -> i32 {
        match self {
            Operand::ConstantInt(v) => *v,
            other => panic!("Operand::as_int called on {other:?}, expected ConstantInt"),
        }
    }

    /// Valid only for `Temporary`.
    pub fn as_temp(&self) -> Temp {
        match self {
            Operand::Temporary(t) => *t,
            other => panic!("Operand::as_temp called on {other:?}, expected Temporary"),
        }
    }

    /// Valid only for `Label`.
    pub fn as_label(&self) -> Label {
        match self {
            Operand::Label(l) => *l,
            other => panic!("Operand::as_label called on {other:?}, expected Label"),
        }
    }

    /// Valid only for `Variable`.
    pub fn as_symbol(&self) -> &SymbolRef {
        match self {
            Operand::Variable(s) => s,
            other => panic!("Operand::as_symbol called on {other:?}, expected Variable"),
        }
    }
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Operand::Empty, Operand::Empty) => true,
            (Operand::Variable(a), Operand::Variable(b)) => a.id == b.id,
            (Operand::Temporary(a), Operand::Temporary(b)) => a == b,
            (Operand::ConstantInt(a), Operand::ConstantInt(b)) => a == b,
            (Operand::Label(a), Operand::Label(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Operand {}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Empty => write!(f, "-"),
            Operand::Variable(s) => write!(f, "{}", s.name),
            Operand::Temporary(t) => write!(f, "{t}"),
            Operand::ConstantInt(v) => write!(f, "{v}"),
            Operand::Label(l) => write!(f, "{l}"),
        }
    }
}
