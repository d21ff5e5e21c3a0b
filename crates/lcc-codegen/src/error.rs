//! Structural IR errors: `spec.md` §7 layer 2.
//!
//! These are contract violations inside the core, not source errors and not
//! analysis surrenders. They are returned (never panicked, since the callers
//! that can trigger them — CFG construction over text-derived instructions,
//! PHI bookkeeping — are processing data that arrived from outside the
//! current call) so a driver can report a location and abort the
//! compilation, rather than continuing over a function in an unknown state.

use crate::ir::Label;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IrError {
    #[error("unresolved label L{0} referenced by a GOTO/IF but never defined by a LABEL")]
    UnresolvedLabel(u32),

    #[error("PHI in block{block} lists block{pred} as an incoming predecessor, but it is not one")]
    PhiNotAPredecessor { block: u32, pred: u32 },

    #[error("duplicate LABEL L{0} defined in more than one block")]
    DuplicateLabel(u32),
}

impl IrError {
    pub fn unresolved_label(label: Label) -> IrError {
        IrError::UnresolvedLabel(cranelift_entity::EntityRef::index(label) as u32)
    }
}
