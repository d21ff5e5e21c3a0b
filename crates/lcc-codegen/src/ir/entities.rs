//! Opaque, function-scoped references used throughout the IR.
//!
//! Blocks, temporaries and labels are never addressed by pointer; they are
//! dense `u32` indices wrapped in distinct types so the compiler can't mix up
//! a `Temp` with a `BlockId`. `BlockId` doubles as the key of the
//! `PrimaryMap` that owns a function's blocks, so it also implements
//! `EntityRef`.

use cranelift_entity::entity_impl;

/// A reference to one of a function's basic blocks.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);
entity_impl!(BlockId, "block");

/// A function-scoped SSA-friendly virtual register.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Temp(u32);
entity_impl!(Temp, "t");

/// A function-scoped jump-target id, materialized as a `LABEL` instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);
entity_impl!(Label, "L");
