//! `lcc-codegen`: the quadruple IR, CFG construction, and the middle-end
//! optimization pipeline for `lcc` — a whole-program compiler for a small
//! imperative C-subset.
//!
//! `spec.md` §1 scopes this crate to exactly the middle end: the IR data
//! model, CFG construction, the dominator/loop analyses, SSA promotion, CFG
//! cleanup, LICM, loop unrolling, constant folding and local DCE, whole-
//! program constant evaluation, function inlining, and graph-coloring
//! register allocation. The lexer, recursive-descent parser, AST→IR
//! translator, semantic checker, and MIPS emitter are external
//! collaborators (`lcc-reader` stands in for the parser/translator in this
//! workspace, solely so the core can be exercised end to end).

pub mod cfg_cleanup;
pub mod consteval;
pub mod dominator_tree;
pub mod error;
pub mod flowgraph;
pub mod fold;
pub mod inline;
pub mod ir;
pub mod licm;
pub mod loop_analysis;
pub mod mem2reg;
pub mod pipeline;
pub mod regalloc;
pub mod unroll;

pub use error::IrError;
pub use ir::{BasicBlock, BlockId, Function, Instruction, Label, Module, Opcode, Operand, Symbol, SymbolRef, Temp, Type};
pub use pipeline::{run as optimize, PipelineConfig};
