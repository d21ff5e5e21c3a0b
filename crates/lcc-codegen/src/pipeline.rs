//! The pass manager: wires every analysis and transform in `spec.md` §4 into
//! the fixpoint pipeline `spec.md` §5 describes ("the pass manager re-runs
//! its contained passes until none reports a change").
//!
//! Each intraprocedural pass is `fn(&mut Function, ...) -> bool`; each
//! interprocedural one is `fn(&mut [Function], ...) -> bool`, exactly as
//! `SPEC_FULL.md` §9's design note prescribes. There is no dynamic dispatch
//! or trait object here — the pipeline is a fixed, hand-written sequence,
//! the same way `original_source`'s `PassManager::run` is a fixed method
//! body rather than a registration list walked generically.

use log::{debug, info, trace};

use crate::dominator_tree::DominatorTree;
use crate::error::IrError;
use crate::ir::Function;
use crate::regalloc::{self, Allocation, DEFAULT_K};
use crate::{cfg_cleanup, consteval::GlobalConstEval, flowgraph, fold, inline, licm, loop_analysis, mem2reg, unroll};

/// Tunables for the optimization pipeline. `spec.md` fixes each default as a
/// literal constant; `SPEC_FULL.md` §4.3 exposes them here so the CLI can
/// vary them without the core ever reading environment state itself.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Physical colors available to the register allocator (`spec.md`'s `K`).
    pub k: usize,
    /// Maximum callee instruction count the inliner will splice in.
    pub inline_threshold: usize,
    /// Maximum exact trip count the unroller will expand; `i32::MAX`
    /// recovers the reference's unconditional-unroll behavior.
    pub max_unroll_trip_count: i32,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            k: DEFAULT_K,
            inline_threshold: 1000,
            max_unroll_trip_count: 10_000,
        }
    }
}

/// Run the full middle-end pipeline over every function in `functions`:
/// CFG construction, then the intra/interprocedural fixpoint, in place.
/// Returns a structural `IrError` only from initial CFG construction — once
/// built, no later pass can reintroduce an unresolved label.
pub fn run(functions: &mut [Function], cfg: &PipelineConfig) -> Result<(), IrError> {
    info!("pipeline: compiling {} function(s)", functions.len());
    for f in functions.iter_mut() {
        if !f.blocks.is_empty() {
            flowgraph::build(f)?;
        }
    }

    let mut consteval = GlobalConstEval::new();
    let mut round = 0u32;
    loop {
        trace!("pipeline: round {round}");
        let mut changed = false;
        for f in functions.iter_mut() {
            if f.blocks.is_empty() {
                continue;
            }
            changed |= optimize_function_round(f, cfg);
        }
        changed |= consteval.run(functions);
        changed |= inline::run(functions, cfg.inline_threshold);
        round += 1;
        if !changed {
            break;
        }
    }
    debug!("pipeline: converged after {round} round(s)");
    Ok(())
}

/// One round of every intraprocedural transform over a single function:
/// Mem2Reg (needs a fresh dominator tree), CFG cleanup, LICM and unrolling
/// (both need loops recomputed against the *post-cleanup* CFG), then local
/// constant folding/DCE. Returns whether anything changed.
fn optimize_function_round(f: &mut Function, cfg: &PipelineConfig) -> bool {
    let mut changed = false;

    let dt = DominatorTree::compute(f);
    changed |= mem2reg::run(f, &dt);
    changed |= cfg_cleanup::run(f);

    let dt = DominatorTree::compute(f);
    let loops = loop_analysis::analyze(f, &dt);
    changed |= licm::run(f, &loops);
    changed |= unroll::run(f, &loops, cfg.max_unroll_trip_count);

    changed |= cfg_cleanup::run(f);
    changed |= fold::run(f);
    changed
}

/// Allocate registers for every function, once the optimization pipeline has
/// converged. Keyed by function name since the back end looks functions up
/// by their mangled/display name rather than by index.
pub fn allocate_all(functions: &[Function], cfg: &PipelineConfig) -> std::collections::HashMap<String, Allocation> {
    functions
        .iter()
        .filter(|f| !f.blocks.is_empty())
        .map(|f| (f.name.clone(), regalloc::allocate(f, cfg.k)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instruction, Opcode, Operand, Symbol, Type};
    use std::rc::Rc;

    fn tmp(n: u32) -> crate::ir::Temp {
        cranelift_entity::EntityRef::new(n as usize)
    }

    /// `spec.md` §8 scenario 1: `int main(){int x=3; int y=4; return x+y;}`
    /// converges to a bare `ConstantInt(7)` return with no `ALLOCA` left.
    #[test]
    fn straight_line_consts_fold_to_a_single_return() {
        let x = Operand::Variable(Rc::new(Symbol::new(0, "x", Type::Basic)));
        let y = Operand::Variable(Rc::new(Symbol::new(1, "y", Type::Basic)));
        let insts = vec![
            Instruction::alloca(x.clone(), 1),
            Instruction::alloca(y.clone(), 1),
            Instruction::assign(Operand::ConstantInt(3), x.clone()),
            Instruction::assign(Operand::ConstantInt(4), y.clone()),
            Instruction::binary(Opcode::Add, x, y, Operand::Temporary(tmp(0))),
            Instruction::return_(Operand::Temporary(tmp(0))),
        ];
        let f = Function::from_flat_instructions("main", Type::Basic, vec![], insts);
        let mut functions = vec![f];
        run(&mut functions, &PipelineConfig::default()).unwrap();
        let f = &functions[0];

        for (_, blk) in f.blocks.iter() {
            for inst in &blk.insts {
                assert_ne!(inst.op, Opcode::Alloca);
            }
        }
        let ret_blk = f.blocks.iter().find(|(_, b)| b.terminator().is_some()).unwrap().1;
        let ret = ret_blk.terminator().unwrap();
        assert_eq!(ret.op, Opcode::Return);
        assert_eq!(ret.result, Operand::ConstantInt(7));
    }
}
