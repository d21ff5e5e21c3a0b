//! End-to-end pipeline scenarios from `spec.md` §8, built directly against
//! the `Function`/`Instruction` API rather than by parsing C (the front end
//! that would produce this IR is out of scope for this crate).

use std::rc::Rc;

use lcc_codegen::ir::{Instruction, Opcode, Operand, Symbol, Type};
use lcc_codegen::{Function, PipelineConfig};

fn tmp(n: u32) -> lcc_codegen::Temp {
    cranelift_entity::EntityRef::new(n as usize)
}

fn lbl(n: u32) -> lcc_codegen::Label {
    cranelift_entity::EntityRef::new(n as usize)
}

fn only_function(functions: Vec<Function>) -> Function {
    functions.into_iter().next().unwrap()
}

/// `int f(int n){if(n<=1) return 1; else return f(n-1)*n;} int main(){return f(5);}`
/// The global constant evaluator memoizes `f(5)=120`; `main`'s call site
/// becomes `ASSIGN 120 -> ret`, the feeding `ARG` becomes `NOP`, and CFG
/// cleanup removes it.
#[test]
fn recursive_factorial_consteval_folds_call_site() {
    let n_sym = Rc::new(Symbol::new(0, "n", Type::Basic));
    let n = Operand::Variable(n_sym.clone());
    let cond = Operand::Temporary(tmp(0));
    let nm1 = Operand::Temporary(tmp(1));
    let rec = Operand::Temporary(tmp(2));
    let prod = Operand::Temporary(tmp(3));

    let f_sym = Rc::new(Symbol::new(1, "f", Type::function(Type::Basic, vec![Type::Basic])).with_global_name("f"));

    let f_body = vec![
        Instruction::param(0, n.clone()),
        Instruction::binary(Opcode::Le, n.clone(), Operand::ConstantInt(1), cond.clone()),
        Instruction::if_(cond, Operand::Label(lbl(0))),
        Instruction::binary(Opcode::Sub, n.clone(), Operand::ConstantInt(1), nm1.clone()),
        Instruction::arg(nm1),
        Instruction::call(1, Operand::Variable(f_sym.clone()), rec.clone()),
        Instruction::binary(Opcode::Mul, rec, n, prod.clone()),
        Instruction::return_(prod),
        Instruction::label(Operand::Label(lbl(0))),
        Instruction::return_(Operand::ConstantInt(1)),
    ];
    let f_func = Function::from_flat_instructions("f", Type::Basic, vec![Type::Basic], f_body);

    let call_res = Operand::Temporary(tmp(0));
    let main_body = vec![
        Instruction::arg(Operand::ConstantInt(5)),
        Instruction::call(1, Operand::Variable(f_sym), call_res.clone()),
        Instruction::return_(call_res),
    ];
    let main_func = Function::from_flat_instructions("main", Type::Basic, vec![], main_body);

    let mut functions = vec![f_func, main_func];
    lcc_codegen::optimize(&mut functions, &PipelineConfig::default()).unwrap();

    let main = functions.iter().find(|f| f.name == "main").unwrap();
    let mut saw_120 = false;
    for (_, blk) in main.blocks.iter() {
        for inst in &blk.insts {
            assert_ne!(inst.op, Opcode::Call, "no call site should survive consteval folding");
            if inst.op == Opcode::Return && inst.result == Operand::ConstantInt(120) {
                saw_120 = true;
            }
        }
    }
    assert!(saw_120, "main must return the constant-folded 120");
}

/// `int main(){int s=0; for(int i=0;i<4;i=i+1) s=s+i; return s;}` unrolls,
/// promotes, and folds down to a bare `return 6`.
#[test]
fn counted_loop_unrolls_and_folds_to_constant_sum() {
    let s = Operand::Variable(Rc::new(Symbol::new(0, "s", Type::Basic)));
    let i = Operand::Variable(Rc::new(Symbol::new(1, "i", Type::Basic)));
    let cond = Operand::Temporary(tmp(0));
    let sum = Operand::Temporary(tmp(1));
    let next_i = Operand::Temporary(tmp(2));

    let body = vec![
        Instruction::alloca(s.clone(), 1),
        Instruction::alloca(i.clone(), 1),
        Instruction::assign(Operand::ConstantInt(0), s.clone()),
        Instruction::assign(Operand::ConstantInt(0), i.clone()),
        Instruction::label(Operand::Label(lbl(0))),
        Instruction::binary(Opcode::Lt, i.clone(), Operand::ConstantInt(4), cond.clone()),
        Instruction::if_(cond, Operand::Label(lbl(1))),
        Instruction::goto(Operand::Label(lbl(2))),
        Instruction::label(Operand::Label(lbl(1))),
        Instruction::binary(Opcode::Add, s.clone(), i.clone(), sum.clone()),
        Instruction::assign(sum, s.clone()),
        Instruction::binary(Opcode::Add, i.clone(), Operand::ConstantInt(1), next_i.clone()),
        Instruction::assign(next_i, i.clone()),
        Instruction::goto(Operand::Label(lbl(0))),
        Instruction::label(Operand::Label(lbl(2))),
        Instruction::return_(s),
    ];
    let func = Function::from_flat_instructions("main", Type::Basic, vec![], body);

    let mut functions = vec![func];
    lcc_codegen::optimize(&mut functions, &PipelineConfig::default()).unwrap();
    let main = only_function(functions);

    let ret_blk = main.blocks.iter().find(|(_, b)| b.terminator().is_some()).unwrap().1;
    let ret = ret_blk.terminator().unwrap();
    assert_eq!(ret.op, Opcode::Return);
    assert_eq!(ret.result, Operand::ConstantInt(6));
}

/// A loop with a pure invariant computation (`k*m+1`, neither operand
/// written in the loop) has the multiply and add hoisted to the preheader;
/// the loop body keeps only the index update, comparison, and the store.
#[test]
fn licm_hoists_pure_invariant_out_of_loop_body() {
    let k_sym = Rc::new(Symbol::new(0, "k", Type::Basic));
    let m_sym = Rc::new(Symbol::new(1, "m", Type::Basic));
    let a_sym = Rc::new(Symbol::new(2, "a", Type::array(Type::Basic, 10)));
    let k = Operand::Variable(k_sym);
    let m = Operand::Variable(m_sym);
    let a = Operand::Variable(a_sym);

    let i_phi = Operand::Temporary(tmp(0));
    let i_next = Operand::Temporary(tmp(1));
    let cond = Operand::Temporary(tmp(2));
    let prod = Operand::Temporary(tmp(3));
    let sum = Operand::Temporary(tmp(4));

    let insts = vec![
        Instruction::goto(Operand::Label(lbl(0))),
        Instruction::label(Operand::Label(lbl(0))),
        Instruction::phi(i_phi.clone()),
        Instruction::binary(Opcode::Mul, k, m, prod.clone()),
        Instruction::binary(Opcode::Add, prod, Operand::ConstantInt(1), sum.clone()),
        Instruction::store(sum, a, i_phi.clone()),
        Instruction::binary(Opcode::Add, i_phi.clone(), Operand::ConstantInt(1), i_next.clone()),
        Instruction::binary(Opcode::Lt, i_next.clone(), Operand::ConstantInt(10), cond.clone()),
        Instruction::if_(cond, Operand::Label(lbl(0))),
        Instruction::label(Operand::Label(lbl(1))),
        Instruction::return_(Operand::ConstantInt(0)),
    ];
    let mut func = Function::from_flat_instructions("f", Type::Basic, vec![], insts);
    lcc_codegen::flowgraph::build(&mut func).unwrap();

    let header = func.block_with_label(lbl(0)).unwrap();
    let preheader = func.entry();
    for inst in &mut func.blocks[header].insts {
        if inst.op == Opcode::Phi {
            inst.add_phi_incoming(Operand::ConstantInt(0), preheader);
            inst.add_phi_incoming(i_next.clone(), header);
        }
    }

    let dt = lcc_codegen::dominator_tree::DominatorTree::compute(&func);
    let loops = lcc_codegen::loop_analysis::analyze(&func, &dt);
    assert_eq!(loops.len(), 1);
    let changed = lcc_codegen::licm::run(&mut func, &loops);
    assert!(changed);

    let mul_still_in_header = func.blocks[header].insts.iter().any(|i| i.op == Opcode::Mul);
    assert!(!mul_still_in_header, "the invariant multiply must be hoisted out of the loop body");
    let mul_in_preheader = func.blocks[preheader].insts.iter().any(|i| i.op == Opcode::Mul);
    assert!(mul_in_preheader, "the hoisted multiply must land in the preheader");
}
