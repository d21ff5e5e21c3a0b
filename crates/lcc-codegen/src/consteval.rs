//! Whole-program constant evaluation: `spec.md` §4.9.
//!
//! Recognizes a `CALL` whose arguments are all compile-time constants,
//! interprets the callee as a little symbolic machine, and — if it returns
//! without touching anything the interpreter can't model — replaces the
//! call (and the `ARG`s that fed it) with the resulting constant. Grounded
//! on `original_source`'s `GlobalConstEvalPass`.
//!
//! The reference pass keeps a live `Function *` list and freely mutates one
//! function while reading any other (including itself, recursively) through
//! the same shared pointers. A `&mut [Function]` can't alias that way, so
//! this version evaluates against an immutable snapshot taken once per
//! [`GlobalConstEval::run`] call and rewrites call sites against the live
//! functions afterwards; a function folded earlier in the same `run` is
//! picked up on the next pass-manager iteration rather than immediately.

use std::collections::HashMap;

use log::{debug, trace};

use crate::ir::{BlockId, Function, Opcode, Operand};

const MAX_RECURSION_DEPTH: u32 = 50;
const MAX_INSTRUCTIONS: u32 = 100_000;

pub struct GlobalConstEval {
    cache: HashMap<(String, Vec<i32>), i32>,
}

impl Default for GlobalConstEval {
    fn default() -> Self {
        GlobalConstEval::new()
    }
}

impl GlobalConstEval {
    pub fn new() -> GlobalConstEval {
        GlobalConstEval { cache: HashMap::new() }
    }

    /// Rewrite constant-argument calls across every function in `functions`.
    pub fn run(&mut self, functions: &mut [Function]) -> bool {
        trace!("consteval: evaluating {} function(s)", functions.len());
        let snapshot: Vec<Function> = functions.to_vec();
        let mut changed = false;
        for f in functions.iter_mut() {
            if self.run_one(f, &snapshot) {
                changed = true;
            }
        }
        if changed {
            debug!("consteval: folded one or more whole-program-constant calls");
        }
        changed
    }

    fn run_one(&mut self, f: &mut Function, snapshot: &[Function]) -> bool {
        let mut changed = false;
        let block_ids: Vec<BlockId> = f.blocks.keys().collect();
        for id in block_ids {
            let mut current_args: Vec<i32> = Vec::new();
            let mut arg_idxs: Vec<usize> = Vec::new();
            let len = f.blocks[id].insts.len();
            for i in 0..len {
                let op = f.blocks[id].insts[i].op;
                match op {
                    Opcode::Arg => {
                        if let Operand::ConstantInt(v) = f.blocks[id].insts[i].arg1 {
                            current_args.push(v);
                            arg_idxs.push(i);
                        } else {
                            current_args.clear();
                            arg_idxs.clear();
                        }
                    }
                    Opcode::Call => {
                        let callee_name = match &f.blocks[id].insts[i].arg2 {
                            Operand::Variable(sym) => sym.global_name.clone(),
                            _ => None,
                        };
                        if let Some(name) = callee_name {
                            if let Some(callee) = find_function(snapshot, &name) {
                                let result = self.evaluate(callee, &current_args, 0, snapshot);
                                if let Some(value) = result {
                                    let inst = &mut f.blocks[id].insts[i];
                                    inst.op = Opcode::Assign;
                                    inst.arg1 = Operand::ConstantInt(value);
                                    inst.arg2 = Operand::Empty;
                                    for &arg_idx in &arg_idxs {
                                        f.blocks[id].insts[arg_idx].make_nop();
                                    }
                                    changed = true;
                                }
                            }
                        }
                        current_args.clear();
                        arg_idxs.clear();
                    }
                    Opcode::Nop => {}
                    _ => {
                        current_args.clear();
                        arg_idxs.clear();
                    }
                }
            }
        }
        changed
    }

    /// Symbolically execute `f` with `args` bound to its `PARAM`s. `None`
    /// means the interpreter gave up — an unmodeled operation, a budget
    /// overrun, or I/O — never that the function returns no value.
    fn evaluate(&mut self, f: &Function, args: &[i32], depth: u32, snapshot: &[Function]) -> Option<i32> {
        if depth > MAX_RECURSION_DEPTH {
            return None;
        }
        let cache_key = (f.name.clone(), args.to_vec());
        if let Some(&v) = self.cache.get(&cache_key) {
            return Some(v);
        }
        if f.blocks.is_empty() {
            return None;
        }

        let mut env: HashMap<crate::ir::Temp, i32> = HashMap::new();
        let mut local_vars: HashMap<u32, i32> = HashMap::new();
        let mut memory: HashMap<u32, HashMap<i32, i32>> = HashMap::new();
        let mut local_allocas: std::collections::HashSet<u32> = std::collections::HashSet::new();

        let entry = f.entry();
        let mut arg_idx = 0usize;
        for inst in &f.blocks[entry].insts {
            if inst.op != Opcode::Param {
                continue;
            }
            if arg_idx < args.len() {
                match &inst.result {
                    Operand::Temporary(t) => {
                        env.insert(*t, args[arg_idx]);
                    }
                    Operand::Variable(sym) => {
                        local_vars.insert(sym.id, args[arg_idx]);
                        memory.entry(sym.id).or_default().insert(0, args[arg_idx]);
                    }
                    _ => {}
                }
            }
            arg_idx += 1;
        }
        for inst in &f.blocks[entry].insts {
            if inst.op == Opcode::Alloca {
                if let Operand::Variable(sym) = &inst.arg1 {
                    local_allocas.insert(sym.id);
                }
            }
        }

        let mut current = Some(entry);
        let mut prev: Option<BlockId> = None;
        let mut executed = 0u32;
        let mut pending_args: Vec<i32> = Vec::new();

        while let Some(bb) = current {
            let blk = &f.blocks[bb];

            // Resolve leading PHIs against the edge just taken.
            for inst in &blk.insts {
                if inst.op == Opcode::Phi {
                    let Some(prev_bb) = prev else { return None };
                    let Some((src, _)) = inst.phi_args.iter().find(|(_, p)| *p == prev_bb) else {
                        return None;
                    };
                    let val = match src {
                        Operand::ConstantInt(v) => *v,
                        Operand::Temporary(t) => match env.get(t) {
                            Some(v) => *v,
                            None => return None,
                        },
                        _ => return None,
                    };
                    env.insert(inst.result.as_temp(), val);
                } else if inst.op != Opcode::Label {
                    break;
                }
            }

            let mut branch: Option<BlockId> = None;
            for inst in &blk.insts {
                let op = inst.op;
                if matches!(op, Opcode::Phi | Opcode::Label | Opcode::Nop | Opcode::Param | Opcode::Alloca) {
                    continue;
                }

                executed += 1;
                if executed > MAX_INSTRUCTIONS {
                    return None;
                }

                match op {
                    Opcode::Load => {
                        let Operand::Variable(sym) = &inst.arg1 else { return None };
                        let id = sym.id;
                        let offset = if inst.arg2.is_empty() {
                            0
                        } else {
                            match get_val(&inst.arg2, &env, &local_vars) {
                                Some(v) => v,
                                None => return None,
                            }
                        };
                        if let Some(v) = memory.get(&id).and_then(|m| m.get(&offset)) {
                            env.insert(inst.result.as_temp(), *v);
                        } else if offset == 0 {
                            if let Some(v) = local_vars.get(&id) {
                                env.insert(inst.result.as_temp(), *v);
                            } else {
                                return None;
                            }
                        } else {
                            return None;
                        }
                    }
                    Opcode::Store => {
                        let Operand::Variable(sym) = &inst.arg2 else { return None };
                        let base_id = sym.id;
                        let is_local_scalar = local_vars.contains_key(&base_id) && inst.result.is_empty();
                        if !local_allocas.contains(&base_id) && !is_local_scalar {
                            return None;
                        }
                        let Some(value) = get_val(&inst.arg1, &env, &local_vars) else {
                            return None;
                        };
                        let offset = if inst.result.is_empty() {
                            0
                        } else {
                            match get_val(&inst.result, &env, &local_vars) {
                                Some(v) => v,
                                None => return None,
                            }
                        };
                        memory.entry(base_id).or_default().insert(offset, value);
                        if offset == 0 {
                            local_vars.insert(base_id, value);
                        }
                    }
                    Opcode::Return => {
                        let ret = if inst.result.is_empty() {
                            0
                        } else {
                            match get_val(&inst.result, &env, &local_vars) {
                                Some(v) => v,
                                None => return None,
                            }
                        };
                        self.cache.insert(cache_key, ret);
                        return Some(ret);
                    }
                    Opcode::Arg => {
                        let Some(v) = get_val(&inst.arg1, &env, &local_vars) else {
                            return None;
                        };
                        pending_args.push(v);
                    }
                    Opcode::Call => {
                        let Operand::Variable(sym) = &inst.arg2 else { return None };
                        let Some(name) = &sym.global_name else { return None };
                        if name == "getint" || name == "printf" {
                            return None;
                        }
                        let Some(callee) = find_function(snapshot, name) else {
                            return None;
                        };
                        let args_for_call = std::mem::take(&mut pending_args);
                        let Some(result) = self.evaluate(callee, &args_for_call, depth + 1, snapshot) else {
                            return None;
                        };
                        if let Operand::Temporary(t) = &inst.result {
                            env.insert(*t, result);
                        }
                    }
                    Opcode::Goto => {
                        pending_args.clear();
                        match blk.jump_target {
                            Some(target) => {
                                branch = Some(target);
                                break;
                            }
                            None => return None,
                        }
                    }
                    Opcode::If => {
                        pending_args.clear();
                        let Some(cond) = get_val(&inst.arg1, &env, &local_vars) else {
                            return None;
                        };
                        if cond != 0 {
                            let target = blk.jump_target;
                            match target {
                                Some(t) => {
                                    branch = Some(t);
                                    break;
                                }
                                None => return None,
                            }
                        }
                    }
                    _ => {
                        pending_args.clear();
                        if let Operand::Temporary(dst) = &inst.result {
                            if op == Opcode::Assign {
                                let Some(v) = get_val(&inst.arg1, &env, &local_vars) else {
                                    return None;
                                };
                                env.insert(*dst, v);
                                continue;
                            }
                            let Some(v1) = get_val(&inst.arg1, &env, &local_vars) else {
                                return None;
                            };
                            let v2 = if inst.arg2.is_empty() {
                                Some(0)
                            } else {
                                get_val(&inst.arg2, &env, &local_vars)
                            };
                            let Some(v2) = v2 else { return None };
                            let result = match op {
                                Opcode::Add => v1 + v2,
                                Opcode::Sub => v1 - v2,
                                Opcode::Mul => v1 * v2,
                                Opcode::Div => {
                                    if v2 == 0 {
                                        return None;
                                    }
                                    v1 / v2
                                }
                                Opcode::Mod => {
                                    if v2 == 0 {
                                        return None;
                                    }
                                    v1 % v2
                                }
                                Opcode::Neg => -v1,
                                Opcode::Not => (v1 == 0) as i32,
                                Opcode::Eq => (v1 == v2) as i32,
                                Opcode::Neq => (v1 != v2) as i32,
                                Opcode::Lt => (v1 < v2) as i32,
                                Opcode::Le => (v1 <= v2) as i32,
                                Opcode::Gt => (v1 > v2) as i32,
                                Opcode::Ge => (v1 >= v2) as i32,
                                Opcode::And => (v1 != 0 && v2 != 0) as i32,
                                Opcode::Or => (v1 != 0 || v2 != 0) as i32,
                                _ => return None,
                            };
                            env.insert(*dst, result);
                        } else {
                            return None;
                        }
                    }
                }
            }

            match branch {
                Some(target) => {
                    prev = Some(bb);
                    current = Some(target);
                }
                None => {
                    prev = Some(bb);
                    current = blk.next;
                }
            }
        }

        None
    }
}

fn get_val(op: &Operand, env: &HashMap<crate::ir::Temp, i32>, local_vars: &HashMap<u32, i32>) -> Option<i32> {
    match op {
        Operand::ConstantInt(v) => Some(*v),
        Operand::Temporary(t) => env.get(t).copied(),
        Operand::Variable(sym) => local_vars.get(&sym.id).copied(),
        _ => None,
    }
}

fn find_function<'a>(functions: &'a [Function], name: &str) -> Option<&'a Function> {
    functions.iter().find(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Instruction, Type};

    fn tmp(n: u32) -> crate::ir::Temp {
        cranelift_entity::EntityRef::new(n as usize)
    }

    /// `int five() { return 5; }` called as `five()` with no arguments folds
    /// to the constant `5`.
    #[test]
    fn nullary_constant_function_folds() {
        let callee = Function::from_flat_instructions(
            "five",
            Type::Basic,
            vec![],
            vec![Instruction::return_(Operand::ConstantInt(5))],
        );

        let callee_sym = std::rc::Rc::new(
            crate::ir::Symbol::new(0, "five", Type::function(Type::Basic, vec![])).with_global_name("five"),
        );
        let res = Operand::Temporary(tmp(0));
        let caller = Function::from_flat_instructions(
            "main",
            Type::Basic,
            vec![],
            vec![
                Instruction::call(0, Operand::Variable(callee_sym), res.clone()),
                Instruction::return_(res),
            ],
        );

        let mut eval = GlobalConstEval::new();
        let mut functions = vec![callee, caller];
        let changed = eval.run(&mut functions);
        assert!(changed);
        let rewritten = &functions[1];
        let entry = rewritten.entry();
        assert_eq!(rewritten.blocks[entry].insts[0].op, Opcode::Assign);
        assert_eq!(rewritten.blocks[entry].insts[0].arg1, Operand::ConstantInt(5));
    }

    #[test]
    fn io_call_is_never_folded() {
        let callee_sym = std::rc::Rc::new(
            crate::ir::Symbol::new(0, "printf", Type::function(Type::Basic, vec![])).with_global_name("printf"),
        );
        let res = Operand::Temporary(tmp(0));
        let caller = Function::from_flat_instructions(
            "main",
            Type::Basic,
            vec![],
            vec![
                Instruction::call(0, Operand::Variable(callee_sym), res.clone()),
                Instruction::return_(res),
            ],
        );
        let mut eval = GlobalConstEval::new();
        let mut functions = vec![caller];
        assert!(!eval.run(&mut functions));
    }
}
