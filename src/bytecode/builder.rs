use std::collections::{BTreeMap, HashMap};

use crate::bytecode::ir::{Constant, Function, Module};
use crate::bytecode::op::{Inst, Opcode};
use crate::runtime::env::Environment;

/// Symbolic branch target. Branch emitters store the label index in the
/// instruction's short operand; `FunctionBuilder::finish` rewrites every
/// branch to the marked instruction offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u16);

const UNMARKED: u16 = u16::MAX;

/// Accumulates the functions, name table and constant pool of a module
/// under construction.
///
/// Function ids are handed out on first mention, so calls can be emitted
/// to functions whose bodies have not been generated yet.
pub struct ModuleBuilder<'e> {
    env: &'e Environment,
    functions: Vec<Option<Function>>,
    name_table: HashMap<String, u16>,
    constants: Vec<Constant>,
}

impl<'e> ModuleBuilder<'e> {
    pub fn new(env: &'e Environment) -> Self {
        ModuleBuilder {
            env,
            functions: Vec::new(),
            name_table: HashMap::new(),
            constants: Vec::new(),
        }
    }

    /// Id of the named function, registering it if unseen.
    pub fn function_id(&mut self, name: &str) -> u16 {
        if let Some(&id) = self.name_table.get(name) {
            return id;
        }
        let id = self.functions.len() as u16;
        self.functions.push(None);
        self.name_table.insert(name.to_string(), id);
        id
    }

    /// Id of the named function if it has been registered. Unlike
    /// `function_id` this never registers, so it distinguishes module
    /// functions from host functions during call resolution.
    pub fn lookup_function(&self, name: &str) -> Option<u16> {
        self.name_table.get(name).copied()
    }

    pub fn new_function(&mut self, name: &str) -> FunctionBuilder<'_, 'e> {
        self.function_id(name);
        FunctionBuilder {
            function: Function {
                name: name.to_string(),
                code: Vec::new(),
                locals_count: 0,
            },
            module: self,
            labels: Vec::new(),
            scopes: Vec::new(),
            temps: BTreeMap::new(),
            reserved_named: 0,
            next_named: 0,
            next_temp: 0,
        }
    }

    pub fn add_function(&mut self, function: Function) {
        let id = self.function_id(&function.name);
        self.functions[id as usize] = Some(function);
    }

    /// Interns `constant`: identical values share one pool slot.
    pub fn intern_constant(&mut self, constant: Constant) -> u16 {
        for (i, existing) in self.constants.iter().enumerate() {
            if *existing == constant {
                return i as u16;
            }
        }
        let idx = self.constants.len() as u16;
        self.constants.push(constant);
        idx
    }

    pub fn finish(self) -> Module {
        let functions = self
            .functions
            .into_iter()
            .enumerate()
            .map(|(id, function)| match function {
                Some(function) => function,
                None => panic!("function id {} was referenced but never added", id),
            })
            .collect();
        Module {
            functions,
            name_table: self.name_table,
            constants: self.constants,
        }
    }
}

/// Builds one function's register file and instruction stream.
///
/// Register slots `0..reserved_named` belong to named locals (parameters
/// first, then declarations in source order); everything above is
/// temporary space managed by a free list. `locals_count` ends up as the
/// high-water mark of both.
pub struct FunctionBuilder<'m, 'e> {
    module: &'m mut ModuleBuilder<'e>,
    function: Function,
    labels: Vec<u16>,
    scopes: Vec<HashMap<String, u8>>,
    /// Temporary slot -> currently in use.
    temps: BTreeMap<u8, bool>,
    reserved_named: u16,
    next_named: u16,
    next_temp: u16,
}

impl<'m, 'e> FunctionBuilder<'m, 'e> {
    // Registers

    /// Fixes the number of named-local slots. Must be called before any
    /// local or temporary is allocated.
    pub fn reserve_named(&mut self, count: usize) {
        assert!(count <= 256, "register file limited to 256 slots");
        assert!(self.next_temp == 0 && self.next_named == 0);
        self.reserved_named = count as u16;
        self.next_temp = count as u16;
    }

    /// Binds `name` to the next named slot in the innermost scope.
    pub fn create_local(&mut self, name: &str) -> u8 {
        assert!(
            self.next_named < self.reserved_named,
            "named local '{}' outside the reserved range",
            name
        );
        let slot = self.next_named as u8;
        self.next_named += 1;
        self.scopes
            .last_mut()
            .expect("a scope is open")
            .insert(name.to_string(), slot);
        slot
    }

    pub fn get_local(&self, name: &str) -> Option<u8> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name)).copied()
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Takes a slot from the free list, or grows the register file.
    pub fn alloc_temp(&mut self) -> u8 {
        let free = self
            .temps
            .iter()
            .find(|(_, in_use)| !**in_use)
            .map(|(&slot, _)| slot);
        if let Some(slot) = free {
            self.temps.insert(slot, true);
            return slot;
        }
        assert!(self.next_temp < 256, "register file limited to 256 slots");
        let slot = self.next_temp as u8;
        self.next_temp += 1;
        self.temps.insert(slot, true);
        slot
    }

    /// Returns `slot` to the free list. Named locals are not temporaries
    /// and pass through untouched.
    pub fn free_temp(&mut self, slot: u8) {
        if let Some(in_use) = self.temps.get_mut(&slot) {
            *in_use = false;
        }
    }

    // Labels

    pub fn new_label(&mut self) -> Label {
        self.labels.push(UNMARKED);
        Label((self.labels.len() - 1) as u16)
    }

    /// Pins `label` to the next emitted instruction.
    pub fn mark_label(&mut self, label: Label) {
        self.labels[label.0 as usize] = self.function.code.len() as u16;
    }

    // Instructions

    pub fn insert(&mut self, inst: Inst) {
        self.function.code.push(inst);
    }

    /// Stages the value of `reg` as argument `index` of the next call.
    pub fn arg(&mut self, index: u8, reg: u8) {
        self.insert(Inst::abc(Opcode::Arg, index, reg, 0));
    }

    /// Emits a call to `name`: a module function if one is registered
    /// under that name (module functions shadow hosts), a host function
    /// otherwise. `dest` receives the return value of a module call and
    /// is ignored for host calls.
    pub fn call(&mut self, name: &str, nargs: u8, dest: u8) {
        if let Some(id) = self.module.lookup_function(name) {
            self.insert(Inst::with_s(Opcode::Call, dest, id));
        } else if let Some(host) = self.module.env.host_id(name) {
            self.insert(Inst::with_s(Opcode::CallHost, nargs, host));
        } else {
            unreachable!("call target '{}' resolved by the checker", name);
        }
    }

    pub fn ret(&mut self) {
        self.insert(Inst::abc(Opcode::Ret, 0, 0, 0));
    }

    pub fn ret_val(&mut self, reg: u8) {
        self.insert(Inst::abc(Opcode::RetVal, reg, 0, 0));
    }

    pub fn br(&mut self, label: Label) {
        self.insert(Inst::with_s(Opcode::Br, 0, label.0));
    }

    /// Branches to `label` when `reg` holds zero/false.
    pub fn condbr(&mut self, reg: u8, label: Label) {
        self.insert(Inst::with_s(Opcode::CondBr, reg, label.0));
    }

    pub fn mov(&mut self, dest: u8, src: u8) {
        self.insert(Inst::abc(Opcode::Move, dest, src, 0));
    }

    pub fn object_new(&mut self, dest: u8) {
        self.insert(Inst::abc(Opcode::ObjectNew, dest, 0, 0));
    }

    pub fn object_set(&mut self, object: u8, key: u8, value: u8) {
        self.insert(Inst::abc(Opcode::ObjectSet, object, key, value));
    }

    pub fn object_get(&mut self, dest: u8, object: u8, key: u8) {
        self.insert(Inst::abc(Opcode::ObjectGet, dest, object, key));
    }

    /// Emits one of the typed three-register arithmetic or comparison
    /// instructions: `dest = lhs ⊕ rhs`.
    pub fn binary(&mut self, op: Opcode, lhs: u8, rhs: u8, dest: u8) {
        debug_assert!(
            (Opcode::NumberAdd as u8..=Opcode::IntLessEq as u8).contains(&(op as u8)),
            "{:?} is not a binary operation",
            op
        );
        self.insert(Inst::abc(op, lhs, rhs, dest));
    }

    /// Materializes a constant into `reg`, interning it in the module
    /// pool.
    pub fn load_const(&mut self, reg: u8, constant: Constant) {
        let idx = self.module.intern_constant(constant);
        self.insert(Inst::with_s(Opcode::LoadConst, reg, idx));
    }

    /// Finalizes the function: guarantees a trailing return and rewrites
    /// branch labels into instruction offsets.
    pub fn finish(mut self) -> Function {
        if !self
            .function
            .code
            .last()
            .is_some_and(|inst| inst.op.is_return())
        {
            self.ret();
        }

        for inst in &mut self.function.code {
            if matches!(inst.op, Opcode::Br | Opcode::CondBr) {
                let offset = self.labels[inst.s() as usize];
                assert!(offset != UNMARKED, "branch to an unmarked label");
                inst.set_s(offset);
            }
        }

        self.function.locals_count = self.next_temp.max(self.next_named);
        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        let mut env = Environment::new();
        env.add_host_func("print", |_, _| {});
        env
    }

    #[test]
    fn test_trailing_ret_is_appended() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let builder = module.new_function("main");
        let function = builder.finish();
        assert_eq!(function.code.len(), 1);
        assert_eq!(function.code[0].op, Opcode::Ret);
    }

    #[test]
    fn test_no_double_return() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let mut builder = module.new_function("main");
        let temp = builder.alloc_temp();
        builder.ret_val(temp);
        let function = builder.finish();
        assert_eq!(function.code.len(), 1);
        assert_eq!(function.code[0].op, Opcode::RetVal);
    }

    #[test]
    fn test_forward_branch_is_patched() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let mut builder = module.new_function("main");
        let temp = builder.alloc_temp();
        let label = builder.new_label();
        builder.br(label);
        builder.load_const(temp, Constant::Int(1));
        builder.mark_label(label);
        builder.ret_val(temp);
        let function = builder.finish();
        assert_eq!(function.code[0].op, Opcode::Br);
        assert_eq!(function.code[0].s(), 2);
    }

    #[test]
    fn test_backward_branch_is_patched() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let mut builder = module.new_function("main");
        let temp = builder.alloc_temp();
        let top = builder.new_label();
        builder.mark_label(top);
        builder.load_const(temp, Constant::Int(1));
        builder.br(top);
        let function = builder.finish();
        assert_eq!(function.code[1].op, Opcode::Br);
        assert_eq!(function.code[1].s(), 0);
    }

    #[test]
    fn test_branch_targets_stay_in_bounds() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let mut builder = module.new_function("main");
        let temp = builder.alloc_temp();
        let end = builder.new_label();
        builder.condbr(temp, end);
        builder.load_const(temp, Constant::Int(1));
        builder.mark_label(end);
        let function = builder.finish();
        for inst in &function.code {
            if matches!(inst.op, Opcode::Br | Opcode::CondBr) {
                assert!((inst.s() as usize) <= function.code.len());
            }
        }
    }

    #[test]
    fn test_temps_are_recycled_from_the_free_list() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let mut builder = module.new_function("main");
        let a = builder.alloc_temp();
        let b = builder.alloc_temp();
        assert_ne!(a, b);
        builder.free_temp(a);
        assert_eq!(builder.alloc_temp(), a);
        let function = builder.finish();
        assert_eq!(function.locals_count, 2);
    }

    #[test]
    fn test_named_locals_sit_below_temporaries() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let mut builder = module.new_function("main");
        builder.reserve_named(2);
        builder.push_scope();
        let a = builder.create_local("a");
        let temp = builder.alloc_temp();
        let b = builder.create_local("b");
        assert_eq!((a, b), (0, 1));
        assert_eq!(temp, 2);
        // freeing a named local is a no-op
        builder.free_temp(a);
        assert_eq!(builder.alloc_temp(), 3);
        let function = builder.finish();
        assert_eq!(function.locals_count, 4);
    }

    #[test]
    fn test_scoped_lookup_prefers_the_innermost_binding() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let mut builder = module.new_function("main");
        builder.reserve_named(2);
        builder.push_scope();
        let outer = builder.create_local("a");
        builder.push_scope();
        let inner = builder.create_local("a");
        assert_eq!(builder.get_local("a"), Some(inner));
        builder.pop_scope();
        assert_eq!(builder.get_local("a"), Some(outer));
        assert_eq!(builder.get_local("missing"), None);
    }

    #[test]
    fn test_constants_are_interned() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let mut builder = module.new_function("main");
        let temp = builder.alloc_temp();
        builder.load_const(temp, Constant::Int(10));
        builder.load_const(temp, Constant::Int(10));
        builder.load_const(temp, Constant::Int(20));
        builder.load_const(temp, Constant::Str("x".to_string()));
        builder.load_const(temp, Constant::Str("x".to_string()));
        let function = builder.finish();
        module.add_function(function);
        let module = module.finish();
        assert_eq!(module.constants.len(), 3);
        for i in 0..module.constants.len() {
            for j in 0..module.constants.len() {
                if i != j {
                    assert_ne!(module.constants[i], module.constants[j]);
                }
            }
        }
    }

    #[test]
    fn test_module_function_shadows_host() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        module.function_id("print");
        let mut builder = module.new_function("main");
        builder.call("print", 0, 0);
        let function = builder.finish();
        assert_eq!(function.code[0].op, Opcode::Call);
    }

    #[test]
    fn test_unregistered_name_calls_the_host() {
        let host = env();
        let mut module = ModuleBuilder::new(&host);
        let mut builder = module.new_function("main");
        builder.call("print", 2, 0);
        let function = builder.finish();
        assert_eq!(function.code[0].op, Opcode::CallHost);
        assert_eq!(function.code[0].a, 2);
    }
}
