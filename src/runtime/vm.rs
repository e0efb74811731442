use crate::bytecode::ir::{Constant, Module};
use crate::bytecode::op::Opcode;
use crate::runtime::env::Environment;
use crate::runtime::heap::Heap;
use crate::runtime::value::Value;

/// Activation record of one invoked function.
#[derive(Debug, Clone, Copy)]
struct Frame {
    func: u16,
    ip: usize,
    locals: u16,
    /// Caller's register window start, restored on pop.
    prev_base: usize,
    /// Caller-relative slot that receives this frame's return value.
    ret: u8,
}

/// The register VM.
///
/// All frames share one contiguous register vector whose occupied prefix
/// is partitioned by the frame stack: the running frame owns
/// `[base, top)` and the region from `top` up stages the next callee's
/// arguments. The vector grows on demand and never shrinks while
/// executing.
///
/// Execution halts when the outermost frame returns; the value of its
/// final `RetVal` is exposed as `last_return`. The VM performs no type
/// checking of its own: the checker proved the program and each typed
/// opcode reads the register payload it expects.
pub struct Vm {
    env: Environment,
    heap: Heap,
    registers: Vec<Value>,
    frames: Vec<Frame>,
    base: usize,
    top: usize,
    last_return: Value,
}

impl Vm {
    pub fn new(env: Environment) -> Vm {
        Vm {
            env,
            heap: Heap::new(),
            registers: Vec::new(),
            frames: Vec::new(),
            base: 0,
            top: 0,
            last_return: Value::zero(),
        }
    }

    /// Value returned by the outermost frame of the last execution.
    pub fn last_return(&self) -> Value {
        self.last_return
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Materializes the constant pool for this VM: unboxed constants
    /// become immediate values, string constants become cells in this
    /// VM's own heap. One pool slot maps to one cell, so interned string
    /// literals keep pointer equality at runtime.
    fn link_constants(&mut self, module: &Module) -> Vec<Value> {
        module
            .constants
            .iter()
            .map(|constant| match constant {
                Constant::Int(v) => Value::Int(*v),
                Constant::Number(n) => Value::Number(*n),
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Str(s) => Value::Cell(self.heap.alloc_string(s)),
            })
            .collect()
    }

    fn push_frame(&mut self, module: &Module, id: u16, ret: u8) {
        let function = module.function(id);
        self.frames.push(Frame {
            func: id,
            ip: 0,
            locals: function.locals_count,
            prev_base: self.base,
            ret,
        });
        let needed = self.top + function.locals_count as usize;
        if self.registers.len() < needed {
            self.registers.resize(needed, Value::zero());
        }
        self.base = self.top;
        self.top = needed;
    }

    /// Pops the running frame, restoring the caller's register window.
    fn pop_frame(&mut self) -> Frame {
        let popped = self.frames.pop().expect("a frame is running");
        if let Some(caller) = self.frames.last() {
            self.base = popped.prev_base;
            self.top = self.base + caller.locals as usize;
        }
        popped
    }

    fn reg(&self, slot: u8) -> Value {
        self.registers[self.base + slot as usize]
    }

    fn set_reg(&mut self, slot: u8, value: Value) {
        self.registers[self.base + slot as usize] = value;
    }

    /// Executes the module's `main` function to completion.
    pub fn exec(&mut self, module: &Module) {
        let constants = self.link_constants(module);
        let main = module
            .function_id("main")
            .expect("module defines a 'main' function");

        self.frames.clear();
        self.base = 0;
        self.top = 0;
        self.push_frame(module, main, 0);

        loop {
            let (func, ip) = {
                let frame = self.frames.last_mut().expect("a frame is running");
                let ip = frame.ip;
                frame.ip += 1;
                (frame.func, ip)
            };
            let inst = module.function(func).code[ip];
            let (a, b, c) = (inst.a, inst.b, inst.c);

            match inst.op {
                Opcode::Br => {
                    self.frames.last_mut().expect("a frame is running").ip = inst.s() as usize;
                }
                Opcode::CondBr => {
                    // branch-if-zero polarity
                    if self.reg(a).is_zero() {
                        self.frames.last_mut().expect("a frame is running").ip =
                            inst.s() as usize;
                    }
                }
                Opcode::Call => {
                    self.push_frame(module, inst.s(), a);
                }
                Opcode::CallHost => {
                    let nargs = a as usize;
                    let host = self.env.host_fn(inst.s());
                    let args: Vec<Value> =
                        self.registers[self.top..self.top + nargs].to_vec();
                    host(self, &args);
                }
                Opcode::Arg => {
                    // stage at the callee's future base, growing as needed
                    let at = self.top + a as usize;
                    if self.registers.len() <= at {
                        self.registers.resize(at + 1, Value::zero());
                    }
                    self.registers[at] = self.reg(b);
                }
                Opcode::RetVal => {
                    let value = self.reg(a);
                    self.last_return = value;
                    let popped = self.pop_frame();
                    if self.frames.is_empty() {
                        return;
                    }
                    self.registers[self.base + popped.ret as usize] = value;
                }
                Opcode::Ret => {
                    self.pop_frame();
                    if self.frames.is_empty() {
                        return;
                    }
                }
                Opcode::Move => {
                    self.set_reg(a, self.reg(b));
                }
                Opcode::ObjectNew => {
                    let cell = self.heap.alloc_object();
                    self.set_reg(a, Value::Cell(cell));
                }
                Opcode::ObjectSet => {
                    match self.reg(a).as_cell() {
                        Some(cell) => {
                            let key = self.reg(b).as_int();
                            self.heap.object_set(cell, key, self.reg(c));
                        }
                        None => debug_assert!(false, "ObjectSet on a non-cell register"),
                    }
                }
                Opcode::ObjectGet => {
                    let value = match self.reg(b).as_cell() {
                        Some(cell) => self.heap.object_get(cell, self.reg(c).as_int()),
                        None => {
                            debug_assert!(false, "ObjectGet on a non-cell register");
                            Value::zero()
                        }
                    };
                    self.set_reg(a, value);
                }
                Opcode::NumberAdd => self.number_op(a, b, c, |x, y| x + y),
                Opcode::NumberSub => self.number_op(a, b, c, |x, y| x - y),
                Opcode::NumberMul => self.number_op(a, b, c, |x, y| x * y),
                Opcode::NumberDiv => self.number_op(a, b, c, |x, y| x / y),
                Opcode::NumberEq => self.number_cmp(a, b, c, |x, y| x == y),
                Opcode::NumberNotEq => self.number_cmp(a, b, c, |x, y| x != y),
                Opcode::NumberGr => self.number_cmp(a, b, c, |x, y| x > y),
                Opcode::NumberLess => self.number_cmp(a, b, c, |x, y| x < y),
                Opcode::NumberGrEq => self.number_cmp(a, b, c, |x, y| x >= y),
                Opcode::NumberLessEq => self.number_cmp(a, b, c, |x, y| x <= y),
                Opcode::IntAdd => self.int_op(a, b, c, |x, y| x + y),
                Opcode::IntSub => self.int_op(a, b, c, |x, y| x - y),
                Opcode::IntMul => self.int_op(a, b, c, |x, y| x * y),
                Opcode::IntDiv => self.int_op(a, b, c, |x, y| x / y),
                Opcode::IntEq => self.int_cmp(a, b, c, |x, y| x == y),
                Opcode::IntNotEq => self.int_cmp(a, b, c, |x, y| x != y),
                Opcode::IntGr => self.int_cmp(a, b, c, |x, y| x > y),
                Opcode::IntLess => self.int_cmp(a, b, c, |x, y| x < y),
                Opcode::IntGrEq => self.int_cmp(a, b, c, |x, y| x >= y),
                Opcode::IntLessEq => self.int_cmp(a, b, c, |x, y| x <= y),
                Opcode::Convert => {
                    let value = self.reg(b).as_int();
                    self.set_reg(a, Value::Number(value as f64));
                }
                Opcode::Truncate => {
                    let value = self.reg(b).as_number();
                    self.set_reg(a, Value::Int(value as i64));
                }
                Opcode::LoadConst => {
                    self.set_reg(a, constants[inst.s() as usize]);
                }
            }
        }
    }

    fn int_op(&mut self, a: u8, b: u8, c: u8, op: fn(i64, i64) -> i64) {
        let result = op(self.reg(a).as_int(), self.reg(b).as_int());
        self.set_reg(c, Value::Int(result));
    }

    fn int_cmp(&mut self, a: u8, b: u8, c: u8, op: fn(i64, i64) -> bool) {
        let result = op(self.reg(a).as_int(), self.reg(b).as_int());
        self.set_reg(c, Value::Bool(result));
    }

    fn number_op(&mut self, a: u8, b: u8, c: u8, op: fn(f64, f64) -> f64) {
        let result = op(self.reg(a).as_number(), self.reg(b).as_number());
        self.set_reg(c, Value::Number(result));
    }

    fn number_cmp(&mut self, a: u8, b: u8, c: u8, op: fn(f64, f64) -> bool) {
        let result = op(self.reg(a).as_number(), self.reg(b).as_number());
        self.set_reg(c, Value::Bool(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::builder::{FunctionBuilder, ModuleBuilder};
    use crate::bytecode::compile;
    use crate::frontend::{checker, parser::Parser};
    use crate::runtime::heap::Cell;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    /// Builds a module with a single hand-written `main`.
    fn build_main(build: impl FnOnce(&mut FunctionBuilder<'_, '_>)) -> Module {
        let env = Environment::new();
        let mut module = ModuleBuilder::new(&env);
        let mut builder = module.new_function("main");
        build(&mut builder);
        let function = builder.finish();
        module.add_function(function);
        module.finish()
    }

    fn run_main(build: impl FnOnce(&mut FunctionBuilder<'_, '_>)) -> Value {
        let module = build_main(build);
        let mut vm = Vm::new(Environment::new());
        vm.exec(&module);
        vm.last_return()
    }

    fn host_env() -> Environment {
        let mut env = Environment::new();
        env.add_host_func("print", |_, _| {});
        env.add_host_func("assert", |_, _| {});
        env
    }

    /// Full pipeline: parse, check, lower, execute `main`.
    fn run_source_with(source: &str, env: Environment) -> Vm {
        let check_env = host_env();
        let mut ast = Parser::new(source).parse_module().unwrap();
        checker::check(&mut ast, &check_env).unwrap();
        let module = compile::compile(&ast, &check_env);
        let mut vm = Vm::new(env);
        vm.exec(&module);
        vm
    }

    fn run_source(source: &str) -> Value {
        run_source_with(source, host_env()).last_return()
    }

    #[test]
    fn test_integer_add() {
        let result = run_main(|b| {
            let lhs = b.alloc_temp();
            let rhs = b.alloc_temp();
            let out = b.alloc_temp();
            b.load_const(lhs, Constant::Int(10));
            b.load_const(rhs, Constant::Int(20));
            b.binary(Opcode::IntAdd, lhs, rhs, out);
            b.ret_val(out);
        });
        assert_eq!(result, Value::Int(30));
    }

    #[test]
    fn test_integer_equality() {
        let result = run_main(|b| {
            let lhs = b.alloc_temp();
            let rhs = b.alloc_temp();
            let out = b.alloc_temp();
            b.load_const(lhs, Constant::Int(10));
            b.load_const(rhs, Constant::Int(10));
            b.binary(Opcode::IntEq, lhs, rhs, out);
            b.ret_val(out);
        });
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn test_integer_inequality() {
        let result = run_main(|b| {
            let lhs = b.alloc_temp();
            let rhs = b.alloc_temp();
            let out = b.alloc_temp();
            b.load_const(lhs, Constant::Int(10));
            b.load_const(rhs, Constant::Int(10));
            b.binary(Opcode::IntNotEq, lhs, rhs, out);
            b.ret_val(out);
        });
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn test_forward_branch_skips_an_add() {
        // two adds, the branch skips the first: 10 + 10
        let result = run_main(|b| {
            let lhs = b.alloc_temp();
            let rhs = b.alloc_temp();
            b.load_const(lhs, Constant::Int(10));
            let label = b.new_label();
            b.br(label);
            b.load_const(rhs, Constant::Int(10));
            b.binary(Opcode::IntAdd, lhs, rhs, lhs);
            b.mark_label(label);
            b.load_const(rhs, Constant::Int(10));
            b.binary(Opcode::IntAdd, lhs, rhs, lhs);
            b.ret_val(lhs);
        });
        assert_eq!(result, Value::Int(20));
    }

    #[test]
    fn test_condbr_does_not_branch_on_true() {
        // condition true => fall through => both adds run
        let result = run_main(|b| {
            let lhs = b.alloc_temp();
            let rhs = b.alloc_temp();
            b.load_const(lhs, Constant::Int(10));
            let label = b.new_label();
            b.load_const(rhs, Constant::Bool(true));
            b.condbr(rhs, label);
            b.load_const(rhs, Constant::Int(10));
            b.binary(Opcode::IntAdd, lhs, rhs, lhs);
            b.mark_label(label);
            b.load_const(rhs, Constant::Int(10));
            b.binary(Opcode::IntAdd, lhs, rhs, lhs);
            b.ret_val(lhs);
        });
        assert_eq!(result, Value::Int(30));
    }

    #[test]
    fn test_condbr_branches_on_false() {
        // condition false => branch taken => first add skipped
        let result = run_main(|b| {
            let lhs = b.alloc_temp();
            let rhs = b.alloc_temp();
            b.load_const(lhs, Constant::Int(10));
            let label = b.new_label();
            b.load_const(rhs, Constant::Bool(false));
            b.condbr(rhs, label);
            b.load_const(rhs, Constant::Int(10));
            b.binary(Opcode::IntAdd, lhs, rhs, lhs);
            b.mark_label(label);
            b.load_const(rhs, Constant::Int(10));
            b.binary(Opcode::IntAdd, lhs, rhs, lhs);
            b.ret_val(lhs);
        });
        assert_eq!(result, Value::Int(20));
    }

    #[test]
    fn test_number_arithmetic_and_comparison() {
        let result = run_main(|b| {
            let lhs = b.alloc_temp();
            let rhs = b.alloc_temp();
            let out = b.alloc_temp();
            b.load_const(lhs, Constant::Number(1.5));
            b.load_const(rhs, Constant::Number(2.0));
            b.binary(Opcode::NumberMul, lhs, rhs, out);
            b.ret_val(out);
        });
        assert_eq!(result, Value::Number(3.0));

        let result = run_main(|b| {
            let lhs = b.alloc_temp();
            let rhs = b.alloc_temp();
            let out = b.alloc_temp();
            b.load_const(lhs, Constant::Number(1.5));
            b.load_const(rhs, Constant::Number(2.0));
            b.binary(Opcode::NumberLess, lhs, rhs, out);
            b.ret_val(out);
        });
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn test_convert_and_truncate() {
        let result = run_main(|b| {
            let a = b.alloc_temp();
            let n = b.alloc_temp();
            b.load_const(a, Constant::Int(7));
            b.insert(crate::bytecode::op::Inst::abc(Opcode::Convert, n, a, 0));
            b.ret_val(n);
        });
        assert_eq!(result, Value::Number(7.0));

        let result = run_main(|b| {
            let a = b.alloc_temp();
            let n = b.alloc_temp();
            b.load_const(a, Constant::Number(7.9));
            b.insert(crate::bytecode::op::Inst::abc(Opcode::Truncate, n, a, 0));
            b.ret_val(n);
        });
        assert_eq!(result, Value::Int(7));
    }

    #[test]
    fn test_objects_store_and_default_to_zero() {
        let result = run_main(|b| {
            let obj = b.alloc_temp();
            let key = b.alloc_temp();
            let val = b.alloc_temp();
            b.object_new(obj);
            b.load_const(key, Constant::Int(3));
            b.load_const(val, Constant::Int(99));
            b.object_set(obj, key, val);
            b.object_get(val, obj, key);
            b.ret_val(val);
        });
        assert_eq!(result, Value::Int(99));

        let result = run_main(|b| {
            let obj = b.alloc_temp();
            let key = b.alloc_temp();
            let val = b.alloc_temp();
            b.object_new(obj);
            b.load_const(key, Constant::Int(3));
            b.object_get(val, obj, key);
            b.ret_val(val);
        });
        assert_eq!(result, Value::zero());
    }

    #[test]
    fn test_call_threads_the_return_value() {
        // main: r0 = 21; arg 0, r0; call double -> r1; ret r1
        let env = Environment::new();
        let mut module = ModuleBuilder::new(&env);
        module.function_id("main");
        module.function_id("double");

        let mut main = module.new_function("main");
        let x = main.alloc_temp();
        let out = main.alloc_temp();
        main.load_const(x, Constant::Int(21));
        main.arg(0, x);
        main.call("double", 1, out);
        main.ret_val(out);
        let main = main.finish();
        module.add_function(main);

        let mut double = module.new_function("double");
        double.reserve_named(1);
        double.push_scope();
        let param = double.create_local("x");
        let out = double.alloc_temp();
        double.binary(Opcode::IntAdd, param, param, out);
        double.ret_val(out);
        let double = double.finish();
        module.add_function(double);

        let mut vm = Vm::new(Environment::new());
        vm.exec(&module.finish());
        assert_eq!(vm.last_return(), Value::Int(42));
    }

    #[test]
    fn test_host_trampoline_receives_staged_arguments() {
        static SUM: AtomicI64 = AtomicI64::new(0);
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        fn record(_vm: &mut Vm, args: &[Value]) {
            CALLS.fetch_add(1, Ordering::SeqCst);
            SUM.store(
                args.iter().map(|v| v.as_int()).sum::<i64>(),
                Ordering::SeqCst,
            );
        }

        let mut build_env = Environment::new();
        build_env.add_host_func("record", record);
        let mut module = ModuleBuilder::new(&build_env);
        let mut main = module.new_function("main");
        let a = main.alloc_temp();
        let b = main.alloc_temp();
        main.load_const(a, Constant::Int(40));
        main.load_const(b, Constant::Int(2));
        main.arg(0, a);
        main.arg(1, b);
        main.call("record", 2, 0);
        let main = main.finish();
        module.add_function(main);
        let module = module.finish();

        let mut exec_env = Environment::new();
        exec_env.add_host_func("record", record);
        let mut vm = Vm::new(exec_env);
        vm.exec(&module);

        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(SUM.load(Ordering::SeqCst), 42);
    }

    // Full-pipeline scenarios

    #[test]
    fn test_while_loop_counts_to_five() {
        let result = run_source(
            "func main() int { let a = 1; while a < 5 { a = a + 1; } return a; }",
        );
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn test_if_else_picks_the_right_branch() {
        let result = run_source(
            "func main() int { let a = 2; if a == 1 { return 10; } else { return 20; } }",
        );
        assert_eq!(result, Value::Int(20));

        let result = run_source(
            "func main() int { let a = 1; if a == 1 { return 10; } else { return 20; } }",
        );
        assert_eq!(result, Value::Int(10));
    }

    #[test]
    fn test_else_if_chain() {
        let result = run_source(
            "func classify(a: int) int { \
               if a < 10 { return 1; } else if a < 20 { return 2; } else { return 3; } \
             } \
             func main() int { return classify(15); }",
        );
        assert_eq!(result, Value::Int(2));
    }

    #[test]
    fn test_function_calls_and_recursion() {
        let result = run_source(
            "func fib(n: int) int { \
               if n < 2 { return n; } \
               return fib(n - 1) + fib(n - 2); \
             } \
             func main() int { return fib(10); }",
        );
        assert_eq!(result, Value::Int(55));
    }

    #[test]
    fn test_nested_call_in_a_later_argument() {
        // the inner call must not clobber the outer call's staged block
        let result = run_source(
            "func g(x: int) int { return x * 10; } \
             func f(a: int, b: int) int { return a + b; } \
             func main() int { return f(1, g(2)); }",
        );
        assert_eq!(result, Value::Int(21));
    }

    #[test]
    fn test_register_window_is_restored_across_calls() {
        // caller locals survive the callee, and repeated calls in a loop
        // keep the partition intact
        let result = run_source(
            "func one() int { let x = 100; let y = 200; return 1; } \
             func main() int { \
               let total = 0; \
               let i = 0; \
               while i < 50 { total = total + one(); i = i + 1; } \
               return total; \
             }",
        );
        assert_eq!(result, Value::Int(50));
    }

    #[test]
    fn test_shadowed_locals_get_their_own_slots() {
        // the inner `a` takes writes, the outer one is untouched
        let result = run_source(
            "func main() int { let a = 1; if a == 1 { let a = 10; a = a + 1; } return a; }",
        );
        assert_eq!(result, Value::Int(1));
    }

    #[test]
    fn test_arrays_end_to_end() {
        let result = run_source(
            "func main() int { \
               let xs = [10, 20, 30]; \
               xs[1] = xs[1] + 5; \
               return xs[0] + xs[1] + xs[2]; \
             }",
        );
        assert_eq!(result, Value::Int(65));
    }

    #[test]
    fn test_out_of_bounds_index_reads_zero() {
        let result = run_source("func main() int { let xs = [1]; return xs[9]; }");
        assert_eq!(result, Value::Int(0));
    }

    #[test]
    fn test_number_program() {
        let result = run_source(
            "func main() number { let x = 1.5; let y = x * 2.0; return y - 0.5; }",
        );
        assert_eq!(result, Value::Number(2.5));
    }

    #[test]
    fn test_string_constants_live_in_the_vm_heap() {
        let vm = run_source_with("func main() string { return \"hi\"; }", host_env());
        let cell = vm.last_return().as_cell().unwrap();
        match vm.heap().cell(cell) {
            Cell::Str(s) => assert_eq!(s, "hi"),
            other => panic!("expected a string cell, got {:?}", other),
        }
    }

    #[test]
    fn test_interned_string_literals_compare_equal() {
        let result = run_source("func main() bool { return \"a\" == \"a\"; }");
        assert_eq!(result, Value::Bool(true));
        let result = run_source("func main() bool { return \"a\" == \"b\"; }");
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn test_bool_comparison_uses_integer_payload() {
        let result = run_source(
            "func main() bool { let t = 1 == 1; let f = 1 == 2; return t == f; }",
        );
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn test_module_is_shareable_across_vm_instances() {
        let env = host_env();
        let mut ast = Parser::new("func main() string { return \"shared\"; }")
            .parse_module()
            .unwrap();
        checker::check(&mut ast, &env).unwrap();
        let module = compile::compile(&ast, &env);

        for _ in 0..2 {
            let mut vm = Vm::new(host_env());
            vm.exec(&module);
            let cell = vm.last_return().as_cell().unwrap();
            match vm.heap().cell(cell) {
                Cell::Str(s) => assert_eq!(s, "shared"),
                other => panic!("expected a string cell, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_void_main_leaves_zero_behind() {
        let result = run_source("func main() { let a = 1; }");
        assert_eq!(result, Value::zero());
    }

    #[test]
    fn test_archived_module_executes() {
        let env = host_env();
        let mut ast = Parser::new("func main() int { return 6 * 7; }")
            .parse_module()
            .unwrap();
        checker::check(&mut ast, &env).unwrap();
        let module = compile::compile(&ast, &env);

        let bytes = module.to_bytes().unwrap();
        let loaded = Module::from_bytes(&bytes).unwrap();
        let mut vm = Vm::new(host_env());
        vm.exec(&loaded);
        assert_eq!(vm.last_return(), Value::Int(42));
    }
}
