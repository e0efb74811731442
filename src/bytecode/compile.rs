use crate::bytecode::builder::{FunctionBuilder, ModuleBuilder};
use crate::bytecode::ir::{Constant, Module};
use crate::bytecode::op::Opcode;
use crate::lang::ast::{
    AssignExpr, BinaryOp, BlockStmt, Expr, ExprKind, Func, Stmt,
};
use crate::lang::types::Type;
use crate::runtime::env::Environment;

/// Lowers a checked module to bytecode.
///
/// Codegen is infallible: the checker has already proven the program,
/// and any inconsistency found here is a bug in the compiler itself.
pub fn compile(module: &crate::lang::ast::Module, env: &Environment) -> Module {
    let mut builder = ModuleBuilder::new(env);

    // register every function name first so calls resolve against the
    // module before the host namespace, forward references included
    for func in &module.funcs {
        builder.function_id(&func.name);
    }

    for func in &module.funcs {
        let generated = FuncGen {
            builder: builder.new_function(&func.name),
        }
        .generate(func);
        builder.add_function(generated);
    }

    builder.finish()
}

struct FuncGen<'m, 'e> {
    builder: FunctionBuilder<'m, 'e>,
}

impl<'m, 'e> FuncGen<'m, 'e> {
    fn generate(mut self, func: &Func) -> crate::bytecode::ir::Function {
        // named locals occupy the low slots: parameters first, then every
        // declaration in source order; temporaries live above them
        let named = func.params.len() + count_decls_block(&func.body);
        self.builder.reserve_named(named);

        self.builder.push_scope();
        for param in &func.params {
            self.builder.create_local(&param.name);
        }
        self.block(&func.body);
        self.builder.pop_scope();
        self.builder.finish()
    }

    fn block(&mut self, block: &BlockStmt) {
        self.builder.push_scope();
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
        self.builder.pop_scope();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::If(s) => {
                // CondBr jumps on false/zero, past the then-branch
                let else_or_end = self.builder.new_label();
                let cond = self.expr(&s.condition, None);
                self.builder.condbr(cond, else_or_end);
                self.builder.free_temp(cond);

                self.stmt(&s.then_body);
                match &s.else_body {
                    Some(else_body) => {
                        let end = self.builder.new_label();
                        self.builder.br(end);
                        self.builder.mark_label(else_or_end);
                        self.stmt(else_body);
                        self.builder.mark_label(end);
                    }
                    None => self.builder.mark_label(else_or_end),
                }
            }
            Stmt::While(s) => {
                let start = self.builder.new_label();
                let end = self.builder.new_label();
                self.builder.mark_label(start);
                let cond = self.expr(&s.condition, None);
                self.builder.condbr(cond, end);
                self.builder.free_temp(cond);

                self.stmt(&s.body);
                self.builder.br(start);
                self.builder.mark_label(end);
            }
            Stmt::For(_) => {}
            Stmt::Return(s) => match &s.value {
                Some(value) => {
                    let reg = self.expr(value, None);
                    self.builder.ret_val(reg);
                    self.builder.free_temp(reg);
                }
                None => self.builder.ret(),
            },
            Stmt::VarDecl(s) => {
                let slot = self.builder.create_local(&s.name);
                self.expr(&s.value, Some(slot));
            }
            Stmt::Block(s) => self.block(s),
            Stmt::Expr(s) => {
                let reg = self.expr(&s.expr, None);
                self.builder.free_temp(reg);
            }
        }
    }

    /// Lowers one expression.
    ///
    /// With `into` the result is materialized in that slot and the slot
    /// is returned; without, the result may land in any register, either an
    /// already-bound local when possible, a fresh temporary otherwise.
    /// Callers release returned temporaries with `free_temp`, which
    /// passes named locals through.
    fn expr(&mut self, expr: &Expr, into: Option<u8>) -> u8 {
        match &expr.kind {
            ExprKind::Integer(value) => {
                let dest = self.dest(into);
                self.builder.load_const(dest, Constant::Int(*value));
                dest
            }
            ExprKind::Float(value) => {
                let dest = self.dest(into);
                self.builder.load_const(dest, Constant::Number(*value));
                dest
            }
            ExprKind::Str(value) => {
                let dest = self.dest(into);
                self.builder.load_const(dest, Constant::Str(value.clone()));
                dest
            }
            ExprKind::Identifier(name) => {
                let slot = self.local(name);
                match into {
                    Some(dest) if dest != slot => {
                        self.builder.mov(dest, slot);
                        dest
                    }
                    Some(dest) => dest,
                    None => slot,
                }
            }
            ExprKind::Binary(binary) => {
                let lhs = self.expr(&binary.lhs, None);
                let rhs = self.expr(&binary.rhs, None);
                let dest = self.dest(into);
                let operand_ty = binary
                    .lhs
                    .ty
                    .as_ref()
                    .expect("operand typed by the checker");
                self.builder
                    .binary(binary_opcode(binary.op, operand_ty), lhs, rhs, dest);
                self.free_unless(lhs, dest);
                self.free_unless(rhs, dest);
                dest
            }
            ExprKind::Assign(assign) => self.assign(assign, into),
            ExprKind::Lookup(lookup) => {
                let base = self.expr(&lookup.base, None);
                let index = self.expr(&lookup.index, None);
                let dest = self.dest(into);
                self.builder.object_get(dest, base, index);
                self.free_unless(base, dest);
                self.free_unless(index, dest);
                dest
            }
            ExprKind::Call(call) => {
                let dest = self.dest(into);
                // evaluate every argument before staging any of them; a
                // call nested in a later argument would overwrite an
                // already-staged block
                let mut arg_regs = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    arg_regs.push(self.expr(arg, None));
                }
                for (i, reg) in arg_regs.iter().enumerate() {
                    self.builder.arg(i as u8, *reg);
                }
                for reg in arg_regs {
                    self.free_unless(reg, dest);
                }
                self.builder.call(&call.name, call.args.len() as u8, dest);
                dest
            }
            ExprKind::Array(elements) => {
                let dest = self.dest(into);
                self.builder.object_new(dest);
                let key = self.builder.alloc_temp();
                for (i, element) in elements.iter().enumerate() {
                    self.builder.load_const(key, Constant::Int(i as i64));
                    let value = self.expr(element, None);
                    self.builder.object_set(dest, key, value);
                    self.free_unless(value, dest);
                }
                self.builder.free_temp(key);
                dest
            }
            ExprKind::Object => {
                let dest = self.dest(into);
                self.builder.object_new(dest);
                dest
            }
        }
    }

    /// Assignment evaluates to the assigned value. A simple identifier
    /// target receives the value directly in its slot; a lookup target
    /// becomes an `ObjectSet` store.
    fn assign(&mut self, assign: &AssignExpr, into: Option<u8>) -> u8 {
        match &assign.target.kind {
            ExprKind::Identifier(name) => {
                let slot = self.local(name);
                self.expr(&assign.value, Some(slot));
                match into {
                    Some(dest) if dest != slot => {
                        self.builder.mov(dest, slot);
                        dest
                    }
                    Some(dest) => dest,
                    None => slot,
                }
            }
            ExprKind::Lookup(lookup) => {
                let base = self.expr(&lookup.base, None);
                let index = self.expr(&lookup.index, None);
                let dest = self.dest(into);
                self.expr(&assign.value, Some(dest));
                self.builder.object_set(base, index, dest);
                self.free_unless(base, dest);
                self.free_unless(index, dest);
                dest
            }
            _ => unreachable!("assignment target validated by the checker"),
        }
    }

    fn dest(&mut self, into: Option<u8>) -> u8 {
        into.unwrap_or_else(|| self.builder.alloc_temp())
    }

    fn free_unless(&mut self, reg: u8, keep: u8) {
        if reg != keep {
            self.builder.free_temp(reg);
        }
    }

    fn local(&self, name: &str) -> u8 {
        self.builder
            .get_local(name)
            .expect("identifier bound by the checker")
    }
}

/// Selects the typed opcode for a binary operation from the statically
/// known type of its left operand. Non-numeric comparison operands
/// (bools, cells) carry their payload in the integer field and use the
/// integer comparison family.
fn binary_opcode(op: BinaryOp, operand: &Type) -> Opcode {
    let number = matches!(operand, Type::Number);
    match op {
        BinaryOp::Add if number => Opcode::NumberAdd,
        BinaryOp::Subtract if number => Opcode::NumberSub,
        BinaryOp::Multiply if number => Opcode::NumberMul,
        BinaryOp::Divide if number => Opcode::NumberDiv,
        BinaryOp::Equal if number => Opcode::NumberEq,
        BinaryOp::NotEqual if number => Opcode::NumberNotEq,
        BinaryOp::LessThan if number => Opcode::NumberLess,
        BinaryOp::GreaterThan if number => Opcode::NumberGr,
        BinaryOp::LessThanEqual if number => Opcode::NumberLessEq,
        BinaryOp::GreaterThanEqual if number => Opcode::NumberGrEq,
        BinaryOp::Add => Opcode::IntAdd,
        BinaryOp::Subtract => Opcode::IntSub,
        BinaryOp::Multiply => Opcode::IntMul,
        BinaryOp::Divide => Opcode::IntDiv,
        BinaryOp::Equal => Opcode::IntEq,
        BinaryOp::NotEqual => Opcode::IntNotEq,
        BinaryOp::LessThan => Opcode::IntLess,
        BinaryOp::GreaterThan => Opcode::IntGr,
        BinaryOp::LessThanEqual => Opcode::IntLessEq,
        BinaryOp::GreaterThanEqual => Opcode::IntGrEq,
    }
}

fn count_decls_block(block: &BlockStmt) -> usize {
    block.stmts.iter().map(count_decls_stmt).sum()
}

fn count_decls_stmt(stmt: &Stmt) -> usize {
    match stmt {
        Stmt::VarDecl(_) => 1,
        Stmt::If(s) => {
            count_decls_stmt(&s.then_body)
                + s.else_body.as_ref().map_or(0, count_decls_stmt)
        }
        Stmt::While(s) => count_decls_stmt(&s.body),
        Stmt::Block(s) => count_decls_block(s),
        // `for` bodies are not lowered
        Stmt::For(_) | Stmt::Return(_) | Stmt::Expr(_) => 0,
    }
}
