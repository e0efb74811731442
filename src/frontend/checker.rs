use std::collections::HashMap;

use crate::frontend::sema_error::SemaError;
use crate::frontend::token::Loc;
use crate::lang::ast::{BlockStmt, Expr, ExprKind, Func, Module, Stmt};
use crate::lang::types::{FunctionType, Type};
use crate::runtime::env::Environment;

/// The type checker.
///
/// One top-down pass per function body annotates every expression with a
/// resolved type or stops at the first `SemaError`. Calls resolve against
/// the module's functions first and the environment's host functions
/// second, so module functions shadow hosts of the same name.
///
/// An optional type hint flows down through expressions (annotation into
/// initializer, parameter type into argument, element type into array
/// elements); its only consumer is the empty array literal, which cannot
/// name its element type on its own.
pub struct Checker<'a> {
    functions: HashMap<String, FunctionType>,
    env: &'a Environment,
    scopes: Vec<HashMap<String, Type>>,
    /// Declared return type of the function being checked.
    ret: Option<Type>,
}

/// Checks a whole module, filling in the `ty` slot of every expression.
pub fn check(module: &mut Module, env: &Environment) -> Result<(), SemaError> {
    let mut checker = Checker {
        functions: HashMap::new(),
        env,
        scopes: Vec::new(),
        ret: None,
    };
    checker.collect_functions(&module.funcs)?;
    for func in &mut module.funcs {
        checker.check_func(func)?;
    }
    Ok(())
}

impl<'a> Checker<'a> {
    /// Records every function signature up front so calls can resolve
    /// forward references, and rejects duplicate names.
    fn collect_functions(&mut self, funcs: &[Func]) -> Result<(), SemaError> {
        for func in funcs {
            let signature = FunctionType {
                params: func.params.iter().map(|p| p.ty.clone()).collect(),
                ret: func.return_type.clone(),
            };
            if self.functions.insert(func.name.clone(), signature).is_some() {
                return Err(SemaError::at(
                    func.loc,
                    format!("function '{}' is already defined", func.name),
                ));
            }
        }
        Ok(())
    }

    fn check_func(&mut self, func: &mut Func) -> Result<(), SemaError> {
        self.ret = func.return_type.clone();
        self.scopes.clear();
        self.push_scope();
        for param in &func.params {
            self.scopes
                .last_mut()
                .expect("a scope is open")
                .insert(param.name.clone(), param.ty.clone());
        }
        let result = self.block(&mut func.body);
        self.pop_scope();
        result
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn find_var(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    // Statements

    fn stmt(&mut self, stmt: &mut Stmt) -> Result<(), SemaError> {
        match stmt {
            Stmt::If(s) => {
                // no bool requirement on the condition
                self.expr(&mut s.condition, None)?;
                self.stmt(&mut s.then_body)?;
                if let Some(else_body) = &mut s.else_body {
                    self.stmt(else_body)?;
                }
                Ok(())
            }
            Stmt::While(s) => {
                self.expr(&mut s.condition, None)?;
                self.stmt(&mut s.body)
            }
            // `for` is accepted by the parser and ignored from here on
            Stmt::For(_) => Ok(()),
            Stmt::Return(s) => self.return_stmt(s.loc, &mut s.value),
            Stmt::VarDecl(s) => {
                let hint = s.annotation.clone();
                self.expr(&mut s.value, hint.as_ref())?;
                let value_ty = self.value_type(&s.value)?;
                // the variable gets the annotated type when there is one
                let ty = match &s.annotation {
                    Some(annotation) => {
                        if !annotation.compare(&value_ty) {
                            return Err(SemaError::at(
                                s.loc,
                                format!(
                                    "cannot initialize '{}' of type {} with a value of type {}",
                                    s.name, annotation, value_ty
                                ),
                            ));
                        }
                        annotation.clone()
                    }
                    None => value_ty,
                };
                // rebinding is an error only within the same scope;
                // shadowing an outer binding in a nested block is fine
                let rebound = self
                    .scopes
                    .last()
                    .is_some_and(|scope| scope.contains_key(&s.name));
                if rebound {
                    return Err(SemaError::at(
                        s.loc,
                        format!("'{}' is already defined", s.name),
                    ));
                }
                self.scopes
                    .last_mut()
                    .expect("a scope is open")
                    .insert(s.name.clone(), ty);
                Ok(())
            }
            Stmt::Block(s) => self.block(s),
            Stmt::Expr(s) => self.expr(&mut s.expr, None),
        }
    }

    fn block(&mut self, block: &mut BlockStmt) -> Result<(), SemaError> {
        self.push_scope();
        for stmt in &mut block.stmts {
            self.stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn return_stmt(&mut self, loc: Loc, value: &mut Option<Expr>) -> Result<(), SemaError> {
        match self.ret.clone() {
            Some(expected) => {
                let value = match value {
                    Some(value) => value,
                    None => {
                        return Err(SemaError::at(loc, "expected a return value"));
                    }
                };
                self.expr(value, Some(&expected))?;
                let ty = self.value_type(value)?;
                if !expected.compare(&ty) {
                    return Err(SemaError::at(
                        loc,
                        format!("return type {} is incompatible with {}", ty, expected),
                    ));
                }
                Ok(())
            }
            None => {
                if value.is_some() {
                    return Err(SemaError::at(loc, "function should not return a value"));
                }
                Ok(())
            }
        }
    }

    // Expressions

    /// Type of an already-checked operand. Void calls have no type and
    /// cannot be used as values.
    fn value_type(&self, expr: &Expr) -> Result<Type, SemaError> {
        match &expr.ty {
            Some(ty) => Ok(ty.clone()),
            None => Err(SemaError::at(
                expr.loc,
                "expression produces no value".to_string(),
            )),
        }
    }

    fn expr(&mut self, expr: &mut Expr, hint: Option<&Type>) -> Result<(), SemaError> {
        match &mut expr.kind {
            ExprKind::Integer(_) => {
                expr.ty = Some(Type::Int);
                Ok(())
            }
            ExprKind::Float(_) => {
                expr.ty = Some(Type::Number);
                Ok(())
            }
            ExprKind::Str(_) => {
                expr.ty = Some(Type::Str);
                Ok(())
            }
            ExprKind::Identifier(name) => match self.find_var(name) {
                Some(ty) => {
                    expr.ty = Some(ty.clone());
                    Ok(())
                }
                None => Err(SemaError::at(
                    expr.loc,
                    format!("'{}' is not defined", name),
                )),
            },
            ExprKind::Object => {
                // opaque handle; nothing further to check
                expr.ty = Some(Type::Object);
                Ok(())
            }
            ExprKind::Binary(_) => self.binary_expr(expr),
            ExprKind::Assign(_) => self.assign_expr(expr),
            ExprKind::Call(_) => self.call_expr(expr),
            ExprKind::Lookup(_) => self.lookup_expr(expr),
            ExprKind::Array(_) => self.array_literal(expr, hint),
        }
    }

    fn binary_expr(&mut self, expr: &mut Expr) -> Result<(), SemaError> {
        let loc = expr.loc;
        let binary = match &mut expr.kind {
            ExprKind::Binary(binary) => binary.as_mut(),
            _ => unreachable!(),
        };
        self.expr(&mut binary.lhs, None)?;
        self.expr(&mut binary.rhs, None)?;
        let lhs = self.value_type(&binary.lhs)?;
        let rhs = self.value_type(&binary.rhs)?;

        if binary.op.is_arithmetic() {
            if !lhs.is_numeric() || !rhs.is_numeric() {
                return Err(SemaError::at(
                    loc,
                    format!("arithmetic on non-numeric types {} and {}", lhs, rhs),
                ));
            }
            if !lhs.compare(&rhs) {
                return Err(SemaError::at(
                    loc,
                    format!("arithmetic on mismatched types {} and {}", lhs, rhs),
                ));
            }
            expr.ty = Some(if matches!(lhs, Type::Number) || matches!(rhs, Type::Number) {
                Type::Number
            } else {
                Type::Int
            });
        } else {
            if !lhs.compare(&rhs) {
                return Err(SemaError::at(
                    loc,
                    format!("comparison between mismatched types {} and {}", lhs, rhs),
                ));
            }
            expr.ty = Some(Type::Bool);
        }
        Ok(())
    }

    fn assign_expr(&mut self, expr: &mut Expr) -> Result<(), SemaError> {
        let loc = expr.loc;
        let assign = match &mut expr.kind {
            ExprKind::Assign(assign) => assign.as_mut(),
            _ => unreachable!(),
        };
        self.lvalue(&mut assign.target)?;
        let target_ty = self.value_type(&assign.target)?;
        self.expr(&mut assign.value, Some(&target_ty))?;
        let value_ty = self.value_type(&assign.value)?;
        if !target_ty.compare(&value_ty) {
            return Err(SemaError::at(
                loc,
                format!("cannot assign a value of type {} to {}", value_ty, target_ty),
            ));
        }
        expr.ty = Some(target_ty);
        Ok(())
    }

    /// Validates the left side of an assignment: an identifier or an
    /// array lookup.
    fn lvalue(&mut self, expr: &mut Expr) -> Result<(), SemaError> {
        match &expr.kind {
            ExprKind::Identifier(_) | ExprKind::Lookup(_) => self.expr(expr, None),
            _ => Err(SemaError::at(
                expr.loc,
                "expression cannot be assigned to".to_string(),
            )),
        }
    }

    fn call_expr(&mut self, expr: &mut Expr) -> Result<(), SemaError> {
        let loc = expr.loc;
        let call = match &mut expr.kind {
            ExprKind::Call(call) => call.as_mut(),
            _ => unreachable!(),
        };

        if let Some(signature) = self.functions.get(&call.name).cloned() {
            if call.args.len() != signature.params.len() {
                return Err(SemaError::at(
                    loc,
                    format!(
                        "'{}' takes {} argument(s), got {}",
                        call.name,
                        signature.params.len(),
                        call.args.len()
                    ),
                ));
            }
            for (i, (arg, param)) in call
                .args
                .iter_mut()
                .zip(signature.params.iter())
                .enumerate()
            {
                self.expr(arg, Some(param))?;
                let ty = self.value_type(arg)?;
                if !param.compare(&ty) {
                    return Err(SemaError::at(
                        arg.loc,
                        format!(
                            "argument {} of '{}' expects {}, got {}",
                            i + 1,
                            call.name,
                            param,
                            ty
                        ),
                    ));
                }
            }
            expr.ty = signature.ret;
            return Ok(());
        }

        if self.env.host_id(&call.name).is_some() {
            // host functions take anything and return nothing
            for arg in &mut call.args {
                self.expr(arg, None)?;
                self.value_type(arg)?;
            }
            expr.ty = None;
            return Ok(());
        }

        Err(SemaError::at(
            loc,
            format!("call to unknown function '{}'", call.name),
        ))
    }

    fn lookup_expr(&mut self, expr: &mut Expr) -> Result<(), SemaError> {
        let loc = expr.loc;
        let lookup = match &mut expr.kind {
            ExprKind::Lookup(lookup) => lookup.as_mut(),
            _ => unreachable!(),
        };
        self.expr(&mut lookup.base, None)?;
        let base_ty = self.value_type(&lookup.base)?;
        let element = match base_ty.element() {
            Some(element) => element.clone(),
            None => {
                return Err(SemaError::at(
                    loc,
                    format!("cannot index a value of type {}", base_ty),
                ));
            }
        };
        self.expr(&mut lookup.index, None)?;
        let index_ty = self.value_type(&lookup.index)?;
        if !index_ty.is_numeric() {
            return Err(SemaError::at(
                loc,
                format!("array index must be numeric, got {}", index_ty),
            ));
        }
        expr.ty = Some(element);
        Ok(())
    }

    fn array_literal(&mut self, expr: &mut Expr, hint: Option<&Type>) -> Result<(), SemaError> {
        let loc = expr.loc;
        let elements = match &mut expr.kind {
            ExprKind::Array(elements) => elements,
            _ => unreachable!(),
        };
        let element_hint = hint.and_then(|h| h.element()).cloned();

        if elements.is_empty() {
            // an empty literal has no element type of its own; without an
            // array-shaped hint from the context it cannot be typed
            return match element_hint {
                Some(element) => {
                    expr.ty = Some(Type::array(element));
                    Ok(())
                }
                None => Err(SemaError::at(
                    loc,
                    "cannot determine array literal type".to_string(),
                )),
            };
        }

        let mut iter = elements.iter_mut();
        let first = iter.next().unwrap();
        self.expr(first, element_hint.as_ref())?;
        let element_ty = self.value_type(first)?;
        for element in iter {
            self.expr(element, Some(&element_ty))?;
            let ty = self.value_type(element)?;
            if !element_ty.compare(&ty) {
                return Err(SemaError::at(
                    element.loc,
                    format!("array element of type {} in an array of {}", ty, element_ty),
                ));
            }
        }
        expr.ty = Some(Type::array(element_ty));
        Ok(())
    }
}
