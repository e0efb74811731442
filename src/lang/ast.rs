use crate::frontend::token::Loc;
use crate::lang::types::Type;

/// The ten binary operators of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanEqual,
    GreaterThanEqual,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
        )
    }
}

/// An expression node.
///
/// `ty` starts out `None` and is filled in by the type checker; after a
/// successful check it is `None` only for calls that produce no value.
#[derive(Debug, Clone)]
pub struct Expr {
    pub loc: Loc,
    pub ty: Option<Type>,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(loc: Loc, kind: ExprKind) -> Expr {
        Expr {
            loc,
            ty: None,
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Binary(Box<BinaryExpr>),
    Assign(Box<AssignExpr>),
    Call(Box<CallExpr>),
    Lookup(Box<LookupExpr>),
    Identifier(String),
    Integer(i64),
    Float(f64),
    Str(String),
    Array(Vec<Expr>),
    /// The empty object literal `{}`; an opaque handle at runtime.
    Object,
}

#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Expr,
    pub rhs: Expr,
}

/// Assignment is an expression; it evaluates to the assigned value. The
/// target is a full expression, normally an identifier or a lookup.
#[derive(Debug, Clone)]
pub struct AssignExpr {
    pub target: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct CallExpr {
    pub name: String,
    pub args: Vec<Expr>,
}

/// `base[index]`, indexing into an array.
#[derive(Debug, Clone)]
pub struct LookupExpr {
    pub base: Expr,
    pub index: Expr,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    If(Box<IfStmt>),
    While(Box<WhileStmt>),
    For(Box<ForStmt>),
    Return(Box<ReturnStmt>),
    VarDecl(Box<VarDeclStmt>),
    Block(Box<BlockStmt>),
    Expr(Box<ExprStmt>),
}

#[derive(Debug, Clone)]
pub struct IfStmt {
    pub loc: Loc,
    pub condition: Expr,
    pub then_body: Stmt,
    pub else_body: Option<Stmt>,
}

#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub loc: Loc,
    pub condition: Expr,
    pub body: Stmt,
}

/// `for name in iterator { ... }`. Parsed, but a no-op through the
/// checker and the generator.
#[derive(Debug, Clone)]
pub struct ForStmt {
    pub loc: Loc,
    pub name: String,
    pub iterator: Expr,
    pub body: Stmt,
}

#[derive(Debug, Clone)]
pub struct ReturnStmt {
    pub loc: Loc,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct VarDeclStmt {
    pub loc: Loc,
    pub name: String,
    pub is_const: bool,
    pub annotation: Option<Type>,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct BlockStmt {
    pub loc: Loc,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct ExprStmt {
    pub loc: Loc,
    pub expr: Expr,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub loc: Loc,
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct Func {
    pub loc: Loc,
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<Type>,
    pub body: BlockStmt,
}

/// An ordered sequence of functions. Names are unique within a module;
/// the checker rejects duplicates.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub funcs: Vec<Func>,
}
