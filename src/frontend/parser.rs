use crate::frontend::lexer::Lexer;
use crate::frontend::parse_error::ParseError;
use crate::frontend::token::{Token, TokenKind};
use crate::lang::ast::{
    AssignExpr, BinaryExpr, BinaryOp, BlockStmt, CallExpr, Expr, ExprKind, ExprStmt, ForStmt,
    Func, IfStmt, LookupExpr, Module, Param, ReturnStmt, Stmt, VarDeclStmt, WhileStmt,
};
use crate::lang::types::Type;

/// Recursive-descent parser with precedence climbing for binary
/// expressions.
///
/// The parser pulls tokens straight from the lexer (one-token lookahead
/// via `peek`) and produces an untyped `Module`. Keywords are recognized
/// by comparing the text of identifier tokens. Any mismatch aborts with a
/// `ParseError`; there is no recovery.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Parser {
            lexer: Lexer::new(source),
        }
    }

    /// Parses a whole module: a sequence of `func` definitions.
    pub fn parse_module(&mut self) -> Result<Module, ParseError> {
        let mut module = Module::default();
        loop {
            let token = self.lexer.peek()?;
            if token.is(TokenKind::EndOfFile) {
                break;
            }
            if token.is_word("func") {
                module.funcs.push(self.parse_func()?);
            } else {
                return Err(ParseError::at(
                    token.loc,
                    format!("expected 'func' at top level, found {}", token.kind),
                ));
            }
        }
        Ok(module)
    }

    /// `Func := "func" IDENT "(" [ Param {"," Param} ] ")" [ Type ] Block`
    fn parse_func(&mut self) -> Result<Func, ParseError> {
        let keyword = self.lexer.expect(TokenKind::Identifier)?;
        let name = self.lexer.expect(TokenKind::Identifier)?;

        self.lexer.expect(TokenKind::LeftParen)?;
        let mut params = Vec::new();
        while !self.lexer.test_kind(TokenKind::RightParen)? {
            let param_name = self.lexer.expect(TokenKind::Identifier)?;
            self.lexer.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            params.push(Param {
                loc: param_name.loc,
                name: param_name.text.to_string(),
                ty,
            });
            if self.lexer.test_kind(TokenKind::Comma)? {
                self.lexer.next()?;
            }
        }
        self.lexer.expect(TokenKind::RightParen)?;

        let return_type = if self.lexer.test_kind(TokenKind::LeftCurly)? {
            None
        } else {
            Some(self.parse_type()?)
        };

        let body = self.parse_block_stmt()?;
        Ok(Func {
            loc: keyword.loc,
            name: name.text.to_string(),
            params,
            return_type,
            body,
        })
    }

    /// `Type := ("[" "]")* ("string" | "bool" | "int" | "number")`
    fn parse_type(&mut self) -> Result<Type, ParseError> {
        let mut depth = 0usize;
        while self.lexer.test_kind(TokenKind::LeftBracket)? {
            self.lexer.next()?;
            self.lexer.expect(TokenKind::RightBracket)?;
            depth += 1;
        }

        let base = self.lexer.expect(TokenKind::Identifier)?;
        let mut ty = match base.text {
            "string" => Type::Str,
            "bool" => Type::Bool,
            "int" => Type::Int,
            "number" => Type::Number,
            other => {
                return Err(ParseError::at(
                    base.loc,
                    format!("unknown type name '{}'", other),
                ));
            }
        };
        for _ in 0..depth {
            ty = Type::array(ty);
        }
        Ok(ty)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.lexer.peek()?;
        if token.is_word("if") {
            self.parse_if_stmt()
        } else if token.is_word("while") {
            self.parse_while_stmt()
        } else if token.is_word("for") {
            self.parse_for_stmt()
        } else if token.is_word("return") {
            self.parse_return_stmt()
        } else if token.is_word("let") || token.is_word("const") {
            self.parse_var_decl_stmt()
        } else if token.is(TokenKind::LeftCurly) {
            Ok(Stmt::Block(Box::new(self.parse_block_stmt()?)))
        } else {
            let expr = self.parse_expr()?;
            self.lexer.expect(TokenKind::SemiColon)?;
            Ok(Stmt::Expr(Box::new(ExprStmt {
                loc: token.loc,
                expr,
            })))
        }
    }

    /// `If := "if" Expr Block [ "else" (If | Block) ]`
    fn parse_if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let keyword = self.lexer.next()?;
        let condition = self.parse_expr()?;
        let then_body = Stmt::Block(Box::new(self.parse_block_stmt()?));

        let else_body = if self.lexer.test_word("else")? {
            self.lexer.next()?;
            if self.lexer.test_word("if")? {
                Some(self.parse_if_stmt()?)
            } else {
                Some(Stmt::Block(Box::new(self.parse_block_stmt()?)))
            }
        } else {
            None
        };

        Ok(Stmt::If(Box::new(IfStmt {
            loc: keyword.loc,
            condition,
            then_body,
            else_body,
        })))
    }

    fn parse_while_stmt(&mut self) -> Result<Stmt, ParseError> {
        let keyword = self.lexer.next()?;
        let condition = self.parse_expr()?;
        let body = Stmt::Block(Box::new(self.parse_block_stmt()?));
        Ok(Stmt::While(Box::new(WhileStmt {
            loc: keyword.loc,
            condition,
            body,
        })))
    }

    /// `For := "for" IDENT "in" Expr Block`
    fn parse_for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let keyword = self.lexer.next()?;
        let name = self.lexer.expect(TokenKind::Identifier)?;
        if !self.lexer.test_word("in")? {
            let token = self.lexer.peek()?;
            return Err(ParseError::at(
                token.loc,
                "expected 'in' in for statement",
            ));
        }
        self.lexer.next()?;
        let iterator = self.parse_expr()?;
        let body = Stmt::Block(Box::new(self.parse_block_stmt()?));
        Ok(Stmt::For(Box::new(ForStmt {
            loc: keyword.loc,
            name: name.text.to_string(),
            iterator,
            body,
        })))
    }

    /// `Return := "return" [ Expr ] ";"`
    fn parse_return_stmt(&mut self) -> Result<Stmt, ParseError> {
        let keyword = self.lexer.next()?;
        let value = if self.lexer.test_kind(TokenKind::SemiColon)? {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.lexer.expect(TokenKind::SemiColon)?;
        Ok(Stmt::Return(Box::new(ReturnStmt {
            loc: keyword.loc,
            value,
        })))
    }

    /// `VarDecl := ("let"|"const") IDENT [ ":" Type ] "=" Expr ";"`
    fn parse_var_decl_stmt(&mut self) -> Result<Stmt, ParseError> {
        let keyword = self.lexer.next()?;
        let is_const = keyword.text == "const";
        let name = self.lexer.expect(TokenKind::Identifier)?;

        let annotation = if self.lexer.test_kind(TokenKind::Colon)? {
            self.lexer.next()?;
            Some(self.parse_type()?)
        } else {
            None
        };

        self.lexer.expect(TokenKind::Equals)?;
        let value = self.parse_expr()?;
        self.lexer.expect(TokenKind::SemiColon)?;

        Ok(Stmt::VarDecl(Box::new(VarDeclStmt {
            loc: keyword.loc,
            name: name.text.to_string(),
            is_const,
            annotation,
            value,
        })))
    }

    fn parse_block_stmt(&mut self) -> Result<BlockStmt, ParseError> {
        let open = self.lexer.expect(TokenKind::LeftCurly)?;
        let mut stmts = Vec::new();
        loop {
            let token = self.lexer.peek()?;
            if token.is(TokenKind::RightCurly) {
                break;
            }
            if token.is(TokenKind::EndOfFile) {
                return Err(ParseError::at(token.loc, "expected '}' before end of file"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.lexer.expect(TokenKind::RightCurly)?;
        Ok(BlockStmt {
            loc: open.loc,
            stmts,
        })
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_bin_expr(0)
    }

    /// Precedence climbing: strictly greater precedence recurses, equal
    /// precedence ends the current loop iteration, which yields left
    /// association at every level.
    fn parse_bin_expr(&mut self, prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_lhs_expr()?;
        loop {
            let token = self.lexer.peek()?;
            let next_prec = binary_prec(token.kind);
            if next_prec <= prec {
                break;
            }
            self.lexer.next()?;
            let op = binary_op(&token)?;
            let rhs = self.parse_bin_expr(next_prec)?;
            lhs = Expr::new(
                token.loc,
                ExprKind::Binary(Box::new(BinaryExpr { op, lhs, rhs })),
            );
        }
        Ok(lhs)
    }

    /// Postfix chain on a primary expression: `[index]` lookups, and a
    /// single `= value` which turns the chain into an assignment and
    /// terminates it.
    fn parse_lhs_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::LeftBracket => {
                    self.lexer.next()?;
                    let index = self.parse_expr()?;
                    self.lexer.expect(TokenKind::RightBracket)?;
                    expr = Expr::new(
                        token.loc,
                        ExprKind::Lookup(Box::new(LookupExpr { base: expr, index })),
                    );
                }
                TokenKind::Equals => {
                    self.lexer.next()?;
                    let value = self.parse_expr()?;
                    expr = Expr::new(
                        token.loc,
                        ExprKind::Assign(Box::new(AssignExpr {
                            target: expr,
                            value,
                        })),
                    );
                    break;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, ParseError> {
        let token = self.lexer.peek()?;
        match token.kind {
            TokenKind::Identifier => {
                self.lexer.next()?;
                if self.lexer.test_kind(TokenKind::LeftParen)? {
                    self.parse_call(token)
                } else {
                    Ok(Expr::new(
                        token.loc,
                        ExprKind::Identifier(token.text.to_string()),
                    ))
                }
            }
            TokenKind::Number => {
                self.lexer.next()?;
                self.parse_number(token)
            }
            TokenKind::String => {
                self.lexer.next()?;
                // the token text still carries the surrounding quotes
                let text = token.text;
                let inner = if text.len() >= 2 {
                    &text[1..text.len() - 1]
                } else {
                    ""
                };
                Ok(Expr::new(token.loc, ExprKind::Str(inner.to_string())))
            }
            TokenKind::LeftCurly => {
                self.lexer.next()?;
                self.lexer.expect(TokenKind::RightCurly)?;
                Ok(Expr::new(token.loc, ExprKind::Object))
            }
            TokenKind::LeftBracket => {
                self.lexer.next()?;
                let mut elements = Vec::new();
                while !self.lexer.test_kind(TokenKind::RightBracket)? {
                    elements.push(self.parse_expr()?);
                    if self.lexer.test_kind(TokenKind::Comma)? {
                        self.lexer.next()?;
                    }
                }
                self.lexer.expect(TokenKind::RightBracket)?;
                Ok(Expr::new(token.loc, ExprKind::Array(elements)))
            }
            kind => Err(ParseError::at(
                token.loc,
                format!("expected expression, found {}", kind),
            )),
        }
    }

    fn parse_call(&mut self, name: Token<'a>) -> Result<Expr, ParseError> {
        self.lexer.expect(TokenKind::LeftParen)?;
        let mut args = Vec::new();
        while !self.lexer.test_kind(TokenKind::RightParen)? {
            args.push(self.parse_expr()?);
            if self.lexer.test_kind(TokenKind::Comma)? {
                self.lexer.next()?;
            }
        }
        self.lexer.expect(TokenKind::RightParen)?;
        Ok(Expr::new(
            name.loc,
            ExprKind::Call(Box::new(CallExpr {
                name: name.text.to_string(),
                args,
            })),
        ))
    }

    /// A dot in the lexeme makes a float literal; otherwise it is a
    /// 64-bit integer. The lexer's number rule is permissive, so lexemes
    /// with several dots are rejected here.
    fn parse_number(&mut self, token: Token<'a>) -> Result<Expr, ParseError> {
        if token.text.contains('.') {
            match token.text.parse::<f64>() {
                Ok(value) => Ok(Expr::new(token.loc, ExprKind::Float(value))),
                Err(_) => Err(ParseError::at(
                    token.loc,
                    format!("invalid number literal '{}'", token.text),
                )),
            }
        } else {
            match token.text.parse::<i64>() {
                Ok(value) => Ok(Expr::new(token.loc, ExprKind::Integer(value))),
                Err(_) => Err(ParseError::at(
                    token.loc,
                    format!("invalid integer literal '{}'", token.text),
                )),
            }
        }
    }
}

fn binary_prec(kind: TokenKind) -> u8 {
    match kind {
        TokenKind::EqualsEquals
        | TokenKind::ExclamationEquals
        | TokenKind::LessThan
        | TokenKind::GreaterThan
        | TokenKind::LessThanEquals
        | TokenKind::GreaterThanEquals => 1,
        TokenKind::Plus | TokenKind::Minus => 2,
        TokenKind::Asterisk | TokenKind::ForwardSlash => 3,
        _ => 0,
    }
}

fn binary_op(token: &Token<'_>) -> Result<BinaryOp, ParseError> {
    let op = match token.kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Subtract,
        TokenKind::Asterisk => BinaryOp::Multiply,
        TokenKind::ForwardSlash => BinaryOp::Divide,
        TokenKind::EqualsEquals => BinaryOp::Equal,
        TokenKind::ExclamationEquals => BinaryOp::NotEqual,
        TokenKind::LessThan => BinaryOp::LessThan,
        TokenKind::GreaterThan => BinaryOp::GreaterThan,
        TokenKind::LessThanEquals => BinaryOp::LessThanEqual,
        TokenKind::GreaterThanEquals => BinaryOp::GreaterThanEqual,
        _ => {
            return Err(ParseError::at(token.loc, "unknown binary operator"));
        }
    };
    Ok(op)
}
