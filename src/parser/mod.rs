//! Recursive-descent parser.
//!
//! Consumes the cooked token vector and builds an arena-allocated AST. The
//! grammar has exactly two precedence levels:
//!
//! ```text
//! program    := ( expression ';'? )* EOF
//! expression := term   ( ('+'|'-') term    )*
//! term       := primary( ('*'|'/') primary )*
//! primary    := INT | IDENT | IDENT '(' args ')' | '&' ['mut'] IDENT
//!             | '(' expression ')' | 'let' IDENT ['mut'] '=' expression
//!             | '{' ( expression ';'? )* '}'
//! ```
//!
//! The parser tracks declared names in a scope stack and fails fast on the
//! first syntax error; once the tree is built it runs the borrow checker and
//! surfaces the first violation as a fatal `Line N:` error.

pub mod arena;
pub mod ast;

use std::collections::HashSet;

use tracing::debug;

use crate::borrowck::{BorrowChecker, BorrowKind};
use crate::error::{CompileError, Result};
use crate::lexer::{Keyword, Token, TokenKind};
use ast::{BinOp, BorrowAnnotation, Expr, ExprArena, ExprId, ExprKind};

/// A fully parsed program: the arena, the top-level expressions in order,
/// and the last of them as the root. The arena lives as long as this value.
#[derive(Debug)]
pub struct ParsedProgram {
    pub arena: ExprArena,
    pub exprs: Vec<ExprId>,
    pub root: ExprId,
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    /// Declared names, one frame per open scope.
    scopes: Vec<HashSet<String>>,
    borrow_checker: BorrowChecker,
    arena: ExprArena,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            scopes: vec![HashSet::new()],
            borrow_checker: BorrowChecker::new(),
            arena: ExprArena::new(),
        }
    }

    /// Parse the whole program and borrow-check it. The first violation (if
    /// any) aborts the compile with the checker's message.
    pub fn parse(mut self) -> Result<ParsedProgram> {
        let (exprs, root) = self.parse_program()?;
        debug!(nodes = self.arena.len(), "parsed program");

        if !self.borrow_checker.check(&self.arena, &exprs) {
            // Accumulated in encounter order; the first one is the error.
            let violation = &self.borrow_checker.get_errors()[0];
            return Err(CompileError::Parse {
                line: violation.line,
                message: violation.message.clone(),
            });
        }

        Ok(ParsedProgram {
            arena: self.arena,
            exprs,
            root,
        })
    }

    /// Parse without borrow checking. Tools that want every violation (not
    /// just the first) run the checker themselves over the result.
    pub fn parse_unchecked(mut self) -> Result<ParsedProgram> {
        let (exprs, root) = self.parse_program()?;
        Ok(ParsedProgram {
            arena: self.arena,
            exprs,
            root,
        })
    }

    fn parse_program(&mut self) -> Result<(Vec<ExprId>, ExprId)> {
        let mut exprs = Vec::new();
        while !self.is_at_end() {
            let expr = self.parse_expression()?;
            exprs.push(expr);
            // Semicolons between top-level expressions are optional.
            self.match_token(&TokenKind::Semi);
        }
        let root = match exprs.last() {
            Some(&root) => root,
            None => return Err(self.error("Expect expression.")),
        };
        Ok((exprs, root))
    }

    // ==== Token plumbing ====

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        !self.is_at_end() && self.peek().kind == *kind
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn match_keyword(&mut self, kw: Keyword) -> bool {
        self.match_token(&TokenKind::Keyword(kw))
    }

    /// Build a fatal error at the current (un-advanced) token.
    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Parse {
            line: self.peek().line,
            message: message.into(),
        }
    }

    // ==== Scope bookkeeping ====

    fn enter_scope(&mut self) {
        self.scopes.push(HashSet::new());
    }

    fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    fn scope_depth(&self) -> u32 {
        (self.scopes.len() - 1) as u32
    }

    fn declare(&mut self, name: String) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name);
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name))
    }

    // ==== Grammar ====

    fn parse_expression(&mut self) -> Result<ExprId> {
        let mut expr = self.parse_term()?;

        loop {
            let op = if self.match_token(&TokenKind::Plus) {
                BinOp::Add
            } else if self.match_token(&TokenKind::Minus) {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_term()?;
            expr = self.alloc_binary(op, expr, rhs);
        }

        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<ExprId> {
        let mut expr = self.parse_primary()?;

        loop {
            let op = if self.match_token(&TokenKind::Star) {
                BinOp::Mul
            } else if self.match_token(&TokenKind::Slash) {
                BinOp::Div
            } else {
                break;
            };
            let rhs = self.parse_primary()?;
            expr = self.alloc_binary(op, expr, rhs);
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<ExprId> {
        if let TokenKind::Int(value) = self.peek().kind {
            let tok = self.advance().clone();
            return Ok(self
                .arena
                .alloc(Expr::new(ExprKind::Int(value), tok.span, tok.line, tok.col)));
        }

        if matches!(self.peek().kind, TokenKind::Ident(_)) {
            return self.parse_variable_or_call();
        }

        if self.match_token(&TokenKind::And) {
            return self.parse_borrow();
        }

        if self.match_token(&TokenKind::LParen) {
            let expr = self.parse_expression()?;
            if !self.match_token(&TokenKind::RParen) {
                return Err(self.error("Expect ')' after expression."));
            }
            return Ok(expr);
        }

        if self.match_keyword(Keyword::Let) {
            return self.parse_let();
        }

        if self.match_token(&TokenKind::LBrace) {
            return self.parse_block();
        }

        if let TokenKind::Unknown(_) = self.peek().kind {
            let line = self.peek().line;
            return Err(self.error(format!("Unexpected character at line {}", line)));
        }

        Err(self.error("Expect expression."))
    }

    fn parse_variable_or_call(&mut self) -> Result<ExprId> {
        let tok = self.advance().clone();
        let name = match tok.kind {
            TokenKind::Ident(name) => name,
            _ => unreachable!("caller checked for an identifier"),
        };

        // A name followed by `(` is a call; callees resolve elsewhere and
        // are exempt from the declared-variable rule.
        if self.check(&TokenKind::LParen) {
            let callee = self
                .arena
                .alloc(Expr::new(ExprKind::Var(name), tok.span, tok.line, tok.col));
            return self.finish_call(callee);
        }

        if !self.is_declared(&name) {
            return Err(self.error(format!("Use of undeclared variable: {}", name)));
        }

        Ok(self
            .arena
            .alloc(Expr::new(ExprKind::Var(name), tok.span, tok.line, tok.col)))
    }

    /// `&` already consumed: `&x` or `&mut x`.
    fn parse_borrow(&mut self) -> Result<ExprId> {
        let mutable = self.match_keyword(Keyword::Mut);

        let tok = self.advance().clone();
        let name = match tok.kind {
            TokenKind::Ident(name) => name,
            _ => return Err(self.error("Expect identifier after '&'.")),
        };
        if !self.is_declared(&name) {
            return Err(self.error(format!("Use of undeclared variable: {}", name)));
        }

        let kind = if mutable {
            BorrowKind::Mutable
        } else {
            BorrowKind::Shared
        };
        let annotation = BorrowAnnotation {
            kind,
            scope_id: self.scope_depth(),
        };
        Ok(self.arena.alloc(
            Expr::new(ExprKind::Var(name), tok.span, tok.line, tok.col).with_borrow(annotation),
        ))
    }

    /// `let` already consumed.
    fn parse_let(&mut self) -> Result<ExprId> {
        let let_tok = self.previous().clone();

        let name = match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            _ => return Err(self.error("Expect identifier after 'let'.")),
        };

        let is_mut = self.match_keyword(Keyword::Mut);

        if !self.match_token(&TokenKind::Eq) {
            return Err(self.error("Expect '=' after variable name."));
        }

        let init = self.parse_expression()?;
        // A bare variable on the right-hand side transfers ownership; a
        // written borrow (`&x`, `&mut x`) already carries its annotation.
        if let ExprKind::Var(_) = self.arena[init].kind {
            if self.arena[init].borrow.is_none() {
                self.arena[init].borrow = Some(BorrowAnnotation {
                    kind: BorrowKind::Move,
                    scope_id: self.scope_depth(),
                });
            }
        }

        // The binding is visible only after its initialiser: `let x = x`
        // is an undeclared-variable error, not self-reference.
        self.declare(name.clone());

        let span = let_tok.span.merge(self.arena[init].span);
        Ok(self.arena.alloc(Expr::new(
            ExprKind::Let { name, is_mut, init },
            span,
            let_tok.line,
            let_tok.col,
        )))
    }

    /// `{` already consumed.
    fn parse_block(&mut self) -> Result<ExprId> {
        let open = self.previous().clone();
        self.enter_scope();

        let mut exprs = Vec::new();
        while !self.is_at_end() && !self.check(&TokenKind::RBrace) {
            exprs.push(self.parse_expression()?);
            self.match_token(&TokenKind::Semi);
        }

        if !self.match_token(&TokenKind::RBrace) {
            return Err(self.error("Expect '}' after block."));
        }
        self.exit_scope();

        let span = open.span.merge(self.previous().span);
        Ok(self.arena.alloc(Expr::new(
            ExprKind::Block(exprs),
            span,
            open.line,
            open.col,
        )))
    }

    /// Callee parsed, `(` next.
    fn finish_call(&mut self, callee: ExprId) -> Result<ExprId> {
        // Eat `(`.
        self.advance();

        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        if !self.match_token(&TokenKind::RParen) {
            return Err(self.error("Expect ')' after arguments."));
        }

        let callee_expr = &self.arena[callee];
        let (line, col) = (callee_expr.line, callee_expr.col);
        let span = callee_expr.span.merge(self.previous().span);
        Ok(self
            .arena
            .alloc(Expr::new(ExprKind::Call { callee, args }, span, line, col)))
    }

    fn alloc_binary(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        let span = self.arena[lhs].span.merge(self.arena[rhs].span);
        let (line, col) = (self.arena[lhs].line, self.arena[lhs].col);
        self.arena
            .alloc(Expr::new(ExprKind::Binary { op, lhs, rhs }, span, line, col))
    }
}
