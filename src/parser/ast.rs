//! Expression AST.
//!
//! Nodes are stored in an index arena owned by the parser; children are
//! `ExprId` indices, so the tree is a tagged union with no pointer graph and
//! no visitor plumbing. Each node carries the source position the borrow
//! checker reports against, plus an optional borrow annotation: a bare
//! variable read has none (default shared read), `&x`/`&mut x` annotate
//! `Shared`/`Mutable`, and a bare variable initialising a `let` is promoted
//! to `Move`.

use crate::borrowck::BorrowKind;
use crate::lexer::Span;
use crate::parser::arena::{Arena, Id};
use std::fmt::Write as _;

pub type ExprId = Id<Expr>;
pub type ExprArena = Arena<Expr>;

/// Binary operators, two precedence levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub fn as_char(self) -> char {
        match self {
            BinOp::Add => '+',
            BinOp::Sub => '-',
            BinOp::Mul => '*',
            BinOp::Div => '/',
        }
    }
}

/// How an expression borrows the place it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowAnnotation {
    pub kind: BorrowKind,
    /// Scope depth at the point of the borrow; 0 is the top level.
    pub scope_id: u32,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// 1-based source position, used in violations and borrow locations.
    pub line: u32,
    pub col: u32,
    pub borrow: Option<BorrowAnnotation>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span, line: u32, col: u32) -> Self {
        Self {
            kind,
            span,
            line,
            col,
            borrow: None,
        }
    }

    pub fn with_borrow(mut self, annotation: BorrowAnnotation) -> Self {
        self.borrow = Some(annotation);
        self
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Integer literal.
    Int(i64),
    /// Read of a named binding.
    Var(String),
    /// `let name [mut] = init`; introduces a binding in the current scope.
    Let {
        name: String,
        is_mut: bool,
        init: ExprId,
    },
    Binary {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    /// `{ ... }`; introduces a fresh scope.
    Block(Vec<ExprId>),
}

/// Render an expression tree as an s-expression, for the CLI and tests.
pub fn dump(arena: &ExprArena, id: ExprId) -> String {
    let mut out = String::new();
    write_expr(arena, id, &mut out);
    out
}

fn write_expr(arena: &ExprArena, id: ExprId, out: &mut String) {
    let expr = &arena[id];
    match &expr.kind {
        ExprKind::Int(value) => {
            let _ = write!(out, "{}", value);
        }
        ExprKind::Var(name) => {
            match expr.borrow.map(|b| b.kind) {
                Some(BorrowKind::Shared) => out.push('&'),
                Some(BorrowKind::Mutable) => out.push_str("&mut "),
                Some(BorrowKind::Move) => out.push_str("move "),
                // A bare read carries no annotation and no marker.
                None => {}
            }
            out.push_str(name);
        }
        ExprKind::Let { name, is_mut, init } => {
            let _ = write!(out, "(let {}{} ", if *is_mut { "mut " } else { "" }, name);
            write_expr(arena, *init, out);
            out.push(')');
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let _ = write!(out, "({} ", op.as_char());
            write_expr(arena, *lhs, out);
            out.push(' ');
            write_expr(arena, *rhs, out);
            out.push(')');
        }
        ExprKind::Call { callee, args } => {
            out.push_str("(call ");
            write_expr(arena, *callee, out);
            for arg in args {
                out.push(' ');
                write_expr(arena, *arg, out);
            }
            out.push(')');
        }
        ExprKind::Block(exprs) => {
            out.push_str("(block");
            for expr in exprs {
                out.push(' ');
                write_expr(arena, *expr, out);
            }
            out.push(')');
        }
    }
}
