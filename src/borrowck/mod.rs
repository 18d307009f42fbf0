//! Borrow checker.
//!
//! Walks the AST in evaluation order, maintaining an ownership environment
//! (a stack of scope frames), and accumulates violations instead of
//! stopping at the first. `check` returns pass/fail; the parser surfaces the
//! first violation as the user-visible error.
//!
//! Admission rules, for a binding `x`:
//! - shared borrow: `x` not moved and no mutable borrow active; any number
//!   of simultaneous shared borrows is fine
//! - mutable borrow: `x` declared `mut`, no active borrows of either kind,
//!   not moved
//! - move: no active borrows, not already moved; afterwards `x` is dead
//!
//! Internal inconsistencies (popping the root scope) are programming errors
//! and abort; the checker itself never returns an error.

pub mod two_phase;

pub use two_phase::{BorrowData, BorrowIndex, BorrowSet, Location, TwoPhaseActivation};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::parser::ast::{ExprArena, ExprId, ExprKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BorrowKind {
    Shared,
    Mutable,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    BorrowWhileMutable,
    UseAfterMove,
    InvalidBorrow,
}

/// A single borrow-check failure.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    pub line: u32,
}

/// Why a borrow or move was refused.
enum Refusal {
    Undeclared,
    Moved,
    AlreadyBorrowed,
    MutablyBorrowed,
    NotMutable,
}

#[derive(Debug)]
struct OwnershipData {
    is_mutable: bool,
    /// Active borrows: borrower name and kind. Either any number of shared
    /// entries or exactly one mutable entry.
    borrowers: Vec<(String, BorrowKind)>,
    moved: bool,
}

impl OwnershipData {
    fn new(is_mutable: bool) -> Self {
        Self {
            is_mutable,
            borrowers: Vec::new(),
            moved: false,
        }
    }

    fn has_mutable_borrow(&self) -> bool {
        self.borrowers
            .iter()
            .any(|(_, kind)| *kind == BorrowKind::Mutable)
    }
}

/// Ownership environment: one frame per open scope, innermost last.
/// Shadowing lands in the inner frame; lookups scan outward.
#[derive(Debug)]
struct OwnershipTracker {
    frames: Vec<IndexMap<String, OwnershipData>>,
}

impl OwnershipTracker {
    fn new() -> Self {
        Self {
            frames: vec![IndexMap::new()],
        }
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.frames.push(IndexMap::new());
    }

    fn enter_scope(&mut self) {
        self.frames.push(IndexMap::new());
    }

    /// Pop the innermost frame. Returns the names it declared, and releases
    /// borrows held by those bindings from the surviving frames.
    fn exit_scope(&mut self) -> Vec<String> {
        assert!(self.frames.len() > 1, "cannot exit the root scope");
        let dead = self.frames.pop().unwrap();
        let dead_names: Vec<String> = dead.into_keys().collect();
        for frame in &mut self.frames {
            for data in frame.values_mut() {
                data.borrowers
                    .retain(|(borrower, _)| !dead_names.contains(borrower));
            }
        }
        dead_names
    }

    /// Register a binding in the current scope. False on redeclaration
    /// within the same frame (shadowing an outer frame is fine).
    fn register_variable(&mut self, name: &str, is_mut: bool) -> bool {
        let frame = self.frames.last_mut().expect("root scope always exists");
        if frame.contains_key(name) {
            return false;
        }
        frame.insert(name.to_string(), OwnershipData::new(is_mut));
        true
    }

    fn lookup(&self, name: &str) -> Option<&OwnershipData> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut OwnershipData> {
        self.frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_mut(name))
    }

    /// Check and register a borrow in one step.
    fn register_borrow(
        &mut self,
        place: &str,
        borrower: &str,
        kind: BorrowKind,
    ) -> Result<(), Refusal> {
        let data = match self.lookup_mut(place) {
            Some(data) => data,
            None => return Err(Refusal::Undeclared),
        };
        if data.moved {
            return Err(Refusal::Moved);
        }
        match kind {
            BorrowKind::Shared => {
                if data.has_mutable_borrow() {
                    return Err(Refusal::MutablyBorrowed);
                }
            }
            BorrowKind::Mutable => {
                if !data.borrowers.is_empty() {
                    return Err(Refusal::AlreadyBorrowed);
                }
                if !data.is_mutable {
                    return Err(Refusal::NotMutable);
                }
            }
            BorrowKind::Move => unreachable!("moves go through mark_moved"),
        }
        data.borrowers.push((borrower.to_string(), kind));
        Ok(())
    }

    /// Transfer ownership out of `place`.
    fn mark_moved(&mut self, place: &str) -> Result<(), Refusal> {
        let data = match self.lookup_mut(place) {
            Some(data) => data,
            None => return Err(Refusal::Undeclared),
        };
        if data.moved {
            return Err(Refusal::Moved);
        }
        if !data.borrowers.is_empty() {
            return Err(Refusal::AlreadyBorrowed);
        }
        data.moved = true;
        Ok(())
    }
}

pub struct BorrowChecker {
    tracker: OwnershipTracker,
    borrow_set: BorrowSet,
    errors: Vec<Violation>,
}

impl BorrowChecker {
    pub fn new() -> Self {
        Self {
            tracker: OwnershipTracker::new(),
            borrow_set: BorrowSet::new(),
            errors: Vec::new(),
        }
    }

    /// Check a program: the top-level expressions in order. All state is
    /// reset on entry; returns true when no violation was found.
    pub fn check(&mut self, arena: &ExprArena, exprs: &[ExprId]) -> bool {
        self.tracker.reset();
        self.borrow_set.clear();
        self.errors.clear();

        for &expr in exprs {
            self.check_expr(arena, expr);
        }

        debug!(
            violations = self.errors.len(),
            borrows = self.borrow_set.len(),
            "borrow check finished"
        );
        self.errors.is_empty()
    }

    /// Violations in encounter order.
    pub fn get_errors(&self) -> &[Violation] {
        &self.errors
    }

    /// The borrow side table of the last `check` run.
    pub fn borrow_set(&self) -> &BorrowSet {
        &self.borrow_set
    }

    fn violation(&mut self, kind: ViolationKind, message: impl Into<String>, line: u32) {
        self.errors.push(Violation {
            kind,
            message: message.into(),
            line,
        });
    }

    fn check_expr(&mut self, arena: &ExprArena, id: ExprId) {
        let expr = &arena[id];
        match &expr.kind {
            ExprKind::Int(_) => {}

            ExprKind::Var(name) => match expr.borrow.map(|b| b.kind) {
                // Bare read, or an `&x` outside a binding context: both are
                // shared uses with no lasting registration.
                None | Some(BorrowKind::Shared) => {
                    self.check_shared_use(name, expr.line);
                }
                // `&mut x` in expression position: validated, not retained.
                Some(BorrowKind::Mutable) => {
                    let refusal = self
                        .tracker
                        .register_borrow(name, "<temp>", BorrowKind::Mutable)
                        .err();
                    match refusal {
                        None => {
                            // Transient borrow; take it right back out.
                            if let Some(data) = self.tracker.lookup_mut(name) {
                                data.borrowers.retain(|(b, _)| b != "<temp>");
                            }
                        }
                        Some(refusal) => {
                            self.report_refusal(refusal, name, BorrowKind::Mutable, expr.line)
                        }
                    }
                }
                Some(BorrowKind::Move) => {
                    if let Err(refusal) = self.tracker.mark_moved(name) {
                        self.report_refusal(refusal, name, BorrowKind::Move, expr.line);
                    }
                }
            },

            ExprKind::Let { name, is_mut, init } => {
                self.check_let_init(arena, name, *init);
                if !self.tracker.register_variable(name, *is_mut) {
                    self.violation(
                        ViolationKind::InvalidBorrow,
                        format!("Variable `{}` is already declared in this scope", name),
                        expr.line,
                    );
                }
            }

            ExprKind::Binary { lhs, rhs, .. } => {
                // Strict left-to-right.
                self.check_expr(arena, *lhs);
                self.check_expr(arena, *rhs);
            }

            ExprKind::Block(exprs) => {
                self.tracker.enter_scope();
                for &expr in exprs {
                    self.check_expr(arena, expr);
                }
                let dead = self.tracker.exit_scope();
                self.borrow_set.release_assigned_to(&dead);
            }

            ExprKind::Call { callee, args } => {
                self.check_call(arena, *callee, args, expr.line, expr.col);
            }
        }
    }

    /// A shared read of `name`: declared, not moved, no live mutable borrow
    /// in the environment or the side table. A reserved-but-unactivated
    /// two-phase borrow does not block reads.
    fn check_shared_use(&mut self, name: &str, line: u32) {
        let (moved, mutably_borrowed) = match self.tracker.lookup(name) {
            Some(data) => (data.moved, data.has_mutable_borrow()),
            None => {
                self.violation(
                    ViolationKind::InvalidBorrow,
                    format!("Use of undeclared variable: {}", name),
                    line,
                );
                return;
            }
        };
        if moved {
            self.violation(
                ViolationKind::UseAfterMove,
                format!("Use of moved value: `{}`", name),
                line,
            );
            return;
        }
        let activated_mutable = mutably_borrowed
            || self
                .borrow_set
                .live_borrows_of(name)
                .any(|(_, data)| data.kind == BorrowKind::Mutable && data.is_activated());
        if activated_mutable {
            self.violation(
                ViolationKind::BorrowWhileMutable,
                format!(
                    "Cannot borrow `{}` as immutable because it is already borrowed as mutable",
                    name
                ),
                line,
            );
        }
    }

    /// The initialiser of `let name = ...`. A written borrow (`&x`,
    /// `&mut x`) registers `name` as the borrower; everything else,
    /// including a bare-variable move, is checked as an ordinary
    /// expression.
    fn check_let_init(&mut self, arena: &ExprArena, name: &str, init: ExprId) {
        let init_expr = &arena[init];
        let (src, kind) = match (&init_expr.kind, init_expr.borrow) {
            (ExprKind::Var(src), Some(annotation))
                if annotation.kind != BorrowKind::Move =>
            {
                (src.clone(), annotation.kind)
            }
            // Moves land in the Var arm of `check_expr`.
            _ => {
                self.check_expr(arena, init);
                return;
            }
        };
        let line = init_expr.line;

        match self.tracker.register_borrow(&src, name, kind) {
            Ok(()) => {
                self.borrow_set.reserve(BorrowData {
                    reserve_location: Location::new(line, init_expr.col),
                    activation_location: TwoPhaseActivation::NotTwoPhase,
                    kind,
                    borrowed_place: src,
                    assigned_place: name.to_string(),
                });
            }
            Err(refusal) => self.report_refusal(refusal, &src, kind, line),
        }
    }

    /// Arguments are checked in order under their declared borrow kind.
    /// `&mut` arguments are two-phase: reserved up front, activated when the
    /// call begins, released when it returns.
    fn check_call(
        &mut self,
        arena: &ExprArena,
        callee: ExprId,
        args: &[ExprId],
        call_line: u32,
        call_col: u32,
    ) {
        // The callee resolves elsewhere; only check it when it names a
        // local binding.
        match &arena[callee].kind {
            ExprKind::Var(name) => {
                if self.tracker.lookup(name).is_some() {
                    self.check_shared_use(name, arena[callee].line);
                }
            }
            _ => self.check_expr(arena, callee),
        }

        let callee_name = match &arena[callee].kind {
            ExprKind::Var(name) => name.clone(),
            _ => "<call>".to_string(),
        };

        let mut reserved: Vec<BorrowIndex> = Vec::new();
        let mut call_shared: Vec<BorrowIndex> = Vec::new();

        for &arg in args {
            let arg_expr = &arena[arg];
            let (place, kind) = match (&arg_expr.kind, arg_expr.borrow) {
                (ExprKind::Var(place), Some(annotation)) => (place.clone(), annotation.kind),
                _ => {
                    self.check_expr(arena, arg);
                    continue;
                }
            };
            let loc = Location::new(arg_expr.line, arg_expr.col);

            match kind {
                BorrowKind::Mutable => {
                    // Reservation prechecks mirror the mutable admission
                    // rules except for existing borrows, which are judged at
                    // activation.
                    let (declared, moved, is_mutable) = match self.tracker.lookup(&place) {
                        Some(data) => (true, data.moved, data.is_mutable),
                        None => (false, false, false),
                    };
                    if !declared {
                        self.violation(
                            ViolationKind::InvalidBorrow,
                            format!("Use of undeclared variable: {}", place),
                            loc.line,
                        );
                        continue;
                    }
                    if moved {
                        self.violation(
                            ViolationKind::UseAfterMove,
                            format!("Cannot borrow moved value: `{}`", place),
                            loc.line,
                        );
                        continue;
                    }
                    if !is_mutable {
                        self.violation(
                            ViolationKind::InvalidBorrow,
                            format!(
                                "Cannot borrow `{}` as mutable, as it is not declared as mutable",
                                place
                            ),
                            loc.line,
                        );
                        continue;
                    }
                    let index = self.borrow_set.reserve(BorrowData {
                        reserve_location: loc,
                        activation_location: TwoPhaseActivation::NotActivated,
                        kind: BorrowKind::Mutable,
                        borrowed_place: place,
                        assigned_place: callee_name.clone(),
                    });
                    reserved.push(index);
                }
                BorrowKind::Shared => {
                    // A `&x` argument holds a shared borrow for the call's
                    // duration.
                    self.check_shared_use(&place, loc.line);
                    let index = self.borrow_set.reserve(BorrowData {
                        reserve_location: loc,
                        activation_location: TwoPhaseActivation::NotTwoPhase,
                        kind: BorrowKind::Shared,
                        borrowed_place: place,
                        assigned_place: callee_name.clone(),
                    });
                    call_shared.push(index);
                }
                // Only `let` initialisers get a Move annotation, and those
                // nodes are never argument slots.
                BorrowKind::Move => unreachable!("call arguments are never move-annotated"),
            }
        }

        // The call itself is the activation point of every reserved borrow.
        let call_loc = Location::new(call_line, call_col);
        for &index in &reserved {
            let place = match self.borrow_set.get(index) {
                Some(data) => data.borrowed_place.clone(),
                None => continue,
            };
            self.borrow_set.activate(index, call_loc);

            let env_conflict = self
                .tracker
                .lookup(&place)
                .map(|data| !data.borrowers.is_empty())
                .unwrap_or(false);
            let table_conflict = self
                .borrow_set
                .live_borrows_of(&place)
                .any(|(other, _)| other != index);
            if env_conflict || table_conflict {
                self.violation(
                    ViolationKind::BorrowWhileMutable,
                    format!(
                        "Cannot borrow `{}` as mutable because it is already borrowed",
                        place
                    ),
                    call_loc.line,
                );
            }
        }

        // Call-scoped borrows end when the call returns.
        for index in reserved.into_iter().chain(call_shared) {
            self.borrow_set.release(index);
        }
    }

    fn report_refusal(&mut self, refusal: Refusal, place: &str, kind: BorrowKind, line: u32) {
        match refusal {
            Refusal::Undeclared => self.violation(
                ViolationKind::InvalidBorrow,
                format!("Use of undeclared variable: {}", place),
                line,
            ),
            Refusal::Moved => {
                let message = match kind {
                    BorrowKind::Move => format!("Use of moved value: `{}`", place),
                    _ => format!("Cannot borrow moved value: `{}`", place),
                };
                self.violation(ViolationKind::UseAfterMove, message, line);
            }
            Refusal::AlreadyBorrowed => {
                let message = match kind {
                    BorrowKind::Move => {
                        format!("Cannot move out of `{}` because it is borrowed", place)
                    }
                    _ => format!(
                        "Cannot borrow `{}` as mutable because it is already borrowed",
                        place
                    ),
                };
                let kind = match kind {
                    BorrowKind::Move => ViolationKind::InvalidBorrow,
                    _ => ViolationKind::BorrowWhileMutable,
                };
                self.violation(kind, message, line);
            }
            Refusal::MutablyBorrowed => self.violation(
                ViolationKind::BorrowWhileMutable,
                format!(
                    "Cannot borrow `{}` as immutable because it is already borrowed as mutable",
                    place
                ),
                line,
            ),
            Refusal::NotMutable => self.violation(
                ViolationKind::InvalidBorrow,
                format!(
                    "Cannot borrow `{}` as mutable, as it is not declared as mutable",
                    place
                ),
                line,
            ),
        }
    }
}

impl Default for BorrowChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    /// Parse without checking, then run a fresh checker and return its
    /// violations.
    fn violations(source: &str) -> Vec<Violation> {
        let (tokens, errors) = Lexer::tokenize(source);
        assert!(errors.is_empty(), "lex errors: {:?}", errors);
        let program = Parser::new(tokens)
            .parse_unchecked()
            .expect("parse failed");
        let mut checker = BorrowChecker::new();
        checker.check(&program.arena, &program.exprs);
        checker.get_errors().to_vec()
    }

    fn assert_clean(source: &str) {
        let found = violations(source);
        assert!(found.is_empty(), "unexpected violations: {:?}", found);
    }

    #[test]
    fn simple_programs_pass() {
        assert_clean("let x = 42;");
        assert_clean("let x = 40; let y = 2; x + y");
        assert_clean("let mut x = 1; let y = &mut x;");
        assert_clean("let a = 1; let b = &a; let c = &a;");
    }

    #[test]
    fn mutable_borrow_while_shared_is_rejected() {
        let found = violations("let mut x = 42; let y = &x; let z = &mut x;");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::BorrowWhileMutable);
        assert!(found[0].message.contains("`x`"));
        assert_eq!(found[0].line, 1);
    }

    #[test]
    fn second_mutable_borrow_is_rejected() {
        let found = violations("let mut x = 1; let y = &mut x; let z = &mut x;");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::BorrowWhileMutable);
    }

    #[test]
    fn shared_read_under_mutable_borrow_is_rejected() {
        let found = violations("let mut x = 1; let y = &mut x; x + 1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::BorrowWhileMutable);
        assert!(found[0].message.contains("as immutable"));
    }

    #[test]
    fn mutable_borrow_requires_mut_binding() {
        let found = violations("let x = 1; let y = &mut x;");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::InvalidBorrow);
        assert!(found[0].message.contains("not declared as mutable"));
    }

    #[test]
    fn move_finality() {
        let found = violations("let a = 1; let b = a; a + 1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::UseAfterMove);
        assert_eq!(found[0].message, "Use of moved value: `a`");

        // Moving twice is also a use after move.
        let found = violations("let a = 1; let b = a; let c = a;");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::UseAfterMove);
    }

    #[test]
    fn move_while_borrowed_is_rejected() {
        let found = violations("let a = 1; let r = &a; let b = a;");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::InvalidBorrow);
        assert!(found[0].message.contains("because it is borrowed"));
    }

    #[test]
    fn scope_exit_discards_bindings_and_borrows() {
        // The inner borrow of x dies with the block, so the later mutable
        // borrow is fine.
        assert_clean("let mut x = 1; { let y = &x; y }; let z = &mut x;");
        // Same for a two-phase style check afterwards.
        assert_clean("let mut x = 1; { let y = &x; y }; f(&mut x)");
    }

    #[test]
    fn shadowing_in_nested_scope_is_allowed() {
        assert_clean("let x = 1; { let x = 2; x }; x");
    }

    #[test]
    fn redeclaration_in_same_scope_is_rejected() {
        let found = violations("let x = 1; let x = 2;");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::InvalidBorrow);
        assert!(found[0].message.contains("already declared"));
    }

    #[test]
    fn violations_accumulate_in_order() {
        let found = violations("let a = 1; let b = a; a + a");
        assert_eq!(found.len(), 2);
        assert!(found
            .iter()
            .all(|v| v.kind == ViolationKind::UseAfterMove));
    }

    #[test]
    fn two_phase_borrow_allows_reads_before_activation() {
        // The idiom `v.push(v.len())`: the &mut is reserved, the nested read
        // happens, then the borrow activates.
        assert_clean("let mut v = 1; push(&mut v, len(v))");
        assert_clean("let mut v = 1; push(&mut v, v)");
        assert_clean("let mut v = 1; push(&mut v, v + 1)");
    }

    #[test]
    fn two_phase_borrow_released_after_call() {
        assert_clean("let mut v = 1; touch(&mut v); v + 1");
        assert_clean("let mut v = 1; touch(&mut v); touch(&mut v)");
    }

    #[test]
    fn overlapping_mutable_call_borrows_conflict() {
        let found = violations("let mut v = 1; f(&mut v, &mut v)");
        assert!(!found.is_empty());
        assert_eq!(found[0].kind, ViolationKind::BorrowWhileMutable);
    }

    #[test]
    fn shared_argument_blocks_mutable_activation() {
        let found = violations("let mut v = 1; f(&v, &mut v)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::BorrowWhileMutable);
        assert!(found[0].message.contains("already borrowed"));
    }

    #[test]
    fn let_bound_borrow_blocks_mutable_activation() {
        let found = violations("let mut v = 1; let r = &v; f(&mut v)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::BorrowWhileMutable);
    }

    #[test]
    fn mutable_call_borrow_requires_mut() {
        let found = violations("let v = 1; f(&mut v)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::InvalidBorrow);
    }

    #[test]
    fn checker_state_resets_between_runs() {
        let (tokens, _) = Lexer::tokenize("let a = 1; let b = a; a");
        let program = Parser::new(tokens).parse_unchecked().unwrap();
        let mut checker = BorrowChecker::new();
        assert!(!checker.check(&program.arena, &program.exprs));

        let (tokens, _) = Lexer::tokenize("let a = 1; a + a");
        let clean = Parser::new(tokens).parse_unchecked().unwrap();
        assert!(checker.check(&clean.arena, &clean.exprs));
        assert!(checker.get_errors().is_empty());
    }

    #[test]
    fn borrow_set_records_survive_release() {
        let (tokens, _) = Lexer::tokenize("let mut v = 1; touch(&mut v)");
        let program = Parser::new(tokens).parse_unchecked().unwrap();
        let mut checker = BorrowChecker::new();
        assert!(checker.check(&program.arena, &program.exprs));

        // The record was activated at the call and released afterwards:
        // gone from the live index, still on file.
        let set = checker.borrow_set();
        assert_eq!(set.len(), 1);
        assert_eq!(set.live_borrows_of("v").count(), 0);
        let data = set.get(0).unwrap();
        assert!(matches!(
            data.activation_location,
            TwoPhaseActivation::ActivatedAt(_)
        ));
        assert_eq!(data.borrowed_place, "v");
        assert_eq!(data.assigned_place, "touch");
    }
}
