//! Arithmetic safety inference: decides, per arithmetic node, whether
//! 256-bit wraparound can be ignored when the value is later read as an
//! unbounded integer.
//!
//! The traversal is bottom-up and sequential within one expression tree:
//! a parent node's proof depends on its children's memoized safety facts.
//! Nodes whose no-overflow predicate cannot be proved are wrapped in an
//! explicit mod-2^256 marker instead, which keeps the unbounded-integer
//! translation sound regardless of overflow.

use std::collections::{HashMap, HashSet};

use crate::solver::pool::SolverLease;
use crate::symbolic::expr::{Buf, Prop, Store, Word};
use crate::symbolic::tree::SuccessOutcome;

/// Per-run memo of proven-safe propositions, keyed by structural identity.
/// Also remembers wrap decisions so a structurally identical sub-expression
/// is never re-proved within one run.
#[derive(Debug, Default)]
pub struct SafetyMemo {
    proven: HashMap<Word, Prop>,
    wrapped: HashSet<Word>,
}

impl SafetyMemo {
    /// The accumulated safety fact for an expression; `true` if absent.
    pub fn fact(&self, w: &Word) -> Prop {
        self.proven.get(w).cloned().unwrap_or(Prop::Bool(true))
    }
}

/// Rewrite one outcome so that every arithmetic node is either proved
/// overflow-free or explicitly wrapped.
pub fn make_safe(outcome: SuccessOutcome, solver: &SolverLease) -> SuccessOutcome {
    let mut memo = SafetyMemo::default();
    let conditions = outcome
        .conditions
        .into_iter()
        .map(|p| safe_prop(p, &mut memo, solver))
        .collect();
    let returned = safe_buf(outcome.returned, &mut memo, solver);
    let storage = safe_store(outcome.storage, &mut memo, solver);
    SuccessOutcome { conditions, returned, storage }
}

fn safe_prop(p: Prop, memo: &mut SafetyMemo, solver: &SolverLease) -> Prop {
    match p {
        Prop::Bool(b) => Prop::Bool(b),
        Prop::Eq(a, b) => Prop::Eq(safe_word(a, memo, solver), safe_word(b, memo, solver)),
        Prop::Lt(a, b) => Prop::Lt(safe_word(a, memo, solver), safe_word(b, memo, solver)),
        Prop::Leq(a, b) => Prop::Leq(safe_word(a, memo, solver), safe_word(b, memo, solver)),
        Prop::Gt(a, b) => Prop::Gt(safe_word(a, memo, solver), safe_word(b, memo, solver)),
        Prop::Geq(a, b) => Prop::Geq(safe_word(a, memo, solver), safe_word(b, memo, solver)),
        Prop::Not(inner) => Prop::Not(Box::new(safe_prop(*inner, memo, solver))),
        Prop::And(a, b) => Prop::And(
            Box::new(safe_prop(*a, memo, solver)),
            Box::new(safe_prop(*b, memo, solver)),
        ),
        Prop::Or(a, b) => Prop::Or(
            Box::new(safe_prop(*a, memo, solver)),
            Box::new(safe_prop(*b, memo, solver)),
        ),
    }
}

fn safe_buf(buf: Buf, memo: &mut SafetyMemo, solver: &SolverLease) -> Buf {
    match buf {
        Buf::WriteWord { offset, value, prev } => Buf::WriteWord {
            offset: safe_word(offset, memo, solver),
            value: safe_word(value, memo, solver),
            prev: Box::new(safe_buf(*prev, memo, solver)),
        },
        buf => buf,
    }
}

fn safe_store(store: Store, memo: &mut SafetyMemo, solver: &SolverLease) -> Store {
    match store {
        Store::Write { slot, value, prev } => Store::Write {
            slot: safe_word(slot, memo, solver),
            value: safe_word(value, memo, solver),
            prev: Box::new(safe_store(*prev, memo, solver)),
        },
        store => store,
    }
}

fn safe_word(w: Word, memo: &mut SafetyMemo, solver: &SolverLease) -> Word {
    match w {
        Word::Lit(_) | Word::Var(_) => w,
        Word::Add(a, b) => {
            let a = safe_word(*a, memo, solver);
            let b = safe_word(*b, memo, solver);
            let node = Word::Add(Box::new(a.clone()), Box::new(b.clone()));
            // Mod-2^256 addition wraps downward on overflow, so the
            // unsigned sum staying >= a proves no wrap.
            let pred = Prop::Geq(node.clone(), a.clone());
            decide(node, a, b, pred, memo, solver)
        }
        Word::Sub(a, b) => {
            let a = safe_word(*a, memo, solver);
            let b = safe_word(*b, memo, solver);
            let node = Word::Sub(Box::new(a.clone()), Box::new(b.clone()));
            let pred = Prop::Leq(node.clone(), a.clone());
            decide(node, a, b, pred, memo, solver)
        }
        Word::Mul(a, b) => {
            let a = safe_word(*a, memo, solver);
            let b = safe_word(*b, memo, solver);
            let node = Word::Mul(Box::new(a.clone()), Box::new(b.clone()));
            // Division recovers the multiplicand iff no overflow occurred.
            let pred = Prop::Eq(
                Word::Div(Box::new(node.clone()), Box::new(b.clone())),
                a.clone(),
            );
            decide(node, a, b, pred, memo, solver)
        }
        // No safety proof is attempted for exponentiation (the backend has
        // no symbolic-exponent encoding) or sign extension, whose precise
        // wrap semantics remain an open question; both always wrap.
        Word::Exp(a, b) => {
            let node = Word::Exp(
                Box::new(safe_word(*a, memo, solver)),
                Box::new(safe_word(*b, memo, solver)),
            );
            Word::Wrap(Box::new(node))
        }
        Word::SignExtend(a, b) => {
            let node = Word::SignExtend(
                Box::new(safe_word(*a, memo, solver)),
                Box::new(safe_word(*b, memo, solver)),
            );
            Word::Wrap(Box::new(node))
        }
        Word::Div(a, b) => Word::Div(
            Box::new(safe_word(*a, memo, solver)),
            Box::new(safe_word(*b, memo, solver)),
        ),
        Word::Mod(a, b) => Word::Mod(
            Box::new(safe_word(*a, memo, solver)),
            Box::new(safe_word(*b, memo, solver)),
        ),
        Word::Wrap(x) => Word::Wrap(Box::new(safe_word(*x, memo, solver))),
        Word::Not(x) => Word::Not(Box::new(safe_word(*x, memo, solver))),
        Word::Ite(p, a, b) => Word::Ite(
            Box::new(safe_prop(*p, memo, solver)),
            Box::new(safe_word(*a, memo, solver)),
            Box::new(safe_word(*b, memo, solver)),
        ),
        Word::SLoad(slot) => Word::SLoad(Box::new(safe_word(*slot, memo, solver))),
    }
}

/// Keep the node if `operand facts /\ !pred` is unsatisfiable; otherwise
/// wrap it. Decisions replay from the memo for structurally identical
/// nodes.
fn decide(
    node: Word,
    a: Word,
    b: Word,
    pred: Prop,
    memo: &mut SafetyMemo,
    solver: &SolverLease,
) -> Word {
    if memo.proven.contains_key(&node) {
        return node;
    }
    if memo.wrapped.contains(&node) {
        return Word::Wrap(Box::new(node));
    }
    let query = vec![
        memo.fact(&a),
        memo.fact(&b),
        Prop::Not(Box::new(pred.clone())),
    ];
    if solver.check(&query).is_unsat() {
        let accumulated = Prop::conjoin([pred, memo.fact(&a), memo.fact(&b)]);
        memo.proven.insert(node.clone(), accumulated);
        node
    } else {
        tracing::debug!(node = %node, "wrapping unprovable arithmetic node");
        memo.wrapped.insert(node.clone());
        Word::Wrap(Box::new(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::backend::{SmtSolver, Verdict};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Scripted backend: proves only subtraction predicates, counts calls.
    struct SubOnlySolver {
        calls: AtomicUsize,
    }

    impl SmtSolver for SubOnlySolver {
        fn check(&self, assertions: &[Prop], _timeout: Duration) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let proves_sub = assertions
                .iter()
                .any(|p| matches!(p, Prop::Not(inner) if matches!(**inner, Prop::Leq(..))));
            if proves_sub {
                Verdict::Unsat
            } else {
                Verdict::Sat(Default::default())
            }
        }
    }

    fn lease(solver: Arc<dyn SmtSolver>) -> SolverLease {
        SolverLease::detached(solver, Duration::from_secs(1))
    }

    fn outcome_returning(value: Word) -> SuccessOutcome {
        SuccessOutcome {
            conditions: vec![],
            returned: Buf::single_word(value),
            storage: Store::Abstract,
        }
    }

    #[test]
    fn test_unprovable_addition_gets_wrapped() {
        let solver = Arc::new(SubOnlySolver { calls: AtomicUsize::new(0) });
        let sum = Word::Add(Box::new(Word::var("a")), Box::new(Word::var("b")));
        let out = make_safe(outcome_returning(sum.clone()), &lease(solver));
        assert_eq!(
            out.returned.as_single_word(),
            Some(&Word::Wrap(Box::new(sum)))
        );
    }

    #[test]
    fn test_provable_subtraction_is_kept() {
        let solver = Arc::new(SubOnlySolver { calls: AtomicUsize::new(0) });
        let diff = Word::Sub(Box::new(Word::var("a")), Box::new(Word::var("b")));
        let out = make_safe(outcome_returning(diff.clone()), &lease(solver));
        assert_eq!(out.returned.as_single_word(), Some(&diff));
    }

    #[test]
    fn test_memo_replays_decisions_without_requerying() {
        let solver = Arc::new(SubOnlySolver { calls: AtomicUsize::new(0) });
        let diff = Word::Sub(Box::new(Word::var("a")), Box::new(Word::var("b")));
        // The same subtraction appears in a condition and in the returned
        // value; one proof must cover both.
        let outcome = SuccessOutcome {
            conditions: vec![Prop::Gt(diff.clone(), Word::lit(0))],
            returned: Buf::single_word(diff.clone()),
            storage: Store::Abstract,
        };
        let out = make_safe(outcome, &lease(solver.clone()));
        assert_eq!(out.returned.as_single_word(), Some(&diff));
        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exponentiation_always_wraps() {
        let solver = Arc::new(SubOnlySolver { calls: AtomicUsize::new(0) });
        let pow = Word::Exp(Box::new(Word::var("a")), Box::new(Word::lit(2)));
        let out = make_safe(outcome_returning(pow.clone()), &lease(solver.clone()));
        assert_eq!(
            out.returned.as_single_word(),
            Some(&Word::Wrap(Box::new(pow)))
        );
        // No solver query for always-wrapped node kinds.
        assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_child_facts_feed_parent_proof() {
        // (a - b) + c: the subtraction is proved safe first, and its fact is
        // part of the addition's query.
        struct Capture {
            seen: std::sync::Mutex<Vec<Vec<Prop>>>,
        }
        impl SmtSolver for Capture {
            fn check(&self, assertions: &[Prop], _t: Duration) -> Verdict {
                self.seen.lock().unwrap().push(assertions.to_vec());
                Verdict::Unsat
            }
        }
        let solver = Arc::new(Capture { seen: std::sync::Mutex::new(Vec::new()) });
        let diff = Word::Sub(Box::new(Word::var("a")), Box::new(Word::var("b")));
        let sum = Word::Add(Box::new(diff.clone()), Box::new(Word::var("c")));
        make_safe(outcome_returning(sum), &lease(solver.clone()));

        let seen = solver.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // Second query (the addition) must carry the subtraction's proven
        // fact, not the default `true`.
        assert!(
            matches!(&seen[1][0], Prop::And(..) | Prop::Leq(..)),
            "addition query should include the child's safety fact, got {:?}",
            seen[1][0]
        );
    }
}
