//! The SMT solver contract: a conjunction of propositions goes in, one of
//! Sat (with a model), Unsat or Unknown comes out within a caller-supplied
//! time budget.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use alloy::primitives::U256;
use serde::Serialize;

use crate::symbolic::expr::Prop;

/// A concrete variable assignment witnessing a Sat verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Model(pub BTreeMap<String, U256>);

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "{{}}");
        }
        let items: Vec<String> =
            self.0.iter().map(|(k, v)| format!("{k} = {v:#x}")).collect();
        write!(f, "{{ {} }}", items.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Sat(Model),
    Unsat,
    /// Timeout or incomplete theory. Callers must treat this as a
    /// verification failure, never as an implicit pass.
    Unknown,
}

impl Verdict {
    pub fn is_unsat(&self) -> bool {
        matches!(self, Verdict::Unsat)
    }

    pub fn is_sat(&self) -> bool {
        matches!(self, Verdict::Sat(_))
    }
}

/// An SMT solver backend. Implementations must be safe to call from
/// multiple worker threads; each call is one independent query.
pub trait SmtSolver: Send + Sync {
    /// Decide satisfiability of the conjunction of `assertions` within
    /// `timeout`. A backend that cannot decide in time returns
    /// [`Verdict::Unknown`].
    fn check(&self, assertions: &[Prop], timeout: Duration) -> Verdict;
}
