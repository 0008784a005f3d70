//! Execution trees produced by the symbolic engine and their flattening into
//! terminal outcomes.

use crate::symbolic::expr::{Buf, Prop, Store};

/// The engine's result: internal nodes are condition-guarded choices, leaves
/// are fully-explored path results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecTree {
    Leaf(Leaf),
    Branch {
        cond: Prop,
        yes: Box<ExecTree>,
        no: Box<ExecTree>,
    },
}

/// One fully-explored execution path's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leaf {
    Success {
        conditions: Vec<Prop>,
        returned: Buf,
        storage: Store,
    },
    Failure {
        conditions: Vec<Prop>,
    },
    /// The search did not resolve this branch within its bound. Fatal for
    /// the enclosing method/contract.
    Partial {
        reason: String,
    },
}

/// A successful terminal outcome, after flattening.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuccessOutcome {
    pub conditions: Vec<Prop>,
    pub returned: Buf,
    pub storage: Store,
}

impl ExecTree {
    pub fn leaf(leaf: Leaf) -> ExecTree {
        ExecTree::Leaf(leaf)
    }

    pub fn branch(cond: Prop, yes: ExecTree, no: ExecTree) -> ExecTree {
        ExecTree::Branch { cond, yes: Box::new(yes), no: Box::new(no) }
    }

    /// Prune branches whose condition is a literal and drop trivially-true
    /// path conditions from leaves.
    pub fn simplify(self) -> ExecTree {
        match self {
            ExecTree::Leaf(leaf) => ExecTree::Leaf(leaf.simplify()),
            ExecTree::Branch { cond, yes, no } => match cond {
                Prop::Bool(true) => yes.simplify(),
                Prop::Bool(false) => no.simplify(),
                cond => ExecTree::Branch {
                    cond,
                    yes: Box::new(yes.simplify()),
                    no: Box::new(no.simplify()),
                },
            },
        }
    }

    /// Flatten the tree into terminal leaves, pushing every branch condition
    /// along the path into the leaf's own condition set.
    pub fn flatten(self) -> Vec<Leaf> {
        let mut out = Vec::new();
        self.flatten_into(&mut Vec::new(), &mut out);
        out
    }

    fn flatten_into(self, path: &mut Vec<Prop>, out: &mut Vec<Leaf>) {
        match self {
            ExecTree::Leaf(leaf) => out.push(leaf.with_path(path)),
            ExecTree::Branch { cond, yes, no } => {
                path.push(cond.clone());
                yes.flatten_into(path, out);
                path.pop();
                path.push(Prop::not(cond));
                no.flatten_into(path, out);
                path.pop();
            }
        }
    }
}

impl Leaf {
    fn simplify(self) -> Leaf {
        match self {
            Leaf::Success { conditions, returned, storage } => Leaf::Success {
                conditions: prune_trivial(conditions),
                returned,
                storage,
            },
            Leaf::Failure { conditions } => {
                Leaf::Failure { conditions: prune_trivial(conditions) }
            }
            partial => partial,
        }
    }

    fn with_path(self, path: &[Prop]) -> Leaf {
        let prefix = || path.to_vec();
        match self {
            Leaf::Success { conditions, returned, storage } => {
                let mut all = prefix();
                all.extend(conditions);
                Leaf::Success { conditions: all, returned, storage }
            }
            Leaf::Failure { conditions } => {
                let mut all = prefix();
                all.extend(conditions);
                Leaf::Failure { conditions: all }
            }
            partial => partial,
        }
    }
}

fn prune_trivial(conditions: Vec<Prop>) -> Vec<Prop> {
    conditions
        .into_iter()
        .filter(|p| !matches!(p, Prop::Bool(true)))
        .collect()
}
