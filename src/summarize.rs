//! Branch summarization: drive the symbolic engine over creation and
//! runtime code and flatten the results into per-method outcome sets.
//!
//! Methods are summarized concurrently; outcomes of one method are
//! safety-normalized concurrently as well. Within a single outcome the
//! normalizer traversal stays sequential (parent proofs depend on child
//! facts), bounded by one checked-out solver worker.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use alloy::primitives::Bytes;
use tokio::task::JoinSet;

use crate::abi::{CompiledContract, Interface, Method, StorageLayout};
use crate::error::{DecompileError, Result};
use crate::safety::make_safe;
use crate::solver::pool::SolverPool;
use crate::symbolic::engine::{SymBuf, SymbolicEngine, EXPLORATION_BOUND};
use crate::symbolic::expr::Prop;
use crate::symbolic::tree::{Leaf, SuccessOutcome};

/// Outcome set for one summarized method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSummary {
    pub method: Method,
    pub outcomes: BTreeSet<SuccessOutcome>,
}

/// The summarized contract. Every method maps to a non-empty outcome set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSummary {
    pub name: String,
    pub layout: StorageLayout,
    pub constructor_interface: Interface,
    pub constructor_outcomes: BTreeSet<SuccessOutcome>,
    pub methods: BTreeMap<String, MethodSummary>,
}

pub async fn summarize(
    engine: Arc<dyn SymbolicEngine>,
    pool: Arc<SolverPool>,
    contract: &CompiledContract,
) -> Result<ContractSummary> {
    // Checked before any symbolic execution is attempted.
    let layout = contract
        .layout
        .clone()
        .ok_or_else(|| DecompileError::MissingLayout(contract.name.clone()))?;

    tracing::info!(contract = %contract.name, "summarizing creation code");
    let constructor_interface = Interface {
        name: contract.name.clone(),
        decls: contract.constructor_inputs.clone(),
    };
    let constructor_outcomes = summarize_code(
        Arc::clone(&engine),
        Arc::clone(&pool),
        contract.creation.clone(),
        SymBuf::for_constructor(&contract.constructor_inputs),
        "constructor".to_string(),
    )
    .await?;

    let mut join_set = JoinSet::new();
    for method in &contract.methods {
        let engine = Arc::clone(&engine);
        let pool = Arc::clone(&pool);
        let runtime = contract.runtime.clone();
        let method = method.clone();
        join_set.spawn(async move {
            tracing::debug!(method = %method.name, "summarizing runtime method");
            let buf = SymBuf::for_method(&method);
            let outcomes =
                summarize_code(engine, pool, runtime, buf, format!("method `{}`", method.name))
                    .await?;
            Ok::<_, DecompileError>((method.name.clone(), MethodSummary { method, outcomes }))
        });
    }

    let mut methods = BTreeMap::new();
    while let Some(joined) = join_set.join_next().await {
        let (name, summary) = joined
            .map_err(|err| DecompileError::Engine(format!("summarizer task failed: {err:?}")))??;
        methods.insert(name, summary);
    }

    Ok(ContractSummary {
        name: contract.name.clone(),
        layout,
        constructor_interface,
        constructor_outcomes,
        methods,
    })
}

/// Explore one piece of code under one symbolic input buffer and normalize
/// the surviving successful outcomes.
async fn summarize_code(
    engine: Arc<dyn SymbolicEngine>,
    pool: Arc<SolverPool>,
    code: Bytes,
    input: SymBuf,
    what: String,
) -> Result<BTreeSet<SuccessOutcome>> {
    let tree = {
        let engine = Arc::clone(&engine);
        let code = code.clone();
        let input = input.clone();
        tokio::task::spawn_blocking(move || engine.explore(&code, &input, EXPLORATION_BOUND))
            .await
            .map_err(|err| DecompileError::Engine(format!("exploration task failed: {err:?}")))?
            .map_err(|err| DecompileError::Engine(err.to_string()))?
    };

    let leaves = tree.simplify().flatten();

    let unresolved: Vec<String> = leaves
        .iter()
        .filter_map(|leaf| match leaf {
            Leaf::Partial { reason } => Some(format!("  - {what}: {reason}")),
            _ => None,
        })
        .collect();
    if !unresolved.is_empty() {
        return Err(DecompileError::UnexploredBranch(unresolved.join("\n")));
    }

    let successes: Vec<SuccessOutcome> = leaves
        .into_iter()
        .filter_map(|leaf| match leaf {
            Leaf::Success { conditions, returned, storage } => {
                Some(SuccessOutcome { conditions, returned, storage })
            }
            _ => None,
        })
        .collect();

    if successes.is_empty() {
        return Err(DecompileError::unsupported(format!(
            "no reachable successful path for {what}"
        )));
    }

    let mut normalizers = JoinSet::new();
    for outcome in successes {
        let lease = pool.lease().await;
        normalizers.spawn_blocking(move || make_safe(outcome, &lease));
    }

    // Deduplicated by structural equality.
    let mut out = BTreeSet::new();
    while let Some(joined) = normalizers.join_next().await {
        let normalized = joined
            .map_err(|err| DecompileError::Engine(format!("normalizer task failed: {err:?}")))?;
        out.insert(normalized);
    }
    tracing::debug!(%what, outcomes = out.len(), "summarized");
    Ok(out)
}

/// Render a set of path conditions for error messages.
pub fn pretty_conditions(conditions: &[Prop]) -> String {
    if conditions.is_empty() {
        return "true".to_string();
    }
    conditions
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" && ")
}
