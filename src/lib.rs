//! Retrospec library surface.
//!
//! Decompiles EVM bytecode into a behavioural specification and proves the
//! result equivalent to the original code. The pipeline runs in four
//! stages: branch summarization over a pluggable symbolic engine, an
//! arithmetic-safety pass that justifies unbounded-integer reasoning,
//! translation of the normalized outcomes into the specification AST, and
//! a three-phase SMT-backed equivalence check of the generated spec
//! against the bytecode it came from.

use std::sync::Arc;

pub mod abi;
pub mod error;
pub mod partition;
pub mod safety;
pub mod solver;
pub mod spec;
pub mod summarize;
pub mod symbolic;
pub mod verify;

pub use abi::CompiledContract;
pub use error::{DecompileError, Result};
pub use solver::{SolverPool, Z3Solver};
pub use spec::Specification;
pub use summarize::{summarize, ContractSummary};
pub use symbolic::engine::SymbolicEngine;
pub use verify::{verify, VerifyReport};

/// Run the whole pipeline for one compiled contract. A non-clean
/// verification report is an error; the returned specification is always a
/// proved one.
pub async fn decompile(
    engine: Arc<dyn SymbolicEngine>,
    pool: Arc<solver::SolverPool>,
    contract: &CompiledContract,
) -> Result<Specification> {
    let summary = summarize(Arc::clone(&engine), Arc::clone(&pool), contract).await?;
    let specification = spec::translate(&summary)?;
    let report = verify(engine, pool, &specification, contract).await?;
    if !report.is_clean() {
        return Err(DecompileError::Verification(report));
    }
    Ok(specification)
}
