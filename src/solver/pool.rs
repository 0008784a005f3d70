//! Bounded solver worker pool with checkout/checkin discipline.
//!
//! The pool is the one shared mutable resource of the pipeline: its size
//! bounds the number of in-flight queries. Callers either `query` a single
//! conjunction (one permit per query) or `lease` a worker for a run of
//! sequential queries, as the safety normalizer does for one expression
//! tree's bottom-up traversal.
//!
//! Verdicts are cached by rendered query across workers, so structurally
//! identical queries issued from different outcomes are proved once.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::solver::backend::{SmtSolver, Verdict};
use crate::symbolic::expr::Prop;

pub struct SolverPool {
    solver: Arc<dyn SmtSolver>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    cache: DashMap<String, Verdict>,
}

impl SolverPool {
    pub fn new(solver: Arc<dyn SmtSolver>, workers: usize, timeout: Duration) -> Arc<Self> {
        Arc::new(SolverPool {
            solver,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
            cache: DashMap::new(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Check out one worker. The lease holds a pool permit until dropped.
    pub async fn lease(self: &Arc<Self>) -> SolverLease {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok();
        SolverLease { pool: Arc::clone(self), _permit: permit }
    }

    /// One independent query: check out a worker, run the check on the
    /// blocking pool, check the worker back in.
    pub async fn query(self: &Arc<Self>, assertions: Vec<Prop>) -> Verdict {
        let key = render(&assertions);
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let lease = self.lease().await;
        let verdict = tokio::task::spawn_blocking(move || lease.check(&assertions)).await;
        match verdict {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!("solver worker failed: {err:?}");
                Verdict::Unknown
            }
        }
    }

    fn check_uncached(&self, assertions: &[Prop]) -> Verdict {
        let key = render(assertions);
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        tracing::debug!(query = %key, "solver query");
        let verdict = self.solver.check(assertions, self.timeout);
        self.cache.insert(key, verdict.clone());
        verdict
    }
}

/// A checked-out solver worker. `check` blocks the calling thread; leases
/// are meant to be used from `spawn_blocking` tasks.
pub struct SolverLease {
    pool: Arc<SolverPool>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl SolverLease {
    /// A lease bound to a dedicated solver without pool admission; used by
    /// callers that manage their own concurrency (and by tests).
    pub fn detached(solver: Arc<dyn SmtSolver>, timeout: Duration) -> SolverLease {
        SolverLease {
            pool: SolverPool::new(solver, 1, timeout),
            _permit: None,
        }
    }

    pub fn check(&self, assertions: &[Prop]) -> Verdict {
        self.pool.check_uncached(assertions)
    }
}

fn render(assertions: &[Prop]) -> String {
    let parts: Vec<String> = assertions.iter().map(|p| p.to_string()).collect();
    parts.join(" & ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSolver {
        calls: AtomicUsize,
    }

    impl SmtSolver for CountingSolver {
        fn check(&self, _assertions: &[Prop], _timeout: Duration) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Verdict::Unsat
        }
    }

    #[tokio::test]
    async fn test_identical_queries_hit_the_cache() {
        let solver = Arc::new(CountingSolver { calls: AtomicUsize::new(0) });
        let pool = SolverPool::new(solver.clone(), 2, Duration::from_secs(1));
        let q = vec![Prop::Bool(false)];
        assert_eq!(pool.query(q.clone()).await, Verdict::Unsat);
        assert_eq!(pool.query(q).await, Verdict::Unsat);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.cache_size(), 1);
    }
}
