pub mod backend;
pub mod pool;
pub mod z3_backend;

pub use backend::{Model, SmtSolver, Verdict};
pub use pool::{SolverLease, SolverPool};
pub use z3_backend::Z3Solver;
