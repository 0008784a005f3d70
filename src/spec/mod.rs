//! Specification AST, simplifier and the summary-to-specification
//! translator.

pub mod ast;
pub mod simplify;
pub mod translate;

pub use ast::{
    Behaviour, Constructor, Exp, Pos, Sort, SpecContract, Specification, StorageRef,
    StorageUpdate, TypedExp, When,
};
pub use simplify::simplify;
pub use translate::translate;
