pub mod engine;
pub mod expr;
pub mod tree;
