use thiserror::Error;

use crate::verify::VerifyReport;

pub type Result<T> = std::result::Result<T, DecompileError>;

/// Every failure mode is fatal for the contract being decompiled: there is no
/// partial or best-effort specification output.
#[derive(Debug, Error)]
pub enum DecompileError {
    #[error("no storage layout available for contract `{0}`")]
    MissingLayout(String),
    #[error("symbolic exploration left unresolved branches:\n{0}")]
    UnexploredBranch(String),
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),
    #[error("symbolic engine failure: {0}")]
    Engine(String),
    #[error("verification failed:\n{0}")]
    Verification(VerifyReport),
}

impl DecompileError {
    pub fn unsupported(what: impl Into<String>) -> Self {
        DecompileError::UnsupportedConstruct(what.into())
    }
}
