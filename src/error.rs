//! Error kinds shared by training and prediction.

use thiserror::Error;

/// Failure modes raised by the core training/prediction engine.
///
/// `LevelNotObserved` is deliberately absent here: it is a
/// recoverable warning, not a failure, and is surfaced as a
/// [`crate::signature::Warning`] alongside a successful result instead.
#[derive(Debug, Error, PartialEq)]
pub enum ForestError {
    #[error("query against a dormant predictor block (no session installed)")]
    NotInitialized,

    #[error("a session is already installed; deinstall it before installing another")]
    AlreadyInitialized,

    #[error("factor predictor set at predict time does not match training signature")]
    SignatureMismatch,

    #[error("arity error: {0}")]
    ArityError(String),

    #[error("tree height exceeded {slop_factor}x the estimate; retry with a larger pre-tree arena")]
    BudgetExceeded { slop_factor: f64 },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ForestError>;
