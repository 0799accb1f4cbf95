// src/error.rs
//
// Error types for shield synthesis, persistence and enforcement.

use std::io;

use thiserror::Error;

/// Failure reported by a caller-supplied collaborator (dynamics or safety
/// predicate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ShieldError {
    /// Persisted shield is malformed, truncated or fails its checksum.
    #[error("corrupt shield data: {0}")]
    CorruptData(String),

    /// Persisted shield uses a container version this build cannot read.
    #[error("unsupported shield format version {found} (expected {expected})")]
    UnsupportedFormat { found: u16, expected: u16 },

    /// State vector cannot be resolved to a cell (wrong length or non-finite).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Action index outside the shield's action space.
    #[error("invalid action {action} (shield has {num_actions} actions)")]
    InvalidAction { action: usize, num_actions: usize },

    /// Dynamics or safety predicate failed or produced non-finite output.
    #[error("collaborator failure: {0}")]
    CollaboratorFailure(String),

    /// Grid construction parameters are inconsistent.
    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    /// Action space is empty, too large, or inconsistent with the data.
    #[error("invalid action space: {0}")]
    InvalidActionSpace(String),

    /// Symbol prefix for generated C code is not a C identifier.
    #[error("invalid C symbol prefix {0:?}")]
    InvalidSymbol(String),

    /// Caller asked for a converged shield but the pass budget ran out.
    #[error("synthesis stopped after {passes} passes without reaching a fixed point")]
    Incomplete { passes: u64 },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<CollaboratorError> for ShieldError {
    fn from(err: CollaboratorError) -> Self {
        ShieldError::CollaboratorFailure(err.message)
    }
}

pub type Result<T, E = ShieldError> = std::result::Result<T, E>;
