//! error.rs
//! Error taxonomy for the coordination layer.
//!
//! - Connection: store unreachable on connect/reconnect. Callers disable the feature, never the process.
//! - Read/Write: tag I/O failed on an established session (or the session is gone).
//! - StepFailure: an external engine did not complete its step. Local to one cycle.

use thiserror::Error;

pub type LinkResult<T> = Result<T, LinkError>;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("read of {tag} failed: {reason}")]
    Read { tag: String, reason: String },

    #[error("write of {tag} failed: {reason}")]
    Write { tag: String, reason: String },

    #[error("invalid tag address '{0}'")]
    Address(String),

    #[error("supervision position {0} outside [-1, 4]")]
    Supervision(i32),

    #[error("data store error: {0}")]
    Server(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("module {0} has not written its initial value")]
    NotInitialized(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// Read/write faults on critical tags disable a module; this tells them apart
    /// from configuration mistakes.
    pub fn is_tag_fault(&self) -> bool {
        matches!(
            self,
            LinkError::Read { .. } | LinkError::Write { .. } | LinkError::Connection { .. }
        )
    }
}

/// External step (integrator, NLP solve, filter update) did not complete.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{engine} step failed: {reason}")]
pub struct StepFailure {
    pub engine: &'static str,
    pub reason: String,
}

impl StepFailure {
    pub fn new(engine: &'static str, reason: impl Into<String>) -> Self {
        Self {
            engine,
            reason: reason.into(),
        }
    }
}
