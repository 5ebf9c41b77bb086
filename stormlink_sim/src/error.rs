//! Error types for the scenario harness.

use stormlink_core::LinkageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Linkage failed: {0}")]
    Linkage(#[from] LinkageError),
    
    #[error("Unknown synthetic cell: {0}")]
    UnknownCell(String),
    
    #[error("Invalid scenario setup: {0}")]
    Setup(String),
    
    #[error("Invariant violated: {0}")]
    Invariant(String),
    
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}
