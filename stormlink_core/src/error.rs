//! Error types for the linkage engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during a linkage run.
///
/// "No storm found" is never an error: unlinked events are recorded in the
/// output tables instead.
#[derive(Debug, Error)]
pub enum LinkageError {
    /// Invalid parameter or parameter combination
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    
    /// Event-type string outside the supported set
    #[error("Unrecognized event type \"{0}\" (expected one of: wind, tornado, tornadogenesis)")]
    InvalidEventType(String),
    
    /// Storm-track table violates a structural invariant
    #[error("Malformed storm table: {0}")]
    MalformedStorms(String),
    
    /// Event table violates a structural invariant
    #[error("Malformed event table: {0}")]
    MalformedEvents(String),
    
    /// Same tornado ID recorded with different start times in adjacent periods
    #[error("Tornado \"{tornado_id}\" starts at {early_start_unix_sec} in the early period but at {late_start_unix_sec} in the late period")]
    InconsistentTornadoStart {
        tornado_id: String,
        early_start_unix_sec: i64,
        late_start_unix_sec: i64,
    },
    
    /// Linkage file required but absent
    #[error("Cannot find linkage file; expected at \"{}\"", .0.display())]
    MissingFile(PathBuf),
    
    /// SPC date string not in `yyyymmdd` form
    #[error("Invalid SPC date \"{0}\" (expected yyyymmdd)")]
    InvalidSpcDate(String),
    
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkageError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
    
    /// Creates a malformed-storm-table error.
    pub fn storms(msg: impl Into<String>) -> Self {
        Self::MalformedStorms(msg.into())
    }
    
    /// Creates a malformed-event-table error.
    pub fn events(msg: impl Into<String>) -> Self {
        Self::MalformedEvents(msg.into())
    }
}

/// Result type for linkage operations.
pub type Result<T> = std::result::Result<T, LinkageError>;

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_error_display() {
        let err = LinkageError::config("padding must be >= max link distance");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: padding must be >= max link distance"
        );
        
        let err = LinkageError::InconsistentTornadoStart {
            tornado_id: "t1".into(),
            early_start_unix_sec: 10,
            late_start_unix_sec: 20,
        };
        assert!(err.to_string().contains("\"t1\""));
    }
}
