//! Error types for block streaming.
//!
//! Segmentation itself never fails: malformed fences and empty buffers
//! degrade to empty results. Errors only come from loading configuration,
//! talking to a run whose actor is gone, or a broadcaster rejecting an event.

use thiserror::Error;

/// Errors that can occur while configuring or driving a block stream.
#[derive(Error, Debug)]
pub enum BlockStreamError {
    /// Configuration error (invalid thresholds, unknown mode, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to read a configuration file.
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration file is not valid TOML for this schema.
    #[error("TOML error: {0}")]
    Toml(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// The run's actor is no longer running.
    #[error("Block stream closed for session {session_id} run {run_id}")]
    Closed {
        /// Session the run belonged to.
        session_id: String,
        /// Run identifier.
        run_id: String,
    },

    /// The broadcast collaborator rejected an event.
    #[error("Publish error: {0}")]
    Publish(String),
}

impl BlockStreamError {
    /// Build a `Closed` error for a run.
    pub fn closed(session_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        BlockStreamError::Closed {
            session_id: session_id.into(),
            run_id: run_id.into(),
        }
    }

    /// Whether this error means the run is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, BlockStreamError::Closed { .. })
    }
}

impl From<std::io::Error> for BlockStreamError {
    fn from(err: std::io::Error) -> Self {
        BlockStreamError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for BlockStreamError {
    fn from(err: toml::de::Error) -> Self {
        BlockStreamError::Toml(err.to_string())
    }
}

impl From<serde_json::Error> for BlockStreamError {
    fn from(err: serde_json::Error) -> Self {
        BlockStreamError::Json(err.to_string())
    }
}

/// Result type for block streaming operations.
pub type BlockStreamResult<T> = std::result::Result<T, BlockStreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BlockStreamError::Config("min_chars must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: min_chars must be positive"
        );

        let err = BlockStreamError::closed("s-1", "r-2");
        assert_eq!(err.to_string(), "Block stream closed for session s-1 run r-2");
        assert!(err.is_closed());
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse_err = toml::from_str::<toml::Value>("enabled = = true").unwrap_err();
        let err: BlockStreamError = parse_err.into();
        assert!(matches!(err, BlockStreamError::Toml(_)));
        assert!(!err.is_closed());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BlockStreamError = io_err.into();
        assert!(matches!(err, BlockStreamError::Io(_)));
    }
}
