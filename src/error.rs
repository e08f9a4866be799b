//! Run-level errors with stable codes for the wire

use thiserror::Error;

/// Errors that abort a whole batching run
///
/// Per-order and per-cluster problems (geocoding, routing, a failed batch
/// write) are recovered inside the run and reported in `BatchRunResult`.
#[derive(Debug, Error)]
pub enum BatchingError {
    /// Missing or invalid configuration; detected before any write
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Pending orders or collection points could not be read
    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),

    /// A cluster could not be sequenced even with the geographic heuristic
    #[error("optimization failed: {0}")]
    Optimization(String),
}

impl BatchingError {
    pub const fn code(&self) -> &'static str {
        match self {
            BatchingError::Configuration(_) => "CONFIGURATION_ERROR",
            BatchingError::Database(_) => "DATABASE_ERROR",
            BatchingError::Optimization(_) => "OPTIMIZATION_FAILED",
        }
    }
}

/// Code used in `ClusterFailure` when a batch write was rolled back
pub const PERSISTENCE_FAILED: &str = "DATABASE_ERROR";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BatchingError::Configuration("x".into()).code(),
            "CONFIGURATION_ERROR"
        );
        assert_eq!(
            BatchingError::Database(anyhow::anyhow!("down")).code(),
            "DATABASE_ERROR"
        );
        assert_eq!(
            BatchingError::Optimization("empty".into()).code(),
            "OPTIMIZATION_FAILED"
        );
    }

    #[test]
    fn test_error_display_includes_detail() {
        let err = BatchingError::Configuration("VALHALLA_URL must be set".into());
        assert_eq!(err.to_string(), "configuration error: VALHALLA_URL must be set");
    }
}
