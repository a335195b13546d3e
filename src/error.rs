//! Error taxonomy for pipeline runs.
//!
//! Stage implementations report failures as `anyhow::Error`; the runner
//! classifies them into [`PipelineError`] variants when a failure aborts the
//! run. Non-fatal failures never surface as errors, they are counted in the
//! report instead.

use thiserror::Error;

/// A record whose payload could not be turned into a domain object.
///
/// Always non-fatal: the record is counted as failed and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {position}: {reason}")]
pub struct MappingError {
    pub position: u64,
    pub reason: String,
}

impl MappingError {
    pub fn new(position: u64, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

/// Failure returned by a mapper.
#[derive(Debug, Error)]
pub enum MapFailure {
    /// Required field missing or failed coercion. Per-record.
    #[error(transparent)]
    Invalid(#[from] MappingError),
    /// The mapper itself is broken (lost lookup table, poisoned state).
    /// Aborts the run.
    #[error("mapper infrastructure failure: {0:#}")]
    Infrastructure(anyhow::Error),
}

/// Failure returned by a sink when writing to its backing store.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The store rejected this record.
    #[error("write failed: {0:#}")]
    Write(anyhow::Error),
    /// The store could not be reached at all.
    #[error("store unavailable: {0:#}")]
    Unavailable(anyhow::Error),
}

impl SinkError {
    pub fn write(err: impl Into<anyhow::Error>) -> Self {
        Self::Write(err.into())
    }

    pub fn unavailable(err: impl Into<anyhow::Error>) -> Self {
        Self::Unavailable(err.into())
    }
}

/// Cause attached to an aborted run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source '{source_name}' unavailable: {cause:#}")]
    SourceUnavailable {
        source_name: String,
        cause: anyhow::Error,
    },

    #[error("source '{source_name}' failed after record {position}: {cause:#}")]
    Source {
        source_name: String,
        position: u64,
        cause: anyhow::Error,
    },

    #[error("source '{source_name}' produced record {got} after record {previous}")]
    OutOfOrder {
        source_name: String,
        previous: u64,
        got: u64,
    },

    #[error("mapper failed on record {position}: {cause:#}")]
    Mapping { position: u64, cause: anyhow::Error },

    #[error("processor '{stage}' failed on record {position}: {cause:#}")]
    Processing {
        stage: String,
        position: u64,
        cause: anyhow::Error,
    },

    #[error("sink '{stage}' failed on record {position}: {cause}")]
    Sink {
        stage: String,
        position: u64,
        cause: SinkError,
    },

    #[error("stage '{stage}' failed to flush: {cause:#}")]
    Flush { stage: String, cause: anyhow::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_error_display() {
        let err = MappingError::new(4, "missing field 'user'");
        assert_eq!(err.to_string(), "record 4: missing field 'user'");
    }

    #[test]
    fn test_map_failure_from_mapping_error() {
        let failure: MapFailure = MappingError::new(2, "bad id").into();
        assert!(matches!(failure, MapFailure::Invalid(ref e) if e.position == 2));
        assert_eq!(failure.to_string(), "record 2: bad id");
    }

    #[test]
    fn test_processing_error_display_includes_chain() {
        let cause = anyhow::anyhow!("connection reset").context("index request");
        let err = PipelineError::Processing {
            stage: "indexer".to_string(),
            position: 7,
            cause,
        };
        assert_eq!(
            err.to_string(),
            "processor 'indexer' failed on record 7: index request: connection reset"
        );
    }

    #[test]
    fn test_sink_error_display() {
        let err = PipelineError::Sink {
            stage: "tweet-table".to_string(),
            position: 3,
            cause: SinkError::write(anyhow::anyhow!("UNIQUE constraint failed")),
        };
        assert_eq!(
            err.to_string(),
            "sink 'tweet-table' failed on record 3: write failed: UNIQUE constraint failed"
        );
    }
}
