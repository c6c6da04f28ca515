use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

use crate::step::StepReport;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Boxed error returned by caller-supplied processors and writers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error type returned by the reader, the mappers and the chunk step.
///
/// A single enum shared by every stage so that a run can surface whichever failure stopped it.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input resource is missing or unreadable and the reader is in strict mode.
    #[error("resource error: {message} ({})", .path.display())]
    Resource { path: PathBuf, message: String },

    /// A read was attempted before `open` (or after `close`).
    #[error("reader not open: parser must be open before it can be read")]
    NotOpen,

    /// A row's column count differs from the header's.
    ///
    /// `key_fragment` is the first `key_column_count` fields of the row joined by commas, with
    /// missing fields rendered as empty strings.
    #[error(
        "schema error at line {line}: {key_fragment} column count mismatch ({column_count}, expected {expected})"
    )]
    Schema {
        line: usize,
        key_fragment: String,
        column_count: usize,
        expected: usize,
    },

    /// The reader or step is missing a collaborator or has an invalid setting.
    #[error("config error: {message}")]
    Config { message: String },

    /// The item processor rejected an item.
    #[error("transform error at line {line}: {source}")]
    Transform {
        line: usize,
        #[source]
        source: BoxError,
    },

    /// The writer rejected a chunk. Earlier chunks stay committed.
    #[error("sink error on chunk {chunk} ({items} items): {source}")]
    Sink {
        chunk: usize,
        items: usize,
        #[source]
        source: BoxError,
    },

    /// Low-level delimited-text parser error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A field is not a valid byte sequence in the configured charset.
    #[error("decode error at line {line}: column {column} is not valid {charset}")]
    Decode {
        line: usize,
        column: usize,
        charset: String,
    },

    /// A value could not be parsed into the required [`crate::types::DataType`].
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },
}

impl PipelineError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Line number the error is attached to, when it has one.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Schema { line, .. }
            | Self::Transform { line, .. }
            | Self::Decode { line, .. } => Some(*line),
            Self::ParseError { row, .. } => Some(*row),
            _ => None,
        }
    }

    /// Key fragment of the malformed row, for [`PipelineError::Schema`].
    pub fn key_fragment(&self) -> Option<&str> {
        match self {
            Self::Schema { key_fragment, .. } => Some(key_fragment.as_str()),
            _ => None,
        }
    }

    /// Severity used for observer callbacks and alerting thresholds.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Io(_) | Self::Resource { .. } => Severity::Critical,
            Self::Csv(err) => match err.kind() {
                csv::ErrorKind::Io(_) => Severity::Critical,
                _ => Severity::Error,
            },
            // Writers usually fail on infrastructure; look for I/O in the source chain.
            Self::Sink { source, .. } => {
                if error_chain_contains_io(&**source) {
                    Severity::Critical
                } else {
                    Severity::Error
                }
            }
            Self::NotOpen | Self::Config { .. } => Severity::Error,
            Self::Schema { .. }
            | Self::Transform { .. }
            | Self::Decode { .. }
            | Self::ParseError { .. } => Severity::Error,
        }
    }
}

/// Severity classification for pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (run failed on bad data or bad configuration).
    Error,
    /// Critical error (I/O or other infrastructure failures).
    Critical,
}

/// A chunk step that stopped before the end of its input.
///
/// Carries the progress counters at the moment of the abort. Chunks counted in
/// `report.chunks_flushed` were committed by the writer before the failure.
#[derive(Debug, Error)]
#[error(
    "step aborted after {} rows read, {} items written: {source}",
    .report.rows_read,
    .report.items_written
)]
pub struct StepFailure {
    #[source]
    pub source: PipelineError,
    pub report: StepReport,
}

impl StepFailure {
    /// The error that stopped the run.
    pub fn error(&self) -> &PipelineError {
        &self.source
    }
}

fn error_chain_contains_io(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if err.is::<std::io::Error>() {
            return true;
        }
        cur = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::{PipelineError, Severity};

    #[test]
    fn schema_error_message_leads_with_key_fragment() {
        let err = PipelineError::Schema {
            line: 4,
            key_fragment: "1,".to_string(),
            column_count: 1,
            expected: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("line 4"));
        assert!(msg.contains("1, column count mismatch (1, expected 3)"));
        assert_eq!(err.key_fragment(), Some("1,"));
        assert_eq!(err.line(), Some(4));
    }

    #[test]
    fn io_backed_sink_errors_are_critical() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection reset");
        let err = PipelineError::Sink {
            chunk: 0,
            items: 10,
            source: Box::new(io),
        };
        assert_eq!(err.severity(), Severity::Critical);

        let err = PipelineError::Sink {
            chunk: 0,
            items: 10,
            source: "duplicate key".into(),
        };
        assert_eq!(err.severity(), Severity::Error);
    }
}
