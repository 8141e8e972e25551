use std::fmt::Display;

use thiserror::Error;

/// Errors emitted by the generation engine.
///
/// Payloads are plain strings so an error can be stored and replayed, as the
/// byte-size stopper does once its size poll fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// No provider accepted the column.
    #[error("no generator available for column {column}")]
    NoneAvailable { column: String },
    /// Several providers claimed the column with the same priority.
    #[error("ambiguous generators for column {column}: {} via {reason}", providers.join(", "))]
    Ambiguous {
        column: String,
        reason: String,
        providers: Vec<String>,
    },
    #[error("dependency cycle between tables: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("reference registration after execution started: {0}")]
    ResolverSealed(String),
    /// Failure reported by a storage adapter (sample read, persistence, size poll).
    #[error("{op} failed for {target}: {message}")]
    Adapter {
        op: &'static str,
        target: String,
        message: String,
    },
    #[error("generator failed: {0}")]
    Generator(String),
    #[error("column {column}: {source}")]
    Column {
        column: String,
        source: Box<GenerationError>,
    },
    #[error("worker failed: {0}")]
    Worker(String),
    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn adapter(op: &'static str, target: impl Display, err: impl Display) -> Self {
        GenerationError::Adapter {
            op,
            target: target.to_string(),
            message: err.to_string(),
        }
    }

    /// Attach the column path, keeping cancellation recognisable.
    pub fn in_column(self, column: impl Display) -> Self {
        match self {
            GenerationError::Cancelled => GenerationError::Cancelled,
            other => GenerationError::Column {
                column: column.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerationError::Cancelled)
    }
}

impl From<datalchemy_core::Error> for GenerationError {
    fn from(value: datalchemy_core::Error) -> Self {
        GenerationError::InvalidSchema(value.to_string())
    }
}
