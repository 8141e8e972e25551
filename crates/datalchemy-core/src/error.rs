use thiserror::Error;

/// Core error type shared across Datalchemy crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The dataset schema violates internal invariants.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Convenience alias for results returned by Datalchemy crates.
pub type Result<T> = std::result::Result<T, Error>;
