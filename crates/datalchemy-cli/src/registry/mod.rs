mod logging;
mod run;

pub use logging::init_logging;
pub use run::{DryRunSchema, load_dry_run_schema, redact_connection, write_json};

use thiserror::Error;

/// Errors around run inputs and artifacts.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("logging error: {0}")]
    Logging(String),
}

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
