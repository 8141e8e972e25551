//! PostgreSQL backend for the Datalchemy generation engine.

mod mapper;
mod provider;
mod queries;
mod storage;
mod writer;

pub use provider::PgSchemaProvider;
pub use storage::{PgSampleReader, PgStorage, PgTableSizer, connect};
pub use writer::PgBatchWriter;
