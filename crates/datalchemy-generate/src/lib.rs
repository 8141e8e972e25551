//! Test-data generation engine for Datalchemy.
//!
//! A plan names the tables to fill and how much data each one gets. The
//! engine binds a generator to every column, orders tables parents first,
//! and streams batches into a storage backend through the adapter traits.
//! Foreign-key columns draw their values from rows the parent table has
//! actually committed.

pub mod acceptor;
pub mod adapter;
pub mod engine;
pub mod errors;
pub mod generators;
pub mod memory;
pub mod model;
pub mod planner;
pub mod resolver;
pub mod saver;
pub mod stopper;

pub use adapter::{
    BatchWriter, DomainCatalog, SampleReader, SaveBatch, SaveReport, Saver, SchemaProvider,
    Storage, TableSizer, WriteOutcome,
};
pub use engine::{GenerationEngine, WorkManager};
pub use errors::GenerationError;
pub use memory::MemoryStore;
pub use model::{RunReport, TableReport};
pub use saver::BisectingSaver;
