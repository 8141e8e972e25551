//! Core contracts and helpers for Datalchemy.
//!
//! This crate defines the canonical table identity, column type metadata and
//! value model shared by the generation engine, the storage adapters and the CLI.

pub mod error;
pub mod graph;
pub mod identifier;
pub mod schema;
pub mod types;
pub mod validation;
pub mod value;

pub use error::{Error, Result};
pub use graph::{DependencyGraph, topo_order};
pub use identifier::{Identifier, TableName};
pub use schema::{Column, DatasetSchema, ForeignKey};
pub use types::{TargetType, TypeKind};
pub use validation::validate_dataset;
pub use value::Value;
