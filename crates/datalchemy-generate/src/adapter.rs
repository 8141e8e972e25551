//! Seams between the engine and the database it fills.
//!
//! Adapters are async traits so both the Postgres backend and the in-memory
//! store can sit behind the same executor.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use datalchemy_core::{DatasetSchema, Identifier, Value};
use datalchemy_plan::{ColumnSettings, Target};

use crate::errors::GenerationError;

/// Enum labels keyed by type name, as reported by the backend.
pub type DomainCatalog = BTreeMap<String, Vec<String>>;

/// Resolves plan names into dataset schemas.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Canonical table identity for a plan target.
    fn target_identifier(&self, target: &Target) -> Identifier {
        target.identifier()
    }

    /// Canonical table identity and column name for a user override.
    fn column_identifier(&self, settings: &ColumnSettings) -> (Identifier, String) {
        (settings.table_identifier(), settings.column.clone())
    }

    async fn data_source(&self, id: &Identifier) -> Result<DatasetSchema, GenerationError>;

    /// Enumerated domains known to the backend.
    async fn domains(&self) -> Result<DomainCatalog, GenerationError> {
        Ok(DomainCatalog::new())
    }
}

/// Reads a statistical sample of one column's stored values.
#[async_trait]
pub trait SampleReader: Send + Sync {
    async fn read_values(&self, cancel: &CancellationToken) -> Result<Vec<Value>, GenerationError>;
}

/// Reports the current on-disk size of one table.
#[async_trait]
pub trait TableSizer: Send + Sync {
    async fn table_size(&self, cancel: &CancellationToken) -> Result<u64, GenerationError>;
}

/// Persists batches, marking the rows the database refused.
#[async_trait]
pub trait Saver: Send + Sync {
    async fn save(&self, batch: &mut SaveBatch) -> Result<SaveReport, GenerationError>;

    /// Insert `count` rows made only of database defaults.
    async fn save_all_default_values(
        &self,
        schema: &DatasetSchema,
        count: usize,
    ) -> Result<SaveReport, GenerationError>;
}

/// Outcome of a single atomic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every row was stored; bytes is the approximate payload written.
    Committed { bytes: u64 },
    /// Nothing was stored because some row broke a constraint.
    ConstraintViolation(String),
}

/// Atomic all-or-nothing writes, the primitive a [`Saver`] is built on.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Store `rows`, writing only the `columns` positions of each row.
    async fn write_rows(
        &self,
        schema: &DatasetSchema,
        columns: &[usize],
        rows: &[Vec<Value>],
    ) -> Result<WriteOutcome, GenerationError>;

    async fn write_default_rows(
        &self,
        schema: &DatasetSchema,
        count: usize,
    ) -> Result<WriteOutcome, GenerationError>;
}

/// Everything the engine needs from the target database besides schemas.
pub trait Storage: Send + Sync {
    fn saver(&self) -> Arc<dyn Saver>;

    fn sample_reader(
        &self,
        table: &Identifier,
        column: &str,
        limit: usize,
    ) -> Arc<dyn SampleReader>;

    fn table_sizer(&self, table: &Identifier) -> Arc<dyn TableSizer>;
}

/// A set of generated rows for one table.
///
/// Rows are full width; positions in `excluded` hold placeholders and are
/// left for the database to fill.
#[derive(Debug, Clone)]
pub struct SaveBatch {
    pub schema: Arc<DatasetSchema>,
    pub rows: Vec<Vec<Value>>,
    /// Parallel to `rows`; cleared for rows the database refused.
    pub valid: Vec<bool>,
    pub excluded: BTreeSet<usize>,
}

impl SaveBatch {
    pub fn new(schema: Arc<DatasetSchema>, excluded: BTreeSet<usize>, capacity: usize) -> Self {
        Self {
            schema,
            rows: Vec::with_capacity(capacity),
            valid: Vec::with_capacity(capacity),
            excluded,
        }
    }

    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
        self.valid.push(true);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column positions written explicitly, in schema order.
    pub fn included_columns(&self) -> Vec<usize> {
        (0..self.schema.columns.len())
            .filter(|idx| !self.excluded.contains(idx))
            .collect()
    }

    /// Values of one column across the rows that were stored.
    pub fn committed_values(&self, column: usize) -> impl Iterator<Item = &Value> {
        self.rows
            .iter()
            .zip(&self.valid)
            .filter(|(_, valid)| **valid)
            .filter_map(move |(row, _)| row.get(column))
    }
}

/// Counters returned by a save call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub rows: u64,
    pub bytes: u64,
    pub constraint_violations: u64,
}

impl SaveReport {
    pub fn merge(&mut self, other: &SaveReport) {
        self.rows += other.rows;
        self.bytes += other.bytes;
        self.constraint_violations += other.constraint_violations;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalchemy_core::{Column, TargetType, TypeKind};

    #[test]
    fn committed_values_skip_rejected_rows() {
        let schema = Arc::new(DatasetSchema::new(
            Identifier::new("public", "t"),
            vec![
                Column::new("id", TargetType::new(TypeKind::Int, "integer")),
                Column::new("name", TargetType::new(TypeKind::Text, "text")),
            ],
        ));
        let mut batch = SaveBatch::new(schema, BTreeSet::from([0]), 3);
        for id in 0..3 {
            batch.push(vec![Value::Null, Value::String(format!("n{id}"))]);
        }
        batch.valid[1] = false;

        assert_eq!(batch.included_columns(), vec![1]);
        let names: Vec<_> = batch.committed_values(1).filter_map(Value::as_str).collect();
        assert_eq!(names, vec!["n0", "n2"]);
    }
}
