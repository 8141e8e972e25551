//! In-memory backend enforcing NOT NULL, unique and foreign-key constraints.
//!
//! Used for dry runs and as the storage side of the engine tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use tokio_util::sync::CancellationToken;

use datalchemy_core::{DatasetSchema, Identifier, Value, validate_dataset};

use crate::adapter::{
    BatchWriter, DomainCatalog, SampleReader, Saver, SchemaProvider, Storage, TableSizer,
    WriteOutcome,
};
use crate::errors::GenerationError;
use crate::generators::seeded_rng;
use crate::saver::BisectingSaver;

/// Per-row overhead counted towards the table size.
const ROW_OVERHEAD: u64 = 24;
/// In-row width of a reference to an out-of-row payload.
const OUT_OF_ROW_REF: u64 = 4;

#[derive(Debug)]
struct MemoryTable {
    schema: DatasetSchema,
    rows: Vec<Vec<Value>>,
    next_serial: i64,
    bytes: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<Identifier, MemoryTable>,
    domains: DomainCatalog,
}

/// Shared handle to an in-memory database. Clones see the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    /// Seeds every sample reader, keyed by table and column.
    sample_seed: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose sample reads are reproducible under `seed`.
    pub fn with_sample_seed(seed: u64) -> Self {
        Self {
            sample_seed: seed,
            ..Self::default()
        }
    }

    pub fn create_table(&self, schema: DatasetSchema) -> Result<(), GenerationError> {
        validate_dataset(&schema)?;
        let mut state = self.lock();
        if state.tables.contains_key(&schema.id) {
            return Err(GenerationError::InvalidSchema(format!(
                "table {} already exists",
                schema.id
            )));
        }
        state.tables.insert(
            schema.id.clone(),
            MemoryTable {
                schema,
                rows: Vec::new(),
                next_serial: 0,
                bytes: 0,
            },
        );
        Ok(())
    }

    pub fn add_domain(&self, name: impl Into<String>, labels: &[&str]) {
        self.lock().domains.insert(
            name.into(),
            labels.iter().map(|label| label.to_string()).collect(),
        );
    }

    /// Insert rows through the regular constraint checks.
    pub fn insert_rows(
        &self,
        table: &Identifier,
        rows: Vec<Vec<Value>>,
    ) -> Result<WriteOutcome, GenerationError> {
        let schema = self.schema(table)?;
        let columns: Vec<usize> = (0..schema.columns.len()).collect();
        self.write(&schema, &columns, &rows)
    }

    pub fn rows(&self, table: &Identifier) -> Vec<Vec<Value>> {
        self.lock()
            .tables
            .get(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &Identifier) -> usize {
        self.lock()
            .tables
            .get(table)
            .map_or(0, |table| table.rows.len())
    }

    pub fn column_values(&self, table: &Identifier, column: &str) -> Vec<Value> {
        let state = self.lock();
        let Some(table) = state.tables.get(table) else {
            return Vec::new();
        };
        let Some(idx) = table.schema.column_index(column) else {
            return Vec::new();
        };
        table.rows.iter().map(|row| row[idx].clone()).collect()
    }

    fn schema(&self, table: &Identifier) -> Result<DatasetSchema, GenerationError> {
        self.lock()
            .tables
            .get(table)
            .map(|table| table.schema.clone())
            .ok_or_else(|| GenerationError::InvalidSchema(format!("table {table} not found")))
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Materialize, check and append rows atomically.
    fn write(
        &self,
        schema: &DatasetSchema,
        columns: &[usize],
        rows: &[Vec<Value>],
    ) -> Result<WriteOutcome, GenerationError> {
        let mut state = self.lock();
        let Some(table) = state.tables.get(&schema.id) else {
            return Err(GenerationError::adapter("write", &schema.id, "table does not exist"));
        };

        let mut serial = table.next_serial;
        let candidate: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| materialize(&table.schema, columns, row, &mut serial))
            .collect();

        if let Some(reason) = state.violation(&schema.id, &candidate) {
            return Ok(WriteOutcome::ConstraintViolation(reason));
        }

        let Some(table) = state.tables.get_mut(&schema.id) else {
            return Err(GenerationError::adapter("write", &schema.id, "table does not exist"));
        };
        // Out-of-row payloads stay out of the table size, as large objects do.
        let bytes: u64 = candidate
            .iter()
            .map(|row| {
                let width: u64 = row
                    .iter()
                    .zip(&table.schema.columns)
                    .map(|(value, column)| match value {
                        Value::Null => 0,
                        _ if column.target_type.out_of_row => OUT_OF_ROW_REF,
                        _ => value.approx_size(),
                    })
                    .sum();
                ROW_OVERHEAD + width
            })
            .sum();
        table.next_serial = serial;
        table.bytes += bytes;
        table.rows.extend(candidate);
        Ok(WriteOutcome::Committed { bytes })
    }
}

impl MemoryState {
    /// First constraint the candidate rows would break, if any.
    fn violation(&self, table_id: &Identifier, candidate: &[Vec<Value>]) -> Option<String> {
        let table = self.tables.get(table_id)?;
        let schema = &table.schema;

        for row in candidate {
            for (idx, column) in schema.columns.iter().enumerate() {
                if !column.target_type.nullable && row[idx].is_null() {
                    return Some(format!("null value in column {}", column.name));
                }
            }
        }

        for group in &schema.unique_groups {
            let Some(indices) = indices(schema, group) else {
                continue;
            };
            let mut seen: HashSet<String> = table
                .rows
                .iter()
                .filter_map(|row| key(row, &indices))
                .collect();
            for row in candidate {
                if let Some(key) = key(row, &indices) {
                    if !seen.insert(key) {
                        return Some(format!("duplicate key on ({})", group.join(", ")));
                    }
                }
            }
        }

        for fk in &schema.foreign_keys {
            let Some(child) = indices(schema, &fk.columns) else {
                continue;
            };
            let Some(parent) = self.tables.get(&fk.referenced) else {
                return Some(format!("referenced table {} does not exist", fk.referenced));
            };
            let Some(parent_indices) = indices(&parent.schema, &fk.referenced_columns) else {
                return Some(format!("referenced columns missing in {}", fk.referenced));
            };
            let mut known: HashSet<String> = parent
                .rows
                .iter()
                .filter_map(|row| key(row, &parent_indices))
                .collect();
            if fk.referenced == *table_id {
                known.extend(candidate.iter().filter_map(|row| key(row, &parent_indices)));
            }
            for row in candidate {
                if let Some(key) = key(row, &child) {
                    if !known.contains(&key) {
                        return Some(format!(
                            "({}) not present in {}",
                            fk.columns.join(", "),
                            fk.referenced
                        ));
                    }
                }
            }
        }

        None
    }
}

fn indices(schema: &DatasetSchema, columns: &[String]) -> Option<Vec<usize>> {
    columns
        .iter()
        .map(|column| schema.column_index(column))
        .collect()
}

/// Composite key; rows with a NULL part take no part in the constraint.
fn key(row: &[Value], indices: &[usize]) -> Option<String> {
    let mut parts = Vec::with_capacity(indices.len());
    for idx in indices {
        let value = &row[*idx];
        if value.is_null() {
            return None;
        }
        parts.push(value.key());
    }
    Some(parts.join("\u{1f}"))
}

fn materialize(
    schema: &DatasetSchema,
    columns: &[usize],
    row: &[Value],
    serial: &mut i64,
) -> Vec<Value> {
    schema
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            if columns.contains(&idx) {
                return row.get(idx).cloned().unwrap_or(Value::Null);
            }
            if column.target_type.auto_increment {
                *serial += 1;
                return Value::Int64(*serial);
            }
            column
                .target_type
                .default_expr
                .as_deref()
                .map_or(Value::Null, default_value)
        })
        .collect()
}

/// Evaluate the handful of default expressions the store understands.
fn default_value(expr: &str) -> Value {
    let expr = expr.trim();
    let lowered = expr.to_lowercase();
    if lowered == "now()" || lowered == "current_timestamp" {
        return Value::Timestamp(Utc::now().naive_utc());
    }
    if lowered == "true" || lowered == "false" {
        return Value::Bool(lowered == "true");
    }
    if let Ok(number) = expr.parse::<i64>() {
        return Value::Int64(number);
    }
    if let Ok(number) = expr.parse::<f64>() {
        return Value::Float64(number);
    }
    let quoted = expr.split("::").next().unwrap_or(expr);
    if let Some(text) = quoted.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')) {
        return Value::String(text.to_string());
    }
    Value::Null
}

#[async_trait]
impl BatchWriter for MemoryStore {
    async fn write_rows(
        &self,
        schema: &DatasetSchema,
        columns: &[usize],
        rows: &[Vec<Value>],
    ) -> Result<WriteOutcome, GenerationError> {
        self.write(schema, columns, rows)
    }

    async fn write_default_rows(
        &self,
        schema: &DatasetSchema,
        count: usize,
    ) -> Result<WriteOutcome, GenerationError> {
        let rows = vec![Vec::new(); count];
        self.write(schema, &[], &rows)
    }
}

#[async_trait]
impl SchemaProvider for MemoryStore {
    async fn data_source(&self, id: &Identifier) -> Result<DatasetSchema, GenerationError> {
        self.schema(id)
    }

    async fn domains(&self) -> Result<DomainCatalog, GenerationError> {
        Ok(self.lock().domains.clone())
    }
}

impl Storage for MemoryStore {
    fn saver(&self) -> Arc<dyn Saver> {
        Arc::new(BisectingSaver::new(self.clone()))
    }

    fn sample_reader(
        &self,
        table: &Identifier,
        column: &str,
        limit: usize,
    ) -> Arc<dyn SampleReader> {
        Arc::new(MemorySample {
            store: self.clone(),
            table: table.clone(),
            column: column.to_string(),
            limit,
            rng: Mutex::new(seeded_rng(
                self.sample_seed,
                &format!("{table}.{column}#sample"),
            )),
        })
    }

    fn table_sizer(&self, table: &Identifier) -> Arc<dyn TableSizer> {
        Arc::new(MemorySizer {
            store: self.clone(),
            table: table.clone(),
        })
    }
}

struct MemorySample {
    store: MemoryStore,
    table: Identifier,
    column: String,
    limit: usize,
    rng: Mutex<ChaCha8Rng>,
}

impl MemorySample {
    fn sample(&self) -> Result<Vec<Value>, GenerationError> {
        let state = self.store.lock();
        let target = format!("{}.{}", self.table, self.column);
        let table = state
            .tables
            .get(&self.table)
            .ok_or_else(|| GenerationError::adapter("sample read", &target, "table not found"))?;
        let idx = table
            .schema
            .column_index(&self.column)
            .ok_or_else(|| GenerationError::adapter("sample read", &target, "column not found"))?;
        let values: Vec<&Value> = table
            .rows
            .iter()
            .map(|row| &row[idx])
            .filter(|value| !value.is_null())
            .collect();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values
            .choose_multiple(&mut *rng, self.limit)
            .map(|value| (*value).clone())
            .collect())
    }
}

#[async_trait]
impl SampleReader for MemorySample {
    async fn read_values(&self, cancel: &CancellationToken) -> Result<Vec<Value>, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        self.sample()
    }
}

struct MemorySizer {
    store: MemoryStore,
    table: Identifier,
}

#[async_trait]
impl TableSizer for MemorySizer {
    async fn table_size(&self, cancel: &CancellationToken) -> Result<u64, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        self.store
            .lock()
            .tables
            .get(&self.table)
            .map(|table| table.bytes)
            .ok_or_else(|| GenerationError::adapter("table size", &self.table, "table not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalchemy_core::{Column, TargetType, TypeKind};

    fn base() -> DatasetSchema {
        DatasetSchema::new(
            Identifier::new("public", "base"),
            vec![
                Column::new(
                    "id",
                    TargetType::new(TypeKind::Int, "integer").not_null().auto_increment(),
                ),
                Column::new("code", TargetType::new(TypeKind::Text, "text").not_null()),
            ],
        )
        .with_unique(&["code"])
    }

    fn child() -> DatasetSchema {
        DatasetSchema::new(
            Identifier::new("public", "child"),
            vec![Column::new("base_id", TargetType::new(TypeKind::Int, "integer"))],
        )
        .with_foreign_key("base_id", Identifier::new("public", "base"), "id")
    }

    fn text(value: &str) -> Value {
        Value::String(value.to_string())
    }

    #[test]
    fn enforces_unique_not_null_and_foreign_keys() {
        let store = MemoryStore::new();
        store.create_table(base()).unwrap();
        store.create_table(child()).unwrap();
        let base_id = Identifier::new("public", "base");
        let child_id = Identifier::new("public", "child");
        let schema = base();

        let outcome = store.write(&schema, &[1], &[vec![Value::Null, text("a")]]).unwrap();
        assert!(matches!(outcome, WriteOutcome::Committed { .. }));
        assert_eq!(store.column_values(&base_id, "id"), vec![Value::Int64(1)]);

        let duplicate = store
            .write(&schema, &[1], &[vec![Value::Null, text("b")], vec![Value::Null, text("a")]])
            .unwrap();
        assert!(matches!(duplicate, WriteOutcome::ConstraintViolation(_)));
        assert_eq!(store.row_count(&base_id), 1);

        let null = store.write(&schema, &[1], &[vec![Value::Null, Value::Null]]).unwrap();
        assert!(matches!(null, WriteOutcome::ConstraintViolation(_)));

        let orphan = store.insert_rows(&child_id, vec![vec![Value::Int64(7)]]).unwrap();
        assert!(matches!(orphan, WriteOutcome::ConstraintViolation(_)));
        let linked = store
            .insert_rows(&child_id, vec![vec![Value::Int64(1)], vec![Value::Null]])
            .unwrap();
        assert!(matches!(linked, WriteOutcome::Committed { .. }));
    }

    #[tokio::test]
    async fn samples_and_sizes_follow_stored_rows() {
        let store = MemoryStore::new();
        store.create_table(base()).unwrap();
        let base_id = Identifier::new("public", "base");
        let rows: Vec<Vec<Value>> = (0..30)
            .map(|i| vec![Value::Null, text(&format!("c{i}"))])
            .collect();
        store.write(&base(), &[1], &rows).unwrap();

        let cancel = CancellationToken::new();
        let sample = store
            .sample_reader(&base_id, "code", 5)
            .read_values(&cancel)
            .await
            .unwrap();
        assert_eq!(sample.len(), 5);
        assert!(sample.iter().all(|value| value.as_str().unwrap().starts_with('c')));

        let size = store.table_sizer(&base_id).table_size(&cancel).await.unwrap();
        assert!(size > 30 * ROW_OVERHEAD);
    }

    #[tokio::test]
    async fn seeded_stores_sample_the_same_values() {
        let cancel = CancellationToken::new();
        let base_id = Identifier::new("public", "base");
        let rows: Vec<Vec<Value>> = (0..50)
            .map(|i| vec![Value::Null, text(&format!("c{i}"))])
            .collect();

        let mut samples = Vec::new();
        for _ in 0..2 {
            let store = MemoryStore::with_sample_seed(9);
            store.create_table(base()).unwrap();
            store.write(&base(), &[1], &rows).unwrap();
            let reader = store.sample_reader(&base_id, "code", 4);
            let first = reader.read_values(&cancel).await.unwrap();
            let second = reader.read_values(&cancel).await.unwrap();
            samples.push((first, second));
        }
        assert_eq!(samples[0], samples[1]);
    }

    #[test]
    fn evaluates_simple_defaults() {
        assert_eq!(default_value("42"), Value::Int64(42));
        assert_eq!(default_value("'draft'::text"), text("draft"));
        assert!(matches!(default_value("now()"), Value::Timestamp(_)));
        assert_eq!(default_value("gen_random_uuid()"), Value::Null);
    }
}
