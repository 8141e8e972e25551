use async_trait::async_trait;
use tracing::{debug, trace};

use datalchemy_core::DatasetSchema;

use crate::adapter::{BatchWriter, SaveBatch, SaveReport, Saver, WriteOutcome};
use crate::errors::GenerationError;

/// Saver that isolates bad rows by bisection.
///
/// A batch refused for a constraint violation is split in halves that are
/// retried independently, down to single rows. Offending rows end up marked
/// invalid; every other row is stored, in the original order.
pub struct BisectingSaver<W> {
    writer: W,
}

impl<W: BatchWriter> BisectingSaver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

#[async_trait]
impl<W: BatchWriter> Saver for BisectingSaver<W> {
    async fn save(&self, batch: &mut SaveBatch) -> Result<SaveReport, GenerationError> {
        let columns = batch.included_columns();
        let mut report = SaveReport::default();
        // Right halves are pushed first so ranges are written left to right.
        let mut pending = vec![0..batch.rows.len()];

        while let Some(range) = pending.pop() {
            if range.is_empty() {
                continue;
            }
            let outcome = self
                .writer
                .write_rows(&batch.schema, &columns, &batch.rows[range.clone()])
                .await?;
            match outcome {
                WriteOutcome::Committed { bytes } => {
                    report.rows += range.len() as u64;
                    report.bytes += bytes;
                }
                WriteOutcome::ConstraintViolation(reason) if range.len() == 1 => {
                    trace!(table = %batch.schema.id, row = range.start, %reason, "row rejected");
                    batch.valid[range.start] = false;
                    report.constraint_violations += 1;
                }
                WriteOutcome::ConstraintViolation(_) => {
                    let middle = range.start + range.len() / 2;
                    pending.push(middle..range.end);
                    pending.push(range.start..middle);
                }
            }
        }

        if report.constraint_violations > 0 {
            debug!(
                table = %batch.schema.id,
                committed = report.rows,
                rejected = report.constraint_violations,
                "batch saved with rejected rows"
            );
        }
        Ok(report)
    }

    async fn save_all_default_values(
        &self,
        schema: &DatasetSchema,
        count: usize,
    ) -> Result<SaveReport, GenerationError> {
        if count == 0 {
            return Ok(SaveReport::default());
        }
        match self.writer.write_default_rows(schema, count).await? {
            WriteOutcome::Committed { bytes } => Ok(SaveReport {
                rows: count as u64,
                bytes,
                constraint_violations: 0,
            }),
            WriteOutcome::ConstraintViolation(reason) => {
                debug!(table = %schema.id, %reason, "default rows rejected");
                Ok(SaveReport {
                    rows: 0,
                    bytes: 0,
                    constraint_violations: count as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashSet};
    use std::sync::{Arc, Mutex};

    use super::*;
    use datalchemy_core::{Column, Identifier, TargetType, TypeKind, Value};

    /// Refuses any write containing a poisoned id; records committed ids.
    struct PoisonWriter {
        poisoned: HashSet<i64>,
        committed: Mutex<Vec<i64>>,
        calls: Mutex<usize>,
    }

    impl PoisonWriter {
        fn new(poisoned: &[i64]) -> Self {
            Self {
                poisoned: poisoned.iter().copied().collect(),
                committed: Mutex::new(Vec::new()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl BatchWriter for PoisonWriter {
        async fn write_rows(
            &self,
            _schema: &DatasetSchema,
            _columns: &[usize],
            rows: &[Vec<Value>],
        ) -> Result<WriteOutcome, GenerationError> {
            *self.calls.lock().unwrap() += 1;
            let ids: Vec<i64> = rows.iter().filter_map(|row| row[0].as_i64()).collect();
            if ids.iter().any(|id| self.poisoned.contains(id)) {
                return Ok(WriteOutcome::ConstraintViolation("poisoned".to_string()));
            }
            self.committed.lock().unwrap().extend(ids);
            Ok(WriteOutcome::Committed {
                bytes: rows.len() as u64 * 8,
            })
        }

        async fn write_default_rows(
            &self,
            _schema: &DatasetSchema,
            _count: usize,
        ) -> Result<WriteOutcome, GenerationError> {
            Ok(WriteOutcome::ConstraintViolation("no defaults".to_string()))
        }
    }

    fn batch(size: i64) -> SaveBatch {
        let schema = Arc::new(DatasetSchema::new(
            Identifier::new("public", "t"),
            vec![Column::new("id", TargetType::new(TypeKind::Int, "integer"))],
        ));
        let mut batch = SaveBatch::new(schema, BTreeSet::new(), size as usize);
        for id in 0..size {
            batch.push(vec![Value::Int64(id)]);
        }
        batch
    }

    async fn check(size: i64, poisoned: &[i64]) {
        let saver = BisectingSaver::new(PoisonWriter::new(poisoned));
        let mut batch = batch(size);
        let report = saver.save(&mut batch).await.unwrap();

        let expected: Vec<i64> = (0..size).filter(|id| !poisoned.contains(id)).collect();
        assert_eq!(*saver.writer().committed.lock().unwrap(), expected);
        assert_eq!(report.rows, expected.len() as u64);
        assert_eq!(report.constraint_violations, poisoned.len() as u64);
        for (id, valid) in batch.valid.iter().enumerate() {
            assert_eq!(*valid, !poisoned.contains(&(id as i64)), "row {id}");
        }
    }

    #[tokio::test]
    async fn clean_batch_is_one_write() {
        let saver = BisectingSaver::new(PoisonWriter::new(&[]));
        let mut batch = batch(16);
        let report = saver.save(&mut batch).await.unwrap();
        assert_eq!(report.rows, 16);
        assert_eq!(*saver.writer().calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn isolates_violations_anywhere_in_the_batch() {
        check(10, &[0]).await;
        check(10, &[9]).await;
        check(10, &[4, 5]).await;
        check(11, &[1, 3, 5, 7, 9]).await;
        check(1, &[0]).await;
        check(7, &[0, 1, 2, 3, 4, 5, 6]).await;
    }
}
