use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::trace;

use datalchemy_core::{DatasetSchema, TargetType, Value};
use datalchemy_generate::{BatchWriter, GenerationError, WriteOutcome};

use crate::mapper::{pg_literal, qualified, quote_ident};

/// Bind parameters allowed in one statement by the wire protocol.
const MAX_BIND_PARAMS: usize = 65_535;
/// Tuple header counted per stored row.
const ROW_HEADER: u64 = 24;

/// Writes rows with multi-row `INSERT`s, one transaction per call.
#[derive(Debug, Clone)]
pub struct PgBatchWriter {
    pool: PgPool,
}

impl PgBatchWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self, table: &str) -> Result<Transaction<'static, Postgres>, GenerationError> {
        self.pool
            .begin()
            .await
            .map_err(|err| GenerationError::adapter("begin", table, err))
    }
}

/// Text around a bound value that turns it into a value of `target_type`.
///
/// Out-of-row columns get a fresh large object holding the bytes.
fn bind_wrapper(target_type: &TargetType) -> (&'static str, String) {
    let ty = &target_type.source_type;
    if target_type.out_of_row {
        ("cast(lo_from_bytea(0, cast(", format!(" as bytea)) as {ty})"))
    } else {
        ("cast(", format!(" as {ty})"))
    }
}

/// SQLSTATE class 23 is integrity constraint violation.
fn violation(err: &sqlx::Error) -> Option<String> {
    let db = err.as_database_error()?;
    db.code()
        .is_some_and(|code| code.starts_with("23"))
        .then(|| db.message().to_string())
}

/// Route a failed statement: violations roll back into an outcome, anything
/// else is a transport error.
async fn abort(
    tx: Transaction<'static, Postgres>,
    table: &str,
    err: sqlx::Error,
) -> Result<WriteOutcome, GenerationError> {
    let reason = violation(&err);
    tx.rollback()
        .await
        .map_err(|rollback| GenerationError::adapter("rollback", table, rollback))?;
    match reason {
        Some(reason) => Ok(WriteOutcome::ConstraintViolation(reason)),
        None => Err(GenerationError::adapter("insert", table, err)),
    }
}

#[async_trait]
impl BatchWriter for PgBatchWriter {
    async fn write_rows(
        &self,
        schema: &DatasetSchema,
        columns: &[usize],
        rows: &[Vec<Value>],
    ) -> Result<WriteOutcome, GenerationError> {
        if rows.is_empty() {
            return Ok(WriteOutcome::Committed { bytes: 0 });
        }
        let table = qualified(&schema.id);
        let mut names = Vec::with_capacity(columns.len());
        let mut wrappers = Vec::with_capacity(columns.len());
        for &idx in columns {
            let column = schema.columns.get(idx).ok_or_else(|| {
                GenerationError::InvalidSchema(format!("{} has no column #{idx}", schema.id))
            })?;
            names.push(quote_ident(&column.name));
            wrappers.push(bind_wrapper(&column.target_type));
        }
        let rows_per_statement = (MAX_BIND_PARAMS / columns.len().max(1)).max(1);

        let mut tx = self.begin(&table).await?;
        let mut bytes = 0;
        for chunk in rows.chunks(rows_per_statement) {
            let mut builder =
                QueryBuilder::<Postgres>::new(format!("insert into {table} ({}) ", names.join(", ")));
            builder.push_values(chunk, |mut separated, row| {
                for (&idx, (open, close)) in columns.iter().zip(&wrappers) {
                    let value = row.get(idx).unwrap_or(&Value::Null);
                    bytes += value.approx_size();
                    separated
                        .push(*open)
                        .push_bind_unseparated(pg_literal(value))
                        .push_unseparated(close.as_str());
                }
            });
            if let Err(err) = builder.build().execute(&mut *tx).await {
                return abort(tx, &table, err).await;
            }
        }
        tx.commit()
            .await
            .map_err(|err| GenerationError::adapter("commit", &table, err))?;
        trace!(table = %schema.id, rows = rows.len(), "rows inserted");
        Ok(WriteOutcome::Committed {
            bytes: bytes + rows.len() as u64 * ROW_HEADER,
        })
    }

    async fn write_default_rows(
        &self,
        schema: &DatasetSchema,
        count: usize,
    ) -> Result<WriteOutcome, GenerationError> {
        let table = qualified(&schema.id);
        let statement = format!("insert into {table} default values");
        let mut tx = self.begin(&table).await?;
        for _ in 0..count {
            if let Err(err) = sqlx::query(&statement).execute(&mut *tx).await {
                return abort(tx, &table, err).await;
            }
        }
        tx.commit()
            .await
            .map_err(|err| GenerationError::adapter("commit", &table, err))?;
        Ok(WriteOutcome::Committed {
            bytes: count as u64 * ROW_HEADER,
        })
    }
}
