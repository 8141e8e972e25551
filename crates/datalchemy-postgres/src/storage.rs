use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use datalchemy_core::{Identifier, TypeKind, Value};
use datalchemy_generate::{
    BisectingSaver, GenerationError, SampleReader, Saver, Storage, TableSizer,
};

use crate::mapper::{self, qualified, quote_ident};
use crate::queries;
use crate::writer::PgBatchWriter;

/// Rows examined per requested sample value when sampling by page.
const SAMPLE_OVERSCAN: f64 = 10.0;

/// Open a pool against `url`.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, GenerationError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await
        .map_err(|err| GenerationError::adapter("connect", "postgres", err))?;
    info!(max_connections, "connected to postgres");
    Ok(pool)
}

/// Race a query against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    query: impl Future<Output = Result<T, GenerationError>>,
) -> Result<T, GenerationError> {
    tokio::select! {
        result = query => result,
        _ = cancel.cancelled() => Err(GenerationError::Cancelled),
    }
}

/// Storage side of a Postgres target.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Storage for PgStorage {
    fn saver(&self) -> Arc<dyn Saver> {
        Arc::new(BisectingSaver::new(PgBatchWriter::new(self.pool.clone())))
    }

    fn sample_reader(
        &self,
        table: &Identifier,
        column: &str,
        limit: usize,
    ) -> Arc<dyn SampleReader> {
        Arc::new(PgSampleReader {
            pool: self.pool.clone(),
            table: table.clone(),
            column: column.to_string(),
            limit,
            kind: OnceCell::new(),
        })
    }

    fn table_sizer(&self, table: &Identifier) -> Arc<dyn TableSizer> {
        Arc::new(PgTableSizer {
            pool: self.pool.clone(),
            table: table.clone(),
        })
    }
}

/// Random non-null values of one column.
///
/// Large tables are sampled with `TABLESAMPLE BERNOULLI`; small or never
/// analyzed ones, and samples that came back empty, fall back to
/// `ORDER BY random()`.
pub struct PgSampleReader {
    pool: PgPool,
    table: Identifier,
    column: String,
    limit: usize,
    kind: OnceCell<TypeKind>,
}

impl PgSampleReader {
    fn target(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }

    async fn kind(&self) -> Result<TypeKind, GenerationError> {
        self.kind
            .get_or_try_init(|| async {
                let schema = self.table.schema.as_deref().unwrap_or("public");
                let columns = queries::list_columns(&self.pool, schema, &self.table.name).await?;
                columns
                    .iter()
                    .find(|col| col.name == self.column)
                    .map(|col| mapper::map_column_type(col).kind)
                    .ok_or_else(|| {
                        GenerationError::adapter("sample read", self.target(), "column not found")
                    })
            })
            .await
            .copied()
    }

    async fn fetch(&self, sql: &str) -> Result<Vec<String>, GenerationError> {
        sqlx::query_scalar::<_, String>(sql)
            .bind(self.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| GenerationError::adapter("sample read", self.target(), err))
    }

    async fn sample(&self) -> Result<Vec<Value>, GenerationError> {
        let kind = self.kind().await?;
        let relation = qualified(&self.table);
        let column = quote_ident(&self.column);

        let estimate = queries::estimated_rows(&self.pool, &relation).await?;
        let wanted = self.limit as f64 * SAMPLE_OVERSCAN;
        let mut texts = Vec::new();
        if estimate > wanted {
            let percent = (wanted * 100.0 / estimate).min(100.0);
            texts = self
                .fetch(&format!(
                    "select cast({column} as text) from {relation} \
                     tablesample bernoulli ({percent}) \
                     where {column} is not null limit $1"
                ))
                .await?;
        }
        if texts.is_empty() {
            debug!(table = %self.table, column = %self.column, estimate, "sampling by random order");
            texts = self
                .fetch(&format!(
                    "select cast({column} as text) from {relation} \
                     where {column} is not null order by random() limit $1"
                ))
                .await?;
        }
        Ok(texts
            .into_iter()
            .map(|text| mapper::from_pg_text(kind, text))
            .collect())
    }
}

#[async_trait]
impl SampleReader for PgSampleReader {
    async fn read_values(&self, cancel: &CancellationToken) -> Result<Vec<Value>, GenerationError> {
        cancellable(cancel, self.sample()).await
    }
}

/// Total relation size, indexes and TOAST included.
pub struct PgTableSizer {
    pool: PgPool,
    table: Identifier,
}

#[async_trait]
impl TableSizer for PgTableSizer {
    async fn table_size(&self, cancel: &CancellationToken) -> Result<u64, GenerationError> {
        let relation = qualified(&self.table);
        cancellable(cancel, queries::total_relation_size(&self.pool, &relation)).await
    }
}
