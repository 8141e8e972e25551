use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use datalchemy_core::{DatasetSchema, Identifier};
use datalchemy_generate::{DomainCatalog, GenerationError, SchemaProvider};

use crate::{mapper, queries};

/// Reads table definitions from the Postgres catalog.
#[derive(Debug, Clone)]
pub struct PgSchemaProvider {
    pool: PgPool,
}

impl PgSchemaProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaProvider for PgSchemaProvider {
    async fn data_source(&self, id: &Identifier) -> Result<DatasetSchema, GenerationError> {
        let schema = id.schema.as_deref().unwrap_or("public");
        let raw_columns = queries::list_columns(&self.pool, schema, &id.name).await?;
        if raw_columns.is_empty() {
            return Err(GenerationError::adapter(
                "data source",
                id,
                "table not found",
            ));
        }

        let mut dataset = DatasetSchema::new(id.clone(), mapper::map_columns(raw_columns));
        dataset.unique_groups = queries::list_unique_groups(&self.pool, schema, &id.name).await?;
        dataset.foreign_keys =
            mapper::map_foreign_keys(queries::list_foreign_keys(&self.pool, schema, &id.name).await?);
        debug!(
            table = %id,
            columns = dataset.columns.len(),
            foreign_keys = dataset.foreign_keys.len(),
            "table introspected"
        );
        Ok(dataset)
    }

    async fn domains(&self) -> Result<DomainCatalog, GenerationError> {
        Ok(mapper::map_enums(queries::list_enums(&self.pool).await?))
    }
}
