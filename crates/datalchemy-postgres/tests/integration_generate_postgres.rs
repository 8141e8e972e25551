use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use datalchemy_generate::GenerationEngine;
use datalchemy_plan::Plan;
use datalchemy_postgres::{PgSchemaProvider, PgStorage, connect};

const FIXTURE: &str = r#"
drop schema if exists dl_it cascade;
create schema dl_it;
create type dl_it.mood as enum ('ok', 'sad', 'great');
create table dl_it.base (
  id serial primary key,
  code varchar(12) not null unique,
  created_at timestamp not null default now()
);
create table dl_it.child (
  id bigint generated always as identity primary key,
  base_id integer not null references dl_it.base (id),
  mood dl_it.mood not null,
  tags text[],
  price numeric(6, 2)
);
create table dl_it.audit (
  id bigserial primary key,
  at timestamptz not null default now()
)
"#;

fn database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok()
}

async fn reset_fixture(pool: &PgPool) -> Result<()> {
    for statement in FIXTURE.split(';') {
        let sql = statement.trim();
        if sql.is_empty() {
            continue;
        }
        sqlx::query(sql)
            .execute(pool)
            .await
            .with_context(|| format!("executing fixture statement: {sql}"))?;
    }
    Ok(())
}

async fn count(pool: &PgPool, sql: &str) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(sql)
        .fetch_one(pool)
        .await
        .with_context(|| format!("running {sql}"))
}

#[tokio::test]
async fn fills_related_tables_in_postgres() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("skipping: set TEST_DATABASE_URL or DATABASE_URL to run");
        return Ok(());
    };
    let pool = connect(&url, 5).await?;
    reset_fixture(&pool).await?;

    let plan: Plan = serde_json::from_value(json!({
        "plan_version": "0.1",
        "targets": [
            { "schema": "dl_it", "table": "child", "limit": { "rows": 120 } },
            { "schema": "dl_it", "table": "base", "limit": { "rows": 20 } },
            { "schema": "dl_it", "table": "audit", "limit": { "rows": 7 } }
        ],
        "columns": [
            {
                "schema": "dl_it", "table": "child", "column": "tags",
                "array": { "cols": 2 }
            },
            {
                "schema": "dl_it", "table": "child", "column": "price",
                "null_percentage": 30
            }
        ],
        "run": { "workers": 3, "batch_size": 25, "seed": 11 }
    }))?;

    let engine = GenerationEngine::new(
        Arc::new(PgSchemaProvider::new(pool.clone())),
        Arc::new(PgStorage::new(pool.clone())),
    );
    let report = engine.run(&plan, CancellationToken::new()).await?;

    assert_eq!(count(&pool, "select count(*) from dl_it.base").await?, 20);
    assert_eq!(count(&pool, "select count(*) from dl_it.child").await?, 120);
    assert_eq!(count(&pool, "select count(*) from dl_it.audit").await?, 7);
    assert_eq!(
        count(
            &pool,
            "select count(*) from dl_it.child c left join dl_it.base b on b.id = c.base_id \
             where b.id is null"
        )
        .await?,
        0
    );
    assert_eq!(
        count(&pool, "select count(*) from dl_it.child where tags is not null and cardinality(tags) <> 2")
            .await?,
        0
    );
    assert_eq!(report.rows_total, 147);
    Ok(())
}

const LARGE_OBJECT_FIXTURE: &str = r#"
drop schema if exists dl_lo cascade;
create schema dl_lo;
create table dl_lo.blobs (
  id serial primary key,
  payload oid not null
)
"#;

#[tokio::test]
async fn large_object_columns_count_towards_byte_limits() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("skipping: set TEST_DATABASE_URL or DATABASE_URL to run");
        return Ok(());
    };
    let pool = connect(&url, 3).await?;
    for statement in LARGE_OBJECT_FIXTURE.split(';') {
        let sql = statement.trim();
        if !sql.is_empty() {
            sqlx::query(sql)
                .execute(&pool)
                .await
                .with_context(|| format!("executing fixture statement: {sql}"))?;
        }
    }

    let plan: Plan = serde_json::from_value(json!({
        "plan_version": "0.1",
        "targets": [
            { "schema": "dl_lo", "table": "blobs", "limit": { "bytes": 4000 } }
        ],
        "run": { "batch_size": 10, "seed": 5 }
    }))?;
    let engine = GenerationEngine::new(
        Arc::new(PgSchemaProvider::new(pool.clone())),
        Arc::new(PgStorage::new(pool.clone())),
    );
    let report = engine.run(&plan, CancellationToken::new()).await?;

    let blobs = report.table("blobs").context("blobs report")?;
    assert!(blobs.rows_committed > 0);
    assert_eq!(
        count(&pool, "select count(*) from dl_lo.blobs").await?,
        blobs.rows_committed as i64
    );
    assert_eq!(
        count(
            &pool,
            "select count(*) from dl_lo.blobs where length(lo_get(payload)) not between 16 and 64"
        )
        .await?,
        0
    );
    Ok(())
}
