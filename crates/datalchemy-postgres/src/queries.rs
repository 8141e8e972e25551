use sqlx::{FromRow, PgPool};

use datalchemy_generate::GenerationError;

fn db_error(op: &'static str, target: &str, err: sqlx::Error) -> GenerationError {
    GenerationError::adapter(op, target, err)
}

#[derive(Debug, Clone, FromRow)]
pub struct RawColumn {
    pub name: String,
    /// `format_type` output, modifiers included.
    pub data_type: String,
    pub udt_name: String,
    pub type_type: String,
    pub type_category: String,
    pub type_len: i16,
    pub element_data_type: Option<String>,
    pub element_udt_name: Option<String>,
    pub element_type_type: Option<String>,
    pub element_type_len: Option<i16>,
    pub is_nullable: bool,
    pub default_expr: Option<String>,
    pub identity: String,
    pub generated: String,
}

pub async fn list_columns(
    pool: &PgPool,
    schema: &str,
    table: &str,
) -> Result<Vec<RawColumn>, GenerationError> {
    sqlx::query_as::<_, RawColumn>(
        r#"
        select
          a.attname::text as name,
          pg_catalog.format_type(a.atttypid, a.atttypmod) as data_type,
          t.typname::text as udt_name,
          t.typtype::text as type_type,
          t.typcategory::text as type_category,
          t.typlen as type_len,
          case when t.typcategory = 'A'
            then pg_catalog.format_type(t.typelem, a.atttypmod) end as element_data_type,
          et.typname::text as element_udt_name,
          et.typtype::text as element_type_type,
          et.typlen as element_type_len,
          (not a.attnotnull) as is_nullable,
          pg_get_expr(ad.adbin, ad.adrelid) as default_expr,
          a.attidentity::text as identity,
          a.attgenerated::text as generated
        from pg_attribute a
        join pg_class c on c.oid = a.attrelid
        join pg_namespace n on n.oid = c.relnamespace
        join pg_type t on t.oid = a.atttypid
        left join pg_type et on et.oid = t.typelem and t.typcategory = 'A'
        left join pg_attrdef ad on ad.adrelid = a.attrelid and ad.adnum = a.attnum
        where n.nspname = $1
          and c.relname = $2
          and c.relkind in ('r', 'p')
          and a.attnum > 0
          and not a.attisdropped
        order by a.attnum
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|err| db_error("list columns", &format!("{schema}.{table}"), err))
}

/// Column groups of primary key and unique constraints.
pub async fn list_unique_groups(
    pool: &PgPool,
    schema: &str,
    table: &str,
) -> Result<Vec<Vec<String>>, GenerationError> {
    let rows: Vec<(Vec<String>,)> = sqlx::query_as(
        r#"
        select array_agg(att.attname::text order by ord.ordinality) as columns
        from pg_constraint con
        join pg_class rel on rel.oid = con.conrelid
        join pg_namespace nsp on nsp.oid = rel.relnamespace
        join unnest(con.conkey) with ordinality as ord(attnum, ordinality) on true
        join pg_attribute att on att.attrelid = rel.oid and att.attnum = ord.attnum
        where nsp.nspname = $1
          and rel.relname = $2
          and con.contype in ('p', 'u')
        group by con.conname
        order by con.conname
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|err| db_error("list unique constraints", &format!("{schema}.{table}"), err))?;
    Ok(rows.into_iter().map(|(columns,)| columns).collect())
}

#[derive(Debug, Clone, FromRow)]
pub struct RawForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

pub async fn list_foreign_keys(
    pool: &PgPool,
    schema: &str,
    table: &str,
) -> Result<Vec<RawForeignKey>, GenerationError> {
    sqlx::query_as::<_, RawForeignKey>(
        r#"
        select
          con.conname::text as name,
          array_agg(src_att.attname::text order by s_ord.ordinality) as columns,
          ref_nsp.nspname::text as referenced_schema,
          ref_rel.relname::text as referenced_table,
          array_agg(ref_att.attname::text order by s_ord.ordinality) as referenced_columns
        from pg_constraint con
        join pg_class src_rel on src_rel.oid = con.conrelid
        join pg_namespace src_nsp on src_nsp.oid = src_rel.relnamespace
        join pg_class ref_rel on ref_rel.oid = con.confrelid
        join pg_namespace ref_nsp on ref_nsp.oid = ref_rel.relnamespace
        join unnest(con.conkey, con.confkey) with ordinality as s_ord(src_attnum, ref_attnum, ordinality) on true
        join pg_attribute src_att on src_att.attrelid = src_rel.oid and src_att.attnum = s_ord.src_attnum
        join pg_attribute ref_att on ref_att.attrelid = ref_rel.oid and ref_att.attnum = s_ord.ref_attnum
        where src_nsp.nspname = $1
          and src_rel.relname = $2
          and con.contype = 'f'
        group by con.conname, ref_nsp.nspname, ref_rel.relname
        order by con.conname
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|err| db_error("list foreign keys", &format!("{schema}.{table}"), err))
}

#[derive(Debug, Clone, FromRow)]
pub struct RawEnumType {
    pub schema: String,
    pub name: String,
    pub labels: Vec<String>,
}

pub async fn list_enums(pool: &PgPool) -> Result<Vec<RawEnumType>, GenerationError> {
    sqlx::query_as::<_, RawEnumType>(
        r#"
        select
          n.nspname::text as schema,
          t.typname::text as name,
          array_agg(e.enumlabel::text order by e.enumsortorder) as labels
        from pg_type t
        join pg_namespace n on n.oid = t.typnamespace
        join pg_enum e on e.enumtypid = t.oid
        where n.nspname not like 'pg\_%'
          and n.nspname <> 'information_schema'
        group by n.nspname, t.typname
        order by n.nspname, t.typname
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|err| db_error("list enums", "pg_enum", err))
}

/// Planner row estimate; negative when the table was never analyzed.
pub async fn estimated_rows(pool: &PgPool, relation: &str) -> Result<f64, GenerationError> {
    sqlx::query_scalar::<_, f32>("select reltuples from pg_class where oid = cast($1 as regclass)")
        .bind(relation)
        .fetch_one(pool)
        .await
        .map(f64::from)
        .map_err(|err| db_error("estimate rows", relation, err))
}

pub async fn total_relation_size(pool: &PgPool, relation: &str) -> Result<u64, GenerationError> {
    let size = sqlx::query_scalar::<_, i64>("select pg_total_relation_size(cast($1 as regclass))")
        .bind(relation)
        .fetch_one(pool)
        .await
        .map_err(|err| db_error("table size", relation, err))?;
    Ok(size.max(0) as u64)
}
