use std::fs::{self, OpenOptions, create_dir_all};
use std::path::Path;

use serde::{Deserialize, Serialize};

use datalchemy_core::DatasetSchema;
use datalchemy_generate::DomainCatalog;

use super::{RegistryError, RegistryResult};

/// Table definitions used by `--dry-run`, which never touches a database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DryRunSchema {
    pub tables: Vec<DatasetSchema>,
    /// Enumerated domains, keyed like column source types.
    #[serde(default)]
    pub domains: DomainCatalog,
}

pub fn load_dry_run_schema(path: &Path) -> RegistryResult<DryRunSchema> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(RegistryError::from)
}

/// Pretty JSON, creating parent directories as needed.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> RegistryResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    serde_json::to_writer_pretty(file, value).map_err(RegistryError::from)
}

/// Connection string safe for logs: the password becomes `***`.
pub fn redact_connection(conn: &str) -> String {
    let Some(scheme_end) = conn.find("://") else {
        return conn.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &conn[authority_start..];
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return conn.to_string();
    };
    match rest[..at].find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &conn[..authority_start],
            &rest[..colon],
            &rest[at..]
        ),
        None => conn.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_passwords_only() {
        assert_eq!(
            redact_connection("postgres://app:s3cr@t@db:5432/main?sslmode=require"),
            "postgres://app:***@db:5432/main?sslmode=require"
        );
        assert_eq!(
            redact_connection("postgresql://app@db/main"),
            "postgresql://app@db/main"
        );
        assert_eq!(redact_connection("host=db user=app"), "host=db user=app");
    }

    #[test]
    fn parses_dry_run_schema() {
        let schema: DryRunSchema = serde_json::from_str(
            r#"{
              "tables": [{
                "id": { "schema": "public", "name": "users" },
                "columns": [{
                  "name": "id",
                  "target_type": {
                    "kind": "int", "source_type": "integer", "nullable": false,
                    "fixed_size": 4, "element": null, "auto_increment": true,
                    "default_expr": null
                  }
                }]
              }],
              "domains": { "mood": ["ok", "sad"] }
            }"#,
        )
        .unwrap();
        assert_eq!(schema.tables.len(), 1);
        assert!(schema.tables[0].columns[0].target_type.auto_increment);
        assert_eq!(schema.domains["mood"], vec!["ok", "sad"]);
    }
}
