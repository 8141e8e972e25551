use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::schema::DatasetSchema;
use crate::types::TypeKind;

/// Validate internal consistency of a dataset schema.
///
/// This checks:
/// - the dataset has columns and no duplicate column names
/// - unique groups and foreign key columns exist
/// - foreign keys pair every child column with a referenced column
/// - array columns carry an element type
pub fn validate_dataset(schema: &DatasetSchema) -> Result<()> {
    if schema.columns.is_empty() {
        return Err(Error::InvalidSchema(format!(
            "dataset {} has no columns",
            schema.id
        )));
    }

    let mut columns = BTreeSet::new();
    for column in &schema.columns {
        if !columns.insert(column.name.as_str()) {
            return Err(Error::InvalidSchema(format!(
                "duplicate column name: {}.{}",
                schema.id, column.name
            )));
        }
        if column.target_type.kind == TypeKind::Array && column.target_type.element.is_none() {
            return Err(Error::InvalidSchema(format!(
                "array column without element type: {}.{}",
                schema.id, column.name
            )));
        }
    }

    for group in &schema.unique_groups {
        if group.is_empty() {
            return Err(Error::InvalidSchema(format!(
                "empty unique constraint on {}",
                schema.id
            )));
        }
        for column in group {
            if !columns.contains(column.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "unique constraint column not found: {}.{}",
                    schema.id, column
                )));
            }
        }
    }

    for fk in &schema.foreign_keys {
        if fk.columns.is_empty() || fk.columns.len() != fk.referenced_columns.len() {
            return Err(Error::InvalidSchema(format!(
                "foreign key on {} references {} with mismatched columns",
                schema.id, fk.referenced
            )));
        }
        for column in &fk.columns {
            if !columns.contains(column.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "foreign key column not found: {}.{}",
                    schema.id, column
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::schema::Column;
    use crate::types::TargetType;

    fn int(name: &str) -> Column {
        Column::new(name, TargetType::new(TypeKind::Int, "integer"))
    }

    #[test]
    fn accepts_consistent_dataset() {
        let schema = DatasetSchema::new(Identifier::new("public", "child"), vec![int("id"), int("base_id")])
            .with_unique(&["id"])
            .with_foreign_key("base_id", Identifier::new("public", "base"), "id");
        assert!(validate_dataset(&schema).is_ok());
    }

    #[test]
    fn rejects_duplicate_columns() {
        let schema = DatasetSchema::new(Identifier::unqualified("t"), vec![int("id"), int("id")]);
        let err = validate_dataset(&schema).unwrap_err();
        assert!(err.to_string().contains("duplicate column name"));
    }

    #[test]
    fn rejects_unknown_foreign_key_column() {
        let schema = DatasetSchema::new(Identifier::unqualified("t"), vec![int("id")])
            .with_foreign_key("missing", Identifier::unqualified("p"), "id");
        let err = validate_dataset(&schema).unwrap_err();
        assert!(err.to_string().contains("foreign key column not found"));
    }

    #[test]
    fn rejects_array_without_element() {
        let schema = DatasetSchema::new(
            Identifier::unqualified("t"),
            vec![Column::new("tags", TargetType::new(TypeKind::Array, "text[]"))],
        );
        assert!(validate_dataset(&schema).is_err());
    }
}
