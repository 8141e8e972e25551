use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;
use crate::types::TargetType;

/// Table identity plus everything the generator needs to know about its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub id: Identifier,
    /// Columns in schema order; rows are generated in this order.
    pub columns: Vec<Column>,
    /// Column groups covered by primary key or unique constraints.
    #[serde(default)]
    pub unique_groups: Vec<Vec<String>>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

/// Column metadata for a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub target_type: TargetType,
}

/// Foreign key definition preserving column ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced: Identifier,
    pub referenced_columns: Vec<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, target_type: TargetType) -> Self {
        Self {
            name: name.into(),
            target_type,
        }
    }
}

impl DatasetSchema {
    pub fn new(id: Identifier, columns: Vec<Column>) -> Self {
        Self {
            id,
            columns,
            unique_groups: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_unique(mut self, columns: &[&str]) -> Self {
        self.unique_groups
            .push(columns.iter().map(|column| column.to_string()).collect());
        self
    }

    pub fn with_foreign_key(mut self, column: &str, referenced: Identifier, parent: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            name: None,
            columns: vec![column.to_string()],
            referenced,
            referenced_columns: vec![parent.to_string()],
        });
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Single-column foreign key whose child side is `column`.
    ///
    /// Composite keys are not propagated column by column.
    pub fn foreign_key_for(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.columns.len() == 1 && fk.columns[0] == column)
    }
}
