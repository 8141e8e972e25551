use serde::{Deserialize, Serialize};

/// Logical type tag used to pick a generator for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Bool,
    Int,
    Float,
    Numeric,
    Text,
    Bytes,
    Uuid,
    Timestamp,
    Date,
    Json,
    Array,
    Enum,
    Other,
}

/// Per-column generation metadata resolved from the source driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetType {
    pub kind: TypeKind,
    /// Raw type name as reported by the driver (e.g. `numeric(10,2)`).
    pub source_type: String,
    pub nullable: bool,
    /// Fixed storage width in bytes, when the driver reports one.
    pub fixed_size: Option<usize>,
    /// Element type for arrays.
    pub element: Option<Box<TargetType>>,
    pub auto_increment: bool,
    /// Driver default expression (e.g. `nextval('users_id_seq'::regclass)`).
    pub default_expr: Option<String>,
    /// Payload is stored outside the row and is not reflected in table width.
    #[serde(default)]
    pub out_of_row: bool,
}

impl TargetType {
    pub fn new(kind: TypeKind, source_type: impl Into<String>) -> Self {
        Self {
            kind,
            source_type: source_type.into(),
            nullable: true,
            fixed_size: None,
            element: None,
            auto_increment: false,
            default_expr: None,
            out_of_row: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default_expr = Some(expr.into());
        self
    }

    pub fn array_of(element: TargetType) -> Self {
        let source_type = format!("{}[]", element.source_type);
        Self {
            element: Some(Box::new(element)),
            ..Self::new(TypeKind::Array, source_type)
        }
    }

    /// Source type without modifiers or array suffix, lowercased
    /// (`numeric(10,2)[]` -> `numeric`).
    pub fn base_source_type(&self) -> String {
        let name = self.source_type.trim();
        let name = name.trim_end_matches("[]").trim_end();
        name.split('(')
            .next()
            .unwrap_or(name)
            .trim()
            .to_lowercase()
    }

    /// Integer modifiers of the source type (`numeric(10,2)` -> `[10, 2]`).
    pub fn type_modifiers(&self) -> Vec<u32> {
        let Some(start) = self.source_type.find('(') else {
            return Vec::new();
        };
        let Some(end) = self.source_type[start..].find(')') else {
            return Vec::new();
        };
        self.source_type[start + 1..start + end]
            .split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect()
    }

    /// Whether the database fills this column on its own when omitted.
    pub fn has_database_default(&self) -> bool {
        self.auto_increment || self.default_expr.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_modifiers() {
        let ty = TargetType::new(TypeKind::Numeric, "numeric(10, 2)");
        assert_eq!(ty.base_source_type(), "numeric");
        assert_eq!(ty.type_modifiers(), vec![10, 2]);

        let ty = TargetType::new(TypeKind::Text, "character varying(32)");
        assert_eq!(ty.base_source_type(), "character varying");
        assert_eq!(ty.type_modifiers(), vec![32]);

        let ty = TargetType::new(TypeKind::Int, "integer");
        assert!(ty.type_modifiers().is_empty());
    }

    #[test]
    fn array_suffix_is_not_part_of_the_base_type() {
        let ty = TargetType::new(TypeKind::Array, "numeric(5,2)[]");
        assert_eq!(ty.base_source_type(), "numeric");
        assert_eq!(ty.type_modifiers(), vec![5, 2]);

        let ty = TargetType::new(TypeKind::Array, "integer[]");
        assert_eq!(ty.base_source_type(), "integer");
        assert!(ty.type_modifiers().is_empty());
    }

    #[test]
    fn array_keeps_element_type() {
        let ty = TargetType::array_of(TargetType::new(TypeKind::Int, "integer"));
        assert_eq!(ty.kind, TypeKind::Array);
        assert_eq!(ty.source_type, "integer[]");
        assert_eq!(ty.element.as_deref().map(|e| e.kind), Some(TypeKind::Int));
    }
}
