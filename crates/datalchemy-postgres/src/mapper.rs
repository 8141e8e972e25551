use chrono::NaiveDateTime;

use datalchemy_core::{Column, ForeignKey, Identifier, TargetType, TypeKind, Value};
use datalchemy_generate::DomainCatalog;

use crate::queries::{RawColumn, RawEnumType, RawForeignKey};

/// Types whose payload lives outside the table heap.
const OUT_OF_ROW_TYPES: &[&str] = &["oid", "lo"];

pub fn map_columns(raw: Vec<RawColumn>) -> Vec<Column> {
    raw.into_iter()
        .map(|col| {
            let target_type = map_column_type(&col);
            Column::new(col.name, target_type)
        })
        .collect()
}

pub fn map_column_type(col: &RawColumn) -> TargetType {
    let mut target_type = if col.type_category == "A" {
        let element = map_type(
            col.element_data_type.as_deref().unwrap_or("text"),
            col.element_udt_name.as_deref().unwrap_or("text"),
            col.element_type_type.as_deref().unwrap_or("b"),
            col.element_type_len.unwrap_or(-1),
        );
        TargetType {
            source_type: col.data_type.clone(),
            ..TargetType::array_of(element)
        }
    } else {
        map_type(&col.data_type, &col.udt_name, &col.type_type, col.type_len)
    };

    target_type.nullable = col.is_nullable;
    target_type.default_expr = col.default_expr.clone();
    target_type.auto_increment = !col.identity.is_empty()
        || col
            .default_expr
            .as_deref()
            .is_some_and(|expr| expr.starts_with("nextval("));
    // Generated columns cannot be written; they count as defaulted.
    if !col.generated.is_empty() && target_type.default_expr.is_none() {
        target_type.default_expr = Some("generated".to_string());
    }
    target_type
}

fn map_type(data_type: &str, udt_name: &str, type_type: &str, type_len: i16) -> TargetType {
    let kind = if type_type == "e" {
        TypeKind::Enum
    } else {
        kind_for(udt_name)
    };
    let mut target_type = TargetType::new(kind, data_type);
    if type_len > 0 {
        target_type.fixed_size = Some(type_len as usize);
    }
    target_type.out_of_row = OUT_OF_ROW_TYPES.contains(&udt_name);
    target_type
}

fn kind_for(udt_name: &str) -> TypeKind {
    match udt_name {
        "bool" => TypeKind::Bool,
        "int2" | "int4" | "int8" => TypeKind::Int,
        "float4" | "float8" => TypeKind::Float,
        "numeric" => TypeKind::Numeric,
        "text" | "varchar" | "bpchar" | "name" => TypeKind::Text,
        // Large objects are written from bytes through `lo_from_bytea`.
        "bytea" | "oid" | "lo" => TypeKind::Bytes,
        "uuid" => TypeKind::Uuid,
        "timestamp" | "timestamptz" => TypeKind::Timestamp,
        "date" => TypeKind::Date,
        "json" | "jsonb" => TypeKind::Json,
        _ => TypeKind::Other,
    }
}

pub fn map_foreign_keys(raw: Vec<RawForeignKey>) -> Vec<ForeignKey> {
    raw.into_iter()
        .map(|fk| ForeignKey {
            name: Some(fk.name),
            columns: fk.columns,
            referenced: Identifier::new(fk.referenced_schema, fk.referenced_table),
            referenced_columns: fk.referenced_columns,
        })
        .collect()
}

/// Enum labels keyed by qualified name, plus the bare name when unambiguous.
pub fn map_enums(raw: Vec<RawEnumType>) -> DomainCatalog {
    let mut catalog = DomainCatalog::new();
    for en in &raw {
        catalog.insert(format!("{}.{}", en.schema, en.name), en.labels.clone());
    }
    for en in raw {
        catalog.entry(en.name).or_insert(en.labels);
    }
    catalog
}

/// Text form bound for a value; the insert casts it to the column type.
pub fn pg_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(value) => Some(value.to_string()),
        Value::Int64(value) => Some(value.to_string()),
        Value::Float64(value) => Some(value.to_string()),
        Value::String(value) => Some(value.clone()),
        Value::Bytes(value) => Some(format!("\\x{}", value_hex(value))),
        Value::Timestamp(value) => Some(value.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Composite(values) => Some(array_literal(values)),
    }
}

fn value_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn array_literal(values: &[Value]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|value| match value {
            Value::Null => "NULL".to_string(),
            Value::Composite(inner) => array_literal(inner),
            other => {
                let text = pg_literal(other).unwrap_or_default();
                format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
            }
        })
        .collect();
    format!("{{{}}}", items.join(","))
}

/// Parse a value read back as text; unknown shapes stay strings.
pub fn from_pg_text(kind: TypeKind, text: String) -> Value {
    match kind {
        TypeKind::Bool => match text.as_str() {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        TypeKind::Int => text.parse().map(Value::Int64).unwrap_or(Value::String(text)),
        TypeKind::Float | TypeKind::Numeric => {
            text.parse().map(Value::Float64).unwrap_or(Value::String(text))
        }
        TypeKind::Timestamp => NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .map(Value::Timestamp)
            .unwrap_or(Value::String(text)),
        TypeKind::Bytes => text
            .strip_prefix("\\x")
            .and_then(parse_hex)
            .map(Value::Bytes)
            .unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

fn parse_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|idx| u8::from_str_radix(hex.get(idx..idx + 2)?, 16).ok())
        .collect()
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quoted `schema.table`, defaulting to `public`.
pub fn qualified(id: &Identifier) -> String {
    format!(
        "{}.{}",
        quote_ident(id.schema.as_deref().unwrap_or("public")),
        quote_ident(&id.name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(data_type: &str, udt_name: &str) -> RawColumn {
        RawColumn {
            name: "c".to_string(),
            data_type: data_type.to_string(),
            udt_name: udt_name.to_string(),
            type_type: "b".to_string(),
            type_category: "N".to_string(),
            type_len: -1,
            element_data_type: None,
            element_udt_name: None,
            element_type_type: None,
            element_type_len: None,
            is_nullable: true,
            default_expr: None,
            identity: String::new(),
            generated: String::new(),
        }
    }

    #[test]
    fn maps_driver_types_to_target_types() {
        let int = map_column_type(&RawColumn {
            type_len: 4,
            is_nullable: false,
            default_expr: Some("nextval('t_id_seq'::regclass)".to_string()),
            ..raw("integer", "int4")
        });
        assert_eq!(int.kind, TypeKind::Int);
        assert_eq!(int.fixed_size, Some(4));
        assert!(int.auto_increment);
        assert!(!int.nullable);

        let varchar = map_column_type(&raw("character varying(32)", "varchar"));
        assert_eq!(varchar.kind, TypeKind::Text);
        assert_eq!(varchar.type_modifiers(), vec![32]);

        let identity = map_column_type(&RawColumn {
            identity: "a".to_string(),
            ..raw("bigint", "int8")
        });
        assert!(identity.auto_increment);
        assert!(identity.has_database_default());

        let mood = map_column_type(&RawColumn {
            type_type: "e".to_string(),
            ..raw("app.mood", "mood")
        });
        assert_eq!(mood.kind, TypeKind::Enum);

        let blob = map_column_type(&raw("oid", "oid"));
        assert!(blob.out_of_row);
        assert_eq!(blob.kind, TypeKind::Bytes);

        let inline = map_column_type(&raw("bytea", "bytea"));
        assert!(!inline.out_of_row);
        assert_eq!(inline.kind, TypeKind::Bytes);
    }

    #[test]
    fn maps_array_elements() {
        let tags = map_column_type(&RawColumn {
            type_category: "A".to_string(),
            element_data_type: Some("character varying(3)".to_string()),
            element_udt_name: Some("varchar".to_string()),
            element_type_type: Some("b".to_string()),
            ..raw("character varying(3)[]", "_varchar")
        });
        assert_eq!(tags.kind, TypeKind::Array);
        assert_eq!(tags.source_type, "character varying(3)[]");
        let element = tags.element.expect("element type");
        assert_eq!(element.kind, TypeKind::Text);
        assert_eq!(element.type_modifiers(), vec![3]);
    }

    #[test]
    fn enum_catalog_has_qualified_and_bare_names() {
        let catalog = map_enums(vec![
            RawEnumType {
                schema: "app".to_string(),
                name: "mood".to_string(),
                labels: vec!["ok".to_string(), "sad".to_string()],
            },
            RawEnumType {
                schema: "public".to_string(),
                name: "mood".to_string(),
                labels: vec!["meh".to_string()],
            },
        ]);
        assert_eq!(catalog["app.mood"], vec!["ok", "sad"]);
        assert_eq!(catalog["public.mood"], vec!["meh"]);
        assert_eq!(catalog["mood"], vec!["ok", "sad"]);
    }

    #[test]
    fn renders_literals_for_casts() {
        assert_eq!(pg_literal(&Value::Null), None);
        assert_eq!(pg_literal(&Value::Bytes(vec![1, 171])).as_deref(), Some("\\x01ab"));
        let nested = Value::Composite(vec![
            Value::Composite(vec![Value::String("a\"b".to_string()), Value::Null]),
            Value::Composite(vec![Value::Int64(3), Value::Bool(true)]),
        ]);
        assert_eq!(
            pg_literal(&nested).as_deref(),
            Some(r#"{{"a\"b",NULL},{"3","true"}}"#)
        );
    }

    #[test]
    fn reads_text_back_into_values() {
        assert_eq!(from_pg_text(TypeKind::Int, "42".to_string()), Value::Int64(42));
        assert_eq!(from_pg_text(TypeKind::Bool, "t".to_string()), Value::Bool(true));
        assert_eq!(
            from_pg_text(TypeKind::Bytes, "\\x01ab".to_string()),
            Value::Bytes(vec![1, 171])
        );
        assert!(matches!(
            from_pg_text(TypeKind::Timestamp, "2024-03-01 10:00:00".to_string()),
            Value::Timestamp(_)
        ));
        assert_eq!(
            from_pg_text(TypeKind::Array, "{1,2}".to_string()),
            Value::String("{1,2}".to_string())
        );
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(qualified(&Identifier::unqualified("we\"ird")), "\"public\".\"we\"\"ird\"");
    }
}
