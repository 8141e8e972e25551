use datalchemy_core::{Column, DatasetSchema, Identifier, TargetType, TypeKind, Value};

#[test]
fn serializes_dataset_deterministically() {
    let schema = DatasetSchema::new(
        Identifier::new("public", "base"),
        vec![Column::new(
            "id",
            TargetType::new(TypeKind::Int, "integer").not_null(),
        )],
    )
    .with_unique(&["id"]);

    let json = serde_json::to_string(&schema).expect("serialize schema");
    let expected = concat!(
        r#"{"id":{"schema":"public","name":"base"},"#,
        r#""columns":[{"name":"id","target_type":{"kind":"int","source_type":"integer","#,
        r#""nullable":false,"fixed_size":null,"element":null,"auto_increment":false,"#,
        r#""default_expr":null,"out_of_row":false}}],"#,
        r#""unique_groups":[["id"]],"foreign_keys":[]}"#
    );
    assert_eq!(json, expected);

    let parsed: DatasetSchema = serde_json::from_str(&json).expect("parse schema");
    assert_eq!(parsed, schema);
}

#[test]
fn dataset_without_optional_sections_parses() {
    let json = r#"{
  "id": {"schema": null, "name": "events"},
  "columns": [
    {"name": "payload", "target_type": {
      "kind": "bytes", "source_type": "oid", "nullable": true, "fixed_size": null,
      "element": null, "auto_increment": false, "default_expr": null
    }}
  ]
}"#;
    let schema: DatasetSchema = serde_json::from_str(json).expect("parse schema");
    assert!(schema.unique_groups.is_empty());
    assert!(!schema.columns[0].target_type.out_of_row);
}

#[test]
fn values_serialize_with_type_tags() {
    let value = Value::Composite(vec![Value::Int64(7), Value::Null]);
    let json = serde_json::to_string(&value).expect("serialize value");
    assert_eq!(
        json,
        r#"{"type":"composite","value":[{"type":"int64","value":7},{"type":"null"}]}"#
    );
}
