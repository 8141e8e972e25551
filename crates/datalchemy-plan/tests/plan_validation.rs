use datalchemy_plan::{
    GeneratorSettings, Limit, PlanError, parse_plan_json, parse_plan_toml, plan_json_schema_value,
};

const PLAN_JSON: &str = r#"{
  "plan_version": "0.1",
  "targets": [
    {"schema": "public", "table": "base", "limit": {"rows": 5}},
    {"schema": "public", "table": "child", "limit": {"rows": 33}},
    {"schema": "public", "table": "blobs", "limit": {"bytes": 1048576}}
  ],
  "columns": [
    {
      "schema": "public", "table": "child", "column": "score",
      "generator": {"kind": "float", "min": 0.0, "max": 10.0, "scale": 2},
      "null_percentage": 20,
      "ahead": true
    },
    {
      "schema": "public", "table": "child", "column": "tags",
      "generator": {"kind": "one_of", "values": ["a", "b"]},
      "array": {"cols": 3}
    }
  ],
  "run": {"workers": 2, "batch_size": 10}
}"#;

#[test]
fn parses_json_plan_with_defaults() {
    let plan = parse_plan_json(PLAN_JSON).expect("plan should parse");

    assert_eq!(plan.targets.len(), 3);
    assert_eq!(plan.targets[2].limit, Limit::Bytes(1_048_576));
    assert_eq!(plan.run.workers, 2);
    assert_eq!(plan.run.batch_size, 10);
    assert_eq!(plan.run.size_poll_interval_ms, 1000);
    assert_eq!(plan.run.sample_size, 100);

    let tags = &plan.columns[1];
    let shape = tags.array.expect("array shape");
    assert_eq!((shape.rows, shape.cols), (1, 3));
    assert!(!tags.ahead);
    assert!(plan.columns[0].ahead);
    assert_eq!(
        plan.columns[0].generator,
        Some(GeneratorSettings::Float {
            min: Some(0.0),
            max: Some(10.0),
            scale: Some(2)
        })
    );
}

#[test]
fn rejects_structurally_invalid_json() {
    let err = parse_plan_json(r#"{"plan_version": "0.1"}"#).unwrap_err();
    match err {
        PlanError::Invalid(report) => {
            assert!(report.error_codes().contains(&"schema_violation"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn rejects_semantically_invalid_json() {
    let plan = r#"{
      "plan_version": "0.1",
      "targets": [{"schema": "public", "table": "t", "limit": {"rows": 1}}],
      "run": {"workers": 0}
    }"#;
    let err = parse_plan_json(plan).unwrap_err();
    assert!(err.to_string().contains("workers_zero"), "{err}");
}

#[test]
fn parses_toml_plan() {
    let plan = parse_plan_toml(
        r#"
plan_version = "0.1"

[[targets]]
schema = "public"
table = "users"
limit = { rows = 100 }

[[columns]]
schema = "public"
table = "users"
column = "email"
reuse_percentage = 30
generator = { kind = "text", min_len = 5, max_len = 12 }
"#,
    )
    .expect("toml plan should parse");

    assert_eq!(plan.targets[0].limit, Limit::Rows(100));
    assert_eq!(plan.columns[0].reuse_percentage, Some(30));
    assert_eq!(plan.columns[0].generator.as_ref().map(|g| g.kind()), Some("text"));
}

#[test]
fn json_schema_lists_required_sections() {
    let schema = plan_json_schema_value().expect("schema");
    let required = schema
        .get("required")
        .and_then(|value| value.as_array())
        .expect("required array");
    let required: Vec<&str> = required.iter().filter_map(|value| value.as_str()).collect();
    assert!(required.contains(&"plan_version"));
    assert!(required.contains(&"targets"));
    assert!(!required.contains(&"run"));
}
