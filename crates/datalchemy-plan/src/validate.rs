use std::collections::{BTreeMap, HashSet};

use datalchemy_core::{DatasetSchema, Identifier};
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::errors::{PlanError, ValidationIssue, ValidationReport};
use crate::model::{ColumnSettings, GeneratorSettings, Limit, PLAN_VERSION, Plan, Target};

/// Validate a plan JSON document against the plan JSON Schema.
pub fn validate_plan_json(
    plan_json: &Value,
    plan_schema: &Value,
) -> Result<ValidationReport, PlanError> {
    let compiled =
        JSONSchema::compile(plan_schema).map_err(|err| PlanError::Schema(err.to_string()))?;

    let mut report = ValidationReport::default();

    if let Err(errors) = compiled.validate(plan_json) {
        for error in errors {
            let path = normalized_json_pointer(&error.instance_path.to_string());
            report.push(ValidationIssue::error(
                "schema_violation",
                path,
                error.to_string(),
            ));
        }
    }

    Ok(report)
}

/// Validate the plan on its own: versions, limits, run options and overrides.
pub fn validate_plan(plan: &Plan) -> ValidationReport {
    let mut report = ValidationReport::default();

    if plan.plan_version != PLAN_VERSION {
        report.push(
            ValidationIssue::error(
                "plan_version_mismatch",
                "/plan_version",
                format!(
                    "plan_version '{}' is not supported (expected '{PLAN_VERSION}')",
                    plan.plan_version
                ),
            )
            .with_hint(format!("set plan_version to '{PLAN_VERSION}'")),
        );
    }

    validate_targets(&plan.targets, &mut report);
    validate_run(plan, &mut report);

    let mut seen = HashSet::new();
    for (idx, settings) in plan.columns.iter().enumerate() {
        let base_path = format!("/columns/{idx}");
        let key = (settings.table_identifier(), settings.column.clone());
        if !seen.insert(key) {
            report.push(
                ValidationIssue::error(
                    "duplicate_column_settings",
                    base_path.clone(),
                    format!(
                        "column '{}.{}.{}' is configured more than once",
                        settings.schema, settings.table, settings.column
                    ),
                )
                .with_hint("merge duplicate column entries"),
            );
        }
        validate_column_settings(settings, &base_path, &mut report);
    }

    report
}

/// Check that every table and column named by the plan exists.
pub fn validate_plan_against_datasets(plan: &Plan, datasets: &[DatasetSchema]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let index: BTreeMap<&Identifier, &DatasetSchema> =
        datasets.iter().map(|dataset| (&dataset.id, dataset)).collect();

    for (idx, target) in plan.targets.iter().enumerate() {
        if !index.contains_key(&target.identifier()) {
            report.push(ValidationIssue::error(
                "unknown_table",
                format!("/targets/{idx}"),
                format!("table '{}' not found", target.identifier()),
            ));
        }
    }

    for (idx, settings) in plan.columns.iter().enumerate() {
        let base_path = format!("/columns/{idx}");
        let table = settings.table_identifier();
        let Some(dataset) = index.get(&table) else {
            report.push(
                ValidationIssue::warning(
                    "settings_for_untargeted_table",
                    base_path,
                    format!("table '{table}' is not a target; settings are ignored"),
                ),
            );
            continue;
        };
        if dataset.column(&settings.column).is_none() {
            report.push(ValidationIssue::error(
                "unknown_column",
                format!("{base_path}/column"),
                format!("column '{}' not found in '{table}'", settings.column),
            ));
        }
        if let Some(GeneratorSettings::Reference {
            schema,
            table,
            column,
        }) = &settings.generator
        {
            let parent = Identifier::new(schema, table);
            if let Some(parent_dataset) = index.get(&parent) {
                if parent_dataset.column(column).is_none() {
                    report.push(ValidationIssue::error(
                        "unknown_reference_column",
                        format!("{base_path}/generator/column"),
                        format!("referenced column '{column}' not found in '{parent}'"),
                    ));
                }
            }
        }
    }

    report
}

fn validate_targets(targets: &[Target], report: &mut ValidationReport) {
    if targets.is_empty() {
        report.push(
            ValidationIssue::error("targets_empty", "/targets", "plan requires at least one target")
                .with_hint("add at least one target table"),
        );
        return;
    }

    let mut seen = HashSet::new();
    for (idx, target) in targets.iter().enumerate() {
        let base_path = format!("/targets/{idx}");
        let limit_is_zero = matches!(target.limit, Limit::Rows(0) | Limit::Bytes(0));
        if limit_is_zero {
            report.push(
                ValidationIssue::error(
                    "limit_zero",
                    format!("{base_path}/limit"),
                    "limit must be greater than zero",
                )
                .with_hint("set rows or bytes to a positive integer"),
            );
        }

        if !seen.insert(target.identifier()) {
            report.push(
                ValidationIssue::error(
                    "duplicate_target",
                    base_path,
                    "duplicate target for the same table",
                )
                .with_hint("merge duplicate targets into a single entry"),
            );
        }
    }
}

fn validate_run(plan: &Plan, report: &mut ValidationReport) {
    if plan.run.workers == 0 {
        report.push(ValidationIssue::error(
            "workers_zero",
            "/run/workers",
            "workers must be at least 1",
        ));
    }
    if plan.run.batch_size == 0 {
        report.push(ValidationIssue::error(
            "batch_size_zero",
            "/run/batch_size",
            "batch_size must be at least 1",
        ));
    }
    if plan.run.sample_size == 0 {
        report.push(ValidationIssue::error(
            "sample_size_zero",
            "/run/sample_size",
            "sample_size must be at least 1",
        ));
    }
    let byte_limited = plan
        .targets
        .iter()
        .any(|target| matches!(target.limit, Limit::Bytes(_)));
    if byte_limited && plan.run.size_poll_interval_ms == 0 {
        report.push(ValidationIssue::error(
            "size_poll_interval_zero",
            "/run/size_poll_interval_ms",
            "size_poll_interval_ms must be positive when byte limits are used",
        ));
    }
}

fn validate_column_settings(settings: &ColumnSettings, base_path: &str, report: &mut ValidationReport) {
    for (field, value) in [
        ("null_percentage", settings.null_percentage),
        ("reuse_percentage", settings.reuse_percentage),
    ] {
        if value.is_some_and(|value| value > 100) {
            report.push(ValidationIssue::error(
                "percentage_out_of_range",
                format!("{base_path}/{field}"),
                format!("{field} must be between 0 and 100"),
            ));
        }
    }

    if let Some(shape) = settings.array {
        if shape.rows == 0 || shape.cols == 0 {
            report.push(ValidationIssue::error(
                "array_shape_empty",
                format!("{base_path}/array"),
                "array rows and cols must be at least 1",
            ));
        }
    }

    let Some(generator) = &settings.generator else {
        return;
    };
    let path = format!("{base_path}/generator");
    match generator {
        GeneratorSettings::Int {
            min: Some(min),
            max: Some(max),
        } if min > max => report.push(range_issue(&path, "int")),
        GeneratorSettings::Float {
            min: Some(min),
            max: Some(max),
            ..
        } if min > max => report.push(range_issue(&path, "float")),
        GeneratorSettings::Text {
            min_len: Some(min),
            max_len: Some(max),
            ..
        }
        | GeneratorSettings::Bytes {
            min_len: Some(min),
            max_len: Some(max),
        } if min > max => report.push(range_issue(&path, generator.kind())),
        GeneratorSettings::Text {
            charset: Some(charset),
            ..
        } if charset.is_empty() => report.push(ValidationIssue::error(
            "charset_empty",
            format!("{path}/charset"),
            "charset must not be empty",
        )),
        GeneratorSettings::OneOf { values } if values.is_empty() => {
            report.push(ValidationIssue::error(
                "one_of_empty",
                format!("{path}/values"),
                "one_of requires at least one value",
            ))
        }
        GeneratorSettings::Sequence { step: Some(0), .. } => report.push(ValidationIssue::error(
            "sequence_step_zero",
            format!("{path}/step"),
            "sequence step must be non-zero",
        )),
        GeneratorSettings::Constant { value } if value.is_array() || value.is_object() => {
            report.push(ValidationIssue::error(
                "constant_not_scalar",
                format!("{path}/value"),
                "constant value must be a scalar",
            ))
        }
        GeneratorSettings::Reference { schema, table, .. }
            if *schema == settings.schema && *table == settings.table =>
        {
            report.push(ValidationIssue::error(
                "self_reference",
                path,
                "a column cannot reference its own table",
            ))
        }
        _ => {}
    }
}

fn range_issue(path: &str, kind: &str) -> ValidationIssue {
    ValidationIssue::error(
        "range_inverted",
        path.to_string(),
        format!("{kind} min must be <= max"),
    )
}

fn normalized_json_pointer(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunOptions;

    fn plan(targets: Vec<Target>, columns: Vec<ColumnSettings>) -> Plan {
        Plan {
            plan_version: PLAN_VERSION.to_string(),
            targets,
            columns,
            run: RunOptions::default(),
        }
    }

    fn target(table: &str, limit: Limit) -> Target {
        Target {
            schema: "public".to_string(),
            table: table.to_string(),
            limit,
        }
    }

    fn settings(column: &str, generator: Option<GeneratorSettings>) -> ColumnSettings {
        ColumnSettings {
            schema: "public".to_string(),
            table: "users".to_string(),
            column: column.to_string(),
            generator,
            null_percentage: None,
            reuse_percentage: None,
            array: None,
            ahead: false,
        }
    }

    #[test]
    fn accepts_minimal_plan() {
        let plan = plan(vec![target("users", Limit::Rows(10))], Vec::new());
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn flags_duplicate_targets_and_zero_limits() {
        let plan = plan(
            vec![target("users", Limit::Rows(0)), target("users", Limit::Bytes(10))],
            Vec::new(),
        );
        let report = validate_plan(&plan);
        assert_eq!(report.error_codes(), vec!["limit_zero", "duplicate_target"]);
    }

    #[test]
    fn flags_inverted_ranges_and_percentages() {
        let mut null_heavy = settings("age", Some(GeneratorSettings::Int {
            min: Some(10),
            max: Some(1),
        }));
        null_heavy.null_percentage = Some(101);
        let plan = plan(vec![target("users", Limit::Rows(1))], vec![null_heavy]);
        let report = validate_plan(&plan);
        assert_eq!(
            report.error_codes(),
            vec!["percentage_out_of_range", "range_inverted"]
        );
    }

    #[test]
    fn flags_self_reference() {
        let plan = plan(
            vec![target("users", Limit::Rows(1))],
            vec![settings(
                "manager_id",
                Some(GeneratorSettings::Reference {
                    schema: "public".to_string(),
                    table: "users".to_string(),
                    column: "id".to_string(),
                }),
            )],
        );
        assert_eq!(validate_plan(&plan).error_codes(), vec!["self_reference"]);
    }

    #[test]
    fn checks_columns_against_datasets() {
        use datalchemy_core::{Column, TargetType, TypeKind};

        let users = DatasetSchema::new(
            Identifier::new("public", "users"),
            vec![Column::new("id", TargetType::new(TypeKind::Int, "integer"))],
        );
        let plan = plan(
            vec![target("users", Limit::Rows(1)), target("ghosts", Limit::Rows(1))],
            vec![settings("email", None)],
        );
        let report = validate_plan_against_datasets(&plan, &[users]);
        assert_eq!(report.error_codes(), vec!["unknown_table", "unknown_column"]);
    }
}
