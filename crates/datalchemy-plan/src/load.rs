use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::errors::{PlanError, Result};
use crate::model::Plan;
use crate::schema::plan_json_schema_value;
use crate::validate::{validate_plan, validate_plan_json};

/// Parse and validate a JSON plan document.
///
/// The raw document is checked against the generated JSON Schema before it is
/// deserialized, so structural mistakes are reported with JSON pointers.
pub fn parse_plan_json(contents: &str) -> Result<Plan> {
    let plan_json: Value = serde_json::from_str(contents)?;
    let structural = validate_plan_json(&plan_json, &plan_json_schema_value()?)?;
    if !structural.is_ok() {
        return Err(PlanError::Invalid(structural));
    }

    let plan: Plan = serde_json::from_value(plan_json)?;
    checked(plan)
}

/// Parse and validate a TOML plan document.
pub fn parse_plan_toml(contents: &str) -> Result<Plan> {
    let plan: Plan = toml::from_str(contents)?;
    checked(plan)
}

/// Load a plan from disk; `.toml` files are read as TOML, anything else as JSON.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let contents = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => parse_plan_toml(&contents),
        _ => parse_plan_json(&contents),
    }
}

fn checked(plan: Plan) -> Result<Plan> {
    let report = validate_plan(&plan);
    if !report.is_ok() {
        return Err(PlanError::Invalid(report));
    }
    for warning in &report.warnings {
        tracing::warn!(code = %warning.code, path = %warning.path, "{}", warning.message);
    }
    Ok(plan)
}
