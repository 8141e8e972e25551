//! Plan contracts, loading and validation for Datalchemy.
//!
//! A plan names the target tables with their row or byte ceilings, optional
//! per-column generator overrides and the run options of the worker pool.

pub mod errors;
pub mod load;
pub mod model;
pub mod schema;
pub mod validate;

pub use errors::{IssueSeverity, PlanError, Result, ValidationIssue, ValidationReport};
pub use load::{load_plan, parse_plan_json, parse_plan_toml};
pub use model::{
    ArrayShape, ColumnSettings, GeneratorSettings, Limit, PLAN_VERSION, Plan, RunOptions, Target,
};
pub use schema::{plan_json_schema, plan_json_schema_value};
pub use validate::{validate_plan, validate_plan_against_datasets, validate_plan_json};
