use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use datalchemy_core::Identifier;

/// Current contract version for plan documents.
pub const PLAN_VERSION: &str = "0.1";

/// A target table and the ceiling that ends its generation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Target {
    /// Schema name (namespace) of the table.
    pub schema: String,
    /// Table name within the schema.
    pub table: String,
    pub limit: Limit,
}

/// Generation ceiling for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// Stop once this many rows are committed.
    Rows(u64),
    /// Stop once the table grew by roughly this many bytes.
    Bytes(u64),
}

/// Per-column override of the generation strategy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ColumnSettings {
    pub schema: String,
    pub table: String,
    pub column: String,
    /// Explicit generator; omitted means "pick from the column type".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorSettings>,
    /// Percentage (0-100) of values replaced by NULL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_percentage: Option<u8>,
    /// Percentage (0-100) of values replayed from previously stored ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_percentage: Option<u8>,
    /// Repeat the generator into an array or matrix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array: Option<ArrayShape>,
    /// Prepare the next value in the background.
    #[serde(default)]
    pub ahead: bool,
}

/// Array (rows = 1) or matrix shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArrayShape {
    #[serde(default = "default_array_rows")]
    pub rows: u32,
    pub cols: u32,
}

/// Explicit generator choices with their parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorSettings {
    Int {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Float {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        /// Decimal digits kept after rounding.
        #[serde(default)]
        scale: Option<u32>,
    },
    Text {
        #[serde(default)]
        min_len: Option<usize>,
        #[serde(default)]
        max_len: Option<usize>,
        #[serde(default)]
        charset: Option<String>,
    },
    Uuid,
    Bool,
    Timestamp {
        /// Lower bound, `YYYY-MM-DDTHH:MM:SS`.
        #[serde(default)]
        min: Option<String>,
        /// Upper bound, `YYYY-MM-DDTHH:MM:SS`.
        #[serde(default)]
        max: Option<String>,
    },
    Bytes {
        #[serde(default)]
        min_len: Option<usize>,
        #[serde(default)]
        max_len: Option<usize>,
    },
    OneOf {
        values: Vec<String>,
    },
    Sequence {
        #[serde(default)]
        start: Option<i64>,
        #[serde(default)]
        step: Option<i64>,
    },
    Constant {
        value: serde_json::Value,
    },
    /// Take values from a column of another table.
    Reference {
        schema: String,
        table: String,
        column: String,
    },
}

impl GeneratorSettings {
    /// Short name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            GeneratorSettings::Int { .. } => "int",
            GeneratorSettings::Float { .. } => "float",
            GeneratorSettings::Text { .. } => "text",
            GeneratorSettings::Uuid => "uuid",
            GeneratorSettings::Bool => "bool",
            GeneratorSettings::Timestamp { .. } => "timestamp",
            GeneratorSettings::Bytes { .. } => "bytes",
            GeneratorSettings::OneOf { .. } => "one_of",
            GeneratorSettings::Sequence { .. } => "sequence",
            GeneratorSettings::Constant { .. } => "constant",
            GeneratorSettings::Reference { .. } => "reference",
        }
    }
}

/// Run-wide execution options.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunOptions {
    /// Number of tables generated concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Rows per persistence call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How often byte-limited tables re-measure their size.
    #[serde(default = "default_size_poll_interval_ms")]
    pub size_poll_interval_ms: u64,
    /// Rows requested by statistical sample reads.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Seed for reproducible leaf generators; random when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            size_poll_interval_ms: default_size_poll_interval_ms(),
            sample_size: default_sample_size(),
            seed: None,
        }
    }
}

/// Canonical plan definition for generation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// Contract version for the plan format.
    pub plan_version: String,
    /// Tables to populate.
    pub targets: Vec<Target>,
    /// Column overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnSettings>,
    #[serde(default)]
    pub run: RunOptions,
}

impl Target {
    pub fn identifier(&self) -> Identifier {
        Identifier::new(&self.schema, &self.table)
    }
}

impl ColumnSettings {
    pub fn table_identifier(&self) -> Identifier {
        Identifier::new(&self.schema, &self.table)
    }
}

impl Plan {
    /// Settings for one column, if the plan mentions it.
    pub fn column_settings(&self, table: &Identifier, column: &str) -> Option<&ColumnSettings> {
        self.columns
            .iter()
            .find(|settings| settings.column == column && settings.table_identifier() == *table)
    }
}

fn default_array_rows() -> u32 {
    1
}

fn default_workers() -> usize {
    1
}

fn default_batch_size() -> usize {
    500
}

fn default_size_poll_interval_ms() -> u64 {
    1000
}

fn default_sample_size() -> usize {
    100
}
