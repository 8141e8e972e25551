//! Leaf generators: values drawn from a seeded RNG, never from storage.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use tokio_util::sync::CancellationToken;

use datalchemy_core::{TargetType, TypeKind, Value};
use datalchemy_plan::GeneratorSettings;

use crate::errors::GenerationError;
use crate::generators::{BoxedGenerator, Generator};

pub const DEFAULT_INT_MIN: i64 = 1;
pub const DEFAULT_INT_MAX: i64 = 100_000;
const DEFAULT_FLOAT_MIN: f64 = 0.0;
const DEFAULT_FLOAT_MAX: f64 = 10_000.0;
const DEFAULT_TEXT_MIN: usize = 8;
const DEFAULT_TEXT_MAX: usize = 32;
const DEFAULT_BYTES_MIN: usize = 16;
const DEFAULT_BYTES_MAX: usize = 64;
pub const DEFAULT_CHARSET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const FIRST_NAMES: &[&str] = &[
    "Ana", "Bruno", "Carlos", "Daniela", "Eduardo", "Fernanda", "Gustavo", "Helena",
];
const LAST_NAMES: &[&str] = &[
    "Silva", "Santos", "Oliveira", "Souza", "Lima", "Costa", "Ribeiro", "Almeida",
];

/// Build the leaf generator named by an explicit override.
///
/// `reference` is not a leaf and is rejected here; it is bound by the
/// reference provider instead.
pub fn from_settings(
    settings: &GeneratorSettings,
    target_type: &TargetType,
    rng: ChaCha8Rng,
) -> Result<BoxedGenerator, GenerationError> {
    let generator: BoxedGenerator = match settings {
        GeneratorSettings::Int { min, max } => Box::new(IntRange::new(
            min.unwrap_or(DEFAULT_INT_MIN),
            max.unwrap_or(DEFAULT_INT_MAX),
            rng,
        )?),
        GeneratorSettings::Float { min, max, scale } => Box::new(FloatRange::new(
            min.unwrap_or(DEFAULT_FLOAT_MIN),
            max.unwrap_or(DEFAULT_FLOAT_MAX),
            *scale,
            rng,
        )?),
        GeneratorSettings::Text {
            min_len,
            max_len,
            charset,
        } => {
            let mut max_len = max_len.unwrap_or(DEFAULT_TEXT_MAX);
            if let Some(width) = declared_width(target_type) {
                max_len = max_len.min(width);
            }
            let min_len = min_len.unwrap_or(DEFAULT_TEXT_MIN.min(max_len)).min(max_len);
            Box::new(Text::new(
                min_len,
                max_len,
                charset.as_deref().unwrap_or(DEFAULT_CHARSET),
                rng,
            )?)
        }
        GeneratorSettings::Uuid => Box::new(Uuid::new(rng)),
        GeneratorSettings::Bool => Box::new(Bool::new(rng)),
        GeneratorSettings::Timestamp { min, max } => {
            let (default_min, default_max) = default_timestamp_bounds();
            let min = min
                .as_deref()
                .map(parse_timestamp)
                .transpose()?
                .unwrap_or(default_min);
            let max = max
                .as_deref()
                .map(parse_timestamp)
                .transpose()?
                .unwrap_or(default_max);
            Box::new(TimestampRange::new(min, max, rng)?)
        }
        GeneratorSettings::Bytes { min_len, max_len } => Box::new(Bytes::new(
            min_len.unwrap_or(DEFAULT_BYTES_MIN),
            max_len.unwrap_or(DEFAULT_BYTES_MAX),
            rng,
        )?),
        GeneratorSettings::OneOf { values } => {
            let values = values
                .iter()
                .map(|label| coerce_label(label, target_type.kind))
                .collect();
            Box::new(OneOf::new(values, rng)?)
        }
        GeneratorSettings::Sequence { start, step } => {
            Box::new(Sequence::new(start.unwrap_or(1), step.unwrap_or(1))?)
        }
        GeneratorSettings::Constant { value } => Box::new(Constant::new(json_scalar(value)?)),
        GeneratorSettings::Reference { .. } => {
            return Err(GenerationError::InvalidPlan(
                "reference is not a leaf generator".to_string(),
            ));
        }
    };
    Ok(generator)
}

/// Character width declared by the column type (`varchar(n)`, `char(n)`).
pub fn declared_width(target_type: &TargetType) -> Option<usize> {
    if target_type.kind != TypeKind::Text {
        return None;
    }
    target_type
        .type_modifiers()
        .first()
        .map(|width| *width as usize)
}

pub fn default_timestamp_bounds() -> (NaiveDateTime, NaiveDateTime) {
    let base = NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    (base, base + Duration::days(365))
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, GenerationError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|err| {
        GenerationError::InvalidPlan(format!("invalid timestamp '{raw}': {err}"))
    })
}

/// Interpret a textual label according to the column kind.
pub fn coerce_label(label: &str, kind: TypeKind) -> Value {
    let parsed = match kind {
        TypeKind::Int => label.parse().ok().map(Value::Int64),
        TypeKind::Float | TypeKind::Numeric => label.parse().ok().map(Value::Float64),
        TypeKind::Bool => label.parse().ok().map(Value::Bool),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::String(label.to_string()))
}

fn json_scalar(value: &serde_json::Value) -> Result<Value, GenerationError> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(flag) => Ok(Value::Bool(*flag)),
        serde_json::Value::Number(number) => number
            .as_i64()
            .map(Value::Int64)
            .or_else(|| number.as_f64().map(Value::Float64))
            .ok_or_else(|| GenerationError::InvalidPlan(format!("unsupported number {number}"))),
        serde_json::Value::String(text) => Ok(Value::String(text.clone())),
        other => Err(GenerationError::InvalidPlan(format!(
            "constant must be a scalar, got {other}"
        ))),
    }
}

pub struct IntRange {
    min: i64,
    max: i64,
    rng: ChaCha8Rng,
}

impl IntRange {
    pub fn new(min: i64, max: i64, rng: ChaCha8Rng) -> Result<Self, GenerationError> {
        if min > max {
            return Err(GenerationError::InvalidPlan(
                "int min must be <= max".to_string(),
            ));
        }
        Ok(Self { min, max, rng })
    }
}

#[async_trait]
impl Generator for IntRange {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        Ok(Value::Int64(self.rng.random_range(self.min..=self.max)))
    }
}

/// Uniform float, optionally rounded to `scale` decimal digits.
pub struct FloatRange {
    min: f64,
    max: f64,
    scale: Option<u32>,
    rng: ChaCha8Rng,
}

impl FloatRange {
    pub fn new(
        min: f64,
        max: f64,
        scale: Option<u32>,
        rng: ChaCha8Rng,
    ) -> Result<Self, GenerationError> {
        if min > max {
            return Err(GenerationError::InvalidPlan(
                "float min must be <= max".to_string(),
            ));
        }
        Ok(Self {
            min,
            max,
            scale,
            rng,
        })
    }
}

#[async_trait]
impl Generator for FloatRange {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let value = if self.min == self.max {
            self.min
        } else {
            self.rng.random_range(self.min..=self.max)
        };
        let value = match self.scale {
            Some(scale) => {
                let factor = 10_f64.powi(scale as i32);
                ((value * factor).round() / factor).clamp(self.min, self.max)
            }
            None => value,
        };
        Ok(Value::Float64(value))
    }
}

pub struct Text {
    min_len: usize,
    max_len: usize,
    chars: Vec<char>,
    rng: ChaCha8Rng,
}

impl Text {
    pub fn new(
        min_len: usize,
        max_len: usize,
        charset: &str,
        rng: ChaCha8Rng,
    ) -> Result<Self, GenerationError> {
        let chars: Vec<char> = charset.chars().collect();
        if chars.is_empty() {
            return Err(GenerationError::InvalidPlan(
                "text charset must not be empty".to_string(),
            ));
        }
        if min_len > max_len {
            return Err(GenerationError::InvalidPlan(
                "text min_len must be <= max_len".to_string(),
            ));
        }
        Ok(Self {
            min_len,
            max_len,
            chars,
            rng,
        })
    }
}

#[async_trait]
impl Generator for Text {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let len = self.rng.random_range(self.min_len..=self.max_len);
        let value: String = (0..len)
            .map(|_| self.chars[self.rng.random_range(0..self.chars.len())])
            .collect();
        Ok(Value::String(value))
    }
}

/// Random version 4 UUIDs in their textual form.
pub struct Uuid {
    rng: ChaCha8Rng,
}

impl Uuid {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self { rng }
    }
}

#[async_trait]
impl Generator for Uuid {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let mut bytes = [0_u8; 16];
        self.rng.fill(&mut bytes);
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Ok(Value::String(uuid::Uuid::from_bytes(bytes).to_string()))
    }
}

pub struct Bool {
    rng: ChaCha8Rng,
}

impl Bool {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self { rng }
    }
}

#[async_trait]
impl Generator for Bool {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        Ok(Value::Bool(self.rng.random_bool(0.5)))
    }
}

/// Second-resolution timestamps inside an inclusive window.
pub struct TimestampRange {
    min: NaiveDateTime,
    span_seconds: i64,
    rng: ChaCha8Rng,
}

impl TimestampRange {
    pub fn new(
        min: NaiveDateTime,
        max: NaiveDateTime,
        rng: ChaCha8Rng,
    ) -> Result<Self, GenerationError> {
        if min > max {
            return Err(GenerationError::InvalidPlan(
                "timestamp min must be <= max".to_string(),
            ));
        }
        Ok(Self {
            min,
            span_seconds: (max - min).num_seconds(),
            rng,
        })
    }
}

#[async_trait]
impl Generator for TimestampRange {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let offset = self.rng.random_range(0..=self.span_seconds);
        Ok(Value::Timestamp(self.min + Duration::seconds(offset)))
    }
}

pub struct Bytes {
    min_len: usize,
    max_len: usize,
    rng: ChaCha8Rng,
}

impl Bytes {
    pub fn new(min_len: usize, max_len: usize, rng: ChaCha8Rng) -> Result<Self, GenerationError> {
        if min_len > max_len {
            return Err(GenerationError::InvalidPlan(
                "bytes min_len must be <= max_len".to_string(),
            ));
        }
        Ok(Self {
            min_len,
            max_len,
            rng,
        })
    }
}

#[async_trait]
impl Generator for Bytes {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let len = self.rng.random_range(self.min_len..=self.max_len);
        let mut value = vec![0_u8; len];
        self.rng.fill(value.as_mut_slice());
        Ok(Value::Bytes(value))
    }
}

/// Uniform pick from a fixed list.
pub struct OneOf {
    values: Vec<Value>,
    rng: ChaCha8Rng,
}

impl OneOf {
    pub fn new(values: Vec<Value>, rng: ChaCha8Rng) -> Result<Self, GenerationError> {
        if values.is_empty() {
            return Err(GenerationError::InvalidPlan(
                "one_of requires at least one value".to_string(),
            ));
        }
        Ok(Self { values, rng })
    }
}

#[async_trait]
impl Generator for OneOf {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let value = self.values.choose(&mut self.rng).cloned();
        Ok(value.unwrap_or(Value::Null))
    }
}

/// Arithmetic progression; useful for keys that must not collide.
pub struct Sequence {
    next: i64,
    step: i64,
}

impl Sequence {
    pub fn new(start: i64, step: i64) -> Result<Self, GenerationError> {
        if step == 0 {
            return Err(GenerationError::InvalidPlan(
                "sequence step must be non-zero".to_string(),
            ));
        }
        Ok(Self { next: start, step })
    }
}

#[async_trait]
impl Generator for Sequence {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let value = self.next;
        self.next = self.next.checked_add(self.step).ok_or_else(|| {
            GenerationError::Generator("sequence overflowed i64".to_string())
        })?;
        Ok(Value::Int64(value))
    }
}

pub struct Constant {
    value: Value,
}

impl Constant {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait]
impl Generator for Constant {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        Ok(self.value.clone())
    }
}

/// Shapes recognised from column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suggestion {
    Email,
    PersonName,
    Phone,
    Url,
}

impl Suggestion {
    /// Match a column name against the known shapes.
    pub fn for_column(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.contains("email") || name.contains("e_mail") {
            Some(Suggestion::Email)
        } else if name.contains("phone") || name.contains("mobile") {
            Some(Suggestion::Phone)
        } else if name.contains("url") || name.contains("website") {
            Some(Suggestion::Url)
        } else if name.contains("name") {
            Some(Suggestion::PersonName)
        } else {
            None
        }
    }
}

pub struct Suggested {
    kind: Suggestion,
    rng: ChaCha8Rng,
}

impl Suggested {
    pub fn new(kind: Suggestion, rng: ChaCha8Rng) -> Self {
        Self { kind, rng }
    }
}

#[async_trait]
impl Generator for Suggested {
    async fn produce(&mut self, _cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let rng = &mut self.rng;
        let value = match self.kind {
            Suggestion::Email => format!("user{:04}@example.com", rng.random_range(1..=9999)),
            Suggestion::PersonName => {
                let first = FIRST_NAMES.choose(&mut *rng).unwrap_or(&"Pessoa");
                let last = LAST_NAMES.choose(&mut *rng).unwrap_or(&"Teste");
                format!("{first} {last}")
            }
            Suggestion::Phone => format!(
                "+55 11 9{:04}-{:04}",
                rng.random_range(0..10_000),
                rng.random_range(0..10_000)
            ),
            Suggestion::Url => format!("https://example.com/p/{}", rng.random_range(1..=99_999)),
        };
        Ok(Value::String(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::seeded_rng;

    async fn draw(generator: &mut BoxedGenerator, count: usize) -> Vec<Value> {
        let cancel = CancellationToken::new();
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(generator.produce(&cancel).await.expect("value"));
        }
        values
    }

    #[tokio::test]
    async fn int_range_stays_inside_bounds() {
        let settings = GeneratorSettings::Int {
            min: Some(-3),
            max: Some(3),
        };
        let ty = TargetType::new(TypeKind::Int, "integer");
        let mut generator = from_settings(&settings, &ty, seeded_rng(1, "int")).unwrap();
        for value in draw(&mut generator, 200).await {
            let value = value.as_i64().unwrap();
            assert!((-3..=3).contains(&value));
        }
    }

    #[tokio::test]
    async fn float_scale_rounds_values() {
        let mut generator: BoxedGenerator =
            Box::new(FloatRange::new(0.0, 1.0, Some(2), seeded_rng(1, "f")).unwrap());
        for value in draw(&mut generator, 50).await {
            let value = value.as_f64().unwrap();
            assert!((value * 100.0 - (value * 100.0).round()).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn text_respects_declared_width_and_charset() {
        let settings = GeneratorSettings::Text {
            min_len: None,
            max_len: Some(50),
            charset: Some("ab".to_string()),
        };
        let ty = TargetType::new(TypeKind::Text, "character varying(4)");
        let mut generator = from_settings(&settings, &ty, seeded_rng(1, "t")).unwrap();
        for value in draw(&mut generator, 50).await {
            let text = value.as_str().unwrap().to_string();
            assert!(text.len() <= 4);
            assert!(text.chars().all(|ch| ch == 'a' || ch == 'b'));
        }
    }

    #[tokio::test]
    async fn one_of_coerces_labels_to_column_kind() {
        let settings = GeneratorSettings::OneOf {
            values: vec!["1".to_string(), "2".to_string()],
        };
        let ty = TargetType::new(TypeKind::Int, "integer");
        let mut generator = from_settings(&settings, &ty, seeded_rng(1, "o")).unwrap();
        for value in draw(&mut generator, 20).await {
            assert!(matches!(value, Value::Int64(1 | 2)));
        }
    }

    #[tokio::test]
    async fn sequence_counts_by_step() {
        let mut generator: BoxedGenerator = Box::new(Sequence::new(10, 5).unwrap());
        assert_eq!(
            draw(&mut generator, 3).await,
            vec![Value::Int64(10), Value::Int64(15), Value::Int64(20)]
        );
    }

    #[test]
    fn rejects_bad_parameters() {
        let ty = TargetType::new(TypeKind::Text, "text");
        let bad_timestamp = GeneratorSettings::Timestamp {
            min: Some("yesterday".to_string()),
            max: None,
        };
        assert!(from_settings(&bad_timestamp, &ty, seeded_rng(1, "x")).is_err());
        let reference = GeneratorSettings::Reference {
            schema: "public".to_string(),
            table: "t".to_string(),
            column: "id".to_string(),
        };
        assert!(from_settings(&reference, &ty, seeded_rng(1, "x")).is_err());
        let object = GeneratorSettings::Constant {
            value: serde_json::json!({"a": 1}),
        };
        assert!(from_settings(&object, &ty, seeded_rng(1, "x")).is_err());
    }

    #[test]
    fn suggestions_follow_column_names() {
        assert_eq!(Suggestion::for_column("contact_email"), Some(Suggestion::Email));
        assert_eq!(Suggestion::for_column("full_name"), Some(Suggestion::PersonName));
        assert_eq!(Suggestion::for_column("homepage_url"), Some(Suggestion::Url));
        assert_eq!(Suggestion::for_column("total"), None);
    }
}
