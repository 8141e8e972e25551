use std::collections::BTreeMap;
use std::sync::Arc;

use datalchemy_core::{Identifier, TargetType, TypeKind, Value};
use datalchemy_plan::{ArrayShape, GeneratorSettings};

use crate::acceptor::{AcceptRequest, Acceptance, Decision, GeneratorProvider, Reason, Scope};
use crate::adapter::DomainCatalog;
use crate::errors::GenerationError;
use crate::generators::BoxedGenerator;
use crate::generators::decorators::ArrayDecorator;
use crate::generators::primitives::{
    self, Bool, Bytes, Constant, DEFAULT_INT_MAX, DEFAULT_INT_MIN, FloatRange, IntRange, OneOf,
    Sequence, Suggested, Suggestion, Text, TimestampRange, Uuid,
};
use crate::generators::reference::BufferedReference;

/// Explicit leaf generators from the plan.
pub struct UserSettingsProvider;

impl GeneratorProvider for UserSettingsProvider {
    fn name(&self) -> &'static str {
        "user_settings"
    }

    fn accept(
        &self,
        request: &AcceptRequest,
        scope: &Scope<'_>,
    ) -> Result<Acceptance, GenerationError> {
        let Some(settings) = request.explicit_generator() else {
            return Ok(Acceptance::Declined);
        };
        if matches!(settings, GeneratorSettings::Reference { .. }) {
            return Ok(Acceptance::Declined);
        }
        let generator = primitives::from_settings(
            settings,
            request.target_type()?,
            scope.env.rng(request, settings.kind()),
        )?;
        Ok(Acceptance::Accepted(Decision::new(
            self.name(),
            Reason::UserSettings,
            generator,
        )))
    }
}

/// Values taken from a parent column: explicit references and single-column
/// foreign keys.
///
/// The dependency on the parent is registered only if this proposal wins.
pub struct ReferenceProvider;

impl GeneratorProvider for ReferenceProvider {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn accept(
        &self,
        request: &AcceptRequest,
        scope: &Scope<'_>,
    ) -> Result<Acceptance, GenerationError> {
        let (parent, parent_column, reason) = match request.explicit_generator() {
            Some(GeneratorSettings::Reference {
                schema,
                table,
                column,
            }) => (Identifier::new(schema, table), column.clone(), Reason::UserSettings),
            Some(_) => return Ok(Acceptance::Declined),
            None if request.is_declared_column() => {
                let Some(fk) = request.schema.foreign_key_for(&request.column) else {
                    return Ok(Acceptance::Declined);
                };
                let Some(parent_column) = fk.referenced_columns.first() else {
                    return Ok(Acceptance::Declined);
                };
                (fk.referenced.clone(), parent_column.clone(), Reason::Reference)
            }
            None => return Ok(Acceptance::Declined),
        };

        let child = request.schema.id.clone();
        // A nullable self reference is left empty instead of forming a cycle.
        if parent == child && reason == Reason::Reference && request.target_type()?.nullable {
            return Ok(Acceptance::Accepted(Decision::new(
                self.name(),
                reason,
                Box::new(Constant::new(Value::Null)),
            )));
        }

        let reader = scope
            .env
            .storage
            .sample_reader(&parent, &parent_column, scope.env.sample_size);
        let (generator, subscription) = BufferedReference::new(parent.clone(), parent_column, reader);
        let resolver = Arc::clone(&scope.env.resolver);
        Ok(Acceptance::Accepted(
            Decision::new(self.name(), reason, Box::new(generator))
                .on_win(move || resolver.register(&child, &parent, subscription)),
        ))
    }
}

/// Generator choice that needs the driver's exact type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverRule {
    SmallInt,
    Integer,
    BigInt,
    /// `numeric(p, s)`: bounded by precision, rounded to scale.
    Numeric,
    /// `varchar(n)`: up to n characters.
    VarChar,
    /// `char(n)`: exactly n characters.
    FixedChar,
    Uuid,
}

/// Rules keyed by the lowercase base source type.
pub struct DriverProvider {
    rules: BTreeMap<String, DriverRule>,
}

impl DriverProvider {
    pub fn new(rules: impl IntoIterator<Item = (String, DriverRule)>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Type names reported by PostgreSQL.
    pub fn postgres() -> Self {
        let rules = [
            ("smallint", DriverRule::SmallInt),
            ("int2", DriverRule::SmallInt),
            ("integer", DriverRule::Integer),
            ("int", DriverRule::Integer),
            ("int4", DriverRule::Integer),
            ("bigint", DriverRule::BigInt),
            ("int8", DriverRule::BigInt),
            ("numeric", DriverRule::Numeric),
            ("decimal", DriverRule::Numeric),
            ("character varying", DriverRule::VarChar),
            ("varchar", DriverRule::VarChar),
            ("character", DriverRule::FixedChar),
            ("char", DriverRule::FixedChar),
            ("bpchar", DriverRule::FixedChar),
            ("uuid", DriverRule::Uuid),
        ];
        Self::new(rules.map(|(name, rule)| (name.to_string(), rule)))
    }

    fn build(
        rule: DriverRule,
        target_type: &TargetType,
        request: &AcceptRequest,
        scope: &Scope<'_>,
    ) -> Result<Option<BoxedGenerator>, GenerationError> {
        let rng = scope.env.rng(request, "driver");
        let modifiers = target_type.type_modifiers();
        let integer = |max: i64| -> Result<Option<BoxedGenerator>, GenerationError> {
            if target_type.auto_increment {
                return Ok(Some(Box::new(Sequence::new(1, 1)?)));
            }
            Ok(Some(Box::new(IntRange::new(1, max, rng.clone())?)))
        };
        match rule {
            DriverRule::SmallInt => integer(i16::MAX as i64),
            DriverRule::Integer => integer(i32::MAX as i64),
            DriverRule::BigInt => integer(i64::MAX),
            DriverRule::Numeric => {
                let [precision, scale] = modifiers.as_slice() else {
                    return Ok(None);
                };
                let (precision, scale) = (*precision, *scale);
                let integral_digits = precision.saturating_sub(scale).min(15) as i32;
                let step = 10_f64.powi(-(scale as i32));
                let max = (10_f64.powi(integral_digits) - step).max(0.0);
                Ok(Some(Box::new(FloatRange::new(0.0, max, Some(scale), rng)?)))
            }
            DriverRule::VarChar => {
                let Some(width) = modifiers.first().map(|width| *width as usize) else {
                    return Ok(None);
                };
                let min_len = width.min(8);
                Ok(Some(Box::new(Text::new(
                    min_len,
                    width.max(min_len),
                    primitives::DEFAULT_CHARSET,
                    rng,
                )?)))
            }
            DriverRule::FixedChar => {
                let width = modifiers.first().map_or(1, |width| *width as usize);
                Ok(Some(Box::new(Text::new(
                    width,
                    width,
                    primitives::DEFAULT_CHARSET,
                    rng,
                )?)))
            }
            DriverRule::Uuid => Ok(Some(Box::new(Uuid::new(rng)))),
        }
    }
}

impl GeneratorProvider for DriverProvider {
    fn name(&self) -> &'static str {
        "driver"
    }

    fn accept(
        &self,
        request: &AcceptRequest,
        scope: &Scope<'_>,
    ) -> Result<Acceptance, GenerationError> {
        let target_type = request.target_type()?;
        // Arrays belong to the array provider; their elements come back here.
        if target_type.kind == TypeKind::Array {
            return Ok(Acceptance::Declined);
        }
        let Some(rule) = self.rules.get(&target_type.base_source_type()) else {
            return Ok(Acceptance::Declined);
        };
        Ok(match Self::build(*rule, target_type, request, scope)? {
            Some(generator) => Acceptance::Accepted(Decision::new(
                self.name(),
                Reason::DriverAwareness,
                generator,
            )),
            None => Acceptance::Declined,
        })
    }
}

/// Array columns: resolves the element type through the registry and repeats it.
///
/// A request carrying a base generator is shaped from that generator instead,
/// whatever the column type.
pub struct ArrayProvider {
    default_shape: ArrayShape,
}

impl Default for ArrayProvider {
    fn default() -> Self {
        Self {
            default_shape: ArrayShape { rows: 1, cols: 3 },
        }
    }
}

impl GeneratorProvider for ArrayProvider {
    fn name(&self) -> &'static str {
        "array"
    }

    fn accept(
        &self,
        request: &AcceptRequest,
        scope: &Scope<'_>,
    ) -> Result<Acceptance, GenerationError> {
        let shape = request
            .settings
            .as_ref()
            .and_then(|settings| settings.array)
            .unwrap_or(self.default_shape);

        // A generator resolved for the column is repeated into the requested shape.
        if let Some(inner) = request.base_generator.as_ref().and_then(|base| base.take()) {
            let generator = ArrayDecorator::new(inner, shape.rows as usize, shape.cols as usize);
            return Ok(Acceptance::Accepted(Decision::new(
                self.name(),
                Reason::UserSettings,
                Box::new(generator),
            )));
        }

        if request.explicit_generator().is_some() {
            return Ok(Acceptance::Declined);
        }
        let target_type = request.target_type()?;
        if target_type.kind != TypeKind::Array {
            return Ok(Acceptance::Declined);
        }
        let Some(element) = target_type.element.as_deref() else {
            return Ok(Acceptance::Declined);
        };

        let inner = scope
            .registry
            .resolve(&request.element(element.clone()), scope.env)?;
        let generator = ArrayDecorator::new(inner, shape.rows as usize, shape.cols as usize);
        Ok(Acceptance::Accepted(Decision::new(
            self.name(),
            Reason::ColumnType,
            Box::new(generator),
        )))
    }
}

/// Fallback by logical type.
pub struct ColumnTypeProvider;

impl GeneratorProvider for ColumnTypeProvider {
    fn name(&self) -> &'static str {
        "column_type"
    }

    fn accept(
        &self,
        request: &AcceptRequest,
        scope: &Scope<'_>,
    ) -> Result<Acceptance, GenerationError> {
        let target_type = request.target_type()?;
        let rng = scope.env.rng(request, "type");
        let generator: BoxedGenerator = match target_type.kind {
            TypeKind::Bool => Box::new(Bool::new(rng)),
            TypeKind::Int => Box::new(IntRange::new(DEFAULT_INT_MIN, DEFAULT_INT_MAX, rng)?),
            TypeKind::Float => Box::new(FloatRange::new(0.0, 10_000.0, None, rng)?),
            TypeKind::Numeric => Box::new(FloatRange::new(0.0, 10_000.0, Some(2), rng)?),
            TypeKind::Text => {
                let max_len = primitives::declared_width(target_type).unwrap_or(32).min(32);
                Box::new(Text::new(
                    max_len.min(8),
                    max_len,
                    primitives::DEFAULT_CHARSET,
                    rng,
                )?)
            }
            TypeKind::Bytes => Box::new(Bytes::new(16, 64, rng)?),
            TypeKind::Uuid => Box::new(Uuid::new(rng)),
            TypeKind::Timestamp | TypeKind::Date => {
                let (min, max) = primitives::default_timestamp_bounds();
                Box::new(TimestampRange::new(min, max, rng)?)
            }
            TypeKind::Json => Box::new(Constant::new(Value::String("{}".to_string()))),
            TypeKind::Array | TypeKind::Enum | TypeKind::Other => {
                return Ok(Acceptance::Declined);
            }
        };
        Ok(Acceptance::Accepted(Decision::new(
            self.name(),
            Reason::ColumnType,
            generator,
        )))
    }
}

/// Enumerated domains: picks one of the declared labels.
pub struct DomainProvider {
    domains: DomainCatalog,
}

impl DomainProvider {
    pub fn new(domains: DomainCatalog) -> Self {
        Self { domains }
    }

    fn labels(&self, target_type: &TargetType) -> Option<&Vec<String>> {
        let unqualified = target_type
            .source_type
            .rsplit('.')
            .next()
            .unwrap_or(&target_type.source_type)
            .to_string();
        [target_type.source_type.clone(), unqualified]
            .iter()
            .find_map(|key| self.domains.get(key))
    }
}

impl GeneratorProvider for DomainProvider {
    fn name(&self) -> &'static str {
        "domain"
    }

    fn accept(
        &self,
        request: &AcceptRequest,
        scope: &Scope<'_>,
    ) -> Result<Acceptance, GenerationError> {
        let target_type = request.target_type()?;
        let Some(labels) = self.labels(target_type).filter(|labels| !labels.is_empty()) else {
            return Ok(Acceptance::Declined);
        };
        let values = labels
            .iter()
            .map(|label| Value::String(label.clone()))
            .collect();
        let generator = OneOf::new(values, scope.env.rng(request, "domain"))?;
        Ok(Acceptance::Accepted(Decision::new(
            self.name(),
            Reason::Domain,
            Box::new(generator),
        )))
    }
}

/// Guesses from the column name for textual or unrecognised types.
pub struct NameSuggestionProvider;

impl GeneratorProvider for NameSuggestionProvider {
    fn name(&self) -> &'static str {
        "name_suggestion"
    }

    fn accept(
        &self,
        request: &AcceptRequest,
        scope: &Scope<'_>,
    ) -> Result<Acceptance, GenerationError> {
        let target_type = request.target_type()?;
        if !matches!(target_type.kind, TypeKind::Text | TypeKind::Other) {
            return Ok(Acceptance::Declined);
        }
        let Some(suggestion) = Suggestion::for_column(&request.column) else {
            return Ok(Acceptance::Declined);
        };
        let generator = Suggested::new(suggestion, scope.env.rng(request, "name"));
        Ok(Acceptance::Accepted(Decision::new(
            self.name(),
            Reason::NameSuggestion,
            Box::new(generator),
        )))
    }
}
