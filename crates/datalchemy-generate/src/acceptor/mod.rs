//! Generator arbitration.
//!
//! Every provider is asked about a column. Each may decline or propose a
//! generator tagged with a [`Reason`]; the single proposal with the strongest
//! reason wins. A tie at the top is a configuration error, not a coin toss.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rand_chacha::ChaCha8Rng;
use tracing::debug;

use datalchemy_core::{DatasetSchema, TargetType};
use datalchemy_plan::{ColumnSettings, GeneratorSettings};

use crate::adapter::{DomainCatalog, Storage};
use crate::errors::GenerationError;
use crate::generators::{BoxedGenerator, seeded_rng};
use crate::resolver::ReferenceResolver;

pub mod providers;

pub use providers::{
    ArrayProvider, ColumnTypeProvider, DomainProvider, DriverProvider, DriverRule,
    NameSuggestionProvider, ReferenceProvider, UserSettingsProvider,
};

/// Why a provider claims a column, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reason {
    NameSuggestion,
    Domain,
    ColumnType,
    DriverAwareness,
    Reference,
    UserSettings,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::NameSuggestion => "name_suggestion",
            Reason::Domain => "domain",
            Reason::ColumnType => "column_type",
            Reason::DriverAwareness => "driver_awareness",
            Reason::Reference => "reference",
            Reason::UserSettings => "user_settings",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generator resolved earlier, handed to a provider that wraps it.
///
/// Clones share the slot; the first provider to [`take`](Self::take) it owns it.
#[derive(Clone)]
pub struct BaseGenerator(Arc<Mutex<Option<BoxedGenerator>>>);

impl BaseGenerator {
    pub fn new(generator: BoxedGenerator) -> Self {
        Self(Arc::new(Mutex::new(Some(generator))))
    }

    pub fn take(&self) -> Option<BoxedGenerator> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl fmt::Debug for BaseGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BaseGenerator")
    }
}

/// The column a generator is wanted for.
#[derive(Debug, Clone)]
pub struct AcceptRequest {
    pub schema: Arc<DatasetSchema>,
    pub column: String,
    /// Position of `column` in `schema`.
    pub column_index: Option<usize>,
    /// User override for the column, if the plan has one.
    pub settings: Option<ColumnSettings>,
    /// Type to generate instead of the declared one (array elements).
    pub base_type: Option<TargetType>,
    /// Already resolved generator for a wrapping provider.
    pub base_generator: Option<BaseGenerator>,
}

impl AcceptRequest {
    pub fn new(schema: Arc<DatasetSchema>, column: impl Into<String>) -> Self {
        let column = column.into();
        let column_index = schema.columns.iter().position(|c| c.name == column);
        Self {
            schema,
            column,
            column_index,
            settings: None,
            base_type: None,
            base_generator: None,
        }
    }

    pub fn with_settings(mut self, settings: Option<ColumnSettings>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_base_generator(mut self, generator: BoxedGenerator) -> Self {
        self.base_generator = Some(BaseGenerator::new(generator));
        self
    }

    /// Request for the element of an array column.
    pub fn element(&self, element: TargetType) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            column: self.column.clone(),
            column_index: self.column_index,
            settings: None,
            base_type: Some(element),
            base_generator: None,
        }
    }

    /// `schema.table.column`, used in logs and errors.
    pub fn path(&self) -> String {
        format!("{}.{}", self.schema.id, self.column)
    }

    /// Type the generator must produce.
    pub fn target_type(&self) -> Result<&TargetType, GenerationError> {
        if let Some(base_type) = &self.base_type {
            return Ok(base_type);
        }
        self.column_index
            .and_then(|idx| self.schema.columns.get(idx))
            .map(|column| &column.target_type)
            .ok_or_else(|| {
                GenerationError::InvalidSchema(format!("unknown column {}", self.path()))
            })
    }

    /// Whether the request is for the declared column rather than a derived type.
    pub fn is_declared_column(&self) -> bool {
        self.base_type.is_none()
    }

    pub fn explicit_generator(&self) -> Option<&GeneratorSettings> {
        self.settings
            .as_ref()
            .and_then(|settings| settings.generator.as_ref())
    }
}

/// Action run once, only for the winning proposal.
pub type SideEffect = Box<dyn FnOnce() -> Result<(), GenerationError> + Send>;

/// A provider's proposal.
pub struct Decision {
    pub generator: BoxedGenerator,
    pub reason: Reason,
    pub provider: &'static str,
    on_win: Option<SideEffect>,
}

impl Decision {
    pub fn new(provider: &'static str, reason: Reason, generator: BoxedGenerator) -> Self {
        Self {
            generator,
            reason,
            provider,
            on_win: None,
        }
    }

    pub fn on_win(
        mut self,
        effect: impl FnOnce() -> Result<(), GenerationError> + Send + 'static,
    ) -> Self {
        self.on_win = Some(Box::new(effect));
        self
    }
}

pub enum Acceptance {
    Accepted(Decision),
    Declined,
}

/// Shared inputs for building generators during one run.
pub struct BuildEnv {
    pub resolver: Arc<ReferenceResolver>,
    pub storage: Arc<dyn Storage>,
    pub seed: u64,
    pub sample_size: usize,
}

impl BuildEnv {
    /// Deterministic RNG for one column and purpose.
    pub fn rng(&self, request: &AcceptRequest, purpose: &str) -> ChaCha8Rng {
        let element = if request.is_declared_column() { "" } else { "[]" };
        seeded_rng(self.seed, &format!("{}{element}#{purpose}", request.path()))
    }
}

/// What a provider sees while deciding.
pub struct Scope<'a> {
    pub registry: &'a Registry,
    pub env: &'a BuildEnv,
}

/// Proposes generators for columns it recognises.
///
/// Providers must not act on a proposal themselves: anything that should
/// only happen when the proposal wins goes into [`Decision::on_win`].
pub trait GeneratorProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn accept(
        &self,
        request: &AcceptRequest,
        scope: &Scope<'_>,
    ) -> Result<Acceptance, GenerationError>;
}

/// Ordered set of providers.
pub struct Registry {
    providers: Vec<Box<dyn GeneratorProvider>>,
}

impl Registry {
    pub fn new(providers: Vec<Box<dyn GeneratorProvider>>) -> Self {
        Self { providers }
    }

    /// All built-in providers; `domains` feeds the enum provider.
    pub fn standard(domains: DomainCatalog) -> Self {
        Self::new(vec![
            Box::new(UserSettingsProvider),
            Box::new(ReferenceProvider),
            Box::new(DriverProvider::postgres()),
            Box::new(ArrayProvider::default()),
            Box::new(ColumnTypeProvider),
            Box::new(DomainProvider::new(domains)),
            Box::new(NameSuggestionProvider),
        ])
    }

    /// Pick the generator for `request`.
    ///
    /// Losing proposals are dropped without their side effects running.
    pub fn resolve(
        &self,
        request: &AcceptRequest,
        env: &BuildEnv,
    ) -> Result<BoxedGenerator, GenerationError> {
        let scope = Scope {
            registry: self,
            env,
        };
        let mut buckets: BTreeMap<Reason, Vec<Decision>> = BTreeMap::new();
        for provider in &self.providers {
            match provider.accept(request, &scope)? {
                Acceptance::Accepted(decision) => {
                    buckets.entry(decision.reason).or_default().push(decision);
                }
                Acceptance::Declined => {}
            }
        }

        let Some((reason, mut winners)) = buckets.pop_last() else {
            return Err(GenerationError::NoneAvailable {
                column: request.path(),
            });
        };
        if winners.len() > 1 {
            return Err(GenerationError::Ambiguous {
                column: request.path(),
                reason: reason.to_string(),
                providers: winners
                    .iter()
                    .map(|decision| decision.provider.to_string())
                    .collect(),
            });
        }
        let Some(decision) = winners.pop() else {
            return Err(GenerationError::NoneAvailable {
                column: request.path(),
            });
        };

        if let Some(effect) = decision.on_win {
            effect()?;
        }
        debug!(
            column = %request.path(),
            provider = decision.provider,
            reason = %reason,
            "generator selected"
        );
        Ok(decision.generator)
    }
}
