use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use datalchemy_core::{Column, DatasetSchema, Identifier, TypeKind, Value, topo_order};
use datalchemy_plan::{ColumnSettings, Limit, Plan, validate_plan_against_datasets};

use crate::acceptor::{
    AcceptRequest, Acceptance, ArrayProvider, BuildEnv, GeneratorProvider, Registry, Scope,
};
use crate::adapter::SchemaProvider;
use crate::errors::GenerationError;
use crate::generators::BoxedGenerator;
use crate::generators::decorators::{
    AheadDecorator, NullDecorator, REUSE_SAMPLE_CAPACITY, ReuseDecorator, SizeReportingDecorator,
};
use crate::stopper::SizeNotifier;

/// One generator slot per column; `None` leaves the column to the database.
pub struct TaskGenerators {
    columns: Vec<Option<BoxedGenerator>>,
}

impl TaskGenerators {
    pub fn new(columns: Vec<Option<BoxedGenerator>>) -> Self {
        Self { columns }
    }

    /// Positions the database fills.
    pub fn excluded(&self) -> BTreeSet<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.is_none().then_some(idx))
            .collect()
    }

    /// True when every column is left to database defaults.
    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(Option::is_none)
    }

    /// Produce a full-width row; excluded positions hold NULL placeholders.
    pub async fn next_row(
        &mut self,
        schema: &DatasetSchema,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, GenerationError> {
        let mut row = Vec::with_capacity(self.columns.len());
        for (idx, slot) in self.columns.iter_mut().enumerate() {
            let value = match slot {
                Some(generator) => generator.produce(cancel).await.map_err(|err| {
                    let column = schema
                        .columns
                        .get(idx)
                        .map_or("?", |column| column.name.as_str());
                    err.in_column(format!("{}.{column}", schema.id))
                })?,
                None => Value::Null,
            };
            row.push(value);
        }
        Ok(row)
    }

    pub async fn release(&mut self) {
        for generator in self.columns.iter_mut().flatten() {
            generator.release().await;
        }
    }
}

/// Work unit for one target table.
pub struct Task {
    pub schema: Arc<DatasetSchema>,
    pub limit: Limit,
    pub generators: TaskGenerators,
    /// Out-of-row payload counter for byte-limited tasks.
    pub size: Option<SizeNotifier>,
}

/// Turns a plan into ordered tasks: binds a generator to every column,
/// registers references and orders tables parents first.
pub struct TaskBuilder {
    schemas: Arc<dyn SchemaProvider>,
    registry: Registry,
    env: BuildEnv,
}

impl TaskBuilder {
    pub fn new(schemas: Arc<dyn SchemaProvider>, registry: Registry, env: BuildEnv) -> Self {
        Self {
            schemas,
            registry,
            env,
        }
    }

    /// Build every task, then seal the resolver.
    ///
    /// Fails on unknown tables or columns, unresolvable columns and
    /// dependency cycles; no task runs in that case.
    pub async fn build(&self, plan: &Plan) -> Result<Vec<Task>, GenerationError> {
        let mut datasets = Vec::with_capacity(plan.targets.len());
        for target in &plan.targets {
            let id = self.schemas.target_identifier(target);
            let schema = self.schemas.data_source(&id).await?;
            datasets.push((target, Arc::new(schema)));
        }

        let plain: Vec<DatasetSchema> = datasets
            .iter()
            .map(|(_, schema)| schema.as_ref().clone())
            .collect();
        let report = validate_plan_against_datasets(plan, &plain);
        for warning in &report.warnings {
            warn!(code = %warning.code, path = %warning.path, "{}", warning.message);
        }
        if !report.is_ok() {
            let summary: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
            return Err(GenerationError::InvalidPlan(summary.join("; ")));
        }

        let overrides: HashMap<(Identifier, String), &ColumnSettings> = plan
            .columns
            .iter()
            .map(|settings| (self.schemas.column_identifier(settings), settings))
            .collect();

        let mut tasks = Vec::with_capacity(datasets.len());
        for (target, schema) in datasets {
            self.env.resolver.add_table(&schema.id)?;
            let size = matches!(target.limit, Limit::Bytes(_)).then(SizeNotifier::default);

            let mut columns = Vec::with_capacity(schema.columns.len());
            for column in &schema.columns {
                let key = (schema.id.clone(), column.name.clone());
                let settings = overrides.get(&key).copied();
                columns.push(self.bind_column(&schema, column, settings, size.as_ref())?);
            }

            let generators = TaskGenerators::new(columns);
            info!(
                table = %schema.id,
                generated = schema.columns.len() - generators.excluded().len(),
                defaulted = generators.excluded().len(),
                "task built"
            );
            tasks.push(Task {
                schema,
                limit: target.limit,
                generators,
                size,
            });
        }

        self.env.resolver.seal();
        let order = topo_order(&self.env.resolver.dependencies()).map_err(|members| {
            GenerationError::Cycle(members.iter().map(ToString::to_string).collect())
        })?;
        let position: HashMap<&Identifier, usize> =
            order.iter().enumerate().map(|(idx, id)| (id, idx)).collect();
        tasks.sort_by_key(|task| position.get(&task.schema.id).copied().unwrap_or(usize::MAX));
        Ok(tasks)
    }

    fn bind_column(
        &self,
        schema: &Arc<DatasetSchema>,
        column: &Column,
        settings: Option<&ColumnSettings>,
        size: Option<&SizeNotifier>,
    ) -> Result<Option<BoxedGenerator>, GenerationError> {
        let target_type = &column.target_type;
        if settings.is_none() && target_type.has_database_default() {
            debug!(table = %schema.id, column = %column.name, "left to database default");
            return Ok(None);
        }

        let request =
            AcceptRequest::new(Arc::clone(schema), &column.name).with_settings(settings.cloned());
        let path = request.path();
        let mut generator = self
            .registry
            .resolve(&request, &self.env)
            .map_err(|err| match err {
                GenerationError::NoneAvailable { .. } | GenerationError::Ambiguous { .. } => err,
                other => other.in_column(&path),
            })?;

        if let Some(settings) = settings {
            let explicit = settings.generator.is_some();
            let is_array = target_type.kind == TypeKind::Array;
            // Array columns without an explicit generator are shaped by their provider.
            if (explicit && is_array) || (!is_array && settings.array.is_some()) {
                generator = self.shape_array(request.clone().with_base_generator(generator))?;
            }

            if let Some(percentage) = settings.reuse_percentage.filter(|p| *p > 0) {
                let reader = self.env.storage.sample_reader(
                    &schema.id,
                    &column.name,
                    REUSE_SAMPLE_CAPACITY,
                );
                generator = Box::new(ReuseDecorator::new(
                    generator,
                    reader,
                    percentage,
                    self.env.rng(&request, "reuse"),
                ));
            }

            if let Some(percentage) = settings.null_percentage.filter(|p| *p > 0) {
                if !target_type.nullable {
                    return Err(GenerationError::InvalidPlan(format!(
                        "null_percentage set on NOT NULL column {path}"
                    )));
                }
                generator = Box::new(NullDecorator::new(
                    generator,
                    percentage,
                    self.env.rng(&request, "null"),
                ));
            }
        }

        if target_type.out_of_row {
            if let Some(notifier) = size {
                generator = Box::new(SizeReportingDecorator::new(generator, notifier.clone()));
            }
        }

        if settings.is_some_and(|settings| settings.ahead) {
            generator = Box::new(AheadDecorator::new(generator));
        }

        Ok(Some(generator))
    }

    /// Repeat the request's base generator into the column's array shape.
    fn shape_array(&self, request: AcceptRequest) -> Result<BoxedGenerator, GenerationError> {
        let scope = Scope {
            registry: &self.registry,
            env: &self.env,
        };
        match ArrayProvider::default().accept(&request, &scope)? {
            Acceptance::Accepted(decision) => Ok(decision.generator),
            Acceptance::Declined => Err(GenerationError::Generator(format!(
                "cannot shape {} as an array",
                request.path()
            ))),
        }
    }
}
