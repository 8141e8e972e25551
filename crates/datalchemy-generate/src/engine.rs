use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use datalchemy_core::Identifier;
use datalchemy_plan::{Limit, Plan, RunOptions};

use crate::acceptor::{BuildEnv, Registry};
use crate::adapter::{SaveBatch, Saver, SchemaProvider, Storage};
use crate::errors::GenerationError;
use crate::model::{RunReport, TableReport, TaskProgress};
use crate::planner::{Task, TaskBuilder};
use crate::resolver::ReferenceResolver;
use crate::stopper::{RowStopper, SizeNotifier, SizeStopper, Stopper};

/// Consecutive batches without a single stored row before a table is given up.
const MAX_IDLE_BATCHES: u32 = 10;

/// Entry point for filling a database from a plan.
#[derive(Clone)]
pub struct GenerationEngine {
    schemas: Arc<dyn SchemaProvider>,
    storage: Arc<dyn Storage>,
}

impl GenerationEngine {
    pub fn new(schemas: Arc<dyn SchemaProvider>, storage: Arc<dyn Storage>) -> Self {
        Self { schemas, storage }
    }

    /// Build all tasks, then run them on `plan.run.workers` workers.
    ///
    /// The first failing table cancels the whole run.
    pub async fn run(
        &self,
        plan: &Plan,
        cancel: CancellationToken,
    ) -> Result<RunReport, GenerationError> {
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let seed = plan.run.seed.unwrap_or_else(rand::random);
        info!(
            run_id = %run_id,
            targets = plan.targets.len(),
            workers = plan.run.workers,
            batch_size = plan.run.batch_size,
            seed,
            "generation started"
        );

        let resolver = Arc::new(ReferenceResolver::new());
        let registry = Registry::standard(self.schemas.domains().await?);
        let env = BuildEnv {
            resolver: Arc::clone(&resolver),
            storage: Arc::clone(&self.storage),
            seed,
            sample_size: plan.run.sample_size,
        };
        let builder = TaskBuilder::new(Arc::clone(&self.schemas), registry, env);
        let tasks = match builder.build(plan).await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "generation plan rejected");
                return Err(err);
            }
        };

        let manager = WorkManager::new(plan.run.clone(), Arc::clone(&self.storage), resolver);
        let mut report = RunReport::new(run_id.clone(), seed, plan.run.workers);
        match manager.execute(tasks, &cancel).await {
            Ok(tables) => {
                for table in tables {
                    report.push(table);
                }
                report.duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    run_id = %run_id,
                    tables = report.tables.len(),
                    rows = report.rows_total,
                    bytes = report.bytes_total,
                    rejected = report.rejected_total,
                    duration_ms = report.duration_ms,
                    "generation completed"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "generation failed");
                Err(err)
            }
        }
    }
}

/// Runs tasks on a fixed pool of workers, in the order given.
pub struct WorkManager {
    executor: Arc<BatchExecutor>,
    workers: usize,
}

impl WorkManager {
    pub fn new(
        options: RunOptions,
        storage: Arc<dyn Storage>,
        resolver: Arc<ReferenceResolver>,
    ) -> Self {
        let workers = options.workers.max(1);
        Self {
            executor: Arc::new(BatchExecutor {
                saver: storage.saver(),
                storage,
                resolver,
                options,
            }),
            workers,
        }
    }

    /// Hand tasks out one at a time; a worker takes the next task when idle.
    pub async fn execute(
        &self,
        tasks: Vec<Task>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableReport>, GenerationError> {
        let run = cancel.child_token();
        let (sender, receiver) = mpsc::channel::<Task>(1);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            let executor = Arc::clone(&self.executor);
            let receiver = Arc::clone(&receiver);
            let run = run.clone();
            workers.spawn(async move {
                let mut reports = Vec::new();
                loop {
                    let next = {
                        let mut receiver = receiver.lock().await;
                        tokio::select! {
                            task = receiver.recv() => task,
                            _ = run.cancelled() => None,
                        }
                    };
                    let Some(task) = next else {
                        break;
                    };
                    debug!(worker, table = %task.schema.id, "task picked up");
                    match executor.run_task(task, &run).await {
                        Ok(report) => reports.push(report),
                        Err(err) => {
                            run.cancel();
                            return Err(err);
                        }
                    }
                }
                Ok(reports)
            });
        }

        for task in tasks {
            tokio::select! {
                sent = sender.send(task) => {
                    if sent.is_err() {
                        break;
                    }
                }
                _ = run.cancelled() => break,
            }
        }
        drop(sender);

        let mut tables = Vec::new();
        let mut failure: Option<GenerationError> = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.unwrap_or_else(|err| {
                run.cancel();
                Err(GenerationError::Worker(err.to_string()))
            });
            match outcome {
                Ok(reports) => tables.extend(reports),
                // Keep the root cause, not the cancellations it triggered.
                Err(err) => match &failure {
                    Some(existing) if !existing.is_cancelled() => {}
                    _ => failure = Some(err),
                },
            }
        }

        let mut receiver = receiver.lock().await;
        while let Ok(mut task) = receiver.try_recv() {
            task.generators.release().await;
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        Ok(tables)
    }
}

/// Fills one table batch by batch until its stopper says enough.
struct BatchExecutor {
    saver: Arc<dyn Saver>,
    storage: Arc<dyn Storage>,
    resolver: Arc<ReferenceResolver>,
    options: RunOptions,
}

impl BatchExecutor {
    async fn run_task(
        &self,
        mut task: Task,
        cancel: &CancellationToken,
    ) -> Result<TableReport, GenerationError> {
        let started = Instant::now();
        info!(table = %task.schema.id, limit = ?task.limit, "generating table");

        let stopper = self
            .stopper(task.limit, task.schema.id.clone(), task.size.clone(), cancel)
            .await;
        let outcome = match stopper {
            Ok(mut stopper) => {
                let filled = self.fill(&mut task, stopper.as_mut(), cancel).await;
                stopper.close().await;
                filled
            }
            Err(err) => Err(err),
        };
        task.generators.release().await;

        let progress = outcome.inspect_err(|err| {
            if !err.is_cancelled() {
                warn!(table = %task.schema.id, error = %err, "table failed");
            }
        })?;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            table = %task.schema.id,
            rows = progress.rows,
            bytes = progress.bytes,
            rejected = progress.rejected,
            batches = progress.batches,
            duration_ms,
            "table generated"
        );
        Ok(TableReport {
            schema: task.schema.id.schema.clone(),
            table: task.schema.id.name.clone(),
            limit: task.limit,
            rows_committed: progress.rows,
            bytes_committed: progress.bytes,
            rows_rejected: progress.rejected,
            batches: progress.batches,
            duration_ms,
        })
    }

    // Owned fields only: a `&Task` is not `Send`, its generators are not `Sync`.
    async fn stopper(
        &self,
        limit: Limit,
        table: Identifier,
        size: Option<SizeNotifier>,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Stopper>, GenerationError> {
        match limit {
            Limit::Rows(rows) => Ok(Box::new(RowStopper::new(rows))),
            Limit::Bytes(bytes) => {
                let stopper = SizeStopper::start(
                    self.storage.table_sizer(&table),
                    size.unwrap_or_default(),
                    bytes,
                    Duration::from_millis(self.options.size_poll_interval_ms),
                    cancel,
                )
                .await?;
                Ok(Box::new(stopper))
            }
        }
    }

    async fn fill(
        &self,
        task: &mut Task,
        stopper: &mut dyn Stopper,
        cancel: &CancellationToken,
    ) -> Result<TaskProgress, GenerationError> {
        let excluded = task.generators.excluded();
        let defaults_only = task.generators.is_empty();
        let mut progress = TaskProgress::default();
        let mut idle = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            // The last batch of a row-limited table is trimmed to what is left.
            let size = stopper.remaining_rows().map_or(self.options.batch_size, |remaining| {
                remaining.min(self.options.batch_size as u64) as usize
            });
            if size == 0 {
                break;
            }

            let report = if defaults_only {
                self.saver
                    .save_all_default_values(&task.schema, size)
                    .await?
            } else {
                let mut batch = SaveBatch::new(Arc::clone(&task.schema), excluded.clone(), size);
                for _ in 0..size {
                    batch.push(task.generators.next_row(&task.schema, cancel).await?);
                }
                let report = self.saver.save(&mut batch).await?;
                self.resolver.on_committed(&batch);
                report
            };
            progress.record(&report);
            debug!(
                table = %task.schema.id,
                rows = report.rows,
                rejected = report.constraint_violations,
                "batch saved"
            );

            idle = if report.rows == 0 { idle + 1 } else { 0 };
            if idle >= MAX_IDLE_BATCHES {
                return Err(GenerationError::Generator(format!(
                    "{} rejected every row of {MAX_IDLE_BATCHES} consecutive batches",
                    task.schema.id
                )));
            }

            if !stopper.continue_allowed(&report)? {
                break;
            }
        }
        Ok(progress)
    }
}
