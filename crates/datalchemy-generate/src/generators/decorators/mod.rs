//! Generators that wrap another generator and reshape its output.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use datalchemy_core::Value;

use crate::adapter::SampleReader;
use crate::errors::GenerationError;
use crate::generators::{BoxedGenerator, Generator};
use crate::stopper::SizeNotifier;

/// Values kept by a reuse decorator.
pub const REUSE_SAMPLE_CAPACITY: usize = 10;
/// One draw in this many refreshes the reuse sample.
const REUSE_REFRESH_ODDS: u32 = 41;

/// Replaces a percentage of values with NULL.
pub struct NullDecorator {
    inner: BoxedGenerator,
    percentage: u8,
    rng: ChaCha8Rng,
}

impl NullDecorator {
    pub fn new(inner: BoxedGenerator, percentage: u8, rng: ChaCha8Rng) -> Self {
        Self {
            inner,
            percentage: percentage.min(100),
            rng,
        }
    }
}

#[async_trait]
impl Generator for NullDecorator {
    async fn produce(&mut self, cancel: &CancellationToken) -> Result<Value, GenerationError> {
        if self.rng.random_range(0..100) < self.percentage {
            return Ok(Value::Null);
        }
        self.inner.produce(cancel).await
    }

    async fn release(&mut self) {
        self.inner.release().await;
    }
}

/// Repeats the inner generator into an array (`rows == 1`) or a matrix.
pub struct ArrayDecorator {
    inner: BoxedGenerator,
    rows: usize,
    cols: usize,
}

impl ArrayDecorator {
    pub fn new(inner: BoxedGenerator, rows: usize, cols: usize) -> Self {
        Self { inner, rows, cols }
    }

    async fn line(&mut self, cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let mut values = Vec::with_capacity(self.cols);
        for _ in 0..self.cols {
            values.push(self.inner.produce(cancel).await?);
        }
        Ok(Value::Composite(values))
    }
}

#[async_trait]
impl Generator for ArrayDecorator {
    async fn produce(&mut self, cancel: &CancellationToken) -> Result<Value, GenerationError> {
        if self.rows == 1 {
            return self.line(cancel).await;
        }
        let mut rows = Vec::with_capacity(self.rows);
        for _ in 0..self.rows {
            rows.push(self.line(cancel).await?);
        }
        Ok(Value::Composite(rows))
    }

    async fn release(&mut self) {
        self.inner.release().await;
    }
}

/// Result of one background preparation.
enum Prepared {
    Value(Value),
    Failed(GenerationError),
    Aborted,
}

/// Prepares the next value in the background while the caller consumes the
/// current one.
///
/// At most one preparation is in flight. A preparation that completes after
/// the caller gave up waiting is kept and handed out by the next call.
pub struct AheadDecorator {
    inner: Arc<Mutex<BoxedGenerator>>,
    pending: Option<JoinHandle<Prepared>>,
    abort: CancellationToken,
}

impl AheadDecorator {
    /// Must be called inside a Tokio runtime: the first preparation starts here.
    pub fn new(inner: BoxedGenerator) -> Self {
        let mut decorator = Self {
            inner: Arc::new(Mutex::new(inner)),
            pending: None,
            abort: CancellationToken::new(),
        };
        decorator.prepare();
        decorator
    }

    fn prepare(&mut self) {
        let inner = Arc::clone(&self.inner);
        let abort = self.abort.clone();
        self.pending = Some(tokio::spawn(async move {
            let mut generator = inner.lock().await;
            tokio::select! {
                biased;
                outcome = generator.produce(&abort) => match outcome {
                    Ok(value) => Prepared::Value(value),
                    Err(GenerationError::Cancelled) => Prepared::Aborted,
                    Err(err) => Prepared::Failed(err),
                },
                _ = abort.cancelled() => Prepared::Aborted,
            }
        }));
    }
}

#[async_trait]
impl Generator for AheadDecorator {
    async fn produce(&mut self, cancel: &CancellationToken) -> Result<Value, GenerationError> {
        if self.pending.is_none() {
            self.prepare();
        }
        let Some(mut handle) = self.pending.take() else {
            return Err(GenerationError::Generator(
                "ahead preparation missing".to_string(),
            ));
        };

        // A finished preparation wins over a simultaneous cancellation.
        let prepared = tokio::select! {
            biased;
            joined = &mut handle => joined,
            _ = cancel.cancelled() => {
                self.pending = Some(handle);
                return Err(GenerationError::Cancelled);
            }
        };

        match prepared {
            Ok(Prepared::Value(value)) => {
                self.prepare();
                Ok(value)
            }
            Ok(Prepared::Failed(err)) => Err(err),
            Ok(Prepared::Aborted) => Err(GenerationError::Cancelled),
            Err(err) => Err(GenerationError::Worker(format!(
                "ahead preparation panicked: {err}"
            ))),
        }
    }

    async fn release(&mut self) {
        self.abort.cancel();
        if let Some(handle) = self.pending.take() {
            if let Ok(Prepared::Value(_)) = handle.await {
                debug!("discarding value prepared ahead");
            }
        }
        self.inner.lock().await.release().await;
    }
}

impl Drop for AheadDecorator {
    fn drop(&mut self) {
        self.abort.cancel();
    }
}

/// Replays values already stored in the column for a share of the draws.
///
/// The sample is read lazily on the first draw, refreshed now and then, and
/// fed with freshly generated values.
pub struct ReuseDecorator {
    inner: BoxedGenerator,
    reader: Arc<dyn SampleReader>,
    percentage: u8,
    sample: Vec<Value>,
    seeded: bool,
    rng: ChaCha8Rng,
}

impl ReuseDecorator {
    pub fn new(
        inner: BoxedGenerator,
        reader: Arc<dyn SampleReader>,
        percentage: u8,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            inner,
            reader,
            percentage: percentage.min(100),
            sample: Vec::with_capacity(REUSE_SAMPLE_CAPACITY),
            seeded: false,
            rng,
        }
    }

    async fn refresh(&mut self, cancel: &CancellationToken) -> Result<(), GenerationError> {
        let mut values = self.reader.read_values(cancel).await?;
        values.retain(|value| !value.is_null());
        values.truncate(REUSE_SAMPLE_CAPACITY);
        self.sample = values;
        self.seeded = true;
        Ok(())
    }

    fn remember(&mut self, value: &Value) {
        if value.is_null() || !self.rng.random_bool(0.5) {
            return;
        }
        if self.sample.len() < REUSE_SAMPLE_CAPACITY {
            self.sample.push(value.clone());
        } else {
            let slot = self.rng.random_range(0..self.sample.len());
            self.sample[slot] = value.clone();
        }
    }
}

#[async_trait]
impl Generator for ReuseDecorator {
    async fn produce(&mut self, cancel: &CancellationToken) -> Result<Value, GenerationError> {
        if self.percentage == 0 {
            return self.inner.produce(cancel).await;
        }

        if !self.seeded || self.rng.random_range(0..REUSE_REFRESH_ODDS) == 0 {
            self.refresh(cancel).await?;
        }

        if self.rng.random_range(0..100) < self.percentage {
            if let Some(value) = self.sample.choose(&mut self.rng) {
                return Ok(value.clone());
            }
            if self.percentage == 100 {
                return Err(GenerationError::Generator(
                    "reuse of 100% requested but the column has no stored values".to_string(),
                ));
            }
        }

        let value = self.inner.produce(cancel).await?;
        self.remember(&value);
        Ok(value)
    }

    async fn release(&mut self) {
        self.inner.release().await;
    }
}

/// Reports the width of every produced value, for columns whose payload
/// does not show up in the table size right away.
pub struct SizeReportingDecorator {
    inner: BoxedGenerator,
    notifier: SizeNotifier,
}

impl SizeReportingDecorator {
    pub fn new(inner: BoxedGenerator, notifier: SizeNotifier) -> Self {
        Self { inner, notifier }
    }
}

#[async_trait]
impl Generator for SizeReportingDecorator {
    async fn produce(&mut self, cancel: &CancellationToken) -> Result<Value, GenerationError> {
        let value = self.inner.produce(cancel).await?;
        self.notifier.add(value.approx_size());
        Ok(value)
    }

    async fn release(&mut self) {
        self.inner.release().await;
    }
}
