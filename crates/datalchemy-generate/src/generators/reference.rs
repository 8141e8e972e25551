//! Foreign-key values taken from rows the parent table actually holds.
//!
//! Values arrive two ways: pushed from parent batches right after they are
//! committed, and pulled by sampling the parent column when the queue runs dry.
//! Both feed one bounded queue and never block; surplus values are dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use datalchemy_core::{Identifier, Value};

use crate::adapter::{SampleReader, SaveBatch};
use crate::errors::GenerationError;
use crate::generators::Generator;

/// Capacity of each reference queue.
pub const REFERENCE_BUFFER: usize = 100;
/// Pause before sampling again when the parent had no rows.
pub const REFERENCE_RETRY: Duration = Duration::from_millis(200);

/// Delivers committed parent values into one reference queue.
#[derive(Debug, Clone)]
pub struct Subscription {
    parent_column: String,
    sender: mpsc::Sender<Value>,
}

impl Subscription {
    /// Offer every committed, non-null value of the parent column.
    /// Returns how many were queued.
    pub fn deliver(&self, batch: &SaveBatch) -> usize {
        let Some(column) = batch.schema.column_index(&self.parent_column) else {
            return 0;
        };
        if batch.excluded.contains(&column) {
            return 0;
        }

        let mut queued = 0;
        for value in batch.committed_values(column) {
            if value.is_null() {
                continue;
            }
            match self.sender.try_send(value.clone()) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => break,
            }
        }
        queued
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Produces values of a parent column for a child column.
pub struct BufferedReference {
    parent: Identifier,
    column: String,
    queue: mpsc::Receiver<Value>,
    stage: mpsc::Sender<Value>,
    reader: Arc<dyn SampleReader>,
    retry: Duration,
}

impl BufferedReference {
    /// Create the generator and the subscription that feeds it.
    pub fn new(
        parent: Identifier,
        column: impl Into<String>,
        reader: Arc<dyn SampleReader>,
    ) -> (Self, Subscription) {
        let column = column.into();
        let (sender, queue) = mpsc::channel(REFERENCE_BUFFER);
        let subscription = Subscription {
            parent_column: column.clone(),
            sender: sender.clone(),
        };
        let generator = Self {
            parent,
            column,
            queue,
            stage: sender,
            reader,
            retry: REFERENCE_RETRY,
        };
        (generator, subscription)
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    /// Sample the parent column and stage what fits into the queue.
    async fn refill(&mut self, cancel: &CancellationToken) -> Result<usize, GenerationError> {
        let sample = tokio::select! {
            sample = self.reader.read_values(cancel) => sample?,
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
        };
        let mut staged = 0;
        for value in sample.into_iter().filter(|value| !value.is_null()) {
            if self.stage.try_send(value).is_err() {
                break;
            }
            staged += 1;
        }
        trace!(parent = %self.parent, column = %self.column, staged, "reference sample staged");
        Ok(staged)
    }
}

#[async_trait]
impl Generator for BufferedReference {
    async fn produce(&mut self, cancel: &CancellationToken) -> Result<Value, GenerationError> {
        loop {
            match self.queue.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    return Err(GenerationError::Generator(format!(
                        "reference queue for {}.{} closed",
                        self.parent, self.column
                    )));
                }
            }

            if self.refill(cancel).await? > 0 {
                continue;
            }

            debug!(parent = %self.parent, column = %self.column, "parent has no rows yet; waiting");
            tokio::select! {
                value = self.queue.recv() => {
                    if let Some(value) = value {
                        return Ok(value);
                    }
                }
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                _ = tokio::time::sleep(self.retry) => {}
            }
        }
    }

    async fn release(&mut self) {
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use super::*;
    use datalchemy_core::{Column, DatasetSchema, TargetType, TypeKind};

    /// Serves queued samples, then empty ones.
    struct ScriptedSample {
        samples: Mutex<Vec<Vec<Value>>>,
    }

    #[async_trait]
    impl SampleReader for ScriptedSample {
        async fn read_values(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Value>, GenerationError> {
            let mut samples = self.samples.lock().unwrap();
            Ok(if samples.is_empty() {
                Vec::new()
            } else {
                samples.remove(0)
            })
        }
    }

    fn reader(samples: Vec<Vec<Value>>) -> Arc<dyn SampleReader> {
        Arc::new(ScriptedSample {
            samples: Mutex::new(samples),
        })
    }

    fn parent_batch(ids: &[i64]) -> SaveBatch {
        let schema = Arc::new(DatasetSchema::new(
            Identifier::new("public", "base"),
            vec![Column::new("id", TargetType::new(TypeKind::Int, "integer"))],
        ));
        let mut batch = SaveBatch::new(schema, BTreeSet::new(), ids.len());
        for id in ids {
            batch.push(vec![Value::Int64(*id)]);
        }
        batch
    }

    #[tokio::test]
    async fn pushed_values_come_first_and_rejected_rows_are_skipped() {
        let (mut generator, subscription) =
            BufferedReference::new(Identifier::new("public", "base"), "id", reader(Vec::new()));
        let mut batch = parent_batch(&[1, 2, 3]);
        batch.valid[1] = false;
        assert_eq!(subscription.deliver(&batch), 2);

        let cancel = CancellationToken::new();
        assert_eq!(generator.produce(&cancel).await.unwrap(), Value::Int64(1));
        assert_eq!(generator.produce(&cancel).await.unwrap(), Value::Int64(3));
    }

    #[tokio::test]
    async fn delivery_drops_values_beyond_capacity() {
        let (_generator, subscription) =
            BufferedReference::new(Identifier::new("public", "base"), "id", reader(Vec::new()));
        let ids: Vec<i64> = (0..(REFERENCE_BUFFER as i64 + 20)).collect();
        assert_eq!(subscription.deliver(&parent_batch(&ids)), REFERENCE_BUFFER);
    }

    #[tokio::test]
    async fn falls_back_to_sampling_when_queue_is_empty() {
        let sampled = vec![Value::Null, Value::Int64(40), Value::Int64(41)];
        let (mut generator, _subscription) =
            BufferedReference::new(Identifier::new("public", "base"), "id", reader(vec![sampled]));
        let cancel = CancellationToken::new();
        assert_eq!(generator.produce(&cancel).await.unwrap(), Value::Int64(40));
        assert_eq!(generator.produce(&cancel).await.unwrap(), Value::Int64(41));
    }

    #[tokio::test]
    async fn waits_for_push_until_cancelled() {
        let (generator, _subscription) =
            BufferedReference::new(Identifier::new("public", "base"), "id", reader(Vec::new()));
        let mut generator = generator.with_retry(Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        assert_eq!(
            generator.produce(&cancel).await,
            Err(GenerationError::Cancelled)
        );
    }
}
