//! Decide when a table has received enough data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::{SaveReport, TableSizer};
use crate::errors::GenerationError;

/// Consulted after every save.
#[async_trait]
pub trait Stopper: Send {
    /// Account for `report` and say whether another batch may run.
    fn continue_allowed(&mut self, report: &SaveReport) -> Result<bool, GenerationError>;

    /// Rows still wanted, when the stopper counts rows.
    fn remaining_rows(&self) -> Option<u64> {
        None
    }

    /// Stop background work. Idempotent.
    async fn close(&mut self) {}
}

/// Stops once a fixed number of rows has been committed.
#[derive(Debug)]
pub struct RowStopper {
    remaining: u64,
}

impl RowStopper {
    pub fn new(rows: u64) -> Self {
        Self { remaining: rows }
    }
}

#[async_trait]
impl Stopper for RowStopper {
    fn continue_allowed(&mut self, report: &SaveReport) -> Result<bool, GenerationError> {
        self.remaining = self.remaining.saturating_sub(report.rows);
        Ok(self.remaining > 0)
    }

    fn remaining_rows(&self) -> Option<u64> {
        Some(self.remaining)
    }
}

/// Running total of out-of-row payload produced for one table.
#[derive(Debug, Clone, Default)]
pub struct SizeNotifier {
    total: Arc<AtomicU64>,
}

impl SizeNotifier {
    pub fn add(&self, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct PollState {
    /// Size measured by the last successful poll.
    measured: u64,
    /// Bytes committed since that poll.
    since_poll: u64,
    /// First poll failure; replayed on every later check.
    failure: Option<GenerationError>,
}

/// Stops once the table grew by roughly `limit` bytes.
///
/// Growth is the polled table size plus bytes committed since the last poll
/// plus out-of-row payload, minus the size seen at start.
pub struct SizeStopper {
    limit: u64,
    baseline: u64,
    state: Arc<Mutex<PollState>>,
    notifier: SizeNotifier,
    shutdown: CancellationToken,
    poller: Option<JoinHandle<()>>,
}

impl SizeStopper {
    /// Measure the baseline and start polling every `interval`.
    pub async fn start(
        sizer: Arc<dyn TableSizer>,
        notifier: SizeNotifier,
        limit: u64,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, GenerationError> {
        let baseline = sizer.table_size(cancel).await?;
        let state = Arc::new(Mutex::new(PollState {
            measured: baseline,
            ..PollState::default()
        }));
        let shutdown = cancel.child_token();
        let poller = tokio::spawn(poll_size(
            sizer,
            Arc::clone(&state),
            interval,
            shutdown.clone(),
        ));

        debug!(baseline, limit, "size stopper started");
        Ok(Self {
            limit,
            baseline,
            state,
            notifier,
            shutdown,
            poller: Some(poller),
        })
    }

    /// Bytes attributed to this run so far.
    pub fn generated(&self) -> Result<u64, GenerationError> {
        let state = lock(&self.state);
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        Ok((state.measured + state.since_poll + self.notifier.total()).saturating_sub(self.baseline))
    }
}

#[async_trait]
impl Stopper for SizeStopper {
    fn continue_allowed(&mut self, report: &SaveReport) -> Result<bool, GenerationError> {
        lock(&self.state).since_poll += report.bytes;
        let generated = self.generated()?;
        Ok(generated < self.limit)
    }

    async fn close(&mut self) {
        self.shutdown.cancel();
        if let Some(poller) = self.poller.take() {
            if let Err(err) = poller.await {
                warn!(error = %err, "size poller ended abnormally");
            }
        }
    }
}

impl Drop for SizeStopper {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn poll_size(
    sizer: Arc<dyn TableSizer>,
    state: Arc<Mutex<PollState>>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match sizer.table_size(&shutdown).await {
            Ok(size) => {
                let mut state = lock(&state);
                state.measured = size;
                state.since_poll = 0;
            }
            Err(GenerationError::Cancelled) => break,
            Err(err) => {
                warn!(error = %err, "table size poll failed");
                lock(&state).failure = Some(err);
                break;
            }
        }
    }
}

fn lock(state: &Mutex<PollState>) -> MutexGuard<'_, PollState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
