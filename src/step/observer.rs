use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{PipelineError, Severity};

use super::StepReport;

/// Identifies the step a callback is about.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Step name given to the builder.
    pub step: String,
    /// Description of the input resource.
    pub resource: String,
}

/// Events emitted by a chunk step, in run order.
#[derive(Debug, Clone)]
pub enum StepEvent {
    RunStarted,
    ChunkFlushed {
        /// 0-based chunk index within the run.
        index: usize,
        items: usize,
    },
    ItemSkipped {
        line: usize,
        reason: String,
    },
    RunFinished {
        report: StepReport,
    },
}

/// Observer interface for step progress and outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait StepObserver: Send + Sync {
    /// Called for each progress event.
    fn on_event(&self, _ctx: &StepContext, _event: &StepEvent) {}

    /// Called when the run aborts.
    fn on_failure(&self, _ctx: &StepContext, _severity: Severity, _error: &PipelineError) {}

    /// Called when an abort meets the step's alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &StepContext, severity: Severity, error: &PipelineError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn StepObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn StepObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl StepObserver for CompositeObserver {
    fn on_event(&self, ctx: &StepContext, event: &StepEvent) {
        for o in &self.observers {
            o.on_event(ctx, event);
        }
    }

    fn on_failure(&self, ctx: &StepContext, severity: Severity, error: &PipelineError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &StepContext, severity: Severity, error: &PipelineError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Forwards step events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl StepObserver for TracingObserver {
    fn on_event(&self, ctx: &StepContext, event: &StepEvent) {
        match event {
            StepEvent::RunStarted => {
                info!(step = %ctx.step, resource = %ctx.resource, "step started")
            }
            StepEvent::ChunkFlushed { index, items } => {
                info!(step = %ctx.step, chunk = index, items, "chunk flushed")
            }
            StepEvent::ItemSkipped { line, reason } => {
                warn!(step = %ctx.step, line, %reason, "item skipped")
            }
            StepEvent::RunFinished { report } => info!(step = %ctx.step, %report, "step finished"),
        }
    }

    fn on_failure(&self, ctx: &StepContext, severity: Severity, error: &PipelineError) {
        error!(step = %ctx.step, resource = %ctx.resource, ?severity, %error, "step failed");
    }

    fn on_alert(&self, ctx: &StepContext, severity: Severity, error: &PipelineError) {
        error!(
            step = %ctx.step,
            resource = %ctx.resource,
            ?severity,
            %error,
            alert = true,
            "step failed"
        );
    }
}

/// Live counters for the current run of a step.
///
/// The step updates these while it runs; callers holding the `Arc` can snapshot them from
/// another thread at any time.
pub struct StepMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,
    rows_read: AtomicU64,
    items_written: AtomicU64,
    items_skipped: AtomicU64,
    chunks_flushed: AtomicU64,
}

impl StepMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            rows_read: AtomicU64::new(0),
            items_written: AtomicU64::new(0),
            items_skipped: AtomicU64::new(0),
            chunks_flushed: AtomicU64::new(0),
        }
    }

    pub(crate) fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.rows_read.store(0, Ordering::SeqCst);
        self.items_written.store(0, Ordering::SeqCst);
        self.items_skipped.store(0, Ordering::SeqCst);
        self.chunks_flushed.store(0, Ordering::SeqCst);
    }

    pub(crate) fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub(crate) fn on_row_read(&self) {
        let _ = self.rows_read.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_item_skipped(&self) {
        let _ = self.items_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_chunk_flushed(&self, items: usize) {
        let _ = self.chunks_flushed.fetch_add(1, Ordering::SeqCst);
        let _ = self.items_written.fetch_add(items as u64, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StepMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        StepMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed,
            rows_read: self.rows_read.load(Ordering::SeqCst),
            items_written: self.items_written.load(Ordering::SeqCst),
            items_skipped: self.items_skipped.load(Ordering::SeqCst),
            chunks_flushed: self.chunks_flushed.load(Ordering::SeqCst),
        }
    }
}

impl Default for StepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StepMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StepMetrics").field(&self.snapshot()).finish()
    }
}

/// Immutable snapshot of [`StepMetrics`]. `elapsed` is `None` while a run is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub rows_read: u64,
    pub items_written: u64,
    pub items_skipped: u64,
    pub chunks_flushed: u64,
}

impl fmt::Display for StepMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, rows_read={}, items_written={}, items_skipped={}, chunks={}, elapsed={:?}",
            self.run_id,
            self.rows_read,
            self.items_written,
            self.items_skipped,
            self.chunks_flushed,
            self.elapsed
        )
    }
}
