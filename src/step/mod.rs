//! Chunk-oriented step: read → map → transform → batch write.
//!
//! A [`ChunkStep`] pulls rows from a [`RecordReader`], maps each through a [`FieldMapper`],
//! transforms it with an [`ItemProcessor`] and accumulates the results in a chunk of
//! `chunk_size` items. Full chunks are handed to the [`ItemWriter`] as one unit; the last,
//! partial chunk is flushed when the input ends.
//!
//! Reading, transforming and writing never overlap within a run, so a flushed chunk is the
//! durability boundary: when a run aborts, every earlier chunk stays committed and only the
//! unflushed tail is lost. The reader is closed on every exit path.
//!
//! ```rust
//! use rust_batch_pipeline::mapper::RecordMapper;
//! use rust_batch_pipeline::reader::{RecordReaderBuilder, Resource};
//! use rust_batch_pipeline::step::{ChunkStepBuilder, InMemoryWriter, StepOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reader = RecordReaderBuilder::new()
//!     .resource(Resource::from_bytes("1,Doe,John\r\n2,Smith,Jane\r\n"))
//!     .header(["person_id", "lastname", "firstname"])
//!     .build()?;
//! let sink = InMemoryWriter::<rust_batch_pipeline::types::Record>::new();
//!
//! let mut step = ChunkStepBuilder::new("import_people")
//!     .reader(reader)
//!     .mapper(RecordMapper)
//!     .writer(sink.clone())
//!     .options(StepOptions { chunk_size: 10, ..Default::default() })
//!     .build()?;
//!
//! let report = step.run()?;
//! assert_eq!((report.rows_read, report.items_written), (2, 2));
//! assert_eq!(sink.flush_count(), 1);
//! # Ok(())
//! # }
//! ```

mod observer;
mod processor;
mod writer;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{BoxError, PipelineError, PipelineResult, Severity, StepFailure};
use crate::mapper::FieldMapper;
use crate::reader::RecordReader;

pub use observer::{
    CompositeObserver, StepContext, StepEvent, StepMetrics, StepMetricsSnapshot, StepObserver,
    TracingObserver,
};
pub use processor::{ItemProcessor, PassThroughProcessor, TransformFailurePolicy};
pub use writer::{InMemoryWriter, ItemWriter, LoggingWriter};

/// Configuration for a [`ChunkStep`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepOptions {
    /// Items per flushed chunk (the commit interval). Must be > 0.
    pub chunk_size: usize,
    /// Handling of processor failures.
    pub transform_failure: TransformFailurePolicy,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            transform_failure: TransformFailurePolicy::Abort,
        }
    }
}

/// Where a step is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Idle,
    Reading,
    Transforming,
    Accumulating,
    Flushing,
    Draining,
    Done,
    Failed,
}

/// Progress counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Rows yielded by the reader (skipped leading lines excluded).
    pub rows_read: usize,
    /// Items accepted by the writer.
    pub items_written: usize,
    /// Items dropped under [`TransformFailurePolicy::Skip`].
    pub items_skipped: usize,
    /// Successful `write` calls.
    pub chunks_flushed: usize,
    /// Reader line counter at the end of the run (skipped leading lines included).
    pub lines_read: usize,
    pub elapsed: Duration,
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read={}, written={}, skipped={}, chunks={}, lines={}, elapsed={:?}",
            self.rows_read,
            self.items_written,
            self.items_skipped,
            self.chunks_flushed,
            self.lines_read,
            self.elapsed
        )
    }
}

/// Builder for [`ChunkStep`].
///
/// The reader, mapper and writer are required; [`ChunkStepBuilder::build`] reports a missing
/// one as [`PipelineError::Config`] before any I/O happens. Without a processor, items pass
/// through unchanged.
pub struct ChunkStepBuilder<M, P, W> {
    name: String,
    reader: Option<RecordReader>,
    mapper: Option<M>,
    processor: P,
    writer: Option<W>,
    options: StepOptions,
    observer: Option<Arc<dyn StepObserver>>,
    alert_at_or_above: Severity,
}

impl<M, W> ChunkStepBuilder<M, PassThroughProcessor, W> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reader: None,
            mapper: None,
            processor: PassThroughProcessor,
            writer: None,
            options: StepOptions::default(),
            observer: None,
            alert_at_or_above: Severity::Critical,
        }
    }
}

impl<M, P, W> ChunkStepBuilder<M, P, W> {
    pub fn reader(mut self, reader: RecordReader) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn mapper(mut self, mapper: M) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn processor<P2>(self, processor: P2) -> ChunkStepBuilder<M, P2, W> {
        ChunkStepBuilder {
            name: self.name,
            reader: self.reader,
            mapper: self.mapper,
            processor,
            writer: self.writer,
            options: self.options,
            observer: self.observer,
            alert_at_or_above: self.alert_at_or_above,
        }
    }

    pub fn writer(mut self, writer: W) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.options.chunk_size = chunk_size;
        self
    }

    pub fn transform_failure(mut self, policy: TransformFailurePolicy) -> Self {
        self.options.transform_failure = policy;
        self
    }

    /// Attach an observer for progress events and failures.
    pub fn observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Severity at or above which a failure is also reported through `on_alert`.
    pub fn alert_at_or_above(mut self, severity: Severity) -> Self {
        self.alert_at_or_above = severity;
        self
    }

    pub fn build(self) -> PipelineResult<ChunkStep<M, P, W>> {
        let reader = self
            .reader
            .ok_or_else(|| PipelineError::config("record reader is required"))?;
        let mapper = self
            .mapper
            .ok_or_else(|| PipelineError::config("field mapper is required"))?;
        let writer = self
            .writer
            .ok_or_else(|| PipelineError::config("item writer is required"))?;
        if self.options.chunk_size == 0 {
            return Err(PipelineError::config("chunk_size must be > 0"));
        }

        let ctx = StepContext {
            step: self.name,
            resource: reader.resource().description(),
        };
        Ok(ChunkStep {
            ctx,
            reader,
            mapper,
            processor: self.processor,
            writer,
            options: self.options,
            observer: self.observer,
            alert_at_or_above: self.alert_at_or_above,
            metrics: Arc::new(StepMetrics::new()),
            state: StepState::Idle,
        })
    }
}

/// A wired read → map → transform → write pipeline over one resource.
pub struct ChunkStep<M, P, W> {
    ctx: StepContext,
    reader: RecordReader,
    mapper: M,
    processor: P,
    writer: W,
    options: StepOptions,
    observer: Option<Arc<dyn StepObserver>>,
    alert_at_or_above: Severity,
    metrics: Arc<StepMetrics>,
    state: StepState,
}

impl<M, P, W> ChunkStep<M, P, W> {
    pub fn name(&self) -> &str {
        &self.ctx.step
    }

    pub fn options(&self) -> &StepOptions {
        &self.options
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Get a handle to real-time step metrics.
    pub fn metrics(&self) -> Arc<StepMetrics> {
        Arc::clone(&self.metrics)
    }

    /// The writer, e.g. to inspect or finalize it after a run.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    fn emit(&self, event: StepEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&self.ctx, &event);
        }
    }
}

impl<M, P, W> ChunkStep<M, P, W>
where
    M: FieldMapper,
    P: ItemProcessor<M::Item>,
    W: ItemWriter<P::Output>,
{
    /// Run the step to completion or to the first fatal error.
    ///
    /// On failure the partial chunk is discarded, the reader is closed, and the returned
    /// [`StepFailure`] carries the counters reached so far.
    pub fn run(&mut self) -> Result<StepReport, StepFailure> {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(StepEvent::RunStarted);

        let mut report = StepReport::default();
        let outcome = self.run_chunks(&mut report);

        report.lines_read = self.reader.lines_read();
        self.reader.close();
        report.elapsed = start.elapsed();
        self.metrics.end_run(report.elapsed);

        match outcome {
            Ok(()) => {
                self.state = StepState::Done;
                info!(step = %self.ctx.step, %report, "step completed");
                self.emit(StepEvent::RunFinished {
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(source) => {
                self.state = StepState::Failed;
                let severity = source.severity();
                error!(
                    step = %self.ctx.step,
                    line = ?source.line(),
                    key = ?source.key_fragment(),
                    rows_read = report.rows_read,
                    items_written = report.items_written,
                    error = %source,
                    "step aborted"
                );
                if let Some(obs) = &self.observer {
                    obs.on_failure(&self.ctx, severity, &source);
                    if severity >= self.alert_at_or_above {
                        obs.on_alert(&self.ctx, severity, &source);
                    }
                }
                Err(StepFailure { source, report })
            }
        }
    }

    fn run_chunks(&mut self, report: &mut StepReport) -> PipelineResult<()> {
        self.reader.open()?;
        let mut chunk: Vec<P::Output> = Vec::with_capacity(self.options.chunk_size);

        loop {
            self.state = StepState::Reading;
            let Some(row) = self.reader.read_next()? else {
                break;
            };
            report.rows_read += 1;
            self.metrics.on_row_read();

            self.state = StepState::Transforming;
            let line = row.line;
            let item = self.mapper.map_row(self.reader.header(), row)?;
            let output = match self.processor.process(item) {
                Ok(output) => output,
                Err(source) => {
                    self.skip_or_abort(line, source, report)?;
                    continue;
                }
            };

            self.state = StepState::Accumulating;
            chunk.push(output);
            if chunk.len() >= self.options.chunk_size {
                self.flush(&mut chunk, report)?;
            }
        }

        self.state = StepState::Draining;
        if !chunk.is_empty() {
            self.flush(&mut chunk, report)?;
        }
        Ok(())
    }

    fn skip_or_abort(
        &mut self,
        line: usize,
        source: BoxError,
        report: &mut StepReport,
    ) -> PipelineResult<()> {
        match self.options.transform_failure {
            TransformFailurePolicy::Abort => Err(PipelineError::Transform { line, source }),
            TransformFailurePolicy::Skip { limit } => {
                report.items_skipped += 1;
                if limit.is_some_and(|limit| report.items_skipped > limit) {
                    report.items_skipped -= 1;
                    return Err(PipelineError::Transform { line, source });
                }
                self.metrics.on_item_skipped();
                let reason = source.to_string();
                warn!(step = %self.ctx.step, line, %reason, "skipping item rejected by processor");
                self.emit(StepEvent::ItemSkipped { line, reason });
                Ok(())
            }
        }
    }

    fn flush(&mut self, chunk: &mut Vec<P::Output>, report: &mut StepReport) -> PipelineResult<()> {
        self.state = StepState::Flushing;
        let index = report.chunks_flushed;
        let items = chunk.len();

        self.writer
            .write(chunk.as_slice())
            .map_err(|source| PipelineError::Sink {
                chunk: index,
                items,
                source,
            })?;
        chunk.clear();

        report.chunks_flushed += 1;
        report.items_written += items;
        self.metrics.on_chunk_flushed(items);
        debug!(step = %self.ctx.step, chunk = index, items, "chunk flushed");
        self.emit(StepEvent::ChunkFlushed { index, items });
        Ok(())
    }
}

impl<M, P, W> fmt::Debug for ChunkStep<M, P, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStep")
            .field("ctx", &self.ctx)
            .field("reader", &self.reader)
            .field("options", &self.options)
            .field("observer_set", &self.observer.is_some())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkStepBuilder, InMemoryWriter, StepState, TransformFailurePolicy};
    use crate::error::BoxError;
    use crate::mapper::RecordMapper;
    use crate::reader::{RecordReaderBuilder, Resource};
    use crate::types::{Record, Value};
    use crate::PipelineError;

    fn reader(input: &str) -> crate::reader::RecordReader {
        RecordReaderBuilder::new()
            .resource(Resource::from_bytes(input))
            .header(["id", "name"])
            .build()
            .unwrap()
    }

    #[test]
    fn missing_mapper_is_config_error_before_io() {
        let err = ChunkStepBuilder::<RecordMapper, _, InMemoryWriter<Record>>::new("s")
            .reader(reader("1,a\r\n"))
            .writer(InMemoryWriter::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
        assert!(err.to_string().contains("field mapper is required"));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = ChunkStepBuilder::new("s")
            .reader(reader("1,a\r\n"))
            .mapper(RecordMapper)
            .writer(InMemoryWriter::<Record>::new())
            .chunk_size(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn skip_policy_drops_rejected_items_until_limit() {
        let sink = InMemoryWriter::<Record>::new();
        let reject_b = |r: Record| -> Result<Record, BoxError> {
            if r.get("name") == Some(&Value::Utf8("b".to_string())) {
                Err("name b is not allowed".into())
            } else {
                Ok(r)
            }
        };
        let mut step = ChunkStepBuilder::new("skip")
            .reader(reader("1,a\r\n2,b\r\n3,c\r\n"))
            .mapper(RecordMapper)
            .processor(reject_b)
            .writer(sink.clone())
            .transform_failure(TransformFailurePolicy::Skip { limit: Some(1) })
            .build()
            .unwrap();

        let report = step.run().unwrap();
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.items_skipped, 1);
        assert_eq!(report.items_written, 2);
        assert_eq!(step.state(), StepState::Done);
        assert_eq!(step.metrics().snapshot().items_skipped, 1);
    }

    #[test]
    fn skip_limit_exceeded_aborts() {
        let sink = InMemoryWriter::<Record>::new();
        let reject_all = |_r: Record| -> Result<Record, BoxError> { Err("nope".into()) };
        let mut step = ChunkStepBuilder::new("skip")
            .reader(reader("1,a\r\n2,b\r\n"))
            .mapper(RecordMapper)
            .processor(reject_all)
            .writer(sink.clone())
            .transform_failure(TransformFailurePolicy::Skip { limit: Some(1) })
            .build()
            .unwrap();

        let failure = step.run().unwrap_err();
        assert!(matches!(failure.error(), PipelineError::Transform { line: 2, .. }));
        assert_eq!(failure.report.items_skipped, 1);
        assert_eq!(sink.flush_count(), 0);
        assert_eq!(step.state(), StepState::Failed);
    }

    #[test]
    fn metrics_track_last_run() {
        let sink = InMemoryWriter::<Record>::new();
        let mut step = ChunkStepBuilder::new("m")
            .reader(reader("1,a\r\n2,b\r\n3,c\r\n"))
            .mapper(RecordMapper)
            .writer(sink)
            .chunk_size(2)
            .build()
            .unwrap();
        let metrics = step.metrics();

        step.run().unwrap();
        let snap = metrics.snapshot();
        assert_eq!(snap.run_id, 1);
        assert_eq!(snap.rows_read, 3);
        assert_eq!(snap.items_written, 3);
        assert_eq!(snap.chunks_flushed, 2);
        assert!(snap.elapsed.is_some());
    }
}
