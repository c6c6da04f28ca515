//! Runs independent steps on a worker pool.
//!
//! Each step still processes its own resource sequentially, chunk after chunk; only whole
//! steps run in parallel. A failure in one step does not stop the others.

use std::fmt;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult, StepFailure};
use crate::mapper::FieldMapper;
use crate::step::{ChunkStep, ItemProcessor, ItemWriter, StepReport};

/// Configuration for the [`JobRunner`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Number of worker threads.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
}

/// A step the [`JobRunner`] can execute.
pub trait RunnableStep {
    fn name(&self) -> &str;

    fn run(&mut self) -> Result<StepReport, StepFailure>;
}

impl<M, P, W> RunnableStep for ChunkStep<M, P, W>
where
    M: FieldMapper,
    P: ItemProcessor<M::Item>,
    W: ItemWriter<P::Output>,
{
    fn name(&self) -> &str {
        ChunkStep::name(self)
    }

    fn run(&mut self) -> Result<StepReport, StepFailure> {
        ChunkStep::run(self)
    }
}

impl<S: RunnableStep + ?Sized> RunnableStep for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&mut self) -> Result<StepReport, StepFailure> {
        (**self).run()
    }
}

/// Executes batches of independent steps with bounded parallelism.
pub struct JobRunner {
    pool: ThreadPool,
    opts: JobOptions,
}

impl JobRunner {
    /// Create a runner with its own thread pool.
    ///
    /// `num_threads == Some(0)` and pool construction failures are reported as
    /// [`PipelineError::Config`].
    pub fn new(opts: JobOptions) -> PipelineResult<Self> {
        if opts.num_threads == Some(0) {
            return Err(PipelineError::config("num_threads must be > 0 when set"));
        }
        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("batch-step-{i}"))
            .build()
            .map_err(|e| PipelineError::config(format!("failed to build thread pool: {e}")))?;

        Ok(Self { pool, opts })
    }

    pub fn options(&self) -> &JobOptions {
        &self.opts
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run every step to completion. Results are returned in input order.
    pub fn run_all<S>(&self, steps: Vec<S>) -> Vec<Result<StepReport, StepFailure>>
    where
        S: RunnableStep + Send,
    {
        let total = steps.len();
        let results: Vec<Result<StepReport, StepFailure>> = self.pool.install(|| {
            steps
                .into_par_iter()
                .map(|mut step| {
                    let result = step.run();
                    if let Err(failure) = &result {
                        warn!(step = step.name(), error = %failure, "step failed within job");
                    }
                    result
                })
                .collect()
        });

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(steps = total, failed, "job finished");
        results
    }
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("opts", &self.opts)
            .field("num_threads", &self.pool.current_num_threads())
            .finish()
    }
}
