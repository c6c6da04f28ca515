//! Per-item transform stage.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BoxError;

/// Transforms one item. Implementations should be free of side effects other than logging.
///
/// Any `Fn(I) -> Result<O, BoxError>` closure is a processor.
pub trait ItemProcessor<I> {
    type Output;

    fn process(&self, item: I) -> Result<Self::Output, BoxError>;
}

impl<I, O, F> ItemProcessor<I> for F
where
    F: Fn(I) -> Result<O, BoxError>,
{
    type Output = O;

    fn process(&self, item: I) -> Result<O, BoxError> {
        self(item)
    }
}

/// Identity processor; logs each item at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughProcessor;

impl<T: fmt::Debug> ItemProcessor<T> for PassThroughProcessor {
    type Output = T;

    fn process(&self, item: T) -> Result<T, BoxError> {
        debug!(item = ?item, "passing item through");
        Ok(item)
    }
}

/// What the step does when the processor rejects an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformFailurePolicy {
    /// Abort the run with [`crate::PipelineError::Transform`].
    #[default]
    Abort,
    /// Log and drop the item. With a `limit`, the run aborts once more than `limit` items
    /// have been skipped.
    Skip { limit: Option<usize> },
}
