//! Writer sinks: the boundary where a chunk becomes durable.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::error::BoxError;

/// Persists a chunk of items as one atomic unit.
///
/// `write` either commits every item of `items` or fails for the whole chunk; the step never
/// assumes partial success.
pub trait ItemWriter<T> {
    fn write(&mut self, items: &[T]) -> Result<(), BoxError>;
}

impl<T, W: ItemWriter<T> + ?Sized> ItemWriter<T> for &mut W {
    fn write(&mut self, items: &[T]) -> Result<(), BoxError> {
        (**self).write(items)
    }
}

impl<T, W: ItemWriter<T> + ?Sized> ItemWriter<T> for Box<W> {
    fn write(&mut self, items: &[T]) -> Result<(), BoxError> {
        (**self).write(items)
    }
}

/// Collects every written chunk in memory.
///
/// Clones share storage, so a handle kept by the caller sees what the step wrote.
pub struct InMemoryWriter<T> {
    chunks: Arc<Mutex<Vec<Vec<T>>>>,
}

impl<T> InMemoryWriter<T> {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<T>>> {
        self.chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of `write` calls that succeeded.
    pub fn flush_count(&self) -> usize {
        self.lock().len()
    }

    /// Total items across all chunks.
    pub fn item_count(&self) -> usize {
        self.lock().iter().map(Vec::len).sum()
    }
}

impl<T: Clone> InMemoryWriter<T> {
    /// Copy of every chunk, in write order.
    pub fn chunks(&self) -> Vec<Vec<T>> {
        self.lock().clone()
    }

    /// Copy of every item, flattened in write order.
    pub fn items(&self) -> Vec<T> {
        self.lock().iter().flatten().cloned().collect()
    }
}

impl<T> Default for InMemoryWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InMemoryWriter<T> {
    fn clone(&self) -> Self {
        Self {
            chunks: Arc::clone(&self.chunks),
        }
    }
}

impl<T> fmt::Debug for InMemoryWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryWriter")
            .field("flush_count", &self.flush_count())
            .finish()
    }
}

impl<T: Clone> ItemWriter<T> for InMemoryWriter<T> {
    fn write(&mut self, items: &[T]) -> Result<(), BoxError> {
        self.lock().push(items.to_vec());
        Ok(())
    }
}

/// Logs every item of a chunk at info level. Useful for dry runs.
#[derive(Debug, Default)]
pub struct LoggingWriter {
    chunks: usize,
}

impl LoggingWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: fmt::Debug> ItemWriter<T> for LoggingWriter {
    fn write(&mut self, items: &[T]) -> Result<(), BoxError> {
        for item in items {
            info!(chunk = self.chunks, item = ?item, "write item");
        }
        self.chunks += 1;
        Ok(())
    }
}
