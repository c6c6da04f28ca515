//! Input resources for the record reader.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};

/// A byte source the reader can open.
///
/// Paths and in-memory bytes can be reopened for a new session; a [`Resource::Stream`] can be
/// opened once.
pub enum Resource {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// In-memory bytes.
    Bytes(Arc<[u8]>),
    /// An arbitrary reader; `None` once consumed by a session.
    Stream(Option<Box<dyn Read + Send>>),
}

/// Result of acquiring a resource for a new session.
pub(crate) enum Acquired {
    Ready(Box<dyn Read + Send>),
    Missing,
    Unreadable(String),
}

impl Resource {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::Path(path.as_ref().to_path_buf())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self::Bytes(bytes.into())
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self::Stream(Some(Box::new(reader)))
    }

    /// Expand a glob pattern into path resources, sorted by path.
    ///
    /// Each match is independent, so every file can feed its own pipeline.
    pub fn glob(pattern: &str) -> PipelineResult<Vec<Resource>> {
        let entries = glob::glob(pattern)
            .map_err(|e| PipelineError::config(format!("invalid glob pattern '{pattern}': {e}")))?;

        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry.map_err(glob::GlobError::into_error)?);
        }
        paths.sort();
        Ok(paths.into_iter().map(Resource::Path).collect())
    }

    /// Human-readable description used in logs and errors.
    pub fn description(&self) -> String {
        match self {
            Self::Path(p) => p.display().to_string(),
            Self::Bytes(b) => format!("<{} in-memory bytes>", b.len()),
            Self::Stream(_) => "<stream>".to_string(),
        }
    }

    pub(crate) fn error_path(&self) -> PathBuf {
        match self {
            Self::Path(p) => p.clone(),
            _ => PathBuf::from(self.description()),
        }
    }

    pub(crate) fn acquire(&mut self) -> Acquired {
        match self {
            Self::Path(path) => acquire_path(path),
            Self::Bytes(bytes) => Acquired::Ready(Box::new(Cursor::new(Arc::clone(bytes)))),
            Self::Stream(slot) => match slot.take() {
                Some(reader) => Acquired::Ready(reader),
                None => Acquired::Unreadable(
                    "stream was already consumed by a previous session".to_string(),
                ),
            },
        }
    }
}

fn acquire_path(path: &Path) -> Acquired {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Acquired::Missing,
        Err(e) => return Acquired::Unreadable(e.to_string()),
    };
    if !meta.is_file() {
        return Acquired::Unreadable("not a regular file".to_string());
    }
    match File::open(path) {
        Ok(file) => Acquired::Ready(Box::new(file)),
        Err(e) if e.kind() == ErrorKind::NotFound => Acquired::Missing,
        Err(e) => Acquired::Unreadable(e.to_string()),
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Bytes(b) => f.debug_struct("Bytes").field("len", &b.len()).finish(),
            Self::Stream(s) => f
                .debug_struct("Stream")
                .field("consumed", &s.is_none())
                .finish(),
        }
    }
}

impl From<PathBuf> for Resource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for Resource {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}
