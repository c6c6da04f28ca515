//! Streaming delimited-text record reader.
//!
//! A [`RecordReader`] owns one [`Resource`] and a fixed [`Header`]. Each `open` starts a new
//! session:
//!
//! - the resource is checked for existence/readability (fatal in strict mode, empty input
//!   otherwise)
//! - `lines_to_skip` records are consumed
//! - [`RecordReader::read_next`] then yields one [`RawRow`] per record, in file order, and fails
//!   with [`PipelineError::Schema`] when a record's width differs from the header's
//!
//! ```rust
//! use rust_batch_pipeline::reader::{DialectConfig, RecordReaderBuilder, Resource};
//!
//! # fn main() -> Result<(), rust_batch_pipeline::PipelineError> {
//! let mut reader = RecordReaderBuilder::new()
//!     .resource(Resource::from_bytes("id,name\r\n1,Ada\r\n"))
//!     .header(["id", "name"])
//!     .dialect(DialectConfig::default().with_lines_to_skip(1))
//!     .build()?;
//!
//! reader.open()?;
//! let row = reader.read_next()?.unwrap();
//! assert_eq!(row.fields, vec!["1", "Ada"]);
//! assert!(reader.read_next()?.is_none());
//! assert_eq!(reader.lines_read(), 2);
//! reader.close();
//! # Ok(())
//! # }
//! ```

pub mod dialect;
pub mod resource;

use std::io::Read;

use encoding_rs::{Encoding, UTF_8};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{Header, RawRow};

pub use dialect::DialectConfig;
pub use resource::Resource;

use dialect::ParserSettings;
use resource::Acquired;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Lifecycle state of a reader's current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `open` has not been called.
    Unopened,
    /// A parser is live.
    Open,
    /// The resource was missing or unreadable in non-strict mode; reads return end-of-stream.
    NoInput,
    /// `close` was called; a new `open` starts a fresh session.
    Closed,
}

enum Session {
    Unopened,
    Open(Box<OpenSession>),
    NoInput,
    Closed,
}

struct OpenSession {
    parser: csv::Reader<Box<dyn Read + Send>>,
    record: csv::ByteRecord,
}

/// Builder for [`RecordReader`].
///
/// The header and the resource are required; [`RecordReaderBuilder::build`] reports their
/// absence before any I/O happens.
#[derive(Debug, Default)]
pub struct RecordReaderBuilder {
    resource: Option<Resource>,
    header: Option<Header>,
    dialect: DialectConfig,
}

impl RecordReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Shorthand for `.resource(Resource::from_path(path))`.
    pub fn path(self, path: impl AsRef<std::path::Path>) -> Self {
        self.resource(Resource::from_path(path))
    }

    pub fn header<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header = Some(Header::new(names));
        self
    }

    pub fn dialect(mut self, dialect: DialectConfig) -> Self {
        self.dialect = dialect;
        self
    }

    /// Validate the configuration and create an unopened reader.
    pub fn build(self) -> PipelineResult<RecordReader> {
        let resource = self
            .resource
            .ok_or_else(|| PipelineError::config("input resource must be set"))?;
        let header = self
            .header
            .ok_or_else(|| PipelineError::config("header is required"))?;
        if header.is_empty() {
            return Err(PipelineError::config("header must name at least one column"));
        }
        let settings = self.dialect.parser_settings()?;
        if self.dialect.key_column_count > header.len() {
            return Err(PipelineError::config(format!(
                "key_column_count {} exceeds header width {}",
                self.dialect.key_column_count,
                header.len()
            )));
        }

        Ok(RecordReader {
            resource,
            header,
            dialect: self.dialect,
            settings,
            session: Session::Unopened,
            line_count: 0,
        })
    }
}

/// Forward-only reader of delimited records.
///
/// The parser cursor and the line counter are private to the reader and only move through
/// [`open`](Self::open), [`read_next`](Self::read_next) and [`close`](Self::close).
pub struct RecordReader {
    resource: Resource,
    header: Header,
    dialect: DialectConfig,
    settings: ParserSettings,
    session: Session,
    line_count: usize,
}

impl RecordReader {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn dialect(&self) -> &DialectConfig {
        &self.dialect
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn state(&self) -> SessionState {
        match self.session {
            Session::Unopened => SessionState::Unopened,
            Session::Open(_) => SessionState::Open,
            Session::NoInput => SessionState::NoInput,
            Session::Closed => SessionState::Closed,
        }
    }

    /// Records parsed in the current session, skipped ones included.
    pub fn lines_read(&self) -> usize {
        self.line_count
    }

    /// Start a session.
    ///
    /// A missing or unreadable resource fails with [`PipelineError::Resource`] in strict mode.
    /// Otherwise it is logged and the session reads as empty. An unreadable resource is also
    /// fatal when `unreadable_is_fatal` is set.
    pub fn open(&mut self) -> PipelineResult<()> {
        if matches!(self.session, Session::Open(_) | Session::NoInput) {
            return Err(PipelineError::config("reader is already open"));
        }
        self.line_count = 0;

        let source = match self.resource.acquire() {
            Acquired::Ready(source) => source,
            Acquired::Missing => {
                if self.dialect.strict {
                    return Err(
                        self.resource_error("input resource must exist (reader is in strict mode)")
                    );
                }
                warn!(
                    resource = %self.resource.description(),
                    "input resource does not exist"
                );
                self.session = Session::NoInput;
                return Ok(());
            }
            Acquired::Unreadable(reason) => {
                if self.dialect.strict || self.dialect.unreadable_is_fatal {
                    return Err(
                        self.resource_error(format!("input resource must be readable: {reason}"))
                    );
                }
                warn!(
                    resource = %self.resource.description(),
                    %reason,
                    "input resource is not readable"
                );
                self.session = Session::NoInput;
                return Ok(());
            }
        };

        let parser = self.settings.reader_builder().from_reader(source);
        self.session = Session::Open(Box::new(OpenSession {
            parser,
            record: csv::ByteRecord::new(),
        }));
        debug!(resource = %self.resource.description(), "reader opened");

        for _ in 0..self.dialect.lines_to_skip {
            if !self.advance()? {
                break;
            }
        }
        if self.dialect.lines_to_skip > 0 {
            debug!(skipped = self.line_count, "skipped leading lines");
        }
        Ok(())
    }

    /// Read the next row.
    ///
    /// Returns `Ok(None)` at end of input, or immediately when the session has no input.
    pub fn read_next(&mut self) -> PipelineResult<Option<RawRow>> {
        if matches!(self.session, Session::NoInput) {
            return Ok(None);
        }
        if !self.advance()? {
            return Ok(None);
        }

        let line = self.line_count;
        let record = match &self.session {
            Session::Open(s) => &s.record,
            _ => return Err(PipelineError::NotOpen),
        };

        // Width before decode: a short row must report Schema even with undecodable bytes.
        if record.len() != self.header.len() {
            return Err(PipelineError::Schema {
                line,
                key_fragment: lossy_key_fragment(
                    record,
                    self.settings.encoding,
                    self.dialect.key_column_count,
                ),
                column_count: record.len(),
                expected: self.header.len(),
            });
        }

        let fields = decode_fields(record, self.settings.encoding, line)?;
        Ok(Some(RawRow::new(line, fields)))
    }

    /// Borrow the open reader as an iterator of rows.
    pub fn rows(&mut self) -> Rows<'_> {
        Rows { reader: self }
    }

    /// End the session. Idempotent, and a no-op on a reader that was never opened.
    pub fn close(&mut self) {
        self.line_count = 0;
        match self.session {
            Session::Unopened | Session::Closed => {}
            Session::Open(_) | Session::NoInput => {
                self.session = Session::Closed;
                debug!(resource = %self.resource.description(), "reader closed");
            }
        }
    }

    /// Parse one record into the session buffer, counting it.
    fn advance(&mut self) -> PipelineResult<bool> {
        let session = match &mut self.session {
            Session::Open(s) => s,
            Session::NoInput => return Ok(false),
            Session::Unopened | Session::Closed => return Err(PipelineError::NotOpen),
        };
        if !session.parser.read_byte_record(&mut session.record)? {
            return Ok(false);
        }
        self.line_count += 1;
        Ok(true)
    }

    fn resource_error(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::Resource {
            path: self.resource.error_path(),
            message: message.into(),
        }
    }
}

impl std::fmt::Debug for RecordReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordReader")
            .field("resource", &self.resource)
            .field("header", &self.header)
            .field("state", &self.state())
            .field("line_count", &self.line_count)
            .finish()
    }
}

/// Iterator over the rows of an open [`RecordReader`].
pub struct Rows<'a> {
    reader: &'a mut RecordReader,
}

impl Iterator for Rows<'_> {
    type Item = PipelineResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_next().transpose()
    }
}

fn decode_fields(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
    line: usize,
) -> PipelineResult<Vec<String>> {
    let mut fields = Vec::with_capacity(record.len());
    for (idx, raw) in record.iter().enumerate() {
        let raw = if idx == 0 && line == 1 && encoding == UTF_8 {
            raw.strip_prefix(UTF8_BOM).unwrap_or(raw)
        } else {
            raw
        };
        match encoding.decode_without_bom_handling_and_without_replacement(raw) {
            Some(text) => fields.push(text.into_owned()),
            None => {
                return Err(PipelineError::Decode {
                    line,
                    column: idx + 1,
                    charset: encoding.name().to_string(),
                });
            }
        }
    }
    Ok(fields)
}

/// Key fragment of a malformed record. Undecodable bytes become U+FFFD.
fn lossy_key_fragment(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
    key_columns: usize,
) -> String {
    (0..key_columns)
        .map(|idx| match record.get(idx) {
            Some(raw) => encoding
                .decode_without_bom_handling(raw)
                .0
                .into_owned(),
            None => String::new(),
        })
        .collect::<Vec<_>>()
        .join(",")
}
