//! `rust-batch-pipeline` reads delimited text files record by record and pushes them through a
//! chunk-oriented pipeline: **read → map → transform → batch write**.
//!
//! The building blocks:
//!
//! - [`reader::RecordReader`]: opens a [`reader::Resource`] (file, bytes or stream), applies a
//!   [`reader::DialectConfig`] (delimiter, quote, line separator, charset, leading lines to skip)
//!   and yields one [`types::RawRow`] per record, rejecting rows whose width differs from the
//!   [`types::Header`].
//! - [`mapper::FieldMapper`]: turns a header + raw row into an item. Built-in mappers produce
//!   string [`types::Record`]s, typed records from a [`types::Schema`], or any
//!   `serde::Deserialize` struct.
//! - [`step::ItemProcessor`]: optional per-item transform. Closures work directly.
//! - [`step::ItemWriter`]: receives completed chunks. A chunk is the unit of durability.
//! - [`step::ChunkStep`]: wires the above and drives a run, returning a [`step::StepReport`] or a
//!   [`StepFailure`] carrying the counters reached before the abort.
//! - [`job::JobRunner`]: runs independent steps in parallel on a `rayon` pool.
//!
//! ## Dialect defaults
//!
//! | setting            | default  |
//! |--------------------|----------|
//! | delimiter          | `,`      |
//! | quote              | `"`      |
//! | line separator     | `\r\n`   |
//! | charset            | `UTF-8`  |
//! | strict             | `true`   |
//! | lines to skip      | `0`      |
//! | key column count   | `1`      |
//!
//! A dialect can also be loaded from JSON with [`reader::DialectConfig::from_json_str`].
//!
//! ## Quick example
//!
//! ```rust
//! use rust_batch_pipeline::mapper::DeserializeMapper;
//! use rust_batch_pipeline::reader::{DialectConfig, RecordReaderBuilder, Resource};
//! use rust_batch_pipeline::step::{ChunkStepBuilder, InMemoryWriter};
//!
//! #[derive(Debug, Clone, serde::Deserialize)]
//! struct Person {
//!     person_id: i64,
//!     lastname: String,
//!     firstname: String,
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = "person_id,lastname,firstname\r\n1,Doe,John\r\n2,Smith,Jane\r\n";
//! let reader = RecordReaderBuilder::new()
//!     .resource(Resource::from_bytes(input))
//!     .header(["person_id", "lastname", "firstname"])
//!     .dialect(DialectConfig::default().with_lines_to_skip(1))
//!     .build()?;
//!
//! let sink = InMemoryWriter::<Person>::new();
//! let mut step = ChunkStepBuilder::new("people")
//!     .reader(reader)
//!     .mapper(DeserializeMapper::<Person>::new())
//!     .writer(sink.clone())
//!     .chunk_size(1)
//!     .build()?;
//!
//! let report = step.run()?;
//! assert_eq!(report.items_written, 2);
//! assert_eq!(sink.flush_count(), 2);
//! assert_eq!(sink.items()[1].lastname, "Smith");
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every stage reports [`PipelineError`]. Schema mismatches carry the line number and the row's
//! key fragment (its first `key_column_count` fields) so a bad record can be located in the
//! source file. [`PipelineError::severity`] classifies errors for alerting; see
//! [`step::StepObserver`].
//!
//! ## Logging
//!
//! The crate emits `tracing` events (resource open/close, chunk flushes, skips, aborts) and never
//! installs a subscriber. Attach [`step::TracingObserver`] for per-step progress at info level.

pub mod error;
pub mod job;
pub mod mapper;
pub mod reader;
pub mod step;
pub mod types;

pub use error::{BoxError, PipelineError, PipelineResult, Severity, StepFailure};
