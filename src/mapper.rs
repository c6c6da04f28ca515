//! Field mappers: header + raw row → item.
//!
//! Each target entity type gets an explicit [`FieldMapper`], chosen when the step is wired:
//!
//! - [`RecordMapper`]: every field as [`Value::Utf8`]
//! - [`SchemaMapper`]: typed parsing driven by a [`Schema`]
//! - [`DeserializeMapper`]: serde deserialization keyed by header names
//! - [`FnMapper`]: a caller-supplied closure
//!
//! Rows reaching a mapper always match the header width; the reader rejects the rest.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataType, Header, RawRow, Record, Schema, Value};

/// Converts one raw row into an item.
pub trait FieldMapper {
    type Item;

    fn map_row(&self, header: &Header, row: RawRow) -> PipelineResult<Self::Item>;
}

/// Maps each field to [`Value::Utf8`] under its header name. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordMapper;

impl FieldMapper for RecordMapper {
    type Item = Record;

    fn map_row(&self, header: &Header, row: RawRow) -> PipelineResult<Record> {
        let values = row.fields.into_iter().map(Value::Utf8).collect();
        Ok(Record::new(header.clone(), values))
    }
}

/// Parses fields into typed [`Value`]s.
///
/// Schema fields are looked up by name, so the schema may list a subset of the header's
/// columns in any order. Empty cells become [`Value::Null`].
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    schema: Schema,
    output: Header,
}

impl SchemaMapper {
    pub fn new(schema: Schema) -> Self {
        let output = schema.header();
        Self { schema, output }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl FieldMapper for SchemaMapper {
    type Item = Record;

    fn map_row(&self, header: &Header, row: RawRow) -> PipelineResult<Record> {
        let mut values = Vec::with_capacity(self.schema.fields.len());
        for field in &self.schema.fields {
            let idx = header.index_of(&field.name).ok_or_else(|| {
                PipelineError::config(format!(
                    "schema field '{}' is not in the header {:?}",
                    field.name,
                    header.names()
                ))
            })?;
            let raw = row.get(idx).unwrap_or("");
            values.push(parse_typed_value(row.line, &field.name, field.data_type, raw)?);
        }
        Ok(Record::new(self.output.clone(), values))
    }
}

fn parse_typed_value(
    row: usize,
    column: &str,
    data_type: DataType,
    raw: &str,
) -> PipelineResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let parse_error = |message: String| PipelineError::ParseError {
        row,
        column: column.to_owned(),
        raw: raw.to_owned(),
        message,
    };

    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(trimmed.to_owned())),
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| parse_error(e.to_string())),
        DataType::Float64 => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| parse_error(e.to_string())),
        DataType::Bool => parse_bool(trimmed).map(Value::Bool).map_err(parse_error),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}

/// Deserializes rows into `T` by header name, the way a struct maps from named columns.
pub struct DeserializeMapper<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> DeserializeMapper<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for DeserializeMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for DeserializeMapper<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DeserializeMapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeserializeMapper")
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> FieldMapper for DeserializeMapper<T> {
    type Item = T;

    fn map_row(&self, header: &Header, row: RawRow) -> PipelineResult<T> {
        let names: csv::StringRecord = header.names().iter().collect();
        let line = row.line;
        let record = csv::StringRecord::from(row.fields);

        record.deserialize::<T>(Some(&names)).map_err(|e| match e.kind() {
            csv::ErrorKind::Deserialize { err, .. } => {
                let idx = err.field().map(|f| f as usize);
                PipelineError::ParseError {
                    row: line,
                    column: idx
                        .and_then(|i| header.names().get(i))
                        .cloned()
                        .unwrap_or_default(),
                    raw: idx
                        .and_then(|i| record.get(i))
                        .unwrap_or_default()
                        .to_owned(),
                    message: err.kind().to_string(),
                }
            }
            _ => PipelineError::Csv(e),
        })
    }
}

/// Wraps a closure `Fn(&Header, RawRow) -> PipelineResult<T>` as a [`FieldMapper`].
pub struct FnMapper<F, T> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> FnMapper<F, T>
where
    F: Fn(&Header, RawRow) -> PipelineResult<T>,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<F, T> FieldMapper for FnMapper<F, T>
where
    F: Fn(&Header, RawRow) -> PipelineResult<T>,
{
    type Item = T;

    fn map_row(&self, header: &Header, row: RawRow) -> PipelineResult<T> {
        (self.f)(header, row)
    }
}

impl<F, T> fmt::Debug for FnMapper<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMapper").finish_non_exhaustive()
    }
}
