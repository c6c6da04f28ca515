//! Core data model types for the pipeline.
//!
//! The reader produces [`RawRow`]s whose width must match a caller-supplied [`Header`]. Mappers
//! turn each row into an item; the built-in ones produce [`Record`]s, optionally typed by a
//! [`Schema`] (a list of typed [`Field`]s).

use std::fmt;
use std::sync::Arc;

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A list of fields describing the expected shape of incoming rows.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Header with the schema's field names, in order.
    pub fn header(&self) -> Header {
        Header::new(self.field_names())
    }
}

/// Ordered column names for a read session.
///
/// Cloning is cheap; every [`Record`] built from a session shares the same names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    names: Arc<[String]>,
}

impl Header {
    /// Create a header from column names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        Self {
            names: names.into(),
        }
    }

    /// Number of columns (`H`).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Column names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Fields produced by one parse cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line counter value at which the row was parsed (skipped lines included).
    pub line: usize,
    /// Decoded field values, in file order.
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn new(line: usize, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field at `idx`, if present.
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.fields.get(idx).map(String::as_str)
    }

    /// The first `key_columns` fields joined by commas.
    ///
    /// Missing fields are rendered as empty strings, so the number of commas always matches
    /// `key_columns - 1` even for short rows.
    pub fn key_fragment(&self, key_columns: usize) -> String {
        (0..key_columns)
            .map(|i| self.get(i).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A single typed value in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    /// Borrow the string payload of a [`Value::Utf8`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Utf8(s) => f.write_str(s),
        }
    }
}

/// Mapping from header name to value, built 1:1 from a [`RawRow`] and its [`Header`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    header: Header,
    values: Vec<Value>,
}

impl Record {
    /// Create a record.
    ///
    /// # Panics
    ///
    /// Panics if `values` has a different length than `header`.
    pub fn new(header: Header, values: Vec<Value>) -> Self {
        assert!(
            values.len() == header.len(),
            "record length {} does not match header length {}",
            values.len(),
            header.len()
        );
        Self { header, values }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Values in header order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value for column `name`, if the header has it.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.header.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Mutable value for column `name`, for processors that rewrite records in place.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        let idx = self.header.index_of(name)?;
        self.values.get_mut(idx)
    }

    /// Iterate `(name, value)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.header
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}
