//! Parsing parameters for delimited text.

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Syntactic parameters describing how raw text is tokenized into fields, plus the reader's
/// resource-handling mode.
///
/// Use [`Default`] for comma-separated, double-quoted, CRLF-terminated UTF-8 in strict mode.
/// The reader takes its own copy at build time, so a config cannot change under an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialectConfig {
    /// Column delimiter. Must be a single-byte ASCII character.
    pub delimiter: char,
    /// Quote character. Must be a single-byte ASCII character distinct from `delimiter`.
    pub quote: char,
    /// Record terminator: `"\r\n"`, `"\n"` or `"\r"`.
    ///
    /// `"\r\n"` also accepts a lone `\r` or `\n`.
    pub line_separator: String,
    /// Charset label (WHATWG names such as `UTF-8`, `Shift_JIS`, `windows-1252`).
    pub charset: String,
    /// If `true`, a missing or unreadable resource fails `open`; otherwise it reads as empty.
    pub strict: bool,
    /// Number of leading records consumed before the first yielded row.
    pub lines_to_skip: usize,
    /// Number of leading fields reported as the key fragment of a malformed row.
    pub key_column_count: usize,
    /// Trim leading and trailing ASCII whitespace from every field, quoted ones included.
    /// Off by default, so quoted padding survives.
    pub trim: bool,
    /// Lines starting with this character are ignored.
    pub comment: Option<char>,
    /// If `true`, a resource that exists but cannot be read is fatal even in non-strict mode.
    pub unreadable_is_fatal: bool,
}

impl Default for DialectConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            line_separator: "\r\n".to_string(),
            charset: "UTF-8".to_string(),
            strict: true,
            lines_to_skip: 0,
            key_column_count: 1,
            trim: false,
            comment: None,
            unreadable_is_fatal: false,
        }
    }
}

impl DialectConfig {
    /// Parse a config from JSON. Missing keys take their default values.
    pub fn from_json_str(input: &str) -> PipelineResult<Self> {
        let config: Self = serde_json::from_str(input)
            .map_err(|e| PipelineError::config(format!("invalid dialect json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_quote(mut self, quote: char) -> Self {
        self.quote = quote;
        self
    }

    pub fn with_line_separator(mut self, line_separator: impl Into<String>) -> Self {
        self.line_separator = line_separator.into();
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_lines_to_skip(mut self, lines_to_skip: usize) -> Self {
        self.lines_to_skip = lines_to_skip;
        self
    }

    pub fn with_key_column_count(mut self, key_column_count: usize) -> Self {
        self.key_column_count = key_column_count;
        self
    }

    pub fn with_trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn with_comment(mut self, comment: Option<char>) -> Self {
        self.comment = comment;
        self
    }

    pub fn with_unreadable_is_fatal(mut self, fatal: bool) -> Self {
        self.unreadable_is_fatal = fatal;
        self
    }

    /// Check that every parameter can be expressed by the parser.
    pub fn validate(&self) -> PipelineResult<()> {
        self.parser_settings().map(|_| ())
    }

    pub(crate) fn parser_settings(&self) -> PipelineResult<ParserSettings> {
        let delimiter = ascii_byte("delimiter", self.delimiter)?;
        let quote = ascii_byte("quote", self.quote)?;
        if delimiter == quote {
            return Err(PipelineError::config(format!(
                "delimiter and quote must differ (both '{}')",
                self.delimiter
            )));
        }
        let comment = self.comment.map(|c| ascii_byte("comment", c)).transpose()?;

        let terminator = match self.line_separator.as_str() {
            "\r\n" => csv::Terminator::CRLF,
            "\n" => csv::Terminator::Any(b'\n'),
            "\r" => csv::Terminator::Any(b'\r'),
            other => {
                return Err(PipelineError::config(format!(
                    "unsupported line separator {other:?} (expected \"\\r\\n\", \"\\n\" or \"\\r\")"
                )));
            }
        };

        let encoding = Encoding::for_label(self.charset.trim().as_bytes()).ok_or_else(|| {
            PipelineError::config(format!("unknown charset '{}'", self.charset))
        })?;
        if !encoding.is_ascii_compatible() {
            return Err(PipelineError::config(format!(
                "charset '{}' is not ASCII-compatible",
                encoding.name()
            )));
        }

        if self.key_column_count == 0 {
            return Err(PipelineError::config("key_column_count must be >= 1"));
        }

        Ok(ParserSettings {
            delimiter,
            quote,
            comment,
            terminator,
            encoding,
            trim: self.trim,
        })
    }
}

/// Validated, byte-level form of a [`DialectConfig`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParserSettings {
    pub delimiter: u8,
    pub quote: u8,
    pub comment: Option<u8>,
    pub terminator: csv::Terminator,
    pub encoding: &'static Encoding,
    pub trim: bool,
}

impl ParserSettings {
    pub fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        // Width is checked against the header per row, so the parser must not reject it first.
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .quote(self.quote)
            .comment(self.comment)
            .terminator(self.terminator)
            .trim(if self.trim {
                csv::Trim::Fields
            } else {
                csv::Trim::None
            });
        builder
    }
}

fn ascii_byte(name: &str, c: char) -> PipelineResult<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(PipelineError::config(format!(
            "{name} must be a single-byte ASCII character, got '{c}'"
        )))
    }
}
