//! Raw extract reader: delimited text files as typed row providers.
//!
//! [`open_extract`] validates cheaply (the file exists and is not empty) and
//! returns a lazy [`CsvExtract`]. The file is parsed only when the catalog
//! opens the provider: the header names the columns, a sample of leading
//! records fixes the column types, and the records then stream through in a
//! single pass.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use thiserror::Error;

use medallion_catalog::error::CatalogError;
use medallion_catalog::rows::{RowStream, RowsProvider};
use medallion_catalog::schema::{Column, Row, Schema};
use medallion_catalog::value::{DataType, Value};

/// Default number of records sampled for type inference.
pub const DEFAULT_SAMPLE_ROWS: usize = 100;

/// Errors raised while reading a raw extract. Every variant names the file.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The file does not exist or is not a regular file.
    #[error("extract {} not found", .path.display())]
    Missing {
        /// The offending file.
        path: PathBuf,
    },

    /// The file has zero length.
    #[error("extract {} is empty", .path.display())]
    Empty {
        /// The offending file.
        path: PathBuf,
    },

    /// The header or a record is malformed.
    #[error("malformed extract {}{}: {message}", .path.display(), .line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    Format {
        /// The offending file.
        path: PathBuf,
        /// One-based line of the bad record, when known.
        line: Option<u64>,
        /// What is wrong.
        message: String,
    },

    /// The file could not be read.
    #[error("failed to read extract {}", .path.display())]
    Io {
        /// The offending file.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// The file the error is about.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Missing { path }
            | Self::Empty { path }
            | Self::Format { path, .. }
            | Self::Io { path, .. } => path,
        }
    }

    /// Short machine-readable kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Missing { .. } => "extract_missing",
            Self::Empty { .. } | Self::Format { .. } => "extract_format",
            Self::Io { .. } => "extract_io",
        }
    }

    fn format(path: &Path, line: Option<u64>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            line,
            message: message.into(),
        }
    }

    fn from_csv(path: &Path, err: csv::Error) -> Self {
        let line = err.position().map(csv::Position::line);
        match err.into_kind() {
            csv::ErrorKind::Io(source) => Self::Io {
                path: path.to_path_buf(),
                source,
            },
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => Self::format(
                path,
                line,
                format!("record has {len} fields, header has {expected_len}"),
            ),
            csv::ErrorKind::Utf8 { err, .. } => Self::format(path, line, err.to_string()),
            other => Self::format(path, line, format!("{other:?}")),
        }
    }

    /// Wraps the error for the catalog's provider interface.
    #[must_use]
    pub fn into_catalog(self) -> CatalogError {
        CatalogError::provider(self.path().display().to_string(), self)
    }
}

/// Finds the [`ExtractError`] behind a catalog error, if there is one.
#[must_use]
pub fn extract_error(err: &CatalogError) -> Option<&ExtractError> {
    err.provider_source()
        .and_then(|source| source.downcast_ref::<ExtractError>())
}

/// Reader options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Records sampled for type inference.
    pub sample_rows: usize,
    /// Field delimiter.
    pub delimiter: u8,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            sample_rows: DEFAULT_SAMPLE_ROWS,
            delimiter: b',',
        }
    }
}

/// Validates that `path` names a non-empty file and returns a lazy provider.
///
/// # Errors
///
/// Returns [`ExtractError::Missing`] or [`ExtractError::Empty`].
pub fn open_extract(path: impl AsRef<Path>, options: ExtractOptions) -> Result<CsvExtract, ExtractError> {
    let path = path.as_ref();
    let meta = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Err(ExtractError::Missing { path: path.into() }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractError::Missing { path: path.into() });
        }
        Err(source) => {
            return Err(ExtractError::Io {
                path: path.into(),
                source,
            });
        }
    };
    if meta.len() == 0 {
        return Err(ExtractError::Empty { path: path.into() });
    }
    Ok(CsvExtract {
        path: path.to_path_buf(),
        size: meta.len(),
        options,
    })
}

/// A delimited text extract, not yet read.
#[derive(Debug, Clone)]
pub struct CsvExtract {
    path: PathBuf,
    size: u64,
    options: ExtractOptions,
}

impl CsvExtract {
    /// The file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes at validation time.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Reads the header and the type sample without streaming the rest.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Format`] for a malformed header or sample.
    pub fn inspect(&self) -> Result<Schema, ExtractError> {
        Ok(self.open_records()?.schema)
    }

    /// Parses the header and sample, returning the typed stream.
    ///
    /// # Errors
    ///
    /// See [`inspect`](Self::inspect).
    pub fn rows(&self) -> Result<ExtractRows, ExtractError> {
        self.open_records()
    }

    fn open_records(&self) -> Result<ExtractRows, ExtractError> {
        let file = File::open(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ExtractError::Missing {
                    path: self.path.clone(),
                }
            } else {
                ExtractError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;
        let mut reader = ReaderBuilder::new()
            .delimiter(self.options.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(file);

        let header = reader
            .headers()
            .map_err(|e| ExtractError::from_csv(&self.path, e))?
            .clone();
        let names = normalize_header(&self.path, &header)?;

        let mut records = reader.into_records();
        let mut sample = Vec::new();
        for result in records.by_ref().take(self.options.sample_rows.max(1)) {
            sample.push(result.map_err(|e| ExtractError::from_csv(&self.path, e))?);
        }

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let ty = infer_type(sample.iter().map(|r| r.get(idx).unwrap_or("")));
                Column::new(name, ty)
            })
            .collect();
        let schema = Schema::new(columns)
            .map_err(|e| ExtractError::format(&self.path, Some(1), e.to_string()))?;

        Ok(ExtractRows {
            path: self.path.clone(),
            schema,
            sample: sample.into_iter(),
            rest: records,
        })
    }
}

impl RowsProvider for CsvExtract {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(self: Box<Self>) -> medallion_catalog::Result<RowStream> {
        let rows = self.rows().map_err(ExtractError::into_catalog)?;
        let schema = rows.schema.clone();
        Ok(RowStream::new(
            schema,
            Box::new(rows.map(|r| r.map_err(ExtractError::into_catalog))),
        ))
    }
}

/// Typed single-pass iterator over an extract's records.
pub struct ExtractRows {
    path: PathBuf,
    schema: Schema,
    sample: std::vec::IntoIter<StringRecord>,
    rest: StringRecordsIntoIter<File>,
}

impl ExtractRows {
    /// The inferred schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn convert(&self, record: &StringRecord) -> Result<Row, ExtractError> {
        let line = record.position().map(csv::Position::line);
        self.schema
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                Value::parse_as(record.get(idx).unwrap_or(""), column.data_type, &column.name)
                    .map_err(|e| ExtractError::format(&self.path, line, e.to_string()))
            })
            .collect()
    }
}

impl Iterator for ExtractRows {
    type Item = Result<Row, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.sample.next() {
            return Some(self.convert(&record));
        }
        let record = match self.rest.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(ExtractError::from_csv(&self.path, e))),
        };
        Some(self.convert(&record))
    }
}

impl std::fmt::Debug for ExtractRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractRows")
            .field("path", &self.path)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Normalizes header names: trimmed, lowercase, every other character
/// than `a-z`, `0-9` and `_` replaced by `_`.
pub fn normalize_column_name(raw: &str) -> String {
    let raw = raw.trim().trim_start_matches('\u{feff}');
    let mut name: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, 'c');
        name.insert(1, '_');
    }
    name
}

fn normalize_header(path: &Path, header: &StringRecord) -> Result<Vec<String>, ExtractError> {
    if header.is_empty() || header.iter().all(|h| h.trim().is_empty()) {
        return Err(ExtractError::format(path, Some(1), "missing header row"));
    }
    let mut names: Vec<String> = Vec::with_capacity(header.len());
    for (idx, raw) in header.iter().enumerate() {
        let name = normalize_column_name(raw);
        if name.is_empty() {
            return Err(ExtractError::format(
                path,
                Some(1),
                format!("header column {} is blank", idx + 1),
            ));
        }
        if names.contains(&name) {
            return Err(ExtractError::format(
                path,
                Some(1),
                format!("duplicate header column {name}"),
            ));
        }
        names.push(name);
    }
    Ok(names)
}

/// Infers a column type from sampled raw values.
///
/// Empty values are ignored. The narrowest type every remaining value parses
/// as wins, in the order boolean (`true`/`false` only), integer, float,
/// date; anything else, and an all-empty sample, is a string.
pub fn infer_type<'a>(values: impl Iterator<Item = &'a str>) -> DataType {
    let mut boolean = true;
    let mut integer = true;
    let mut float = true;
    let mut date = true;
    let mut seen = false;

    for raw in values {
        let text = raw.trim();
        if text.is_empty() {
            continue;
        }
        seen = true;
        boolean &= text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false");
        integer &= text.parse::<i64>().is_ok();
        float &= text.parse::<f64>().is_ok_and(f64::is_finite);
        date &= NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok();
        if !(boolean || integer || float || date) {
            return DataType::String;
        }
    }

    match (seen, boolean, integer, float, date) {
        (false, ..) => DataType::String,
        (_, true, ..) => DataType::Boolean,
        (_, _, true, ..) => DataType::Integer,
        (_, _, _, true, _) => DataType::Float,
        (_, _, _, _, true) => DataType::Date,
        _ => DataType::String,
    }
}
