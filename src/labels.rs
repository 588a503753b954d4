//! Class-name vocabulary read once at startup from a CSV file with a `Label` column.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

/// Column holding class names in the label source.
pub const LABEL_COLUMN: &str = "Label";

/// Returned for prediction indices the table does not cover.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(thiserror::Error, Debug)]
pub enum LabelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Label source is empty, expected a header row")]
    MissingHeader,
    #[error("Label source has no `{0}` column")]
    MissingColumn(String),
    #[error("Malformed label source at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Ordered, de-duplicated labels. Position `i` names model output `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn load(path: &Path) -> Result<Self, LabelError> {
        tracing::info!(path = %path.display(), "loading label table");
        let file = std::fs::File::open(path)?;
        let table = Self::from_reader(file)?;
        tracing::info!(labels = table.len(), "label table loaded");
        Ok(table)
    }

    /// Scans the `Label` column, keeping the first occurrence of each value.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LabelError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = reader.headers()?;
        if headers.is_empty() {
            return Err(LabelError::MissingHeader);
        }
        let column = headers
            .iter()
            .position(|name| name == LABEL_COLUMN)
            .ok_or_else(|| LabelError::MissingColumn(LABEL_COLUMN.to_string()))?;

        let mut seen = HashSet::new();
        let mut labels = Vec::new();
        for record in reader.records() {
            let record = record?;
            let Some(label) = record.get(column) else {
                return Err(LabelError::Malformed {
                    line: record.position().map_or(0, |p| p.line() as usize),
                    reason: format!(
                        "expected at least {} fields, found {}",
                        column + 1,
                        record.len()
                    ),
                });
            };
            if seen.insert(label.to_string()) {
                labels.push(label.to_string());
            }
        }

        Ok(Self { labels })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Like [`get`](Self::get), but out-of-range indices map to [`UNKNOWN_LABEL`].
    pub fn resolve(&self, index: usize) -> &str {
        self.get(index).unwrap_or(UNKNOWN_LABEL)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
    /// Builds a table directly, applying the same first-seen de-duplication.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let labels = iter
            .into_iter()
            .map(Into::into)
            .filter(|label: &String| seen.insert(label.clone()))
            .collect();
        Self { labels }
    }
}
