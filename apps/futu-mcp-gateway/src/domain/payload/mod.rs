//! Vendor Payloads and Tool Results
//!
//! Every vendor call lands in one of three shapes, tagged explicitly by
//! [`VendorPayload`]. [`normalize`] folds a vendor outcome into the single
//! envelope callers see, [`ToolResult`].

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One flat row: column name to value.
pub type Record = Map<String, Value>;

// =============================================================================
// Columnar Table
// =============================================================================

/// Column-oriented table. Every column holds exactly `row_count` values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<(String, Vec<Value>)>,
    row_count: usize,
}

impl Table {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from rows. Columns appear in first-seen order; a row
    /// missing a column contributes `null`.
    #[must_use]
    pub fn from_records(records: &[Record]) -> Self {
        let mut table = Self::new();
        for record in records {
            table.push_record(record);
        }
        table
    }

    /// Append one row.
    pub fn push_record(&mut self, record: &Record) {
        for (key, value) in record {
            self.column_mut(key).push(value.clone());
        }
        self.row_count += 1;
        for (_, values) in &mut self.columns {
            values.resize(self.row_count, Value::Null);
        }
    }

    /// Number of rows.
    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Values of one column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Append `other` below `self`, column by column.
    ///
    /// Columns present on only one side are padded with `null`, so row order
    /// and row alignment are both preserved.
    pub fn concat(&mut self, other: Self) {
        let total = self.row_count + other.row_count;
        for (name, values) in other.columns {
            self.column_mut(&name).extend(values);
        }
        for (_, values) in &mut self.columns {
            if values.len() < total {
                // Column only existed on the left: pad the right-hand rows.
                values.resize(total, Value::Null);
            }
        }
        self.row_count = total;
    }

    /// Convert into rows.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        let mut records = vec![Record::new(); self.row_count];
        for (name, values) in self.columns {
            for (record, value) in records.iter_mut().zip(values) {
                record.insert(name.clone(), value);
            }
        }
        records
    }

    fn column_mut(&mut self, name: &str) -> &mut Vec<Value> {
        let index = match self.columns.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.columns
                    .push((name.to_string(), vec![Value::Null; self.row_count]));
                self.columns.len() - 1
            }
        };
        &mut self.columns[index].1
    }
}

// =============================================================================
// Vendor Payload
// =============================================================================

/// Shape of a successful vendor answer.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorPayload {
    /// Already a list of rows.
    Records(Vec<Record>),
    /// Column-oriented table.
    Table(Table),
    /// Anything else, kept as raw JSON.
    Opaque(Value),
}

impl VendorPayload {
    /// Fold into rows.
    ///
    /// Opaque values are coerced where their structure allows: an object of
    /// scalars becomes one row, an array of objects becomes one row each.
    /// Anything else is wrapped as `[{"data": raw}]`.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::Records(records) => records,
            Self::Table(table) => table.into_records(),
            Self::Opaque(raw) => coerce_opaque(raw),
        }
    }
}

fn coerce_opaque(raw: Value) -> Vec<Record> {
    match raw {
        Value::Object(map) if map.values().all(is_scalar) => vec![map],
        Value::Array(items) if items.iter().all(Value::is_object) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        other => {
            let mut wrapped = Record::new();
            wrapped.insert("data".to_string(), other);
            vec![wrapped]
        }
    }
}

const fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// A vendor call that came back with a failure return code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct VendorFailure {
    /// Vendor message, verbatim.
    pub message: String,
    /// Vendor error code, when one was supplied.
    pub code: Option<i64>,
}

impl VendorFailure {
    /// Failure without a vendor code.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Failure carrying a vendor code.
    #[must_use]
    pub fn with_code(message: impl Into<String>, code: i64) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

// =============================================================================
// Tool Result
// =============================================================================

/// Uniform envelope returned by every tool.
///
/// Serializes as an array of rows on success and as
/// `{"error": message, "code": n}` on failure (`code` omitted when absent).
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    /// Rows of the answer.
    Success(Vec<Record>),
    /// Failure with a message and optional vendor code.
    Error {
        /// Human-readable message.
        message: String,
        /// Vendor error code.
        code: Option<i64>,
    },
}

impl ToolResult {
    /// Failure without a code.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }

    /// Single-row success.
    #[must_use]
    pub fn single(record: Record) -> Self {
        Self::Success(vec![record])
    }

    /// Whether this is a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// JSON form of this result.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success(records) => {
                Value::Array(records.iter().cloned().map(Value::Object).collect())
            }
            Self::Error { message, code } => {
                let mut map = Record::new();
                map.insert("error".to_string(), Value::String(message.clone()));
                if let Some(code) = code {
                    map.insert("code".to_string(), Value::from(*code));
                }
                Value::Object(map)
            }
        }
    }
}

impl From<VendorFailure> for ToolResult {
    fn from(failure: VendorFailure) -> Self {
        Self::Error {
            message: failure.message,
            code: failure.code,
        }
    }
}

impl Serialize for ToolResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success(records) => records.serialize(serializer),
            Self::Error { message, code } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("error", message)?;
                if let Some(code) = code {
                    map.serialize_entry("code", code)?;
                }
                map.end()
            }
        }
    }
}

/// Fold a vendor outcome into a [`ToolResult`].
///
/// Failure keeps the vendor message verbatim. Success passes records through
/// unchanged, converts tables to rows and coerces opaque values.
#[must_use]
pub fn normalize(outcome: Result<VendorPayload, VendorFailure>) -> ToolResult {
    match outcome {
        Ok(payload) => ToolResult::Success(payload.into_records()),
        Err(failure) => failure.into(),
    }
}

// =============================================================================
// Pagination Cursor
// =============================================================================

/// Opaque continuation token handed back by a paginated vendor query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    /// Wrap a vendor token; empty or missing tokens mean "no more pages".
    #[must_use]
    pub fn from_vendor(token: Option<&str>) -> Option<Self> {
        token
            .filter(|t| !t.is_empty())
            .map(|t| Self(t.to_string()))
    }

    /// Raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tests
// =============================================================================
