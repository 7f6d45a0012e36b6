//! Primary-key read operations and their decoded results.

use std::collections::BTreeMap;

use crate::codec::DataType;
use crate::status::http;

/// One primary-key column and the raw value to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkFilter {
    /// Primary-key column name.
    pub column: String,
    /// Raw value as received, optionally a quoted and escaped string literal.
    pub value: String,
}

impl PkFilter {
    /// Create a filter
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Column to return, with an optional return-type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadColumn {
    /// Column name.
    pub column: String,
    /// Return type name; `None` means the default pass-through type.
    pub return_type: Option<String>,
}

impl ReadColumn {
    /// Read a column with the default return type
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            return_type: None,
        }
    }

    /// Set the return type name
    pub fn with_return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = Some(return_type.into());
        self
    }
}

/// A single primary-key lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadRequest {
    /// Database name.
    pub database: String,
    /// Table name.
    pub table: String,
    /// Primary-key filters, in request order.
    pub filters: Vec<PkFilter>,
    /// Columns to read; `None` reads every non-key column.
    pub read_columns: Option<Vec<ReadColumn>>,
    /// Caller supplied id echoed in the response.
    pub operation_id: Option<String>,
}

impl ReadRequest {
    /// Create a lookup against `database.table`
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            ..Self::default()
        }
    }

    /// Add a primary-key filter
    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(PkFilter::new(column, value));
        self
    }

    /// Add a column to read
    pub fn with_read_column(mut self, column: ReadColumn) -> Self {
        self.read_columns.get_or_insert_with(Vec::new).push(column);
        self
    }

    /// Set the operation id
    pub fn with_operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }
}

/// A decoded column value. `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnValue {
    /// Value text as produced by the engine.
    pub value: Option<String>,
    /// Engine data type tag.
    pub data_type: DataType,
}

/// Result of one primary-key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    /// Echoed operation id.
    pub operation_id: Option<String>,
    /// HTTP-style status of the lookup.
    pub status: i32,
    /// Columns by name.
    pub columns: BTreeMap<String, ColumnValue>,
}

impl Default for ReadResponse {
    fn default() -> Self {
        Self {
            operation_id: None,
            status: http::OK,
            columns: BTreeMap::new(),
        }
    }
}

impl ReadResponse {
    /// Empty response with a status
    pub fn with_status(status: i32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Whether the row was found
    pub fn is_found(&self) -> bool {
        self.status == http::OK
    }

    /// Look up a column value; the outer `None` means the column is absent.
    pub fn column(&self, name: &str) -> Option<Option<&str>> {
        self.columns.get(name).map(|c| c.value.as_deref())
    }

    pub(crate) fn set_column(&mut self, name: String, value: Option<String>, data_type: DataType) {
        self.columns.insert(name, ColumnValue { value, data_type });
    }
}
