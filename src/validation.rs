//! Structural checks run before authorization and encoding.
//!
//! Nothing in here touches a buffer or the engine; every failure is a
//! [`RdrsError::Validation`] carrying a caller-facing message.

use std::collections::HashSet;

use crate::constants::MAX_IDENTIFIER_LEN;
use crate::operation::ReadRequest;
use crate::status::RdrsError;

/// Operation name accepted in a batch sub-operation URL.
pub const PK_READ_OPERATION: &str = "pk-read";

/// Size limits applied by the validation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    /// Longest accepted operation id, in bytes.
    pub operation_id_max_size: usize,
    /// Most primary-key filters per read.
    pub max_filters: usize,
    /// Most read columns per read.
    pub max_read_columns: usize,
    /// Most sub-operations per batch.
    pub batch_max_operations: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            operation_id_max_size: 256,
            max_filters: 4096,
            max_read_columns: 4096,
            batch_max_operations: 4096,
        }
    }
}

fn invalid(msg: impl Into<String>) -> RdrsError {
    RdrsError::Validation(msg.into())
}

/// Check a database, table or column name.
///
/// Names are 1 to 64 bytes of code points in U+0001..U+FFFF.
pub fn validate_identifier(identifier: &str) -> Result<(), RdrsError> {
    if identifier.is_empty() {
        return Err(invalid("identifier is empty"));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid(format!("identifier is too large: {identifier}")));
    }
    if let Some(c) = identifier
        .chars()
        .find(|c| !matches!(*c as u32, 0x0001..=0x007F | 0x0080..=0xFFFF))
    {
        return Err(invalid(format!(
            "identifier carries an invalid character 'U+{:04X}'",
            c as u32
        )));
    }
    Ok(())
}

/// Check the operation id length.
pub fn validate_operation_id(op_id: Option<&str>, max_size: usize) -> Result<(), RdrsError> {
    match op_id {
        Some(id) if id.len() > max_size => {
            Err(invalid(format!("max allowed length is {max_size}")))
        }
        _ => Ok(()),
    }
}

/// Run every structural check on a single read.
pub fn validate_read_request(
    request: &ReadRequest,
    limits: &ValidationLimits,
) -> Result<(), RdrsError> {
    validate_identifier(&request.database)
        .map_err(|e| invalid(format!("db name is invalid; error: {e}")))?;
    validate_identifier(&request.table)
        .map_err(|e| invalid(format!("table name is invalid; error: {e}")))?;

    if request.filters.is_empty() {
        return Err(invalid("at least one filter is required"));
    }
    if request.filters.len() > limits.max_filters {
        return Err(invalid(format!(
            "too many filters: {} > {}",
            request.filters.len(),
            limits.max_filters
        )));
    }

    let mut filter_columns = HashSet::with_capacity(request.filters.len());
    for filter in &request.filters {
        validate_identifier(&filter.column)
            .map_err(|e| invalid(format!("filter column name is invalid; error: {e}")))?;
        if !filter_columns.insert(filter.column.as_str()) {
            return Err(invalid(format!(
                "field validation for filter failed on the 'unique' tag. Column: {}",
                filter.column
            )));
        }
    }

    if let Some(columns) = &request.read_columns {
        if columns.is_empty() {
            return Err(invalid("read columns must not be empty when present"));
        }
        if columns.len() > limits.max_read_columns {
            return Err(invalid(format!(
                "too many read columns: {} > {}",
                columns.len(),
                limits.max_read_columns
            )));
        }

        let mut read_columns = HashSet::with_capacity(columns.len());
        for col in columns {
            validate_identifier(&col.column)
                .map_err(|e| invalid(format!("read column name is invalid; error: {e}")))?;
            if filter_columns.contains(col.column.as_str()) {
                return Err(invalid(format!(
                    "field validation for read columns failed. '{}' already included in filter",
                    col.column
                )));
            }
            if !read_columns.insert(col.column.as_str()) {
                return Err(invalid(
                    "field validation for 'ReadColumns' failed on the 'unique' tag",
                ));
            }
        }
    }

    validate_operation_id(request.operation_id.as_deref(), limits.operation_id_max_size)
}

/// Check the number of sub-operations in a batch.
pub fn validate_batch_size(count: usize, limits: &ValidationLimits) -> Result<(), RdrsError> {
    if count == 0 {
        return Err(invalid("No valid operations found"));
    }
    if count > limits.batch_max_operations {
        return Err(invalid(format!(
            "too many operations: {count} > {}",
            limits.batch_max_operations
        )));
    }
    Ok(())
}

/// Split `db/table/pk-read` into its database and table.
///
/// A single leading `/` is accepted.
pub fn parse_relative_url(url: &str) -> Result<(String, String), RdrsError> {
    let trimmed = url.strip_prefix('/').unwrap_or(url);
    let parts: Vec<&str> = trimmed.split('/').collect();
    match parts.as_slice() {
        [db, table, op] if !db.is_empty() && !table.is_empty() && !op.is_empty() => {
            if *op != PK_READ_OPERATION {
                return Err(invalid(format!(
                    "invalid relative URL: {url}. Unsupported operation: {op}"
                )));
            }
            Ok(((*db).to_string(), (*table).to_string()))
        }
        _ => Err(invalid(format!(
            "invalid relative URL: {url}. Expected format: db/table/{PK_READ_OPERATION}"
        ))),
    }
}
