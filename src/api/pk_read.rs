//! Single PK read shapes.

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Number, Value};

use crate::codec::DataType;
use crate::operation::{self, ReadRequest, ReadResponse};

/// One primary-key filter. `value` is any JSON value; strings keep their
/// quotes until the encoder strips them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Primary-key column name.
    pub column: String,
    /// Value to match.
    pub value: Value,
}

/// One column to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadColumn {
    /// Column name.
    pub column: String,
    /// Requested return type; only `default` is served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_return_type: Option<String>,
}

/// Body of a PK read, with the database and table taken from the path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkReadBody {
    /// Primary-key filters.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Columns to read; every non-key column when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_columns: Option<Vec<ReadColumn>>,
    /// Id echoed in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

/// A complete PK read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PkReadParams {
    /// Database name.
    pub db: String,
    /// Table name.
    pub table: String,
    /// Filters, read columns and operation id.
    #[serde(flatten)]
    pub body: PkReadBody,
}

impl PkReadParams {
    /// Combine path parameters with a body
    pub fn new(db: impl Into<String>, table: impl Into<String>, body: PkReadBody) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            body,
        }
    }

    /// Convert to the pipeline request. Filter values keep their JSON text.
    pub fn to_request(&self) -> ReadRequest {
        ReadRequest {
            database: self.db.clone(),
            table: self.table.clone(),
            filters: self
                .body
                .filters
                .iter()
                .map(|f| operation::PkFilter::new(f.column.clone(), f.value.to_string()))
                .collect(),
            read_columns: self.body.read_columns.as_ref().map(|cols| {
                cols.iter()
                    .map(|c| operation::ReadColumn {
                        column: c.column.clone(),
                        return_type: c.data_return_type.clone(),
                    })
                    .collect()
            }),
            operation_id: self.body.operation_id.clone(),
        }
    }
}

/// One column value of a PK read result.
///
/// Numbers keep the engine's text, so DECIMAL scale and integers past the
/// `u64` range are written out exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedValue {
    /// SQL NULL.
    Null,
    /// Numeric text, written unquoted and verbatim.
    Number(String),
    /// Any other value, written as a JSON string.
    Text(String),
}

impl RenderedValue {
    /// Numeric text or string contents; `None` for NULL.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RenderedValue::Null => None,
            RenderedValue::Number(s) | RenderedValue::Text(s) => Some(s),
        }
    }
}

impl Serialize for RenderedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RenderedValue::Null => serializer.serialize_none(),
            RenderedValue::Text(s) => serializer.serialize_str(s),
            RenderedValue::Number(n) => RawValue::from_string(n.clone())
                .map_err(S::Error::custom)?
                .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for RenderedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Null => RenderedValue::Null,
            Value::Number(n) => RenderedValue::Number(n.to_string()),
            Value::String(s) => RenderedValue::Text(s),
            other => RenderedValue::Text(other.to_string()),
        })
    }
}

/// Render one engine value: numbers unquoted, everything else as a string.
/// Values the engine escaped are unescaped on the way.
pub fn render_value(value: &str, data_type: DataType) -> RenderedValue {
    if data_type.is_numeric() && serde_json::from_str::<Number>(value).is_ok() {
        return RenderedValue::Number(value.trim().to_owned());
    }
    match serde_json::from_str::<String>(&format!("\"{value}\"")) {
        Ok(s) => RenderedValue::Text(s),
        Err(_) => RenderedValue::Text(value.to_owned()),
    }
}

/// JSON body of a PK read result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkReadResponse {
    /// Echoed operation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Column values; `null` for SQL NULL.
    #[serde(default)]
    pub data: BTreeMap<String, RenderedValue>,
}

impl From<&ReadResponse> for PkReadResponse {
    fn from(resp: &ReadResponse) -> Self {
        let data = resp
            .columns
            .iter()
            .map(|(name, col)| {
                let value = match &col.value {
                    Some(v) => render_value(v, col.data_type),
                    None => RenderedValue::Null,
                };
                (name.clone(), value)
            })
            .collect();
        Self {
            operation_id: resp.operation_id.clone(),
            data,
        }
    }
}
