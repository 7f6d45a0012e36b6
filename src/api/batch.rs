//! Batch PK read shapes.

use serde::{Deserialize, Serialize};

use crate::api::pk_read::{PkReadBody, PkReadParams, PkReadResponse};
use crate::operation::ReadRequest;
use crate::pipeline::BatchResult;
use crate::status::RdrsError;
use crate::validation::{parse_relative_url, validate_batch_size, ValidationLimits};

/// Only method accepted for a sub-operation.
const SUB_OP_METHOD: &str = "POST";

/// One sub-operation of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSubOp {
    /// HTTP method; must be `POST`.
    pub method: String,
    /// `db/table/pk-read`, optionally with a leading `/`.
    #[serde(rename = "relative-url", alias = "relativeUrl")]
    pub relative_url: String,
    /// PK read body.
    pub body: PkReadBody,
}

impl BatchSubOp {
    /// Build a `POST db/table/pk-read` sub-operation
    pub fn pk_read(db: &str, table: &str, body: PkReadBody) -> Self {
        Self {
            method: SUB_OP_METHOD.to_string(),
            relative_url: format!("{db}/{table}/pk-read"),
            body,
        }
    }

    /// Check the method and URL and convert to a pipeline request.
    pub fn to_request(&self) -> Result<ReadRequest, RdrsError> {
        if self.method != SUB_OP_METHOD {
            return Err(RdrsError::Validation(format!(
                "unsupported method {}. Only {SUB_OP_METHOD} is supported",
                self.method
            )));
        }
        let (db, table) = parse_relative_url(&self.relative_url)?;
        Ok(PkReadParams::new(db, table, self.body.clone()).to_request())
    }
}

/// A batch of PK reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOpRequest {
    /// Sub-operations, answered in the same order.
    #[serde(default)]
    pub operations: Vec<BatchSubOp>,
}

impl BatchOpRequest {
    /// Convert every sub-operation; the first bad one fails the batch.
    pub fn to_requests(&self, limits: &ValidationLimits) -> Result<Vec<ReadRequest>, RdrsError> {
        validate_batch_size(self.operations.len(), limits)?;
        self.operations.iter().map(BatchSubOp::to_request).collect()
    }
}

/// One entry of a batch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSubResponse {
    /// Status of this sub-operation.
    pub code: i32,
    /// Result body.
    pub body: PkReadResponse,
}

/// JSON body of a batch result, index-aligned with the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOpResponse {
    /// One entry per sub-operation.
    pub result: Vec<BatchSubResponse>,
}

impl From<&BatchResult> for BatchOpResponse {
    fn from(batch: &BatchResult) -> Self {
        Self {
            result: batch
                .responses
                .iter()
                .map(|resp| BatchSubResponse {
                    code: resp.status,
                    body: PkReadResponse::from(resp),
                })
                .collect(),
        }
    }
}
