//! Status codes, native engine status and the pipeline error taxonomy.
//!
//! The native engine reports HTTP-style integer codes. Inside the crate those
//! codes are folded into the closed [`ErrorKind`] set; the integers only come
//! back at the edges through [`ErrorKind::http_status`] and [`GrpcCode`].

use std::fmt;

use crate::buffer_pool::PoolError;
use crate::codec::CodecError;

/// HTTP-style status codes shared with the native engine.
pub mod http {
    /// Request succeeded.
    pub const OK: i32 = 200;
    /// Malformed request.
    pub const BAD_REQUEST: i32 = 400;
    /// Missing or rejected credential.
    pub const UNAUTHORIZED: i32 = 401;
    /// Row not found.
    pub const NOT_FOUND: i32 = 404;
    /// Internal failure.
    pub const INTERNAL_SERVER_ERROR: i32 = 500;
    /// Engine temporarily unavailable (e.g. reconnecting).
    pub const SERVICE_UNAVAILABLE: i32 = 503;
}

/// Status returned across the native engine boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeStatus {
    /// HTTP-style status code.
    pub code: i32,
    /// Human readable message.
    pub message: String,
    /// Source file in the engine that produced the status.
    pub source_file: String,
    /// Source line in the engine that produced the status.
    pub source_line: u32,
}

impl NativeStatus {
    /// Successful status.
    pub fn ok() -> Self {
        Self::new(http::OK, "")
    }

    /// Status with a code and message and no source location.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source_file: String::new(),
            source_line: 0,
        }
    }

    /// Attach the engine source location.
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.source_file = file.into();
        self.source_line = line;
        self
    }

    /// Check if the status indicates success
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == http::OK
    }

    /// Check if the row was not found
    #[inline]
    pub fn is_not_found(&self) -> bool {
        self.code == http::NOT_FOUND
    }

    /// Whether the caller may retry the same request later.
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.code == http::SERVICE_UNAVAILABLE
    }

    /// Message with the engine source location appended.
    pub fn verbose(&self) -> String {
        format!(
            "{}; File: {}, Line: {} ",
            self.message, self.source_file, self.source_line
        )
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code >= http::INTERNAL_SERVER_ERROR {
            write!(f, "{}", self.verbose())
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Closed set of failure classes produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// Malformed identifiers, duplicate columns, oversized batches.
    Validation = 0,
    /// A request did not fit its native buffer.
    Resource = 1,
    /// A response buffer failed its sanity checks.
    Corruption = 2,
    /// The native engine returned a non-OK status.
    Native = 3,
    /// Credential format or access denial.
    Unauthorized = 4,
    /// The pool or another component was used outside its lifecycle.
    Configuration = 5,
}

impl ErrorKind {
    /// Every kind, in discriminant order
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Validation,
        ErrorKind::Resource,
        ErrorKind::Corruption,
        ErrorKind::Native,
        ErrorKind::Unauthorized,
        ErrorKind::Configuration,
    ];

    /// Get the kind as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation",
            ErrorKind::Resource => "Resource",
            ErrorKind::Corruption => "Corruption",
            ErrorKind::Native => "Native",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Configuration => "Configuration",
        }
    }

    /// Default HTTP status for the kind. Native errors carry their own code.
    pub const fn http_status(&self) -> i32 {
        match self {
            ErrorKind::Validation => http::BAD_REQUEST,
            ErrorKind::Unauthorized => http::UNAUTHORIZED,
            ErrorKind::Resource
            | ErrorKind::Corruption
            | ErrorKind::Native
            | ErrorKind::Configuration => http::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// RPC status codes used by the gRPC flavour of the public protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcCode {
    /// Success
    Ok,
    /// Malformed request
    InvalidArgument,
    /// Row not found
    NotFound,
    /// Credential rejected
    PermissionDenied,
    /// Anything else
    Internal,
}

impl GrpcCode {
    /// Map an HTTP-style status to an RPC code.
    pub const fn from_http(status: i32) -> Self {
        match status {
            http::OK => GrpcCode::Ok,
            http::UNAUTHORIZED => GrpcCode::PermissionDenied,
            http::BAD_REQUEST => GrpcCode::InvalidArgument,
            http::NOT_FOUND => GrpcCode::NotFound,
            _ => GrpcCode::Internal,
        }
    }

    /// Map an RPC code back to an HTTP-style status.
    pub const fn to_http(&self) -> i32 {
        match self {
            GrpcCode::Ok => http::OK,
            GrpcCode::PermissionDenied => http::UNAUTHORIZED,
            GrpcCode::InvalidArgument => http::BAD_REQUEST,
            GrpcCode::NotFound => http::NOT_FOUND,
            GrpcCode::Internal => http::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors returned by the read pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RdrsError {
    /// Request rejected before any buffer was touched.
    #[error("{0}")]
    Validation(String),
    /// Request did not fit the configured buffer size.
    #[error("{0}")]
    Resource(String),
    /// Response buffer failed a sanity check.
    #[error("{0}")]
    Corruption(String),
    /// Native engine reported a failure.
    #[error("{0}")]
    Native(NativeStatus),
    /// Credential rejected.
    #[error("{0}")]
    Unauthorized(String),
    /// Component used outside of its lifecycle.
    #[error("{0}")]
    Configuration(String),
}

impl RdrsError {
    /// Failure class of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            RdrsError::Validation(_) => ErrorKind::Validation,
            RdrsError::Resource(_) => ErrorKind::Resource,
            RdrsError::Corruption(_) => ErrorKind::Corruption,
            RdrsError::Native(_) => ErrorKind::Native,
            RdrsError::Unauthorized(_) => ErrorKind::Unauthorized,
            RdrsError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// HTTP-style status for the transport layer.
    pub fn http_status(&self) -> i32 {
        match self {
            RdrsError::Native(status) => status.code,
            other => other.kind().http_status(),
        }
    }

    /// RPC code for the transport layer.
    pub fn grpc_code(&self) -> GrpcCode {
        GrpcCode::from_http(self.http_status())
    }

    /// Full diagnostic text, including the engine source location.
    pub fn verbose(&self) -> String {
        match self {
            RdrsError::Native(status) => status.verbose(),
            other => other.to_string(),
        }
    }
}

impl From<NativeStatus> for RdrsError {
    fn from(status: NativeStatus) -> Self {
        RdrsError::Native(status)
    }
}

impl From<CodecError> for RdrsError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::CapacityExceeded { .. } => RdrsError::Resource(err.to_string()),
            CodecError::UnsupportedReturnType(_) | CodecError::InvalidValue(_) => {
                RdrsError::Validation(err.to_string())
            }
            CodecError::WrongOperationType { .. }
            | CodecError::BadLength { .. }
            | CodecError::OffsetOutOfBounds { .. }
            | CodecError::Unterminated { .. }
            | CodecError::InvalidUtf8 { .. } => RdrsError::Corruption(err.to_string()),
        }
    }
}

impl From<PoolError> for RdrsError {
    fn from(err: PoolError) -> Self {
        RdrsError::Configuration(err.to_string())
    }
}
