//! Error handling for daqlink
//!
//! Two layers live here:
//!
//! - [`ErrorCode`] - the stable numeric codes carried by memory transactions
//!   and reported through [`Master::get_error`](crate::memory::Master::get_error).
//! - [`DaqError`] - the rich error type returned by fallible Rust APIs
//!   (frame manipulation, device setup, configuration).
//!
//! Every `DaqError` maps onto exactly one `ErrorCode`, so a failure raised in
//! Rust code can be handed to a transaction with `transaction.done(err.code().into())`.

use std::fmt;
use thiserror::Error;

/// Stable transaction completion codes
///
/// The numeric values are part of the external interface and never change.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Transaction completed without error
    Success = 0,
    /// Unclassified memory error
    Generic = 1,
    /// Size or offset exceeds a container's capacity
    Boundary = 2,
    /// Size violates min/max access constraints
    Alignment = 3,
    /// Deadline passed before completion
    Timeout = 4,
    /// Address not covered by any mapping
    NoMapping = 5,
    /// Device closed
    Closed = 6,
    /// Decoded frame fails version/length checks
    Protocol = 7,
    /// Batcher super-frame inconsistent
    Truncated = 8,
    /// Pipeline torn down with pending work
    Shutdown = 9,
    /// Terminal I/O failure
    Io = 10,
}

impl ErrorCode {
    /// Decode a raw completion code. Unknown non-zero codes map to `Generic`.
    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => ErrorCode::Success,
            2 => ErrorCode::Boundary,
            3 => ErrorCode::Alignment,
            4 => ErrorCode::Timeout,
            5 => ErrorCode::NoMapping,
            6 => ErrorCode::Closed,
            7 => ErrorCode::Protocol,
            8 => ErrorCode::Truncated,
            9 => ErrorCode::Shutdown,
            10 => ErrorCode::Io,
            _ => ErrorCode::Generic,
        }
    }

    /// Raw value as carried by a transaction
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Success => "success",
            ErrorCode::Generic => "memory error",
            ErrorCode::Boundary => "boundary error",
            ErrorCode::Alignment => "alignment error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::NoMapping => "no mapping",
            ErrorCode::Closed => "device closed",
            ErrorCode::Protocol => "protocol error",
            ErrorCode::Truncated => "truncated frame",
            ErrorCode::Shutdown => "shutdown",
            ErrorCode::Io => "I/O error",
        };
        write!(f, "{} ({})", name, *self as u32)
    }
}

/// Main error type for daqlink operations
#[derive(Error, Debug)]
pub enum DaqError {
    /// A size or offset exceeded a container's capacity
    #[error("Boundary error in {location}: requested {requested}, limit {limit}")]
    Boundary {
        location: &'static str,
        requested: u64,
        limit: u64,
    },

    /// Transaction size violates the access constraints of the target
    #[error("Alignment error: size {size} with min access {min_access}, max access {max_access}")]
    Alignment {
        size: u32,
        min_access: u32,
        max_access: u32,
    },

    /// Transaction deadline passed
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Address range not covered by any mapping
    #[error("No mapping for address 0x{address:08X} size {size}")]
    NoMapping { address: u64, size: u32 },

    /// Device has been closed
    #[error("Device closed: {0}")]
    Closed(String),

    /// Frame failed protocol validation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Batcher super-frame is inconsistent
    #[error("Truncated frame: {0}")]
    Truncated(String),

    /// Pipeline torn down with work pending
    #[error("Shutdown: {0}")]
    Shutdown(String),

    /// Completion with a code that has no richer description
    #[error("Transaction failed: {0}")]
    Code(ErrorCode),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DaqError>,
    },
}

impl DaqError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DaqError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a boundary violation
    pub fn boundary(location: &'static str, requested: impl Into<u64>, limit: impl Into<u64>) -> Self {
        DaqError::Boundary {
            location,
            requested: requested.into(),
            limit: limit.into(),
        }
    }

    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            DaqError::Boundary { .. } => ErrorCode::Boundary,
            DaqError::Alignment { .. } => ErrorCode::Alignment,
            DaqError::Timeout(_) => ErrorCode::Timeout,
            DaqError::NoMapping { .. } => ErrorCode::NoMapping,
            DaqError::Closed(_) => ErrorCode::Closed,
            DaqError::Protocol(_) => ErrorCode::Protocol,
            DaqError::Truncated(_) => ErrorCode::Truncated,
            DaqError::Shutdown(_) => ErrorCode::Shutdown,
            DaqError::Code(code) => *code,
            DaqError::Io(_) => ErrorCode::Io,
            DaqError::Config(_) | DaqError::Serialization(_) => ErrorCode::Generic,
            DaqError::WithContext { source, .. } => source.code(),
        }
    }

    /// Build an error from a failed transaction completion code.
    ///
    /// Returns `None` for [`ErrorCode::Success`].
    pub fn from_code(code: u32, address: u64, size: u32) -> Option<Self> {
        let err = match ErrorCode::from_u32(code) {
            ErrorCode::Success => return None,
            ErrorCode::Timeout => {
                DaqError::Timeout(format!("transaction at 0x{:08X} ({} bytes)", address, size))
            }
            ErrorCode::NoMapping => DaqError::NoMapping { address, size },
            ErrorCode::Shutdown => {
                DaqError::Shutdown(format!("transaction at 0x{:08X} abandoned", address))
            }
            other => DaqError::Code(other),
        };
        Some(err)
    }
}

/// Result type alias for daqlink operations
pub type Result<T> = std::result::Result<T, DaqError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| DaqError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DaqError::Io(e).with_context(f()))
    }
}
