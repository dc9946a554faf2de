//! # Error Types
//!
//! Every fallible operation in rollo returns [`PrinterError`]. Each variant
//! belongs to exactly one [`ErrorKind`], which is what host bridges see as
//! the `(kind, message)` failure pair.

use serde::Serialize;
use thiserror::Error;

/// Main error type for printer operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrinterError {
    /// Radio or transport manager is missing or disabled
    #[error("Adapter not ready: {0}")]
    AdapterNotReady(String),

    /// USB consent refused, or still pending
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Requested device is not paired / enumerated
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Channel could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation requires a selected device
    #[error("Connection is not built, select a device first")]
    NotConnected,

    /// Image or QR matrix could not be produced
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Malformed caller input (bad base64, bad MAC, non-positive size)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Write or transfer error on an established channel
    #[error("I/O failure: {0}")]
    IoFailure(String),
}

/// Failure category reported across the host boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    AdapterNotReady,
    PermissionDenied,
    DeviceNotFound,
    ConnectionFailed,
    NotConnected,
    EncodingFailed,
    IoFailure,
}

impl ErrorKind {
    /// Stable string code for host bridges.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::AdapterNotReady => "ERR_ADAPTER_NOT_READY",
            ErrorKind::PermissionDenied => "ERR_PERMISSION",
            ErrorKind::DeviceNotFound => "ERR_NOT_FOUND",
            ErrorKind::ConnectionFailed => "ERR_CONNECT",
            ErrorKind::NotConnected => "ERR_NO_CONN",
            ErrorKind::EncodingFailed => "ERR_ENCODING",
            ErrorKind::IoFailure => "ERR_IO",
        }
    }
}

impl PrinterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrinterError::AdapterNotReady(_) => ErrorKind::AdapterNotReady,
            PrinterError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            PrinterError::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            PrinterError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            PrinterError::NotConnected => ErrorKind::NotConnected,
            PrinterError::EncodingFailed(_) | PrinterError::InvalidArgument(_) => {
                ErrorKind::EncodingFailed
            }
            PrinterError::IoFailure(_) => ErrorKind::IoFailure,
        }
    }

    /// Convert into the `(kind, message)` pair handed to a completion handler.
    pub fn into_failure(self) -> Failure {
        Failure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Boundary representation of a failed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<std::io::Error> for PrinterError {
    fn from(e: std::io::Error) -> Self {
        PrinterError::IoFailure(e.to_string())
    }
}

impl From<rusb::Error> for PrinterError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Access => PrinterError::PermissionDenied(e.to_string()),
            rusb::Error::NoDevice | rusb::Error::NotFound => {
                PrinterError::DeviceNotFound(e.to_string())
            }
            _ => PrinterError::IoFailure(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for PrinterError {
    fn from(e: tokio::task::JoinError) -> Self {
        PrinterError::IoFailure(format!("background task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_reports_as_encoding_failure() {
        let err = PrinterError::InvalidArgument("bad base64".into());
        assert_eq!(err.kind(), ErrorKind::EncodingFailed);
    }

    #[test]
    fn test_failure_pair() {
        let failure = PrinterError::NotConnected.into_failure();
        assert_eq!(failure.kind, ErrorKind::NotConnected);
        assert_eq!(failure.kind.code(), "ERR_NO_CONN");
        assert!(failure.message.contains("select a device"));
    }

    #[test]
    fn test_rusb_access_maps_to_permission() {
        let err: PrinterError = rusb::Error::Access.into();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        let err: PrinterError = rusb::Error::Timeout.into();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }
}
