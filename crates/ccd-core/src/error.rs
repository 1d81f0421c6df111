//! Error taxonomy for the acquisition core.
//!
//! Every fallible operation in the workspace returns [`CaptureError`]. The
//! variants map onto how the caller is expected to react:
//!
//! - **`TransientIo`** / **`ProtocolTimeout`**: bus or USB hiccups, and spin
//!   polls that ran past their iteration bound. Retried locally up to a bound.
//! - **`HardwareFailure`**: the device reported that the operation failed.
//!   Never retried, surfaced immediately.
//! - **`Configuration`**: invalid ROI, binning, format or control value.
//!   Rejected synchronously with no state change.
//! - **`ResourceExhausted`**: a buffer allocation failed. Only the in-flight
//!   operation is abandoned, the session keeps accepting commands.
//! - **`Busy`**, **`NotConnected`**, **`Unsupported`**: state and capability
//!   conflicts reported back to the caller.

use thiserror::Error;

/// Coarse classification of a [`CaptureError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientIo,
    HardwareFailure,
    Configuration,
    ResourceExhausted,
    ProtocolTimeout,
    Busy,
    NotConnected,
    Unsupported,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::HardwareFailure => "hardware_failure",
            ErrorKind::Configuration => "configuration",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::ProtocolTimeout => "protocol_timeout",
            ErrorKind::Busy => "busy",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}", label)
    }
}

/// Error type shared by the device capability and the capture core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// A device call failed in a way that may succeed on retry.
    #[error("transient I/O error during {operation}: {message}")]
    TransientIo {
        operation: &'static str,
        message: String,
    },

    /// The device reported that the operation itself failed.
    #[error("hardware reported failure: {0}")]
    HardwareFailure(String),

    /// Invalid request (ROI, binning, pixel format, control value, config).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A buffer could not be allocated.
    #[error("failed to allocate {bytes} bytes for {what}")]
    ResourceExhausted { what: &'static str, bytes: usize },

    /// A bounded wait ran out before the device answered.
    #[error("{operation} timed out after {waited_ms} ms")]
    ProtocolTimeout {
        operation: &'static str,
        waited_ms: u64,
    },

    /// The request conflicts with an operation already in progress.
    #[error("busy: {0}")]
    Busy(String),

    /// The device handle has been closed.
    #[error("device not connected")]
    NotConnected,

    /// The camera lacks the capability needed for the request.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl CaptureError {
    /// A retryable device error.
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        CaptureError::TransientIo {
            operation,
            message: message.into(),
        }
    }

    /// A rejected request or invalid setting.
    pub fn configuration(message: impl Into<String>) -> Self {
        CaptureError::Configuration(message.into())
    }

    /// Category of this error, without its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::TransientIo { .. } => ErrorKind::TransientIo,
            CaptureError::HardwareFailure(_) => ErrorKind::HardwareFailure,
            CaptureError::Configuration(_) => ErrorKind::Configuration,
            CaptureError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            CaptureError::ProtocolTimeout { .. } => ErrorKind::ProtocolTimeout,
            CaptureError::Busy(_) => ErrorKind::Busy,
            CaptureError::NotConnected => ErrorKind::NotConnected,
            CaptureError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// Whether a bounded retry is allowed. Protocol timeouts count as transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientIo | ErrorKind::ProtocolTimeout
        )
    }
}

/// Convenience alias for results using [`CaptureError`].
pub type Result<T> = std::result::Result<T, CaptureError>;
