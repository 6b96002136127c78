//! Error types and the signed status codes exposed to foreign callers.

use crate::transport::TransportError;
use crate::types::{DeviceStatus, WriteStatus};

/// Crate-level error type.
///
/// Every variant maps to a negative status code via [`Error::code`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad caller input, rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The device lacks the capability required for this point format.
    #[error("unsupported format: device does not support higher resolution points")]
    UnsupportedFormat,

    /// A frame is already in flight; retry once the device reports ready.
    #[error("busy: a frame is already streaming")]
    Busy,

    /// The session is not connected yet or the device is still initializing.
    #[error("not ready: device is not connected or still initializing")]
    NotReady,

    /// The index does not refer to a device in the current registry.
    #[error("device {index} not found ({len} devices)")]
    NotFound { index: usize, len: usize },

    /// The transport could not be claimed.
    #[error("failed to open device: {0}")]
    Open(#[source] TransportError),

    /// The device disconnected or violated the protocol.
    #[error("transport failure: {0}")]
    Transport(#[source] TransportError),

    /// The session faulted earlier; only `close()` is accepted.
    #[error("session faulted")]
    SessionFaulted,

    /// The session was closed.
    #[error("session closed")]
    SessionClosed,

    /// No transport subsystem could be initialized.
    #[error("no transport available: {0}")]
    NoTransport(String),
}

impl Error {
    /// Create an invalid argument error with a message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a no-transport error with a message.
    pub fn no_transport(msg: impl Into<String>) -> Self {
        Error::NoTransport(msg.into())
    }

    /// Returns true if this is a Busy error.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy)
    }

    /// Returns true if this is a NotFound error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true if the caller may retry the same call later unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy | Error::NotReady)
    }

    /// Signed status code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::NoTransport(_) => status::NO_TRANSPORT,
            Error::NotFound { .. } => status::NOT_FOUND,
            Error::InvalidArgument(_) => status::INVALID_ARGUMENT,
            Error::UnsupportedFormat => status::UNSUPPORTED_FORMAT,
            Error::Busy => status::BUSY,
            Error::NotReady => status::NOT_READY,
            Error::Transport(_) => status::TRANSPORT_FAILURE,
            Error::SessionFaulted => status::SESSION_FAULTED,
            Error::SessionClosed => status::SESSION_CLOSED,
            Error::Open(_) => status::OPEN_FAILED,
        }
    }
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Signed status codes: zero or positive is success (or a count), negative is an error.
pub mod status {
    /// Operation succeeded.
    pub const SUCCESS: i32 = 1;
    /// Frame was empty and nothing was sent.
    pub const NO_OP: i32 = 0;

    /// Live status: ready for the next frame.
    pub const READY: i32 = 1;
    /// Live status: still playing the previous frame.
    pub const BUSY_STATUS: i32 = 0;
    /// Live status: device has not finished initializing.
    pub const INITIALIZING: i32 = 2;

    pub const NO_TRANSPORT: i32 = -1;
    pub const NOT_FOUND: i32 = -2;
    pub const INVALID_ARGUMENT: i32 = -3;
    pub const UNSUPPORTED_FORMAT: i32 = -4;
    pub const BUSY: i32 = -5;
    pub const NOT_READY: i32 = -6;
    pub const TRANSPORT_FAILURE: i32 = -7;
    pub const SESSION_FAULTED: i32 = -8;
    pub const SESSION_CLOSED: i32 = -9;
    pub const OPEN_FAILED: i32 = -10;
}

/// Conversion of an operation result into its signed status code.
pub trait StatusCode {
    fn status_code(&self) -> i32;
}

impl StatusCode for WriteStatus {
    fn status_code(&self) -> i32 {
        match self {
            WriteStatus::Written => status::SUCCESS,
            WriteStatus::NoOp => status::NO_OP,
        }
    }
}

impl StatusCode for DeviceStatus {
    fn status_code(&self) -> i32 {
        match self {
            DeviceStatus::Ready => status::READY,
            DeviceStatus::Busy => status::BUSY_STATUS,
            DeviceStatus::Initializing => status::INITIALIZING,
        }
    }
}

impl StatusCode for () {
    fn status_code(&self) -> i32 {
        status::SUCCESS
    }
}

impl StatusCode for usize {
    fn status_code(&self) -> i32 {
        i32::try_from(*self).unwrap_or(i32::MAX)
    }
}

impl StatusCode for bool {
    fn status_code(&self) -> i32 {
        i32::from(*self)
    }
}

impl StatusCode for u32 {
    fn status_code(&self) -> i32 {
        i32::try_from(*self).unwrap_or(i32::MAX)
    }
}

impl<T: StatusCode> StatusCode for Result<T> {
    fn status_code(&self) -> i32 {
        match self {
            Ok(value) => value.status_code(),
            Err(err) => err.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_negative_and_distinct() {
        let errors = [
            Error::no_transport("none"),
            Error::NotFound { index: 3, len: 1 },
            Error::invalid_argument("bad"),
            Error::UnsupportedFormat,
            Error::Busy,
            Error::NotReady,
            Error::Transport(TransportError::disconnected("gone")),
            Error::SessionFaulted,
            Error::SessionClosed,
            Error::Open(TransportError::InUse),
        ];
        let mut codes: Vec<i32> = errors.iter().map(Error::code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_result_status_code() {
        let written: Result<WriteStatus> = Ok(WriteStatus::Written);
        let noop: Result<WriteStatus> = Ok(WriteStatus::NoOp);
        let busy: Result<WriteStatus> = Err(Error::Busy);
        assert_eq!(written.status_code(), status::SUCCESS);
        assert_eq!(noop.status_code(), status::NO_OP);
        assert_eq!(busy.status_code(), status::BUSY);

        let count: Result<usize> = Ok(3);
        assert_eq!(count.status_code(), 3);

        let initializing: Result<DeviceStatus> = Ok(DeviceStatus::Initializing);
        assert_eq!(initializing.status_code(), status::INITIALIZING);
        assert_ne!(status::INITIALIZING, status::BUSY_STATUS);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Busy.is_retryable());
        assert!(Error::NotReady.is_retryable());
        assert!(!Error::SessionFaulted.is_retryable());
        assert!(!Error::UnsupportedFormat.is_retryable());
    }
}
