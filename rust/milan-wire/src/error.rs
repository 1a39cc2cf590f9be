//! Closed error taxonomy transported as `(class_name, message)` pairs.
//!
//! Every public blocking operation in the framework either returns
//! normally or fails with a member of this taxonomy. The kind travels on
//! the wire as a portable string; the receiving side reconstructs the
//! error from that name. Unknown names fold into [`ErrorKind::Unknown`]
//! so that a newer peer never crashes an older one.

use std::fmt;

/// The closed set of error kinds understood by both ends of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unclassified failure.
    Unknown,
    /// The operation was cancelled through its context.
    Cancelled,
    /// Structural disagreement: type hash, class name, or framing.
    DataMismatch,
    /// A context deadline fired before the operation completed.
    DeadlineExceeded,
    /// The stream ended cleanly.
    Eof,
    /// A caller-supplied value was rejected.
    InvalidArgument,
    /// The object was not in a state that allows the operation.
    InvalidState,
    /// Unrecoverable error while performing I/O.
    Io,
    /// The operation is not implemented by the callee.
    NotImplemented,
    /// No entry found for the requested key.
    NotFound,
    /// An index or size was out of range.
    OutOfRange,
    /// The component is shutting down and refuses new work.
    ShuttingDown,
    /// A non-blocking variant would have had to block.
    TryAgain,
}

impl ErrorKind {
    /// Portable class name used on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            ErrorKind::Unknown => "unknown_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DataMismatch => "data_mismatch",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Eof => "eof",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Io => "io_error",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::NotFound => "not_found",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::ShuttingDown => "shutting_down",
            ErrorKind::TryAgain => "try_again",
        }
    }

    /// Resolve a portable class name back to a kind.
    pub fn from_wire_name(name: &str) -> Option<ErrorKind> {
        Some(match name {
            "unknown_error" => ErrorKind::Unknown,
            "cancelled" => ErrorKind::Cancelled,
            "data_mismatch" => ErrorKind::DataMismatch,
            "deadline_exceeded" => ErrorKind::DeadlineExceeded,
            "eof" => ErrorKind::Eof,
            "invalid_argument" => ErrorKind::InvalidArgument,
            "invalid_state" => ErrorKind::InvalidState,
            "io_error" => ErrorKind::Io,
            "not_implemented" => ErrorKind::NotImplemented,
            "not_found" => ErrorKind::NotFound,
            "out_of_range" => ErrorKind::OutOfRange,
            "shutting_down" => ErrorKind::ShuttingDown,
            "try_again" => ErrorKind::TryAgain,
            _ => return None,
        })
    }

    /// All kinds, in wire-name order. Used by tests and tooling.
    pub fn all() -> &'static [ErrorKind] {
        &[
            ErrorKind::Unknown,
            ErrorKind::Cancelled,
            ErrorKind::DataMismatch,
            ErrorKind::DeadlineExceeded,
            ErrorKind::Eof,
            ErrorKind::InvalidArgument,
            ErrorKind::InvalidState,
            ErrorKind::Io,
            ErrorKind::NotImplemented,
            ErrorKind::NotFound,
            ErrorKind::OutOfRange,
            ErrorKind::ShuttingDown,
            ErrorKind::TryAgain,
        ]
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// An error of the closed taxonomy, with a free-form message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Reconstruct an error from its wire form. An unrecognized class
    /// name yields `Unknown` with the name preserved in the message.
    pub fn from_wire(class_name: &str, message: &str) -> Self {
        match ErrorKind::from_wire_name(class_name) {
            Some(kind) => Error::new(kind, message),
            None => Error::new(
                ErrorKind::Unknown,
                format!("{} ({})", message, class_name),
            ),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Unknown, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Cancelled, message)
    }

    pub fn data_mismatch(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::DataMismatch, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::DeadlineExceeded, message)
    }

    pub fn eof(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Eof, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidArgument, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidState, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Io, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotImplemented, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::OutOfRange, message)
    }

    pub fn shutting_down(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::ShuttingDown, message)
    }

    pub fn try_again(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::TryAgain, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.wire_name(), self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::eof(e.to_string()),
            _ => Error::io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
