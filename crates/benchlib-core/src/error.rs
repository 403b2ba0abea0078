//! Error types for benchlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport faults, protocol faults,
//! capability faults, and domain faults are all captured here so that a
//! caller can decide, per failure, whether to retry, ignore, or give up.
//!
//! None of these errors is fatal to the process, and a driver stays usable
//! after any single failed call.

use std::fmt;

/// The error type for all benchlib operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening a connection failed (port missing, connection refused,
    /// USB device absent).
    #[error("connection error: {0}")]
    Connection(String),

    /// A transport-level error that is not a timeout or disconnect.
    #[error("transport error: {0}")]
    Transport(String),

    /// Timed out waiting for a response from the instrument.
    ///
    /// Fails only the call that timed out; the session remains usable.
    #[error("timeout waiting for response")]
    Timeout,

    /// The connection is closed, was never opened, or was lost mid-exchange.
    #[error("disconnected")]
    Disconnected,

    /// The link reached end-of-stream before a complete response arrived.
    ///
    /// Some queries legitimately truncate on some hardware, so callers may
    /// treat this as benign. `partial` holds whatever arrived.
    #[error("incomplete response ({} bytes received)", .partial.len())]
    IncompleteResponse {
        /// Bytes received before the stream ended.
        partial: Vec<u8>,
    },

    /// The response did not have the expected shape.
    #[error("malformed response {payload:?}: {reason}")]
    MalformedResponse {
        /// The offending raw payload.
        payload: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The instrument reported an error in its error queue.
    #[error("device reported error {code}: {message}")]
    DeviceReportedError {
        /// Numeric error code (SCPI: negative for standard errors).
        code: i32,
        /// Error message text reported by the instrument.
        message: String,
    },

    /// The operation is not supported by this instrument or model.
    #[error("function not supported: {0}")]
    FunctionNotSupported(String),

    /// No channel with the given name, alias, or index exists.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// The session is executing another command and is configured to fail
    /// instead of waiting.
    #[error("session busy")]
    SessionBusy,

    /// A switch connection that the wiring topology cannot make.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// An invalid parameter was passed to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A resource string could not be parsed.
    #[error("invalid resource string {resource:?}: {reason}")]
    InvalidResource {
        /// The resource string as given.
        resource: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A failure that occurred while executing a specific command.
    ///
    /// The session attaches the command text so that diagnostics show what
    /// was on the wire. Use [`Error::kind`] to classify the underlying fault.
    #[error("{source} (command: {command:?})")]
    Command {
        /// The command text that was being executed.
        command: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
///
/// Mirrors the taxonomy callers branch on: transport faults, protocol
/// faults, capability faults, and domain faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Transport,
    Timeout,
    Disconnected,
    IncompleteResponse,
    MalformedResponse,
    DeviceReportedError,
    FunctionNotSupported,
    UnknownChannel,
    SessionBusy,
    InvalidTopology,
    InvalidParameter,
    InvalidResource,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Disconnected => "disconnected",
            ErrorKind::IncompleteResponse => "incomplete response",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::DeviceReportedError => "device reported error",
            ErrorKind::FunctionNotSupported => "function not supported",
            ErrorKind::UnknownChannel => "unknown channel",
            ErrorKind::SessionBusy => "session busy",
            ErrorKind::InvalidTopology => "invalid topology",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::InvalidResource => "invalid resource",
            ErrorKind::Io => "I/O",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Build a [`Error::FunctionNotSupported`] for the named operation.
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Error::FunctionNotSupported(operation.into())
    }

    /// Build a [`Error::MalformedResponse`] with the offending payload.
    pub fn malformed(payload: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedResponse {
            payload: payload.into(),
            reason: reason.into(),
        }
    }

    /// Attach the command text that was being executed.
    ///
    /// Already-wrapped errors are returned unchanged so the innermost
    /// command is the one reported.
    pub fn with_command(self, command: impl Into<String>) -> Self {
        match self {
            e @ Error::Command { .. } => e,
            e => Error::Command {
                command: command.into(),
                source: Box::new(e),
            },
        }
    }

    /// Return the error with any [`Error::Command`] context removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Command { source, .. } => source.root(),
            e => e,
        }
    }

    /// The command text attached to this error, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            Error::Command { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Classify this error, looking through command context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Command { source, .. } => source.kind(),
            Error::Connection(_) => ErrorKind::Connection,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Timeout => ErrorKind::Timeout,
            Error::Disconnected => ErrorKind::Disconnected,
            Error::IncompleteResponse { .. } => ErrorKind::IncompleteResponse,
            Error::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Error::DeviceReportedError { .. } => ErrorKind::DeviceReportedError,
            Error::FunctionNotSupported(_) => ErrorKind::FunctionNotSupported,
            Error::UnknownChannel(_) => ErrorKind::UnknownChannel,
            Error::SessionBusy => ErrorKind::SessionBusy,
            Error::InvalidTopology(_) => ErrorKind::InvalidTopology,
            Error::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Error::InvalidResource { .. } => ErrorKind::InvalidResource,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the instrument or model lacks this operation.
    ///
    /// Callers commonly treat this as expected and carry on.
    pub fn is_not_supported(&self) -> bool {
        self.kind() == ErrorKind::FunctionNotSupported
    }

    /// Whether this is a truncated-response condition that callers may
    /// treat as an empty, successful reply.
    pub fn is_incomplete(&self) -> bool {
        self.kind() == ErrorKind::IncompleteResponse
    }

    /// Whether this fault came from the link rather than from the
    /// instrument or the caller's request.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection
                | ErrorKind::Transport
                | ErrorKind::Timeout
                | ErrorKind::Disconnected
                | ErrorKind::IncompleteResponse
                | ErrorKind::Io
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_not_supported() {
        let e = Error::not_supported("output enable");
        assert_eq!(e.to_string(), "function not supported: output enable");
    }

    #[test]
    fn error_display_malformed() {
        let e = Error::malformed("ACME,X", "expected 4 fields, got 2");
        assert_eq!(
            e.to_string(),
            "malformed response \"ACME,X\": expected 4 fields, got 2"
        );
    }

    #[test]
    fn error_display_device_reported() {
        let e = Error::DeviceReportedError {
            code: -113,
            message: "Undefined header".into(),
        };
        assert_eq!(e.to_string(), "device reported error -113: Undefined header");
    }

    #[test]
    fn error_display_incomplete() {
        let e = Error::IncompleteResponse {
            partial: b"+1.2".to_vec(),
        };
        assert_eq!(e.to_string(), "incomplete response (4 bytes received)");
    }

    #[test]
    fn with_command_attaches_context() {
        let e = Error::Timeout.with_command("FREQ?");
        assert_eq!(e.kind(), ErrorKind::Timeout);
        assert_eq!(e.command(), Some("FREQ?"));
        assert!(e.to_string().contains("FREQ?"));
    }

    #[test]
    fn with_command_keeps_innermost() {
        let e = Error::Timeout.with_command("*IDN?").with_command("outer");
        assert_eq!(e.command(), Some("*IDN?"));
    }

    #[test]
    fn root_strips_context() {
        let e = Error::SessionBusy.with_command("VOLT 5");
        assert!(matches!(e.root(), Error::SessionBusy));
    }

    #[test]
    fn classification_helpers() {
        assert!(Error::not_supported("x").is_not_supported());
        assert!(!Error::Timeout.is_not_supported());
        assert!(Error::IncompleteResponse { partial: vec![] }.is_incomplete());
        assert!(Error::Timeout.is_transport_fault());
        assert!(Error::Disconnected.with_command("x").is_transport_fault());
        assert!(!Error::InvalidTopology("x".into()).is_transport_fault());
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert_eq!(e.kind(), ErrorKind::Io);
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
