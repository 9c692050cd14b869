//! Error types for the TCI client.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, wire protocol
//! violations, local command validation, timeouts and consumer callback
//! failures are all captured here.

/// The error type for all TCI client operations.
///
/// Variants follow the failure taxonomy of the client: protocol errors and
/// transport failures tear the connection down, validation errors are local
/// to the call that produced them, timeouts cancel the connection attempt,
/// and callback errors report a failure inside consumer code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (WebSocket handshake, socket write).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (unknown command, malformed frame, short
    /// binary header). Fatal to the connection it occurred on.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the connection handshake or the READY
    /// notification.
    #[error("timeout waiting for server")]
    Timeout,

    /// An outbound command or cache query failed validation: permission
    /// violated, receiver/channel index missing, or wrong value count.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the server has been established, or it has
    /// already been closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the server was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A dispatched listener callback returned an error or panicked.
    #[error("listener callback for {listener} failed: {message}")]
    Callback {
        /// Registration key the failing callback was registered under.
        listener: String,
        /// Rendered error or panic message.
        message: String,
    },

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("handshake refused".into());
        assert_eq!(e.to_string(), "transport error: handshake refused");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("command FOO unrecognized".into());
        assert_eq!(e.to_string(), "protocol error: command FOO unrecognized");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for server");
    }

    #[test]
    fn error_display_invalid_parameter() {
        let e = Error::InvalidParameter("VOLUME not readable".into());
        assert_eq!(e.to_string(), "invalid parameter: VOLUME not readable");
    }

    #[test]
    fn error_display_callback() {
        let e = Error::Callback {
            listener: "VFO".into(),
            message: "boom".into(),
        };
        assert_eq!(e.to_string(), "listener callback for VFO failed: boom");
    }

    #[test]
    fn error_display_connection_states() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
        assert_eq!(Error::ConnectionLost.to_string(), "connection lost");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
