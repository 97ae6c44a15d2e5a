//! Error types for gazelib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Service-level, protocol-level, and
//! lifecycle errors are all captured here.

/// The error type for all gazelib operations.
///
/// `Error` is `Clone` because a single cause (a dropped connection, a
/// shutdown) resolves every pending command callback at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An operation was attempted while the connection was not ready.
    #[error("not connected")]
    NotConnected,

    /// No response arrived from the service within the command deadline.
    #[error("timeout waiting for response")]
    Timeout,

    /// The channel to the service dropped while the operation was in flight.
    #[error("connection lost")]
    ConnectionLost,

    /// The frontend is shutting down; outstanding work was cancelled.
    #[error("connection shutting down")]
    ShuttingDown,

    /// The service answered with an explicit failure code.
    #[error("request rejected by peer (ack code {code})")]
    PeerRejected {
        /// Non-zero acknowledgement code returned by the service.
        code: u8,
    },

    /// A malformed inbound packet. Never surfaced to callbacks; decode
    /// failures are dropped and counted by the dispatcher.
    #[error("decode error: {0}")]
    Decode(String),

    /// The call is not valid in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An invalid parameter was passed to a command builder.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A service/transport level failure (discovery, socket, IPC).
    #[error("transport error: {0}")]
    Transport(String),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_connection_lost() {
        assert_eq!(Error::ConnectionLost.to_string(), "connection lost");
    }

    #[test]
    fn error_display_shutting_down() {
        assert_eq!(Error::ShuttingDown.to_string(), "connection shutting down");
    }

    #[test]
    fn error_display_peer_rejected() {
        let e = Error::PeerRejected { code: 3 };
        assert_eq!(e.to_string(), "request rejected by peer (ack code 3)");
    }

    #[test]
    fn error_display_decode() {
        let e = Error::Decode("gaze payload too short".into());
        assert_eq!(e.to_string(), "decode error: gaze payload too short");
    }

    #[test]
    fn error_display_invalid_state() {
        let e = Error::InvalidState("already connecting".into());
        assert_eq!(e.to_string(), "invalid state: already connecting");
    }

    #[test]
    fn error_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone + 'static>() {}
        assert_traits::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
