//! Asynchronous frontend event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel when the
//! connection or device state changes. Presentation layers subscribe to
//! these instead of polling a connected flag.

use crate::error::Error;

/// A lifecycle notification emitted by the frontend.
///
/// Delivered best-effort through a bounded broadcast channel; slow
/// consumers may miss events.
#[derive(Debug, Clone)]
pub enum FrontendEvent {
    /// The connection reached the ready state.
    Connected,

    /// The service went away while the connection was ready.
    ConnectionLost {
        /// What ended the connection.
        error: Error,
    },

    /// `shutdown()` completed.
    Disconnected,

    /// Camera capture started or stopped.
    CaptureChanged {
        /// `true` while the camera is capturing.
        active: bool,
    },

    /// A Quick Start run finished.
    QuickStartFinished {
        /// `None` on success, otherwise the first failure.
        error: Option<Error>,
    },
}
