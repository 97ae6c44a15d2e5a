//! Connection lifecycle state machine.
//!
//! [`Connection`] holds the current [`ConnectionState`] in a
//! [`tokio::sync::watch`] channel. Every transition is a compare-and-set on
//! that channel, so concurrent callers (the connect task, the ingestion
//! task, `shutdown()`) cannot both win the same transition, and waiters are
//! woken by notification rather than by polling a flag.

use std::sync::Mutex;

use tokio::sync::watch;

use gazelib_core::{ConnectionState, Error, Result};

use crate::commands::lock;

pub(crate) struct Connection {
    state: watch::Sender<ConnectionState>,
    last_error: Mutex<Option<Error>>,
}

impl Connection {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Connection {
            state,
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub(crate) fn last_error(&self) -> Option<Error> {
        lock(&self.last_error).clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Move `from -> to` if the current state is `from`.
    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if from.contains(state) && state.can_transition(to) {
                tracing::debug!(from = %state, to = %to, "Connection state change");
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// `Disconnected -> Connecting`.
    pub(crate) fn begin_connect(&self) -> Result<()> {
        if self.transition(&[ConnectionState::Disconnected], ConnectionState::Connecting) {
            *lock(&self.last_error) = None;
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot start while {}",
                self.state()
            )))
        }
    }

    /// `Connecting -> Ready`. Fails if a shutdown raced the connection.
    pub(crate) fn mark_ready(&self) -> bool {
        self.transition(&[ConnectionState::Connecting], ConnectionState::Ready)
    }

    /// `Connecting -> Disconnected` after discovery failed.
    pub(crate) fn connect_failed(&self, error: Error) {
        if self.transition(&[ConnectionState::Connecting], ConnectionState::Disconnected) {
            *lock(&self.last_error) = Some(error);
        }
    }

    /// `Ready -> Disconnected` when the service goes away. Returns `false`
    /// if the connection was not ready (e.g. a shutdown is already running).
    pub(crate) fn lost(&self, error: Error) -> bool {
        let moved = self.transition(&[ConnectionState::Ready], ConnectionState::Disconnected);
        if moved {
            *lock(&self.last_error) = Some(error);
        }
        moved
    }

    /// `Ready | Connecting -> ShuttingDown`. Returns `false` when there is
    /// nothing to shut down.
    pub(crate) fn begin_shutdown(&self) -> bool {
        self.transition(
            &[ConnectionState::Ready, ConnectionState::Connecting],
            ConnectionState::ShuttingDown,
        )
    }

    /// `ShuttingDown -> Disconnected`.
    pub(crate) fn finish_shutdown(&self) {
        self.transition(&[ConnectionState::ShuttingDown], ConnectionState::Disconnected);
    }

    /// Wait until the connection is ready.
    ///
    /// Waits indefinitely across failed connection attempts; fails with
    /// [`Error::ShuttingDown`] once a shutdown begins.
    pub(crate) async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::ShuttingDown))
            .await
            .map_err(|_| Error::ShuttingDown)?;
        match *state {
            ConnectionState::Ready => Ok(()),
            _ => Err(Error::ShuttingDown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn full_lifecycle() {
        let c = Connection::new();
        assert_eq!(c.state(), ConnectionState::Disconnected);
        c.begin_connect().unwrap();
        assert_eq!(c.state(), ConnectionState::Connecting);
        assert!(c.mark_ready());
        assert!(c.is_ready());
        assert!(c.begin_shutdown());
        assert_eq!(c.state(), ConnectionState::ShuttingDown);
        c.finish_shutdown();
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn start_twice_is_rejected() {
        let c = Connection::new();
        c.begin_connect().unwrap();
        assert!(matches!(c.begin_connect(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn connect_failure_records_error() {
        let c = Connection::new();
        c.begin_connect().unwrap();
        c.connect_failed(Error::Transport("service not running".into()));
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(
            c.last_error(),
            Some(Error::Transport("service not running".into()))
        );

        // A new attempt clears the stale error.
        c.begin_connect().unwrap();
        assert_eq!(c.last_error(), None);
    }

    #[test]
    fn shutdown_from_disconnected_is_noop() {
        let c = Connection::new();
        assert!(!c.begin_shutdown());
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn shutdown_beats_ready() {
        let c = Connection::new();
        c.begin_connect().unwrap();
        assert!(c.begin_shutdown());
        assert!(!c.mark_ready());
        assert_eq!(c.state(), ConnectionState::ShuttingDown);
    }

    #[test]
    fn loss_only_from_ready() {
        let c = Connection::new();
        assert!(!c.lost(Error::ConnectionLost));
        c.begin_connect().unwrap();
        c.mark_ready();
        assert!(c.lost(Error::ConnectionLost));
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(c.last_error(), Some(Error::ConnectionLost));
    }

    #[tokio::test]
    async fn wait_ready_wakes_on_transition() {
        let c = Arc::new(Connection::new());
        c.begin_connect().unwrap();

        let waiter = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.wait_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        c.mark_ready();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_ready_fails_on_shutdown() {
        let c = Arc::new(Connection::new());
        c.begin_connect().unwrap();
        let waiter = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.wait_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        c.begin_shutdown();
        let result = waiter.await.unwrap();
        assert_eq!(result, Err(Error::ShuttingDown));
    }
}
