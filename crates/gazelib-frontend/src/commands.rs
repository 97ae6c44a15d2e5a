//! Command/response correlation.
//!
//! [`CommandChannel`] owns the table of pending commands. Every command is
//! assigned a monotonically increasing correlation key when it is sent and
//! stays in the table until exactly one of these happens:
//!
//! - the matching response arrives ([`resolve`](CommandChannel::resolve)),
//! - the service's `send` fails ([`resolve`](CommandChannel::resolve) with
//!   the error),
//! - its deadline passes ([`expire`](CommandChannel::expire)),
//! - the connection leaves the ready state ([`close`](CommandChannel::close)).
//!
//! Removal from the table is what grants the right to invoke the callback,
//! so no callback can fire twice. Callbacks always run after the table lock
//! is released.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use gazelib_core::{Error, Result};

/// Callback invoked once with the outcome of a command.
pub type CommandCallback = Box<dyn FnOnce(Result<Bytes>) + Send + 'static>;

/// Build a callback for commands whose result the caller does not use.
///
/// The callback still receives the full result; failures are logged at
/// `warn` so a rejected or timed-out command never disappears silently.
pub fn log_outcome<T: Send + 'static>(
    label: &'static str,
) -> impl FnOnce(Result<T>) + Send + 'static {
    move |result| match result {
        Ok(_) => tracing::trace!(command = label, "Command succeeded"),
        Err(e) => tracing::warn!(command = label, error = %e, "Command failed"),
    }
}

/// Lock a std mutex, recovering the guard if a callback panicked while it
/// was held elsewhere.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PendingCommand {
    opcode: u8,
    issued_at: Instant,
    callback: CommandCallback,
}

struct Table {
    /// New commands are accepted only while open (connection ready).
    open: bool,
    next_key: u32,
    pending: HashMap<u32, PendingCommand>,
}

/// The pending-command table shared by senders and the ingestion task.
pub(crate) struct CommandChannel {
    table: Mutex<Table>,
    timeout: Duration,
}

impl CommandChannel {
    pub(crate) fn new(timeout: Duration) -> Self {
        CommandChannel {
            table: Mutex::new(Table {
                open: false,
                next_key: 1,
                pending: HashMap::new(),
            }),
            timeout,
        }
    }

    /// Accept commands again after a (re)connection.
    pub(crate) fn open(&self) {
        lock(&self.table).open = true;
    }

    /// Insert a pending command and return its correlation key.
    ///
    /// When the channel is closed the callback is handed back together with
    /// the error so the caller can resolve it.
    pub(crate) fn register(
        &self,
        opcode: u8,
        callback: CommandCallback,
    ) -> std::result::Result<u32, (Error, CommandCallback)> {
        let mut table = lock(&self.table);
        if !table.open {
            return Err((Error::NotConnected, callback));
        }
        let key = table.next_key;
        table.next_key = table.next_key.wrapping_add(1).max(1);
        table.pending.insert(
            key,
            PendingCommand {
                opcode,
                issued_at: Instant::now(),
                callback,
            },
        );
        Ok(key)
    }

    /// Resolve the command with `key`. Returns `false` if it is no longer
    /// pending (already timed out, or never sent).
    pub(crate) fn resolve(&self, key: u32, result: Result<Bytes>) -> bool {
        let entry = lock(&self.table).pending.remove(&key);
        match entry {
            Some(cmd) => {
                tracing::trace!(
                    key = key,
                    command = crate::codec::opcode::name(cmd.opcode),
                    ok = result.is_ok(),
                    "Command resolved"
                );
                (cmd.callback)(result);
                true
            }
            None => {
                tracing::trace!(key = key, "Response for unknown/expired key");
                false
            }
        }
    }

    /// Resolve every command older than the timeout with [`Error::Timeout`].
    pub(crate) fn expire(&self, now: Instant) -> usize {
        let expired: Vec<(u32, PendingCommand)> = {
            let mut table = lock(&self.table);
            let keys: Vec<u32> = table
                .pending
                .iter()
                .filter(|(_, cmd)| now.saturating_duration_since(cmd.issued_at) >= self.timeout)
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter()
                .filter_map(|key| table.pending.remove(&key).map(|cmd| (key, cmd)))
                .collect()
        };

        let count = expired.len();
        for (key, cmd) in sorted(expired) {
            tracing::debug!(
                key = key,
                command = crate::codec::opcode::name(cmd.opcode),
                "Command timed out"
            );
            (cmd.callback)(Err(Error::Timeout));
        }
        count
    }

    /// Stop accepting commands and resolve everything pending with `error`.
    pub(crate) fn close(&self, error: Error) -> usize {
        let drained: Vec<(u32, PendingCommand)> = {
            let mut table = lock(&self.table);
            table.open = false;
            table.pending.drain().collect()
        };

        let count = drained.len();
        if count > 0 {
            tracing::debug!(count = count, error = %error, "Cancelling pending commands");
        }
        for (_, cmd) in sorted(drained) {
            (cmd.callback)(Err(error.clone()));
        }
        count
    }

    pub(crate) fn pending_count(&self) -> usize {
        lock(&self.table).pending.len()
    }
}

/// Order drained commands by key so callbacks fire in send order.
fn sorted(mut entries: Vec<(u32, PendingCommand)>) -> Vec<(u32, PendingCommand)> {
    entries.sort_by_key(|(key, _)| *key);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    type Outcomes = Arc<Mutex<Vec<(u32, Result<Bytes>)>>>;

    fn recorder(tag: u32, outcomes: &Outcomes) -> CommandCallback {
        let outcomes = Arc::clone(outcomes);
        Box::new(move |r| outcomes.lock().unwrap().push((tag, r)))
    }

    fn open_channel(timeout: Duration) -> CommandChannel {
        let channel = CommandChannel::new(timeout);
        channel.open();
        channel
    }

    #[test]
    fn register_rejected_while_closed() {
        let channel = CommandChannel::new(Duration::from_secs(1));
        let outcomes = Outcomes::default();
        let (err, cb) = channel.register(0xC0, recorder(1, &outcomes)).unwrap_err();
        assert_eq!(err, Error::NotConnected);
        cb(Err(err));
        assert_eq!(outcomes.lock().unwrap().len(), 1);
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn keys_are_monotonic() {
        let channel = open_channel(Duration::from_secs(1));
        let outcomes = Outcomes::default();
        let k1 = channel.register(0xC0, recorder(1, &outcomes)).ok().unwrap();
        let k2 = channel.register(0xC0, recorder(2, &outcomes)).ok().unwrap();
        let k3 = channel.register(0xC0, recorder(3, &outcomes)).ok().unwrap();
        assert!(k1 < k2 && k2 < k3);
        assert_eq!(channel.pending_count(), 3);
    }

    #[test]
    fn out_of_order_responses_match_by_key() {
        let channel = open_channel(Duration::from_secs(1));
        let outcomes = Outcomes::default();
        let k1 = channel.register(0xC0, recorder(1, &outcomes)).ok().unwrap();
        let k2 = channel.register(0xC0, recorder(2, &outcomes)).ok().unwrap();

        assert!(channel.resolve(k2, Ok(Bytes::from_static(b"second"))));
        assert!(channel.resolve(k1, Ok(Bytes::from_static(b"first"))));

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes[0], (2, Ok(Bytes::from_static(b"second"))));
        assert_eq!(outcomes[1], (1, Ok(Bytes::from_static(b"first"))));
    }

    #[test]
    fn duplicate_response_fires_once() {
        let channel = open_channel(Duration::from_secs(1));
        let outcomes = Outcomes::default();
        let key = channel.register(0xC0, recorder(1, &outcomes)).ok().unwrap();

        assert!(channel.resolve(key, Ok(Bytes::new())));
        assert!(!channel.resolve(key, Err(Error::PeerRejected { code: 1 })));
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[test]
    fn expire_evicts_only_old_commands() {
        let channel = open_channel(Duration::from_millis(100));
        let outcomes = Outcomes::default();
        let key = channel.register(0xC0, recorder(1, &outcomes)).ok().unwrap();

        assert_eq!(channel.expire(Instant::now()), 0);
        let later = Instant::now() + Duration::from_millis(150);
        assert_eq!(channel.expire(later), 1);

        assert_eq!(outcomes.lock().unwrap()[0], (1, Err(Error::Timeout)));
        // A late response finds nothing.
        assert!(!channel.resolve(key, Ok(Bytes::new())));
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[test]
    fn close_resolves_all_in_send_order() {
        let channel = open_channel(Duration::from_secs(1));
        let outcomes = Outcomes::default();
        for tag in 1..=5 {
            channel.register(0xC0, recorder(tag, &outcomes)).ok().unwrap();
        }

        assert_eq!(channel.close(Error::ConnectionLost), 5);

        let outcomes = outcomes.lock().unwrap();
        let tags: Vec<u32> = outcomes.iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![1, 2, 3, 4, 5]);
        assert!(outcomes.iter().all(|(_, r)| *r == Err(Error::ConnectionLost)));
    }

    #[test]
    fn close_rejects_new_commands_until_reopened() {
        let channel = open_channel(Duration::from_secs(1));
        channel.close(Error::ShuttingDown);
        let outcomes = Outcomes::default();
        assert!(channel.register(0xC0, recorder(1, &outcomes)).is_err());

        channel.open();
        assert!(channel.register(0xC0, recorder(2, &outcomes)).is_ok());
    }

    #[test]
    fn log_outcome_accepts_any_result() {
        let cb = log_outcome::<Bytes>("set_stream_control");
        cb(Err(Error::Timeout));
        let cb = log_outcome::<()>("start_camera");
        cb(Ok(()));
    }
}
