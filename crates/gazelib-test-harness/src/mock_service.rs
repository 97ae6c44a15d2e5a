//! Mock service for frontend testing.
//!
//! [`MockService`] implements the [`Service`] trait entirely in memory.
//! Every successful `discover_and_connect()` opens a fresh inbound channel;
//! the test drives the other end through the [`MockPeer`].
//!
//! # Example
//!
//! ```
//! use gazelib_core::RawPacket;
//! use gazelib_test_harness::MockService;
//!
//! # async fn example() {
//! let (service, mut peer) = MockService::new();
//! // Hand `service` to a frontend, connect, then:
//! peer.inject(RawPacket::new(0x81, vec![0x01])).await;
//! let sent = peer.next_sent().await;
//! # let _ = (service, sent);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use gazelib_core::error::{Error, Result};
use gazelib_core::transport::{PeerHandle, PeerLink, RawPacket, Service};

/// Capacity of each connection's inbound channel.
const INBOUND_CAPACITY: usize = 256;

/// How long [`MockPeer::next_sent`] waits before giving up.
const DEFAULT_WAIT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Script {
    connect_failures: VecDeque<Error>,
    send_failures: VecDeque<Error>,
    connect_delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
}

struct Inner {
    script: Mutex<Script>,
    /// The live connection, if any: its handle and the inbound sender.
    link: Mutex<Option<(PeerHandle, mpsc::Sender<RawPacket>)>>,
    sent_tx: mpsc::UnboundedSender<RawPacket>,
    next_handle: AtomicU32,
    connects: AtomicU32,
    disconnects: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory [`Service`].
#[derive(Clone)]
pub struct MockService {
    inner: Arc<Inner>,
}

/// The test's end of a [`MockService`].
pub struct MockPeer {
    inner: Arc<Inner>,
    sent_rx: mpsc::UnboundedReceiver<RawPacket>,
}

impl MockService {
    /// Create a service and the peer that controls it.
    pub fn new() -> (MockService, MockPeer) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            script: Mutex::new(Script::default()),
            link: Mutex::new(None),
            sent_tx,
            next_handle: AtomicU32::new(1),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
        });
        (
            MockService {
                inner: Arc::clone(&inner),
            },
            MockPeer { inner, sent_rx },
        )
    }
}

#[async_trait]
impl Service for MockService {
    async fn discover_and_connect(&self) -> Result<PeerLink> {
        let delay = lock(&self.inner.script).connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = lock(&self.inner.script).connect_failures.pop_front() {
            return Err(error);
        }

        let handle = PeerHandle(self.inner.next_handle.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        *lock(&self.inner.link) = Some((handle, tx));
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(PeerLink {
            handle,
            inbound: rx,
        })
    }

    async fn send(&self, peer: PeerHandle, packet: RawPacket) -> Result<()> {
        let live = lock(&self.inner.link)
            .as_ref()
            .is_some_and(|(handle, _)| *handle == peer);
        if !live {
            return Err(Error::NotConnected);
        }
        if let Some(error) = lock(&self.inner.script).send_failures.pop_front() {
            return Err(error);
        }
        self.inner
            .sent_tx
            .send(packet)
            .map_err(|_| Error::Transport("mock peer dropped".into()))
    }

    async fn disconnect(&self, peer: PeerHandle) -> Result<()> {
        let delay = lock(&self.inner.script).disconnect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        let mut link = lock(&self.inner.link);
        if link.as_ref().is_some_and(|(handle, _)| *handle == peer) {
            *link = None;
        }
        Ok(())
    }
}

impl MockPeer {
    /// Make the next `discover_and_connect()` fail with `error`.
    pub fn fail_next_connect(&self, error: Error) {
        lock(&self.inner.script).connect_failures.push_back(error);
    }

    /// Make the next `send()` fail with `error`.
    pub fn fail_next_send(&self, error: Error) {
        lock(&self.inner.script).send_failures.push_back(error);
    }

    /// Delay every `discover_and_connect()` by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        lock(&self.inner.script).connect_delay = Some(delay);
    }

    /// Delay every `disconnect()` by `delay`.
    pub fn set_disconnect_delay(&self, delay: Duration) {
        lock(&self.inner.script).disconnect_delay = Some(delay);
    }

    /// Deliver a packet to the frontend. Returns `false` when no connection
    /// is open.
    pub async fn inject(&self, packet: RawPacket) -> bool {
        let tx = lock(&self.inner.link).as_ref().map(|(_, tx)| tx.clone());
        match tx {
            Some(tx) => tx.send(packet).await.is_ok(),
            None => false,
        }
    }

    /// Wait for the next packet the frontend sent (up to one second).
    pub async fn next_sent(&mut self) -> Option<RawPacket> {
        self.next_sent_within(DEFAULT_WAIT).await
    }

    /// Wait up to `wait` for the next packet the frontend sent.
    pub async fn next_sent_within(&mut self, wait: Duration) -> Option<RawPacket> {
        tokio::time::timeout(wait, self.sent_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Return an already-sent packet without waiting.
    pub fn try_next_sent(&mut self) -> Option<RawPacket> {
        self.sent_rx.try_recv().ok()
    }

    /// Close the live connection from the service side. The frontend's
    /// inbound stream ends once queued packets are drained.
    pub fn drop_connection(&self) -> bool {
        lock(&self.inner.link).take().is_some()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.link).is_some()
    }

    /// Number of successful connections so far.
    pub fn connect_count(&self) -> u32 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of `disconnect()` calls so far.
    pub fn disconnect_count(&self) -> u32 {
        self.inner.disconnects.load(Ordering::SeqCst)
    }
}
