//! Service trait for frontend communication.
//!
//! The [`Service`] trait abstracts over the background process that owns
//! the headset. Real deployments talk to it over local IPC; tests use the
//! scripted `MockService` from the `gazelib-test-harness` crate.
//!
//! The frontend never decodes the vendor wire format. A service hands over
//! whole packets as [`RawPacket`]s, tagged with a packet type, and the
//! frontend's codec classifies them.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Opaque handle identifying one connection to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle(pub u32);

/// A single packet exchanged with the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Packet type tag (stream id, response, control, or command opcode).
    pub packet_type: u8,
    /// Packet body.
    pub payload: Bytes,
}

impl RawPacket {
    pub fn new(packet_type: u8, payload: impl Into<Bytes>) -> Self {
        RawPacket {
            packet_type,
            payload: payload.into(),
        }
    }
}

/// An established connection: the handle plus the inbound packet stream.
///
/// The receiver yields every packet the service sends for this
/// connection. It ends (returns `None`) when the connection drops, and can
/// only be restarted by connecting again.
#[derive(Debug)]
pub struct PeerLink {
    pub handle: PeerHandle,
    pub inbound: mpsc::Receiver<RawPacket>,
}

/// Asynchronous peer that owns the physical device.
///
/// Implementations handle discovery, framing, and the physical channel.
/// Command correlation is carried inside the packet payload and handled by
/// the frontend.
#[async_trait]
pub trait Service: Send + Sync {
    /// Find the service and open a connection to it.
    async fn discover_and_connect(&self) -> Result<PeerLink>;

    /// Send one packet to the service.
    async fn send(&self, peer: PeerHandle, packet: RawPacket) -> Result<()>;

    /// Close the connection. The inbound receiver ends afterwards.
    async fn disconnect(&self, peer: PeerHandle) -> Result<()>;
}
