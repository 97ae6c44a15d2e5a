//! gazelib-core: Core traits, types, and error definitions for gazelib.
//!
//! This crate defines the device-agnostic abstractions shared by the
//! frontend runtime and any service implementation. Applications depend on
//! these types without pulling in a specific transport.
//!
//! # Key types
//!
//! - [`Service`] -- the asynchronous peer that owns the headset
//! - [`DataRecord`] -- decoded gaze samples and event records
//! - [`FrontendEvent`] -- lifecycle notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use gazelib_core::*`.
pub use error::{Error, Result};
pub use events::FrontendEvent;
pub use transport::{PeerHandle, PeerLink, RawPacket, Service};
pub use types::*;
