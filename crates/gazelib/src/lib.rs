//! # gazelib -- Async Client Runtime for Eye-Tracking Headsets
//!
//! `gazelib` connects to the background service that owns an eye-tracking
//! headset, subscribes to its gaze and event streams, issues configuration
//! commands, and drives the guided Quick Start procedure.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gazelib::{FrontendBuilder, Service, StreamId, log_outcome};
//!
//! # async fn example(service: impl Service + 'static) -> gazelib::Result<()> {
//! let frontend = FrontendBuilder::new(service).build();
//! frontend.connect().await?;
//!
//! frontend.register_stream_handler(StreamId::Gaze, |record| {
//!     println!("{record:?}");
//! });
//! frontend.set_stream_control(StreamId::Gaze, 60.0, log_outcome("gaze rate"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                          |
//! |------------------------|--------------------------------------------------|
//! | `gazelib-core`         | [`Service`] trait, records, errors, events       |
//! | `gazelib-frontend`     | [`Frontend`] runtime, codec, Quick Start runner  |
//! | `gazelib-test-harness` | In-memory mock service (feature `test-harness`)  |
//! | **`gazelib`**          | This facade crate -- re-exports everything       |
//!
//! ## Event Subscription
//!
//! The frontend publishes [`FrontendEvent`]s through a broadcast channel:
//!
//! ```no_run
//! use gazelib::{Frontend, FrontendEvent};
//! # async fn example(frontend: &Frontend) {
//! let mut events = frontend.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         FrontendEvent::ConnectionLost { error } => eprintln!("lost: {error}"),
//!         other => println!("{other:?}"),
//!     }
//! }
//! # }
//! ```

pub use gazelib_core::*;

pub use gazelib_frontend::{
    Command, CommandCallback, EventHandler, Frontend, FrontendBuilder, FrontendOptions,
    ProcedurePhase, QuickStart, StreamHandler, codec, log_outcome, procedure,
};

/// In-memory service for tests and demos.
///
/// Provides [`MockService`](testing::MockService) and its controlling
/// [`MockPeer`](testing::MockPeer).
#[cfg(feature = "test-harness")]
pub mod testing {
    pub use gazelib_test_harness::*;
}
