//! gazelib-frontend: Client runtime for eye-tracking headset services.
//!
//! The [`Frontend`] connects to the background service that owns the
//! headset, correlates asynchronous commands with their responses, routes
//! gaze samples and events to registered handlers, and runs the guided
//! Quick Start procedure.
//!
//! # Example
//!
//! ```ignore
//! use gazelib_core::StreamId;
//! use gazelib_frontend::{FrontendBuilder, log_outcome};
//!
//! let frontend = FrontendBuilder::new(service).build();
//! frontend.connect().await?;
//!
//! frontend.register_stream_handler(StreamId::Gaze, |record| {
//!     println!("{record:?}");
//! });
//! frontend.set_stream_control(StreamId::Gaze, 60.0, log_outcome("gaze rate"));
//! ```
//!
//! # Modules
//!
//! - [`codec`] -- packet classification and command encoding
//! - [`builder`] -- [`FrontendBuilder`] and [`FrontendOptions`]
//! - [`frontend`] -- the [`Frontend`] facade
//! - [`procedure`] -- Quick Start phases

pub mod builder;
pub mod codec;
pub(crate) mod commands;
pub(crate) mod connection;
pub(crate) mod dispatch;
pub mod frontend;
pub mod procedure;

pub use builder::{FrontendBuilder, FrontendOptions};
pub use codec::Command;
pub use commands::{CommandCallback, log_outcome};
pub use dispatch::{EventHandler, StreamHandler};
pub use frontend::Frontend;
pub use procedure::{ProcedurePhase, QuickStart};
