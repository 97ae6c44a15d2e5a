//! gazelib-test-harness: Test utilities and mock services for gazelib.
//!
//! This crate provides [`MockService`] for deterministic testing of the
//! frontend runtime without a real headset service. The paired
//! [`MockPeer`] plays the service side: it inspects the packets the
//! frontend sends, injects inbound packets, and simulates failures.

pub mod mock_service;

pub use mock_service::{MockPeer, MockService};
