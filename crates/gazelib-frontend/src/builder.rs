//! FrontendBuilder -- fluent builder for constructing [`Frontend`] instances.
//!
//! Separates configuration from construction so that callers can set
//! timeouts and camera defaults before the connection is started.
//!
//! # Example
//!
//! ```ignore
//! let frontend = FrontendBuilder::new(service)
//!     .command_timeout(Duration::from_secs(5))
//!     .camera(0, CameraResolution::High)
//!     .build();
//! frontend.connect().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use gazelib_core::{CameraResolution, Service};

use crate::frontend::Frontend;

/// Default command response timeout.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default interval between command timeout sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Default broadcast capacity for [`FrontendEvent`](gazelib_core::FrontendEvent) subscribers.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Options for configuring a [`Frontend`].
#[derive(Debug, Clone)]
pub struct FrontendOptions {
    /// Time a command may stay unanswered before it fails with `Timeout`.
    pub command_timeout: Duration,
    /// How often the ingestion task checks for timed-out commands.
    pub timeout_sweep_interval: Duration,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_channel_capacity: usize,
    /// Camera started by Quick Start when capture is not yet active.
    pub camera_index: u8,
    /// Resolution used when Quick Start starts the camera.
    pub camera_resolution: CameraResolution,
}

impl Default for FrontendOptions {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            timeout_sweep_interval: DEFAULT_SWEEP_INTERVAL,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            camera_index: 0,
            camera_resolution: CameraResolution::default(),
        }
    }
}

/// Fluent builder for [`Frontend`].
///
/// Building performs no I/O; call [`Frontend::start`] or
/// [`Frontend::connect`] afterwards.
pub struct FrontendBuilder {
    service: Arc<dyn Service>,
    options: FrontendOptions,
}

impl FrontendBuilder {
    /// Create a builder for the given service with default options.
    pub fn new<S: Service + 'static>(service: S) -> Self {
        Self::with_service(Arc::new(service))
    }

    /// Create a builder for a shared service.
    pub fn with_service(service: Arc<dyn Service>) -> Self {
        FrontendBuilder {
            service,
            options: FrontendOptions::default(),
        }
    }

    /// Replace all options at once.
    pub fn options(mut self, options: FrontendOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the command response timeout (default: 2s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = timeout;
        self
    }

    /// Set the timeout sweep interval (default: 50ms).
    pub fn timeout_sweep_interval(mut self, interval: Duration) -> Self {
        self.options.timeout_sweep_interval = interval;
        self
    }

    /// Set the lifecycle event channel capacity (default: 256, minimum 1).
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.event_channel_capacity = capacity;
        self
    }

    /// Set the camera Quick Start uses (default: index 0, medium resolution).
    pub fn camera(mut self, index: u8, resolution: CameraResolution) -> Self {
        self.options.camera_index = index;
        self.options.camera_resolution = resolution;
        self
    }

    pub fn build(self) -> Frontend {
        let mut options = self.options;
        options.event_channel_capacity = options.event_channel_capacity.max(1);
        if options.timeout_sweep_interval.is_zero() {
            options.timeout_sweep_interval = DEFAULT_SWEEP_INTERVAL;
        }
        Frontend::new(self.service, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazelib_test_harness::MockService;

    #[test]
    fn defaults() {
        let options = FrontendOptions::default();
        assert_eq!(options.command_timeout, Duration::from_secs(2));
        assert_eq!(options.timeout_sweep_interval, Duration::from_millis(50));
        assert_eq!(options.event_channel_capacity, 256);
        assert_eq!(options.camera_index, 0);
        assert_eq!(options.camera_resolution, CameraResolution::Medium);
    }

    #[tokio::test]
    async fn builder_applies_settings() {
        let (service, _peer) = MockService::new();
        let frontend = FrontendBuilder::new(service)
            .command_timeout(Duration::from_millis(300))
            .camera(2, CameraResolution::High)
            .event_channel_capacity(0)
            .timeout_sweep_interval(Duration::ZERO)
            .build();

        let options = frontend.options();
        assert_eq!(options.command_timeout, Duration::from_millis(300));
        assert_eq!(options.camera_index, 2);
        assert_eq!(options.camera_resolution, CameraResolution::High);
        assert_eq!(options.event_channel_capacity, 1);
        assert_eq!(options.timeout_sweep_interval, DEFAULT_SWEEP_INTERVAL);
    }
}
