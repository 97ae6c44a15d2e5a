//! Quick Start procedure runner.
//!
//! Quick Start is a three-step workflow, each step gated on the previous
//! one succeeding:
//!
//! 1. make sure camera capture is active (start it if needed),
//! 2. ask the service to run its guided procedure,
//! 3. wait for the service's completion notification.
//!
//! The runner fails fast on the first error and never retries. It never
//! stops camera capture when it finishes, successfully or not; capture is
//! left exactly as the service left it.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::oneshot;

use gazelib_core::{Error, MarkerSequenceMode, Result};

use crate::commands::lock;

/// Phase of a Quick Start run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcedurePhase {
    NotStarted,
    AwaitingCaptureStart,
    Running,
    Succeeded,
    Failed,
}

impl ProcedurePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcedurePhase::Succeeded | ProcedurePhase::Failed)
    }
}

/// State of one Quick Start run.
#[derive(Debug, Clone)]
pub struct QuickStart {
    mode: MarkerSequenceMode,
    marker_size_mm: f32,
    phase: ProcedurePhase,
}

impl QuickStart {
    pub fn new(mode: MarkerSequenceMode, marker_size_mm: f32) -> Self {
        QuickStart {
            mode,
            marker_size_mm,
            phase: ProcedurePhase::NotStarted,
        }
    }

    pub fn mode(&self) -> MarkerSequenceMode {
        self.mode
    }

    pub fn marker_size_mm(&self) -> f32 {
        self.marker_size_mm
    }

    pub fn phase(&self) -> ProcedurePhase {
        self.phase
    }

    /// Move forward to `next`. Phases never go backwards and terminal
    /// phases are final.
    pub fn advance(&mut self, next: ProcedurePhase) -> Result<()> {
        if self.phase.is_terminal() || next <= self.phase {
            return Err(Error::InvalidState(format!(
                "quick start cannot move from {:?} to {:?}",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Record the terminal phase for `result`.
    fn finish(&mut self, result: &Result<()>) {
        let terminal = if result.is_ok() {
            ProcedurePhase::Succeeded
        } else {
            ProcedurePhase::Failed
        };
        if !self.phase.is_terminal() {
            self.phase = terminal;
        }
    }
}

/// What the runner needs from the frontend.
#[async_trait]
pub(crate) trait ProcedureHost: Send + Sync {
    fn is_ready(&self) -> bool;

    fn capture_active(&self) -> bool;

    /// Start camera capture with the configured camera and resolution.
    async fn start_capture(&self) -> Result<()>;

    /// Register interest in the next completion notification.
    fn arm_completion(&self) -> Result<oneshot::Receiver<Result<()>>>;

    /// Drop an armed completion waiter that will never be satisfied.
    fn disarm_completion(&self);

    /// Send the Quick Start command and wait for its acknowledgement.
    async fn request_quick_start(
        &self,
        mode: MarkerSequenceMode,
        marker_size_mm: f32,
    ) -> Result<()>;
}

/// Drive one Quick Start run to a terminal phase.
pub(crate) async fn run_quick_start(
    host: &dyn ProcedureHost,
    procedure: &mut QuickStart,
) -> Result<()> {
    let result = drive(host, procedure).await;
    procedure.finish(&result);
    match &result {
        Ok(()) => tracing::debug!("Quick Start succeeded"),
        Err(e) => tracing::debug!(error = %e, phase = ?procedure.phase(), "Quick Start failed"),
    }
    result
}

async fn drive(host: &dyn ProcedureHost, procedure: &mut QuickStart) -> Result<()> {
    if !host.is_ready() {
        return Err(Error::NotConnected);
    }

    procedure.advance(ProcedurePhase::AwaitingCaptureStart)?;
    if host.capture_active() {
        tracing::trace!("Camera capture already active");
    } else {
        tracing::debug!("Starting camera capture for Quick Start");
        host.start_capture().await?;
    }

    // Arm before sending so a fast completion cannot be missed.
    let completion = host.arm_completion()?;
    if let Err(e) = host
        .request_quick_start(procedure.mode(), procedure.marker_size_mm())
        .await
    {
        host.disarm_completion();
        return Err(e);
    }
    procedure.advance(ProcedurePhase::Running)?;

    completion.await.unwrap_or(Err(Error::ConnectionLost))
}

struct SlotState {
    open: bool,
    waiter: Option<oneshot::Sender<Result<()>>>,
}

/// Holds the completion waiter of the procedure currently running.
///
/// Like the command table, the slot is closed whenever the connection
/// leaves the ready state; arming a closed slot fails immediately.
pub(crate) struct CompletionSlot {
    state: Mutex<SlotState>,
}

impl CompletionSlot {
    pub(crate) fn new() -> Self {
        CompletionSlot {
            state: Mutex::new(SlotState {
                open: false,
                waiter: None,
            }),
        }
    }

    pub(crate) fn open(&self) {
        lock(&self.state).open = true;
    }

    pub(crate) fn arm(&self) -> Result<oneshot::Receiver<Result<()>>> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(Error::NotConnected);
        }
        if state.waiter.is_some() {
            return Err(Error::InvalidState("a procedure is already running".into()));
        }
        let (tx, rx) = oneshot::channel();
        state.waiter = Some(tx);
        Ok(rx)
    }

    pub(crate) fn disarm(&self) {
        lock(&self.state).waiter = None;
    }

    /// Deliver a completion notification. Returns `false` if nobody waits.
    pub(crate) fn complete(&self, result: Result<()>) -> bool {
        let waiter = lock(&self.state).waiter.take();
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Close the slot and fail any waiter with `error`.
    pub(crate) fn close(&self, error: Error) {
        let waiter = {
            let mut state = lock(&self.state);
            state.open = false;
            state.waiter.take()
        };
        if let Some(tx) = waiter {
            let _ = tx.send(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Scriptable host: outcomes for each step plus call counters.
    struct FakeHost {
        ready: bool,
        capture: AtomicBool,
        start_capture_result: Result<()>,
        request_result: Result<()>,
        completion: Result<()>,
        slot: CompletionSlot,
        capture_starts: AtomicU32,
        requests: AtomicU32,
    }

    impl FakeHost {
        fn new() -> Self {
            let slot = CompletionSlot::new();
            slot.open();
            FakeHost {
                ready: true,
                capture: AtomicBool::new(false),
                start_capture_result: Ok(()),
                request_result: Ok(()),
                completion: Ok(()),
                slot,
                capture_starts: AtomicU32::new(0),
                requests: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ProcedureHost for FakeHost {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn capture_active(&self) -> bool {
            self.capture.load(Ordering::SeqCst)
        }

        async fn start_capture(&self) -> Result<()> {
            self.capture_starts.fetch_add(1, Ordering::SeqCst);
            if self.start_capture_result.is_ok() {
                self.capture.store(true, Ordering::SeqCst);
            }
            self.start_capture_result.clone()
        }

        fn arm_completion(&self) -> Result<oneshot::Receiver<Result<()>>> {
            self.slot.arm()
        }

        fn disarm_completion(&self) {
            self.slot.disarm();
        }

        async fn request_quick_start(
            &self,
            _mode: MarkerSequenceMode,
            _marker_size_mm: f32,
        ) -> Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.request_result.clone()?;
            self.slot.complete(self.completion.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn starts_capture_then_succeeds() {
        let host = FakeHost::new();
        let mut qs = QuickStart::new(MarkerSequenceMode::FixedGaze, 35.0);

        run_quick_start(&host, &mut qs).await.unwrap();

        assert_eq!(qs.phase(), ProcedurePhase::Succeeded);
        assert_eq!(host.capture_starts.load(Ordering::SeqCst), 1);
        assert_eq!(host.requests.load(Ordering::SeqCst), 1);
        // Capture is left running.
        assert!(host.capture_active());
    }

    #[tokio::test]
    async fn skips_capture_start_when_active() {
        let host = FakeHost::new();
        host.capture.store(true, Ordering::SeqCst);
        let mut qs = QuickStart::new(MarkerSequenceMode::FixedHead, 35.0);

        run_quick_start(&host, &mut qs).await.unwrap();
        assert_eq!(host.capture_starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn capture_failure_stops_before_request() {
        let mut host = FakeHost::new();
        host.start_capture_result = Err(Error::PeerRejected { code: 1 });
        let mut qs = QuickStart::new(MarkerSequenceMode::FixedGaze, 35.0);

        let result = run_quick_start(&host, &mut qs).await;
        assert_eq!(result, Err(Error::PeerRejected { code: 1 }));
        assert_eq!(qs.phase(), ProcedurePhase::Failed);
        assert_eq!(host.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_request_disarms_completion() {
        let mut host = FakeHost::new();
        host.request_result = Err(Error::Timeout);
        let mut qs = QuickStart::new(MarkerSequenceMode::FixedGaze, 35.0);

        assert_eq!(run_quick_start(&host, &mut qs).await, Err(Error::Timeout));
        // The slot can be armed again by the next run.
        assert!(host.slot.arm().is_ok());
    }

    #[tokio::test]
    async fn failed_completion_is_forwarded() {
        let mut host = FakeHost::new();
        host.completion = Err(Error::PeerRejected { code: 7 });
        let mut qs = QuickStart::new(MarkerSequenceMode::FixedGaze, 35.0);

        let result = run_quick_start(&host, &mut qs).await;
        assert_eq!(result, Err(Error::PeerRejected { code: 7 }));
        assert_eq!(qs.phase(), ProcedurePhase::Failed);
    }

    #[tokio::test]
    async fn not_ready_fails_without_side_effects() {
        let mut host = FakeHost::new();
        host.ready = false;
        let mut qs = QuickStart::new(MarkerSequenceMode::FixedGaze, 35.0);

        assert_eq!(run_quick_start(&host, &mut qs).await, Err(Error::NotConnected));
        assert_eq!(host.capture_starts.load(Ordering::SeqCst), 0);
        assert_eq!(qs.phase(), ProcedurePhase::Failed);
    }

    #[test]
    fn phases_are_monotonic() {
        let mut qs = QuickStart::new(MarkerSequenceMode::FixedGaze, 35.0);
        qs.advance(ProcedurePhase::AwaitingCaptureStart).unwrap();
        assert!(qs.advance(ProcedurePhase::NotStarted).is_err());
        qs.advance(ProcedurePhase::Running).unwrap();
        qs.advance(ProcedurePhase::Succeeded).unwrap();
        assert!(qs.advance(ProcedurePhase::Failed).is_err());
        assert_eq!(qs.phase(), ProcedurePhase::Succeeded);
    }

    #[tokio::test]
    async fn closed_slot_fails_waiter() {
        let slot = Arc::new(CompletionSlot::new());
        slot.open();
        let rx = slot.arm().unwrap();
        slot.close(Error::ShuttingDown);
        assert_eq!(rx.await.unwrap(), Err(Error::ShuttingDown));
        assert_eq!(slot.arm().unwrap_err(), Error::NotConnected);
    }

    #[test]
    fn slot_allows_one_waiter() {
        let slot = CompletionSlot::new();
        slot.open();
        let _rx = slot.arm().unwrap();
        assert!(matches!(slot.arm(), Err(Error::InvalidState(_))));
        assert!(slot.complete(Ok(())));
        assert!(!slot.complete(Ok(())));
    }
}
