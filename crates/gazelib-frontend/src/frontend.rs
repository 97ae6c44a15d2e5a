//! The frontend facade.
//!
//! [`Frontend`] composes the connection state machine, the command channel,
//! the stream dispatcher and the procedure runner, and owns the background
//! tasks:
//!
//! - the **connect task**, spawned by [`Frontend::start`], which discovers
//!   the service and brings the connection to the ready state;
//! - the **IO task**, spawned once connected, which writes queued commands
//!   to the service, classifies every inbound packet and sweeps timed-out
//!   commands;
//! - at most one **procedure task** running Quick Start.
//!
//! Stream handlers and command callbacks run on the IO task. They must not
//! block, and they must not await [`Frontend::shutdown`] (which waits for
//! the IO task to finish).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use gazelib_core::{
    CameraResolution, ConnectionState, DataRecord, Error, EventControl, EventRecord, EventType,
    FrontendEvent, MarkerSequenceMode, PeerHandle, PeerLink, RawPacket, Result, Service, StreamId,
};

use crate::builder::FrontendOptions;
use crate::codec::{self, Command, ControlMessage, Inbound};
use crate::commands::{CommandCallback, CommandChannel, lock};
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::procedure::{self, CompletionSlot, ProcedureHost, QuickStart};

/// A keyed command waiting to be written by the IO task.
struct Outbound {
    key: u32,
    packet: RawPacket,
}

#[derive(Default)]
struct Tasks {
    cancel: Option<CancellationToken>,
    connect: Option<JoinHandle<()>>,
    io: Option<JoinHandle<()>>,
    procedure: Option<JoinHandle<()>>,
}

struct Shared {
    service: Arc<dyn Service>,
    options: FrontendOptions,
    connection: Connection,
    commands: CommandChannel,
    dispatch: Dispatcher,
    completion: CompletionSlot,
    procedure_busy: AtomicBool,
    camera_active: AtomicBool,
    event_tx: broadcast::Sender<FrontendEvent>,
    peer: Mutex<Option<PeerHandle>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    tasks: Mutex<Tasks>,
}

/// Client runtime for one headset service connection.
///
/// Cheap to clone; clones share the same connection. Construct with
/// [`FrontendBuilder`](crate::FrontendBuilder).
#[derive(Clone)]
pub struct Frontend {
    shared: Arc<Shared>,
}

impl Frontend {
    pub(crate) fn new(service: Arc<dyn Service>, options: FrontendOptions) -> Self {
        let (event_tx, _) = broadcast::channel(options.event_channel_capacity);
        Frontend {
            shared: Arc::new(Shared {
                service,
                commands: CommandChannel::new(options.command_timeout),
                options,
                connection: Connection::new(),
                dispatch: Dispatcher::new(),
                completion: CompletionSlot::new(),
                procedure_busy: AtomicBool::new(false),
                camera_active: AtomicBool::new(false),
                event_tx,
                peer: Mutex::new(None),
                outbound: Mutex::new(None),
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Begin connecting to the service.
    ///
    /// `on_connect` fires exactly once: with `Ok(())` when the connection is
    /// ready, or with the error that ended the attempt. Calling `start`
    /// while not disconnected fails with [`Error::InvalidState`], reported
    /// both through the callback and the return value.
    pub fn start<F>(&self, on_connect: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        // The task table stays locked from the transition to the spawn so
        // that shutdown always sees the connect task.
        let mut tasks = lock(&self.shared.tasks);
        if let Err(e) = self.shared.connection.begin_connect() {
            drop(tasks);
            tracing::debug!(error = %e, "Start rejected");
            on_connect(Err(e.clone()));
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        tasks.connect = Some(tokio::spawn(async move {
            let result = shared.connect(token).await;
            on_connect(result);
        }));
        tasks.cancel = Some(cancel);
        Ok(())
    }

    /// Connect and wait until the connection is ready.
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.start(move |result| {
            let _ = tx.send(result);
        })?;
        rx.await.unwrap_or(Err(Error::ShuttingDown))
    }

    /// Wait until the connection is ready. Fails with
    /// [`Error::ShuttingDown`] once a shutdown begins.
    pub async fn wait_ready(&self) -> Result<()> {
        self.shared.connection.wait_ready().await
    }

    /// Shut the connection down.
    ///
    /// Cancels every pending command with [`Error::ShuttingDown`],
    /// deactivates all streams and waits for the background tasks to
    /// finish, so no handler or callback runs after this returns. Calling
    /// it while disconnected or already shutting down is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let shared = &self.shared;
        let (cancel, connect) = {
            let mut tasks = lock(&shared.tasks);
            if !shared.connection.begin_shutdown() {
                tracing::debug!(state = %shared.connection.state(), "Nothing to shut down");
                return Ok(());
            }
            (tasks.cancel.take(), tasks.connect.take())
        };
        tracing::debug!("Shutting down frontend");

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        // The connect task may still install the IO task, so wait for it
        // before collecting the IO handle.
        if let Some(task) = connect {
            let _ = task.await;
        }
        let io = lock(&shared.tasks).io.take();
        if let Some(task) = io {
            let _ = task.await;
        }

        *lock(&shared.outbound) = None;
        shared.commands.close(Error::ShuttingDown);
        shared.completion.close(Error::ShuttingDown);

        let procedure = lock(&shared.tasks).procedure.take();
        if let Some(task) = procedure {
            let _ = task.await;
        }

        shared.dispatch.deactivate_all();
        shared.camera_active.store(false, Ordering::SeqCst);

        let peer = lock(&shared.peer).take();
        if let Some(peer) = peer {
            if let Err(e) = shared.service.disconnect(peer).await {
                tracing::warn!(error = %e, "Service disconnect failed");
            }
        }

        shared.connection.finish_shutdown();
        let _ = shared.event_tx.send(FrontendEvent::Disconnected);
        tracing::debug!("Frontend shut down");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.connection.is_ready()
    }

    /// The error that ended the last connection attempt or connection.
    pub fn last_error(&self) -> Option<Error> {
        self.shared.connection.last_error()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.watch()
    }

    /// Subscribe to lifecycle events.
    ///
    /// Multiple subscribers can be created; each gets an independent copy
    /// of every event.
    pub fn subscribe(&self) -> broadcast::Receiver<FrontendEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn options(&self) -> &FrontendOptions {
        &self.shared.options
    }

    /// Whether camera capture is active, as last reported by the service.
    pub fn camera_capture_active(&self) -> bool {
        self.shared.camera_active.load(Ordering::SeqCst)
    }

    pub fn is_stream_active(&self, stream: StreamId) -> bool {
        self.shared.dispatch.is_active(stream)
    }

    pub fn stream_rate(&self, stream: StreamId) -> f32 {
        self.shared.dispatch.rate(stream)
    }

    /// Inbound packets dropped because they could not be decoded.
    pub fn decode_error_count(&self) -> u64 {
        self.shared.dispatch.decode_errors()
    }

    /// Records received for streams without an active handler.
    pub fn undelivered_count(&self) -> u64 {
        self.shared.dispatch.undelivered()
    }

    pub fn pending_command_count(&self) -> usize {
        self.shared.commands.pending_count()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Send a command. `callback` fires exactly once with the service's
    /// response data or the reason the command failed.
    pub fn send<F>(&self, command: Command, callback: F)
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        self.shared.send(command, Box::new(callback));
    }

    /// Send a command and wait for its response.
    pub async fn send_command(&self, command: Command) -> Result<Bytes> {
        self.shared.send_command(command).await
    }

    /// Set the rate of a stream. A rate of 0 stops delivery immediately;
    /// a non-zero rate activates the stream once the service accepts it.
    /// When requests overlap, only the most recent one takes effect.
    pub fn set_stream_control<F>(&self, stream: StreamId, rate_hz: f32, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let command = match codec::cmd_stream_control(stream, rate_hz) {
            Ok(command) => command,
            Err(e) => return callback(Err(e)),
        };
        let generation = self.shared.dispatch.request_stream_rate(stream, rate_hz);
        let shared = Arc::clone(&self.shared);
        self.send(command, move |result| {
            callback(result.map(|_| {
                shared.dispatch.accept_stream_rate(stream, rate_hz, generation);
            }))
        });
    }

    /// Enable or disable a family of events on the event stream. Disabling
    /// takes effect immediately.
    pub fn set_event_control<F>(&self, control: EventControl, enabled: bool, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let generation = self.shared.dispatch.request_event_enabled(control, enabled);
        let shared = Arc::clone(&self.shared);
        self.send(codec::cmd_event_control(control, enabled), move |result| {
            callback(result.map(|_| {
                shared
                    .dispatch
                    .accept_event_enabled(control, enabled, generation);
            }))
        });
    }

    pub fn start_camera_capture<F>(
        &self,
        camera_index: u8,
        resolution: CameraResolution,
        callback: F,
    ) where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.send(
            codec::cmd_start_camera(camera_index, resolution),
            move |result| {
                callback(result.map(|_| shared.set_capture(true)));
            },
        );
    }

    pub fn stop_camera_capture<F>(&self, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.send(codec::cmd_stop_camera(), move |result| {
            callback(result.map(|_| shared.set_capture(false)));
        });
    }

    // -----------------------------------------------------------------------
    // Streams
    // -----------------------------------------------------------------------

    /// Register the handler for a stream, replacing any previous one. The
    /// handler receives records only while the stream is enabled.
    ///
    /// A handler for [`StreamId::Events`] sees every record on the event
    /// stream, including event types this crate does not recognise
    /// ([`EventType::Unknown`]). Only the per-type routing of
    /// [`register_event_handler`](Self::register_event_handler) skips them.
    pub fn register_stream_handler<F>(&self, stream: StreamId, handler: F)
    where
        F: Fn(DataRecord) + Send + Sync + 'static,
    {
        self.shared.dispatch.register_stream_handler(stream, handler);
    }

    pub fn unregister_stream_handler(&self, stream: StreamId) -> bool {
        self.shared.dispatch.unregister_stream_handler(stream)
    }

    /// Register the handler for one event type on the event stream.
    pub fn register_event_handler<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.shared.dispatch.register_event_handler(event_type, handler);
    }

    // -----------------------------------------------------------------------
    // Quick Start
    // -----------------------------------------------------------------------

    /// Run the guided Quick Start procedure.
    ///
    /// Starts camera capture with the configured camera if it is not
    /// already running, asks the service to run Quick Start, and waits for
    /// the service to report completion. `callback` fires exactly once with
    /// the outcome. Only one procedure runs at a time.
    pub fn quick_start<F>(&self, mode: MarkerSequenceMode, marker_size_mm: f32, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        if let Err(e) = codec::cmd_quick_start(mode, marker_size_mm) {
            return callback(Err(e));
        }
        if self.shared.procedure_busy.swap(true, Ordering::SeqCst) {
            return callback(Err(Error::InvalidState(
                "a procedure is already running".into(),
            )));
        }

        let mut tasks = lock(&self.shared.tasks);
        if self.shared.connection.state() == ConnectionState::ShuttingDown {
            drop(tasks);
            self.shared.procedure_busy.store(false, Ordering::SeqCst);
            return callback(Err(Error::ShuttingDown));
        }
        let shared = Arc::clone(&self.shared);
        tasks.procedure = Some(tokio::spawn(async move {
            let mut procedure = QuickStart::new(mode, marker_size_mm);
            let result = procedure::run_quick_start(&*shared, &mut procedure).await;
            shared.procedure_busy.store(false, Ordering::SeqCst);
            let _ = shared.event_tx.send(FrontendEvent::QuickStartFinished {
                error: result.clone().err(),
            });
            callback(result);
        }));
    }

    /// Run Quick Start and wait for the outcome.
    pub async fn run_quick_start(
        &self,
        mode: MarkerSequenceMode,
        marker_size_mm: f32,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.quick_start(mode, marker_size_mm, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(Error::ShuttingDown))
    }
}

impl Shared {
    /// Connect task body: discover, install the IO task, become ready.
    async fn connect(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        tracing::debug!("Discovering service");
        let link = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::ShuttingDown),
            link = self.service.discover_and_connect() => link,
        };
        let PeerLink { handle, inbound } = match link {
            Ok(link) => link,
            Err(e) => {
                tracing::debug!(error = %e, "Connection attempt failed");
                self.connection.connect_failed(e.clone());
                return Err(e);
            }
        };

        *lock(&self.peer) = Some(handle);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *lock(&self.outbound) = Some(outbound_tx);
        self.commands.open();
        self.completion.open();

        if !self.connection.mark_ready() {
            *lock(&self.outbound) = None;
            let peer = lock(&self.peer).take();
            if let Some(peer) = peer {
                if let Err(e) = self.service.disconnect(peer).await {
                    tracing::warn!(error = %e, "Service disconnect failed");
                }
            }
            return Err(Error::ShuttingDown);
        }

        let io = tokio::spawn(Arc::clone(&self).io_loop(handle, inbound, outbound_rx, cancel));
        lock(&self.tasks).io = Some(io);

        tracing::debug!(peer = handle.0, "Frontend ready");
        let _ = self.event_tx.send(FrontendEvent::Connected);
        Ok(())
    }

    /// The IO loop. Runs as a spawned Tokio task for the life of one
    /// connection.
    ///
    /// Uses `tokio::select! { biased; }` to prioritize:
    /// 1. Cancellation
    /// 2. Outbound commands
    /// 3. Inbound packets
    /// 4. The command timeout sweep
    async fn io_loop(
        self: Arc<Self>,
        peer: PeerHandle,
        mut inbound: mpsc::Receiver<RawPacket>,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        cancel: CancellationToken,
    ) {
        let mut sweep = tokio::time::interval(self.options.timeout_sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("IO task cancelled");
                    break;
                }

                Some(Outbound { key, packet }) = outbound.recv() => {
                    tracing::trace!(
                        key = key,
                        command = codec::opcode::name(packet.packet_type),
                        "Sending command"
                    );
                    if let Err(e) = self.service.send(peer, packet).await {
                        tracing::debug!(key = key, error = %e, "Command send failed");
                        self.commands.resolve(key, Err(e));
                    }
                }

                packet = inbound.recv() => match packet {
                    Some(packet) => {
                        if !self.handle_packet(packet) {
                            self.handle_loss(Error::ConnectionLost).await;
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("Inbound stream ended");
                        self.handle_loss(Error::ConnectionLost).await;
                        break;
                    }
                },

                _ = sweep.tick() => {
                    self.commands.expire(Instant::now());
                }
            }
        }
    }

    /// Classify and route one inbound packet. Returns `false` when the
    /// service announced it is disconnecting.
    fn handle_packet(&self, packet: RawPacket) -> bool {
        match codec::parse_packet(&packet) {
            Ok(Inbound::Response(response)) => {
                let key = response.key;
                self.commands.resolve(key, response.into_result());
            }
            Ok(Inbound::Data(record)) => {
                if self.connection.is_ready() {
                    self.dispatch.dispatch(record);
                } else {
                    tracing::trace!(stream = %record.stream_id(), "Record while not ready dropped");
                }
            }
            Ok(Inbound::Control(ControlMessage::ProcedureComplete { procedure, ack })) => {
                if procedure != codec::PROCEDURE_QUICK_START {
                    tracing::warn!(procedure = procedure, "Completion for unknown procedure");
                    return true;
                }
                let result = if ack == codec::ACK_SUCCESS {
                    Ok(())
                } else {
                    Err(Error::PeerRejected { code: ack })
                };
                if !self.completion.complete(result) {
                    tracing::warn!(ack = ack, "Quick Start completion with no procedure running");
                }
            }
            Ok(Inbound::Control(ControlMessage::CaptureState { active })) => {
                self.set_capture(active);
            }
            Ok(Inbound::Control(ControlMessage::PeerDisconnecting)) => {
                tracing::debug!("Service is disconnecting");
                return false;
            }
            Err(e) => {
                self.dispatch.record_decode_error();
                tracing::trace!(
                    packet_type = packet.packet_type,
                    error = %e,
                    "Dropping undecodable packet"
                );
            }
        }
        true
    }

    /// Tear down after the service went away.
    async fn handle_loss(&self, error: Error) {
        if !self.connection.is_ready() {
            // A shutdown is in progress and does its own cleanup.
            return;
        }
        tracing::warn!(error = %error, "Connection to service lost");

        let peer = lock(&self.peer).take();
        *lock(&self.outbound) = None;
        self.dispatch.deactivate_all();
        self.camera_active.store(false, Ordering::SeqCst);
        self.commands.close(error.clone());
        self.completion.close(error.clone());

        let moved = self.connection.lost(error.clone());

        if let Some(peer) = peer {
            if let Err(e) = self.service.disconnect(peer).await {
                tracing::debug!(error = %e, "Service disconnect after loss failed");
            }
        }
        if moved {
            let _ = self.event_tx.send(FrontendEvent::ConnectionLost { error });
        }
    }

    fn send(&self, command: Command, callback: CommandCallback) {
        if !self.connection.is_ready() {
            tracing::trace!(command = command.name(), "Command while not ready");
            return callback(Err(Error::NotConnected));
        }
        let key = match self.commands.register(command.opcode, callback) {
            Ok(key) => key,
            Err((e, callback)) => return callback(Err(e)),
        };

        let packet = codec::encode_command(key, &command);
        let queued = lock(&self.outbound)
            .as_ref()
            .is_some_and(|tx| tx.send(Outbound { key, packet }).is_ok());
        if !queued {
            self.commands.resolve(key, Err(Error::NotConnected));
        }
    }

    async fn send_command(&self, command: Command) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.send(
            command,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.unwrap_or(Err(Error::ConnectionLost))
    }

    fn set_capture(&self, active: bool) {
        if self.camera_active.swap(active, Ordering::SeqCst) != active {
            tracing::debug!(active = active, "Camera capture changed");
            let _ = self.event_tx.send(FrontendEvent::CaptureChanged { active });
        }
    }
}

#[async_trait]
impl ProcedureHost for Shared {
    fn is_ready(&self) -> bool {
        self.connection.is_ready()
    }

    fn capture_active(&self) -> bool {
        self.camera_active.load(Ordering::SeqCst)
    }

    async fn start_capture(&self) -> Result<()> {
        let command =
            codec::cmd_start_camera(self.options.camera_index, self.options.camera_resolution);
        self.send_command(command).await?;
        self.set_capture(true);
        Ok(())
    }

    fn arm_completion(&self) -> Result<oneshot::Receiver<Result<()>>> {
        self.completion.arm()
    }

    fn disarm_completion(&self) {
        self.completion.disarm();
    }

    async fn request_quick_start(
        &self,
        mode: MarkerSequenceMode,
        marker_size_mm: f32,
    ) -> Result<()> {
        let command = codec::cmd_quick_start(mode, marker_size_mm)?;
        self.send_command(command).await.map(|_| ())
    }
}
