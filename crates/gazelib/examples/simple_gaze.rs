//! Stream gaze samples and events from a simulated headset.
//!
//! Demonstrates the typical frontend flow: register handlers, connect,
//! enable the gaze stream at 1 Hz and the blink/saccade events, start the
//! scene camera, then run a Quick Start and print data as it arrives.
//!
//! The service here is simulated in-process so the example runs without
//! hardware. A real application passes its IPC-backed [`Service`] instead.
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=gazelib_frontend=debug cargo run -p gazelib --example simple_gaze
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use gazelib::codec::{self, ACK_SUCCESS, ControlMessage, PROCEDURE_QUICK_START, opcode};
use gazelib::{
    CameraResolution, DataRecord, Error, EventControl, EventType, FrontendBuilder, GazeSample,
    MarkerSequenceMode, PeerHandle, PeerLink, RawPacket, Result, Service, StreamId, log_outcome,
};

/// How long the simulated Quick Start takes.
const QUICK_START_DURATION: Duration = Duration::from_millis(1500);

/// How long to stream after Quick Start before shutting down.
const RUN_TIME: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Simulated service
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SimState {
    link: Option<mpsc::Sender<RawPacket>>,
    generator: Option<JoinHandle<()>>,
    gaze_rate_hz: f32,
    blink: bool,
    saccade: bool,
    capturing: bool,
}

/// An in-process stand-in for the headset service.
#[derive(Clone, Default)]
struct SimulatedService {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedService {
    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn reply(&self, packet: RawPacket) {
        let tx = self.state().link.clone();
        if let Some(tx) = tx {
            let _ = tx.try_send(packet);
        }
    }

    /// Apply a command and return its acknowledgement code.
    fn apply(&self, command: &gazelib::Command) -> u8 {
        let params = &command.params;
        let mut state = self.state();
        match command.opcode {
            opcode::SET_STREAM_CONTROL if params.len() == 5 => {
                if params[0] == StreamId::Gaze.packet_type() {
                    let rate = f32::from_le_bytes([params[1], params[2], params[3], params[4]]);
                    state.gaze_rate_hz = rate;
                }
                ACK_SUCCESS
            }
            opcode::SET_EVENT_CONTROL if params.len() == 2 => {
                let enabled = params[1] != 0;
                if params[0] == EventControl::Blink.bit() {
                    state.blink = enabled;
                } else if params[0] == EventControl::Saccade.bit() {
                    state.saccade = enabled;
                }
                ACK_SUCCESS
            }
            opcode::START_CAMERA => {
                state.capturing = true;
                ACK_SUCCESS
            }
            opcode::STOP_CAMERA => {
                state.capturing = false;
                ACK_SUCCESS
            }
            opcode::QUICK_START if state.capturing => {
                drop(state);
                let service = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(QUICK_START_DURATION).await;
                    service.reply(codec::build_control(ControlMessage::ProcedureComplete {
                        procedure: PROCEDURE_QUICK_START,
                        ack: ACK_SUCCESS,
                    }));
                });
                ACK_SUCCESS
            }
            // Quick Start without a running camera.
            opcode::QUICK_START => 2,
            _ => 1,
        }
    }

    /// Emit gaze at the requested rate and a blink or saccade now and then.
    async fn generate(self, tx: mpsc::Sender<RawPacket>) {
        let connected_at = Instant::now();
        let mut last_gaze = connected_at;
        let mut tick = tokio::time::interval(Duration::from_millis(10));
        let mut ticks: u64 = 0;

        loop {
            tick.tick().await;
            ticks += 1;
            let (rate, blink, saccade) = {
                let state = self.state();
                (state.gaze_rate_hz, state.blink, state.saccade)
            };
            let now = Instant::now();
            let t = now.duration_since(connected_at).as_secs_f64();

            if rate > 0.0 && now.duration_since(last_gaze).as_secs_f32() >= 1.0 / rate {
                last_gaze = now;
                let phase = t as f32;
                let sample = GazeSample {
                    timestamp: t,
                    x: phase.sin() * 0.2,
                    y: phase.cos() * 0.1,
                    z: -1.0,
                    vergence: 0.05,
                };
                if tx.send(codec::build_gaze(&sample)).await.is_err() {
                    break;
                }
            }

            let event = match ticks % 250 {
                100 if blink => Some(EventType::Blink),
                200 if saccade => Some(EventType::Saccade),
                _ => None,
            };
            if let Some(event) = event {
                if tx.send(codec::build_event(event, t, &[])).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Service for SimulatedService {
    async fn discover_and_connect(&self) -> Result<PeerLink> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (tx, rx) = mpsc::channel(64);
        let generator = tokio::spawn(self.clone().generate(tx.clone()));
        let mut state = self.state();
        state.link = Some(tx);
        state.generator = Some(generator);
        Ok(PeerLink {
            handle: PeerHandle(1),
            inbound: rx,
        })
    }

    async fn send(&self, _peer: PeerHandle, packet: RawPacket) -> Result<()> {
        let (key, command) = codec::parse_command(&packet)?;
        let ack = self.apply(&command);
        self.reply(codec::build_response(key, ack, &[]));
        Ok(())
    }

    async fn disconnect(&self, _peer: PeerHandle) -> Result<()> {
        let mut state = self.state();
        state.link = None;
        if let Some(generator) = state.generator.take() {
            generator.abort();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Demo
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let frontend = FrontendBuilder::new(SimulatedService::default())
        .camera(0, CameraResolution::Medium)
        .build();

    // Output stays quiet until Quick Start has been requested.
    let allow_output = Arc::new(AtomicBool::new(false));

    {
        let allow_output = Arc::clone(&allow_output);
        frontend.register_stream_handler(StreamId::Gaze, move |record| {
            if !allow_output.load(Ordering::Relaxed) {
                return;
            }
            if let DataRecord::Gaze(g) = record {
                println!(
                    "Gaze data\n\
                     Time since connection:\t{}\n\
                     X coordinate:\t\t{}\n\
                     Y coordinate:\t\t{}\n\
                     Z coordinate:\t\t{}\n\
                     Vergence angle:\t\t{}\n",
                    g.timestamp, g.x, g.y, g.z, g.vergence
                );
            }
        });
    }
    for (event_type, label) in [(EventType::Blink, "Blink!"), (EventType::Saccade, "Saccade!")] {
        let allow_output = Arc::clone(&allow_output);
        frontend.register_event_handler(event_type, move |_| {
            if allow_output.load(Ordering::Relaxed) {
                println!("{label}");
            }
        });
    }

    println!("Starting frontend...");
    let configured = frontend.clone();
    frontend.start(move |result| match result {
        Ok(()) => {
            println!("Connected to headset service");
            configured.set_stream_control(StreamId::Gaze, 1.0, log_outcome("gaze rate"));
            configured.set_event_control(EventControl::Blink, true, log_outcome("blink events"));
            configured.set_event_control(
                EventControl::Saccade,
                true,
                log_outcome("saccade events"),
            );
            configured.start_camera_capture(
                0,
                CameraResolution::Medium,
                log_outcome("start camera"),
            );
        }
        Err(e) => eprintln!("Connection failed: {e}"),
    })?;
    frontend.wait_ready().await?;

    println!("Running Quick Start...");
    allow_output.store(true, Ordering::Relaxed);
    match frontend
        .run_quick_start(MarkerSequenceMode::FixedGaze, 35.0)
        .await
    {
        Ok(()) => println!("Quick Start complete"),
        Err(Error::PeerRejected { code }) => println!("Quick Start rejected (code {code})"),
        Err(e) => println!("Quick Start failed: {e}"),
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("Interrupted"),
        _ = tokio::time::sleep(RUN_TIME) => {}
    }

    if let Err(e) = frontend.send_command(codec::cmd_stop_camera()).await {
        tracing::warn!(error = %e, "Failed to stop camera capture");
    }
    frontend.shutdown().await?;
    println!("Frontend shut down");
    Ok(())
}
