//! Packet classification, decoding, and command encoding.
//!
//! The service delivers whole packets tagged with a one-byte type. This
//! module sorts them into command responses, connection-control messages,
//! and stream data, and builds outbound command packets.
//!
//! # Packet layouts
//!
//! ```text
//! Command:   [opcode] key:u32le | params...
//! Response:  [0x80]   key:u32le | ack:u8 | data...
//! Control:   [0x81]   code:u8 | body...
//! Gaze:      [0x03]   timestamp:f64le | x:f32le | y:f32le | z:f32le | vergence:f32le
//! Events:    [0x18]   event_type:u8 | timestamp:f64le | payload...
//! ```
//!
//! All encoding/decoding in this module is pure -- no I/O is performed.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use gazelib_core::{
    CameraResolution, DataRecord, Error, EventControl, EventRecord, EventType, GazeSample,
    MarkerSequenceMode, RawPacket, Result, StreamId,
};

/// Packet type of a command response.
pub const PACKET_RESPONSE: u8 = 0x80;

/// Packet type of a connection-control message.
pub const PACKET_CONTROL: u8 = 0x81;

/// Acknowledgement code for a successful command.
pub const ACK_SUCCESS: u8 = 0;

/// Procedure identifier carried in a procedure-complete control message.
pub const PROCEDURE_QUICK_START: u8 = 0x01;

const CONTROL_PEER_DISCONNECTING: u8 = 0x01;
const CONTROL_PROCEDURE_COMPLETE: u8 = 0x02;
const CONTROL_CAPTURE_STATE: u8 = 0x03;

const GAZE_PAYLOAD_LEN: usize = 8 + 4 * 4;
const EVENT_HEADER_LEN: usize = 1 + 8;

/// Command opcodes understood by the service.
pub mod opcode {
    pub const QUICK_START: u8 = 0xB0;
    pub const SET_STREAM_CONTROL: u8 = 0xC0;
    pub const SET_EVENT_CONTROL: u8 = 0xC1;
    pub const START_CAMERA: u8 = 0xD2;
    pub const STOP_CAMERA: u8 = 0xD3;

    /// Human-readable opcode name for logs.
    pub fn name(op: u8) -> &'static str {
        match op {
            QUICK_START => "quick_start",
            SET_STREAM_CONTROL => "set_stream_control",
            SET_EVENT_CONTROL => "set_event_control",
            START_CAMERA => "start_camera",
            STOP_CAMERA => "stop_camera",
            _ => "unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A control command, not yet assigned a correlation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub params: Bytes,
}

impl Command {
    pub fn new(opcode: u8, params: impl Into<Bytes>) -> Self {
        Command {
            opcode,
            params: params.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        opcode::name(self.opcode)
    }
}

/// Encode a command with its correlation key.
pub fn encode_command(key: u32, command: &Command) -> RawPacket {
    let mut buf = BytesMut::with_capacity(4 + command.params.len());
    buf.put_u32_le(key);
    buf.put_slice(&command.params);
    RawPacket::new(command.opcode, buf.freeze())
}

/// Split an outbound command packet back into key and command.
///
/// Used by service implementations and mocks.
pub fn parse_command(packet: &RawPacket) -> Result<(u32, Command)> {
    let mut buf = packet.payload.clone();
    if buf.remaining() < 4 {
        return Err(Error::Decode(format!(
            "command 0x{:02X} too short: {} bytes",
            packet.packet_type,
            buf.len()
        )));
    }
    let key = buf.get_u32_le();
    Ok((key, Command::new(packet.packet_type, buf)))
}

/// Set the rate of a data stream. A rate of 0 stops the stream.
///
/// Example params: `[0x03, <1.0f32 le>]`
pub fn cmd_stream_control(stream: StreamId, rate_hz: f32) -> Result<Command> {
    if !rate_hz.is_finite() || rate_hz < 0.0 {
        return Err(Error::InvalidParameter(format!(
            "stream rate must be a non-negative number, got {rate_hz}"
        )));
    }
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(stream.packet_type());
    buf.put_f32_le(rate_hz);
    Ok(Command::new(opcode::SET_STREAM_CONTROL, buf.freeze()))
}

/// Enable or disable a family of events on the event stream.
pub fn cmd_event_control(control: EventControl, enabled: bool) -> Command {
    Command::new(
        opcode::SET_EVENT_CONTROL,
        vec![control.bit(), u8::from(enabled)],
    )
}

/// Start scene camera capture.
pub fn cmd_start_camera(camera_index: u8, resolution: CameraResolution) -> Command {
    Command::new(opcode::START_CAMERA, vec![camera_index, resolution.code()])
}

/// Stop scene camera capture.
pub fn cmd_stop_camera() -> Command {
    Command::new(opcode::STOP_CAMERA, Bytes::new())
}

/// Ask the service to run its guided Quick Start procedure.
pub fn cmd_quick_start(mode: MarkerSequenceMode, marker_size_mm: f32) -> Result<Command> {
    if !marker_size_mm.is_finite() || marker_size_mm <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "marker size must be positive, got {marker_size_mm} mm"
        )));
    }
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(mode.code());
    buf.put_f32_le(marker_size_mm);
    Ok(Command::new(opcode::QUICK_START, buf.freeze()))
}

// ---------------------------------------------------------------------------
// Inbound packets
// ---------------------------------------------------------------------------

/// A response to a previously-sent command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Correlation key of the originating command.
    pub key: u32,
    /// `ACK_SUCCESS` or a service failure code.
    pub ack: u8,
    /// Response data (may be empty).
    pub data: Bytes,
}

impl Response {
    /// Map the acknowledgement code onto a command result.
    pub fn into_result(self) -> Result<Bytes> {
        if self.ack == ACK_SUCCESS {
            Ok(self.data)
        } else {
            Err(Error::PeerRejected { code: self.ack })
        }
    }
}

/// A connection-control message from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// The service is closing this connection.
    PeerDisconnecting,
    /// A service-side procedure finished.
    ProcedureComplete { procedure: u8, ack: u8 },
    /// Camera capture changed state on the service side.
    CaptureState { active: bool },
}

/// A classified inbound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(Response),
    Control(ControlMessage),
    Data(DataRecord),
}

/// Classify and decode one inbound packet.
pub fn parse_packet(packet: &RawPacket) -> Result<Inbound> {
    match packet.packet_type {
        PACKET_RESPONSE => parse_response(&packet.payload).map(Inbound::Response),
        PACKET_CONTROL => parse_control(&packet.payload).map(Inbound::Control),
        tag => match StreamId::from_packet_type(tag) {
            Some(StreamId::Gaze) => parse_gaze(&packet.payload)
                .map(|g| Inbound::Data(DataRecord::Gaze(g))),
            Some(StreamId::Events) => parse_event(&packet.payload)
                .map(|e| Inbound::Data(DataRecord::Event(e))),
            None => Err(Error::Decode(format!("unknown packet type 0x{tag:02X}"))),
        },
    }
}

fn parse_response(payload: &Bytes) -> Result<Response> {
    let mut buf = payload.clone();
    if buf.remaining() < 5 {
        return Err(Error::Decode(format!(
            "response too short: {} bytes",
            payload.len()
        )));
    }
    let key = buf.get_u32_le();
    let ack = buf.get_u8();
    Ok(Response { key, ack, data: buf })
}

fn parse_control(payload: &Bytes) -> Result<ControlMessage> {
    let mut buf = payload.clone();
    if !buf.has_remaining() {
        return Err(Error::Decode("empty control message".into()));
    }
    match buf.get_u8() {
        CONTROL_PEER_DISCONNECTING => Ok(ControlMessage::PeerDisconnecting),
        CONTROL_PROCEDURE_COMPLETE => {
            if buf.remaining() < 2 {
                return Err(Error::Decode("procedure-complete body too short".into()));
            }
            Ok(ControlMessage::ProcedureComplete {
                procedure: buf.get_u8(),
                ack: buf.get_u8(),
            })
        }
        CONTROL_CAPTURE_STATE => {
            if !buf.has_remaining() {
                return Err(Error::Decode("capture-state body missing".into()));
            }
            Ok(ControlMessage::CaptureState {
                active: buf.get_u8() != 0,
            })
        }
        code => Err(Error::Decode(format!("unknown control code 0x{code:02X}"))),
    }
}

fn parse_gaze(payload: &Bytes) -> Result<GazeSample> {
    if payload.len() < GAZE_PAYLOAD_LEN {
        return Err(Error::Decode(format!(
            "gaze payload too short: {} bytes (need {GAZE_PAYLOAD_LEN})",
            payload.len()
        )));
    }
    let mut buf = payload.clone();
    Ok(GazeSample {
        timestamp: buf.get_f64_le(),
        x: buf.get_f32_le(),
        y: buf.get_f32_le(),
        z: buf.get_f32_le(),
        vergence: buf.get_f32_le(),
    })
}

fn parse_event(payload: &Bytes) -> Result<EventRecord> {
    if payload.len() < EVENT_HEADER_LEN {
        return Err(Error::Decode(format!(
            "event payload too short: {} bytes (need {EVENT_HEADER_LEN})",
            payload.len()
        )));
    }
    let mut buf = payload.clone();
    let event_type = EventType::from_tag(buf.get_u8());
    let timestamp = buf.get_f64_le();
    Ok(EventRecord {
        event_type,
        timestamp,
        payload: buf,
    })
}

// ---------------------------------------------------------------------------
// Service-side builders
//
// Used by service implementations, the test harness, and the demo.
// ---------------------------------------------------------------------------

/// Build a command response packet.
pub fn build_response(key: u32, ack: u8, data: &[u8]) -> RawPacket {
    let mut buf = BytesMut::with_capacity(5 + data.len());
    buf.put_u32_le(key);
    buf.put_u8(ack);
    buf.put_slice(data);
    RawPacket::new(PACKET_RESPONSE, buf.freeze())
}

/// Build a connection-control packet.
pub fn build_control(message: ControlMessage) -> RawPacket {
    let body = match message {
        ControlMessage::PeerDisconnecting => vec![CONTROL_PEER_DISCONNECTING],
        ControlMessage::ProcedureComplete { procedure, ack } => {
            vec![CONTROL_PROCEDURE_COMPLETE, procedure, ack]
        }
        ControlMessage::CaptureState { active } => {
            vec![CONTROL_CAPTURE_STATE, u8::from(active)]
        }
    };
    RawPacket::new(PACKET_CONTROL, body)
}

/// Build a gaze stream packet.
pub fn build_gaze(sample: &GazeSample) -> RawPacket {
    let mut buf = BytesMut::with_capacity(GAZE_PAYLOAD_LEN);
    buf.put_f64_le(sample.timestamp);
    buf.put_f32_le(sample.x);
    buf.put_f32_le(sample.y);
    buf.put_f32_le(sample.z);
    buf.put_f32_le(sample.vergence);
    RawPacket::new(StreamId::Gaze.packet_type(), buf.freeze())
}

/// Build an event stream packet.
pub fn build_event(event_type: EventType, timestamp: f64, payload: &[u8]) -> RawPacket {
    let mut buf = BytesMut::with_capacity(EVENT_HEADER_LEN + payload.len());
    buf.put_u8(event_type.tag());
    buf.put_f64_le(timestamp);
    buf.put_slice(payload);
    RawPacket::new(StreamId::Events.packet_type(), buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaze(t: f64) -> GazeSample {
        GazeSample {
            timestamp: t,
            x: 0.25,
            y: -0.5,
            z: -1.0,
            vergence: 0.05,
        }
    }

    #[test]
    fn encode_command_prefixes_key() {
        let cmd = cmd_event_control(EventControl::Saccade, true);
        let pkt = encode_command(0x0102_0304, &cmd);
        assert_eq!(pkt.packet_type, opcode::SET_EVENT_CONTROL);
        assert_eq!(&pkt.payload[..], &[0x04, 0x03, 0x02, 0x01, 3, 1]);
    }

    #[test]
    fn parse_command_recovers_key_and_params() {
        let cmd = cmd_start_camera(0, CameraResolution::Medium);
        let pkt = encode_command(7, &cmd);
        let (key, parsed) = parse_command(&pkt).unwrap();
        assert_eq!(key, 7);
        assert_eq!(parsed, cmd);
        assert_eq!(parsed.name(), "start_camera");
    }

    #[test]
    fn parse_command_rejects_short_packet() {
        let pkt = RawPacket::new(opcode::STOP_CAMERA, vec![1, 2]);
        assert!(matches!(parse_command(&pkt), Err(Error::Decode(_))));
    }

    #[test]
    fn stream_control_params() {
        let cmd = cmd_stream_control(StreamId::Gaze, 1.0).unwrap();
        assert_eq!(cmd.opcode, opcode::SET_STREAM_CONTROL);
        assert_eq!(cmd.params[0], 0x03);
        assert_eq!(&cmd.params[1..], &1.0f32.to_le_bytes());
    }

    #[test]
    fn stream_control_rejects_negative_rate() {
        assert!(matches!(
            cmd_stream_control(StreamId::Gaze, -5.0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(cmd_stream_control(StreamId::Gaze, f32::NAN).is_err());
    }

    #[test]
    fn quick_start_params() {
        let cmd = cmd_quick_start(MarkerSequenceMode::FixedGaze, 35.0).unwrap();
        assert_eq!(cmd.opcode, opcode::QUICK_START);
        assert_eq!(cmd.params[0], 1);
        assert_eq!(&cmd.params[1..], &35.0f32.to_le_bytes());
    }

    #[test]
    fn quick_start_rejects_zero_marker() {
        assert!(cmd_quick_start(MarkerSequenceMode::FixedHead, 0.0).is_err());
    }

    #[test]
    fn parse_success_response() {
        let pkt = build_response(42, ACK_SUCCESS, b"ok");
        match parse_packet(&pkt).unwrap() {
            Inbound::Response(r) => {
                assert_eq!(r.key, 42);
                assert_eq!(r.into_result().unwrap(), Bytes::from_static(b"ok"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejected_response() {
        let pkt = build_response(9, 3, &[]);
        let Inbound::Response(r) = parse_packet(&pkt).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(r.into_result(), Err(Error::PeerRejected { code: 3 }));
    }

    #[test]
    fn parse_truncated_response_is_decode_error() {
        let pkt = RawPacket::new(PACKET_RESPONSE, vec![1, 0, 0]);
        assert!(matches!(parse_packet(&pkt), Err(Error::Decode(_))));
    }

    #[test]
    fn parse_control_messages() {
        for msg in [
            ControlMessage::PeerDisconnecting,
            ControlMessage::ProcedureComplete {
                procedure: PROCEDURE_QUICK_START,
                ack: 0,
            },
            ControlMessage::CaptureState { active: true },
        ] {
            assert_eq!(
                parse_packet(&build_control(msg)).unwrap(),
                Inbound::Control(msg)
            );
        }
    }

    #[test]
    fn parse_unknown_control_code() {
        let pkt = RawPacket::new(PACKET_CONTROL, vec![0x7F]);
        assert!(matches!(parse_packet(&pkt), Err(Error::Decode(_))));
    }

    #[test]
    fn parse_gaze_sample() {
        let pkt = build_gaze(&gaze(12.5));
        assert_eq!(
            parse_packet(&pkt).unwrap(),
            Inbound::Data(DataRecord::Gaze(gaze(12.5)))
        );
    }

    #[test]
    fn parse_short_gaze_is_decode_error() {
        let pkt = RawPacket::new(StreamId::Gaze.packet_type(), vec![0u8; 10]);
        assert!(matches!(parse_packet(&pkt), Err(Error::Decode(_))));
    }

    #[test]
    fn parse_event_keeps_payload() {
        let pkt = build_event(EventType::Blink, 3.25, &[0xAA, 0xBB]);
        let Inbound::Data(DataRecord::Event(e)) = parse_packet(&pkt).unwrap() else {
            panic!("expected event record");
        };
        assert_eq!(e.event_type, EventType::Blink);
        assert_eq!(e.timestamp, 3.25);
        assert_eq!(&e.payload[..], &[0xAA, 0xBB]);
    }

    #[test]
    fn parse_event_with_unknown_type() {
        let pkt = build_event(EventType::Unknown(99), 1.0, &[]);
        let Inbound::Data(DataRecord::Event(e)) = parse_packet(&pkt).unwrap() else {
            panic!("expected event record");
        };
        assert_eq!(e.event_type, EventType::Unknown(99));
    }

    #[test]
    fn parse_unknown_packet_type() {
        let pkt = RawPacket::new(0x55, vec![0u8; 32]);
        assert!(matches!(parse_packet(&pkt), Err(Error::Decode(_))));
    }
}
