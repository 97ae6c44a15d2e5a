//! Core types used throughout gazelib.
//!
//! Streams, decoded records, and the opaque device configuration values
//! that the frontend passes through to the service unchanged.

use std::fmt;

use bytes::Bytes;

/// Lifecycle state of a frontend's connection to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection; the initial and final state.
    #[default]
    Disconnected,
    /// Peer discovery and connection are in progress.
    Connecting,
    /// Connected; commands and streams may be used.
    Ready,
    /// `shutdown()` is cancelling outstanding work.
    ShuttingDown,
}

impl ConnectionState {
    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Ready)
                | (Connecting, Disconnected)
                | (Connecting, ShuttingDown)
                | (Ready, ShuttingDown)
                | (Ready, Disconnected)
                | (ShuttingDown, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::ShuttingDown => "shutting-down",
        };
        write!(f, "{s}")
    }
}

/// Identifier of a rate-controlled data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    /// Binocular gaze vector and vergence.
    Gaze,
    /// The multiplexed event stream (blinks, saccades, trackloss).
    Events,
}

impl StreamId {
    /// Every stream the frontend knows how to decode.
    pub const ALL: [StreamId; 2] = [StreamId::Gaze, StreamId::Events];

    /// Packet type tag used by the service for this stream.
    pub fn packet_type(self) -> u8 {
        match self {
            StreamId::Gaze => 0x03,
            StreamId::Events => 0x18,
        }
    }

    /// Look up the stream carried by a packet type tag.
    pub fn from_packet_type(tag: u8) -> Option<StreamId> {
        StreamId::ALL.into_iter().find(|s| s.packet_type() == tag)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Gaze => write!(f, "gaze"),
            StreamId::Events => write!(f, "events"),
        }
    }
}

/// One sample from the gaze stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeSample {
    /// Seconds since the tracker started streaming.
    pub timestamp: f64,
    /// Gaze vector X component.
    pub x: f32,
    /// Gaze vector Y component.
    pub y: f32,
    /// Gaze vector Z component.
    pub z: f32,
    /// Vergence angle in radians.
    pub vergence: f32,
}

/// Type tag of a record on the event stream.
///
/// Tags the frontend does not recognise decode to [`EventType::Unknown`]
/// so that newer services do not break older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Blink,
    EyeClosed,
    EyeOpened,
    TracklossStart,
    TracklossEnd,
    Saccade,
    SaccadeStart,
    SaccadeEnd,
    Unknown(u8),
}

impl EventType {
    /// Decode a raw type tag.
    pub fn from_tag(tag: u8) -> EventType {
        match tag {
            1 => EventType::Blink,
            2 => EventType::EyeClosed,
            3 => EventType::EyeOpened,
            4 => EventType::TracklossStart,
            5 => EventType::TracklossEnd,
            6 => EventType::Saccade,
            7 => EventType::SaccadeStart,
            8 => EventType::SaccadeEnd,
            other => EventType::Unknown(other),
        }
    }

    /// The raw type tag.
    pub fn tag(self) -> u8 {
        match self {
            EventType::Blink => 1,
            EventType::EyeClosed => 2,
            EventType::EyeOpened => 3,
            EventType::TracklossStart => 4,
            EventType::TracklossEnd => 5,
            EventType::Saccade => 6,
            EventType::SaccadeStart => 7,
            EventType::SaccadeEnd => 8,
            EventType::Unknown(tag) => tag,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, EventType::Unknown(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Blink => "blink",
            EventType::EyeClosed => "eye-closed",
            EventType::EyeOpened => "eye-opened",
            EventType::TracklossStart => "trackloss-start",
            EventType::TracklossEnd => "trackloss-end",
            EventType::Saccade => "saccade",
            EventType::SaccadeStart => "saccade-start",
            EventType::SaccadeEnd => "saccade-end",
            EventType::Unknown(tag) => return write!(f, "unknown({tag})"),
        };
        write!(f, "{s}")
    }
}

/// One record from the event stream.
///
/// The payload carries event-specific values (e.g. blink duration) and is
/// passed through undecoded.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event_type: EventType,
    pub timestamp: f64,
    pub payload: Bytes,
}

/// A decoded record delivered to a stream handler.
#[derive(Debug, Clone, PartialEq)]
pub enum DataRecord {
    Gaze(GazeSample),
    Event(EventRecord),
}

impl DataRecord {
    /// The stream this record belongs to.
    pub fn stream_id(&self) -> StreamId {
        match self {
            DataRecord::Gaze(_) => StreamId::Gaze,
            DataRecord::Event(_) => StreamId::Events,
        }
    }

    /// Timestamp of the record in seconds.
    pub fn timestamp(&self) -> f64 {
        match self {
            DataRecord::Gaze(g) => g.timestamp,
            DataRecord::Event(e) => e.timestamp,
        }
    }
}

/// A family of event types that the service enables or disables together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventControl {
    Blink,
    EyeCloseOpen,
    TracklossStartEnd,
    Saccade,
    SaccadeStartEnd,
}

impl EventControl {
    /// Bit index of this family in the service's event control mask.
    pub fn bit(self) -> u8 {
        match self {
            EventControl::Blink => 0,
            EventControl::EyeCloseOpen => 1,
            EventControl::TracklossStartEnd => 2,
            EventControl::Saccade => 3,
            EventControl::SaccadeStartEnd => 4,
        }
    }

    /// The event types emitted while this family is enabled.
    pub fn event_types(self) -> &'static [EventType] {
        match self {
            EventControl::Blink => &[EventType::Blink],
            EventControl::EyeCloseOpen => &[EventType::EyeClosed, EventType::EyeOpened],
            EventControl::TracklossStartEnd => {
                &[EventType::TracklossStart, EventType::TracklossEnd]
            }
            EventControl::Saccade => &[EventType::Saccade],
            EventControl::SaccadeStartEnd => &[EventType::SaccadeStart, EventType::SaccadeEnd],
        }
    }
}

/// Marker sequence shown by the service during Quick Start. Opaque to the
/// frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerSequenceMode {
    FixedHead,
    FixedGaze,
}

impl MarkerSequenceMode {
    pub fn code(self) -> u8 {
        match self {
            MarkerSequenceMode::FixedHead => 0,
            MarkerSequenceMode::FixedGaze => 1,
        }
    }
}

/// Capture resolution of the scene camera. Opaque to the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CameraResolution {
    Low,
    #[default]
    Medium,
    High,
}

impl CameraResolution {
    pub fn code(self) -> u8 {
        match self {
            CameraResolution::Low => 0,
            CameraResolution::Medium => 1,
            CameraResolution::High => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_lifecycle_transitions() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition(Connecting));
        assert!(Connecting.can_transition(Ready));
        assert!(Ready.can_transition(ShuttingDown));
        assert!(ShuttingDown.can_transition(Disconnected));
    }

    #[test]
    fn connection_state_rejects_shortcuts() {
        use ConnectionState::*;
        assert!(!Disconnected.can_transition(Ready));
        assert!(!Disconnected.can_transition(ShuttingDown));
        assert!(!ShuttingDown.can_transition(Ready));
        assert!(!Ready.can_transition(Connecting));
    }

    #[test]
    fn stream_id_packet_type_lookup() {
        assert_eq!(StreamId::from_packet_type(0x03), Some(StreamId::Gaze));
        assert_eq!(StreamId::from_packet_type(0x18), Some(StreamId::Events));
        assert_eq!(StreamId::from_packet_type(0x42), None);
    }

    #[test]
    fn event_type_unknown_tags_are_preserved() {
        let t = EventType::from_tag(200);
        assert_eq!(t, EventType::Unknown(200));
        assert_eq!(t.tag(), 200);
        assert!(!t.is_known());
        assert_eq!(t.to_string(), "unknown(200)");
    }

    #[test]
    fn event_type_known_tags() {
        assert_eq!(EventType::from_tag(1), EventType::Blink);
        assert_eq!(EventType::from_tag(6), EventType::Saccade);
        assert_eq!(EventType::Saccade.tag(), 6);
    }

    #[test]
    fn event_control_families() {
        assert_eq!(EventControl::Blink.event_types(), &[EventType::Blink]);
        assert!(
            EventControl::EyeCloseOpen
                .event_types()
                .contains(&EventType::EyeOpened)
        );
        assert_eq!(EventControl::SaccadeStartEnd.bit(), 4);
    }

    #[test]
    fn data_record_stream_and_timestamp() {
        let gaze = DataRecord::Gaze(GazeSample {
            timestamp: 1.5,
            x: 0.0,
            y: 0.0,
            z: -1.0,
            vergence: 0.1,
        });
        assert_eq!(gaze.stream_id(), StreamId::Gaze);
        assert_eq!(gaze.timestamp(), 1.5);

        let event = DataRecord::Event(EventRecord {
            event_type: EventType::Blink,
            timestamp: 2.0,
            payload: Bytes::new(),
        });
        assert_eq!(event.stream_id(), StreamId::Events);
    }
}
