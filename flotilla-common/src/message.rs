//! Control-channel wire model shared by the transmitter and every node.
//!
//! One datagram carries one JSON-encoded [`ControlMessage`]:
//!
//! ```json
//! {"timestamp": 1717171717.25, "type": "control_change",
//!  "data": {"control": 70, "value": 0, "channel": 0}}
//! ```
//!
//! The payload shape is fixed by `type`. Anything that does not decode into
//! one of the known kinds is rejected at the receiver and dropped.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Largest datagram a node reads from the control port.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Highest value a MIDI data byte may carry.
const DATA_BYTE_MAX: u8 = 127;
/// Highest MIDI channel number (zero based).
const CHANNEL_MAX: u8 = 15;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("datagram is not a control message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u8 },
}

/// Timestamped control-surface event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Seconds since the Unix epoch on the transmitter clock.
    pub timestamp: f64,
    #[serde(flatten)]
    pub event: ControlEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlEvent {
    NoteOn(NoteData),
    NoteOff(NoteData),
    ControlChange(ControlData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteData {
    pub note: u8,
    pub velocity: u8,
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlData {
    /// Controller number. Sent as `control`, `controller` is accepted too.
    #[serde(rename = "control", alias = "controller")]
    pub controller: u8,
    pub value: u8,
    pub channel: u8,
}

impl ControlMessage {
    /// Wrap an event with the current wall-clock time.
    pub fn now(event: ControlEvent) -> Self {
        let micros = Utc::now().timestamp_micros();
        Self {
            timestamp: micros as f64 / 1_000_000.0,
            event,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and range-check one datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, MessageError> {
        let msg: ControlMessage = serde_json::from_slice(datagram)?;
        msg.event.validate()?;
        Ok(msg)
    }
}

impl ControlEvent {
    /// Short wire name of the event kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlEvent::NoteOn(_) => "note_on",
            ControlEvent::NoteOff(_) => "note_off",
            ControlEvent::ControlChange(_) => "control_change",
        }
    }

    fn validate(&self) -> Result<(), MessageError> {
        let checks: [(&'static str, u8, u8); 3] = match self {
            ControlEvent::NoteOn(n) | ControlEvent::NoteOff(n) => [
                ("note", n.note, DATA_BYTE_MAX),
                ("velocity", n.velocity, DATA_BYTE_MAX),
                ("channel", n.channel, CHANNEL_MAX),
            ],
            ControlEvent::ControlChange(c) => [
                ("control", c.controller, DATA_BYTE_MAX),
                ("value", c.value, DATA_BYTE_MAX),
                ("channel", c.channel, CHANNEL_MAX),
            ],
        };
        for (field, value, max) in checks {
            if value > max {
                return Err(MessageError::OutOfRange { field, value });
            }
        }
        Ok(())
    }
}
