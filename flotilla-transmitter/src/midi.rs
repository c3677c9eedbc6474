//! Byte-level MIDI decoding for raw device streams.
//!
//! Only note-on, note-off and control-change leave the parser. Other channel
//! messages are consumed so they do not desynchronise the stream.

use flotilla_common::{ControlData, ControlEvent, NoteData};

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;
const CHANNEL_PRESSURE: u8 = 0xD0;

#[derive(Debug, Default)]
pub struct MidiParser {
    running_status: Option<u8>,
    pending: [u8; 2],
    len: usize,
}

impl MidiParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, byte: u8) -> Option<ControlEvent> {
        match byte {
            // System real-time may appear anywhere and leaves running status alone.
            0xF8..=0xFF => None,
            // SysEx and system common cancel running status.
            0xF0..=0xF7 => {
                self.running_status = None;
                self.len = 0;
                None
            }
            0x80..=0xEF => {
                self.running_status = Some(byte);
                self.len = 0;
                None
            }
            data => {
                let status = self.running_status?;
                self.pending[self.len] = data;
                self.len += 1;
                if self.len < data_len(status) {
                    return None;
                }
                self.len = 0;
                decode(status, self.pending)
            }
        }
    }

    pub fn feed_all(&mut self, bytes: &[u8]) -> Vec<ControlEvent> {
        bytes.iter().filter_map(|b| self.feed(*b)).collect()
    }
}

fn data_len(status: u8) -> usize {
    match status & 0xF0 {
        PROGRAM_CHANGE | CHANNEL_PRESSURE => 1,
        _ => 2,
    }
}

fn decode(status: u8, data: [u8; 2]) -> Option<ControlEvent> {
    let channel = status & 0x0F;
    match status & 0xF0 {
        NOTE_ON => Some(ControlEvent::NoteOn(NoteData { note: data[0], velocity: data[1], channel })),
        NOTE_OFF => Some(ControlEvent::NoteOff(NoteData { note: data[0], velocity: data[1], channel })),
        CONTROL_CHANGE => Some(ControlEvent::ControlChange(ControlData {
            controller: data[0],
            value: data[1],
            channel,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_and_control_change() {
        let mut parser = MidiParser::new();
        let events = parser.feed_all(&[0x90, 36, 100, 0xB1, 70, 0]);
        assert_eq!(
            events,
            vec![
                ControlEvent::NoteOn(NoteData { note: 36, velocity: 100, channel: 0 }),
                ControlEvent::ControlChange(ControlData { controller: 70, value: 0, channel: 1 }),
            ]
        );
    }

    #[test]
    fn test_running_status() {
        let mut parser = MidiParser::new();
        let events = parser.feed_all(&[0xB0, 70, 10, 70, 20, 70, 30]);
        let values: Vec<u8> = events
            .iter()
            .map(|e| match e {
                ControlEvent::ControlChange(c) => c.value,
                _ => panic!("unexpected {e:?}"),
            })
            .collect();
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[test]
    fn test_realtime_bytes_interleaved() {
        let mut parser = MidiParser::new();
        let events = parser.feed_all(&[0x80, 0xF8, 40, 0xFE, 0]);
        assert_eq!(events, vec![ControlEvent::NoteOff(NoteData { note: 40, velocity: 0, channel: 0 })]);
    }

    #[test]
    fn test_other_channel_messages_are_consumed() {
        let mut parser = MidiParser::new();
        // program change (1 data byte), pitch bend (2), then a note-on
        let events = parser.feed_all(&[0xC0, 5, 0xE0, 0, 64, 0x90, 37, 1]);
        assert_eq!(events, vec![ControlEvent::NoteOn(NoteData { note: 37, velocity: 1, channel: 0 })]);
    }

    #[test]
    fn test_sysex_is_skipped() {
        let mut parser = MidiParser::new();
        let events = parser.feed_all(&[0xF0, 0x47, 0x7F, 0x75, 0xF7, 0x90, 36, 5]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_data_without_status_is_ignored() {
        let mut parser = MidiParser::new();
        assert!(parser.feed_all(&[10, 20, 30]).is_empty());
    }
}
