//! Control-surface access through ALSA raw MIDI device files.
//!
//! Ports are discovered from `/dev/snd/midiC<card>D<device>`; the human
//! readable name comes from `/proc/asound`. Devices are opened non-blocking
//! so a poll returns only what arrived since the previous one.

use crate::midi::MidiParser;
use flotilla_common::ControlEvent;
use nix::fcntl::OFlag;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEV_SND: &str = "/dev/snd";
const PROC_ASOUND: &str = "/proc/asound";

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("no MIDI input ports found")]
    NoPorts,
    #[error("no MIDI port at index {0}")]
    BadIndex(usize),
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: std::io::Error },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of control-surface events.
pub trait ControlSurface {
    fn name(&self) -> &str;

    /// Every event received since the previous call, oldest first.
    fn poll_pending(&mut self) -> Result<Vec<ControlEvent>, SurfaceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPort {
    pub name: String,
    pub path: PathBuf,
}

/// Enumerate raw MIDI ports, ordered by card then device.
pub fn list_ports() -> Result<Vec<MidiPort>, SurfaceError> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(DEV_SND)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some((card, device)) = parse_device_name(&file_name.to_string_lossy()) else {
            continue;
        };
        let name = port_name(Path::new(PROC_ASOUND), card, device);
        found.push(((card, device), MidiPort { name, path: entry.path() }));
    }
    found.sort_by_key(|(key, _)| *key);
    Ok(found.into_iter().map(|(_, port)| port).collect())
}

/// First port whose name contains `hint`.
pub fn find_port<'a>(ports: &'a [MidiPort], hint: &str) -> Option<&'a MidiPort> {
    ports.iter().find(|p| p.name.contains(hint))
}

fn parse_device_name(file_name: &str) -> Option<(u32, u32)> {
    let rest = file_name.strip_prefix("midiC")?;
    let (card, device) = rest.split_once('D')?;
    Some((card.parse().ok()?, device.parse().ok()?))
}

fn port_name(proc_root: &Path, card: u32, device: u32) -> String {
    let card_dir = proc_root.join(format!("card{card}"));
    let label = std::fs::read_to_string(card_dir.join(format!("midi{device}")))
        .ok()
        .and_then(|txt| txt.lines().next().map(|l| l.trim().to_string()))
        .filter(|l| !l.is_empty())
        .or_else(|| {
            std::fs::read_to_string(card_dir.join("id"))
                .ok()
                .map(|id| id.trim().to_string())
        })
        .unwrap_or_else(|| format!("card{card}"));
    format!("{label} (hw:{card},{device})")
}

/// Raw MIDI input opened in non-blocking mode.
pub struct RawMidiInput {
    name: String,
    file: File,
    parser: MidiParser,
    buf: [u8; 256],
}

impl RawMidiInput {
    pub fn open(port: &MidiPort) -> Result<Self, SurfaceError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&port.path)
            .map_err(|source| SurfaceError::Open { path: port.path.clone(), source })?;
        debug!("opened {}", port.path.display());
        Ok(Self { name: port.name.clone(), file, parser: MidiParser::new(), buf: [0; 256] })
    }
}

impl ControlSurface for RawMidiInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_pending(&mut self) -> Result<Vec<ControlEvent>, SurfaceError> {
        let mut events = Vec::new();
        loop {
            match self.file.read(&mut self.buf) {
                Ok(0) => break,
                Ok(n) => events.extend(self.parser.feed_all(&self.buf[..n])),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_name() {
        assert_eq!(parse_device_name("midiC1D0"), Some((1, 0)));
        assert_eq!(parse_device_name("midiC12D3"), Some((12, 3)));
        assert_eq!(parse_device_name("pcmC0D0p"), None);
        assert_eq!(parse_device_name("midiCxD0"), None);
        assert_eq!(parse_device_name("controlC0"), None);
    }

    #[test]
    fn test_port_name_prefers_midi_label() {
        let dir = tempfile::tempdir().unwrap();
        let card = dir.path().join("card1");
        std::fs::create_dir_all(&card).unwrap();
        std::fs::write(card.join("id"), "LPD8\n").unwrap();
        std::fs::write(card.join("midi0"), "LPD8 MIDI 1\n\nOutput 0\n").unwrap();
        assert_eq!(port_name(dir.path(), 1, 0), "LPD8 MIDI 1 (hw:1,0)");
        assert_eq!(port_name(dir.path(), 1, 1), "LPD8 (hw:1,1)");
        assert_eq!(port_name(dir.path(), 2, 0), "card2 (hw:2,0)");
    }

    #[test]
    fn test_find_port_by_substring() {
        let ports = vec![
            MidiPort { name: "Midi Through (hw:0,0)".into(), path: "/dev/snd/midiC0D0".into() },
            MidiPort { name: "LPD8 MIDI 1 (hw:1,0)".into(), path: "/dev/snd/midiC1D0".into() },
        ];
        assert_eq!(find_port(&ports, "LPD8").map(|p| p.path.clone()), Some("/dev/snd/midiC1D0".into()));
        assert!(find_port(&ports, "nanoKONTROL").is_none());
    }

    #[test]
    fn test_poll_reads_pending_bytes_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("midiC9D0");
        std::fs::write(&path, [0x90u8, 36, 64, 0xB0, 70, 12]).unwrap();
        let port = MidiPort { name: "fake".into(), path };
        let mut input = RawMidiInput::open(&port).unwrap();
        assert_eq!(input.poll_pending().unwrap().len(), 2);
        assert!(input.poll_pending().unwrap().is_empty());
    }
}
