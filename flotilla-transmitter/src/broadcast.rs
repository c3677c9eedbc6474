//! Best-effort UDP fan-out of control messages.
//!
//! Every message goes to each candidate broadcast address on its own. A
//! failing address is logged and skipped; the send only counts as failed
//! when no address took the datagram. Nothing is acknowledged or retried.

use flotilla_common::{ControlMessage, MessageError};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, warn};

const SEND_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("no valid broadcast address configured")]
    NoCandidates,
    #[error("failed to encode message: {0}")]
    Encode(#[from] MessageError),
    #[error("every broadcast address failed ({attempted} tried)")]
    AllFailed { attempted: usize },
    #[error("socket setup failed: {0}")]
    Socket(#[from] io::Error),
}

/// Where datagrams go. Implemented by [`UdpSocket`]; tests substitute fakes.
pub trait DatagramSink {
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.send_to(payload, target)
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<SocketAddr>,
    pub failed: Vec<(SocketAddr, io::Error)>,
}

pub struct Broadcaster<S> {
    sink: S,
    targets: Vec<SocketAddr>,
}

/// Unbound-port UDP socket allowed to send to broadcast addresses.
pub fn broadcast_socket() -> io::Result<UdpSocket> {
    let sock = UdpSocket::bind(("0.0.0.0", 0))?;
    sock.set_broadcast(true)?;
    sock.set_write_timeout(Some(SEND_TIMEOUT))?;
    Ok(sock)
}

impl<S: DatagramSink> Broadcaster<S> {
    /// Unparseable addresses are logged and left out.
    pub fn new(sink: S, addresses: &[String], port: u16) -> Result<Self, BroadcastError> {
        let targets: Vec<SocketAddr> = addresses
            .iter()
            .filter_map(|a| match a.parse::<IpAddr>() {
                Ok(ip) => Some(SocketAddr::new(ip, port)),
                Err(_) => {
                    warn!("ignoring invalid broadcast address {a:?}");
                    None
                }
            })
            .collect();
        if targets.is_empty() {
            return Err(BroadcastError::NoCandidates);
        }
        Ok(Self { sink, targets })
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    pub fn send(&self, msg: &ControlMessage) -> Result<BroadcastReport, BroadcastError> {
        let payload = msg.encode()?;
        let mut report = BroadcastReport::default();
        for target in &self.targets {
            match self.sink.send_datagram(&payload, *target) {
                Ok(_) => {
                    debug!("sent {} bytes to {target}", payload.len());
                    report.delivered.push(*target);
                }
                Err(e) => {
                    warn!("broadcast to {target} failed: {e}");
                    report.failed.push((*target, e));
                }
            }
        }
        if report.delivered.is_empty() {
            return Err(BroadcastError::AllFailed { attempted: self.targets.len() });
        }
        Ok(report)
    }
}
