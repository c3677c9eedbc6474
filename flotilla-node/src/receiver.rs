//! UDP side of a node: decode control datagrams and hand them to the blink driver.

use flotilla_common::message::MAX_DATAGRAM_SIZE;
use flotilla_common::ControlMessage;
use nix::sys::socket::{bind, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn};
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::AsRawFd;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverStats {
    pub accepted: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub receive_errors: u64,
}

const RECV_ERROR_PAUSE: Duration = Duration::from_millis(50);
const RECV_ERROR_LOG_EVERY: u64 = 100;

/// Consecutive socket errors. Only the first of a run and every
/// `RECV_ERROR_LOG_EVERY`th after it are logged.
#[derive(Debug, Default)]
struct ErrorRun {
    consecutive: u64,
}

impl ErrorRun {
    fn fail(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive == 1 || self.consecutive % RECV_ERROR_LOG_EVERY == 0
    }

    fn clear(&mut self) {
        if self.consecutive > 1 {
            debug!("socket recovered after {} errors", self.consecutive);
        }
        self.consecutive = 0;
    }
}

pub struct BroadcastReceiver {
    socket: UdpSocket,
}

impl BroadcastReceiver {
    /// Bind with address/port reuse so several nodes on one host can listen together.
    /// Must be called inside a tokio runtime.
    pub fn bind(addr: SocketAddrV4) -> io::Result<Self> {
        let std_socket = reusable_udp_socket(addr)?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        info!("listening for control broadcasts on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until the inbox closes. Bad datagrams are logged and dropped.
    pub async fn run(self, inbox: mpsc::Sender<ControlMessage>) -> ReceiverStats {
        let mut stats = ReceiverStats::default();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut errors = ErrorRun::default();

        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => {
                    errors.clear();
                    received
                }
                Err(e) => {
                    stats.receive_errors += 1;
                    if errors.fail() {
                        warn!("receive failed ({} in a row): {e}", errors.consecutive);
                    }
                    tokio::time::sleep(RECV_ERROR_PAUSE).await;
                    continue;
                }
            };

            let msg = match ControlMessage::decode(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    stats.rejected += 1;
                    warn!("dropping datagram from {peer}: {e}");
                    continue;
                }
            };
            debug!("{} from {peer}", msg.event.kind());

            match inbox.try_send(msg) {
                Ok(()) => stats.accepted += 1,
                Err(TrySendError::Full(_)) => {
                    stats.dropped += 1;
                    warn!("blink controller busy, dropping control message");
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }

        debug!("receiver stopped: {stats:?}");
        stats
    }
}

fn reusable_udp_socket(addr: SocketAddrV4) -> io::Result<std::net::UdpSocket> {
    let fd = socket(AddressFamily::Inet, SockType::Datagram, SockFlag::empty(), None)?;
    setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    setsockopt(&fd, sockopt::ReusePort, &true)?;
    bind(fd.as_raw_fd(), &SockaddrIn::from(addr))?;
    Ok(std::net::UdpSocket::from(fd))
}
