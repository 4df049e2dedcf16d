//! ## vindkanal-core::transport
//! **The collaborator that actually moves frames between link endpoints**
//!
//! The event core only needs a way to push frames out and a channel of
//! inbound frames to multiplex on. Implementations own whatever I/O they
//! need; inbound reads happen on the implementation's side and are handed
//! over as `Bytes`, so the worker never blocks inside a transport call.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

pub trait Transport: Send {
    /// Pushes one frame toward the far endpoint.
    fn send(&self, frame: &[u8], flags: u32) -> io::Result<()>;

    /// Frames arriving from the far endpoint.
    fn incoming(&self) -> &Receiver<Bytes>;

    /// Releases transport resources; inbound delivery stops afterwards.
    fn close(&self);
}

/// Default buffering of the in-memory pair transport.
const PAIR_CAPACITY: usize = 1024;

/// In-memory transport: two connected endpoints backed by bounded
/// channels. The right-hand endpoint doubles as the far side of the link
/// in tests.
pub struct PairTransport {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
}

impl PairTransport {
    /// Two connected endpoints with default buffering.
    pub fn pair() -> (PairTransport, PairTransport) {
        Self::pair_with_capacity(PAIR_CAPACITY)
    }

    pub fn pair_with_capacity(capacity: usize) -> (PairTransport, PairTransport) {
        let (a_tx, a_rx) = bounded(capacity);
        let (b_tx, b_rx) = bounded(capacity);
        (
            PairTransport { tx: a_tx, rx: b_rx },
            PairTransport { tx: b_tx, rx: a_rx },
        )
    }

    /// Receives one frame on this endpoint, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Bytes> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Transport for PairTransport {
    fn send(&self, frame: &[u8], _flags: u32) -> io::Result<()> {
        match self.tx.try_send(Bytes::copy_from_slice(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(io::ErrorKind::WouldBlock.into()),
            Err(TrySendError::Disconnected(_)) => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    fn incoming(&self) -> &Receiver<Bytes> {
        &self.rx
    }

    fn close(&self) {}
}

/// Largest datagram the UDP transport accepts.
const UDP_FRAME_MAX: usize = 65_536;

/// Poll interval of the reader thread's shutdown check.
const UDP_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// UDP datagram transport with a dedicated reader thread feeding the
/// inbound channel.
pub struct UdpTransport {
    socket: UdpSocket,
    rx: Receiver<Bytes>,
    shutdown: Arc<AtomicBool>,
}

impl UdpTransport {
    pub fn connect(bind: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        Self::from_socket(UdpSocket::bind(bind)?, peer)
    }

    /// Wraps an already-bound socket; useful when the local port must be
    /// known before the peer is configured.
    pub fn from_socket(socket: UdpSocket, peer: SocketAddr) -> io::Result<Self> {
        socket.connect(peer)?;

        let reader = socket.try_clone()?;
        reader.set_read_timeout(Some(UDP_READ_TIMEOUT))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(PAIR_CAPACITY);

        let flag = shutdown.clone();
        std::thread::Builder::new()
            .name("vindkanal-udp-reader".into())
            .spawn(move || udp_reader_loop(reader, tx, flag))
            .map_err(|e| io::Error::other(e.to_string()))?;

        Ok(Self {
            socket,
            rx,
            shutdown,
        })
    }
}

fn udp_reader_loop(socket: UdpSocket, tx: Sender<Bytes>, shutdown: Arc<AtomicBool>) {
    let mut buf = vec![0u8; UDP_FRAME_MAX];
    while !shutdown.load(Ordering::Acquire) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                if tx.send(Bytes::copy_from_slice(&buf[..len])).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("udp reader error: {e}");
                break;
            }
        }
    }
    debug!("udp reader stopped");
}

impl Transport for UdpTransport {
    fn send(&self, frame: &[u8], _flags: u32) -> io::Result<()> {
        self.socket.send(frame).map(|_| ())
    }

    fn incoming(&self) -> &Receiver<Bytes> {
        &self.rx
    }

    fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
