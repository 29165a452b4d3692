//! Frame Channels
//!
//! Non-blocking datagram transport between a race client and its room.
//! The tick loop only ever calls `try_send`/`try_recv`; a full buffer is a
//! dropped frame, never a stall.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::network::protocol::MAX_FRAME_BYTES;

/// Channel errors. Both are terminal for the race.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Peer went away.
    #[error("channel closed")]
    Closed,

    /// Socket failure.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result of a non-blocking send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame handed to the transport.
    Sent,
    /// Buffer full; frame discarded.
    Dropped,
}

/// What a full buffer does with new frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Keep what is queued, drop the new frame.
    #[default]
    DropNewest,
    /// Overwrite the oldest queued frame.
    DropOldest,
}

/// Bidirectional, non-blocking frame transport.
pub trait FrameChannel {
    /// Queue one encoded frame without blocking.
    fn try_send(&mut self, frame: &[u8]) -> Result<SendOutcome, ChannelError>;

    /// Take the next received frame, if any, without blocking.
    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError>;
}

// =============================================================================
// IN-MEMORY CHANNEL
// =============================================================================

enum Outbound {
    Bounded(mpsc::Sender<Vec<u8>>),
    Ring(broadcast::Sender<Vec<u8>>),
}

enum Inbound {
    Bounded(mpsc::Receiver<Vec<u8>>),
    Ring(broadcast::Receiver<Vec<u8>>),
}

/// One end of an in-process channel pair.
pub struct MemoryChannel {
    tx: Outbound,
    rx: Inbound,
    overwritten: u64,
}

impl MemoryChannel {
    /// Create a connected pair. Each direction buffers `capacity` frames.
    pub fn pair(capacity: usize, policy: OverflowPolicy) -> (Self, Self) {
        let capacity = capacity.max(1);
        match policy {
            OverflowPolicy::DropNewest => {
                let (a_tx, b_rx) = mpsc::channel(capacity);
                let (b_tx, a_rx) = mpsc::channel(capacity);
                (
                    Self::new(Outbound::Bounded(a_tx), Inbound::Bounded(a_rx)),
                    Self::new(Outbound::Bounded(b_tx), Inbound::Bounded(b_rx)),
                )
            }
            OverflowPolicy::DropOldest => {
                let (a_tx, b_rx) = broadcast::channel(capacity);
                let (b_tx, a_rx) = broadcast::channel(capacity);
                (
                    Self::new(Outbound::Ring(a_tx), Inbound::Ring(a_rx)),
                    Self::new(Outbound::Ring(b_tx), Inbound::Ring(b_rx)),
                )
            }
        }
    }

    fn new(tx: Outbound, rx: Inbound) -> Self {
        Self { tx, rx, overwritten: 0 }
    }

    /// Inbound frames overwritten before they were read.
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }
}

impl FrameChannel for MemoryChannel {
    fn try_send(&mut self, frame: &[u8]) -> Result<SendOutcome, ChannelError> {
        match &self.tx {
            Outbound::Bounded(tx) => match tx.try_send(frame.to_vec()) {
                Ok(()) => Ok(SendOutcome::Sent),
                Err(mpsc::error::TrySendError::Full(_)) => Ok(SendOutcome::Dropped),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::Closed),
            },
            Outbound::Ring(tx) => match tx.send(frame.to_vec()) {
                Ok(_) => Ok(SendOutcome::Sent),
                Err(_) => Err(ChannelError::Closed),
            },
        }
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        match &mut self.rx {
            Inbound::Bounded(rx) => match rx.try_recv() {
                Ok(frame) => Ok(Some(frame)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => Err(ChannelError::Closed),
            },
            Inbound::Ring(rx) => loop {
                match rx.try_recv() {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        debug!("{} inbound frames overwritten", skipped);
                        self.overwritten += skipped;
                    }
                    Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                    Err(broadcast::error::TryRecvError::Closed) => return Err(ChannelError::Closed),
                }
            },
        }
    }
}

// =============================================================================
// UDP CHANNEL
// =============================================================================

/// Frame channel over a connected UDP socket.
pub struct UdpFrameChannel {
    socket: UdpSocket,
    buf: Box<[u8]>,
}

impl UdpFrameChannel {
    /// Bind `local` and connect to `peer`.
    pub async fn connect(local: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already connected socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            // One spare byte so oversized datagrams reach the decoder and fail there.
            buf: vec![0u8; MAX_FRAME_BYTES + 1].into_boxed_slice(),
        }
    }

    /// Local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Peer address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Wait until a datagram can be read.
    pub async fn readable(&self) -> io::Result<()> {
        self.socket.readable().await
    }

    /// Wait until a datagram can be written.
    pub async fn writable(&self) -> io::Result<()> {
        self.socket.writable().await
    }
}

impl FrameChannel for UdpFrameChannel {
    fn try_send(&mut self, frame: &[u8]) -> Result<SendOutcome, ChannelError> {
        match self.socket.try_send(frame) {
            Ok(_) => Ok(SendOutcome::Sent),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(SendOutcome::Dropped),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Err(ChannelError::Closed),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        match self.socket.try_recv(&mut self.buf) {
            Ok(len) => Ok(Some(self.buf[..len].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Err(ChannelError::Closed),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }
}
