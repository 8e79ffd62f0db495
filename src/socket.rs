//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::protocol::Message`] instead of raw bytes.  All protocol logic
//! lives elsewhere; this module owns only byte I/O.
//!
//! [`Transport`] is the seam the session event loop is generic over, so the
//! fault-injecting [`crate::simulator::Simulator`] can stand in for the real
//! socket.

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::protocol::{CodecError, Message};

/// Largest datagram the receive buffer accepts.
pub const MAX_DATAGRAM: usize = 65_535;

/// Largest UDP payload one IPv4 datagram can carry.
pub const MAX_IPV4_PAYLOAD: usize = 65_507;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Error, Debug)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The datagram could not be framed or parsed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl SocketError {
    /// `true` for errors that concern only one datagram; the socket stays usable.
    ///
    /// ICMP port-unreachable surfaces as `ConnectionRefused`/`ConnectionReset`
    /// on some platforms while the peer has not bound its port yet.
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            SocketError::Codec(_) => true,
            SocketError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
            ),
        }
    }

    /// `true` when the OS refused a datagram as too large to send in one piece
    /// (`EMSGSIZE`).  Nothing left the host; the socket stays usable.
    pub fn is_oversized(&self) -> bool {
        match self {
            SocketError::Io(e) => e.raw_os_error().is_some_and(is_emsgsize),
            SocketError::Codec(_) => false,
        }
    }
}

fn is_emsgsize(code: i32) -> bool {
    if cfg!(windows) {
        code == 10040 // WSAEMSGSIZE
    } else if cfg!(any(target_os = "linux", target_os = "android")) {
        code == 90
    } else {
        code == 40 // macOS and the BSDs
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A message-oriented, unreliable datagram endpoint.
pub trait Transport: Send + Sync + 'static {
    /// Encode `msg` and send it as a single datagram to `dest`.
    fn send_to(
        &self,
        msg: &Message,
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), SocketError>> + Send;

    /// Receive the next datagram and decode it.
    fn recv_from(&self) -> impl Future<Output = Result<(Message, SocketAddr), SocketError>> + Send;

    /// Address this endpoint is bound to.
    fn local_addr(&self) -> SocketAddr;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, message-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks if needed.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[socket] bound {local_addr}");
        Ok(Self { local_addr, inner })
    }

    /// Send raw bytes, bypassing the codec.
    pub async fn send_raw(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }
}

impl Transport for Socket {
    async fn send_to(&self, msg: &Message, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = msg.encode()?;
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Datagrams that fail to decode are returned as `Err(SocketError::Codec)`;
    /// the caller decides whether to keep reading.
    async fn recv_from(&self) -> Result<(Message, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let msg = Message::decode(&buf[..n])?;
        Ok((msg, addr))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
