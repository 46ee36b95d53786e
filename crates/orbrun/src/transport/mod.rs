//! # Transport Abstraction
//!
//! Listening and connecting for the byte streams a channel runs over.
//!
//! The runtime only needs an ordered, reliable duplex stream and an
//! identity for the peer at the other end. Framing, correlation and object
//! bookkeeping all live above this layer.

pub mod memory;
pub mod tcp;

#[cfg(unix)]
pub mod local;

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

/// Errors at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// The operation did not complete in time.
    Timeout,
    /// Any other I/O failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Timeout => write!(f, "Transport timed out"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => Self::ConnectionLost(e.to_string()),
            io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A duplex byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxStream = Box<dyn Stream>;

/// Identity of the transport session at the other end of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr(pub String);

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accepts incoming streams.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Waits for the next peer. Returns `ConnectionLost` once no peer can
    /// ever arrive again.
    async fn accept(&self) -> Result<(BoxStream, PeerAddr)>;

    fn local_addr(&self) -> PeerAddr;
}

/// Opens outgoing streams.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(BoxStream, PeerAddr)>;
}
