//! # Error Definitions
//!
//! Failures of the protocol layer itself, as opposed to errors raised by
//! the remote application (`RemoteError`).

use orbpack::Error as PackError;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying orbpack encoding failed.
    Pack(PackError),
    /// The structure of the message was malformed (e.g. a missing call id).
    ProtocolViolation(String),
    /// The message kind is not one of the six known kinds.
    UnknownKind(u64),
    /// The first byte of a frame is neither the small nor the large tag.
    UnknownFrameTag(u8),
    /// The buffer ended inside a frame header or payload.
    Truncated,
    /// The payload exceeds what the framing (or the configured limit) allows.
    FrameTooLarge(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Pack(e) => write!(f, "encoding error: {}", e),
            Error::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Error::UnknownKind(kind) => write!(f, "unknown message kind: {}", kind),
            Error::UnknownFrameTag(tag) => write!(f, "unknown frame tag: {:#04x}", tag),
            Error::Truncated => write!(f, "truncated frame"),
            Error::FrameTooLarge(len) => write!(f, "frame of {} bytes is too large", len),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pack(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Pack(e)
    }
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
