//! # Errors
//!
//! `Error` is what the caller of a proxy method (or of `connect`/`listen`)
//! observes. Infrastructure failures are always `Error::CallFailed`; errors
//! raised by the remote method itself arrive as `Error::Remote` and can be
//! reconstructed into their original type with [`Error::downcast`].

use std::fmt;

use orbrpc::RemoteError;
use orbrpc::message::kinds;

use crate::repository;
use crate::transport;

/// Why a remote call did not produce a result.
#[derive(Debug, Clone, PartialEq)]
pub enum CallFailure {
    /// The channel is not open, or closed while the call was outstanding.
    Disconnected,
    /// The waiter was released without a response.
    Cancelled,
    Timeout,
    Transport(transport::Error),
    /// A malformed frame or message.
    Protocol(orbrpc::Error),
    /// No object on the peer serves the requested type id.
    ObjectNotFound(String),
    /// A contract or member could not be resolved.
    Unresolvable(String),
    /// Arguments or results did not have the declared shape.
    BadArguments(String),
    /// The peer's runtime refused the call (unknown instance, unknown member...).
    Rejected(RemoteError),
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "channel disconnected"),
            Self::Cancelled => write!(f, "call cancelled"),
            Self::Timeout => write!(f, "call timed out"),
            Self::Transport(e) => write!(f, "{}", e),
            Self::Protocol(e) => write!(f, "{}", e),
            Self::ObjectNotFound(type_id) => write!(f, "no server object for '{}'", type_id),
            Self::Unresolvable(what) => write!(f, "cannot resolve {}", what),
            Self::BadArguments(msg) => write!(f, "bad arguments: {}", msg),
            Self::Rejected(e) => write!(f, "rejected by peer: {}", e),
        }
    }
}

impl From<transport::Error> for CallFailure {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<orbrpc::Error> for CallFailure {
    fn from(e: orbrpc::Error) -> Self {
        Self::Protocol(e)
    }
}

#[derive(Debug)]
pub enum Error {
    /// The RPC call failed for an infrastructure reason.
    CallFailed(CallFailure),
    /// The remote method raised an error.
    Remote(RemoteError),
    /// Local servant code failed with an error that has no wire identity.
    Application(anyhow::Error),
    Registration(repository::Error),
}

impl Error {
    pub fn unresolvable(what: impl fmt::Display) -> Self {
        Self::CallFailed(CallFailure::Unresolvable(what.to_string()))
    }

    pub fn bad_arguments(msg: impl Into<String>) -> Self {
        Self::CallFailed(CallFailure::BadArguments(msg.into()))
    }

    /// Classifies an error received in an `Exception` response.
    pub fn from_remote(error: RemoteError) -> Self {
        if error.is_infrastructure() {
            Self::CallFailed(CallFailure::Rejected(error))
        } else {
            Self::Remote(error)
        }
    }

    /// The error to put on the wire when this error answers a call.
    ///
    /// `Application` errors keep only their message.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            Self::CallFailed(CallFailure::Rejected(e)) => e.clone(),
            Self::CallFailed(CallFailure::BadArguments(msg)) => RemoteError::new(kinds::BAD_ARGUMENTS, msg.clone()),
            Self::CallFailed(CallFailure::Unresolvable(what)) => {
                RemoteError::new(kinds::METHOD_NOT_FOUND, format!("cannot resolve {}", what))
            }
            Self::CallFailed(CallFailure::ObjectNotFound(type_id)) => {
                RemoteError::new(kinds::INSTANCE_NOT_FOUND, format!("no object for '{}'", type_id))
            }
            Self::CallFailed(other) => RemoteError::generic(other.to_string()),
            Self::Remote(e) => e.clone(),
            Self::Application(e) => RemoteError::generic(e.to_string()),
            Self::Registration(e) => RemoteError::generic(e.to_string()),
        }
    }

    pub fn is_call_failure(&self) -> bool {
        matches!(self, Self::CallFailed(_))
    }

    /// The underlying call failure, if any.
    pub fn call_failure(&self) -> Option<&CallFailure> {
        match self {
            Self::CallFailed(f) => Some(f),
            _ => None,
        }
    }

    /// The remote error this error carries, if it came from the wire.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }

    /// Reconstructs a typed remote error.
    pub fn downcast<E: Throwable>(&self) -> Option<E> {
        let remote = self.remote()?;
        if remote.kind != E::KIND {
            return None;
        }
        E::from_remote(remote)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallFailed(e) => write!(f, "RPC call failed: {}", e),
            Self::Remote(e) => write!(f, "{}", e),
            Self::Application(e) => write!(f, "{}", e),
            Self::Registration(e) => write!(f, "registration failed: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CallFailed(CallFailure::Transport(e)) => Some(e),
            Self::CallFailed(CallFailure::Protocol(e)) => Some(e),
            Self::Remote(e) => Some(e),
            Self::Application(e) => Some(&**e),
            Self::Registration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CallFailure> for Error {
    fn from(e: CallFailure) -> Self {
        Self::CallFailed(e)
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::CallFailed(CallFailure::Transport(e))
    }
}

impl From<repository::Error> for Error {
    fn from(e: repository::Error) -> Self {
        Self::Registration(e)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::Application(e)
    }
}

impl<E: Throwable> From<E> for Error {
    fn from(e: E) -> Self {
        Self::Remote(e.to_remote())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An error type with a stable wire identity, so it survives a round trip
/// through the peer as the same type.
pub trait Throwable: fmt::Debug + Send + Sync + 'static {
    /// Type identity written to `RemoteError::kind`.
    const KIND: &'static str;

    fn to_remote(&self) -> RemoteError;

    /// Rebuilds the error from its wire form. `err.kind` equals `KIND`.
    fn from_remote(err: &RemoteError) -> Option<Self>
    where
        Self: Sized;
}

/// Raised when an argument is outside what the callee accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentError {
    pub message: String,
    pub param: Option<String>,
}

impl ArgumentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), param: None }
    }

    pub fn for_param(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self { message: message.into(), param: Some(param.into()) }
    }
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.param {
            Some(param) => write!(f, "{} (parameter '{}')", self.message, param),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ArgumentError {}

impl Throwable for ArgumentError {
    const KIND: &'static str = kinds::ARGUMENT;

    fn to_remote(&self) -> RemoteError {
        RemoteError {
            kind: Self::KIND.to_string(),
            message: self.message.clone(),
            param: self.param.clone(),
            detail: None,
        }
    }

    fn from_remote(err: &RemoteError) -> Option<Self> {
        Some(Self { message: err.message.clone(), param: err.param.clone() })
    }
}
