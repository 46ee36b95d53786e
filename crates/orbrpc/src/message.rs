//! # Messages
//!
//! The request/response units exchanged on a channel. Every request carries
//! a call id unique among the calls in flight on its channel; every response
//! echoes that id verbatim.

use orbpack::Value;

/// Stable integer identifiers of the six message kinds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ok = 1,
    GetServerObject = 2,
    CallMethod = 3,
    RemoveInstance = 4,
    CallMethodResult = 5,
    Exception = 6,
}

impl MessageKind {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            1 => Some(Self::Ok),
            2 => Some(Self::GetServerObject),
            3 => Some(Self::CallMethod),
            4 => Some(Self::RemoveInstance),
            5 => Some(Self::CallMethodResult),
            6 => Some(Self::Exception),
            _ => None,
        }
    }

    /// Requests are answered by the peer; responses resolve a waiter.
    pub fn is_request(self) -> bool {
        matches!(self, Self::GetServerObject | Self::CallMethod | Self::RemoveInstance)
    }
}

/// Identifier of an instance in one endpoint's repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// The empty id, returned when a lookup finds nothing.
    pub const NONE: InstanceId = InstanceId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instance-{}", self.0)
    }
}

/// Which side's repository an `ObjectRef` points into, from the sender's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Home {
    /// The object lives with the sender; the receiver proxies it.
    Sender,
    /// The sender is handing back one of the receiver's own objects.
    Receiver,
}

/// A reference to an object exposed by one of the two peers.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRef {
    pub id: InstanceId,
    pub home: Home,
    /// Type ids the object serves, used to select the proxy's contracts.
    pub contracts: Vec<String>,
}

impl ObjectRef {
    pub fn empty() -> Self {
        Self { id: InstanceId::NONE, home: Home::Sender, contracts: Vec::new() }
    }
}

/// Error kinds raised by the runtime rather than by application code.
pub mod kinds {
    pub const INSTANCE_NOT_FOUND: &str = "orb.InstanceNotFound";
    pub const METHOD_NOT_FOUND: &str = "orb.MethodNotFound";
    pub const BAD_ARGUMENTS: &str = "orb.BadArguments";
    pub const PROTOCOL_VIOLATION: &str = "orb.ProtocolViolation";
    /// Generic fallback for errors that cannot be reconstructed by type.
    pub const EXCEPTION: &str = "orb.Exception";
    pub const ARGUMENT: &str = "orb.ArgumentError";

    pub const PREFIX: &str = "orb.";
}

/// A serialized error: a type identity plus message and parameter metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
    pub param: Option<String>,
    pub detail: Option<Value>,
}

impl RemoteError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), param: None, detail: None }
    }

    /// Wraps an arbitrary message in the generic fallback kind.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(kinds::EXCEPTION, message)
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Raised by the runtime (unknown instance, unknown method, bad arguments...)
    /// rather than by the invoked method. The generic fallback is not included.
    pub fn is_infrastructure(&self) -> bool {
        self.kind.starts_with(kinds::PREFIX)
            && self.kind != kinds::EXCEPTION
            && self.kind != kinds::ARGUMENT
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(param) = &self.param {
            write!(f, " (parameter '{}')", param)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

/// A tagged call argument or result.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A plain value.
    Value(Value),
    /// A reference to an object in one of the two repositories.
    Object(ObjectRef),
    /// A serialized error passed as data.
    Exception(RemoteError),
}

impl Argument {
    pub fn unit() -> Self {
        Argument::Value(Value::Unit)
    }

    /// Short name of the tag, used in mismatch diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            Argument::Value(_) => "value",
            Argument::Object(_) => "object",
            Argument::Exception(_) => "exception",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Plain acknowledgement, e.g. of a `RemoveInstance`.
    Ok { call_id: u64 },
    /// Looks up an object in the peer's repository by type id.
    GetServerObject { call_id: u64, type_id: String },
    CallMethod { call_id: u64, instance: InstanceId, member: String, args: Vec<Argument> },
    /// Asks the peer to release one of its instances.
    RemoveInstance { call_id: u64, instance: InstanceId },
    CallMethodResult { call_id: u64, result: Argument },
    Exception { call_id: u64, error: RemoteError },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Ok { .. } => MessageKind::Ok,
            Message::GetServerObject { .. } => MessageKind::GetServerObject,
            Message::CallMethod { .. } => MessageKind::CallMethod,
            Message::RemoveInstance { .. } => MessageKind::RemoveInstance,
            Message::CallMethodResult { .. } => MessageKind::CallMethodResult,
            Message::Exception { .. } => MessageKind::Exception,
        }
    }

    pub fn call_id(&self) -> u64 {
        match self {
            Message::Ok { call_id }
            | Message::GetServerObject { call_id, .. }
            | Message::CallMethod { call_id, .. }
            | Message::RemoveInstance { call_id, .. }
            | Message::CallMethodResult { call_id, .. }
            | Message::Exception { call_id, .. } => *call_id,
        }
    }

    /// Stamps the call id. Used by the correlator just before sending.
    pub fn set_call_id(&mut self, id: u64) {
        match self {
            Message::Ok { call_id }
            | Message::GetServerObject { call_id, .. }
            | Message::CallMethod { call_id, .. }
            | Message::RemoveInstance { call_id, .. }
            | Message::CallMethodResult { call_id, .. }
            | Message::Exception { call_id, .. } => *call_id = id,
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind().is_request()
    }
}
