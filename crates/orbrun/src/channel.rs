//! # RPC Channel
//!
//! One logical connection: frame codec, call correlator, the local
//! repository it exports from, the table of proxies for the peer's objects,
//! and the reader loop that feeds the dispatcher.
//!
//! ## Lifecycle
//!
//! `Created -> Connecting -> Open -> Closing -> Closed`. Calls are issued
//! and served only while `Open`. Local close and remote disconnect both go
//! straight to `Closing`; teardown then runs exactly once.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use orbrpc::Argument;
use orbrpc::InstanceId;
use orbrpc::Message;
use orbrpc::MessageKind;
use orbrpc::ObjectRef;
use orbrpc::RemoteError;
use orbrpc::message::kinds;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::codec;
use crate::codec::FrameWriter;
use crate::config::Config;
use crate::correlator::Correlator;
use crate::dispatch;
use crate::dispatch::Outcome;
use crate::error::CallFailure;
use crate::error::Error;
use crate::error::Result;
use crate::marshal::Marshal;
use crate::proxy::ProxyCore;
use crate::repository::Repository;
use crate::repository::Role;
use crate::transport::BoxStream;
use crate::transport::PeerAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelState {
    Created,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Connection notifications, carrying the transport peer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected { channel: ChannelId, peer: PeerAddr },
    Disconnected { channel: ChannelId, peer: PeerAddr },
}

pub struct Channel {
    id: ChannelId,
    role: Role,
    peer: PeerAddr,
    config: Config,
    writer: FrameWriter<WriteHalf<BoxStream>>,
    correlator: Correlator,
    repository: Arc<Repository>,
    /// Proxies for the peer's instances, so each is imported once.
    remotes: DashMap<InstanceId, Weak<ProxyCore>>,
    state: watch::Sender<ChannelState>,
    events: broadcast::Sender<ChannelEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Starts a channel over `stream` and spawns its reader loop.
    pub fn open(
        stream: BoxStream,
        peer: PeerAddr,
        repository: Arc<Repository>,
        config: Config,
        events: broadcast::Sender<ChannelEvent>,
    ) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(stream);
        let id = ChannelId(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed));
        let (state, _) = watch::channel(ChannelState::Created);

        let channel = Arc::new(Self {
            id,
            role: repository.role(),
            peer,
            config,
            writer: FrameWriter::new(writer),
            correlator: Correlator::new(),
            repository,
            remotes: DashMap::new(),
            state,
            events,
            reader: Mutex::new(None),
        });

        channel.set_state(ChannelState::Connecting);
        let span = tracing::debug_span!("channel", id = %channel.id, role = ?channel.role, peer = %channel.peer);
        let handle = tokio::spawn(channel.clone().read_loop(reader).instrument(span));
        *channel.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        channel.set_state(ChannelState::Open);
        debug!(id = %channel.id, peer = %channel.peer, "channel open");
        let _ = channel.events.send(ChannelEvent::Connected { channel: channel.id, peer: channel.peer.clone() });
        channel
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// The repository this channel exports local objects from.
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Calls awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.correlator.in_flight()
    }

    pub fn marshal(self: &Arc<Self>) -> Marshal {
        Marshal::new(self.clone())
    }

    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|state| {
            if *state < next {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Waits until the channel is fully closed.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if *rx.borrow_and_update() == ChannelState::Closed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Starts closing without waiting. The reader loop runs teardown.
    pub fn abort(&self) {
        self.set_state(ChannelState::Closing);
    }

    /// Closes the channel and waits for teardown to finish.
    pub async fn close(&self) {
        self.set_state(ChannelState::Closing);
        let reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        match reader {
            Some(handle) => {
                let _ = handle.await;
            }
            None => self.closed().await,
        }
    }

    // ------------------------------------------------------------------------
    //  Outbound
    // ------------------------------------------------------------------------

    pub(crate) async fn send(&self, message: &Message) -> std::result::Result<(), CallFailure> {
        let payload = self.config.serializer.serialize(message)?;
        if payload.len() > self.config.max_frame_len {
            return Err(orbrpc::Error::FrameTooLarge(payload.len()).into());
        }
        trace!(kind = ?message.kind(), call_id = message.call_id(), "send");
        self.writer.write(&payload).await
    }

    /// Sends a request and waits for its response.
    pub async fn request(&self, mut message: Message) -> Result<Message> {
        if !self.is_open() {
            return Err(CallFailure::Disconnected.into());
        }

        let (call_id, rx) = self.correlator.register()?;
        message.set_call_id(call_id);
        if let Err(e) = self.send(&message).await {
            self.correlator.forget(call_id);
            return Err(e.into());
        }

        let reply = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.correlator.forget(call_id);
                    debug!(call_id, ?limit, "call timed out");
                    return Err(CallFailure::Timeout.into());
                }
            },
            None => rx.await,
        };

        match reply {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(failure)) => Err(failure.into()),
            Err(_) => Err(CallFailure::Cancelled.into()),
        }
    }

    /// Invokes `member` on the peer's instance `instance`.
    pub async fn call_rpc_method(&self, instance: InstanceId, member: &str, args: Vec<Argument>) -> Result<Argument> {
        let request = Message::CallMethod { call_id: 0, instance, member: member.to_string(), args };
        match self.request(request).await? {
            Message::CallMethodResult { result, .. } => Ok(result),
            Message::Exception { error, .. } => Err(Error::from_remote(error)),
            other => Err(unexpected(other.kind())),
        }
    }

    /// Looks up the peer's object for `type_id`.
    pub async fn get_server_object(&self, type_id: &str) -> Result<ObjectRef> {
        let request = Message::GetServerObject { call_id: 0, type_id: type_id.to_string() };
        match self.request(request).await? {
            Message::CallMethodResult { result: Argument::Object(obj), .. } if !obj.id.is_none() => Ok(obj),
            Message::CallMethodResult { result: Argument::Object(_), .. } => {
                Err(CallFailure::ObjectNotFound(type_id.to_string()).into())
            }
            Message::Exception { error, .. } => Err(Error::from_remote(error)),
            other => Err(unexpected(other.kind())),
        }
    }

    /// The proxy for the peer's instance `obj.id`, created on first import.
    pub(crate) fn proxy_for(self: &Arc<Self>, obj: &ObjectRef) -> Arc<ProxyCore> {
        match self.remotes.entry(obj.id) {
            Entry::Occupied(mut entry) => {
                if let Some(core) = entry.get().upgrade() {
                    return core;
                }
                let core = ProxyCore::new(obj.id, obj.contracts.clone(), self.clone());
                entry.insert(Arc::downgrade(&core));
                core
            }
            Entry::Vacant(entry) => {
                let core = ProxyCore::new(obj.id, obj.contracts.clone(), self.clone());
                entry.insert(Arc::downgrade(&core));
                core
            }
        }
    }

    /// Called when the last reference to a proxy drops: forget it and tell
    /// the peer, without waiting for the acknowledgement.
    ///
    /// Nothing is sent if a newer proxy for the same instance was imported
    /// in the meantime, since the peer still owes that one its object.
    pub(crate) fn release_remote(self: &Arc<Self>, instance: InstanceId) {
        let removed = self.remotes.remove_if(&instance, |_, weak| weak.strong_count() == 0).is_some();
        if !removed && self.remotes.contains_key(&instance) {
            trace!(%instance, "remote instance re-imported, keeping it");
            return;
        }
        if !self.is_open() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(%instance, "no runtime to release remote instance");
            return;
        };

        let channel = self.clone();
        runtime.spawn(async move {
            let request = Message::RemoveInstance { call_id: 0, instance };
            match tokio::time::timeout(channel.config.release_timeout, channel.request(request)).await {
                Ok(Ok(_)) => trace!(%instance, "remote instance released"),
                Ok(Err(e)) => debug!(%instance, error = %e, "release not acknowledged"),
                Err(_) => debug!(%instance, "release timed out"),
            }
        });
    }

    // ------------------------------------------------------------------------
    //  Inbound
    // ------------------------------------------------------------------------

    async fn read_loop(self: Arc<Self>, mut reader: ReadHalf<BoxStream>) {
        let closing = until_closing(self.state.subscribe());
        tokio::pin!(closing);

        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = &mut closing => break CallFailure::Disconnected,
                frame = codec::read_frame(&mut reader, self.config.max_frame_len) => frame,
            };

            match frame {
                Ok(Some(payload)) => {
                    let channel = self.clone();
                    tokio::spawn(async move { channel.handle_frame(payload).await }.in_current_span());
                }
                Ok(None) => {
                    debug!("peer closed the stream");
                    break CallFailure::Disconnected;
                }
                Err(CallFailure::Protocol(e)) => {
                    error!(error = %e, "protocol violation, closing connection");
                    break CallFailure::Protocol(e);
                }
                Err(e) => {
                    debug!(error = %e, "read failed");
                    break e;
                }
            }
        };

        self.shutdown(reason).await;
    }

    async fn handle_frame(self: Arc<Self>, payload: Vec<u8>) {
        let message = match self.config.serializer.deserialize(&payload) {
            Ok(message) => message,
            Err(e) => return self.handle_undecodable(&payload, e).await,
        };
        trace!(kind = ?message.kind(), call_id = message.call_id(), "recv");

        match dispatch::handle(&self, message).await {
            Outcome::Reply(reply) => {
                if let Err(e) = self.send(&reply).await {
                    debug!(call_id = reply.call_id(), error = %e, "could not send reply");
                }
            }
            Outcome::Unhandled(response) => {
                self.correlator.resolve(response.call_id(), Ok(response));
            }
        }
    }

    /// A payload that does not decode still answers or fails the call it
    /// belongs to when its envelope can be read.
    async fn handle_undecodable(&self, payload: &[u8], e: orbrpc::Error) {
        let envelope = self.config.serializer.peek(payload);
        match envelope.map(|env| (MessageKind::from_u64(env.kind), env.call_id)) {
            Some((Some(kind), call_id)) if kind.is_request() => {
                warn!(call_id, error = %e, "undecodable request");
                let error = RemoteError::new(kinds::PROTOCOL_VIOLATION, e.to_string());
                if let Err(e) = self.send(&Message::Exception { call_id, error }).await {
                    debug!(call_id, error = %e, "could not send reply");
                }
            }
            Some((Some(_), call_id)) => {
                warn!(call_id, error = %e, "undecodable response");
                self.correlator.resolve(call_id, Err(CallFailure::Protocol(e)));
            }
            _ => {
                error!(error = %e, "unsupported message, closing connection");
                self.set_state(ChannelState::Closing);
            }
        }
    }

    /// Teardown. Runs once, at the end of the reader loop.
    async fn shutdown(&self, reason: CallFailure) {
        self.set_state(ChannelState::Closing);

        let cancelled = self.correlator.cancel_all(reason);
        let released = self.repository.remove_all_for_channel(self.id);
        self.remotes.clear();
        self.writer.shutdown().await;

        self.set_state(ChannelState::Closed);
        debug!(cancelled, released, "channel closed");
        let _ = self.events.send(ChannelEvent::Disconnected { channel: self.id, peer: self.peer.clone() });
    }
}

fn unexpected(kind: MessageKind) -> Error {
    CallFailure::Protocol(orbrpc::Error::ProtocolViolation(format!("unexpected {:?} response", kind))).into()
}

async fn until_closing(mut rx: watch::Receiver<ChannelState>) {
    loop {
        if *rx.borrow_and_update() >= ChannelState::Closing {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
