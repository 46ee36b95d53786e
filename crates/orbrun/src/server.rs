//! # Server
//!
//! The listening endpoint. Every accepted stream becomes a server-role
//! channel; all of them share the server's repository, so singletons are
//! visible to every client while per-call exports stay tied to the channel
//! they crossed.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use dashmap::DashMap;
use orbrpc::InstanceId;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::channel::Channel;
use crate::channel::ChannelEvent;
use crate::channel::ChannelId;
use crate::client::register_type;
use crate::config::Config;
use crate::object::ObjectContract;
use crate::object::RemoteObject;
use crate::repository::Repository;
use crate::repository::Role;
use crate::transport;
use crate::transport::Listener;
use crate::transport::PeerAddr;

type Connections = Arc<DashMap<ChannelId, Arc<Channel>>>;

pub struct Server {
    local_addr: PeerAddr,
    repository: Arc<Repository>,
    connections: Connections,
    events: broadcast::Sender<ChannelEvent>,
    stop: watch::Sender<bool>,
    accept: Mutex<Option<JoinHandle<()>>>,
    sweeper: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Starts accepting connections on `listener`.
    pub fn listen(listener: impl Listener, config: Config) -> Self {
        let local_addr = listener.local_addr();
        let repository = Arc::new(Repository::new(Role::Server));
        let sweeper = config.sweep_interval.map(|interval| repository.spawn_sweeper(interval));
        let connections: Connections = Arc::new(DashMap::new());
        let (events, _) = broadcast::channel(256);
        let (stop, stopped) = watch::channel(false);

        let span = tracing::info_span!("server", addr = %local_addr);
        let accept = tokio::spawn(
            accept_loop(listener, config, repository.clone(), connections.clone(), events.clone(), stopped)
                .instrument(span),
        );
        info!(addr = %local_addr, "listening");

        Self {
            local_addr,
            repository,
            connections,
            events,
            stop,
            accept: Mutex::new(Some(accept)),
            sweeper,
        }
    }

    pub fn local_addr(&self) -> &PeerAddr {
        &self.local_addr
    }

    /// The repository shared by every connection.
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Exposes `object` to every client until it is unregistered.
    pub fn register_singleton(&self, object: Arc<dyn RemoteObject>) -> InstanceId {
        self.repository.register_singleton(object)
    }

    /// Exposes a singleton of contract `T`, built on the first lookup.
    pub fn register_singleton_type<T, F>(&self, factory: F) -> InstanceId
    where
        T: ?Sized + ObjectContract,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        register_type::<T, F>(&self.repository, factory)
    }

    /// Open connections.
    pub fn connections(&self) -> Vec<Arc<Channel>> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Stops accepting, closes every connection and waits for both.
    pub async fn close(&self) {
        let _ = self.stop.send(true);
        let accept = self.accept.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(accept) = accept {
            let _ = accept.await;
        }

        let open = self.connections();
        futures::future::join_all(open.iter().map(|channel| channel.close())).await;
        debug!(closed = open.len(), "server closed");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
        for entry in self.connections.iter() {
            entry.value().abort();
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

async fn accept_loop(
    listener: impl Listener,
    config: Config,
    repository: Arc<Repository>,
    connections: Connections,
    events: broadcast::Sender<ChannelEvent>,
    stopped: watch::Receiver<bool>,
) {
    let stopping = until_stopped(stopped);
    tokio::pin!(stopping);

    loop {
        let accepted = tokio::select! {
            biased;
            _ = &mut stopping => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(transport::Error::ConnectionLost(reason)) => {
                debug!(%reason, "listener closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let channel = Channel::open(stream, peer, repository.clone(), config.clone(), events.clone());
        connections.insert(channel.id(), channel.clone());

        let connections = connections.clone();
        tokio::spawn(async move {
            channel.closed().await;
            connections.remove(&channel.id());
        });
    }
}

async fn until_stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
