//! # Client
//!
//! The connecting endpoint. A client owns one channel and its own local
//! repository, from which it exposes callbacks and singletons to the server.

use std::sync::Arc;

use orbrpc::InstanceId;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

use crate::channel::Channel;
use crate::channel::ChannelEvent;
use crate::config::Config;
use crate::error::CallFailure;
use crate::error::Result;
use crate::object::ObjectContract;
use crate::object::RemoteObject;
use crate::repository::Repository;
use crate::repository::Role;
use crate::transport::Connector;

pub struct Client {
    channel: Arc<Channel>,
    repository: Arc<Repository>,
    events: broadcast::Sender<ChannelEvent>,
    sweeper: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("channel", &self.channel).finish_non_exhaustive()
    }
}

impl Client {
    /// Connects to a server, bounded by `config.connect_timeout`.
    pub async fn connect(connector: &dyn Connector, config: Config) -> Result<Self> {
        let connecting = connector.connect();
        let (stream, peer) = match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| CallFailure::Timeout)??,
            None => connecting.await?,
        };

        let repository = Arc::new(Repository::new(Role::Client));
        let sweeper = config.sweep_interval.map(|interval| repository.spawn_sweeper(interval));
        let (events, _) = broadcast::channel(64);
        let channel = Channel::open(stream, peer, repository.clone(), config, events.clone());
        info!(channel = %channel.id(), peer = %channel.peer(), "connected");

        Ok(Self { channel, repository, events, sweeper })
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// The repository callbacks and client singletons are exported from.
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Asks the server for its object serving contract `T`.
    pub async fn get_server_object<T: ?Sized + ObjectContract>(&self) -> Result<Arc<T>> {
        let obj = self.channel.get_server_object(T::contract().name).await?;
        debug!(type_id = T::contract().name, id = %obj.id, "resolved server object");
        self.channel.marshal().import_as::<T>(obj)
    }

    /// Exposes `object` to the server for the life of the client.
    pub fn register_singleton(&self, object: Arc<dyn RemoteObject>) -> InstanceId {
        self.repository.register_singleton(object)
    }

    /// Exposes a singleton of contract `T`, built on the server's first lookup.
    pub fn register_singleton_type<T, F>(&self, factory: F) -> InstanceId
    where
        T: ?Sized + ObjectContract,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        register_type::<T, F>(&self.repository, factory)
    }

    /// Connection notifications. `Connected` has already fired by the time
    /// a client exists; `Disconnected` is observable here.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_open()
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.channel.abort();
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

pub(crate) fn register_type<T, F>(repository: &Repository, factory: F) -> InstanceId
where
    T: ?Sized + ObjectContract,
    F: Fn() -> Arc<T> + Send + Sync + 'static,
{
    let type_ids = T::contract().lineage().into_iter().map(String::from).collect();
    repository.register_singleton_type(type_ids, move || T::upcast(factory()))
}
