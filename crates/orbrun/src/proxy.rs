//! # Proxies
//!
//! A `ProxyCore` stands for one instance in the peer's repository. Typed
//! views (`Remote<dyn Trait>`) share the core, so every view of one remote
//! object has the same identity, and repeated imports of the same remote
//! instance return the same view while it is alive.
//!
//! When the last view and the last internal reference drop, the core asks
//! the peer to remove the instance. The peer applies its grace period.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;

use async_trait::async_trait;
use orbrpc::Argument;
use orbrpc::InstanceId;

use crate::channel::Channel;
use crate::contract::Contract;
use crate::error::Result;
use crate::marshal::Marshal;
use crate::marshal::remarshal;
use crate::object::Invocation;
use crate::object::ObjectContract;
use crate::object::RemoteObject;

pub struct ProxyCore {
    remote: InstanceId,
    type_ids: Vec<String>,
    channel: Arc<Channel>,
    me: Weak<ProxyCore>,
    /// Live typed views, by contract name. Each entry is a `Weak<T>`.
    views: Mutex<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
    /// Contracts a view has been requested for.
    known: Mutex<Vec<&'static Contract>>,
}

impl std::fmt::Debug for ProxyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCore")
            .field("remote", &self.remote)
            .field("channel", &self.channel.id())
            .finish_non_exhaustive()
    }
}

impl ProxyCore {
    pub(crate) fn new(remote: InstanceId, type_ids: Vec<String>, channel: Arc<Channel>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            remote,
            type_ids,
            channel,
            me: me.clone(),
            views: Mutex::new(HashMap::new()),
            known: Mutex::new(Vec::new()),
        })
    }

    pub fn remote_id(&self) -> InstanceId {
        self.remote
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn marshal(&self) -> Marshal {
        self.channel.marshal()
    }

    /// Whether the remote object advertised `type_id`.
    pub fn serves(&self, type_id: &str) -> bool {
        self.type_ids.iter().any(|t| t == type_id)
    }

    /// Calls `member` on the remote instance.
    pub async fn call(&self, member: &str, args: Vec<Argument>) -> Result<Argument> {
        self.channel.call_rpc_method(self.remote, member, args).await
    }

    /// The typed view of this proxy for contract `T`.
    pub fn view<T: ?Sized + ObjectContract>(self: &Arc<Self>) -> Arc<T> {
        let contract = T::contract();
        let mut views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = views
            .get(contract.name)
            .and_then(|view| view.downcast_ref::<Weak<T>>())
            .and_then(Weak::upgrade);
        if let Some(view) = cached {
            return view;
        }

        let view = T::from_proxy(self.clone());
        views.insert(contract.name, Box::new(Arc::downgrade(&view)));
        drop(views);

        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        if !contract.is_root() && !known.iter().any(|c| std::ptr::eq(*c, contract)) {
            known.push(contract);
        }
        view
    }
}

impl Drop for ProxyCore {
    fn drop(&mut self) {
        self.channel.release_remote(self.remote);
    }
}

/// Forwards to the remote instance. Used when a proxy is itself exported,
/// e.g. handed on to a third peer.
#[async_trait]
impl RemoteObject for ProxyCore {
    fn contracts(&self) -> Vec<&'static Contract> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn type_ids(&self) -> Vec<String> {
        self.type_ids.clone()
    }

    async fn invoke(&self, call: Invocation) -> Result<Argument> {
        let outbound = self.marshal();
        let args = call
            .args
            .into_iter()
            .map(|arg| remarshal(arg, &call.marshal, &outbound))
            .collect::<Result<Vec<_>>>()?;
        let result = self.call(&call.member, args).await?;
        remarshal(result, &outbound, &call.marshal)
    }

    fn cast(self: Arc<Self>, contract: &'static Contract) -> Option<Box<dyn Any + Send + Sync>> {
        if contract.is_root() || self.serves(contract.name) {
            Some((contract.view)(self))
        } else {
            None
        }
    }

    fn as_proxy(&self) -> Option<Arc<ProxyCore>> {
        self.me.upgrade()
    }

    fn is_severed(&self) -> bool {
        !self.channel.is_open()
    }
}

/// The forwarding implementation of contract `T`.
///
/// `contract!` implements each contract trait for every `Remote<T>`, so a
/// view also answers its contract's base traits.
pub struct Remote<T: ?Sized> {
    core: Arc<ProxyCore>,
    _contract: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> Remote<T> {
    pub fn new(core: Arc<ProxyCore>) -> Self {
        Self { core, _contract: PhantomData }
    }

    pub fn core(&self) -> &Arc<ProxyCore> {
        &self.core
    }
}

#[async_trait]
impl<T: ?Sized + ObjectContract> RemoteObject for Remote<T> {
    fn contracts(&self) -> Vec<&'static Contract> {
        vec![T::contract()]
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn type_ids(&self) -> Vec<String> {
        self.core.type_ids()
    }

    async fn invoke(&self, call: Invocation) -> Result<Argument> {
        self.core.invoke(call).await
    }

    fn cast(self: Arc<Self>, contract: &'static Contract) -> Option<Box<dyn Any + Send + Sync>> {
        self.core.clone().cast(contract)
    }

    fn identity(&self) -> usize {
        self.core.identity()
    }

    fn as_proxy(&self) -> Option<Arc<ProxyCore>> {
        Some(self.core.clone())
    }

    fn is_severed(&self) -> bool {
        self.core.is_severed()
    }
}

/// `Contract::view` for contract `T`.
pub fn view_of<T: ?Sized + ObjectContract>(core: Arc<ProxyCore>) -> Box<dyn Any + Send + Sync> {
    Box::new(core.view::<T>())
}
