//! # Remote Objects
//!
//! `RemoteObject` is the dispatch-table seam: every exposed object, and
//! every proxy, implements it. `serve!` implements it for servant types;
//! `Remote<T>` and `ProxyCore` implement it by forwarding.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use orbrpc::Argument;

use crate::context::CallContext;
use crate::contract;
use crate::contract::Contract;
use crate::error::Result;
use crate::marshal::Marshal;
use crate::proxy::ProxyCore;

/// One incoming call, as handed to `RemoteObject::invoke`.
pub struct Invocation {
    pub member: String,
    pub args: Vec<Argument>,
    /// Converts arguments and results against the calling channel.
    pub marshal: Marshal,
    pub context: CallContext,
}

#[async_trait]
pub trait RemoteObject: Send + Sync + 'static {
    /// Contracts this object serves, in declaration order.
    fn contracts(&self) -> Vec<&'static Contract>;

    fn type_name(&self) -> &'static str;

    /// Type ids advertised for this object; computed once at registration.
    fn type_ids(&self) -> Vec<String> {
        contract::type_ids(&self.contracts(), self.type_name())
    }

    async fn invoke(&self, call: Invocation) -> Result<Argument>;

    /// A `Box<Arc<dyn Trait>>` view of this object for `contract`, if served.
    fn cast(self: Arc<Self>, contract: &'static Contract) -> Option<Box<dyn Any + Send + Sync>>;

    /// Reference identity. Views of one object report the same identity.
    fn identity(&self) -> usize {
        (self as *const Self).cast::<()>() as usize
    }

    /// The forwarding core, when this object is a proxy.
    fn as_proxy(&self) -> Option<Arc<ProxyCore>> {
        None
    }

    /// True once calls on this object can no longer reach their target.
    fn is_severed(&self) -> bool {
        false
    }

    /// Whether dispatch binds `context::current()` around each invocation.
    fn context_aware(&self) -> bool {
        false
    }
}

/// Implemented for `dyn Trait` of every contract trait.
pub trait ObjectContract: Send + Sync + 'static {
    fn contract() -> &'static Contract;

    fn upcast(this: Arc<Self>) -> Arc<dyn RemoteObject>;

    /// A typed forwarding view of `core`.
    fn from_proxy(core: Arc<ProxyCore>) -> Arc<Self>;

    fn downcast(object: Arc<dyn RemoteObject>) -> Option<Arc<Self>> {
        let view = object.cast(Self::contract())?;
        view.downcast::<Arc<Self>>().ok().map(|view| *view)
    }

    fn identity_of(this: &Arc<Self>) -> usize {
        Self::upcast(this.clone()).identity()
    }

    fn severed(this: &Arc<Self>) -> bool {
        Self::upcast(this.clone()).is_severed()
    }
}

impl ObjectContract for dyn RemoteObject {
    fn contract() -> &'static Contract {
        &contract::OBJECT
    }

    fn upcast(this: Arc<Self>) -> Arc<dyn RemoteObject> {
        this
    }

    fn from_proxy(core: Arc<ProxyCore>) -> Arc<Self> {
        core
    }

    fn downcast(object: Arc<dyn RemoteObject>) -> Option<Arc<Self>> {
        Some(object)
    }
}
