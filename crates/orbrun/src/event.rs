//! A subscriber list for events exposed through `add_*`/`remove_*` members.
//!
//! Handlers are usually proxies for callbacks living on the peer. A handler
//! whose channel has gone away is pruned the next time the list is read.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use tracing::debug;

use crate::object::ObjectContract;

pub struct Event<H: ?Sized + ObjectContract> {
    handlers: Mutex<Vec<Arc<H>>>,
}

impl<H: ?Sized + ObjectContract> Default for Event<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized + ObjectContract> Event<H> {
    pub fn new() -> Self {
        Self { handlers: Mutex::new(Vec::new()) }
    }

    /// Adds `handler`. Subscribing the same object twice is a no-op.
    pub fn subscribe(&self, handler: Arc<H>) {
        let identity = H::identity_of(&handler);
        let mut handlers = self.lock();
        if !handlers.iter().any(|h| H::identity_of(h) == identity) {
            handlers.push(handler);
        }
    }

    /// Removes `handler`, matched by object identity.
    pub fn unsubscribe(&self, handler: &Arc<H>) -> bool {
        let identity = H::identity_of(handler);
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|h| H::identity_of(h) != identity);
        handlers.len() != before
    }

    /// Live handlers, in subscription order.
    pub fn handlers(&self) -> Vec<Arc<H>> {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|h| !H::severed(h));
        if handlers.len() != before {
            debug!(pruned = before - handlers.len(), "pruned severed handlers");
        }
        handlers.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<H>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
