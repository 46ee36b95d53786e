//! # Object Repository
//!
//! The per-endpoint table of exposed instances.
//!
//! ## Lifetimes
//!
//! - **Singletons** are pinned: held strongly and never evicted by purge,
//!   peer removal or disconnect. Only `unregister` removes them.
//! - **Server registrations** are held strongly and tied to the channels
//!   they were exported on. They go away on `RemoveInstance` (after the
//!   grace period) or when their last channel disconnects.
//! - **Client registrations** are held weakly and follow reachability:
//!   once the application drops its last reference, the next purge evicts
//!   them.
//! - **Type handles** are deferred singletons, constructed on first lookup.
//!
//! A single coarse lock guards the table. Every operation purges first.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use orbrpc::InstanceId;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use crate::channel::ChannelId;
use crate::object::RemoteObject;

pub type Object = Arc<dyn RemoteObject>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A server-side registration needs the channel it is exported on.
    MissingChannel { type_name: &'static str },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingChannel { type_name } => {
                write!(f, "server registration of {} requires an associated channel", type_name)
            }
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Instance ids are unique across every repository in the process.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

type Factory = Box<dyn Fn() -> Object + Send + Sync>;

struct TypeHandle {
    factory: Factory,
    instance: OnceLock<Object>,
}

impl TypeHandle {
    fn materialize(&self) -> Object {
        self.instance.get_or_init(|| (self.factory)()).clone()
    }
}

enum Slot {
    Strong(Object),
    Weak(Weak<dyn RemoteObject>),
    Deferred(Arc<TypeHandle>),
}

impl Slot {
    fn live(&self) -> Option<Object> {
        match self {
            Slot::Strong(object) => Some(object.clone()),
            Slot::Weak(weak) => weak.upgrade(),
            Slot::Deferred(handle) => handle.instance.get().cloned(),
        }
    }

    fn is_dead(&self) -> bool {
        matches!(self, Slot::Weak(weak) if weak.strong_count() == 0)
    }
}

struct Handle {
    slot: Slot,
    pinned: bool,
    type_ids: Vec<String>,
    /// Channels the instance was exported on.
    channels: HashSet<ChannelId>,
    identity: Option<usize>,
}

#[derive(Default)]
struct Table {
    handles: BTreeMap<InstanceId, Handle>,
    identities: HashMap<usize, InstanceId>,
    /// Removal deadlines, keyed by instance and the channel that asked.
    pending: HashMap<(InstanceId, Option<ChannelId>), Instant>,
}

impl Table {
    fn allocate(&self) -> InstanceId {
        loop {
            let id = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !self.handles.contains_key(&InstanceId(id)) {
                return InstanceId(id);
            }
        }
    }

    fn insert(&mut self, handle: Handle) -> InstanceId {
        let id = self.allocate();
        if let Some(identity) = handle.identity {
            self.identities.insert(identity, id);
        }
        self.handles.insert(id, handle);
        id
    }

    fn evict(&mut self, id: InstanceId, evicted: &mut Vec<Slot>) {
        if let Some(handle) = self.handles.remove(&id) {
            if let Some(identity) = handle.identity {
                if self.identities.get(&identity) == Some(&id) {
                    self.identities.remove(&identity);
                }
            }
            self.pending.retain(|(pending, _), _| *pending != id);
            evicted.push(handle.slot);
        }
    }

    /// Detaches `channel` from `id`, evicting the instance once no channel
    /// remains. Pinned instances are never touched.
    fn release(&mut self, id: InstanceId, channel: Option<ChannelId>, evicted: &mut Vec<Slot>) {
        let Some(handle) = self.handles.get_mut(&id) else {
            return;
        };
        if handle.pinned {
            debug!(%id, "ignoring removal of pinned instance");
            return;
        }
        if let Some(channel) = channel {
            handle.channels.remove(&channel);
            if !handle.channels.is_empty() {
                trace!(%id, %channel, "instance still exported on other channels");
                self.pending.remove(&(id, Some(channel)));
                return;
            }
        }
        self.evict(id, evicted);
    }

    fn purge(&mut self, now: Instant, evicted: &mut Vec<Slot>) {
        let dead: Vec<InstanceId> = self
            .handles
            .iter()
            .filter(|(_, h)| !h.pinned && h.slot.is_dead())
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            trace!(%id, "purging unreachable instance");
            self.evict(id, evicted);
        }

        let due: Vec<(InstanceId, Option<ChannelId>)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for (id, channel) in due {
            self.pending.remove(&(id, channel));
            debug!(%id, "applying delayed removal");
            self.release(id, channel, evicted);
        }
    }
}

pub struct Repository {
    role: Role,
    table: Mutex<Table>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository").field("role", &self.role).field("len", &self.len()).finish()
    }
}

impl Repository {
    pub fn new(role: Role) -> Self {
        Self { role, table: Mutex::new(Table::default()) }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Runs `f` on the purged table. Evicted objects are dropped after the
    /// lock is released, so their destructors may use the repository.
    fn with_table<R>(&self, f: impl FnOnce(&mut Table, &mut Vec<Slot>) -> R) -> R {
        let mut evicted = Vec::new();
        let result = {
            let mut table = self.lock();
            table.purge(Instant::now(), &mut evicted);
            f(&mut table, &mut evicted)
        };
        drop(evicted);
        result
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `object` as a pinned singleton.
    ///
    /// Registering an object already present pins its existing handle.
    pub fn register_singleton(&self, object: Object) -> InstanceId {
        let identity = object.identity();
        self.with_table(|table, _| {
            if let Some(&id) = table.identities.get(&identity) {
                if let Some(handle) = table.handles.get_mut(&id) {
                    handle.pinned = true;
                    handle.slot = Slot::Strong(object);
                    return id;
                }
            }
            let type_ids = object.type_ids();
            let id = table.insert(Handle {
                slot: Slot::Strong(object),
                pinned: true,
                type_ids,
                channels: HashSet::new(),
                identity: Some(identity),
            });
            debug!(%id, "registered singleton");
            id
        })
    }

    /// Registers a deferred singleton answering to `type_ids`. `factory`
    /// runs at most once, on the first lookup that reaches it.
    pub fn register_singleton_type<F>(&self, type_ids: Vec<String>, factory: F) -> InstanceId
    where
        F: Fn() -> Object + Send + Sync + 'static,
    {
        let handle = Arc::new(TypeHandle { factory: Box::new(factory), instance: OnceLock::new() });
        self.with_table(|table, _| {
            let id = table.insert(Handle {
                slot: Slot::Deferred(handle),
                pinned: true,
                type_ids,
                channels: HashSet::new(),
                identity: None,
            });
            debug!(%id, "registered singleton type");
            id
        })
    }

    /// Finds the first instance (lowest id) serving `type_id`, materializing
    /// a type handle if that is what matches.
    pub fn get_by_type_id(&self, type_id: &str) -> Option<(InstanceId, Object)> {
        let (id, deferred) = self.with_table(|table, _| {
            table.handles.iter().find_map(|(id, handle)| {
                if !handle.type_ids.iter().any(|t| t == type_id) {
                    return None;
                }
                match &handle.slot {
                    Slot::Deferred(th) => Some((*id, Err(th.clone()))),
                    slot => slot.live().map(|object| (*id, Ok(object))),
                }
            })
        })?;

        match deferred {
            Ok(object) => Some((id, object)),
            Err(th) => self.materialized(id, &th).map(|object| (id, object)),
        }
    }

    /// Builds (once) the instance behind a type handle and records its identity.
    fn materialized(&self, id: InstanceId, th: &TypeHandle) -> Option<Object> {
        let fresh = th.instance.get().is_none();
        let object = th.materialize();
        if fresh {
            debug!(%id, type_name = object.type_name(), "materialized singleton type");
        }
        self.with_table(|table, _| {
            let handle = table.handles.get_mut(&id)?;
            if handle.identity.is_none() {
                let identity = object.identity();
                handle.identity = Some(identity);
                for type_id in object.type_ids() {
                    if !handle.type_ids.contains(&type_id) {
                        handle.type_ids.push(type_id);
                    }
                }
                table.identities.entry(identity).or_insert(id);
            }
            Some(object.clone())
        })
    }

    /// Registers `object` for export on `channel`, returning the existing id
    /// if the same object (by identity) is already present.
    ///
    /// Re-exporting an instance cancels a pending removal requested through
    /// that channel.
    pub fn add_instance(&self, object: Object, channel: Option<ChannelId>) -> Result<InstanceId, Error> {
        if self.role == Role::Server && channel.is_none() {
            return Err(Error::MissingChannel { type_name: object.type_name() });
        }

        let identity = object.identity();
        let role = self.role;
        Ok(self.with_table(|table, _| {
            if let Some(&id) = table.identities.get(&identity) {
                if let Some(handle) = table.handles.get_mut(&id) {
                    if let Some(channel) = channel {
                        handle.channels.insert(channel);
                    }
                    table.pending.remove(&(id, channel));
                    return id;
                }
            }

            let type_ids = object.type_ids();
            let slot = match role {
                Role::Server => Slot::Strong(object),
                Role::Client => Slot::Weak(Arc::downgrade(&object)),
            };
            let id = table.insert(Handle {
                slot,
                pinned: false,
                type_ids,
                channels: channel.into_iter().collect(),
                identity: Some(identity),
            });
            trace!(%id, "registered instance");
            id
        }))
    }

    /// The live object for `id`. Removed and unreachable ids are not found.
    pub fn get_instance(&self, id: InstanceId) -> Option<Object> {
        let found = self.with_table(|table, _| {
            table.handles.get(&id).map(|handle| match &handle.slot {
                Slot::Deferred(th) => Err(th.clone()),
                slot => Ok(slot.live()),
            })
        })?;
        match found {
            Ok(object) => object,
            Err(th) => self.materialized(id, &th),
        }
    }

    /// Advertised type ids of `id`.
    pub fn type_ids(&self, id: InstanceId) -> Option<Vec<String>> {
        self.with_table(|table, _| table.handles.get(&id).map(|h| h.type_ids.clone()))
    }

    /// Requests removal of `id` on behalf of `channel`.
    ///
    /// With a zero `delay` the removal applies now; otherwise it applies at
    /// the first purge after the deadline. Pinned instances are unaffected.
    pub fn remove_instance(&self, id: InstanceId, delay: Duration, channel: Option<ChannelId>) {
        self.with_table(|table, evicted| {
            if delay.is_zero() {
                table.release(id, channel, evicted);
            } else if table.handles.contains_key(&id) {
                let deadline = Instant::now() + delay;
                debug!(%id, ?delay, "scheduled delayed removal");
                table.pending.insert((id, channel), deadline);
            }
        })
    }

    /// Detaches every instance from `channel`, evicting each non-pinned
    /// instance that was exported on no other channel. Returns the number evicted.
    pub fn remove_all_for_channel(&self, channel: ChannelId) -> usize {
        self.with_table(|table, evicted| {
            table.pending.retain(|(_, ch), _| *ch != Some(channel));
            let attached: Vec<InstanceId> = table
                .handles
                .iter()
                .filter(|(_, h)| !h.pinned && h.channels.contains(&channel))
                .map(|(id, _)| *id)
                .collect();
            let before = evicted.len();
            for id in attached {
                table.release(id, Some(channel), evicted);
            }
            let removed = evicted.len() - before;
            debug!(%channel, removed, "released instances of closed channel");
            removed
        })
    }

    /// Removes `id` unconditionally, pinned or not.
    pub fn unregister(&self, id: InstanceId) -> bool {
        self.with_table(|table, evicted| {
            let before = evicted.len();
            table.evict(id, evicted);
            evicted.len() > before
        })
    }

    /// Evicts unreachable instances and applies due removals.
    pub fn purge(&self) {
        self.with_table(|_, _| ());
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.with_table(|table, _| table.handles.contains_key(&id))
    }

    pub fn is_pinned(&self, id: InstanceId) -> bool {
        self.with_table(|table, _| table.handles.get(&id).is_some_and(|h| h.pinned))
    }

    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Purges every `interval` until the repository is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let repository = Arc::downgrade(self);
        tokio::spawn(async move {
            // `interval` panics on a zero period.
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(repository) = repository.upgrade() else {
                    break;
                };
                repository.purge();
            }
        })
    }
}
