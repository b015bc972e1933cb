//! # Instance Manager
//!
//! Owns the live service objects of one hosting process, keyed by the
//! [`Entry`] they were created from.
//!
//! ## Invariants
//!
//! - **Global** entries have at most one live object. Every `create_instance`
//!   shares it and bumps its refcount; the object is dropped when the count
//!   returns to zero.
//! - **Private** entries construct a new object per request. Ids are never
//!   shared.
//! - Instance ids are unique across all entries for the lifetime of the
//!   manager and never reused.
//! - All bookkeeping happens under one lock, so refcounts and events are
//!   consistent under concurrent create/close.
//! - Factories, `verify_credentials` and object drops run outside that lock,
//!   so service code may call back into the manager. Construction of a
//!   Global object is serialized per entry by its own gate.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use svcpack::CallError;
use svcpack::EntryKey;
use svcpack::InstanceId;
use svcpack::Invocation;
use svcpack::Value;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::channel::Credentials;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no entry registered for {0}")]
    UnknownEntry(EntryKey),
    #[error("{1} is not a live instance of {0}")]
    UnknownInstance(EntryKey, InstanceId),
    #[error("constructing {0} failed: {1}")]
    Construction(EntryKey, String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How instances of an entry are shared between clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstancePolicy {
    Global,
    Private,
}

/// A service object reachable over the protocol.
///
/// Implementations usually convert the [`Invocation`] into a per-interface
/// call enum and match on it.
pub trait ServiceObject: Send + Sync + 'static {
    fn invoke(&self, call: Invocation) -> std::result::Result<Value, CallError>;

    /// Re-checks a new client against an already running Global object.
    fn verify_credentials(&self, _credentials: &Credentials) -> bool {
        true
    }
}

/// Builds a service object for the presented credentials.
/// [`Credentials::none`] is passed when the transport reports nothing.
pub type Factory = Arc<dyn Fn(&Credentials) -> std::result::Result<Arc<dyn ServiceObject>, String> + Send + Sync>;

/// A constructible type bound to an `(service, interface, version)` identity.
#[derive(Clone)]
pub struct Entry {
    key: EntryKey,
    policy: InstancePolicy,
    factory: Factory,
}

impl Entry {
    pub fn new<F>(key: EntryKey, policy: InstancePolicy, factory: F) -> Self
    where
        F: Fn(&Credentials) -> std::result::Result<Arc<dyn ServiceObject>, String> + Send + Sync + 'static,
    {
        Self { key, policy, factory: Arc::new(factory) }
    }

    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    pub fn policy(&self) -> InstancePolicy {
        self.policy
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("key", &self.key).field("policy", &self.policy).finish()
    }
}

/// Lifecycle notifications, delivered in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
    /// An object of this entry was destroyed.
    EntryClosed(EntryKey),
    /// The object with this id was destroyed. Always follows `EntryClosed`.
    InstanceClosed(EntryKey, InstanceId),
    /// No live instance is left in the manager.
    AllInstancesClosed,
}

struct GlobalInstance {
    id: InstanceId,
    object: Arc<dyn ServiceObject>,
    refcount: usize,
}

struct Slot {
    entry: Entry,
    global: Option<GlobalInstance>,
    private: HashMap<InstanceId, Arc<dyn ServiceObject>>,
    /// Held while the Global object is being constructed.
    gate: Arc<Mutex<()>>,
}

impl Slot {
    fn live(&self) -> usize {
        self.global.as_ref().map_or(0, |g| g.refcount) + self.private.len()
    }
}

/// Registry of entries and their live objects.
pub struct InstanceManager {
    slots: Mutex<HashMap<EntryKey, Slot>>,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<InstanceEvent>>>,
}

impl Default for InstanceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceManager {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers `entry`. Returns `false`, with a warning, if its key is
    /// already known.
    pub fn add_type(&self, entry: Entry) -> bool {
        let mut slots = self.slots.lock();
        if slots.contains_key(entry.key()) {
            warn!(entry = %entry.key(), "entry already registered, ignoring");
            return false;
        }
        debug!(entry = %entry.key(), policy = ?entry.policy(), "registered entry");
        slots.insert(entry.key().clone(), Slot { entry, global: None, private: HashMap::new(), gate: Arc::default() });
        true
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.slots.lock().values().map(|s| s.entry.clone()).collect()
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.slots.lock().contains_key(key)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<InstanceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Returns an object for `key`, constructing one when the policy requires.
    pub fn create_instance(&self, key: &EntryKey, credentials: &Credentials) -> Result<(InstanceId, Arc<dyn ServiceObject>)> {
        let (policy, factory, gate) = {
            let slots = self.slots.lock();
            let slot = slots.get(key).ok_or_else(|| Error::UnknownEntry(key.clone()))?;
            (slot.entry.policy, slot.entry.factory.clone(), slot.gate.clone())
        };

        match policy {
            InstancePolicy::Global => {
                let shared = {
                    let _constructing = gate.lock();
                    match self.share_global(key)? {
                        Some(shared) => shared,
                        None => {
                            let object = factory(credentials).map_err(|e| Error::Construction(key.clone(), e))?;
                            let id = self.fresh_id();
                            let mut slots = self.slots.lock();
                            let slot = slots.get_mut(key).ok_or_else(|| Error::UnknownEntry(key.clone()))?;
                            slot.global = Some(GlobalInstance { id, object: object.clone(), refcount: 1 });
                            debug!(entry = %key, instance = %id, "created global instance");
                            return Ok((id, object));
                        }
                    }
                };
                reverify(key, &shared, credentials);
                Ok(shared)
            }
            InstancePolicy::Private => {
                let object = factory(credentials).map_err(|e| Error::Construction(key.clone(), e))?;
                let id = self.fresh_id();
                let mut slots = self.slots.lock();
                let slot = slots.get_mut(key).ok_or_else(|| Error::UnknownEntry(key.clone()))?;
                slot.private.insert(id, object.clone());
                debug!(entry = %key, instance = %id, "created private instance");
                Ok((id, object))
            }
        }
    }

    /// Takes one more reference on the live Global object of `key`, if any.
    fn share_global(&self, key: &EntryKey) -> Result<Option<(InstanceId, Arc<dyn ServiceObject>)>> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(key).ok_or_else(|| Error::UnknownEntry(key.clone()))?;
        Ok(slot.global.as_mut().map(|global| {
            global.refcount += 1;
            debug!(entry = %key, instance = %global.id, refcount = global.refcount, "shared global instance");
            (global.id, global.object.clone())
        }))
    }

    /// Releases one reference to `id`.
    pub fn close_instance(&self, key: &EntryKey, id: InstanceId) -> Result<()> {
        let mut events = Vec::new();
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(key).ok_or_else(|| Error::UnknownEntry(key.clone()))?;

        let destroyed = match slot.entry.policy {
            InstancePolicy::Global => {
                let remaining = match slot.global.as_mut() {
                    Some(global) if global.id == id => {
                        global.refcount -= 1;
                        global.refcount
                    }
                    _ => return Err(Error::UnknownInstance(key.clone(), id)),
                };
                if remaining == 0 {
                    slot.global.take().map(|g| g.object)
                } else {
                    debug!(entry = %key, instance = %id, refcount = remaining, "released global reference");
                    None
                }
            }
            InstancePolicy::Private => {
                let object = slot.private.remove(&id).ok_or_else(|| Error::UnknownInstance(key.clone(), id))?;
                Some(object)
            }
        };

        if destroyed.is_some() {
            debug!(entry = %key, instance = %id, "destroyed instance");
            events.push(InstanceEvent::EntryClosed(key.clone()));
            events.push(InstanceEvent::InstanceClosed(key.clone(), id));
            if slots.values().all(|s| s.live() == 0) {
                events.push(InstanceEvent::AllInstancesClosed);
            }
        }

        // Still under the slot lock so concurrent closes publish in order.
        self.emit(events);
        drop(slots);
        drop(destroyed);
        Ok(())
    }

    /// Looks up a live object without touching its refcount.
    pub fn object(&self, key: &EntryKey, id: InstanceId) -> Option<Arc<dyn ServiceObject>> {
        let slots = self.slots.lock();
        let slot = slots.get(key)?;
        match &slot.global {
            Some(global) if global.id == id => Some(global.object.clone()),
            _ => slot.private.get(&id).cloned(),
        }
    }

    /// Current refcount of a Global entry's object; `0` when none is live.
    pub fn refcount(&self, key: &EntryKey) -> usize {
        self.slots.lock().get(key).and_then(|s| s.global.as_ref()).map_or(0, |g| g.refcount)
    }

    /// Sum of Global refcounts plus the number of Private instances.
    pub fn total_instances(&self) -> usize {
        self.slots.lock().values().map(Slot::live).sum()
    }

    fn fresh_id(&self) -> InstanceId {
        InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, events: Vec<InstanceEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| events.iter().all(|e| s.send(e.clone()).is_ok()));
    }
}

fn reverify(key: &EntryKey, (id, object): &(InstanceId, Arc<dyn ServiceObject>), credentials: &Credentials) {
    if !object.verify_credentials(credentials) {
        // Access is still granted; the object only gets to object.
        warn!(entry = %key, instance = %id, ?credentials, "credential re-verification failed");
    }
}
