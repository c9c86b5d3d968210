//! Shared state cells: listener bookkeeping and the published build state.
//!
//! Both cells follow the same discipline: a single writer publishes
//! immutable snapshots through an atomic swap, and readers load whatever
//! snapshot is current. Nobody ever mutates a published value.
//!
//! - [`ServerState`] is owned by the reader loop (the only writer) and
//!   records who is listening to what.
//! - [`BuildStateCell`] is written by the engine loop after each command
//!   and read by the reader loop to answer state-dependent requests. It is
//!   empty until the first successful load.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::build::{BuildState, ScopedKey};
use crate::client::ClientHandle;
use crate::messages::Event;

/// Immutable listener bookkeeping.
///
/// Mutators are copy-on-write: they return a new value and leave `self`
/// untouched, so a snapshot handed to another thread stays valid forever.
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    event_listeners: HashSet<ClientHandle>,
    build_listeners: HashSet<ClientHandle>,
    key_listeners: HashMap<ScopedKey, HashSet<ClientHandle>>,
}

impl ServerState {
    pub fn new() -> Self {
        ServerState::default()
    }

    /// Subscribe `client` to global events. Idempotent.
    pub fn add_event_listener(&self, client: ClientHandle) -> Self {
        let mut next = self.clone();
        next.event_listeners.insert(client);
        next
    }

    /// Subscribe `client` to build-structure changes. Idempotent.
    pub fn add_build_listener(&self, client: ClientHandle) -> Self {
        let mut next = self.clone();
        next.build_listeners.insert(client);
        next
    }

    /// Subscribe `client` to value changes of `key`. Idempotent.
    pub fn add_key_listener(&self, client: ClientHandle, key: ScopedKey) -> Self {
        let mut next = self.clone();
        next.key_listeners.entry(key).or_default().insert(client);
        next
    }

    /// Remove `client` from every listener set.
    pub fn disconnect(&self, client: &ClientHandle) -> Self {
        let mut next = self.clone();
        next.event_listeners.remove(client);
        next.build_listeners.remove(client);
        for listeners in next.key_listeners.values_mut() {
            listeners.remove(client);
        }
        next.key_listeners.retain(|_, listeners| !listeners.is_empty());
        next
    }

    pub fn event_listeners(&self) -> impl Iterator<Item = &ClientHandle> {
        self.event_listeners.iter()
    }

    pub fn build_listeners(&self) -> impl Iterator<Item = &ClientHandle> {
        self.build_listeners.iter()
    }

    pub fn key_listeners(&self) -> impl Iterator<Item = (&ScopedKey, &HashSet<ClientHandle>)> {
        self.key_listeners.iter()
    }

    /// True if `client` appears in no listener set.
    pub fn is_disconnected(&self, client: &ClientHandle) -> bool {
        !self.event_listeners.contains(client)
            && !self.build_listeners.contains(client)
            && !self
                .key_listeners
                .values()
                .any(|listeners| listeners.contains(client))
    }

    pub fn notify_event_listeners(&self, event: Event) {
        for client in &self.event_listeners {
            client.send(event.clone());
        }
    }

    pub fn notify_build_listeners(&self, event: Event) {
        for client in &self.build_listeners {
            client.send(event.clone());
        }
    }
}

/// Atomic publication point for [`ServerState`].
///
/// Single writer (the reader loop); the engine loop loads snapshots when
/// it needs to notify listeners.
#[derive(Default)]
pub struct ServerStateCell {
    inner: ArcSwap<ServerState>,
}

impl ServerStateCell {
    pub fn new() -> Self {
        ServerStateCell {
            inner: ArcSwap::from_pointee(ServerState::new()),
        }
    }

    pub fn publish(&self, state: ServerState) {
        self.inner.store(Arc::new(state));
    }

    pub fn snapshot(&self) -> Arc<ServerState> {
        self.inner.load_full()
    }
}

impl fmt::Debug for ServerStateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerStateCell")
            .field("inner", &"ArcSwap<ServerState>")
            .finish()
    }
}

/// Atomic publication point for the latest build state.
///
/// Single writer (the engine loop). Empty until the initial load has been
/// published; it never becomes empty again afterwards.
pub struct BuildStateCell<S> {
    inner: ArcSwapOption<S>,
}

impl<S: BuildState> BuildStateCell<S> {
    pub fn new() -> Self {
        BuildStateCell {
            inner: ArcSwapOption::empty(),
        }
    }

    pub fn publish(&self, state: Arc<S>) {
        self.inner.store(Some(state));
    }

    pub fn snapshot(&self) -> Option<Arc<S>> {
        self.inner.load_full()
    }

    pub fn is_published(&self) -> bool {
        self.inner.load().is_some()
    }
}

impl<S: BuildState> Default for BuildStateCell<S> {
    fn default() -> Self {
        BuildStateCell::new()
    }
}

impl<S> fmt::Debug for BuildStateCell<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildStateCell")
            .field("inner", &"ArcSwapOption<S>")
            .finish()
    }
}
