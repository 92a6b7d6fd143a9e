//! Room-scoped fan-out of attendance events to connected clients

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use crate::models::{AttendanceEvent, Scope};

/// Server → client frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Push {
    Subscribed { scope: Scope },
    Unsubscribed { scope: Scope },
    Attendance { event: AttendanceEvent },
    Error { message: String },
}

/// Client → server frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { scope: Scope },
    Unsubscribe { scope: Scope },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub type PushSender = mpsc::Sender<Push>;
pub type PushReceiver = mpsc::Receiver<Push>;

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, PushSender>,
    scopes: HashMap<Scope, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<Scope>>,
}

impl Registry {
    fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let existed = self.connections.remove(&id).is_some();
        for scope in self.memberships.remove(&id).unwrap_or_default() {
            if let Some(members) = self.scopes.get_mut(&scope) {
                members.remove(&id);
                if members.is_empty() {
                    self.scopes.remove(&scope);
                }
            }
        }
        existed
    }
}

/// Best-effort, at-most-once delivery of events to subscribed connections.
///
/// Every connection owns a bounded queue; a full or closed queue drops the
/// push for that connection only.
#[derive(Clone)]
pub struct Relay {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl Relay {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        }
    }

    /// Registers a connection and returns the receiving end of its queue
    pub fn connect(&self) -> (ConnectionId, PushReceiver) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);

        self.registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .connections
            .insert(id, tx);

        tracing::debug!(connection = %id, "Relay connection registered");
        (id, rx)
    }

    /// Adds the connection to a scope. Returns `true` if membership is new.
    pub fn subscribe(&self, id: ConnectionId, scope: Scope) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        if !registry.connections.contains_key(&id) {
            return false;
        }

        let added = registry
            .memberships
            .entry(id)
            .or_default()
            .insert(scope.clone());
        if added {
            registry.scopes.entry(scope.clone()).or_default().insert(id);
            tracing::debug!(connection = %id, scope = %scope, "Joined scope");
        }
        added
    }

    pub fn unsubscribe(&self, id: ConnectionId, scope: &Scope) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());

        let removed = registry
            .memberships
            .get_mut(&id)
            .map_or(false, |scopes| scopes.remove(scope));
        if removed {
            if let Some(members) = registry.scopes.get_mut(scope) {
                members.remove(&id);
                if members.is_empty() {
                    registry.scopes.remove(scope);
                }
            }
            tracing::debug!(connection = %id, scope = %scope, "Left scope");
        }
        removed
    }

    /// Drops the connection and all of its memberships
    pub fn disconnect(&self, id: ConnectionId) {
        let existed = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove_connection(id);
        if existed {
            tracing::debug!(connection = %id, "Relay connection removed");
        }
    }

    /// Delivers an event to everyone in `child:<id>` or `classroom:<id>`.
    ///
    /// Returns the number of connections the push was queued for.
    pub fn publish(&self, event: &AttendanceEvent) -> usize {
        let scopes = [
            Scope::child(event.child_id.clone()),
            Scope::classroom(event.classroom_id.clone()),
        ];
        let push = Push::Attendance {
            event: event.clone(),
        };

        let delivered = self.deliver(&scopes, &push);
        tracing::debug!(
            child_id = %event.child_id,
            status = %event.status,
            delivered,
            "Attendance event published"
        );
        delivered
    }

    /// Sends an arbitrary push to one scope, e.g. a `user:<id>` room
    pub fn send_to_scope(&self, scope: &Scope, push: Push) -> usize {
        self.deliver(std::slice::from_ref(scope), &push)
    }

    fn deliver(&self, scopes: &[Scope], push: &Push) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());

            // BTreeSet: one push per connection even if it sits in several scopes
            let targets: BTreeSet<ConnectionId> = scopes
                .iter()
                .filter_map(|scope| registry.scopes.get(scope))
                .flatten()
                .copied()
                .collect();

            for id in targets {
                let Some(tx) = registry.connections.get(&id) else {
                    continue;
                };
                match tx.try_send(push.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(connection = %id, "Delivery failed: queue full, dropping push");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::warn!(connection = %id, "Delivery failed: connection closed");
                        closed.push(id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            for id in closed {
                registry.remove_connection(id);
            }
        }

        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .connections
            .len()
    }

    pub fn subscribers(&self, scope: &Scope) -> Vec<ConnectionId> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<_> = registry
            .scopes
            .get(scope)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(64)
    }
}
