use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{AttendanceEvent, AttendanceStatus, Child};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Child not found")]
    NotFound,

    #[error("Child status changed concurrently (now {current})")]
    Conflict { current: AttendanceStatus },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A validated status change handed to the store.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub child_id: String,
    /// Status the caller validated against; the write only lands if it still holds
    pub from: AttendanceStatus,
    pub to: AttendanceStatus,
    pub actor_id: String,
    pub at: DateTime<Utc>,
}

/// Updated child plus the event created with it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub child: Child,
    pub event: AttendanceEvent,
}

/// Authoritative roster. `apply_transition` is the only mutator and must be
/// atomic per child id.
#[async_trait]
pub trait RosterStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn list(&self, classroom_id: Option<&str>) -> Result<Vec<Child>, StoreError>;

    async fn get(&self, child_id: &str) -> Result<Child, StoreError>;

    async fn apply_transition(&self, change: StatusChange) -> Result<TransitionOutcome, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed roster
#[derive(Clone)]
pub struct PgRosterStore {
    pool: PgPool,
}

impl PgRosterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RosterStore for PgRosterStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn list(&self, classroom_id: Option<&str>) -> Result<Vec<Child>, StoreError> {
        Ok(Child::list(&self.pool, classroom_id).await?)
    }

    async fn get(&self, child_id: &str) -> Result<Child, StoreError> {
        Child::find_by_id(&self.pool, child_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    #[tracing::instrument(skip(self, change), fields(child_id = %change.child_id, to = %change.to))]
    async fn apply_transition(&self, change: StatusChange) -> Result<TransitionOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated =
            Child::update_status_if(&mut *tx, &change.child_id, change.from, change.to, change.at)
                .await?;

        let child = match updated {
            Some(child) => child,
            None => {
                let current = Child::current_status(&mut *tx, &change.child_id).await?;
                tx.rollback().await?;
                return Err(match current {
                    Some(current) => StoreError::Conflict { current },
                    None => StoreError::NotFound,
                });
            }
        };

        let event = AttendanceEvent::for_child(&child, &change.actor_id, change.at);
        event.insert(&mut *tx).await?;
        tx.commit().await?;

        tracing::debug!(event_id = %event.id, "Attendance event recorded");

        Ok(TransitionOutcome { child, event })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Process-local roster.
///
/// Each child sits behind its own mutex, held across the compare and the
/// write, so transitions for one child serialize while different children
/// proceed independently.
#[derive(Default)]
pub struct MemoryRoster {
    children: RwLock<HashMap<String, Arc<Mutex<Child>>>>,
    events: std::sync::Mutex<Vec<AttendanceEvent>>,
}

impl MemoryRoster {
    pub fn new(children: impl IntoIterator<Item = Child>) -> Self {
        let roster = Self::default();
        roster.replace_all(children);
        roster
    }

    /// Inserts or replaces a single child
    pub fn insert(&self, child: Child) {
        let mut children = self.children.write().unwrap_or_else(|e| e.into_inner());
        children.insert(child.id.clone(), Arc::new(Mutex::new(child)));
    }

    /// Swaps the whole roster and clears the event log
    pub fn replace_all(&self, seed: impl IntoIterator<Item = Child>) {
        let fresh: HashMap<_, _> = seed
            .into_iter()
            .map(|child| (child.id.clone(), Arc::new(Mutex::new(child))))
            .collect();

        *self.children.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Events applied so far, oldest first
    pub fn events(&self) -> Vec<AttendanceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn entry(&self, child_id: &str) -> Option<Arc<Mutex<Child>>> {
        self.children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(child_id)
            .cloned()
    }
}

#[async_trait]
impl RosterStore for MemoryRoster {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, classroom_id: Option<&str>) -> Result<Vec<Child>, StoreError> {
        let entries: Vec<_> = self
            .children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let child = entry.lock().await;
            if classroom_id.map_or(true, |c| child.classroom_id == c) {
                children.push(child.clone());
            }
        }

        children.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(children)
    }

    async fn get(&self, child_id: &str) -> Result<Child, StoreError> {
        let entry = self.entry(child_id).ok_or(StoreError::NotFound)?;
        let child = entry.lock().await.clone();
        Ok(child)
    }

    async fn apply_transition(&self, change: StatusChange) -> Result<TransitionOutcome, StoreError> {
        let entry = self.entry(&change.child_id).ok_or(StoreError::NotFound)?;
        let mut child = entry.lock().await;

        if child.status != change.from {
            return Err(StoreError::Conflict {
                current: child.status,
            });
        }

        child.status = change.to;
        child.last_activity_time = Some(change.at);

        let event = AttendanceEvent::for_child(&child, &change.actor_id, change.at);
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());

        Ok(TransitionOutcome {
            child: child.clone(),
            event,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
