//! Client-side roster cache with offline fallback.
//!
//! Transition requests go to the authoritative backend first. When no response
//! arrives within the configured timeout the same request is applied to the
//! local demo roster instead, and the client reports that it is in demo mode.
//! Pushes from the real-time relay are merged into the cache as they arrive.

pub mod backend;
pub mod fallback;
pub mod live;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::models::{AttendanceEvent, Child};
use crate::services::transition::{Action, TransitionError};

pub use backend::{AttendanceBackend, BackendError, HttpBackend};
pub use fallback::FallbackRoster;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request rejected: {0}")]
    Rejected(TransitionError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// UI notification, the equivalent of a toast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Failure(String),
    /// Backend unreachable; reads and writes now go to the demo roster
    DemoMode,
}

pub type NoticeReceiver = mpsc::UnboundedReceiver<Notice>;

struct Inner {
    backend: Arc<dyn AttendanceBackend>,
    fallback: FallbackRoster,
    config: ClientConfig,
    cache: RwLock<HashMap<String, Child>>,
    demo_mode: AtomicBool,
    notices: mpsc::UnboundedSender<Notice>,
}

#[derive(Clone)]
pub struct RosterClient {
    inner: Arc<Inner>,
}

enum Source<T> {
    Backend(T),
    Fallback,
}

impl RosterClient {
    pub fn new(
        backend: Arc<dyn AttendanceBackend>,
        fallback: FallbackRoster,
        config: ClientConfig,
    ) -> (Self, NoticeReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            inner: Arc::new(Inner {
                backend,
                fallback,
                config,
                cache: RwLock::new(HashMap::new()),
                demo_mode: AtomicBool::new(false),
                notices: tx,
            }),
        };
        (client, rx)
    }

    /// Convenience constructor talking to the REST API over HTTP
    pub fn connect_http(config: ClientConfig) -> Result<(Self, NoticeReceiver), ClientError> {
        let backend = HttpBackend::new(&config)?;
        Ok(Self::new(Arc::new(backend), FallbackRoster::new(), config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn fallback(&self) -> &FallbackRoster {
        &self.inner.fallback
    }

    pub fn is_demo_mode(&self) -> bool {
        self.inner.demo_mode.load(Ordering::SeqCst)
    }

    /// Reloads the cache from the backend, or from the demo roster when the
    /// backend is unreachable
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, classroom_id: Option<&str>) -> Result<Vec<Child>, ClientError> {
        let children = match self.bounded(self.inner.backend.list(classroom_id)).await? {
            Source::Backend(children) => children,
            Source::Fallback => self.inner.fallback.list(classroom_id).await,
        };

        {
            let mut cache = self.inner.cache.write().unwrap_or_else(|e| e.into_inner());
            match classroom_id {
                Some(classroom_id) => cache.retain(|_, c| c.classroom_id != classroom_id),
                None => cache.clear(),
            }
            for child in &children {
                cache.insert(child.id.clone(), child.clone());
            }
        }

        tracing::debug!(count = children.len(), demo = self.is_demo_mode(), "Roster refreshed");
        Ok(self.roster(classroom_id))
    }

    /// Cached roster, ordered by display name
    pub fn roster(&self, classroom_id: Option<&str>) -> Vec<Child> {
        let cache = self.inner.cache.read().unwrap_or_else(|e| e.into_inner());
        let mut children: Vec<Child> = cache
            .values()
            .filter(|c| classroom_id.map_or(true, |id| c.classroom_id == id))
            .cloned()
            .collect();
        children.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        children
    }

    pub fn cached(&self, child_id: &str) -> Option<Child> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(child_id)
            .cloned()
    }

    pub async fn check_in(&self, child_id: &str) -> Result<Child, ClientError> {
        self.perform(child_id, Action::CheckIn).await
    }

    pub async fn check_out(&self, child_id: &str) -> Result<Child, ClientError> {
        self.perform(child_id, Action::CheckOut).await
    }

    #[tracing::instrument(skip(self))]
    async fn perform(&self, child_id: &str, action: Action) -> Result<Child, ClientError> {
        let request = self
            .inner
            .backend
            .transition(child_id, action, &self.inner.config.actor_id);

        let result = match self.bounded(request).await {
            Ok(Source::Backend(child)) => Ok(child),
            Ok(Source::Fallback) => self
                .inner
                .fallback
                .apply_transition(child_id, action.target())
                .await
                .map(|outcome| outcome.child)
                .map_err(ClientError::Rejected),
            Err(BackendError::Rejected(reason)) => Err(ClientError::Rejected(reason)),
            Err(other) => Err(ClientError::Backend(other)),
        };

        match result {
            Ok(child) => {
                self.upsert(child.clone());
                self.notify(Notice::Success(success_message(action).to_string()));
                Ok(child)
            }
            Err(err) => {
                tracing::info!(error = %err, "Attendance action failed");
                self.notify(Notice::Failure(failure_message(action).to_string()));
                Err(err)
            }
        }
    }

    /// Merges a pushed event into the cache. Last event wins.
    ///
    /// Returns `false` when the child is not cached yet (the next refresh
    /// will pick it up) or when the cached entry is already newer than the
    /// event.
    pub fn apply_event(&self, event: &AttendanceEvent) -> bool {
        let mut cache = self.inner.cache.write().unwrap_or_else(|e| e.into_inner());
        let Some(child) = cache.get_mut(&event.child_id) else {
            return false;
        };

        if child
            .last_activity_time
            .is_some_and(|cached| cached > event.timestamp)
        {
            tracing::debug!(child_id = %event.child_id, status = %event.status, "Ignoring stale event");
            return false;
        }

        child.status = event.status;
        child.last_activity_time = Some(event.timestamp);
        true
    }

    fn upsert(&self, child: Child) {
        self.inner
            .cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(child.id.clone(), child);
    }

    fn notify(&self, notice: Notice) {
        // Nobody listening is fine
        let _ = self.inner.notices.send(notice);
    }

    /// Runs a backend call under the configured timeout.
    ///
    /// Transport failures and timeouts become `Source::Fallback` and switch the
    /// client into demo mode; every other outcome is passed through.
    async fn bounded<T, F>(&self, request: F) -> Result<Source<T>, BackendError>
    where
        F: std::future::Future<Output = Result<T, BackendError>>,
    {
        let timeout = self.inner.config.request_timeout;
        let outcome = match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Unreachable(format!(
                "no response within {:?}",
                timeout
            ))),
        };

        match outcome {
            Ok(value) => {
                if self.inner.demo_mode.swap(false, Ordering::SeqCst) {
                    tracing::info!("Backend reachable again, leaving demo mode");
                    // Demo children must not linger next to real ones
                    self.inner
                        .cache
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .clear();
                }
                Ok(Source::Backend(value))
            }
            Err(BackendError::Unreachable(reason)) => {
                tracing::warn!(reason = %reason, "Backend unreachable, using demo roster");
                if !self.inner.demo_mode.swap(true, Ordering::SeqCst) {
                    self.notify(Notice::DemoMode);
                }
                Ok(Source::Fallback)
            }
            Err(other) => Err(other),
        }
    }
}

fn success_message(action: Action) -> &'static str {
    match action {
        Action::CheckIn => "Child checked in successfully",
        Action::CheckOut => "Child checked out successfully",
    }
}

fn failure_message(action: Action) -> &'static str {
    match action {
        Action::CheckIn => "Failed to check in child",
        Action::CheckOut => "Failed to check out child",
    }
}
