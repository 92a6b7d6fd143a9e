use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{AttendanceEvent, AttendanceStatus, Child};
use crate::services::child_locks::ChildLocks;
use crate::services::roster::{RosterStore, StatusChange, StoreError, TransitionOutcome};
use crate::services::transition::{self, Action, TransitionError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Transition rejected: {0}")]
    Rejected(TransitionError),

    #[error("Roster store error: {0}")]
    Storage(StoreError),
}

impl EngineError {
    /// Reason code reported to callers
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Rejected(reason) => reason.code(),
            EngineError::Storage(_) => "StorageUnavailable",
        }
    }
}

impl From<TransitionError> for EngineError {
    fn from(reason: TransitionError) -> Self {
        EngineError::Rejected(reason)
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => EngineError::Rejected(TransitionError::NotFound),
            // Another writer moved the child first; re-validating against the
            // new status can only fail.
            StoreError::Conflict { .. } => EngineError::Rejected(TransitionError::InvalidTransition),
            other => EngineError::Storage(other),
        }
    }
}

/// Per-child result of a bulk run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkItem {
    Applied { child: Child },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct BulkReport {
    pub results: BTreeMap<String, BulkItem>,
    /// Events of the applied items, in application order
    pub events: Vec<AttendanceEvent>,
}

impl BulkReport {
    pub fn applied_count(&self) -> usize {
        self.events.len()
    }
}

/// Applies attendance transitions against the roster store.
///
/// The engine does not publish anything. Callers that fan events out pass an
/// `on_applied` hook to the `*_with` variants; it runs while the child's lock
/// is still held, so hooks for one child observe events in application order.
#[derive(Clone)]
pub struct AttendanceEngine {
    store: Arc<dyn RosterStore>,
    locks: ChildLocks,
}

impl AttendanceEngine {
    pub fn new(store: Arc<dyn RosterStore>) -> Self {
        Self {
            store,
            locks: ChildLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RosterStore> {
        &self.store
    }

    pub async fn check_in(
        &self,
        child_id: &str,
        actor_id: &str,
    ) -> Result<TransitionOutcome, EngineError> {
        self.transition(child_id, Action::CheckIn.target(), actor_id)
            .await
    }

    pub async fn check_out(
        &self,
        child_id: &str,
        actor_id: &str,
    ) -> Result<TransitionOutcome, EngineError> {
        self.transition(child_id, Action::CheckOut.target(), actor_id)
            .await
    }

    /// Validates and applies one status change
    pub async fn transition(
        &self,
        child_id: &str,
        target: AttendanceStatus,
        actor_id: &str,
    ) -> Result<TransitionOutcome, EngineError> {
        self.transition_with(child_id, target, actor_id, |_| {})
            .await
    }

    /// Like [`transition`](Self::transition), running `on_applied` with the new
    /// event before the child is released to the next writer.
    #[tracing::instrument(skip(self, on_applied), fields(backend = self.store.backend_tag()))]
    pub async fn transition_with<F>(
        &self,
        child_id: &str,
        target: AttendanceStatus,
        actor_id: &str,
        on_applied: F,
    ) -> Result<TransitionOutcome, EngineError>
    where
        F: Fn(&AttendanceEvent),
    {
        let _guard = self.locks.lock(child_id).await;

        let child = self.store.get(child_id).await?;

        if let Err(reason) = transition::validate(child.status, child.enrollment_status, target) {
            tracing::info!(
                current = %child.status,
                enrollment = ?child.enrollment_status,
                reason = reason.code(),
                "Transition rejected"
            );
            return Err(reason.into());
        }

        let outcome = self
            .store
            .apply_transition(StatusChange {
                child_id: child.id,
                from: child.status,
                to: target,
                actor_id: actor_id.to_string(),
                at: Utc::now(),
            })
            .await
            .map_err(EngineError::from)?;

        tracing::info!(
            status = %outcome.child.status,
            classroom_id = %outcome.child.classroom_id,
            "Attendance updated"
        );

        on_applied(&outcome.event);

        Ok(outcome)
    }

    /// Applies the same target to many children independently.
    ///
    /// Failures are recorded per child and never undo or block other items.
    pub async fn bulk_transition(
        &self,
        child_ids: &[String],
        target: AttendanceStatus,
        actor_id: &str,
    ) -> BulkReport {
        self.bulk_transition_with(child_ids, target, actor_id, |_| {})
            .await
    }

    /// Bulk variant of [`transition_with`](Self::transition_with); the hook
    /// runs once per applied child.
    #[tracing::instrument(skip(self, child_ids, on_applied), fields(count = child_ids.len()))]
    pub async fn bulk_transition_with<F>(
        &self,
        child_ids: &[String],
        target: AttendanceStatus,
        actor_id: &str,
        on_applied: F,
    ) -> BulkReport
    where
        F: Fn(&AttendanceEvent),
    {
        let mut report = BulkReport::default();
        let mut seen = HashSet::new();

        for child_id in child_ids {
            if !seen.insert(child_id.as_str()) {
                continue;
            }

            let item = match self
                .transition_with(child_id, target, actor_id, &on_applied)
                .await
            {
                Ok(outcome) => {
                    report.events.push(outcome.event);
                    BulkItem::Applied {
                        child: outcome.child,
                    }
                }
                Err(err) => {
                    if let EngineError::Storage(ref e) = err {
                        tracing::error!(child_id = %child_id, error = %e, "Storage failure in bulk run");
                    }
                    BulkItem::Rejected {
                        reason: err.code().to_string(),
                    }
                }
            };

            report.results.insert(child_id.clone(), item);
        }

        tracing::info!(
            applied = report.applied_count(),
            total = report.results.len(),
            "Bulk transition finished"
        );

        report
    }
}
