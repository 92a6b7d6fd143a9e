use chrono::Utc;

use crate::models::{AttendanceStatus, Child, EnrollmentStatus};
use crate::services::roster::{MemoryRoster, RosterStore, StatusChange, StoreError, TransitionOutcome};
use crate::services::transition::{self, TransitionError};

/// Actor recorded on transitions applied while in demo mode
pub const DEMO_ACTOR: &str = "demo";

/// Fixed demo roster used when the backend cannot be reached
pub fn demo_roster() -> Vec<Child> {
    vec![
        Child::enrolled("child-1", "Emma Johnson", "toddlers")
            .with_allergies(&["Peanuts"])
            .with_avatar("https://i.pravatar.cc/150?img=1"),
        Child::enrolled("child-2", "Liam Smith", "toddlers")
            .with_avatar("https://i.pravatar.cc/150?img=2"),
        Child::enrolled("child-3", "Olivia Williams", "toddlers")
            .with_allergies(&["Dairy"])
            .with_avatar("https://i.pravatar.cc/150?img=3"),
        Child::enrolled("child-4", "Noah Brown", "toddlers")
            .with_avatar("https://i.pravatar.cc/150?img=4"),
        Child::enrolled("child-5", "Ava Davis", "infants")
            .with_allergies(&["Eggs"])
            .with_avatar("https://i.pravatar.cc/150?img=5"),
        Child::enrolled("child-6", "Ethan Miller", "infants")
            .with_avatar("https://i.pravatar.cc/150?img=6"),
        Child::enrolled("child-7", "Sophia Garcia", "infants")
            .with_avatar("https://i.pravatar.cc/150?img=7"),
        Child::enrolled("child-8", "Mason Martinez", "toddlers")
            .with_allergies(&["Shellfish"])
            .with_avatar("https://i.pravatar.cc/150?img=8"),
        Child::enrolled("child-9", "Felix Roar", "infants")
            .with_enrollment(EnrollmentStatus::Waitlist)
            .with_avatar("https://i.pravatar.cc/150?img=9"),
    ]
}

/// Local stand-in for the roster store, seeded with [`demo_roster`].
///
/// Applies the same state machine as the server engine; only the storage differs.
pub struct FallbackRoster {
    seed: Vec<Child>,
    store: MemoryRoster,
}

impl FallbackRoster {
    pub fn new() -> Self {
        Self::with_seed(demo_roster())
    }

    pub fn with_seed(seed: Vec<Child>) -> Self {
        let store = MemoryRoster::new(seed.clone());
        Self { seed, store }
    }

    pub async fn list(&self, classroom_id: Option<&str>) -> Vec<Child> {
        // The memory store has no failure mode for reads
        self.store.list(classroom_id).await.unwrap_or_default()
    }

    pub async fn get(&self, child_id: &str) -> Result<Child, TransitionError> {
        self.store
            .get(child_id)
            .await
            .map_err(|_| TransitionError::NotFound)
    }

    pub async fn apply_transition(
        &self,
        child_id: &str,
        target: AttendanceStatus,
    ) -> Result<TransitionOutcome, TransitionError> {
        let child = self.get(child_id).await?;
        transition::validate(child.status, child.enrollment_status, target)?;

        self.store
            .apply_transition(StatusChange {
                child_id: child.id,
                from: child.status,
                to: target,
                actor_id: DEMO_ACTOR.to_string(),
                at: Utc::now(),
            })
            .await
            .map_err(|err| match err {
                StoreError::NotFound => TransitionError::NotFound,
                _ => TransitionError::InvalidTransition,
            })
    }

    /// Restores the seed roster: everyone absent, no activity times
    pub fn reset(&self) {
        let fresh = self.seed.iter().cloned().map(|mut child| {
            child.status = AttendanceStatus::Absent;
            child.last_activity_time = None;
            child
        });
        self.store.replace_all(fresh);
        tracing::info!("Demo roster reset");
    }
}

impl Default for FallbackRoster {
    fn default() -> Self {
        Self::new()
    }
}
