use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use super::child::{AttendanceStatus, Child};

/// Record of one applied transition. Created together with the child update it
/// describes and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub child_id: String,
    pub status: AttendanceStatus,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    pub classroom_id: String, // denormalized for room-scoped fan-out
}

impl AttendanceEvent {
    /// Builds the event for a child that has just been moved to its current status.
    pub fn for_child(child: &Child, actor_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            child_id: child.id.clone(),
            status: child.status,
            actor_id: actor_id.to_string(),
            timestamp,
            classroom_id: child.classroom_id.clone(),
        }
    }
}

impl AttendanceEvent {
    /// Appends the event to the attendance log
    pub async fn insert(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO attendance_events (id, child_id, status, actor_id, classroom_id, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(self.id)
        .bind(&self.child_id)
        .bind(self.status)
        .bind(&self.actor_id)
        .bind(&self.classroom_id)
        .bind(self.timestamp)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
