use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

/// Where a child sits in the enrollment pipeline. Only `Enrolled` children
/// take part in attendance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "enrollment_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Waitlist,
    Pending,
    Enrolled,
}

/// Presence status for the current day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "attendance_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Absent,
    Present,
    CheckedOut,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::CheckedOut => "CHECKED_OUT",
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: String,
    pub display_name: String,
    pub classroom_id: String,
    pub enrollment_status: EnrollmentStatus,
    pub status: AttendanceStatus,
    pub last_activity_time: Option<DateTime<Utc>>, // unset until the first transition of the day
    #[serde(default)]
    pub allergies: Vec<String>,
    pub avatar_url: Option<String>,
}

impl Child {
    /// Builds an enrolled, absent child with no activity yet.
    pub fn enrolled(
        id: impl Into<String>,
        display_name: impl Into<String>,
        classroom_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            classroom_id: classroom_id.into(),
            enrollment_status: EnrollmentStatus::Enrolled,
            status: AttendanceStatus::Absent,
            last_activity_time: None,
            allergies: Vec::new(),
            avatar_url: None,
        }
    }

    pub fn with_enrollment(mut self, enrollment_status: EnrollmentStatus) -> Self {
        self.enrollment_status = enrollment_status;
        self
    }

    pub fn with_status(mut self, status: AttendanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_allergies(mut self, allergies: &[&str]) -> Self {
        self.allergies = allergies.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

impl Child {
    /// List the roster, optionally for a single classroom
    pub async fn list(pool: &PgPool, classroom_id: Option<&str>) -> Result<Vec<Self>, sqlx::Error> {
        let children = if let Some(classroom_id) = classroom_id {
            sqlx::query_as::<_, Child>(
                r#"
                SELECT * FROM children
                WHERE classroom_id = $1
                ORDER BY display_name ASC, id ASC
                "#,
            )
            .bind(classroom_id)
            .fetch_all(pool)
            .await?
        } else {
            sqlx::query_as::<_, Child>(
                r#"
                SELECT * FROM children
                ORDER BY display_name ASC, id ASC
                "#,
            )
            .fetch_all(pool)
            .await?
        };

        Ok(children)
    }

    /// Find child by ID
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Self>, sqlx::Error> {
        let child = sqlx::query_as::<_, Child>(
            r#"
            SELECT * FROM children WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(child)
    }

    /// Moves a child from `from` to `to` in a single conditional statement.
    ///
    /// Returns `None` when the child is missing or no longer in `from`; the row
    /// lock taken by the UPDATE serializes concurrent writers for one child.
    pub async fn update_status_if(
        conn: &mut PgConnection,
        id: &str,
        from: AttendanceStatus,
        to: AttendanceStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let child = sqlx::query_as::<_, Child>(
            r#"
            UPDATE children
            SET status = $3, last_activity_time = $4, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(child)
    }

    /// Current attendance status, if the child exists
    pub async fn current_status(
        conn: &mut PgConnection,
        id: &str,
    ) -> Result<Option<AttendanceStatus>, sqlx::Error> {
        let status = sqlx::query_scalar::<_, AttendanceStatus>(
            r#"
            SELECT status FROM children WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_json_shape() {
        let child = Child::enrolled("c1", "Emma Johnson", "toddlers").with_allergies(&["Peanuts"]);
        let json = serde_json::to_value(&child).unwrap();

        assert_eq!(json["id"], "c1");
        assert_eq!(json["displayName"], "Emma Johnson");
        assert_eq!(json["classroomId"], "toddlers");
        assert_eq!(json["enrollmentStatus"], "ENROLLED");
        assert_eq!(json["status"], "ABSENT");
        assert!(json["lastActivityTime"].is_null());
        assert_eq!(json["allergies"][0], "Peanuts");
    }

    #[test]
    fn test_status_parses_wire_names() {
        let status: AttendanceStatus = serde_json::from_str(r#""CHECKED_OUT""#).unwrap();
        assert_eq!(status, AttendanceStatus::CheckedOut);
        assert_eq!(status.to_string(), "CHECKED_OUT");
    }
}
