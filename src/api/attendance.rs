use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::{AttendanceStatus, Child};
use crate::services::engine::BulkItem;
use crate::services::transition::Action;

// Request/Response types
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub child_id: String,
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkTransitionRequest {
    pub child_ids: Vec<String>,
    pub status: AttendanceStatus,
    pub actor_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkTransitionResponse {
    pub results: BTreeMap<String, BulkItem>,
}

fn require_actor(actor_id: &str) -> Result<()> {
    if actor_id.trim().is_empty() {
        return Err(AppError::Validation("actorId is required".to_string()));
    }
    Ok(())
}

async fn apply(
    state: &AppState,
    payload: std::result::Result<Json<TransitionRequest>, JsonRejection>,
    action: Action,
) -> Result<Json<Child>> {
    let Json(req) = payload?;
    require_actor(&req.actor_id)?;

    // Published after the write lands and before the child is unlocked
    let outcome = state
        .engine
        .transition_with(&req.child_id, action.target(), &req.actor_id, |event| {
            state.relay.publish(event);
        })
        .await?;

    Ok(Json(outcome.child))
}

/// Check a child in
async fn check_in(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<Json<Child>> {
    apply(&state, payload, Action::CheckIn).await
}

/// Check a child out
async fn check_out(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<Json<Child>> {
    apply(&state, payload, Action::CheckOut).await
}

/// Apply one target status to many children, reporting per child
async fn bulk(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BulkTransitionRequest>, JsonRejection>,
) -> Result<Json<BulkTransitionResponse>> {
    let Json(req) = payload?;
    require_actor(&req.actor_id)?;
    if req.child_ids.is_empty() {
        return Err(AppError::Validation(
            "childIds must not be empty".to_string(),
        ));
    }

    let report = state
        .engine
        .bulk_transition_with(&req.child_ids, req.status, &req.actor_id, |event| {
            state.relay.publish(event);
        })
        .await;

    Ok(Json(BulkTransitionResponse {
        results: report.results,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/attendance/check-in", post(check_in))
        .route("/api/attendance/check-out", post(check_out))
        .route("/api/attendance/bulk", post(bulk))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::api::test_support::{json_body, post_json, test_app, test_app_with_store, TOKEN};
    use crate::models::{AttendanceStatus, Child, EnrollmentStatus, Scope};
    use crate::services::relay::{Push, PushReceiver};
    use crate::services::roster::{
        MemoryRoster, RosterStore, StatusChange, StoreError, TransitionOutcome,
    };

    /// Store whose check-ins answer only after a delay, the way a commit
    /// acknowledgement can lag behind the write itself.
    struct SlowCheckInRoster {
        inner: MemoryRoster,
        delay: Duration,
    }

    #[async_trait]
    impl RosterStore for SlowCheckInRoster {
        fn backend_tag(&self) -> &'static str {
            "slow-memory"
        }

        async fn list(&self, classroom_id: Option<&str>) -> Result<Vec<Child>, StoreError> {
            self.inner.list(classroom_id).await
        }

        async fn get(&self, child_id: &str) -> Result<Child, StoreError> {
            self.inner.get(child_id).await
        }

        async fn apply_transition(
            &self,
            change: StatusChange,
        ) -> Result<TransitionOutcome, StoreError> {
            let slow = change.to == AttendanceStatus::Present;
            let outcome = self.inner.apply_transition(change).await?;
            if slow {
                tokio::time::sleep(self.delay).await;
            }
            Ok(outcome)
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn statuses(rx: &mut PushReceiver) -> Vec<AttendanceStatus> {
        let mut statuses = Vec::new();
        while let Ok(push) = rx.try_recv() {
            if let Push::Attendance { event } = push {
                statuses.push(event.status);
            }
        }
        statuses
    }

    fn roster() -> Vec<Child> {
        vec![
            Child::enrolled("c1", "Ada", "toddlers"),
            Child::enrolled("c2", "Bo", "toddlers").with_status(AttendanceStatus::Present),
            Child::enrolled("c3", "Cy", "toddlers").with_enrollment(EnrollmentStatus::Waitlist),
        ]
    }

    #[tokio::test]
    async fn test_check_in_returns_child_and_pushes_once() {
        let (app, state) = test_app(roster());
        let (conn, mut rx) = state.relay.connect();
        state.relay.subscribe(conn, Scope::classroom("toddlers"));
        state.relay.subscribe(conn, Scope::child("c1"));

        let response = app
            .oneshot(post_json(
                "/api/attendance/check-in",
                json!({"childId": "c1", "actorId": "u1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], "c1");
        assert_eq!(body["status"], "PRESENT");
        assert!(body["lastActivityTime"].is_string());

        match rx.try_recv() {
            Ok(Push::Attendance { event }) => {
                assert_eq!(event.child_id, "c1");
                assert_eq!(event.status, AttendanceStatus::Present);
                assert_eq!(event.actor_id, "u1");
                assert_eq!(event.classroom_id, "toddlers");
            }
            other => panic!("expected attendance push, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_transitions_map_to_status_codes() {
        let (app, state) = test_app(roster());
        let (conn, mut rx) = state.relay.connect();
        state.relay.subscribe(conn, Scope::classroom("toddlers"));

        let cases = [
            ("/api/attendance/check-in", "c2", StatusCode::CONFLICT, "InvalidTransition"),
            ("/api/attendance/check-out", "c1", StatusCode::CONFLICT, "InvalidTransition"),
            ("/api/attendance/check-in", "c3", StatusCode::UNPROCESSABLE_ENTITY, "NotEligible"),
            ("/api/attendance/check-in", "nope", StatusCode::NOT_FOUND, "NotFound"),
        ];

        for (uri, child, status, code) in cases {
            let response = app
                .clone()
                .oneshot(post_json(uri, json!({"childId": child, "actorId": "u1"})))
                .await
                .unwrap();
            assert_eq!(response.status(), status, "{} {}", uri, child);
            assert_eq!(json_body(response).await["code"], code);
        }

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_check_out_after_check_in() {
        let (app, _state) = test_app(roster());

        let response = app
            .oneshot(post_json(
                "/api/attendance/check-out",
                json!({"childId": "c2", "actorId": "u1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "CHECKED_OUT");
    }

    #[tokio::test]
    async fn test_blank_actor_is_a_validation_error() {
        let (app, _state) = test_app(roster());

        let response = app
            .oneshot(post_json(
                "/api/attendance/check-in",
                json!({"childId": "c1", "actorId": "  "}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bulk_reports_each_child() {
        let (app, state) = test_app(roster());
        let (conn, mut rx) = state.relay.connect();
        state.relay.subscribe(conn, Scope::classroom("toddlers"));

        let response = app
            .oneshot(post_json(
                "/api/attendance/bulk",
                json!({"childIds": ["c1", "c2", "c3"], "status": "PRESENT", "actorId": "u1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["results"]["c1"]["outcome"], "applied");
        assert_eq!(body["results"]["c1"]["child"]["status"], "PRESENT");
        assert_eq!(body["results"]["c2"]["outcome"], "rejected");
        assert_eq!(body["results"]["c2"]["reason"], "InvalidTransition");
        assert_eq!(body["results"]["c3"]["reason"], "NotEligible");

        assert!(matches!(rx.try_recv(), Ok(Push::Attendance { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bulk_requires_children() {
        let (app, _state) = test_app(roster());

        let response = app
            .oneshot(post_json(
                "/api/attendance/bulk",
                json!({"childIds": [], "status": "PRESENT", "actorId": "u1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_writers_push_in_application_order() {
        let store = Arc::new(SlowCheckInRoster {
            inner: MemoryRoster::new([Child::enrolled("c1", "Ada", "toddlers")]),
            delay: Duration::from_millis(100),
        });
        let (app, state) = test_app_with_store(store);
        let (conn, mut rx) = state.relay.connect();
        state.relay.subscribe(conn, Scope::classroom("toddlers"));

        let check_in = tokio::spawn(app.clone().oneshot(post_json(
            "/api/attendance/check-in",
            json!({"childId": "c1", "actorId": "u1"}),
        )));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let check_out = tokio::spawn(app.oneshot(post_json(
            "/api/attendance/check-out",
            json!({"childId": "c1", "actorId": "u2"}),
        )));

        assert_eq!(check_in.await.unwrap().unwrap().status(), StatusCode::OK);
        assert_eq!(check_out.await.unwrap().unwrap().status(), StatusCode::OK);

        assert_eq!(
            statuses(&mut rx),
            vec![AttendanceStatus::Present, AttendanceStatus::CheckedOut]
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_validation_error() {
        let (app, _state) = test_app(roster());

        let missing_actor = app
            .clone()
            .oneshot(post_json(
                "/api/attendance/check-in",
                json!({"childId": "c1"}),
            ))
            .await
            .unwrap();
        assert_eq!(missing_actor.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(missing_actor).await["code"], "ValidationFailed");

        let not_json = Request::builder()
            .method("POST")
            .uri("/api/attendance/bulk")
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{childIds:"))
            .unwrap();
        let response = app.oneshot(not_json).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "ValidationFailed");
        assert!(body["message"].is_string());
    }
}
