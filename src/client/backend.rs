use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::ClientConfig;
use crate::models::Child;
use crate::services::transition::{Action, TransitionError};

#[derive(Error, Debug)]
pub enum BackendError {
    /// No response reached us: connection refused, reset, or timed out
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Request rejected: {0}")]
    Rejected(TransitionError),

    /// The server refused the request body itself
    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Unexpected backend response: {status} - {message}")]
    Unexpected { status: StatusCode, message: String },
}

/// What the reconciliation layer needs from the authoritative service
#[async_trait]
pub trait AttendanceBackend: Send + Sync {
    async fn list(&self, classroom_id: Option<&str>) -> Result<Vec<Child>, BackendError>;

    async fn transition(
        &self,
        child_id: &str,
        action: Action,
        actor_id: &str,
    ) -> Result<Child, BackendError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransitionBody<'a> {
    child_id: &'a str,
    actor_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// REST client for the attendance API
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_token: config
                .api_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Unreachable(format!("Invalid backend URL: {}", e)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn error_from(response: reqwest::Response) -> BackendError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Option<ErrorBody> = serde_json::from_str(&text).ok();

        if let Some(reason) = body
            .as_ref()
            .and_then(|b| b.code.as_deref())
            .and_then(TransitionError::from_code)
        {
            return BackendError::Rejected(reason);
        }

        let invalid = body
            .as_ref()
            .and_then(|b| b.code.as_deref())
            .is_some_and(|code| code == "ValidationFailed");
        let message = body.and_then(|b| b.message).unwrap_or(text);
        if invalid {
            return BackendError::Invalid(message);
        }

        match status {
            StatusCode::NOT_FOUND => BackendError::Rejected(TransitionError::NotFound),
            _ => BackendError::Unexpected { status, message },
        }
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    BackendError::Unreachable(err.to_string())
}

#[async_trait]
impl AttendanceBackend for HttpBackend {
    async fn list(&self, classroom_id: Option<&str>) -> Result<Vec<Child>, BackendError> {
        let mut url = self.endpoint("api/children")?;
        if let Some(classroom_id) = classroom_id {
            url.query_pairs_mut().append_pair("classroom", classroom_id);
        }

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let status = response.status();
        response
            .json::<Vec<Child>>()
            .await
            .map_err(|e| BackendError::Unexpected {
                status,
                message: format!("Failed to parse roster: {}", e),
            })
    }

    async fn transition(
        &self,
        child_id: &str,
        action: Action,
        actor_id: &str,
    ) -> Result<Child, BackendError> {
        let url = self.endpoint(&format!("api/attendance/{}", action.path()))?;

        let response = self
            .authorize(self.client.post(url))
            .json(&TransitionBody { child_id, actor_id })
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let status = response.status();
        response
            .json::<Child>()
            .await
            .map_err(|e| BackendError::Unexpected {
                status,
                message: format!("Failed to parse child: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttendanceStatus;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer, timeout: Duration) -> HttpBackend {
        let mut config = ClientConfig::new(Url::parse(&server.uri()).unwrap(), "teacher-1");
        config.api_token = Some(secrecy::Secret::new("s3cret".to_string()));
        config.request_timeout = timeout;
        HttpBackend::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_list_sends_filter_and_token() {
        let server = MockServer::start().await;
        let child = Child::enrolled("c1", "Emma", "toddlers");
        Mock::given(method("GET"))
            .and(path("/api/children"))
            .and(query_param("classroom", "toddlers"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![child.clone()]))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_secs(2));
        let children = backend.list(Some("toddlers")).await.unwrap();

        assert_eq!(children, vec![child]);
    }

    #[tokio::test]
    async fn test_transition_success() {
        let server = MockServer::start().await;
        let child = Child::enrolled("c1", "Emma", "toddlers").with_status(AttendanceStatus::Present);
        Mock::given(method("POST"))
            .and(path("/api/attendance/check-in"))
            .and(body_json(serde_json::json!({"childId": "c1", "actorId": "teacher-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(&child))
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_secs(2));
        let updated = backend
            .transition("c1", Action::CheckIn, "teacher-1")
            .await
            .unwrap();

        assert_eq!(updated.status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_rejection_maps_reason_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/attendance/check-out"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "error": "Transition(InvalidTransition)",
                "message": "Transition not allowed from the current status",
                "code": "InvalidTransition",
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_secs(2));
        let err = backend
            .transition("c1", Action::CheckOut, "teacher-1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BackendError::Rejected(TransitionError::InvalidTransition)
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_not_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/children"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "Database",
                "message": "Database error",
                "code": "StorageUnavailable",
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_secs(2));
        let err = backend.list(None).await.unwrap_err();

        assert!(matches!(
            err,
            BackendError::Unexpected { status, ref message }
                if status == StatusCode::INTERNAL_SERVER_ERROR && message == "Database error"
        ));
    }

    #[tokio::test]
    async fn test_slow_response_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/children"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(Vec::<Child>::new())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_millis(50));
        let err = backend.list(None).await.unwrap_err();

        assert!(matches!(err, BackendError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_validation_failure_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/attendance/check-in"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "Validation(\"actorId is required\")",
                "message": "actorId is required",
                "code": "ValidationFailed",
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server, Duration::from_secs(2));
        let err = backend
            .transition("c1", Action::CheckIn, "")
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Invalid(ref message) if message == "actorId is required"));
    }
}
