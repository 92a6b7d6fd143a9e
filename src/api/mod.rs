// API module - HTTP and websocket endpoints

pub mod attendance;
pub mod children;
pub mod health;
pub mod middleware;
pub mod realtime;
pub mod state;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use state::AppState;

/// Builds the full application router.
///
/// Everything under `/api` and `/ws` requires the bearer token; `/health`
/// stays open for probes.
pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    let protected = Router::new()
        .merge(children::router())
        .merge(attendance::router())
        .merge(realtime::router())
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_bearer,
        ));

    Router::new()
        .merge(health::router())
        .merge(protected)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        body::Body,
        http::{header, Request},
        Router,
    };
    use secrecy::Secret;
    use std::sync::Arc;

    use super::{app, AppState};
    use crate::models::Child;
    use crate::services::relay::Relay;
    use crate::services::roster::{MemoryRoster, RosterStore};

    pub const TOKEN: &str = "test-token";

    pub fn test_app(children: Vec<Child>) -> (Router, AppState) {
        test_app_with_store(Arc::new(MemoryRoster::new(children)))
    }

    pub fn test_app_with_store(store: Arc<dyn RosterStore>) -> (Router, AppState) {
        let state = AppState::new(store, Relay::default(), Secret::new(TOKEN.to_string()));
        (app(state.clone(), &[]), state)
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .body(Body::empty())
            .unwrap()
    }

    pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
