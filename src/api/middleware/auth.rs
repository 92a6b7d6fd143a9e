use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;

use crate::api::state::AppState;
use crate::error::AppError;

/// Middleware that requires `Authorization: Bearer <API_TOKEN>`.
///
/// Identity and roles live outside this service; this only keeps anonymous
/// callers out.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if token == state.api_token.expose_secret().as_str() => {
            Ok(next.run(request).await)
        }
        _ => {
            tracing::debug!(path = %request.uri().path(), "Rejected request without valid bearer token");
            Err(AppError::Unauthorized)
        }
    }
}
