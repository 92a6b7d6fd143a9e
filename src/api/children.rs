use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::state::AppState;
use crate::error::Result;
use crate::models::Child;

#[derive(Debug, Deserialize)]
pub struct ListChildrenQuery {
    pub classroom: Option<String>,
}

/// List the roster (JSON API)
async fn list_children(
    State(state): State<AppState>,
    Query(params): Query<ListChildrenQuery>,
) -> Result<Json<Vec<Child>>> {
    let classroom = params.classroom.as_deref().filter(|c| !c.is_empty());
    let children = state.store().list(classroom).await?;

    Ok(Json(children))
}

/// Get one child (JSON API)
async fn get_child(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Child>> {
    let child = state.store().get(&id).await?;

    Ok(Json(child))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/children", get(list_children))
        .route("/api/children/:id", get(get_child))
}
