use axum::{extract::{Query, State}, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::midwares::app_state::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
  #[serde(default)]
  pub q: String,
}

/// GET /api/search. An empty query switches to browse mode, returning the
/// head of the catalog instead of matches.
pub async fn search(
  State(state): State<AppState>,
  Query(params): Query<SearchParams>,
) -> Result<Json<Value>, AppError> {
  let query = params.q.trim();
  if query.is_empty() {
    return Ok(Json(state.catalog.browse().await));
  }

  let results = state.catalog.search(query).await;
  info!(query, hits = results.len(), "instrument search");
  Ok(Json(json!({
    "data": results,
    "query": query,
    "total": results.len(),
    "source": state.catalog.source().await.as_str(),
    "metadata": state.catalog.metadata().await,
  })))
}

/// GET /api/instruments/status, catalog load diagnostics.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
  Json(state.catalog.status().await)
}

/// POST /api/instruments/reload-json. A missing or invalid file is a 404,
/// matching what the status endpoint will then report.
pub async fn reload(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
  match state.catalog.reload().await {
    Ok(count) => Ok(Json(json!({
      "success": true,
      "message": "JSON instruments reloaded successfully",
      "count": count,
      "metadata": state.catalog.metadata().await,
      "source": state.catalog.source().await.as_str(),
    }))),
    Err(err) => Err(AppError::NotFound(err)),
  }
}
