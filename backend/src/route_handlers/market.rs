use std::collections::HashMap;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
  cache::canonical_key,
  kite::types::{OhlcView, QuoteView, RawQuote},
  midwares::app_state::{AppError, AppState},
  session::store::ResolvedSession,
};

/// Kite's own per-request batch limit.
pub const MAX_INSTRUMENTS: usize = 200;

#[derive(Debug, Deserialize)]
pub struct InstrumentsRequest {
  #[serde(default)]
  pub instruments: Option<Vec<String>>,
}

/// Drops empty entries, then enforces the non-empty and batch-cap rules.
/// Runs before any broker call.
pub fn validate_instruments(instruments: Option<Vec<String>>) -> Result<Vec<String>, AppError> {
  let instruments =
    instruments.ok_or_else(|| AppError::Validation("Instruments array is required".to_string()))?;
  let valid: Vec<String> = instruments
    .into_iter()
    .map(|i| i.trim().to_string())
    .filter(|i| !i.is_empty())
    .collect();
  if valid.is_empty() {
    return Err(AppError::Validation(
      "Instruments must be a non-empty array".to_string(),
    ));
  }
  if valid.len() > MAX_INSTRUMENTS {
    return Err(AppError::Validation(format!(
      "Maximum {MAX_INSTRUMENTS} instruments allowed per request"
    )));
  }
  Ok(valid)
}

async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<ResolvedSession, AppError> {
  state
    .sessions
    .resolve(headers)
    .await
    .ok_or_else(|| AppError::Auth("Not authenticated. Please login first.".to_string()))
}

/// POST /api/quote. Cache-check, fetch, project, populate, in that order;
/// the `cached` flag tells the poller which path it hit.
pub async fn quote(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(request): Json<InstrumentsRequest>,
) -> Result<Json<Value>, AppError> {
  let resolved = require_session(&state, &headers).await?;
  let instruments = validate_instruments(request.instruments)?;

  let key = canonical_key(&instruments);
  if let Some(cached) = state.quote_cache.get(&key).await {
    debug!(%key, "quote served from cache");
    return Ok(Json(json!({ "success": true, "data": cached, "cached": true })));
  }

  let raw = state.gateway.quote(&resolved.access_token, &instruments).await?;
  let data = project_quotes(&raw)?;
  let count = raw.len();
  state.quote_cache.put(key, data.clone()).await;
  Ok(Json(json!({ "success": true, "data": data, "count": count, "cached": false })))
}

/// POST /api/ohlc, same orchestration with the slimmer projection and the
/// longer TTL cache.
pub async fn ohlc(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(request): Json<InstrumentsRequest>,
) -> Result<Json<Value>, AppError> {
  let resolved = require_session(&state, &headers).await?;
  let instruments = validate_instruments(request.instruments)?;

  let key = canonical_key(&instruments);
  if let Some(cached) = state.ohlc_cache.get(&key).await {
    debug!(%key, "ohlc served from cache");
    return Ok(Json(json!({ "success": true, "data": cached, "cached": true })));
  }

  let raw = state.gateway.ohlc(&resolved.access_token, &instruments).await?;
  let data = project_ohlc(&raw)?;
  let count = raw.len();
  state.ohlc_cache.put(key, data.clone()).await;
  Ok(Json(json!({ "success": true, "data": data, "count": count, "cached": false })))
}

/// POST /api/ltp. Uncached raw passthrough; the payload is tiny and the
/// poller hits this every few seconds anyway.
pub async fn ltp(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(request): Json<InstrumentsRequest>,
) -> Result<Json<Value>, AppError> {
  let resolved = require_session(&state, &headers).await?;
  let instruments = validate_instruments(request.instruments)?;
  let body = state.gateway.ltp(&resolved.access_token, &instruments).await?;
  Ok(Json(body))
}

/// GET /api/profile, authenticated broker passthrough.
pub async fn profile(
  State(state): State<AppState>,
  headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
  let resolved = require_session(&state, &headers).await?;
  let data = state.gateway.profile(&resolved.access_token).await?;
  Ok(Json(data))
}

/// GET /api/margins, authenticated broker passthrough.
pub async fn margins(
  State(state): State<AppState>,
  headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
  let resolved = require_session(&state, &headers).await?;
  let data = state.gateway.margins(&resolved.access_token).await?;
  Ok(Json(data))
}

fn project_quotes(raw: &HashMap<String, RawQuote>) -> Result<Value, AppError> {
  let projected: HashMap<&str, QuoteView> = raw
    .iter()
    .map(|(key, quote)| (key.as_str(), QuoteView::project(key, quote)))
    .collect();
  Ok(serde_json::to_value(projected)?)
}

fn project_ohlc(raw: &HashMap<String, RawQuote>) -> Result<Value, AppError> {
  let projected: HashMap<&str, OhlcView> = raw
    .iter()
    .map(|(key, quote)| (key.as_str(), OhlcView::project(key, quote)))
    .collect();
  Ok(serde_json::to_value(projected)?)
}
