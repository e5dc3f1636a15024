use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::midwares::app_state::AppState;

/// GET /api, the human-readable endpoint index.
pub async fn index(State(state): State<AppState>) -> Json<Value> {
  Json(json!({
    "message": "Zerodha Trading API Server",
    "status": "Running",
    "timestamp": Utc::now().to_rfc3339(),
    "endpoints": {
      "auth": {
        "GET /api/auth/login-url": "Get Zerodha login URL",
        "GET /api/zerodha/callback": "OAuth callback handler (automatic token capture)",
        "POST /api/auth/session": "Generate session with request token (manual flow)",
        "GET /api/auth/status": "Check authentication status",
        "POST /api/auth/logout": "Logout and clear session",
      },
      "market": {
        "POST /api/quote": "Get live quotes for instruments",
        "POST /api/ohlc": "Get OHLC data for instruments",
        "POST /api/ltp": "Get Last Traded Price for instruments",
        "GET /api/search": "Search instruments by name or symbol",
      },
      "instruments": {
        "GET /api/instruments/status": "Get instruments cache status",
        "POST /api/instruments/reload-json": "Reload instruments from JSON file",
      },
      "user": {
        "GET /api/profile": "Get user profile",
        "GET /api/margins": "Get user margins",
      },
      "system": {
        "GET /api/health": "Health check endpoint",
      },
    },
    "config": {
      "apiKey": state.settings.masked_api_key(),
      "port": state.settings.port,
      "instrumentsCount": state.catalog.len().await,
      "dataSource": state.catalog.source().await.as_str(),
    },
  }))
}

/// GET /api/health.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
  Json(json!({
    "status": "OK",
    "timestamp": Utc::now().to_rfc3339(),
    "apiKey": state.settings.masked_api_key(),
    "apiSecret": if state.settings.api_secret.is_empty() { "Not configured" } else { "Configured" },
    "activeSessions": state.sessions.active_count().await,
    "server": "Zerodha Trading API",
    "instrumentsCount": state.catalog.len().await,
    "dataSource": state.catalog.source().await.as_str(),
  }))
}

/// JSON 404 for any unknown route, listing what does exist.
pub async fn not_found() -> impl IntoResponse {
  (
    StatusCode::NOT_FOUND,
    Json(json!({
      "error": "Route not found",
      "code": 404,
      "availableEndpoints": [
        "GET /api",
        "GET /api/health",
        "GET /api/auth/login-url",
        "POST /api/auth/session",
        "GET /api/auth/status",
        "POST /api/auth/logout",
        "GET /api/profile",
        "GET /api/margins",
        "POST /api/quote",
        "POST /api/ohlc",
        "POST /api/ltp",
        "GET /api/search?q=searchterm",
        "GET /api/instruments/status",
        "POST /api/instruments/reload-json",
        "GET /api/zerodha/callback",
      ],
    })),
  )
}
