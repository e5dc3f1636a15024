use std::sync::Arc;

use axum::{
  http::StatusCode, response::{IntoResponse, Response}, Json
};
use serde_json::{json, Value};

use crate::{
  cache::QuoteCache, config::Settings, instruments::catalog::InstrumentCatalog,
  kite::gateway::KiteGateway, session::store::SessionStore,
};

/// Shared handles cloned into every request handler.
#[derive(Clone)]
pub struct AppState {
  pub settings: Arc<Settings>,
  pub sessions: SessionStore,
  pub gateway: KiteGateway,
  pub quote_cache: QuoteCache,
  pub ohlc_cache: QuoteCache,
  pub catalog: InstrumentCatalog,
}

#[derive(Debug)]
pub enum AppError {
  Validation(String),
  Auth(String),
  RateLimited(String),
  Upstream { message: String, details: Option<Value> },
  NotFound(String),
}

impl AppError {
  pub fn upstream(message: impl Into<String>) -> Self {
    Self::Upstream { message: message.into(), details: None }
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      Self::Validation(_) => StatusCode::BAD_REQUEST,
      Self::Auth(_) => StatusCode::UNAUTHORIZED,
      Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
      Self::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
      Self::NotFound(_) => StatusCode::NOT_FOUND,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      Self::Validation(msg)
      | Self::Auth(msg)
      | Self::RateLimited(msg)
      | Self::NotFound(msg) => msg,
      Self::Upstream { message, .. } => message,
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> axum::response::Response {
    let status = self.status_code();
    let (message, details) = match self {
      Self::Upstream { message, details } => (message, details),
      Self::Validation(msg)
      | Self::Auth(msg)
      | Self::RateLimited(msg)
      | Self::NotFound(msg) => (msg, None),
    };

    let mut body = json!({"error": message, "code": status.as_u16()});
    if let Some(details) = details {
      body["details"] = details;
    }

    (status, Json(body)).into_response()
  }
}

impl From<serde_json::Error> for AppError {
  fn from(err: serde_json::Error) -> Self {
    Self::upstream(format!("Failed to encode response: {err}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_codes_follow_the_taxonomy() {
    assert_eq!(AppError::Validation("bad".into()).status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(AppError::Auth("no token".into()).status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(AppError::RateLimited("slow down".into()).status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(AppError::upstream("boom").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(AppError::NotFound("nope".into()).status_code(), StatusCode::NOT_FOUND);
  }

  #[test]
  fn message_survives_the_details_wrapper() {
    let err = AppError::Upstream {
      message: "kite failed".into(),
      details: Some(json!({"status": "error"})),
    };
    assert_eq!(err.message(), "kite failed");
  }
}
