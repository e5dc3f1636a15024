use axum::{
  extract::{Query, State},
  http::{header, HeaderMap, StatusCode},
  response::{Html, IntoResponse, Response},
  Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::{
  kite::checksum::generate_checksum,
  midwares::app_state::{AppError, AppState},
  session::store::{clear_session_cookie, session_cookie, Session, SessionEnvelope},
};

/// Request token that short-circuits the broker exchange with a mock
/// session, for exercising the flow without Kite credentials.
pub const TEST_REQUEST_TOKEN: &str = "test123";

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
  #[serde(default)]
  pub request_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
  #[serde(default)]
  pub request_token: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
}

pub async fn login_url(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
  if state.settings.api_key.is_empty() {
    return Err(AppError::Validation("Zerodha API key not configured".to_string()));
  }
  Ok(Json(json!({
    "loginUrl": state.gateway.login_url(),
    "apiKey": state.settings.api_key,
    "message": "Visit this URL to authenticate with Zerodha",
  })))
}

/// Exchanges a request token for a session and stores it. The `test123`
/// literal never reaches the broker.
async fn establish_session(state: &AppState, request_token: &str) -> Result<(String, Session), AppError> {
  let session = if request_token == TEST_REQUEST_TOKEN {
    info!("test token detected, issuing mock session");
    Session::mock()
  } else {
    let checksum = generate_checksum(
      &state.settings.api_key,
      request_token,
      &state.settings.api_secret,
    );
    let exchange = state.gateway.exchange_token(request_token, &checksum).await?;
    info!(user_id = %exchange.user_id, "kite session established");
    Session::issued_now(exchange.access_token.clone(), exchange.profile())
  };
  let session_id = state.sessions.insert(session.clone()).await;
  Ok((session_id, session))
}

fn session_set_cookie(
  state: &AppState,
  session_id: &str,
  session: &Session,
) -> Result<HeaderMap, AppError> {
  let envelope = SessionEnvelope {
    session_id: session_id.to_string(),
    access_token: session.access_token.clone(),
    user: session.user.clone(),
    expires_at: session.expires_at,
  };
  let cookie = session_cookie(&envelope, state.settings.secure_cookies)?;
  let mut headers = HeaderMap::new();
  headers.insert(
    header::SET_COOKIE,
    cookie
      .parse()
      .map_err(|_| AppError::upstream("Failed to encode session cookie"))?,
  );
  Ok(headers)
}

/// POST /api/auth/session, the manual exchange flow.
pub async fn session(
  State(state): State<AppState>,
  Json(request): Json<SessionRequest>,
) -> Result<(HeaderMap, Json<Value>), AppError> {
  let request_token = request.request_token.trim();
  if request_token.is_empty() {
    return Err(AppError::Validation("Request token is required".to_string()));
  }
  if request_token != TEST_REQUEST_TOKEN && !state.settings.broker_configured() {
    return Err(AppError::Validation(
      "Zerodha API credentials not configured".to_string(),
    ));
  }

  let (session_id, session) = establish_session(&state, request_token).await?;
  let headers = session_set_cookie(&state, &session_id, &session)?;
  let message = if request_token == TEST_REQUEST_TOKEN {
    "Test authentication successful"
  } else {
    "Authentication successful"
  };
  Ok((
    headers,
    Json(json!({
      "success": true,
      "access_token": session.access_token,
      "user": session.user,
      "message": message,
    })),
  ))
}

/// GET /api/zerodha/callback, the OAuth redirect target. Responds with an
/// HTML page that reports the outcome to the opener window and closes the
/// popup.
pub async fn callback(
  State(state): State<AppState>,
  Query(params): Query<CallbackParams>,
) -> Response {
  let request_token = match params.request_token.as_deref() {
    Some(token) if !token.trim().is_empty() => token.trim().to_string(),
    _ => {
      return (
        StatusCode::BAD_REQUEST,
        Html(callback_failure_page("Missing request token")),
      )
        .into_response()
    }
  };
  if let Some(status) = params.status.as_deref() {
    if status != "success" {
      return Html(callback_failure_page("Login was cancelled")).into_response();
    }
  }

  match establish_session(&state, &request_token).await {
    Ok((session_id, session)) => match session_set_cookie(&state, &session_id, &session) {
      Ok(headers) => (headers, Html(callback_success_page())).into_response(),
      Err(err) => Html(callback_failure_page(err.message())).into_response(),
    },
    Err(err) => Html(callback_failure_page(err.message())).into_response(),
  }
}

fn callback_success_page() -> String {
  r#"<html>
  <script>
    window.opener.postMessage('zerodha_login_success', '*');
    setTimeout(() => window.close(), 1000);
  </script>
  <body>
    <div style="text-align:center;padding:20px;">
      <h2>Authentication Successful!</h2>
      <p>You may now close this window.</p>
    </div>
  </body>
</html>"#
    .to_string()
}

fn callback_failure_page(message: &str) -> String {
  // the message lands inside a JS string literal and the page body
  let safe = message.replace(['\'', '"', '<', '>', '\\', '\n'], " ");
  format!(
    r#"<html>
  <script>
    window.opener.postMessage('zerodha_login_failed:{safe}', '*');
  </script>
  <body>
    <div style="text-align:center;padding:20px;color:red;">
      <h2>Authentication Failed</h2>
      <p>{safe}</p>
    </div>
  </body>
</html>"#
  )
}

/// GET /api/auth/status. Never errors; an unreadable cookie is just
/// unauthenticated.
pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
  match state.sessions.resolve(&headers).await {
    Some(resolved) => Json(json!({
      "authenticated": true,
      "access_token": resolved.access_token,
      "user": resolved.user,
    })),
    None => Json(json!({ "authenticated": false })),
  }
}

/// POST /api/auth/logout. Idempotent; also instructs the client to drop
/// its cookie so the embedded-token fallback dies with the session.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> (HeaderMap, Json<Value>) {
  let removed = state.sessions.logout(&headers).await;
  if removed {
    info!("session logged out");
  }
  let mut response_headers = HeaderMap::new();
  if let Ok(value) = clear_session_cookie().parse() {
    response_headers.insert(header::SET_COOKIE, value);
  }
  (
    response_headers,
    Json(json!({ "success": true, "message": "Logged out successfully" })),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    cache::QuoteCache, config::Settings, instruments::catalog::InstrumentCatalog,
    kite::gateway::KiteGateway, session::store::SessionStore,
  };
  use std::{sync::Arc, time::Duration};

  // gateway pointed at a closed port, so any accidental broker call fails
  // loudly instead of passing the test
  async fn test_state() -> AppState {
    AppState {
      settings: Arc::new(Settings {
        api_key: "testkey".to_string(),
        api_secret: "testsecret".to_string(),
        port: 0,
        frontend_origins: vec![],
        instruments_file: "/nonexistent/instruments.json".to_string(),
        secure_cookies: false,
      }),
      sessions: SessionStore::new(),
      gateway: KiteGateway::with_base_url("testkey", "http://127.0.0.1:1"),
      quote_cache: QuoteCache::new(Duration::from_secs(30), 16),
      ohlc_cache: QuoteCache::new(Duration::from_secs(300), 16),
      catalog: InstrumentCatalog::load("/nonexistent/instruments.json").await,
    }
  }

  #[tokio::test]
  async fn test_token_issues_a_mock_session_without_the_broker() {
    let state = test_state().await;
    let (session_id, session) = establish_session(&state, TEST_REQUEST_TOKEN).await.unwrap();
    assert_eq!(session.user.user_id, "TEST123");
    assert_eq!(session.access_token, "test_access_token");
    assert!(state.sessions.get(&session_id).await.is_some());
  }

  #[tokio::test]
  async fn session_rejects_an_empty_request_token() {
    let state = test_state().await;
    let err = session(
      State(state),
      Json(SessionRequest { request_token: "  ".to_string() }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn session_sets_the_cookie_and_reports_the_mock_user() {
    let state = test_state().await;
    let (headers, Json(body)) = session(
      State(state.clone()),
      Json(SessionRequest { request_token: TEST_REQUEST_TOKEN.to_string() }),
    )
    .await
    .unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["user_id"], "TEST123");
    let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with("zerodha_session="));
    assert_eq!(state.sessions.active_count().await, 1);
  }

  #[tokio::test]
  async fn status_flips_with_the_session_lifecycle() {
    let state = test_state().await;
    let Json(body) = status(State(state.clone()), HeaderMap::new()).await;
    assert_eq!(body["authenticated"], false);

    let (headers, _) = session(
      State(state.clone()),
      Json(SessionRequest { request_token: TEST_REQUEST_TOKEN.to_string() }),
    )
    .await
    .unwrap();
    // replay the Set-Cookie value as a request Cookie header
    let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    let pair = cookie.split(';').next().unwrap();
    let mut request_headers = HeaderMap::new();
    request_headers.insert(header::COOKIE, pair.parse().unwrap());

    let Json(body) = status(State(state.clone()), request_headers.clone()).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["access_token"], "test_access_token");

    let (_, Json(body)) = logout(State(state.clone()), request_headers).await;
    assert_eq!(body["success"], true);
    assert_eq!(state.sessions.active_count().await, 0);
  }

  #[test]
  fn failure_page_neutralizes_markup_in_the_message() {
    let page = callback_failure_page("bad <script>'token'</script>");
    assert!(!page.contains("<script>'"));
    assert!(page.contains("zerodha_login_failed:"));
  }
}
