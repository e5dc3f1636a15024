use std::{collections::HashMap, time::Duration};

use reqwest::{header::AUTHORIZATION, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::types::{KiteEnvelope, RawQuote, TokenExchange};
use crate::midwares::app_state::AppError;

pub const KITE_BASE_URL: &str = "https://api.kite.trade";
pub const KITE_LOGIN_URL: &str = "https://kite.trade/connect/login";

const KITE_VERSION_HEADER: &str = "X-Kite-Version";
const KITE_VERSION: &str = "3";

// Kite answers quote lookups well under these; a hung upstream call should
// not pin a poller for longer.
const QUOTE_TIMEOUT: Duration = Duration::from_secs(10);
const LTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin client over the Kite Connect REST API. Classification contract:
/// upstream 401 becomes [`AppError::Auth`], 429 becomes
/// [`AppError::RateLimited`], everything else non-2xx becomes
/// [`AppError::Upstream`] with the broker body kept for diagnosis. No
/// retries happen here; pollers simply try again on their own timers.
#[derive(Debug, Clone)]
pub struct KiteGateway {
  http: Client,
  base_url: String,
  api_key: String,
}

impl KiteGateway {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self::with_base_url(api_key, KITE_BASE_URL)
  }

  pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
    let base_url: String = base_url.into();
    Self {
      http: Client::new(),
      base_url: base_url.trim_end_matches('/').to_string(),
      api_key: api_key.into(),
    }
  }

  pub fn login_url(&self) -> String {
    format!("{KITE_LOGIN_URL}?api_key={}", self.api_key)
  }

  fn authorization(&self, access_token: &str) -> String {
    format!("token {}:{}", self.api_key, access_token)
  }

  /// POST /session/token. Broker rejections (bad request token, checksum
  /// mismatch) surface as [`AppError::Auth`] carrying the broker's own
  /// message verbatim.
  pub async fn exchange_token(
    &self,
    request_token: &str,
    checksum: &str,
  ) -> Result<TokenExchange, AppError> {
    let form = [
      ("api_key", self.api_key.trim()),
      ("request_token", request_token.trim()),
      ("checksum", checksum),
    ];
    let response = self
      .http
      .post(format!("{}/session/token", self.base_url))
      .header(KITE_VERSION_HEADER, KITE_VERSION)
      .form(&form)
      .timeout(QUOTE_TIMEOUT)
      .send()
      .await
      .map_err(transport_error)?;

    let status = response.status();
    let body: Value = response
      .json()
      .await
      .map_err(|err| AppError::upstream(format!("Unreadable token exchange response: {err}")))?;

    if !status.is_success() || body["status"] == "error" {
      let message = body["message"]
        .as_str()
        .unwrap_or("Session exchange rejected by Kite")
        .to_string();
      warn!(%status, %message, "kite token exchange failed");
      return Err(AppError::Auth(message));
    }

    let envelope: KiteEnvelope<TokenExchange> = serde_json::from_value(body)
      .map_err(|err| AppError::upstream(format!("Unexpected token exchange payload: {err}")))?;
    envelope
      .data
      .ok_or_else(|| AppError::upstream("Token exchange response carried no data"))
  }

  pub async fn quote(
    &self,
    access_token: &str,
    instruments: &[String],
  ) -> Result<HashMap<String, RawQuote>, AppError> {
    self
      .market_get("/quote", QUOTE_TIMEOUT, access_token, instruments)
      .await
  }

  pub async fn ohlc(
    &self,
    access_token: &str,
    instruments: &[String],
  ) -> Result<HashMap<String, RawQuote>, AppError> {
    self
      .market_get("/quote/ohlc", QUOTE_TIMEOUT, access_token, instruments)
      .await
  }

  /// GET /quote/ltp, returned as the untouched broker envelope. The LTP
  /// payload is already as small as it gets, so no projection happens.
  pub async fn ltp(&self, access_token: &str, instruments: &[String]) -> Result<Value, AppError> {
    let response = self
      .market_request("/quote/ltp", LTP_TIMEOUT, access_token, instruments)
      .send()
      .await
      .map_err(transport_error)?;
    classified_body(response).await
  }

  /// GET /user/profile, unwrapped to the profile payload.
  pub async fn profile(&self, access_token: &str) -> Result<Value, AppError> {
    self.user_get("/user/profile", access_token).await
  }

  /// GET /user/margins, unwrapped to the margins payload.
  pub async fn margins(&self, access_token: &str) -> Result<Value, AppError> {
    self.user_get("/user/margins", access_token).await
  }

  async fn market_get<T: DeserializeOwned>(
    &self,
    path: &str,
    timeout: Duration,
    access_token: &str,
    instruments: &[String],
  ) -> Result<T, AppError> {
    debug!(path, count = instruments.len(), "kite market request");
    let response = self
      .market_request(path, timeout, access_token, instruments)
      .send()
      .await
      .map_err(transport_error)?;
    let body = classified_body(response).await?;
    let envelope: KiteEnvelope<T> = serde_json::from_value(body)
      .map_err(|err| AppError::upstream(format!("Unexpected Kite payload for {path}: {err}")))?;
    if envelope.status != "success" {
      warn!(path, error_type = ?envelope.error_type, "kite reported an error envelope");
      return Err(AppError::upstream(
        envelope
          .message
          .unwrap_or_else(|| format!("Kite request for {path} failed")),
      ));
    }
    envelope
      .data
      .ok_or_else(|| AppError::upstream(format!("Kite returned no data for {path}")))
  }

  fn market_request(
    &self,
    path: &str,
    timeout: Duration,
    access_token: &str,
    instruments: &[String],
  ) -> RequestBuilder {
    let query: Vec<(&str, &str)> = instruments.iter().map(|i| ("i", i.as_str())).collect();
    self
      .http
      .get(format!("{}{}", self.base_url, path))
      .header(KITE_VERSION_HEADER, KITE_VERSION)
      .header(AUTHORIZATION, self.authorization(access_token))
      .query(&query)
      .timeout(timeout)
  }

  async fn user_get(&self, path: &str, access_token: &str) -> Result<Value, AppError> {
    let response = self
      .http
      .get(format!("{}{}", self.base_url, path))
      .header(KITE_VERSION_HEADER, KITE_VERSION)
      .header(AUTHORIZATION, self.authorization(access_token))
      .timeout(QUOTE_TIMEOUT)
      .send()
      .await
      .map_err(transport_error)?;
    let body = classified_body(response).await?;
    Ok(body.get("data").cloned().unwrap_or(Value::Null))
  }
}

async fn classified_body(response: Response) -> Result<Value, AppError> {
  let status = response.status();
  if status == StatusCode::UNAUTHORIZED {
    return Err(AppError::Auth("Invalid or expired access token".to_string()));
  }
  if status == StatusCode::TOO_MANY_REQUESTS {
    return Err(AppError::RateLimited(
      "Rate limit exceeded. Please try again later.".to_string(),
    ));
  }

  let body: Value = response
    .json()
    .await
    .map_err(|err| AppError::upstream(format!("Unreadable Kite response: {err}")))?;

  if !status.is_success() {
    let message = body["message"]
      .as_str()
      .unwrap_or("Kite API request failed")
      .to_string();
    warn!(%status, %message, "kite request failed");
    return Err(AppError::Upstream {
      message,
      details: Some(body),
    });
  }

  Ok(body)
}

fn transport_error(err: reqwest::Error) -> AppError {
  if err.is_timeout() {
    AppError::upstream("Kite API request timed out")
  } else {
    AppError::upstream(format!("Kite API request failed: {err}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn base_url_is_trimmed() {
    let gateway = KiteGateway::with_base_url("key", "http://localhost:9999/");
    assert_eq!(gateway.base_url, "http://localhost:9999");
  }

  #[test]
  fn login_url_carries_the_api_key() {
    let gateway = KiteGateway::new("2uvuc0xnk4tn8nrg");
    assert_eq!(
      gateway.login_url(),
      "https://kite.trade/connect/login?api_key=2uvuc0xnk4tn8nrg"
    );
  }

  #[test]
  fn authorization_header_joins_key_and_token() {
    let gateway = KiteGateway::new("apikey");
    assert_eq!(gateway.authorization("access"), "token apikey:access");
  }
}
