use std::{collections::HashMap, sync::Arc};

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::kite::types::UserProfile;

pub const SESSION_COOKIE: &str = "zerodha_session";

// Local policy, not a broker fact: Kite invalidates tokens on its own
// schedule, this TTL only bounds how long the proxy keeps trusting one.
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// One authenticated broker identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
  pub access_token: String,
  pub user: UserProfile,
  pub expires_at: DateTime<Utc>,
}

impl Session {
  pub fn issued_now(access_token: String, user: UserProfile) -> Self {
    Self {
      access_token,
      user,
      expires_at: Utc::now() + Duration::seconds(SESSION_TTL_SECS),
    }
  }

  /// Deterministic session for the `test123` request token. Never touches
  /// the broker.
  pub fn mock() -> Self {
    Self::issued_now(
      "test_access_token".to_string(),
      UserProfile {
        user_id: "TEST123".to_string(),
        user_name: "Test User".to_string(),
        user_shortname: "Test".to_string(),
        email: "test@example.com".to_string(),
        user_type: "individual".to_string(),
        broker: "ZERODHA".to_string(),
      },
    )
  }

  fn is_live(&self) -> bool {
    self.expires_at > Utc::now()
  }
}

/// Cookie payload. `session_id` names the server-side entry; the embedded
/// token is a fallback that survives a process restart, not a security
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnvelope {
  pub session_id: String,
  pub access_token: String,
  pub user: UserProfile,
  pub expires_at: DateTime<Utc>,
}

/// What a request handler gets back after token resolution.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
  pub access_token: String,
  pub user: UserProfile,
}

/// Sessions keyed by server-issued ids, so concurrent logins from different
/// browsers stay isolated.
#[derive(Clone)]
pub struct SessionStore {
  sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionStore {
  pub fn new() -> Self {
    Self {
      sessions: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Stores the session under a fresh id and returns that id.
  pub async fn insert(&self, session: Session) -> String {
    let session_id = Uuid::new_v4().to_string();
    let mut sessions = self.sessions.lock().await;
    sessions.insert(session_id.clone(), session);
    session_id
  }

  pub async fn get(&self, session_id: &str) -> Option<Session> {
    let sessions = self.sessions.lock().await;
    sessions
      .get(session_id)
      .filter(|session| session.is_live())
      .cloned()
  }

  pub async fn remove(&self, session_id: &str) -> bool {
    let mut sessions = self.sessions.lock().await;
    sessions.remove(session_id).is_some()
  }

  pub async fn active_count(&self) -> usize {
    let sessions = self.sessions.lock().await;
    sessions.values().filter(|session| session.is_live()).count()
  }

  /// Drops entries past their expiry; driven by the periodic sweep task.
  pub async fn purge_expired(&self) -> usize {
    let mut sessions = self.sessions.lock().await;
    let before = sessions.len();
    sessions.retain(|_, session| session.is_live());
    before - sessions.len()
  }

  /// Token resolution precedence: the live store entry named by the cookie,
  /// then the token embedded in the cookie while its stamped expiry is in
  /// the future. A replayed pre-logout cookie therefore still resolves via
  /// the second path; that fallback is what keeps sessions usable across a
  /// backend restart.
  pub async fn resolve(&self, headers: &HeaderMap) -> Option<ResolvedSession> {
    let envelope = read_session_cookie(headers)?;
    if let Some(session) = self.get(&envelope.session_id).await {
      debug!(session_id = %envelope.session_id, "session resolved from store");
      return Some(ResolvedSession {
        access_token: session.access_token,
        user: session.user,
      });
    }
    if envelope.expires_at > Utc::now() && !envelope.access_token.is_empty() {
      debug!("session resolved from cookie fallback");
      return Some(ResolvedSession {
        access_token: envelope.access_token,
        user: envelope.user,
      });
    }
    None
  }

  /// Removes the session named by the request's cookie. Idempotent.
  pub async fn logout(&self, headers: &HeaderMap) -> bool {
    match read_session_cookie(headers) {
      Some(envelope) => self.remove(&envelope.session_id).await,
      None => false,
    }
  }
}

impl Default for SessionStore {
  fn default() -> Self {
    Self::new()
  }
}

/// Set-Cookie value for a fresh session envelope.
pub fn session_cookie(envelope: &SessionEnvelope, secure: bool) -> Result<String, serde_json::Error> {
  let json = serde_json::to_string(envelope)?;
  let mut cookie = format!(
    "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Strict",
    SESSION_COOKIE,
    encode_cookie_value(&json),
    SESSION_TTL_SECS
  );
  if secure {
    cookie.push_str("; Secure");
  }
  Ok(cookie)
}

/// Set-Cookie value that makes the browser drop the session cookie.
pub fn clear_session_cookie() -> String {
  format!("{SESSION_COOKIE}=; Max-Age=0; Path=/; HttpOnly; SameSite=Strict")
}

/// Finds and decodes the session envelope in a Cookie header, if any.
/// Unparseable cookies count as absent.
pub fn read_session_cookie(headers: &HeaderMap) -> Option<SessionEnvelope> {
  let raw = headers.get(header::COOKIE)?.to_str().ok()?;
  let value = raw.split(';').find_map(|pair| {
    let (name, value) = pair.trim().split_once('=')?;
    (name == SESSION_COOKIE).then_some(value)
  })?;
  let decoded = decode_cookie_value(value)?;
  serde_json::from_str(&decoded).ok()
}

// The JSON envelope is full of characters RFC 6265 forbids in cookie
// values, so it travels percent-encoded.
fn encode_cookie_value(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  for byte in raw.bytes() {
    match byte {
      b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
        out.push(byte as char)
      }
      _ => out.push_str(&format!("%{byte:02X}")),
    }
  }
  out
}

fn decode_cookie_value(raw: &str) -> Option<String> {
  let bytes = raw.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' {
      let hex = bytes.get(i + 1..i + 3)?;
      let hex = std::str::from_utf8(hex).ok()?;
      out.push(u8::from_str_radix(hex, 16).ok()?);
      i += 3;
    } else {
      out.push(bytes[i]);
      i += 1;
    }
  }
  String::from_utf8(out).ok()
}
