use std::env;

/// Process configuration, read once at startup. Broker credentials may be
/// absent; the endpoints that need them answer 400 until they are set.
#[derive(Debug, Clone)]
pub struct Settings {
  pub api_key: String,
  pub api_secret: String,
  pub port: u16,
  pub frontend_origins: Vec<String>,
  pub instruments_file: String,
  pub secure_cookies: bool,
}

impl Settings {
  pub fn from_env() -> Self {
    let api_key = env::var("KITE_API_KEY").unwrap_or_default();
    let api_secret = env::var("KITE_API_SECRET").unwrap_or_default();
    let port = env::var("PORT")
      .ok()
      .and_then(|raw| raw.parse().ok())
      .unwrap_or(3000);
    let frontend_origins = env::var("FRONTEND_ORIGINS")
      .map(|raw| {
        raw
          .split(',')
          .map(|origin| origin.trim().to_string())
          .filter(|origin| !origin.is_empty())
          .collect()
      })
      .unwrap_or_else(|_| {
        vec![
          "http://localhost:8080".to_string(),
          "http://localhost:3000".to_string(),
        ]
      });
    let instruments_file =
      env::var("INSTRUMENTS_FILE").unwrap_or_else(|_| "data/instruments.json".to_string());
    let secure_cookies = env::var("SECURE_COOKIES")
      .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
      .unwrap_or(false);

    Self {
      api_key,
      api_secret,
      port,
      frontend_origins,
      instruments_file,
      secure_cookies,
    }
  }

  pub fn broker_configured(&self) -> bool {
    !self.api_key.is_empty() && !self.api_secret.is_empty()
  }

  /// Key prefix for health and index payloads, never the full value.
  pub fn masked_api_key(&self) -> String {
    if self.api_key.is_empty() {
      "Not configured".to_string()
    } else {
      let prefix: String = self.api_key.chars().take(8).collect();
      format!("{prefix}...")
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn settings_with_key(api_key: &str) -> Settings {
    Settings {
      api_key: api_key.to_string(),
      api_secret: String::new(),
      port: 3000,
      frontend_origins: vec![],
      instruments_file: String::new(),
      secure_cookies: false,
    }
  }

  #[test]
  fn masked_key_keeps_an_eight_char_prefix() {
    let settings = settings_with_key("2uvuc0xnk4tn8nrg");
    assert_eq!(settings.masked_api_key(), "2uvuc0xn...");
  }

  #[test]
  fn masked_key_handles_short_and_missing_keys() {
    assert_eq!(settings_with_key("abc").masked_api_key(), "abc...");
    assert_eq!(settings_with_key("").masked_api_key(), "Not configured");
  }

  #[test]
  fn broker_configured_needs_both_halves() {
    let mut settings = settings_with_key("key");
    assert!(!settings.broker_configured());
    settings.api_secret = "secret".to_string();
    assert!(settings.broker_configured());
  }
}
