use sha2::{Digest, Sha256};

/// Kite signs the token exchange with sha256 over the exact concatenation
/// api_key + request_token + api_secret. Any deviation and the broker
/// rejects the exchange.
pub fn generate_checksum(api_key: &str, request_token: &str, api_secret: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(api_key.as_bytes());
  hasher.update(request_token.as_bytes());
  hasher.update(api_secret.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn checksum_matches_known_digest() {
    assert_eq!(
      generate_checksum("kitefront", "abc123", "xyzshhh"),
      "aadf655a19364ccc0f04a2481472d5c33c177cef5eae0621ed9ad0611025750d"
    );
    assert_eq!(
      generate_checksum("api_key", "req_token", "api_secret"),
      "221fa783b06a5f27cb855057bf71703327df97b773b9e4597f6745eb1bf788a9"
    );
  }

  #[test]
  fn checksum_is_deterministic() {
    let first = generate_checksum("key", "token", "secret");
    let second = generate_checksum("key", "token", "secret");
    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
  }

  #[test]
  fn single_character_change_flips_the_digest() {
    assert_ne!(
      generate_checksum("kitefront", "abc123", "xyzshhh"),
      generate_checksum("kitefront", "abc123", "xyZshhh")
    );
  }

  #[test]
  fn only_the_concatenation_matters() {
    assert_ne!(
      generate_checksum("a", "b", "c"),
      generate_checksum("c", "b", "a")
    );
    // the broker hashes the joined string, so boundaries are invisible
    assert_eq!(
      generate_checksum("ab", "c", ""),
      generate_checksum("a", "bc", "")
    );
  }
}
