use std::{
  collections::HashMap,
  sync::Arc,
  time::{Duration, Instant},
};

use futures::lock::Mutex;
use serde_json::Value;
use tracing::debug;

/// Sorted and comma-joined, so any permutation of the same instrument set
/// lands on the same cache entry.
pub fn canonical_key(instruments: &[String]) -> String {
  let mut sorted: Vec<&str> = instruments.iter().map(String::as_str).collect();
  sorted.sort_unstable();
  sorted.join(",")
}

#[derive(Debug)]
struct CacheEntry {
  payload: Value,
  stored_at: Instant,
}

impl CacheEntry {
  fn is_fresh(&self, ttl: Duration) -> bool {
    self.stored_at.elapsed() < ttl
  }
}

/// Short-TTL memoization for one market-data endpoint. Bounded: a full
/// cache first drops expired entries, then the oldest one, so varied
/// instrument-set queries cannot grow the map without limit.
#[derive(Clone)]
pub struct QuoteCache {
  entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
  ttl: Duration,
  capacity: usize,
}

impl QuoteCache {
  pub fn new(ttl: Duration, capacity: usize) -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      ttl,
      capacity,
    }
  }

  /// A hit needs both presence and freshness; stale entries read as misses
  /// and are left for eviction to collect.
  pub async fn get(&self, key: &str) -> Option<Value> {
    let entries = self.entries.lock().await;
    entries
      .get(key)
      .filter(|entry| entry.is_fresh(self.ttl))
      .map(|entry| entry.payload.clone())
  }

  pub async fn put(&self, key: String, payload: Value) {
    let mut entries = self.entries.lock().await;
    if entries.len() >= self.capacity && !entries.contains_key(&key) {
      let ttl = self.ttl;
      entries.retain(|_, entry| entry.is_fresh(ttl));
      if entries.len() >= self.capacity {
        let oldest = entries
          .iter()
          .min_by_key(|(_, entry)| entry.stored_at)
          .map(|(k, _)| k.clone());
        if let Some(oldest) = oldest {
          debug!(key = %oldest, "cache full, evicting oldest entry");
          entries.remove(&oldest);
        }
      }
    }
    entries.insert(
      key,
      CacheEntry {
        payload,
        stored_at: Instant::now(),
      },
    );
  }

  /// Drops expired entries; driven by the periodic sweep task.
  pub async fn purge_expired(&self) -> usize {
    let mut entries = self.entries.lock().await;
    let before = entries.len();
    let ttl = self.ttl;
    entries.retain(|_, entry| entry.is_fresh(ttl));
    before - entries.len()
  }

  pub async fn len(&self) -> usize {
    self.entries.lock().await.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn shuffle_of(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn canonical_key_is_permutation_invariant() {
    let a = canonical_key(&shuffle_of(&["NSE:INFY", "NSE:TCS", "MCX:GOLD"]));
    let b = canonical_key(&shuffle_of(&["NSE:TCS", "MCX:GOLD", "NSE:INFY"]));
    let c = canonical_key(&shuffle_of(&["MCX:GOLD", "NSE:INFY", "NSE:TCS"]));
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(a, "MCX:GOLD,NSE:INFY,NSE:TCS");
  }

  #[test]
  fn canonical_key_distinguishes_different_sets() {
    assert_ne!(
      canonical_key(&shuffle_of(&["NSE:INFY"])),
      canonical_key(&shuffle_of(&["NSE:TCS"]))
    );
    assert_eq!(canonical_key(&[]), "");
  }

  #[tokio::test]
  async fn put_then_get_roundtrips_within_ttl() {
    let cache = QuoteCache::new(Duration::from_secs(30), 16);
    let payload = json!({"NSE:INFY": {"last_price": 1520.5}});
    cache.put("NSE:INFY".to_string(), payload.clone()).await;
    assert_eq!(cache.get("NSE:INFY").await, Some(payload));
    assert_eq!(cache.get("NSE:TCS").await, None);
  }

  #[tokio::test]
  async fn entries_expire_after_the_ttl() {
    let ttl = Duration::from_secs(30);
    let cache = QuoteCache::new(ttl, 16);
    cache.put("k".to_string(), json!(1)).await;

    // backdate the entry instead of sleeping through the ttl
    {
      let mut entries = cache.entries.lock().await;
      entries.get_mut("k").unwrap().stored_at = Instant::now() - ttl;
    }

    assert_eq!(cache.get("k").await, None);
    assert_eq!(cache.purge_expired().await, 1);
    assert_eq!(cache.len().await, 0);
  }

  #[tokio::test]
  async fn overwrite_refreshes_the_entry() {
    let cache = QuoteCache::new(Duration::from_secs(30), 16);
    cache.put("k".to_string(), json!("old")).await;
    cache.put("k".to_string(), json!("new")).await;
    assert_eq!(cache.get("k").await, Some(json!("new")));
    assert_eq!(cache.len().await, 1);
  }

  #[tokio::test]
  async fn full_cache_evicts_expired_entries_first() {
    let ttl = Duration::from_secs(30);
    let cache = QuoteCache::new(ttl, 2);
    cache.put("stale".to_string(), json!(1)).await;
    cache.put("fresh".to_string(), json!(2)).await;
    {
      let mut entries = cache.entries.lock().await;
      entries.get_mut("stale").unwrap().stored_at = Instant::now() - ttl;
    }

    cache.put("new".to_string(), json!(3)).await;

    assert_eq!(cache.get("stale").await, None);
    assert_eq!(cache.get("fresh").await, Some(json!(2)));
    assert_eq!(cache.get("new").await, Some(json!(3)));
    assert_eq!(cache.len().await, 2);
  }

  #[tokio::test]
  async fn full_cache_of_fresh_entries_drops_the_oldest() {
    let cache = QuoteCache::new(Duration::from_secs(300), 2);
    cache.put("oldest".to_string(), json!(1)).await;
    cache.put("newer".to_string(), json!(2)).await;
    {
      // make the ordering unambiguous even on a coarse clock
      let mut entries = cache.entries.lock().await;
      entries.get_mut("oldest").unwrap().stored_at = Instant::now() - Duration::from_secs(5);
    }

    cache.put("newest".to_string(), json!(3)).await;

    assert_eq!(cache.get("oldest").await, None);
    assert_eq!(cache.get("newer").await, Some(json!(2)));
    assert_eq!(cache.get("newest").await, Some(json!(3)));
  }
}
