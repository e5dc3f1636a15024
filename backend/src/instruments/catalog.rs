use std::{path::Path, sync::Arc};

use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const SEARCH_RESULT_CAP: usize = 50;
pub const BROWSE_RESULT_CAP: usize = 100;

/// One tradable symbol from the converted Kite instrument dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
  pub key: String,
  pub tradingsymbol: String,
  pub name: String,
  pub exchange: String,
  #[serde(default)]
  pub instrument_type: String,
  #[serde(default)]
  pub segment: String,
  #[serde(default)]
  pub display_name: String,
  #[serde(default)]
  pub exchange_display: String,
  #[serde(default)]
  pub expiry: Option<String>,
  #[serde(default)]
  pub strike: Option<f64>,
  #[serde(default = "default_lot_size")]
  pub lot_size: u32,
  #[serde(default = "default_tick_size")]
  pub tick_size: f64,
  #[serde(default)]
  pub instrument_token: Option<u64>,
  #[serde(default)]
  pub exchange_token: Option<u64>,
  #[serde(default)]
  pub last_price: f64,
}

fn default_lot_size() -> u32 {
  1
}

fn default_tick_size() -> f64 {
  0.05
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMetadata {
  pub total: usize,
  #[serde(rename = "lastUpdated", default)]
  pub last_updated: Option<String>,
  #[serde(default)]
  pub source: Option<String>,
  #[serde(default)]
  pub exchanges: Vec<String>,
  #[serde(rename = "nseCount", default)]
  pub nse_count: usize,
  #[serde(rename = "mcxCount", default)]
  pub mcx_count: usize,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
  #[serde(default)]
  metadata: Option<CatalogMetadata>,
  instruments: Vec<Instrument>,
}

/// Search hit projection, the subset the watchlist UI consumes.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
  pub key: String,
  pub tradingsymbol: String,
  pub name: String,
  pub exchange: String,
  pub instrument_type: String,
  pub segment: String,
  pub display_name: String,
  pub exchange_display: String,
  pub expiry: Option<String>,
  pub strike: Option<f64>,
  pub lot_size: u32,
  pub tick_size: f64,
}

impl SearchHit {
  fn project(instrument: &Instrument) -> Self {
    let display_name = if instrument.display_name.is_empty() {
      format!("{} - {}", instrument.tradingsymbol, instrument.name)
    } else {
      instrument.display_name.clone()
    };
    let exchange_display = if instrument.exchange_display.is_empty() {
      instrument.exchange.clone()
    } else {
      instrument.exchange_display.clone()
    };
    Self {
      key: instrument.key.clone(),
      tradingsymbol: instrument.tradingsymbol.clone(),
      name: instrument.name.clone(),
      exchange: instrument.exchange.clone(),
      instrument_type: instrument.instrument_type.clone(),
      segment: instrument.segment.clone(),
      display_name,
      exchange_display,
      expiry: instrument.expiry.clone(),
      strike: instrument.strike,
      lot_size: instrument.lot_size,
      tick_size: instrument.tick_size,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CatalogSource {
  JsonFile,
  Fallback,
}

impl CatalogSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::JsonFile => "json_file",
      Self::Fallback => "fallback_data",
    }
  }
}

struct CatalogState {
  instruments: Vec<Instrument>,
  metadata: Option<CatalogMetadata>,
  source: CatalogSource,
  load_error: Option<String>,
}

/// Instrument catalog loaded from the pre-converted JSON dump, with a small
/// hardcoded fallback list when the file is absent or unreadable. Reloadable
/// at runtime through the instruments endpoints.
#[derive(Clone)]
pub struct InstrumentCatalog {
  state: Arc<Mutex<CatalogState>>,
  file_path: String,
}

impl InstrumentCatalog {
  /// Loads from `file_path`, falling back to the built-in list on any error.
  pub async fn load(file_path: impl Into<String>) -> Self {
    let catalog = Self {
      state: Arc::new(Mutex::new(CatalogState {
        instruments: fallback_instruments(),
        metadata: None,
        source: CatalogSource::Fallback,
        load_error: None,
      })),
      file_path: file_path.into(),
    };
    catalog.reload().await.ok();
    catalog
  }

  /// Re-reads the JSON file. On failure the previous instruments stay in
  /// place and the error is remembered for the status endpoint.
  pub async fn reload(&self) -> Result<usize, String> {
    let mut state = self.state.lock().await;
    match read_catalog_file(&self.file_path) {
      Ok(file) => {
        let count = file.instruments.len();
        info!(count, path = %self.file_path, "instrument catalog loaded");
        state.instruments = file.instruments;
        state.metadata = file.metadata;
        state.source = CatalogSource::JsonFile;
        state.load_error = None;
        Ok(count)
      }
      Err(err) => {
        warn!(path = %self.file_path, %err, "catalog load failed, keeping current instruments");
        state.load_error = Some(err.clone());
        Err(err)
      }
    }
  }

  /// Case-insensitive substring match over tradingsymbol and name, capped
  /// at [`SEARCH_RESULT_CAP`] hits in discovery order.
  pub async fn search(&self, query: &str) -> Vec<SearchHit> {
    let term = query.trim().to_lowercase();
    let state = self.state.lock().await;
    state
      .instruments
      .iter()
      .filter(|instrument| {
        instrument.tradingsymbol.to_lowercase().contains(&term)
          || instrument.name.to_lowercase().contains(&term)
      })
      .take(SEARCH_RESULT_CAP)
      .map(SearchHit::project)
      .collect()
  }

  /// Empty-query mode: the first [`BROWSE_RESULT_CAP`] raw entries plus
  /// catalog totals.
  pub async fn browse(&self) -> Value {
    let state = self.state.lock().await;
    json!({
      "data": state.instruments.iter().take(BROWSE_RESULT_CAP).collect::<Vec<_>>(),
      "total": state.instruments.len(),
      "source": state.source.as_str(),
      "metadata": state.metadata,
    })
  }

  pub async fn len(&self) -> usize {
    self.state.lock().await.instruments.len()
  }

  pub async fn source(&self) -> CatalogSource {
    self.state.lock().await.source
  }

  pub async fn metadata(&self) -> Option<CatalogMetadata> {
    self.state.lock().await.metadata.clone()
  }

  /// Diagnostics payload for GET /api/instruments/status.
  pub async fn status(&self) -> Value {
    let state = self.state.lock().await;
    let sample: Vec<Value> = state
      .instruments
      .iter()
      .take(5)
      .map(|i| json!({"symbol": i.tradingsymbol, "exchange": i.exchange}))
      .collect();
    json!({
      "dataSource": state.source.as_str(),
      "jsonCache": {
        "available": state.source == CatalogSource::JsonFile,
        "count": if state.source == CatalogSource::JsonFile { state.instruments.len() } else { 0 },
        "metadata": state.metadata,
        "filePath": self.file_path,
        "fileExists": Path::new(&self.file_path).exists(),
        "loadError": state.load_error,
      },
      "fallbackData": { "count": fallback_instruments().len() },
      "totalAvailable": state.instruments.len(),
      "sample": sample,
    })
  }
}

fn read_catalog_file(path: &str) -> Result<CatalogFile, String> {
  if !Path::new(path).exists() {
    return Err(format!("Instruments file not found: {path}"));
  }
  let raw = std::fs::read_to_string(path).map_err(|err| format!("Failed to read {path}: {err}"))?;
  let file: CatalogFile =
    serde_json::from_str(&raw).map_err(|err| format!("Invalid instruments JSON: {err}"))?;
  if file.instruments.is_empty() {
    return Err("Instruments file carries no instruments".to_string());
  }
  Ok(file)
}

fn equity(symbol: &str, name: &str) -> Instrument {
  Instrument {
    key: format!("NSE:{symbol}"),
    tradingsymbol: symbol.to_string(),
    name: name.to_string(),
    exchange: "NSE".to_string(),
    instrument_type: "EQ".to_string(),
    segment: "EQ".to_string(),
    display_name: format!("{symbol} - {name}"),
    exchange_display: "NSE".to_string(),
    expiry: None,
    strike: None,
    lot_size: 1,
    tick_size: 0.05,
    instrument_token: None,
    exchange_token: None,
    last_price: 0.0,
  }
}

fn commodity(symbol: &str, name: &str) -> Instrument {
  Instrument {
    key: format!("MCX:{symbol}"),
    tradingsymbol: symbol.to_string(),
    name: name.to_string(),
    exchange: "MCX".to_string(),
    instrument_type: "FUT".to_string(),
    segment: "COM".to_string(),
    display_name: format!("{symbol} - {name} Futures"),
    exchange_display: "MCX".to_string(),
    expiry: None,
    strike: None,
    lot_size: 1,
    tick_size: 0.05,
    instrument_token: None,
    exchange_token: None,
    last_price: 0.0,
  }
}

/// Popular NSE equities plus MCX commodities, used when the JSON dump is
/// not on disk.
pub fn fallback_instruments() -> Vec<Instrument> {
  vec![
    equity("RELIANCE", "Reliance Industries Limited"),
    equity("TCS", "Tata Consultancy Services Limited"),
    equity("HDFCBANK", "HDFC Bank Limited"),
    equity("INFY", "Infosys Limited"),
    equity("ICICIBANK", "ICICI Bank Limited"),
    equity("SBIN", "State Bank of India"),
    equity("SBICARD", "SBI Cards and Payment Services Limited"),
    equity("SBILIFE", "SBI Life Insurance Company Limited"),
    equity("BHARTIARTL", "Bharti Airtel Limited"),
    equity("KOTAKBANK", "Kotak Mahindra Bank Limited"),
    equity("LT", "Larsen & Toubro Limited"),
    equity("ASIANPAINT", "Asian Paints Limited"),
    equity("MARUTI", "Maruti Suzuki India Limited"),
    equity("TITAN", "Titan Company Limited"),
    equity("NESTLEIND", "Nestle India Limited"),
    equity("WIPRO", "Wipro Limited"),
    equity("ULTRACEMCO", "UltraTech Cement Limited"),
    equity("ONGC", "Oil & Natural Gas Corporation Limited"),
    equity("TECHM", "Tech Mahindra Limited"),
    equity("SUNPHARMA", "Sun Pharmaceutical Industries Limited"),
    commodity("GOLD", "Gold"),
    commodity("GOLDM", "Gold Mini"),
    commodity("SILVER", "Silver"),
    commodity("SILVERM", "Silver Mini"),
    commodity("CRUDE", "Crude Oil"),
    commodity("NATURALGAS", "Natural Gas"),
    commodity("COPPER", "Copper"),
    commodity("ZINC", "Zinc"),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn fallback_catalog() -> InstrumentCatalog {
    InstrumentCatalog::load("/nonexistent/instruments.json").await
  }

  #[tokio::test]
  async fn missing_file_loads_the_fallback_list() {
    let catalog = fallback_catalog().await;
    assert_eq!(catalog.len().await, 28);
    assert_eq!(catalog.source().await, CatalogSource::Fallback);

    let status = catalog.status().await;
    assert_eq!(status["dataSource"], "fallback_data");
    assert_eq!(status["jsonCache"]["available"], false);
    assert_eq!(status["fallbackData"]["count"], 28);
    assert!(status["jsonCache"]["loadError"].is_string());
  }

  #[tokio::test]
  async fn search_matches_symbol_and_name_case_insensitively() {
    let catalog = fallback_catalog().await;

    let by_symbol = catalog.search("sbi").await;
    let symbols: Vec<&str> = by_symbol.iter().map(|h| h.tradingsymbol.as_str()).collect();
    assert_eq!(symbols, ["SBIN", "SBICARD", "SBILIFE"]);

    let by_name = catalog.search("gold").await;
    assert_eq!(by_name.len(), 2);
    assert_eq!(by_name[0].key, "MCX:GOLD");
    assert_eq!(by_name[0].display_name, "GOLD - Gold Futures");

    assert!(catalog.search("no-such-symbol").await.is_empty());
  }

  #[tokio::test]
  async fn browse_returns_raw_entries_with_totals() {
    let catalog = fallback_catalog().await;
    let browse = catalog.browse().await;
    assert_eq!(browse["total"], 28);
    assert_eq!(browse["source"], "fallback_data");
    assert_eq!(browse["data"].as_array().unwrap().len(), 28);
    assert_eq!(browse["data"][0]["key"], "NSE:RELIANCE");
  }

  #[tokio::test]
  async fn catalog_file_parses_with_defaults() {
    let dir = std::env::temp_dir().join(format!("catalog-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("instruments.json");
    std::fs::write(
      &path,
      r#"{
        "metadata": {"total": 2, "lastUpdated": "2025-01-01", "source": "kite_dump", "exchanges": ["NSE"], "nseCount": 2, "mcxCount": 0},
        "instruments": [
          {"key": "NSE:ABC", "tradingsymbol": "ABC", "name": "ABC Limited", "exchange": "NSE"},
          {"key": "NSE:XYZ", "tradingsymbol": "XYZ", "name": "XYZ Limited", "exchange": "NSE", "lot_size": 50, "tick_size": 0.1}
        ]
      }"#,
    )
    .unwrap();

    let catalog = InstrumentCatalog::load(path.to_str().unwrap().to_string()).await;
    assert_eq!(catalog.len().await, 2);
    assert_eq!(catalog.source().await, CatalogSource::JsonFile);
    assert_eq!(catalog.metadata().await.unwrap().nse_count, 2);

    let hits = catalog.search("abc").await;
    assert_eq!(hits[0].lot_size, 1);
    assert_eq!(hits[0].tick_size, 0.05);
    assert_eq!(hits[0].display_name, "ABC - ABC Limited");

    std::fs::remove_dir_all(&dir).ok();
  }

  #[tokio::test]
  async fn failed_reload_keeps_current_instruments() {
    let catalog = fallback_catalog().await;
    assert!(catalog.reload().await.is_err());
    assert_eq!(catalog.len().await, 28);
  }
}
