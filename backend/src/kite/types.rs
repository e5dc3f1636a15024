use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Standard Kite REST envelope. `status` is "success" or "error"; error
/// responses carry `message` and `error_type` instead of `data`.
#[derive(Debug, Clone, Deserialize)]
pub struct KiteEnvelope<T> {
  pub status: String,
  pub data: Option<T>,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub error_type: Option<String>,
}

/// The slice of the broker identity we persist per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  pub user_id: String,
  pub user_name: String,
  #[serde(default)]
  pub user_shortname: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub user_type: String,
  #[serde(default)]
  pub broker: String,
}

/// POST /session/token payload. Kite sends a lot more (exchanges, products,
/// tokens for other flows); only what the proxy persists is kept.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchange {
  pub access_token: String,
  pub user_id: String,
  pub user_name: String,
  #[serde(default)]
  pub user_shortname: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub user_type: String,
  #[serde(default)]
  pub broker: String,
}

impl TokenExchange {
  pub fn profile(&self) -> UserProfile {
    UserProfile {
      user_id: self.user_id.clone(),
      user_name: self.user_name.clone(),
      user_shortname: self.user_shortname.clone(),
      email: self.email.clone(),
      user_type: self.user_type.clone(),
      broker: self.broker.clone(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOhlc {
  #[serde(default)]
  pub open: Option<f64>,
  #[serde(default)]
  pub high: Option<f64>,
  #[serde(default)]
  pub low: Option<f64>,
  #[serde(default)]
  pub close: Option<f64>,
}

/// Per-instrument payload of GET /quote and GET /quote/ohlc. The OHLC
/// endpoint sends a subset of these fields, so everything but `last_price`
/// is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQuote {
  #[serde(default)]
  pub instrument_token: Option<u64>,
  #[serde(default)]
  pub last_price: f64,
  #[serde(default)]
  pub last_quantity: Option<u64>,
  #[serde(default)]
  pub average_price: Option<f64>,
  #[serde(default)]
  pub net_change: Option<f64>,
  #[serde(default)]
  pub volume: Option<u64>,
  #[serde(default)]
  pub volume_traded: Option<u64>,
  #[serde(default)]
  pub turnover: Option<f64>,
  #[serde(default)]
  pub buy_quantity: Option<u64>,
  #[serde(default)]
  pub sell_quantity: Option<u64>,
  #[serde(default)]
  pub oi: Option<f64>,
  #[serde(default)]
  pub oi_day_high: Option<f64>,
  #[serde(default)]
  pub oi_day_low: Option<f64>,
  #[serde(default)]
  pub upper_circuit_limit: Option<f64>,
  #[serde(default)]
  pub lower_circuit_limit: Option<f64>,
  #[serde(default)]
  pub ohlc: Option<RawOhlc>,
  #[serde(default)]
  pub depth: Option<Value>,
  #[serde(default)]
  pub tradingsymbol: Option<String>,
  #[serde(default)]
  pub exchange: Option<String>,
  #[serde(default)]
  pub last_trade_time: Option<String>,
  #[serde(default)]
  pub exchange_timestamp: Option<String>,
}

/// Mirrors JS `||` defaulting: zero and absent both fall through.
fn non_zero_or(value: Option<f64>, fallback: f64) -> f64 {
  match value {
    Some(v) if v != 0.0 => v,
    _ => fallback,
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct OhlcBlock {
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
}

impl OhlcBlock {
  fn from_raw(raw: Option<&RawOhlc>, last_price: f64) -> Self {
    let ohlc = raw.cloned().unwrap_or_default();
    Self {
      open: non_zero_or(ohlc.open, last_price),
      high: non_zero_or(ohlc.high, last_price),
      low: non_zero_or(ohlc.low, last_price),
      close: non_zero_or(ohlc.close, last_price),
    }
  }
}

/// Stable quote projection served to the frontend. Field names match what
/// the watchlist consumes; missing broker fields get defaulted here so the
/// UI never has to.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteView {
  pub last_price: f64,
  pub last_quantity: Option<u64>,
  pub average_price: Option<f64>,
  pub ohlc: OhlcBlock,
  pub day_high: Option<f64>,
  pub day_low: Option<f64>,
  pub day_open: Option<f64>,
  pub previous_close: Option<f64>,
  pub net_change: f64,
  pub change: f64,
  pub change_percent: f64,
  pub volume: u64,
  pub day_volume: u64,
  pub volume_traded: u64,
  pub turnover: f64,
  pub depth: Value,
  pub upper_circuit: Option<f64>,
  pub lower_circuit: Option<f64>,
  pub instrument_token: Option<u64>,
  pub tradingsymbol: String,
  pub exchange: String,
  pub last_trade_time: Option<String>,
  pub exchange_timestamp: Option<String>,
  pub buy_quantity: Option<u64>,
  pub sell_quantity: Option<u64>,
  pub oi: Option<f64>,
  pub oi_day_high: Option<f64>,
  pub oi_day_low: Option<f64>,
}

impl QuoteView {
  pub fn project(key: &str, raw: &RawQuote) -> Self {
    let last_price = raw.last_price;
    let close = raw.ohlc.as_ref().and_then(|o| o.close);
    let fallback_change = last_price - non_zero_or(close, last_price);
    let net_change = match raw.net_change {
      Some(nc) if nc != 0.0 => nc,
      _ => fallback_change,
    };
    let change_percent = match (raw.net_change, close) {
      (Some(nc), Some(c)) if nc != 0.0 && c != 0.0 => (nc / c) * 100.0,
      _ => 0.0,
    };
    let (exchange, symbol) = split_key(key);
    let volume = raw.volume.unwrap_or(0);

    Self {
      last_price,
      last_quantity: raw.last_quantity,
      average_price: raw.average_price,
      ohlc: OhlcBlock::from_raw(raw.ohlc.as_ref(), last_price),
      day_high: raw.ohlc.as_ref().and_then(|o| o.high),
      day_low: raw.ohlc.as_ref().and_then(|o| o.low),
      day_open: raw.ohlc.as_ref().and_then(|o| o.open),
      previous_close: close,
      net_change,
      change: net_change,
      change_percent,
      volume,
      day_volume: volume,
      volume_traded: raw.volume_traded.or(raw.volume).unwrap_or(0),
      turnover: raw.turnover.unwrap_or(0.0),
      depth: raw
        .depth
        .clone()
        .unwrap_or_else(|| json!({ "buy": [], "sell": [] })),
      upper_circuit: raw.upper_circuit_limit,
      lower_circuit: raw.lower_circuit_limit,
      instrument_token: raw.instrument_token,
      tradingsymbol: raw.tradingsymbol.clone().unwrap_or_else(|| symbol.to_string()),
      exchange: raw.exchange.clone().unwrap_or_else(|| exchange.to_string()),
      last_trade_time: raw.last_trade_time.clone(),
      exchange_timestamp: raw.exchange_timestamp.clone(),
      buy_quantity: raw.buy_quantity,
      sell_quantity: raw.sell_quantity,
      oi: raw.oi,
      oi_day_high: raw.oi_day_high,
      oi_day_low: raw.oi_day_low,
    }
  }
}

/// OHLC projection, the slimmer sibling of [`QuoteView`].
#[derive(Debug, Clone, Serialize)]
pub struct OhlcView {
  pub ohlc: OhlcBlock,
  pub previous_close: Option<f64>,
  pub day_open: Option<f64>,
  pub day_high: Option<f64>,
  pub day_low: Option<f64>,
  pub last_price: f64,
  pub net_change: f64,
  pub change_percent: f64,
  pub instrument_token: Option<u64>,
  pub tradingsymbol: String,
  pub exchange: String,
  pub volume: u64,
  pub last_trade_time: Option<String>,
  pub upper_circuit: Option<f64>,
  pub lower_circuit: Option<f64>,
}

impl OhlcView {
  pub fn project(key: &str, raw: &RawQuote) -> Self {
    let last_price = raw.last_price;
    let close = raw.ohlc.as_ref().and_then(|o| o.close);
    let net_change = last_price - non_zero_or(close, last_price);
    let change_percent = match close {
      Some(c) if c != 0.0 => ((last_price - c) / c) * 100.0,
      _ => 0.0,
    };
    let (exchange, symbol) = split_key(key);

    Self {
      ohlc: OhlcBlock::from_raw(raw.ohlc.as_ref(), last_price),
      previous_close: close,
      day_open: raw.ohlc.as_ref().and_then(|o| o.open),
      day_high: raw.ohlc.as_ref().and_then(|o| o.high),
      day_low: raw.ohlc.as_ref().and_then(|o| o.low),
      last_price,
      net_change,
      change_percent,
      instrument_token: raw.instrument_token,
      tradingsymbol: raw.tradingsymbol.clone().unwrap_or_else(|| symbol.to_string()),
      exchange: raw.exchange.clone().unwrap_or_else(|| exchange.to_string()),
      volume: raw.volume.unwrap_or(0),
      last_trade_time: raw.last_trade_time.clone(),
      upper_circuit: raw.upper_circuit_limit,
      lower_circuit: raw.lower_circuit_limit,
    }
  }
}

/// "NSE:INFY" -> ("NSE", "INFY"); keys without a colon keep the whole
/// string as the symbol.
fn split_key(key: &str) -> (&str, &str) {
  match key.split_once(':') {
    Some((exchange, symbol)) => (exchange, symbol),
    None => ("", key),
  }
}
