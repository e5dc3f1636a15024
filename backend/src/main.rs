mod cache;
mod config;
mod instruments;
mod kite;
mod midwares;
mod route_handlers;
mod session;

use std::{sync::Arc, time::Duration};

use axum::{
  http::{header::CONTENT_TYPE, HeaderValue, Method},
  routing::{get, post},
  Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
  cache::QuoteCache,
  config::Settings,
  instruments::catalog::InstrumentCatalog,
  kite::gateway::KiteGateway,
  midwares::app_state::AppState,
  route_handlers::{auth, instruments as instrument_routes, market, system},
  session::store::SessionStore,
};

const QUOTE_CACHE_TTL: Duration = Duration::from_secs(30);
const OHLC_CACHE_TTL: Duration = Duration::from_secs(300);
const CACHE_CAPACITY: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
    .init();

  let settings = Settings::from_env();
  info!(
    port = settings.port,
    api_key = %settings.masked_api_key(),
    broker_configured = settings.broker_configured(),
    "starting Zerodha proxy"
  );
  if !settings.broker_configured() {
    warn!("KITE_API_KEY / KITE_API_SECRET not set; only the test123 flow will authenticate");
  }

  let catalog = InstrumentCatalog::load(settings.instruments_file.clone()).await;
  info!(
    count = catalog.len().await,
    source = catalog.source().await.as_str(),
    "instrument catalog ready"
  );

  let state = AppState {
    gateway: KiteGateway::new(settings.api_key.clone()),
    settings: Arc::new(settings.clone()),
    sessions: SessionStore::new(),
    quote_cache: QuoteCache::new(QUOTE_CACHE_TTL, CACHE_CAPACITY),
    ohlc_cache: QuoteCache::new(OHLC_CACHE_TTL, CACHE_CAPACITY),
    catalog,
  };

  tokio::spawn(sweep_loop(state.clone()));

  let app = Router::new()
    .route("/api", get(system::index))
    .route("/api/health", get(system::health))
    .route("/api/auth/login-url", get(auth::login_url))
    .route("/api/zerodha/callback", get(auth::callback))
    .route("/api/auth/session", post(auth::session))
    .route("/api/auth/status", get(auth::status))
    .route("/api/auth/logout", post(auth::logout))
    .route("/api/quote", post(market::quote))
    .route("/api/ohlc", post(market::ohlc))
    .route("/api/ltp", post(market::ltp))
    .route("/api/profile", get(market::profile))
    .route("/api/margins", get(market::margins))
    .route("/api/search", get(instrument_routes::search))
    .route("/api/instruments/status", get(instrument_routes::status))
    .route("/api/instruments/reload-json", post(instrument_routes::reload))
    .fallback(system::not_found)
    .layer(cors_layer(&settings))
    .with_state(state);

  let addr = format!("0.0.0.0:{}", settings.port);
  let listener = TcpListener::bind(&addr).await.expect("failed to start tcp listener");
  info!(%addr, "listening");
  axum::serve(listener, app).await.expect("failed to start server");
}

fn cors_layer(settings: &Settings) -> CorsLayer {
  let origins: Vec<HeaderValue> = settings
    .frontend_origins
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();
  CorsLayer::new()
    .allow_origin(origins)
    .allow_methods([Method::GET, Method::POST])
    .allow_headers([CONTENT_TYPE])
    .allow_credentials(true)
}

/// Periodic eviction of expired cache entries and sessions, so cold keys
/// and dead logins do not accumulate between requests.
async fn sweep_loop(state: AppState) {
  let mut interval = tokio::time::interval(SWEEP_INTERVAL);
  interval.tick().await;
  loop {
    interval.tick().await;
    let quotes = state.quote_cache.purge_expired().await;
    let ohlc = state.ohlc_cache.purge_expired().await;
    let sessions = state.sessions.purge_expired().await;
    if quotes + ohlc + sessions > 0 {
      debug!(quotes, ohlc, sessions, "sweep purged expired entries");
    }
  }
}
