//! Kalshi Trade API Adapter
//!
//! Authenticated access to the Kalshi exchange:
//! - `auth`: credential loading and RSA-PSS request signing
//! - `rest`: rate-limited REST client with cursor pagination
//! - `ws`: streaming client with injectable message handlers
//!
//! Every request (REST call or WebSocket upgrade) is signed per-request with
//! the account's RSA private key; there is no session token. Retry, backoff,
//! and reconnection are deliberately left to callers.
//!
//! # Official Documentation
//! - API reference: https://trading-api.readme.io/reference
//! - Authentication: https://trading-api.readme.io/reference/api-keys

pub mod auth;
pub mod error;
pub mod rest;
pub mod types;
pub mod ws;

pub use auth::{AuthHeaders, Credentials, RequestSigner};
pub use error::{KalshiError, Result};
pub use rest::KalshiRestClient;
pub use types::{Environment, StreamMessage, SubscribeCommand};
pub use ws::{KalshiWsClient, LogObserver, StreamHandler};

/// Demo exchange REST base URL
pub const DEMO_API_BASE: &str = "https://demo-api.kalshi.co";

/// Production exchange REST base URL
pub const PROD_API_BASE: &str = "https://api.elections.kalshi.com";

/// Demo exchange WebSocket base URL
pub const DEMO_WS_BASE: &str = "wss://demo-api.kalshi.co";

/// Production exchange WebSocket base URL
pub const PROD_WS_BASE: &str = "wss://api.elections.kalshi.com";

/// Exchange status route
pub const EXCHANGE_PATH: &str = "/trade-api/v2/exchange";

/// Market listing route
pub const MARKETS_PATH: &str = "/trade-api/v2/markets";

/// Portfolio route (balance lives under it)
pub const PORTFOLIO_PATH: &str = "/trade-api/v2/portfolio";

/// Public trade history route (cursor paginated)
pub const TRADES_PATH: &str = "/trade-api/v2/markets/trades";

/// Series route, candlesticks live under `{series}/markets/{ticker}`
pub const SERIES_PATH: &str = "/trade-api/v2/series";

/// WebSocket upgrade path (also the signed path for the handshake)
pub const WS_PATH: &str = "/trade-api/ws/v2";
