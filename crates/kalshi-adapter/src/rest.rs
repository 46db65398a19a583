//! Rate-limited REST client for the Kalshi trade API
//!
//! # Endpoints
//! - GET /trade-api/v2/exchange/status - Exchange status
//! - GET /trade-api/v2/portfolio/balance - Account balance
//! - GET /trade-api/v2/markets - Market listing (cursor paginated)
//! - GET /trade-api/v2/markets/trades - Trade history (cursor paginated)
//! - GET /trade-api/v2/series/{series}/markets/{ticker}/candlesticks
//!
//! Paths are opaque route strings; responses come back as raw JSON. The
//! client paces back-to-back calls 100ms apart per instance - that is a
//! local politeness heuristic, not cross-process coordination.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::auth::{
    AuthHeaders, Credentials, RequestSigner, ACCESS_KEY_HEADER, ACCESS_SIGNATURE_HEADER,
    ACCESS_TIMESTAMP_HEADER,
};
use crate::error::{KalshiError, Result};
use crate::types::Environment;
use crate::{EXCHANGE_PATH, MARKETS_PATH, PORTFOLIO_PATH, SERIES_PATH, TRADES_PATH};

/// Minimum spacing between calls from one client instance.
const RATE_LIMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Paces calls from a single client instance: a call issued less than the
/// interval after the previous one sleeps for the remainder of the window.
struct CallPacer {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl CallPacer {
    fn new(interval: Duration) -> Self {
        Self { interval, last_call: Mutex::new(None) }
    }

    async fn wait(&self) {
        let deadline = {
            let mut last = self.last_call.lock().await;
            let now = Instant::now();
            let next = match *last {
                Some(prev) if now < prev + self.interval => prev + self.interval,
                _ => now,
            };
            *last = Some(next);
            next
        };
        tokio::time::sleep_until(deadline).await;
    }
}

/// Signed REST client bound to one environment.
pub struct KalshiRestClient {
    http: Client,
    base_url: String,
    signer: RequestSigner,
    pacer: CallPacer,
}

impl KalshiRestClient {
    /// Create a client for the given environment.
    pub fn new(credentials: Credentials, environment: Environment) -> Result<Self> {
        Self::with_base_url(credentials, environment.api_base())
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(credentials: Credentials, base_url: &str) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer: RequestSigner::new(credentials),
            pacer: CallPacer::new(RATE_LIMIT_INTERVAL),
        })
    }

    /// GET request returning raw JSON. `path` may carry an inline query
    /// string; the signature covers only the part before `?`.
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.pacer.wait().await;
        let auth = self.signer.sign("GET", path)?;
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.signed(self.http.get(&url), &auth).send().await?;
        self.parse_response(response, &url).await
    }

    /// POST request with a JSON body.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.pacer.wait().await;
        let auth = self.signer.sign("POST", path)?;
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self.signed(self.http.post(&url), &auth).json(body).send().await?;
        self.parse_response(response, &url).await
    }

    /// DELETE request returning raw JSON.
    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.pacer.wait().await;
        let auth = self.signer.sign("DELETE", path)?;
        let url = format!("{}{}", self.base_url, path);
        debug!("DELETE {}", url);

        let response = self.signed(self.http.delete(&url), &auth).send().await?;
        self.parse_response(response, &url).await
    }

    fn signed(&self, builder: RequestBuilder, auth: &AuthHeaders) -> RequestBuilder {
        builder
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(ACCESS_KEY_HEADER, &auth.key_id)
            .header(ACCESS_SIGNATURE_HEADER, &auth.signature)
            .header(ACCESS_TIMESTAMP_HEADER, &auth.timestamp)
    }

    /// Success is 200-298 per the exchange's range semantics. On failure the
    /// raw body is logged for diagnostics before the error is returned.
    async fn parse_response(&self, response: Response, url: &str) -> Result<Value> {
        let status = response.status();
        if !(200..299).contains(&status.as_u16()) {
            let body = response.text().await.unwrap_or_default();
            error!("request to {} failed with HTTP {}: {}", url, status, body);
            return Err(KalshiError::Http { status, body });
        }

        let body = response.text().await?;
        let json: Value = serde_json::from_str(&body)?;
        Ok(json)
    }

    /// Follow a cursor-paginated list endpoint to completion, accumulating
    /// `items_key` arrays in server order. Stops when the server returns no
    /// cursor or after `max_pages` pages.
    pub async fn get_all_pages(
        &self,
        path: &str,
        items_key: &str,
        max_pages: Option<usize>,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        if max_pages == Some(0) {
            return Ok(items);
        }

        loop {
            let page_path = match &cursor {
                Some(c) if path.contains('?') => format!("{path}&cursor={c}"),
                Some(c) => format!("{path}?cursor={c}"),
                None => path.to_string(),
            };

            let page = self.get(&page_path).await?;
            let batch = page.get(items_key).and_then(Value::as_array).ok_or_else(|| {
                KalshiError::Validation(format!("response missing `{items_key}` array"))
            })?;
            items.extend(batch.iter().cloned());
            pages += 1;

            if max_pages.is_some_and(|limit| pages >= limit) {
                debug!("pagination stopped at page bound {}", pages);
                break;
            }

            cursor = match page.get("cursor").and_then(Value::as_str) {
                Some(c) if !c.is_empty() => Some(c.to_string()),
                _ => None,
            };
            if cursor.is_none() {
                break;
            }
        }

        debug!("collected {} items over {} pages", items.len(), pages);
        Ok(items)
    }

    /// GET /trade-api/v2/exchange/status
    pub async fn get_exchange_status(&self) -> Result<Value> {
        self.get(&format!("{EXCHANGE_PATH}/status")).await
    }

    /// GET /trade-api/v2/portfolio/balance
    pub async fn get_balance(&self) -> Result<Value> {
        self.get(&format!("{PORTFOLIO_PATH}/balance")).await
    }

    /// GET /trade-api/v2/markets, optionally filtered by event ticker.
    pub async fn get_markets(&self, event_ticker: Option<&str>, limit: Option<u32>) -> Result<Value> {
        let mut path = MARKETS_PATH.to_string();
        let mut sep = '?';
        if let Some(ticker) = event_ticker {
            path.push(sep);
            path.push_str(&format!("event_ticker={ticker}"));
            sep = '&';
        }
        if let Some(limit) = limit {
            path.push(sep);
            path.push_str(&format!("limit={limit}"));
        }
        self.get(&path).await
    }

    /// All trades for a market ticker, paginated to completion (or to
    /// `max_pages`).
    pub async fn get_trades(&self, ticker: &str, max_pages: Option<usize>) -> Result<Vec<Value>> {
        self.get_all_pages(&format!("{TRADES_PATH}?ticker={ticker}"), "trades", max_pages).await
    }

    /// GET /trade-api/v2/series/{series}/markets/{ticker}/candlesticks
    pub async fn get_candlesticks(
        &self,
        series_ticker: &str,
        market_ticker: &str,
        start_ts: i64,
        end_ts: i64,
        period_interval: u32,
    ) -> Result<Value> {
        let path = format!(
            "{SERIES_PATH}/{series_ticker}/markets/{market_ticker}/candlesticks\
             ?start_ts={start_ts}&end_ts={end_ts}&period_interval={period_interval}"
        );
        self.get(&path).await
    }
}
