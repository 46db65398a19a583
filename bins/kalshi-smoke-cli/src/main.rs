//! Kalshi Trade API Smoke Test CLI
//!
//! Commands:
//! - `exchange`: Fetch exchange status
//! - `balance`: Fetch portfolio balance
//! - `markets`: List markets, optionally filtered by event ticker
//! - `trades`: Pull trade history for a ticker, paginated to completion
//! - `candlesticks`: Pull candlesticks for a market over a time window
//! - `stream`: Subscribe to streaming channels and capture messages as JSONL
//!
//! # Usage
//! ```bash
//! # Credentials via flags or KALSHI_KEY_ID / KALSHI_PRIVATE_KEY_PATH (.env works)
//! kalshi_smoke --env demo balance
//!
//! kalshi_smoke markets --event-ticker KXBTC-25MAY1515
//!
//! kalshi_smoke trades --ticker KXBTC-25MAY1515-T103249.99 --out data/trades.json
//!
//! kalshi_smoke candlesticks --series KXBTC --ticker KXBTC-25MAY1515-T103249.99 \
//!     --start 2025-05-15T14:00:00Z --end 2025-05-15T15:00:00Z
//!
//! kalshi_smoke stream --channel ticker --out data/stream.jsonl --limit 500
//! ```

use std::io::Write;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info, warn};

use kalshi_adapter::{
    Credentials, Environment, KalshiRestClient, KalshiWsClient, StreamHandler, StreamMessage,
};

#[derive(Parser)]
#[command(name = "kalshi_smoke")]
#[command(about = "Kalshi trade API smoke test CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Target environment (demo, prod)
    #[arg(long, default_value = "demo", global = true)]
    env: String,

    /// API key id (defaults to KALSHI_KEY_ID)
    #[arg(long, global = true)]
    key_id: Option<String>,

    /// Path to the PEM-encoded RSA private key (defaults to KALSHI_PRIVATE_KEY_PATH)
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch exchange status
    Exchange,

    /// Fetch portfolio balance
    Balance,

    /// List markets
    Markets {
        /// Filter by event ticker
        #[arg(long)]
        event_ticker: Option<String>,

        /// Page size
        #[arg(long)]
        limit: Option<u32>,

        /// Output file (defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Pull trade history for a market, following cursors to completion
    Trades {
        /// Market ticker
        #[arg(long)]
        ticker: String,

        /// Stop after this many pages (0 = all pages)
        #[arg(long, default_value = "0")]
        max_pages: usize,

        /// Output file (defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Pull candlesticks for a market over a time window
    Candlesticks {
        /// Series ticker, e.g. KXBTC
        #[arg(long)]
        series: String,

        /// Market ticker within the series
        #[arg(long)]
        ticker: String,

        /// Window start (ISO 8601)
        #[arg(long)]
        start: String,

        /// Window end (ISO 8601)
        #[arg(long)]
        end: String,

        /// Candle period in minutes
        #[arg(long, default_value = "1")]
        period: u32,

        /// Output file (defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Subscribe to streaming channels and capture messages as JSONL
    Stream {
        /// Channel(s) to subscribe to. Can specify multiple times.
        #[arg(long, default_value = "ticker")]
        channel: Vec<String>,

        /// Output file path for raw JSONL
        #[arg(long, default_value = "data/stream_raw.jsonl")]
        out: PathBuf,

        /// Maximum messages to capture (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "500")]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let environment: Environment = cli.env.parse()?;
    let credentials = load_credentials(cli.key_id, cli.key_file)?;
    info!("Environment: {}", environment);
    info!("Credentials: {:?}", credentials);

    match cli.command {
        Commands::Exchange => {
            let client = KalshiRestClient::new(credentials, environment)?;
            let status = client.get_exchange_status().await?;
            write_output(&status, None)
        }
        Commands::Balance => {
            let client = KalshiRestClient::new(credentials, environment)?;
            let balance = client.get_balance().await?;
            write_output(&balance, None)
        }
        Commands::Markets { event_ticker, limit, out } => {
            let client = KalshiRestClient::new(credentials, environment)?;
            let markets = client.get_markets(event_ticker.as_deref(), limit).await?;
            write_output(&markets, out)
        }
        Commands::Trades { ticker, max_pages, out } => {
            let client = KalshiRestClient::new(credentials, environment)?;
            let bound = if max_pages == 0 { None } else { Some(max_pages) };
            let trades = client.get_trades(&ticker, bound).await?;
            info!("Fetched {} trades for {}", trades.len(), ticker);
            write_output(&Value::Array(trades), out)
        }
        Commands::Candlesticks { series, ticker, start, end, period, out } => {
            let client = KalshiRestClient::new(credentials, environment)?;
            let start_ts = parse_time(&start)?.timestamp();
            let end_ts = parse_time(&end)?.timestamp();
            let candles =
                client.get_candlesticks(&series, &ticker, start_ts, end_ts, period).await?;
            write_output(&candles, out)
        }
        Commands::Stream { channel, out, limit } => run_stream(credentials, environment, channel, out, limit).await,
    }
}

fn load_credentials(key_id: Option<String>, key_file: Option<PathBuf>) -> Result<Credentials> {
    match (key_id, key_file) {
        (Some(id), Some(path)) => Ok(Credentials::from_pem_file(id, path)?),
        _ => Credentials::from_env().context(
            "missing credentials: pass --key-id and --key-file, \
             or set KALSHI_KEY_ID and KALSHI_PRIVATE_KEY_PATH",
        ),
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid time '{s}', expected ISO 8601"))?
        .with_timezone(&Utc))
}

/// Pretty-print JSON to a file or stdout. Persistence is this binary's
/// decision; the library only returns data.
fn write_output(value: &Value, out: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &json)?;
            info!("Output written to: {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Stream capture handler: one JSON line per message, stops at the limit.
struct JsonlRecorder {
    writer: std::io::BufWriter<std::fs::File>,
    count: Arc<AtomicU64>,
    limit: u64,
}

impl JsonlRecorder {
    /// Flush eagerly at session end so write failures (e.g. a full disk)
    /// are reported instead of vanishing in the implicit drop.
    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("failed to flush capture file: {}", e);
        }
    }
}

impl StreamHandler for JsonlRecorder {
    fn on_message(&mut self, message: &StreamMessage) -> ControlFlow<()> {
        match serde_json::to_string(message) {
            Ok(line) => {
                if let Err(e) = writeln!(self.writer, "{line}") {
                    warn!("failed to write message: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize message: {}", e),
        }

        let seen = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % 100 == 0 {
            debug!("captured {} messages", seen);
        }
        if self.limit > 0 && seen >= self.limit {
            info!("Reached message limit: {}", self.limit);
            self.flush();
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn on_error(&mut self, error: &kalshi_adapter::KalshiError) {
        self.flush();
        tracing::error!("stream error: {}", error);
    }

    fn on_close(&mut self, code: u16, reason: &str) {
        self.flush();
        info!("stream closed: {} {}", code, reason);
    }
}

async fn run_stream(
    credentials: Credentials,
    environment: Environment,
    channels: Vec<String>,
    out: PathBuf,
    limit: u64,
) -> Result<()> {
    info!("=== Stream Capture ===");
    info!("Channels: {:?}", channels);
    info!("Output: {}", out.display());
    info!("Limit: {} (0 = unlimited)", limit);
    info!("Press Ctrl+C to stop");

    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = std::fs::File::create(&out)
        .with_context(|| format!("failed to create {}", out.display()))?;

    let count = Arc::new(AtomicU64::new(0));
    let recorder =
        JsonlRecorder { writer: std::io::BufWriter::new(file), count: count.clone(), limit };

    let mut client = KalshiWsClient::new(credentials, environment, Box::new(recorder));
    client.set_channels(channels);

    // Ctrl+C cancels the connect future, which releases the connection.
    tokio::select! {
        result = client.connect() => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, closing connection"),
    }

    info!("");
    info!("=== Summary ===");
    info!("Messages captured: {}", count.load(Ordering::Relaxed));
    info!("Output written to: {}", out.display());

    Ok(())
}
