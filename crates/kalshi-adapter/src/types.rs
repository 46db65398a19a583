//! Protocol types for the Kalshi trade API
//!
//! # Design Principles
//! 1. REST responses stay `serde_json::Value` - the adapter does no schema
//!    validation, route payloads belong to callers
//! 2. Known stream types with unrecognized fields use `#[serde(flatten)]`
//!    extras to preserve data
//! 3. Wire field names match the exchange contract exactly

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::KalshiError;
use crate::{DEMO_API_BASE, DEMO_WS_BASE, PROD_API_BASE, PROD_WS_BASE};

// ============================================================================
// Environment
// ============================================================================

/// Target exchange environment. Exactly one is active per client instance;
/// base URLs are derived once at construction and never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Demo,
    Prod,
}

impl Environment {
    /// REST base URL for this environment.
    pub fn api_base(&self) -> &'static str {
        match self {
            Environment::Demo => DEMO_API_BASE,
            Environment::Prod => PROD_API_BASE,
        }
    }

    /// WebSocket base URL for this environment.
    pub fn ws_base(&self) -> &'static str {
        match self {
            Environment::Demo => DEMO_WS_BASE,
            Environment::Prod => PROD_WS_BASE,
        }
    }
}

impl FromStr for Environment {
    type Err = KalshiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "demo" => Ok(Environment::Demo),
            "prod" => Ok(Environment::Prod),
            other => Err(KalshiError::Validation(format!(
                "invalid environment: {other} (expected demo or prod)"
            ))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Demo => write!(f, "demo"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

// ============================================================================
// WebSocket Subscription Command (Outbound)
// ============================================================================

/// Channel list carried by a subscribe command.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub channels: Vec<String>,
}

/// Subscribe command sent once after the connection opens. Fire-and-forget:
/// the adapter tracks no acknowledgment, only the monotonically increasing id.
///
/// Wire shape: `{"id": n, "cmd": "subscribe", "params": {"channels": [...]}}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribeCommand {
    pub id: u64,
    pub cmd: String,
    pub params: SubscribeParams,
}

impl SubscribeCommand {
    /// Build a subscribe command for the given channels.
    pub fn new(id: u64, channels: Vec<String>) -> Self {
        Self { id, cmd: "subscribe".to_string(), params: SubscribeParams { channels } }
    }
}

// ============================================================================
// WebSocket Inbound Envelope
// ============================================================================

/// Inbound stream message envelope. The `msg` payload stays raw JSON; the
/// channel-specific shape is the handler's business.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Message type, e.g. "ticker", "subscribed", "error"
    #[serde(rename = "type")]
    pub kind: String,

    /// Subscription id the message belongs to, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<u64>,

    /// Per-subscription sequence number, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// Channel payload
    #[serde(default)]
    pub msg: Value,

    /// Extra fields for forward compatibility
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
