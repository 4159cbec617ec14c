//! Signing-provider and ledger adapters.
//!
//! A [`SigningProvider`] is the EIP-1193 style request/response surface of a
//! wallet. Everything else in the engine talks to the chain through it, either
//! directly or through the typed [`ledger::Ledger`] wrapper.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

pub mod contracts;
pub mod ledger;
pub mod mock;
pub mod registry;
pub mod rpc;

/// Notifications a provider may push to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<ethers::types::Address>),
    ChainChanged(u64),
}

/// Raw failure of a provider request, before classification.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderError {
    /// The request did not complete within the allotted time.
    Timeout(Duration),
    /// JSON-RPC style error object, in whatever shape the vendor produced.
    Rpc(Value),
    /// Transport-level failure (connection refused, malformed response).
    Transport(String),
    /// The provider does not implement the method.
    Unsupported(String),
}

impl ProviderError {
    /// Build an RPC error object from a code and message.
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc(serde_json::json!({ "code": code, "message": message.into() }))
    }
}

impl core::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout(d) => write!(f, "request timed out after {:?}", d),
            Self::Rpc(v) => write!(f, "rpc error: {}", v),
            Self::Transport(m) => write!(f, "transport error: {}", m),
            Self::Unsupported(m) => write!(f, "unsupported method: {}", m),
        }
    }
}

/// Descriptor a provider publishes when it announces itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub rdns: String,
}

/// Request/response interface of a wallet or RPC endpoint.
#[async_trait]
pub trait SigningProvider: Send + Sync {
    /// Perform one JSON-RPC request.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Subscribe to account and chain notifications, if supported.
    fn subscribe(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        None
    }

    /// Vendor capability flags (`isMetaMask`, `isRabby`, ...) set on the handle.
    fn capability_flags(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Race a request against a timeout.
pub async fn request_with_timeout(
    provider: &dyn SigningProvider,
    method: &str,
    params: Value,
    timeout: Duration,
) -> Result<Value, ProviderError> {
    match tokio::time::timeout(timeout, provider.request(method, params)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(method, ?timeout, "provider request timed out");
            Err(ProviderError::Timeout(timeout))
        }
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => {
            let body = s.trim().strip_prefix("0x").unwrap_or(s.trim());
            if body.is_empty() {
                return None;
            }
            u64::from_str_radix(body, 16).ok()
        }
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}
