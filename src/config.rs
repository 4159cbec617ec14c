//! Engine configuration.
//!
//! Defaults target the Arc testnet deployment of the safe factory. Individual
//! values can be overridden from the environment or loaded from JSON.

use std::str::FromStr;
use std::time::Duration;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FortError, Result};

/// Required chain id (Arc testnet).
pub const ARC_CHAIN_ID: u64 = 5_042_002;

/// Arc testnet public RPC endpoint
pub const ARC_RPC_URL: &str = "https://rpc.testnet.arc.network";

/// Arc testnet block explorer
pub const ARC_EXPLORER_BASE: &str = "https://testnet.arcscan.app";

/// Deployed safe factory on Arc testnet
pub const FACTORY_ADDRESS: &str = "0xd09B0e8c53354Bf0865940371FD6ff98874D1b89";

/// Smallest log window the scanner will use, whatever the configuration says.
pub const MIN_LOG_CHUNK: u64 = 2_000;

/// Environment variable overriding the direct RPC endpoint.
pub const ENV_RPC_URL: &str = "FORT_RPC_URL";
/// Environment variable overriding the explorer tx-URL prefix.
pub const ENV_EXPLORER_TX: &str = "FORT_EXPLORER_TX";
/// Environment variable overriding the factory genesis block.
pub const ENV_FACTORY_FROM_BLOCK: &str = "FORT_FACTORY_FROM_BLOCK";
/// Environment variable overriding the log chunk size.
pub const ENV_FACTORY_LOG_CHUNK: &str = "FORT_FACTORY_LOG_CHUNK";
/// Environment variable overriding the transaction probe cap.
pub const ENV_TX_PROBE_CAP: &str = "FORT_TX_PROBE_CAP";

/// Native currency descriptor handed to wallets on chain registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// `wallet_addEthereumChain` parameter object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainParams {
    pub chain_id: String,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    pub block_explorer_urls: Vec<String>,
}

/// Full engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FortConfig {
    pub chain_id: u64,
    pub chain_name: String,
    pub rpc_url: String,
    pub explorer_base: String,
    /// Prefix joined with a transaction hash to build explorer links.
    pub explorer_tx_prefix: String,
    pub native_currency: NativeCurrency,
    pub factory_address: Address,
    /// First block the discovery scanner looks at.
    pub factory_from_block: u64,
    pub log_chunk: u64,
    /// Confirmations required before execution is offered.
    pub threshold: u8,
    /// Hard upper bound on sequential transaction probing.
    pub tx_probe_cap: u64,
    /// Extra attempts per probed index on transient failures.
    pub probe_retries: u32,
    #[serde(with = "duration_ms")]
    pub liveness_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub receipt_poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub finality_timeout: Duration,
}

impl Default for FortConfig {
    fn default() -> Self {
        Self {
            chain_id: ARC_CHAIN_ID,
            chain_name: "Arc Testnet".to_string(),
            rpc_url: ARC_RPC_URL.to_string(),
            explorer_base: ARC_EXPLORER_BASE.to_string(),
            explorer_tx_prefix: format!("{}/tx/", ARC_EXPLORER_BASE),
            native_currency: NativeCurrency {
                name: "USDC".to_string(),
                symbol: "USDC".to_string(),
                decimals: 18,
            },
            factory_address: Address::from_str(FACTORY_ADDRESS).unwrap_or_default(),
            factory_from_block: 0,
            log_chunk: 35_000,
            threshold: 2,
            tx_probe_cap: 1_000,
            probe_retries: 1,
            liveness_timeout: Duration::from_secs(6),
            request_timeout: Duration::from_secs(25),
            receipt_poll_interval: Duration::from_secs(1),
            finality_timeout: Duration::from_secs(180),
        }
    }
}

impl FortConfig {
    /// Default configuration with environment overrides applied.
    ///
    /// Malformed numeric overrides are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var(ENV_RPC_URL) {
            if !url.trim().is_empty() {
                config.rpc_url = url.trim().to_string();
            }
        }
        if let Ok(prefix) = std::env::var(ENV_EXPLORER_TX) {
            if !prefix.trim().is_empty() {
                config.explorer_tx_prefix = prefix.trim().to_string();
            }
        }
        if let Some(v) = env_u64(ENV_FACTORY_FROM_BLOCK) {
            config.factory_from_block = v;
        }
        if let Some(v) = env_u64(ENV_FACTORY_LOG_CHUNK) {
            config.log_chunk = v;
        }
        if let Some(v) = env_u64(ENV_TX_PROBE_CAP) {
            config.tx_probe_cap = v;
        }

        config
    }

    /// Parse a JSON configuration document; missing fields take defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| FortError::Config {
            reason: format!("Invalid config JSON: {}", e),
        })
    }

    /// Chain id as the `0x`-prefixed hex string wallets expect.
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }

    /// Effective log window, floored at [`MIN_LOG_CHUNK`].
    pub fn effective_log_chunk(&self) -> u64 {
        self.log_chunk.max(MIN_LOG_CHUNK)
    }

    pub fn chain_params(&self) -> ChainParams {
        ChainParams {
            chain_id: self.chain_id_hex(),
            chain_name: self.chain_name.clone(),
            rpc_urls: vec![self.rpc_url.clone()],
            native_currency: self.native_currency.clone(),
            block_explorer_urls: vec![self.explorer_base.clone()],
        }
    }

    pub fn wrong_network(&self) -> FortError {
        FortError::WrongNetwork {
            network: self.chain_name.clone(),
            chain_id: self.chain_id,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(variable = name, value = %raw, error = %e, "ignoring malformed numeric override");
            None
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
