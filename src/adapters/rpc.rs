//! Direct read-only JSON-RPC endpoint.
//!
//! Used as the fallback read path when no wallet is connected. It has no
//! accounts and cannot sign, so wallet-only methods are rejected locally.

use async_trait::async_trait;
use ethers::providers::{Http, Provider, ProviderError as EthersProviderError, RpcError};
use serde_json::{json, Value};
use tracing::debug;

use crate::adapters::{ProviderError, SigningProvider};
use crate::error::{FortError, Result};

const WALLET_ONLY: &[&str] = &[
    "eth_requestAccounts",
    "eth_sendTransaction",
    "wallet_switchEthereumChain",
    "wallet_addEthereumChain",
];

pub struct HttpRpcProvider {
    inner: Provider<Http>,
    url: String,
}

impl HttpRpcProvider {
    pub fn new(url: &str) -> Result<Self> {
        let inner = Provider::<Http>::try_from(url).map_err(|e| FortError::Config {
            reason: format!("Invalid RPC URL {}: {}", url, e),
        })?;
        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn map_error(err: EthersProviderError) -> ProviderError {
    if let Some(resp) = err.as_error_response() {
        return ProviderError::Rpc(json!({
            "code": resp.code,
            "message": resp.message,
            "data": resp.data,
        }));
    }
    ProviderError::Transport(err.to_string())
}

#[async_trait]
impl SigningProvider for HttpRpcProvider {
    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, ProviderError> {
        if WALLET_ONLY.contains(&method) {
            return Err(ProviderError::Unsupported(method.to_string()));
        }
        if method == "eth_accounts" {
            return Ok(json!([]));
        }
        debug!(method, url = %self.url, "rpc request");
        self.inner
            .request::<Value, Value>(method, params)
            .await
            .map_err(map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_url() {
        assert!(matches!(HttpRpcProvider::new("not a url"), Err(FortError::Config { .. })));
        assert!(HttpRpcProvider::new("https://rpc.testnet.arc.network").is_ok());
    }

    #[tokio::test]
    async fn test_wallet_methods_are_local() {
        let rpc = HttpRpcProvider::new("http://127.0.0.1:1").unwrap();
        assert_eq!(rpc.request("eth_accounts", json!([])).await.unwrap(), json!([]));
        assert!(matches!(
            rpc.request("eth_sendTransaction", json!([])).await,
            Err(ProviderError::Unsupported(_))
        ));
    }
}
