//! Typed ledger access over a [`SigningProvider`].
//!
//! Wraps the raw JSON-RPC surface (`eth_getCode`, `eth_getLogs`, `eth_call`,
//! `eth_sendTransaction`, ...) with per-request timeouts and classified
//! errors. Every read here hits the authoritative tier.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256, U64};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::adapters::{parse_quantity, request_with_timeout, ProviderError, SigningProvider};
use crate::classifier::{classify, classify_submission};
use crate::error::{FortError, Result};

#[derive(Clone)]
pub struct Ledger {
    provider: Arc<dyn SigningProvider>,
    timeout: Duration,
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| FortError::Unknown {
        reason: format!("Malformed {} response: {}", method, e),
    })
}

fn quantity(n: u64) -> String {
    format!("{:#x}", n)
}

impl Ledger {
    pub fn new(provider: Arc<dyn SigningProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider(&self) -> &Arc<dyn SigningProvider> {
        &self.provider
    }

    async fn raw(&self, method: &str, params: Value) -> std::result::Result<Value, ProviderError> {
        request_with_timeout(self.provider.as_ref(), method, params, self.timeout).await
    }

    async fn read(&self, method: &str, params: Value) -> Result<Value> {
        self.raw(method, params).await.map_err(|e| classify(&e))
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let value = self.read("eth_chainId", json!([])).await?;
        parse_quantity(&value).ok_or_else(|| FortError::unknown("Malformed eth_chainId response"))
    }

    pub async fn block_number(&self) -> Result<u64> {
        let value = self.read("eth_blockNumber", json!([])).await?;
        parse_quantity(&value)
            .ok_or_else(|| FortError::unknown("Malformed eth_blockNumber response"))
    }

    pub async fn get_code(&self, address: Address) -> Result<Bytes> {
        let value = self.read("eth_getCode", json!([address, "latest"])).await?;
        decode("eth_getCode", value)
    }

    pub async fn get_balance(&self, address: Address) -> Result<U256> {
        let value = self.read("eth_getBalance", json!([address, "latest"])).await?;
        decode("eth_getBalance", value)
    }

    /// Logs emitted by `address` with `topic` as topic 0, in `[from, to]`.
    pub async fn get_logs(
        &self,
        address: Address,
        topic: H256,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>> {
        let filter = json!({
            "address": address,
            "fromBlock": quantity(from),
            "toBlock": quantity(to),
            "topics": [topic],
        });
        let value = self.read("eth_getLogs", json!([filter])).await?;
        decode("eth_getLogs", value)
    }

    /// Read-only call, optionally with an explicit caller.
    pub async fn call(&self, to: Address, data: &Bytes, from: Option<Address>) -> Result<Bytes> {
        let mut request = json!({ "to": to, "data": data });
        if let Some(from) = from {
            request["from"] = json!(from);
        }
        let value = self.read("eth_call", json!([request, "latest"])).await?;
        decode("eth_call", value)
    }

    /// Submit a state-changing call through the wallet.
    pub async fn send_transaction(&self, from: Address, to: Address, data: &Bytes) -> Result<H256> {
        let request = json!({ "from": from, "to": to, "data": data });
        let value = self
            .raw("eth_sendTransaction", json!([request]))
            .await
            .map_err(|e| classify_submission(&e))?;
        decode("eth_sendTransaction", value)
    }

    pub async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        let value = self.read("eth_getTransactionReceipt", json!([hash])).await?;
        if value.is_null() {
            return Ok(None);
        }
        decode("eth_getTransactionReceipt", value).map(Some)
    }

    /// Poll until the submission is included, or fail after `timeout`.
    ///
    /// A receipt with status 0 is a [`FortError::SubmissionFailed`].
    pub async fn wait_for_receipt(
        &self,
        hash: H256,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<TransactionReceipt> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status == Some(U64::zero()) {
                        return Err(FortError::SubmissionFailed {
                            reason: format!("Transaction {:#x} reverted", hash),
                        });
                    }
                    return Ok(receipt);
                }
                Ok(None) => {}
                // Receipt lookups are retried until the deadline.
                Err(e) if e.is_transient() => {
                    debug!(hash = %format!("{:#x}", hash), error = %e, "receipt poll failed")
                }
                Err(e) => return Err(e),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(FortError::FinalityTimeout {
                    hash: format!("{:#x}", hash),
                    timeout,
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
