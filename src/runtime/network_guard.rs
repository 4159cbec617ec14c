//! Network guard: keeps the active provider on the target chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::adapters::{parse_quantity, request_with_timeout, SigningProvider};
use crate::classifier::{classify, is_chain_unrecognized};
use crate::config::FortConfig;
use crate::error::{FortError, Result};

/// Outcome of a chain check or switch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStatus {
    OnTarget,
    /// The provider is on another chain (0 when unknown).
    Mismatched { current: u64 },
    /// Another caller is already switching; nothing was requested.
    SwitchInProgress,
}

impl ChainStatus {
    pub fn is_on_target(&self) -> bool {
        matches!(self, Self::OnTarget)
    }
}

/// Resets the in-flight flag when the switch attempt ends, however it ends.
struct SwitchFlag<'a>(&'a AtomicBool);

impl Drop for SwitchFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct NetworkGuard {
    config: Arc<FortConfig>,
    switching: AtomicBool,
}

impl NetworkGuard {
    pub fn new(config: Arc<FortConfig>) -> Self {
        Self {
            config,
            switching: AtomicBool::new(false),
        }
    }

    pub fn target_chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Whether a switch is currently being negotiated with the wallet.
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }

    /// Chain id reported by the provider, or 0 if it cannot be read in time.
    pub async fn current_chain_id(&self, provider: &dyn SigningProvider) -> u64 {
        let timeout = self.config.liveness_timeout;
        match request_with_timeout(provider, "eth_chainId", json!([]), timeout).await {
            Ok(value) => parse_quantity(&value).unwrap_or(0),
            Err(e) => {
                debug!(error = %e, "chain id unavailable");
                0
            }
        }
    }

    pub async fn status(&self, provider: &dyn SigningProvider) -> ChainStatus {
        let current = self.current_chain_id(provider).await;
        if current == self.config.chain_id {
            ChainStatus::OnTarget
        } else {
            ChainStatus::Mismatched { current }
        }
    }

    /// Make sure `provider` is on the target chain.
    ///
    /// Requests a switch, registering the chain first if the wallet does not
    /// know it. Concurrent callers get [`ChainStatus::SwitchInProgress`]
    /// instead of a second prompt. A failed registration is reported as
    /// [`crate::FortError::WrongNetwork`].
    pub async fn ensure_target_chain(&self, provider: &dyn SigningProvider) -> Result<ChainStatus> {
        // 1. Already there
        let current = self.current_chain_id(provider).await;
        if current == self.config.chain_id {
            return Ok(ChainStatus::OnTarget);
        }

        // 2. One negotiation at a time
        if self
            .switching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("chain switch already in progress");
            return Ok(ChainStatus::SwitchInProgress);
        }
        let _flag = SwitchFlag(&self.switching);

        info!(from = current, to = self.config.chain_id, "requesting chain switch");
        let switch_params = json!([{ "chainId": self.config.chain_id_hex() }]);
        let timeout = self.config.request_timeout;

        // 3. Switch, registering the chain if the wallet does not know it
        let switched = request_with_timeout(
            provider,
            "wallet_switchEthereumChain",
            switch_params.clone(),
            timeout,
        )
        .await;
        if let Err(e) = switched {
            if !is_chain_unrecognized(&e) {
                warn!(error = %e, "chain switch failed");
                return Err(classify(&e));
            }

            info!(chain_id = self.config.chain_id, "unknown chain, registering it");
            let add_params = json!([self.config.chain_params()]);
            let method = "wallet_addEthereumChain";
            let added = request_with_timeout(provider, method, add_params, timeout).await;
            if let Err(e) = added {
                warn!(error = %e, "chain registration failed");
                return Err(self.config.wrong_network());
            }
            request_with_timeout(provider, "wallet_switchEthereumChain", switch_params, timeout)
                .await
                .map_err(|e| classify(&e))?;
        }

        // 4. Trust only what the wallet reports afterwards
        let after = self.current_chain_id(provider).await;
        if after == self.config.chain_id {
            info!(chain_id = after, "on target chain");
            Ok(ChainStatus::OnTarget)
        } else {
            warn!(current = after, "still on the wrong chain after switching");
            Ok(ChainStatus::Mismatched { current: after })
        }
    }

    /// Like [`Self::ensure_target_chain`], but any outcome other than
    /// [`ChainStatus::OnTarget`] is an error. A switch already awaiting the
    /// user is reported as [`FortError::SwitchInProgress`], not as a wrong
    /// network.
    pub async fn require_target_chain(&self, provider: &dyn SigningProvider) -> Result<()> {
        match self.ensure_target_chain(provider).await? {
            ChainStatus::OnTarget => Ok(()),
            ChainStatus::SwitchInProgress => Err(FortError::SwitchInProgress),
            ChainStatus::Mismatched { current } => {
                debug!(current, "blocked by network");
                Err(self.config.wrong_network())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockChain;
    use std::time::Duration;

    fn guard() -> NetworkGuard {
        NetworkGuard::new(Arc::new(FortConfig::default()))
    }

    #[tokio::test]
    async fn test_on_target_is_noop() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[]);
        let status = guard().ensure_target_chain(wallet.as_ref()).await.unwrap();
        assert_eq!(status, ChainStatus::OnTarget);
        assert_eq!(wallet.count("wallet_switchEthereumChain"), 0);
    }

    #[tokio::test]
    async fn test_unknown_chain_is_registered_then_switched() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[]);
        wallet.set_chain_silently(999);
        wallet.forget_chain(chain.chain_id());

        let status = guard().ensure_target_chain(wallet.as_ref()).await.unwrap();
        assert_eq!(status, ChainStatus::OnTarget);
        assert_eq!(wallet.count("wallet_addEthereumChain"), 1);
        assert_eq!(wallet.count("wallet_switchEthereumChain"), 2);
    }

    #[tokio::test]
    async fn test_failed_registration_is_wrong_network() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[]);
        wallet.set_chain_silently(999);
        wallet.forget_chain(chain.chain_id());
        wallet.reject_add_chain(true);

        let guard = guard();
        let err = guard.ensure_target_chain(wallet.as_ref()).await.unwrap_err();
        assert!(matches!(err, FortError::WrongNetwork { chain_id: 5042002, .. }));
        assert!(!guard.is_switching());
    }

    #[tokio::test]
    async fn test_rejected_switch_is_classified() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[]);
        wallet.set_chain_silently(999);
        wallet.reject_next("wallet_switchEthereumChain");
        let err = guard().ensure_target_chain(wallet.as_ref()).await.unwrap_err();
        assert_eq!(err, FortError::UserRejected);
    }

    #[tokio::test]
    async fn test_concurrent_callers_do_not_double_prompt() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[]);
        wallet.set_chain_silently(999);
        wallet.delay("wallet_switchEthereumChain", Duration::from_millis(50));

        let guard = guard();
        let (a, b) = tokio::join!(
            guard.ensure_target_chain(wallet.as_ref()),
            guard.ensure_target_chain(wallet.as_ref())
        );
        let statuses = [a.unwrap(), b.unwrap()];
        assert!(statuses.contains(&ChainStatus::OnTarget));
        assert!(statuses.contains(&ChainStatus::SwitchInProgress));
        assert_eq!(wallet.count("wallet_switchEthereumChain"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requirement_reports_pending_switch() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[]);
        wallet.set_chain_silently(999);
        wallet.delay("wallet_switchEthereumChain", Duration::from_millis(50));

        let guard = guard();
        let (a, b) = tokio::join!(
            guard.require_target_chain(wallet.as_ref()),
            guard.require_target_chain(wallet.as_ref())
        );
        let outcomes = [a, b];
        assert!(outcomes.contains(&Ok(())));
        assert!(outcomes.contains(&Err(FortError::SwitchInProgress)));
        assert_eq!(wallet.count("wallet_switchEthereumChain"), 1);
    }

    #[tokio::test]
    async fn test_unreadable_chain_is_zero() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[]);
        wallet.busy_next("eth_chainId");
        assert_eq!(guard().current_chain_id(wallet.as_ref()).await, 0);
    }
}
