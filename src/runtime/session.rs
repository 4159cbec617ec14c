//! Session manager.
//!
//! Owns the connected identity, the active provider and the observed chain.
//! Each bound state is published as an immutable [`SessionContext`] carrying a
//! generation number; loaders and actions capture a context and the runtime
//! discards their results if the generation moved on in the meantime.
//!
//! Provider notifications are forwarded into an inbox as
//! [`SessionMessage`]s. Handling a message re-derives the whole session from
//! the provider instead of patching the previous one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ethers::types::Address;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::ledger::Ledger;
use crate::adapters::registry::ProviderRegistry;
use crate::adapters::{request_with_timeout, ProviderEvent, SigningProvider};
use crate::cache::LocalCache;
use crate::classifier::classify;
use crate::config::FortConfig;
use crate::error::{FortError, Result};
use crate::runtime::discovery::{DiscoveryScanner, ScanReport};
use crate::runtime::network_guard::{ChainStatus, NetworkGuard};
use crate::types::Identity;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected { chain_ok: bool },
}

/// Inbox messages driving session re-derivation.
#[derive(Clone, Debug)]
pub enum SessionMessage {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    /// A background discovery scan finished.
    ScanFinished(std::result::Result<ScanReport, FortError>),
}

impl From<ProviderEvent> for SessionMessage {
    fn from(event: ProviderEvent) -> Self {
        match event {
            ProviderEvent::AccountsChanged(accounts) => Self::AccountsChanged(accounts),
            ProviderEvent::ChainChanged(chain_id) => Self::ChainChanged(chain_id),
        }
    }
}

/// One immutable version of the session.
#[derive(Clone)]
pub struct SessionContext {
    pub generation: u64,
    pub identity: Option<Identity>,
    pub provider_key: Option<String>,
    pub provider: Option<Arc<dyn SigningProvider>>,
    pub chain_id: u64,
    pub chain_ok: bool,
}

impl SessionContext {
    fn empty(generation: u64) -> Self {
        Self {
            generation,
            identity: None,
            provider_key: None,
            provider: None,
            chain_id: 0,
            chain_ok: false,
        }
    }

    pub fn state(&self) -> SessionState {
        match (&self.identity, &self.provider) {
            (Some(_), Some(_)) => SessionState::Connected {
                chain_ok: self.chain_ok,
            },
            _ => SessionState::Disconnected,
        }
    }

    /// Ledger access through the wallet, if one is bound.
    pub fn ledger(&self, config: &FortConfig) -> Option<Ledger> {
        self.provider
            .as_ref()
            .map(|p| Ledger::new(p.clone(), config.request_timeout))
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("generation", &self.generation)
            .field("identity", &self.identity)
            .field("provider_key", &self.provider_key)
            .field("chain_id", &self.chain_id)
            .field("chain_ok", &self.chain_ok)
            .finish()
    }
}

fn parse_accounts(value: &Value) -> Vec<Address> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|a| a.as_str())
                .filter_map(|a| a.parse::<Address>().ok())
                .collect()
        })
        .unwrap_or_default()
}

pub struct SessionManager {
    config: Arc<FortConfig>,
    registry: Arc<ProviderRegistry>,
    guard: Arc<NetworkGuard>,
    cache: LocalCache,
    scanner: Arc<DiscoveryScanner>,
    current: RwLock<Arc<SessionContext>>,
    connecting: AtomicBool,
    generation: AtomicU64,
    auto_switch_attempted: AtomicBool,
    inbox: mpsc::UnboundedSender<SessionMessage>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager and the receiving end of its inbox.
    pub fn new(
        config: Arc<FortConfig>,
        registry: Arc<ProviderRegistry>,
        guard: Arc<NetworkGuard>,
        cache: LocalCache,
        scanner: Arc<DiscoveryScanner>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionMessage>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            registry,
            guard,
            cache,
            scanner,
            current: RwLock::new(Arc::new(SessionContext::empty(0))),
            connecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            auto_switch_attempted: AtomicBool::new(false),
            inbox,
            forwarder: Mutex::new(None),
        };
        (manager, rx)
    }

    pub fn context(&self) -> Arc<SessionContext> {
        self.current
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether `ctx` is still the live session.
    pub fn is_current(&self, ctx: &SessionContext) -> bool {
        ctx.generation == self.generation()
    }

    pub fn state(&self) -> SessionState {
        if self.connecting.load(Ordering::SeqCst) {
            return SessionState::Connecting;
        }
        self.context().state()
    }

    /// Post a message to the inbox, as a provider notification would.
    pub fn post(&self, message: SessionMessage) {
        let _ = self.inbox.send(message);
    }

    fn publish(&self, mut ctx: SessionContext) -> Arc<SessionContext> {
        ctx.generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if ctx.chain_ok {
            // A new mismatch episode may auto-switch again.
            self.auto_switch_attempted.store(false, Ordering::SeqCst);
        }
        let ctx = Arc::new(ctx);
        match self.current.write() {
            Ok(mut current) => *current = ctx.clone(),
            Err(e) => *e.into_inner() = ctx.clone(),
        }
        debug!(
            generation = ctx.generation,
            identity = ?ctx.identity,
            chain_id = ctx.chain_id,
            "session published"
        );
        ctx
    }

    async fn authorized_accounts(&self, provider: &dyn SigningProvider) -> Vec<Address> {
        let timeout = self.config.liveness_timeout;
        match request_with_timeout(provider, "eth_accounts", json!([]), timeout).await {
            Ok(value) => parse_accounts(&value),
            Err(e) => {
                debug!(error = %e, "eth_accounts failed");
                Vec::new()
            }
        }
    }

    fn spawn_forwarder(&self, provider: &Arc<dyn SigningProvider>) {
        let handle = provider.subscribe().map(|mut rx| {
            let inbox = self.inbox.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if inbox.send(event.into()).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "provider notifications lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        });
        if let Ok(mut slot) = self.forwarder.lock() {
            if let Some(old) = slot.take() {
                old.abort();
            }
            *slot = handle;
        }
    }

    fn stop_forwarder(&self) {
        if let Ok(mut slot) = self.forwarder.lock() {
            if let Some(old) = slot.take() {
                old.abort();
            }
        }
    }

    /// Connect through the provider registered under `key`.
    ///
    /// Requests authorization if no account is granted yet, moves the wallet
    /// to the target chain, binds the session and starts a background
    /// discovery scan. On failure the previous session stays in place.
    pub async fn connect(&self, key: &str) -> Result<Arc<SessionContext>> {
        let provider = self.registry.get(key).ok_or(FortError::ProviderMissing)?;
        self.connecting.store(true, Ordering::SeqCst);
        let result = self.connect_inner(key, provider).await;
        self.connecting.store(false, Ordering::SeqCst);
        result
    }

    async fn connect_inner(
        &self,
        key: &str,
        provider: Arc<dyn SigningProvider>,
    ) -> Result<Arc<SessionContext>> {
        info!(key, "connecting wallet");

        // 1. At least one authorized account
        let mut accounts = self.authorized_accounts(provider.as_ref()).await;
        if accounts.is_empty() {
            let timeout = self.config.request_timeout;
            let value =
                request_with_timeout(provider.as_ref(), "eth_requestAccounts", json!([]), timeout)
                    .await
                    .map_err(|e| classify(&e))?;
            accounts = parse_accounts(&value);
        }
        let identity = accounts.first().copied().map(Identity::new).ok_or(FortError::NotConnected)?;

        // 2. Target chain
        self.guard.require_target_chain(provider.as_ref()).await?;
        let chain_id = self.guard.current_chain_id(provider.as_ref()).await;

        // 3. Bind
        let ctx = self.publish(SessionContext {
            generation: 0,
            identity: Some(identity),
            provider_key: Some(key.to_string()),
            provider: Some(provider.clone()),
            chain_id,
            chain_ok: chain_id == self.config.chain_id,
        });
        self.cache.set_provider_key(key);
        self.spawn_forwarder(&provider);
        info!(identity = %identity, chain_id, "wallet connected");

        // 4. Discovery runs in the background
        self.spawn_scan(&ctx);
        Ok(ctx)
    }

    /// Re-bind the previously chosen provider without prompting.
    ///
    /// Returns `Ok(None)` when there is nothing to restore or the wallet no
    /// longer grants an account.
    pub async fn restore(&self) -> Result<Option<Arc<SessionContext>>> {
        let Some(key) = self.cache.provider_key() else {
            return Ok(None);
        };
        let Some(provider) = self.registry.get(&key) else {
            debug!(key = %key, "remembered provider is not available");
            return Ok(None);
        };
        let accounts = self.authorized_accounts(provider.as_ref()).await;
        let Some(identity) = accounts.first().copied().map(Identity::new) else {
            return Ok(None);
        };
        let chain_id = self.guard.current_chain_id(provider.as_ref()).await;

        let ctx = self.publish(SessionContext {
            generation: 0,
            identity: Some(identity),
            provider_key: Some(key.clone()),
            provider: Some(provider.clone()),
            chain_id,
            chain_ok: chain_id == self.config.chain_id,
        });
        self.spawn_forwarder(&provider);
        info!(identity = %identity, chain_id, key = %key, "session restored");
        if ctx.chain_ok {
            self.spawn_scan(&ctx);
        }
        Ok(Some(ctx))
    }

    /// Drop the session. Always safe to call.
    pub fn disconnect(&self) -> Arc<SessionContext> {
        self.stop_forwarder();
        self.cache.clear_provider_key();
        self.auto_switch_attempted.store(false, Ordering::SeqCst);
        info!("wallet disconnected");
        self.publish(SessionContext::empty(0))
    }

    /// Rebuild the session from the provider after a notification.
    pub async fn rederive(&self, message: &SessionMessage) -> Arc<SessionContext> {
        let previous = self.context();
        let Some(provider) = previous.provider.clone() else {
            debug!(?message, "notification without a bound provider");
            return previous;
        };

        let accounts = self.authorized_accounts(provider.as_ref()).await;
        let chain_id = self.guard.current_chain_id(provider.as_ref()).await;
        let identity = accounts.first().copied().map(Identity::new);

        info!(?message, identity = ?identity, chain_id, "re-deriving session");
        let ctx = self.publish(SessionContext {
            generation: 0,
            identity,
            provider_key: previous.provider_key.clone(),
            provider: Some(provider),
            chain_id,
            chain_ok: chain_id == self.config.chain_id,
        });
        if ctx.identity.is_some() && ctx.chain_ok {
            self.spawn_scan(&ctx);
        }
        ctx
    }

    /// Try to move a mismatched wallet back once per mismatch episode.
    ///
    /// Returns `None` when no attempt was made.
    pub async fn maybe_auto_switch(&self) -> Option<Result<ChainStatus>> {
        let ctx = self.context();
        let provider = ctx.provider.clone()?;
        if ctx.identity.is_none() || ctx.chain_ok || self.guard.is_switching() {
            return None;
        }
        if self
            .auto_switch_attempted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        info!(chain_id = ctx.chain_id, "attempting automatic chain switch");
        Some(self.guard.ensure_target_chain(provider.as_ref()).await)
    }

    fn spawn_scan(&self, ctx: &SessionContext) {
        let (Some(identity), Some(ledger)) = (ctx.identity, ctx.ledger(&self.config)) else {
            return;
        };
        let scanner = self.scanner.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = scanner.scan(&identity, &ledger).await;
            let _ = inbox.send(SessionMessage::ScanFinished(result));
        });
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_forwarder();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockChain;

    fn manager(
        registry: Arc<ProviderRegistry>,
    ) -> (SessionManager, mpsc::UnboundedReceiver<SessionMessage>) {
        let config = Arc::new(FortConfig::default());
        let cache = LocalCache::in_memory();
        let scanner = Arc::new(DiscoveryScanner::new(config.clone(), cache.clone()));
        SessionManager::new(
            config.clone(),
            registry,
            Arc::new(NetworkGuard::new(config)),
            cache,
            scanner,
        )
    }

    #[tokio::test]
    async fn test_connect_requests_authorization_once() {
        let chain = MockChain::default();
        let me = Address::repeat_byte(0x0a);
        let wallet = chain.wallet(&[me]);
        let registry = Arc::new(ProviderRegistry::new());
        let key = registry.inject(wallet.clone());
        let (session, _rx) = manager(registry);

        let ctx = session.connect(&key).await.unwrap();
        assert_eq!(ctx.identity, Some(Identity::new(me)));
        assert!(ctx.chain_ok);
        assert_eq!(session.state(), SessionState::Connected { chain_ok: true });
        assert_eq!(wallet.count("eth_requestAccounts"), 1);
    }

    #[tokio::test]
    async fn test_connect_during_pending_switch_is_not_wrong_network() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[Address::repeat_byte(0x0a)]);
        wallet.set_chain_silently(999);
        wallet.delay("wallet_switchEthereumChain", std::time::Duration::from_millis(50));
        let registry = Arc::new(ProviderRegistry::new());
        let key = registry.inject(wallet.clone());
        let (session, _rx) = manager(registry);

        let (a, b) = tokio::join!(session.connect(&key), session.connect(&key));
        let errors: Vec<FortError> = [a, b].into_iter().filter_map(|r| r.err()).collect();
        assert_eq!(errors, vec![FortError::SwitchInProgress]);
        assert_eq!(wallet.count("wallet_switchEthereumChain"), 1);
    }

    #[tokio::test]
    async fn test_connect_with_missing_provider() {
        let (session, _rx) = manager(Arc::new(ProviderRegistry::new()));
        assert_eq!(session.connect("metamask").await.unwrap_err(), FortError::ProviderMissing);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rejected_authorization_keeps_prior_state() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[Address::repeat_byte(1)]);
        wallet.reject_next("eth_requestAccounts");
        let registry = Arc::new(ProviderRegistry::new());
        let key = registry.inject(wallet);
        let (session, _rx) = manager(registry);

        let before = session.generation();
        assert_eq!(session.connect(&key).await.unwrap_err(), FortError::UserRejected);
        assert_eq!(session.generation(), before);
        assert!(session.context().identity.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_bumps_generation_and_forgets_key() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[Address::repeat_byte(1)]);
        let registry = Arc::new(ProviderRegistry::new());
        let key = registry.inject(wallet);
        let (session, _rx) = manager(registry);

        let ctx = session.connect(&key).await.unwrap();
        assert_eq!(session.cache.provider_key(), Some(key));
        let after = session.disconnect();
        assert!(after.generation > ctx.generation);
        assert!(!session.is_current(&ctx));
        assert!(after.identity.is_none());
        assert!(session.cache.provider_key().is_none());
    }

    #[tokio::test]
    async fn test_restore_never_prompts() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[Address::repeat_byte(1)]);
        let registry = Arc::new(ProviderRegistry::new());
        let key = registry.inject(wallet.clone());
        let (session, _rx) = manager(registry);
        session.cache.set_provider_key(&key);

        assert!(session.restore().await.unwrap().is_none());
        assert_eq!(wallet.count("eth_requestAccounts"), 0);

        wallet.authorize();
        let ctx = session.restore().await.unwrap().unwrap();
        assert_eq!(ctx.identity, Some(Identity::new(Address::repeat_byte(1))));
        assert_eq!(wallet.count("eth_requestAccounts"), 0);
    }

    #[tokio::test]
    async fn test_chain_change_is_rederived_and_forwarded() {
        let chain = MockChain::default();
        let wallet = chain.wallet(&[Address::repeat_byte(1)]);
        let registry = Arc::new(ProviderRegistry::new());
        let key = registry.inject(wallet.clone());
        let (session, mut rx) = manager(registry);
        session.connect(&key).await.unwrap();

        wallet.set_chain(999);
        let message = loop {
            match rx.recv().await.unwrap() {
                SessionMessage::ScanFinished(_) => continue,
                other => break other,
            }
        };
        assert!(matches!(message, SessionMessage::ChainChanged(999)));

        let ctx = session.rederive(&message).await;
        assert_eq!(ctx.chain_id, 999);
        assert_eq!(session.state(), SessionState::Connected { chain_ok: false });

        // One automatic attempt per episode
        assert_eq!(session.maybe_auto_switch().await, Some(Ok(ChainStatus::OnTarget)));
        assert!(session.maybe_auto_switch().await.is_none());
    }
}
