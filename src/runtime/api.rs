//! Runtime facade.
//!
//! [`SafeRuntime`] wires the session manager, discovery scanner, loader and
//! action controller together and publishes one observable [`RuntimeView`].
//! Every result that reaches the view was computed against the session
//! generation that is still current; anything older is dropped.

use std::sync::{Arc, Mutex, Weak};

use ethers::types::{Address, H256};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::adapters::registry::{ProviderListing, ProviderRegistry, WalletOption};
use crate::adapters::SigningProvider;
use crate::cache::LocalCache;
use crate::config::FortConfig;
use crate::error::{FortError, Result};
use crate::runtime::actions::{ActionController, ActionReceipt};
use crate::runtime::discovery::{DiscoveryScanner, ScanReport};
use crate::runtime::loader::{NameResolver, SafeStateLoader};
use crate::runtime::network_guard::{ChainStatus, NetworkGuard};
use crate::runtime::session::{SessionContext, SessionManager, SessionMessage, SessionState};
use crate::types::{
    AccessState, Advisory, Identity, Message, PendingAction, SafeRecord, SafeSession, OWNER_COUNT,
};
use crate::utils::{normalize_address, parse_address, tx_url};

/// Latest message per UI area.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Messages {
    pub connection: Option<Message>,
    pub safe_load: Option<Message>,
    pub tx_action: Option<Message>,
}

/// Everything an interface needs to render.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeView {
    pub state: SessionState,
    pub identity: Option<Identity>,
    pub provider_key: Option<String>,
    pub chain_id: u64,
    pub chain_ok: bool,
    pub generation: u64,
    /// The identity's safe collection, hidden entries included.
    pub safes: Vec<SafeRecord>,
    pub safe: Option<SafeSession>,
    pub loading: bool,
    pub scanning: bool,
    pub pending: Vec<PendingAction>,
    pub messages: Messages,
}

struct Inner {
    config: Arc<FortConfig>,
    cache: LocalCache,
    registry: Arc<ProviderRegistry>,
    scanner: Arc<DiscoveryScanner>,
    session: SessionManager,
    loader: SafeStateLoader,
    actions: ActionController,
    view: Arc<watch::Sender<RuntimeView>>,
    loaded: Mutex<Option<Address>>,
    names: Option<Arc<dyn NameResolver>>,
}

/// Configures and starts a [`SafeRuntime`].
pub struct RuntimeBuilder {
    config: FortConfig,
    registry: Arc<ProviderRegistry>,
    cache: Option<LocalCache>,
    fallback: Option<Arc<dyn SigningProvider>>,
    names: Option<Arc<dyn NameResolver>>,
}

impl RuntimeBuilder {
    pub fn cache(mut self, cache: LocalCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Read path used for loads while no wallet is connected.
    pub fn fallback_reader(mut self, provider: Arc<dyn SigningProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn name_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.names = Some(resolver);
        self
    }

    /// Build the runtime and start processing provider notifications.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> SafeRuntime {
        let config = Arc::new(self.config);
        let cache = self.cache.unwrap_or_else(LocalCache::in_memory);
        let guard = Arc::new(NetworkGuard::new(config.clone()));
        let scanner = Arc::new(DiscoveryScanner::new(config.clone(), cache.clone()));
        let (view, _) = watch::channel(RuntimeView::default());
        let view = Arc::new(view);

        let (session, inbox) = SessionManager::new(
            config.clone(),
            self.registry.clone(),
            guard.clone(),
            cache.clone(),
            scanner.clone(),
        );
        let loader =
            SafeStateLoader::new(config.clone(), cache.clone(), guard.clone(), self.fallback);
        let listener_view = view.clone();
        let actions = ActionController::new(config.clone(), cache.clone(), guard, scanner.clone())
            .with_listener(Arc::new(move |pending| {
                listener_view.send_modify(|v| v.pending = pending)
            }));

        let inner = Arc::new(Inner {
            config,
            cache,
            registry: self.registry,
            scanner,
            session,
            loader,
            actions,
            view,
            loaded: Mutex::new(None),
            names: self.names,
        });
        spawn_inbox(Arc::downgrade(&inner), inbox);
        SafeRuntime { inner }
    }
}

fn spawn_inbox(inner: Weak<Inner>, mut inbox: mpsc::UnboundedReceiver<SessionMessage>) {
    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            SafeRuntime { inner }.handle_message(message).await;
        }
        debug!("session inbox closed");
    });
}

#[derive(Clone)]
pub struct SafeRuntime {
    inner: Arc<Inner>,
}

impl SafeRuntime {
    pub fn builder(config: FortConfig, registry: Arc<ProviderRegistry>) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            registry,
            cache: None,
            fallback: None,
            names: None,
        }
    }

    pub fn config(&self) -> &FortConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> watch::Receiver<RuntimeView> {
        self.inner.view.subscribe()
    }

    pub fn view(&self) -> RuntimeView {
        self.inner.view.borrow().clone()
    }

    pub fn wallet_options(&self) -> Vec<WalletOption> {
        self.inner.registry.wallet_options()
    }

    pub fn providers(&self) -> Vec<ProviderListing> {
        self.inner.registry.list_available()
    }

    /// Explorer link for a submitted transaction.
    pub fn tx_url(&self, hash: &H256) -> String {
        tx_url(&self.inner.config.explorer_tx_prefix, &format!("{:#x}", hash))
    }

    fn loaded(&self) -> Option<Address> {
        self.inner.loaded.lock().map(|l| *l).unwrap_or(None)
    }

    fn set_loaded(&self, address: Option<Address>) {
        if let Ok(mut loaded) = self.inner.loaded.lock() {
            *loaded = address;
        }
    }

    fn modify(&self, f: impl FnOnce(&mut RuntimeView)) {
        self.inner.view.send_modify(f);
    }

    fn publish_context(&self, ctx: &SessionContext) {
        let safes = ctx.identity.map(|id| self.inner.cache.records(&id)).unwrap_or_default();
        let scanning = ctx.identity.map(|id| self.inner.scanner.is_scanning(&id)).unwrap_or(false);
        let state = self.inner.session.state();
        self.modify(|v| {
            v.state = state;
            v.identity = ctx.identity;
            v.provider_key = ctx.provider_key.clone();
            v.chain_id = ctx.chain_id;
            v.chain_ok = ctx.chain_ok;
            v.generation = ctx.generation;
            v.safes = safes;
            v.scanning = scanning;
        });
    }

    fn refresh_safes(&self) {
        let ctx = self.inner.session.context();
        let safes = ctx.identity.map(|id| self.inner.cache.records(&id)).unwrap_or_default();
        self.modify(|v| v.safes = safes);
    }

    fn identity(&self) -> Result<Identity> {
        self.inner.session.context().identity.ok_or(FortError::NotConnected)
    }

    // Session

    /// Connect the provider registered under `key`.
    pub async fn connect(&self, key: &str) -> Result<()> {
        self.modify(|v| {
            v.state = SessionState::Connecting;
            v.messages.connection = None;
        });
        match self.inner.session.connect(key).await {
            Ok(ctx) => {
                self.publish_context(&ctx);
                if self.loaded().is_some() {
                    let _ = self.reload_with(ctx).await;
                }
                Ok(())
            }
            Err(e) => {
                warn!(key, error = %e, "connect failed");
                let state = self.inner.session.state();
                self.modify(|v| {
                    v.state = state;
                    v.messages.connection = Some(Message::error(&e));
                });
                Err(e)
            }
        }
    }

    /// Silently re-bind the last used provider. Returns whether a session
    /// was restored.
    pub async fn restore(&self) -> Result<bool> {
        match self.inner.session.restore().await? {
            Some(ctx) => {
                self.publish_context(&ctx);
                if !ctx.chain_ok {
                    let err = self.inner.config.wrong_network();
                    self.modify(|v| v.messages.connection = Some(Message::error(&err)));
                }
                if self.loaded().is_some() {
                    let _ = self.reload_with(ctx).await;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Clear the session. The open safe stays addressable without any
    /// owner-scoped data.
    pub fn disconnect(&self) {
        let ctx = self.inner.session.disconnect();
        let cleared = self.loaded().map(|a| SafeSession::cleared(a, AccessState::None));
        self.publish_context(&ctx);
        self.modify(|v| {
            v.safe = cleared;
            v.loading = false;
            v.messages = Messages::default();
        });
    }

    async fn handle_message(&self, message: SessionMessage) {
        if let SessionMessage::ScanFinished(result) = message {
            match result {
                Ok(report) if !report.skipped => {
                    debug!(discovered = report.discovered.len(), "background scan done")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "background scan failed"),
            }
            self.refresh_safes();
            let ctx = self.inner.session.context();
            let scanning = ctx
                .identity
                .map(|id| self.inner.scanner.is_scanning(&id))
                .unwrap_or(false);
            self.modify(|v| v.scanning = scanning);
            return;
        }

        let mut ctx = self.inner.session.rederive(&message).await;
        self.publish_context(&ctx);

        if ctx.identity.is_some() && !ctx.chain_ok {
            match self.inner.session.maybe_auto_switch().await {
                Some(Ok(ChainStatus::OnTarget)) => {
                    ctx = self.inner.session.rederive(&message).await;
                    self.publish_context(&ctx);
                }
                Some(Ok(status)) => debug!(?status, "automatic switch did not complete"),
                Some(Err(e)) => warn!(error = %e, "automatic switch failed"),
                None => {}
            }
        }

        let connection = (ctx.identity.is_some() && !ctx.chain_ok)
            .then(|| Message::error(&self.inner.config.wrong_network()));
        self.modify(|v| v.messages.connection = connection);

        if self.loaded().is_some() {
            let _ = self.reload_with(ctx).await;
        }
    }

    // Loading

    /// Open (and, for owners, import) a safe by address.
    pub async fn open_safe(&self, raw: &str) -> Result<SafeSession> {
        if let Some(address) = normalize_address(raw) {
            self.set_loaded(Some(address));
        }
        let ctx = self.inner.session.context();
        self.load_with(raw, ctx).await
    }

    /// Same as [`Self::open_safe`]; owners get the safe added to their
    /// collection.
    pub async fn import_safe(&self, raw: &str) -> Result<SafeSession> {
        self.open_safe(raw).await
    }

    /// Reload the open safe with the current session.
    pub async fn reload(&self) -> Result<SafeSession> {
        let ctx = self.inner.session.context();
        self.reload_with(ctx).await
    }

    async fn reload_with(&self, ctx: Arc<SessionContext>) -> Result<SafeSession> {
        let address = self.loaded().ok_or(FortError::NoSafeOpen)?;
        self.load_with(&format!("{:#x}", address), ctx).await
    }

    fn is_fresh(&self, ctx: &SessionContext, address: Option<Address>) -> bool {
        self.inner.session.is_current(ctx) && (address.is_none() || self.loaded() == address)
    }

    async fn load_with(&self, raw: &str, ctx: Arc<SessionContext>) -> Result<SafeSession> {
        self.modify(|v| {
            v.loading = true;
            v.messages.safe_load = None;
        });

        let inner = self.inner.clone();
        let generation = ctx.generation;
        let on_checking = move |checking: &SafeSession| {
            let current = inner.session.generation() == generation
                && inner.loaded.lock().map(|l| *l == Some(checking.address)).unwrap_or(false);
            if current {
                inner.view.send_modify(|v| v.safe = Some(checking.clone()));
            }
        };
        let outcome = self.inner.loader.load(raw, &ctx, &on_checking).await;

        if !self.is_fresh(&ctx, outcome.address) {
            debug!(generation, "discarding stale load");
            return match (outcome.error, outcome.session) {
                (Some(e), _) => Err(e),
                (None, Some(session)) => Ok(session),
                (None, None) => Err(FortError::NoSafeOpen),
            };
        }

        let message = outcome.error.as_ref().map(Message::error);
        let session = outcome.session.clone();
        self.modify(|v| {
            v.loading = false;
            v.messages.safe_load = message;
            if let Some(session) = session {
                v.safe = Some(session);
            }
        });
        self.refresh_safes();

        if let (Some(address), true) = (outcome.address, outcome.needs_name) {
            self.spawn_name_lookup(address, generation);
        }

        match (outcome.error, outcome.session) {
            (Some(e), _) => Err(e),
            (None, Some(session)) => Ok(session),
            (None, None) => Err(FortError::NoSafeOpen),
        }
    }

    fn spawn_name_lookup(&self, safe: Address, generation: u64) {
        let Some(resolver) = self.inner.names.clone() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let Some(name) = resolver.resolve(safe).await else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.cache.name(&safe).is_some() {
                return;
            }
            inner.cache.set_name(&safe, &name);
            let runtime = SafeRuntime { inner };
            runtime.refresh_safes();
            if runtime.inner.session.generation() != generation {
                return;
            }
            runtime.modify(|v| {
                let unnamed = v.safe.as_mut().filter(|s| s.address == safe && s.name.is_none());
                if let Some(session) = unnamed {
                    session.name = Some(Advisory::new(name));
                }
            });
        });
    }

    // Actions

    fn current_safe(&self) -> Option<SafeSession> {
        let loaded = self.loaded()?;
        self.inner.view.borrow().safe.clone().filter(|s| s.address == loaded)
    }

    fn report_action(
        &self,
        result: &Result<ActionReceipt>,
        text: impl FnOnce(&ActionReceipt) -> String,
    ) {
        let message = match result {
            Ok(receipt) => Message::ok_with_hash(text(receipt), receipt.hash),
            Err(e) => Message::error(e),
        };
        self.modify(|v| v.messages.tx_action = Some(message));
    }

    async fn reload_after(&self, ctx: &SessionContext) {
        if self.inner.session.is_current(ctx) {
            let _ = self.reload().await;
        }
    }

    /// Deploy a new safe and open it.
    pub async fn create_safe(
        &self,
        name: Option<&str>,
        owners: [&str; OWNER_COUNT],
    ) -> Result<ActionReceipt> {
        let ctx = self.inner.session.context();
        let result = self.inner.actions.create_safe(&ctx, &owners, name).await;
        self.report_action(&result, |_| "Safe created".to_string());

        if let Ok(receipt) = &result {
            self.refresh_safes();
            if let Some(safe) = receipt.safe {
                if self.inner.session.is_current(&ctx) {
                    self.set_loaded(Some(safe));
                    let _ = self.reload().await;
                }
            }
        }
        result
    }

    /// Propose a transfer of `amount` native units from the open safe.
    pub async fn create_transfer(&self, to: &str, amount: &str) -> Result<ActionReceipt> {
        let ctx = self.inner.session.context();
        let session = self.current_safe();
        let result = self.inner.actions.create_transfer(&ctx, session.as_ref(), to, amount).await;
        self.report_action(&result, |_| "Transaction created".to_string());
        if result.is_ok() {
            self.reload_after(&ctx).await;
        }
        result
    }

    pub async fn confirm(&self, id: u64) -> Result<ActionReceipt> {
        let ctx = self.inner.session.context();
        let session = self.current_safe();
        let result = self.inner.actions.confirm(&ctx, session.as_ref(), id).await;
        self.report_action(&result, |r| format!("TX {} confirmed", r.tx_id.unwrap_or(id)));
        if result.is_ok() {
            self.reload_after(&ctx).await;
        }
        result
    }

    pub async fn execute(&self, id: u64) -> Result<ActionReceipt> {
        let ctx = self.inner.session.context();
        let session = self.current_safe();
        let result = self.inner.actions.execute(&ctx, session.as_ref(), id).await;
        self.report_action(&result, |r| format!("TX {} executed", r.tx_id.unwrap_or(id)));
        if result.is_ok() {
            self.reload_after(&ctx).await;
        }
        result
    }

    // Collection

    /// Scan for owned safes now and wait for the result.
    pub async fn sync_safes(&self) -> Result<ScanReport> {
        let ctx = self.inner.session.context();
        let identity = ctx.identity.ok_or(FortError::NotConnected)?;
        let ledger = ctx.ledger(&self.inner.config).ok_or(FortError::ProviderMissing)?;
        self.modify(|v| v.scanning = true);
        let result = self.inner.scanner.scan(&identity, &ledger).await;
        let scanning = self.inner.scanner.is_scanning(&identity);
        self.refresh_safes();
        self.modify(|v| v.scanning = scanning);
        result
    }

    /// Safes in the collection matching `query` by address or name.
    pub fn list_safes(&self, query: &str, include_hidden: bool) -> Vec<SafeRecord> {
        let Some(identity) = self.inner.session.context().identity else {
            return Vec::new();
        };
        let query = query.trim().to_lowercase();
        self.inner
            .cache
            .records(&identity)
            .into_iter()
            .filter(|r| include_hidden || !r.hidden)
            .filter(|r| {
                query.is_empty()
                    || format!("{:#x}", r.address).contains(&query)
                    || r.cached_name
                        .as_ref()
                        .map(|n| n.value().to_lowercase().contains(&query))
                        .unwrap_or(false)
            })
            .collect()
    }

    /// Set or clear (with an empty name) a safe's display name.
    pub fn rename_safe(&self, raw: &str, name: &str) -> Result<()> {
        let address = parse_address(raw, "safe")?;
        self.inner.cache.set_name(&address, name);
        let name = self.inner.cache.name(&address);
        self.refresh_safes();
        self.modify(|v| {
            let owned = v
                .safe
                .as_mut()
                .filter(|s| s.address == address && s.access == AccessState::Owner);
            if let Some(session) = owned {
                session.name = name;
            }
        });
        Ok(())
    }

    /// Drop a safe from the collection; closes it if it is open.
    pub fn remove_safe(&self, raw: &str) -> Result<bool> {
        let identity = self.identity()?;
        let address = parse_address(raw, "safe")?;
        let removed = self.inner.cache.remove_safe(&identity, &address);
        if self.loaded() == Some(address) {
            self.set_loaded(None);
            self.modify(|v| {
                v.safe = None;
                v.messages.safe_load = None;
            });
        }
        self.refresh_safes();
        info!(safe = %address, removed, "safe removed");
        Ok(removed)
    }

    pub fn hide_safe(&self, raw: &str) -> Result<()> {
        self.set_hidden(raw, true)
    }

    pub fn unhide_safe(&self, raw: &str) -> Result<()> {
        self.set_hidden(raw, false)
    }

    fn set_hidden(&self, raw: &str, hidden: bool) -> Result<()> {
        let identity = self.identity()?;
        let address = parse_address(raw, "safe")?;
        self.inner.cache.set_hidden(&identity, address, hidden);
        self.refresh_safes();
        Ok(())
    }
}
