//! Provider registry.
//!
//! Collects signing providers from two sources: passive announcements
//! (EIP-6963 style, answered asynchronously after a discovery request) and
//! ambient injection (a single or multi-provider object present at startup).
//! Each provider is bound under a best-effort canonical key from a fixed
//! wallet catalog; unmatched providers stay usable under a generated key.
//!
//! The registry makes no network calls and never fails: an unknown key is
//! simply `None`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info};

use crate::adapters::{ProviderInfo, SigningProvider};

/// Wallets the registry knows how to label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum WalletId {
    MetaMask,
    Rabby,
    Coinbase,
    Binance,
    Phantom,
    Zerion,
    Rainbow,
    Trust,
    Okx,
}

impl WalletId {
    /// Catalog order.
    pub const ALL: [WalletId; 9] = [
        Self::MetaMask,
        Self::Rabby,
        Self::Coinbase,
        Self::Binance,
        Self::Phantom,
        Self::Zerion,
        Self::Rainbow,
        Self::Trust,
        Self::Okx,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::MetaMask => "metamask",
            Self::Rabby => "rabby",
            Self::Coinbase => "coinbase",
            Self::Binance => "binance",
            Self::Phantom => "phantom",
            Self::Zerion => "zerion",
            Self::Rainbow => "rainbow",
            Self::Trust => "trust",
            Self::Okx => "okx",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MetaMask => "MetaMask",
            Self::Rabby => "Rabby Wallet",
            Self::Coinbase => "Coinbase Wallet",
            Self::Binance => "Binance Wallet",
            Self::Phantom => "Phantom",
            Self::Zerion => "Zerion",
            Self::Rainbow => "Rainbow",
            Self::Trust => "Trust Wallet",
            Self::Okx => "OKX Wallet",
        }
    }

    /// Match an announcement descriptor by substring of rdns and name.
    pub fn from_descriptor(info: &ProviderInfo) -> Option<Self> {
        let haystack = format!("{} {}", info.rdns, info.name).to_lowercase();
        let needles: [(&str, Self); 9] = [
            ("metamask", Self::MetaMask),
            ("rabby", Self::Rabby),
            ("coinbase", Self::Coinbase),
            ("binance", Self::Binance),
            ("phantom", Self::Phantom),
            ("zerion", Self::Zerion),
            ("rainbow", Self::Rainbow),
            ("trust", Self::Trust),
            ("okx", Self::Okx),
        ];
        needles
            .iter()
            .find(|(needle, _)| haystack.contains(needle))
            .map(|(_, id)| *id)
            .or_else(|| haystack.contains("okex").then_some(Self::Okx))
    }

    /// Match an injected provider by its vendor flags.
    ///
    /// Rabby also sets `isMetaMask`, so it is checked first.
    pub fn from_flags(flags: &[String]) -> Option<Self> {
        let has = |name: &str| flags.iter().any(|f| f == name);
        if has("isRabby") {
            Some(Self::Rabby)
        } else if has("isMetaMask") {
            Some(Self::MetaMask)
        } else if has("isCoinbaseWallet") {
            Some(Self::Coinbase)
        } else if has("isBinance") || has("isBinanceWallet") {
            Some(Self::Binance)
        } else if has("isPhantom") {
            Some(Self::Phantom)
        } else if has("isZerion") {
            Some(Self::Zerion)
        } else if has("isRainbow") {
            Some(Self::Rainbow)
        } else if has("isTrust") || has("isTrustWallet") {
            Some(Self::Trust)
        } else if has("isOKXWallet") || has("isOkxWallet") {
            Some(Self::Okx)
        } else {
            None
        }
    }
}

/// Environment hook for provider discovery.
pub trait DiscoveryHost: Send + Sync {
    /// Broadcast a discovery request. Providers answer later through
    /// [`ProviderRegistry::announce`] on the registry passed in.
    fn request_providers(&self, registry: Arc<ProviderRegistry>);

    /// Providers injected into the environment, read synchronously.
    fn injected_providers(&self) -> Vec<Arc<dyn SigningProvider>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ProviderSource {
    Announced,
    Injected,
}

struct Entry {
    key: String,
    provider: Arc<dyn SigningProvider>,
    info: Option<ProviderInfo>,
    wallet: Option<WalletId>,
    source: ProviderSource,
}

/// One usable provider as shown to the UI collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProviderListing {
    pub key: String,
    pub wallet: Option<WalletId>,
    pub name: String,
    pub source: ProviderSource,
}

/// Catalog row with availability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WalletOption {
    pub id: WalletId,
    pub name: &'static str,
    pub available: bool,
}

fn same_provider(a: &Arc<dyn SigningProvider>, b: &Arc<dyn SigningProvider>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<Vec<Entry>>,
    injected_seq: AtomicUsize,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry and run discovery against `host`: injected providers
    /// are read immediately, then a discovery request is broadcast.
    pub fn discover(host: &dyn DiscoveryHost) -> Arc<Self> {
        let registry = Arc::new(Self::new());
        for provider in host.injected_providers() {
            registry.inject(provider);
        }
        host.request_providers(registry.clone());
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn next_injected_key(&self) -> String {
        format!("injected:{}", self.injected_seq.fetch_add(1, Ordering::SeqCst))
    }

    /// Key for an announcement that matches no catalog slot. Without a uuid
    /// there is nothing stable to key on, so it gets a generated one.
    fn fallback_key(&self, uuid: &str) -> String {
        if uuid.is_empty() {
            self.next_injected_key()
        } else {
            format!("eip6963:{}", uuid)
        }
    }

    /// Record an announced provider. A re-announcement of the same provider
    /// (same uuid or same handle) supersedes the earlier binding in place.
    /// Returns the key the provider is bound under.
    pub fn announce(&self, provider: Arc<dyn SigningProvider>, info: ProviderInfo) -> String {
        let wallet = WalletId::from_descriptor(&info);
        let mut entries = self.write();

        let existing = entries.iter().position(|e| {
            same_provider(&e.provider, &provider)
                || (!info.uuid.is_empty()
                    && e.info.as_ref().map(|i| i.uuid == info.uuid).unwrap_or(false))
        });
        if let Some(idx) = existing {
            if entries[idx].source == ProviderSource::Announced || entries[idx].wallet == wallet {
                let entry = &mut entries[idx];
                entry.provider = provider;
                entry.info = Some(info);
                entry.source = ProviderSource::Announced;
                debug!(key = %entry.key, "provider re-announced");
                return entry.key.clone();
            }
            entries.remove(idx);
        }

        let mut key = match wallet {
            Some(id) => id.key().to_string(),
            None => self.fallback_key(&info.uuid),
        };

        if let Some(idx) = entries.iter().position(|e| e.key == key) {
            if entries[idx].source == ProviderSource::Injected {
                // Announcements outrank injection; the injected handle stays
                // usable under a generated key.
                entries[idx].key = self.next_injected_key();
            } else {
                key = self.fallback_key(&info.uuid);
            }
        }

        info!(key = %key, name = %info.name, rdns = %info.rdns, "provider announced");
        entries.push(Entry {
            key: key.clone(),
            provider,
            info: Some(info),
            wallet,
            source: ProviderSource::Announced,
        });
        key
    }

    /// Record an ambiently injected provider. Handles already known are
    /// ignored. Returns the key the provider is bound under.
    pub fn inject(&self, provider: Arc<dyn SigningProvider>) -> String {
        let wallet = WalletId::from_flags(&provider.capability_flags());
        let mut entries = self.write();

        if let Some(e) = entries.iter().find(|e| same_provider(&e.provider, &provider)) {
            return e.key.clone();
        }

        let key = match wallet {
            Some(id) if !entries.iter().any(|e| e.key == id.key()) => id.key().to_string(),
            _ => self.next_injected_key(),
        };
        debug!(key = %key, "injected provider found");
        entries.push(Entry {
            key: key.clone(),
            provider,
            info: None,
            wallet,
            source: ProviderSource::Injected,
        });
        key
    }

    /// Provider currently bound to `key`.
    pub fn get(&self, key: &str) -> Option<Arc<dyn SigningProvider>> {
        self.read()
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.provider.clone())
    }

    /// Every known provider, announced ones first.
    pub fn list_available(&self) -> Vec<ProviderListing> {
        let entries = self.read();
        let mut out: Vec<ProviderListing> = entries
            .iter()
            .map(|e| ProviderListing {
                key: e.key.clone(),
                wallet: e.wallet,
                name: e
                    .info
                    .as_ref()
                    .map(|i| i.name.clone())
                    .filter(|n| !n.is_empty())
                    .or_else(|| e.wallet.map(|w| w.display_name().to_string()))
                    .unwrap_or_else(|| "Injected wallet".to_string()),
                source: e.source,
            })
            .collect();
        out.sort_by_key(|l| l.source != ProviderSource::Announced);
        out
    }

    /// The fixed catalog with availability flags.
    pub fn wallet_options(&self) -> Vec<WalletOption> {
        let entries = self.read();
        WalletId::ALL
            .iter()
            .map(|id| WalletOption {
                id: *id,
                name: id.display_name(),
                available: entries.iter().any(|e| e.key == id.key()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
