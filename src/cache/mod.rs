//! Local cache store (the advisory tier).
//!
//! Everything here is a hint: names, safe lists, transaction hashes and scan
//! checkpoints. Reads return [`Advisory`] values where they are merged into
//! chain-derived views. Backends may fail silently; the engine degrades to
//! "nothing cached" and never aborts on a cache failure.
//!
//! Key layout (all addresses lowercase):
//! - `fort:safeName:{safe}`
//! - `fort:safesByWallet:{identity}` (JSON array, most recent first)
//! - `fort:hiddenSafes:{identity}` (JSON array)
//! - `fort:txHash:{safe}:{id}` (JSON `{hash, final}`)
//! - `fort:scanBlock:{identity}`
//! - `fort:providerKey`

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Advisory, Identity, SafeRecord};
use crate::utils::{parse_safe_list, parse_tx_hash};

const PREFIX: &str = "fort:";

/// Synchronous string key/value store.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Returns `false` if the value could not be persisted.
    fn set(&self, key: &str, value: &str) -> bool;

    fn remove(&self, key: &str);
}

/// Process-local backend.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, as a full or blocked store would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Store a raw value, bypassing the typed layer.
    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return false;
        }
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key.to_string(), value.to_string());
                true
            }
            Err(_) => false,
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// Backend persisted as a single JSON object on disk.
pub struct FileCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileCache {
    /// Open (or lazily create) a cache file. An unreadable or corrupt file
    /// starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "cache file is corrupt, starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn flush(&self, entries: &HashMap<String, String>) -> bool {
        let raw = match serde_json::to_string_pretty(entries) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to encode cache");
                return false;
            }
        };
        match std::fs::write(&self.path, raw) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to write cache file");
                false
            }
        }
    }
}

impl CacheBackend for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.remove(key).is_some() {
                self.flush(&entries);
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredTxHash {
    hash: String,
    #[serde(rename = "final", default)]
    is_final: bool,
}

/// Typed, namespaced view over a [`CacheBackend`].
#[derive(Clone)]
pub struct LocalCache {
    backend: Arc<dyn CacheBackend>,
}

impl LocalCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    fn write(&self, key: &str, value: &str) -> bool {
        let ok = self.backend.set(key, value);
        if !ok {
            warn!(key, "cache write failed");
        }
        ok
    }

    // Names

    fn name_key(safe: &Address) -> String {
        format!("{}safeName:{:#x}", PREFIX, safe)
    }

    pub fn name(&self, safe: &Address) -> Option<Advisory<String>> {
        self.backend
            .get(&Self::name_key(safe))
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .map(Advisory::new)
    }

    /// Store a display name; an empty name removes it.
    pub fn set_name(&self, safe: &Address, name: &str) {
        let key = Self::name_key(safe);
        let name = name.trim();
        if name.is_empty() {
            self.backend.remove(&key);
        } else {
            self.write(&key, name);
        }
    }

    // Safe collection

    fn safes_key(identity: &Identity) -> String {
        format!("{}safesByWallet:{}", PREFIX, identity.cache_key())
    }

    /// The identity's safe list, most recently added first.
    ///
    /// Legacy encodings are rewritten as a JSON array on read.
    pub fn safes(&self, identity: &Identity) -> Vec<Address> {
        let key = Self::safes_key(identity);
        let Some(raw) = self.backend.get(&key) else {
            return Vec::new();
        };
        let (safes, legacy) = parse_safe_list(&raw);
        if legacy {
            debug!(identity = %identity, count = safes.len(), "migrating legacy safe list");
            self.store_safes(identity, &safes);
        }
        safes
    }

    fn store_safes(&self, identity: &Identity, safes: &[Address]) -> bool {
        let encoded: Vec<String> = safes.iter().map(|a| format!("{:#x}", a)).collect();
        match serde_json::to_string(&encoded) {
            Ok(raw) => self.write(&Self::safes_key(identity), &raw),
            Err(_) => false,
        }
    }

    /// Add a safe at the front of the list. Returns `false` if it was
    /// already present (the list is left untouched).
    pub fn add_safe(&self, identity: &Identity, safe: Address) -> bool {
        let mut safes = self.safes(identity);
        if safes.contains(&safe) {
            return false;
        }
        safes.insert(0, safe);
        self.store_safes(identity, &safes)
    }

    pub fn remove_safe(&self, identity: &Identity, safe: &Address) -> bool {
        let mut safes = self.safes(identity);
        let before = safes.len();
        safes.retain(|a| a != safe);
        if safes.len() == before {
            return false;
        }
        self.store_safes(identity, &safes);
        self.set_hidden(identity, *safe, false);
        true
    }

    // Hidden flags

    fn hidden_key(identity: &Identity) -> String {
        format!("{}hiddenSafes:{}", PREFIX, identity.cache_key())
    }

    pub fn hidden(&self, identity: &Identity) -> HashSet<Address> {
        self.backend
            .get(&Self::hidden_key(identity))
            .map(|raw| parse_safe_list(&raw).0.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn set_hidden(&self, identity: &Identity, safe: Address, hidden: bool) {
        let mut set: Vec<Address> = parse_safe_list(
            &self
                .backend
                .get(&Self::hidden_key(identity))
                .unwrap_or_default(),
        )
        .0;
        let present = set.contains(&safe);
        match (hidden, present) {
            (true, false) => set.push(safe),
            (false, true) => set.retain(|a| *a != safe),
            _ => return,
        }
        if set.is_empty() {
            self.backend.remove(&Self::hidden_key(identity));
            return;
        }
        let encoded: Vec<String> = set.iter().map(|a| format!("{:#x}", a)).collect();
        if let Ok(raw) = serde_json::to_string(&encoded) {
            self.write(&Self::hidden_key(identity), &raw);
        }
    }

    /// Full records for the identity's collection, in list order.
    pub fn records(&self, identity: &Identity) -> Vec<SafeRecord> {
        let hidden = self.hidden(identity);
        let checkpoint = self.checkpoint(identity);
        self.safes(identity)
            .into_iter()
            .map(|address| SafeRecord {
                address,
                cached_name: self.name(&address),
                hidden: hidden.contains(&address),
                last_scan_checkpoint: checkpoint,
            })
            .collect()
    }

    // Transaction hashes

    fn tx_hash_key(safe: &Address, id: u64) -> String {
        format!("{}txHash:{:#x}:{}", PREFIX, safe, id)
    }

    fn stored_tx_hash(&self, safe: &Address, id: u64) -> Option<(H256, bool)> {
        let raw = self.backend.get(&Self::tx_hash_key(safe, id))?;
        if let Ok(stored) = serde_json::from_str::<StoredTxHash>(&raw) {
            return parse_tx_hash(&stored.hash).map(|h| (h, stored.is_final));
        }
        // Plain strings predate the finality marker.
        parse_tx_hash(&raw).map(|h| (h, false))
    }

    pub fn tx_hash(&self, safe: &Address, id: u64) -> Option<Advisory<H256>> {
        self.stored_tx_hash(safe, id).map(|(h, _)| Advisory::new(h))
    }

    /// Record the hash of the latest action on a transaction.
    ///
    /// Once a final hash is stored it is never replaced; returns `false` in
    /// that case or when the write fails.
    pub fn set_tx_hash(&self, safe: &Address, id: u64, hash: H256, is_final: bool) -> bool {
        if let Some((existing, true)) = self.stored_tx_hash(safe, id) {
            debug!(
                safe = %format!("{:#x}", safe),
                id,
                existing = %format!("{:#x}", existing),
                "final tx hash kept"
            );
            return false;
        }
        let stored = StoredTxHash {
            hash: format!("{:#x}", hash),
            is_final,
        };
        match serde_json::to_string(&stored) {
            Ok(raw) => self.write(&Self::tx_hash_key(safe, id), &raw),
            Err(_) => false,
        }
    }

    // Scan checkpoints

    fn checkpoint_key(identity: &Identity) -> String {
        format!("{}scanBlock:{}", PREFIX, identity.cache_key())
    }

    pub fn checkpoint(&self, identity: &Identity) -> Option<u64> {
        self.backend
            .get(&Self::checkpoint_key(identity))?
            .trim()
            .parse()
            .ok()
    }

    /// Move the checkpoint forward. Never moves it back; returns the value
    /// now in effect.
    pub fn advance_checkpoint(&self, identity: &Identity, block: u64) -> u64 {
        let current = self.checkpoint(identity);
        if let Some(current) = current {
            if current >= block {
                return current;
            }
        }
        self.write(&Self::checkpoint_key(identity), &block.to_string());
        block
    }

    // Provider key for silent reconnection

    fn provider_key_key() -> String {
        format!("{}providerKey", PREFIX)
    }

    pub fn provider_key(&self) -> Option<String> {
        self.backend
            .get(&Self::provider_key_key())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn set_provider_key(&self, key: &str) {
        self.write(&Self::provider_key_key(), key);
    }

    pub fn clear_provider_key(&self) {
        self.backend.remove(&Self::provider_key_key());
    }
}
