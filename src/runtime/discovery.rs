//! Discovery scanner.
//!
//! Walks the factory's creation events from the last checkpoint up to the
//! current block in fixed sub-ranges and records every safe the identity
//! owns. The checkpoint only advances past sub-ranges that were processed,
//! so an interrupted scan resumes where it stopped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ethers::types::Address;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapters::contracts::{parse_safe_created, safe_created_topic};
use crate::adapters::ledger::Ledger;
use crate::cache::LocalCache;
use crate::config::FortConfig;
use crate::error::Result;
use crate::types::Identity;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub identity: Option<Identity>,
    /// First block queried; `None` if there was nothing to scan.
    pub from_block: Option<u64>,
    pub latest_block: u64,
    /// Safes added to the collection by this scan.
    pub discovered: Vec<Address>,
    /// Sub-ranges whose query failed and were treated as empty.
    pub failed_ranges: Vec<(u64, u64)>,
    pub checkpoint: u64,
    /// Another scan for the same identity was already running.
    pub skipped: bool,
}

/// Removes the identity from the in-flight set when the scan ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Identity>>,
    identity: Identity,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.identity);
        }
    }
}

pub struct DiscoveryScanner {
    config: Arc<FortConfig>,
    cache: LocalCache,
    in_flight: Mutex<HashSet<Identity>>,
}

impl DiscoveryScanner {
    pub fn new(config: Arc<FortConfig>, cache: LocalCache) -> Self {
        Self {
            config,
            cache,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_scanning(&self, identity: &Identity) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(identity))
            .unwrap_or(false)
    }

    fn begin(&self, identity: Identity) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(identity) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            identity,
        })
    }

    /// Scan for safes owned by `identity` and add them to its collection.
    ///
    /// A second call for the same identity while one is running returns a
    /// skipped report without touching the ledger. Failing sub-range queries
    /// count as empty; failing to read the current block or being on another
    /// chain aborts without moving the checkpoint.
    pub async fn scan(&self, identity: &Identity, ledger: &Ledger) -> Result<ScanReport> {
        let Some(_guard) = self.begin(*identity) else {
            debug!(identity = %identity, "scan already running");
            return Ok(ScanReport {
                identity: Some(*identity),
                skipped: true,
                checkpoint: self.cache.checkpoint(identity).unwrap_or_default(),
                ..Default::default()
            });
        };

        let chain_id = ledger.chain_id().await?;
        if chain_id != self.config.chain_id {
            return Err(self.config.wrong_network());
        }
        let latest = ledger.block_number().await?;

        let genesis = self.config.factory_from_block;
        let start = match self.cache.checkpoint(identity) {
            Some(last) => genesis.max(last.saturating_add(1)),
            None => genesis,
        };

        let mut report = ScanReport {
            identity: Some(*identity),
            latest_block: latest,
            ..Default::default()
        };

        if start > latest {
            report.checkpoint = self.cache.advance_checkpoint(identity, latest);
            debug!(identity = %identity, latest, "nothing new to scan");
            return Ok(report);
        }

        report.from_block = Some(start);
        let step = self.config.effective_log_chunk();
        let factory = self.config.factory_address;
        let topic = safe_created_topic();
        info!(identity = %identity, from = start, to = latest, step, "scanning for safes");

        let mut from = start;
        while from <= latest {
            let to = latest.min(from.saturating_add(step - 1));
            let logs = match ledger.get_logs(factory, topic, from, to).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(from, to, error = %e, "log query failed, treating range as empty");
                    report.failed_ranges.push((from, to));
                    Vec::new()
                }
            };

            for log in logs.iter().filter(|l| l.address == factory) {
                let Some(event) = parse_safe_created(log) else {
                    continue;
                };
                if event.has_owner(&identity.address())
                    && self.cache.add_safe(identity, event.safe)
                {
                    info!(identity = %identity, safe = %event.safe, "discovered safe");
                    report.discovered.push(event.safe);
                }
            }

            report.checkpoint = self.cache.advance_checkpoint(identity, to);
            if to == latest {
                break;
            }
            from = to + 1;
        }

        report.checkpoint = self.cache.advance_checkpoint(identity, latest);
        info!(
            identity = %identity,
            discovered = report.discovered.len(),
            failed = report.failed_ranges.len(),
            checkpoint = report.checkpoint,
            "scan finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockChain;
    use crate::error::FortError;

    fn setup() -> (Arc<FortConfig>, MockChain, LocalCache) {
        let config = Arc::new(FortConfig {
            factory_from_block: 100,
            log_chunk: 2000,
            ..FortConfig::default()
        });
        let chain = MockChain::new(&config);
        (config, chain, LocalCache::in_memory())
    }

    #[tokio::test]
    async fn test_scan_finds_owned_safes_only() {
        let (config, chain, cache) = setup();
        let me = Address::repeat_byte(0x0a);
        let other = Address::repeat_byte(0x0b);
        let mine = chain.deploy_safe([me, other, Address::repeat_byte(0x0c)]);
        chain.mine(10);
        chain.deploy_safe([other, Address::repeat_byte(0x0c), Address::repeat_byte(0x0d)]);

        let scanner = DiscoveryScanner::new(config.clone(), cache.clone());
        let ledger = Ledger::new(chain.rpc(), config.request_timeout);
        let id = Identity::new(me);
        let report = scanner.scan(&id, &ledger).await.unwrap();

        assert_eq!(report.discovered, vec![mine]);
        assert_eq!(cache.safes(&id), vec![mine]);
        assert_eq!(report.checkpoint, chain.block_number());
        assert!(!scanner.is_scanning(&id));
    }

    #[tokio::test]
    async fn test_second_scan_only_covers_new_blocks() {
        let (config, chain, cache) = setup();
        let me = Address::repeat_byte(0x0a);
        chain.deploy_safe([me, Address::repeat_byte(2), Address::repeat_byte(3)]);

        let scanner = DiscoveryScanner::new(config.clone(), cache.clone());
        let ledger = Ledger::new(chain.rpc(), config.request_timeout);
        let id = Identity::new(me);
        let first = scanner.scan(&id, &ledger).await.unwrap();

        let second = scanner.scan(&id, &ledger).await.unwrap();
        assert!(second.discovered.is_empty());
        assert_eq!(second.from_block, None);
        assert_eq!(second.checkpoint, first.checkpoint);
        assert_eq!(cache.safes(&id).len(), 1);

        chain.mine(5);
        let third = scanner.scan(&id, &ledger).await.unwrap();
        assert_eq!(third.from_block, Some(first.checkpoint + 1));
    }

    #[tokio::test]
    async fn test_failed_range_is_empty_but_checkpoint_moves() {
        let (config, chain, cache) = setup();
        let me = Address::repeat_byte(0x0a);
        chain.mine(5000);
        let safe = chain.deploy_safe([me, Address::repeat_byte(2), Address::repeat_byte(3)]);
        let created_at = chain.block_number();
        chain.fail_logs_between(created_at, created_at);

        let scanner = DiscoveryScanner::new(config.clone(), cache.clone());
        let ledger = Ledger::new(chain.rpc(), config.request_timeout);
        let id = Identity::new(me);
        let report = scanner.scan(&id, &ledger).await.unwrap();

        assert_eq!(report.failed_ranges.len(), 1);
        assert!(report.discovered.is_empty());
        assert_eq!(report.checkpoint, chain.block_number());
        assert!(!cache.safes(&id).contains(&safe));
    }

    #[tokio::test]
    async fn test_wrong_chain_leaves_checkpoint() {
        let (config, chain, cache) = setup();
        let wallet = chain.wallet(&[]);
        wallet.set_chain_silently(999);

        let scanner = DiscoveryScanner::new(config.clone(), cache.clone());
        let ledger = Ledger::new(wallet, config.request_timeout);
        let id = Identity::new(Address::repeat_byte(1));
        let err = scanner.scan(&id, &ledger).await.unwrap_err();
        assert!(matches!(err, FortError::WrongNetwork { .. }));
        assert_eq!(cache.checkpoint(&id), None);
    }

    #[tokio::test]
    async fn test_concurrent_scan_is_skipped() {
        let (config, chain, cache) = setup();
        let scanner = DiscoveryScanner::new(config.clone(), cache);
        let id = Identity::new(Address::repeat_byte(1));
        let _held = scanner.begin(id).unwrap();

        let ledger = Ledger::new(chain.rpc(), config.request_timeout);
        let report = scanner.scan(&id, &ledger).await.unwrap();
        assert!(report.skipped);
    }
}
