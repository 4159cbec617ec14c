use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use fort_sync::adapters::ledger::Ledger;
use fort_sync::adapters::mock::MockChain;
use fort_sync::adapters::registry::ProviderRegistry;
use fort_sync::cache::{CacheBackend, MemoryCache};
use fort_sync::runtime::DiscoveryScanner;
use fort_sync::{FortConfig, FortError, Identity, LocalCache, SafeRuntime};

fn config() -> Arc<FortConfig> {
    Arc::new(FortConfig {
        factory_from_block: 1_000,
        log_chunk: 2_000,
        receipt_poll_interval: Duration::from_millis(1),
        ..FortConfig::default()
    })
}

fn owners(me: Address, salt: u8) -> [Address; 3] {
    [me, Address::repeat_byte(salt), Address::repeat_byte(salt.wrapping_add(1))]
}

#[tokio::test]
async fn test_repeated_scans_are_stable() {
    let config = config();
    let chain = MockChain::new(&config);
    let me = Address::repeat_byte(0x0a);
    chain.deploy_safe(owners(me, 0x20));
    chain.mine(3_000);
    chain.deploy_safe(owners(me, 0x30));

    let backend = Arc::new(MemoryCache::new());
    let cache = LocalCache::new(backend.clone());
    let scanner = DiscoveryScanner::new(config.clone(), cache.clone());
    let ledger = Ledger::new(chain.rpc(), config.request_timeout);
    let id = Identity::new(me);

    let first = scanner.scan(&id, &ledger).await.unwrap();
    assert_eq!(first.discovered.len(), 2);
    assert_eq!(first.checkpoint, chain.block_number());
    let key = format!("fort:safesByWallet:{}", id.cache_key());
    let stored = backend.get(&key).unwrap();

    // No new events, but the chain moves on
    chain.mine(10);
    let second = scanner.scan(&id, &ledger).await.unwrap();
    assert!(second.discovered.is_empty());
    assert_eq!(second.checkpoint, chain.block_number());
    assert_eq!(backend.get(&key).unwrap(), stored);
}

#[tokio::test]
async fn test_checkpoint_never_moves_back() {
    let config = config();
    let chain = MockChain::new(&config);
    let me = Address::repeat_byte(0x0b);
    let cache = LocalCache::in_memory();
    let scanner = DiscoveryScanner::new(config.clone(), cache.clone());
    let ledger = Ledger::new(chain.rpc(), config.request_timeout);
    let id = Identity::new(me);

    let mut last = 0;
    for round in 0..6u64 {
        chain.mine(1_500 + round * 700);
        if round % 2 == 0 {
            chain.fail_logs_between(0, u64::MAX);
        } else {
            chain.clear_log_failures();
        }
        chain.deploy_safe(owners(me, 0x40 + round as u8 * 2));

        let report = scanner.scan(&id, &ledger).await.unwrap();
        let checkpoint = cache.checkpoint(&id).unwrap();
        assert!(checkpoint >= last);
        assert_eq!(checkpoint, report.checkpoint);
        last = checkpoint;
    }

    // A stale lower write is ignored
    assert_eq!(cache.advance_checkpoint(&id, 1), last);
}

#[tokio::test]
async fn test_failed_ranges_are_skipped_not_retried() {
    let config = config();
    let chain = MockChain::new(&config);
    let me = Address::repeat_byte(0x0c);
    chain.mine(2_500);
    let missed = chain.deploy_safe(owners(me, 0x50));
    chain.mine(2_500);
    let found = chain.deploy_safe(owners(me, 0x60));
    let missed_at = 1_000 + 2_500 + 1;
    chain.fail_logs_between(missed_at, missed_at);

    let cache = LocalCache::in_memory();
    let scanner = DiscoveryScanner::new(config.clone(), cache.clone());
    let ledger = Ledger::new(chain.rpc(), config.request_timeout);
    let id = Identity::new(me);
    let report = scanner.scan(&id, &ledger).await.unwrap();

    assert_eq!(report.failed_ranges, vec![(3_000, 4_999)]);
    assert_eq!(cache.safes(&id), vec![found]);

    chain.clear_log_failures();
    let again = scanner.scan(&id, &ledger).await.unwrap();
    assert!(again.discovered.is_empty());
    assert!(!cache.safes(&id).contains(&missed));
}

#[tokio::test]
async fn test_import_without_code_is_not_added() {
    let config = config();
    let chain = MockChain::new(&config);
    let me = Address::repeat_byte(0x0d);
    let wallet = chain.wallet(&[me]);
    let registry = Arc::new(ProviderRegistry::new());
    let key = registry.inject(wallet);
    let runtime = SafeRuntime::builder((*config).clone(), registry).start();
    runtime.connect(&key).await.unwrap();

    let empty = Address::repeat_byte(0x99);
    let err = runtime.import_safe(&format!("{:#x}", empty)).await.unwrap_err();
    assert_eq!(err, FortError::ContractAbsent);
    assert!(runtime.list_safes("", true).iter().all(|r| r.address != empty));
    assert_eq!(
        runtime.view().messages.safe_load.unwrap().text,
        "No contract at this address on current network"
    );
}

#[tokio::test]
async fn test_collection_management() {
    let config = config();
    let chain = MockChain::new(&config);
    let me = Address::repeat_byte(0x0e);
    let first = chain.deploy_safe(owners(me, 0x70));
    let second = chain.deploy_safe(owners(me, 0x72));
    let wallet = chain.wallet(&[me]);
    let registry = Arc::new(ProviderRegistry::new());
    let key = registry.inject(wallet);
    let runtime = SafeRuntime::builder((*config).clone(), registry).start();
    runtime.connect(&key).await.unwrap();
    runtime.open_safe(&format!("{:#x}", first)).await.unwrap();
    runtime.open_safe(&format!("{:#x}", second)).await.unwrap();

    runtime.rename_safe(&format!("{:#x}", first), "Payroll").unwrap();
    let hits = runtime.list_safes("payr", false);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].address, first);

    runtime.hide_safe(&format!("{:#x}", first)).unwrap();
    assert!(runtime.list_safes("", false).iter().all(|r| r.address != first));
    assert!(runtime.list_safes("", true).iter().any(|r| r.address == first && r.hidden));
    runtime.unhide_safe(&format!("{:#x}", first)).unwrap();
    assert_eq!(runtime.list_safes("", false).len(), 2);

    // Removing the open safe closes it
    assert!(runtime.remove_safe(&format!("{:#x}", second)).unwrap());
    assert!(runtime.view().safe.is_none());
    assert_eq!(runtime.reload().await.unwrap_err(), FortError::NoSafeOpen);
    assert_eq!(runtime.list_safes("", true).len(), 1);
}
