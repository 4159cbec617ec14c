//! Safe state loader.
//!
//! Builds a [`SafeSession`] for one safe address as seen by the current
//! identity. Owner-scoped data (balance, transactions, confirmation bits) is
//! only read after the identity is proven to be one of the three owners; any
//! other outcome yields a cleared session.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::Address;
use tracing::{debug, info, warn};

use crate::adapters::contracts::{
    decode_address_output, decode_bool_output, decode_txs_output, encode_confirmed, encode_owners,
    encode_txs,
};
use crate::adapters::ledger::Ledger;
use crate::adapters::SigningProvider;
use crate::cache::LocalCache;
use crate::config::FortConfig;
use crate::error::{FortError, Result};
use crate::probe::{IndexProbe, ProbeEnd};
use crate::runtime::network_guard::NetworkGuard;
use crate::runtime::session::SessionContext;
use crate::types::{AccessState, SafeSession, Transaction, OWNER_COUNT};
use crate::utils::parse_address;

/// Optional source of display names for safes that have none cached.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, safe: Address) -> Option<String>;
}

/// Result of one load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Normalized address; `None` if the input was not an address.
    pub address: Option<Address>,
    /// The session to publish; `None` leaves the current one untouched.
    pub session: Option<SafeSession>,
    pub error: Option<FortError>,
    /// No name is cached and one may be resolved in the background.
    pub needs_name: bool,
    /// How transaction probing ended, for owner loads.
    pub probe_end: Option<ProbeEnd>,
}

impl LoadOutcome {
    fn failed(address: Option<Address>, session: Option<SafeSession>, error: FortError) -> Self {
        Self {
            address,
            session,
            error: Some(error),
            needs_name: false,
            probe_end: None,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self.probe_end, Some(ProbeEnd::Capped(_)))
    }
}

pub struct SafeStateLoader {
    config: Arc<FortConfig>,
    cache: LocalCache,
    guard: Arc<NetworkGuard>,
    fallback: Option<Arc<dyn SigningProvider>>,
}

impl SafeStateLoader {
    pub fn new(
        config: Arc<FortConfig>,
        cache: LocalCache,
        guard: Arc<NetworkGuard>,
        fallback: Option<Arc<dyn SigningProvider>>,
    ) -> Self {
        Self {
            config,
            cache,
            guard,
            fallback,
        }
    }

    /// Load `raw` for the identity in `ctx`.
    ///
    /// `on_checking` is called once the ownership check starts. Never
    /// returns `Owner` or `Denied` access without an identity.
    pub async fn load(
        &self,
        raw: &str,
        ctx: &SessionContext,
        on_checking: &(dyn Fn(&SafeSession) + Send + Sync),
    ) -> LoadOutcome {
        // 1. Address
        let address = match parse_address(raw, "safe") {
            Ok(a) => a,
            Err(e) => {
                debug!(input = raw, "invalid safe address");
                return LoadOutcome::failed(None, None, e);
            }
        };
        let cleared = |access| Some(SafeSession::cleared(address, access));

        // 2. Read path
        let (provider, via_wallet) = match (&ctx.provider, &self.fallback) {
            (Some(p), _) => (p.clone(), true),
            (None, Some(p)) => (p.clone(), false),
            (None, None) => {
                return LoadOutcome::failed(
                    Some(address),
                    cleared(AccessState::None),
                    FortError::NotConnected,
                );
            }
        };
        let ledger = Ledger::new(provider.clone(), self.config.request_timeout);

        // 3. Network
        let chain_id = if via_wallet {
            self.guard.current_chain_id(provider.as_ref()).await
        } else {
            match ledger.chain_id().await {
                Ok(id) => id,
                Err(e) => return LoadOutcome::failed(Some(address), cleared(AccessState::None), e),
            }
        };
        if chain_id != self.config.chain_id {
            debug!(chain_id, safe = %address, "load on wrong network");
            return LoadOutcome::failed(
                Some(address),
                cleared(AccessState::None),
                self.config.wrong_network(),
            );
        }

        // 4. Contract presence
        match ledger.get_code(address).await {
            Ok(code) if !code.is_empty() => {}
            Ok(_) => {
                return LoadOutcome::failed(
                    Some(address),
                    cleared(AccessState::None),
                    FortError::ContractAbsent,
                );
            }
            Err(e) => return LoadOutcome::failed(Some(address), cleared(AccessState::None), e),
        }

        // 5. Nothing owner-scoped without an identity
        let Some(identity) = ctx.identity else {
            return LoadOutcome {
                address: Some(address),
                session: cleared(AccessState::None),
                error: None,
                needs_name: false,
                probe_end: None,
            };
        };
        let me = identity.address();

        // 6. Ownership
        let mut checking = SafeSession::cleared(address, AccessState::Checking);
        on_checking(&checking);
        let mut owners = [Address::zero(); OWNER_COUNT];
        for (i, slot) in owners.iter_mut().enumerate() {
            let read = ledger
                .call(address, &encode_owners(i as u64), Some(me))
                .await
                .and_then(|out| {
                    decode_address_output(&out)
                        .ok_or_else(|| FortError::unknown("owners() returned no address"))
                });
            match read {
                Ok(owner) => *slot = owner,
                Err(e) => {
                    warn!(safe = %address, index = i, error = %e, "owner read failed");
                    checking.access = AccessState::Denied;
                    return LoadOutcome::failed(
                        Some(address),
                        Some(checking),
                        FortError::OwnerCheckReverted { reason: e.to_string() },
                    );
                }
            }
        }

        // 7. Match
        let Some(owner_index) = owners.iter().position(|o| *o == me) else {
            info!(safe = %address, identity = %identity, "identity is not an owner");
            return LoadOutcome::failed(
                Some(address),
                cleared(AccessState::Denied),
                FortError::NotAnOwner,
            );
        };

        // 8. Balance and name
        let balance = match ledger.get_balance(address).await {
            Ok(b) => b,
            Err(e) => return LoadOutcome::failed(Some(address), cleared(AccessState::None), e),
        };
        let name = self.cache.name(&address);
        let needs_name = name.is_none();

        // 9. Transactions
        let (records, probe_end) = {
            let ledger = &ledger;
            IndexProbe::new(
                move |i| async move {
                    let out = ledger.call(address, &encode_txs(i), Some(me)).await?;
                    decode_txs_output(&out)
                        .ok_or_else(|| FortError::unknown("txs() returned malformed data"))
                },
                self.config.tx_probe_cap,
                self.config.probe_retries,
            )
            .collect()
            .await
        };
        match &probe_end {
            Some(ProbeEnd::Capped(cap)) => {
                warn!(safe = %address, cap, "transaction listing truncated")
            }
            Some(ProbeEnd::Failed { index, error }) => {
                warn!(safe = %address, index, error = %error, "transaction probing stopped early")
            }
            _ => {}
        }

        // 10-11. Cached hashes and confirmation bits
        let mut transactions = Vec::with_capacity(records.len());
        for (id, record) in records.into_iter().enumerate() {
            let id = id as u64;
            let mut per_owner_confirmed = [false; OWNER_COUNT];
            for (j, owner) in owners.iter().enumerate() {
                let read = ledger.call(address, &encode_confirmed(id, *owner), Some(me)).await;
                per_owner_confirmed[j] = match read {
                    Ok(out) => decode_bool_output(&out).unwrap_or(false),
                    Err(e) => {
                        debug!(
                            safe = %address,
                            id,
                            owner = j,
                            error = %e,
                            "confirmation bit unreadable"
                        );
                        false
                    }
                };
            }
            transactions.push(Transaction {
                id,
                recipient: record.to,
                amount: record.amount,
                executed: record.executed,
                ledger_confirms: record.confirms,
                per_owner_confirmed,
                cached_hash: self.cache.tx_hash(&address, id),
            });
        }

        // 12. Remember the safe
        if self.cache.add_safe(&identity, address) {
            info!(safe = %address, identity = %identity, "safe added to collection");
        }

        info!(safe = %address, owner_index, txs = transactions.len(), "safe loaded");
        LoadOutcome {
            address: Some(address),
            session: Some(SafeSession::owned(
                address,
                owners,
                owner_index,
                balance,
                transactions,
                name,
            )),
            error: None,
            needs_name,
            probe_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockChain;
    use crate::types::Identity;
    use ethers::types::U256;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn strangers() -> [Address; 3] {
        [Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3)]
    }

    fn ctx_for(wallet: Arc<dyn SigningProvider>, me: Address) -> SessionContext {
        SessionContext {
            generation: 1,
            identity: Some(Identity::new(me)),
            provider_key: Some("injected:0".into()),
            provider: Some(wallet),
            chain_id: 5042002,
            chain_ok: true,
        }
    }

    fn loader(chain: &MockChain, cache: LocalCache) -> SafeStateLoader {
        let config = Arc::new(FortConfig::default());
        let guard = Arc::new(NetworkGuard::new(config.clone()));
        SafeStateLoader::new(config, cache, guard, Some(chain.rpc()))
    }

    fn noop(_: &SafeSession) {}

    #[tokio::test]
    async fn test_owner_load() {
        let chain = MockChain::default();
        let me = Address::repeat_byte(0x0a);
        let safe = chain.deploy_safe([Address::repeat_byte(1), me, Address::repeat_byte(2)]);
        chain.fund(safe, U256::exp10(19));
        let wallet = chain.wallet(&[me]);
        wallet.authorize();
        let cache = LocalCache::in_memory();

        let outcome = loader(&chain, cache.clone())
            .load(&format!("{:#x}", safe), &ctx_for(wallet, me), &noop)
            .await;
        assert_eq!(outcome.error, None);
        let session = outcome.session.unwrap();
        assert_eq!(session.access, AccessState::Owner);
        assert_eq!(session.owner_index_of_caller(), 1);
        assert_eq!(session.balance, U256::exp10(19));
        assert!(session.transactions.is_empty());
        assert_eq!(outcome.probe_end, Some(ProbeEnd::Exhausted(0)));
        assert!(outcome.needs_name);
        assert_eq!(cache.safes(&Identity::new(me)), vec![safe]);
    }

    #[tokio::test]
    async fn test_non_owner_is_denied_with_cleared_fields() {
        let chain = MockChain::default();
        let me = Address::repeat_byte(0x0a);
        let safe = chain.deploy_safe(strangers());
        chain.fund(safe, U256::from(5));
        let wallet = chain.wallet(&[me]);
        let cache = LocalCache::in_memory();

        let outcome = loader(&chain, cache.clone())
            .load(&format!("{:#x}", safe), &ctx_for(wallet, me), &noop)
            .await;
        assert_eq!(outcome.error, Some(FortError::NotAnOwner));
        let session = outcome.session.unwrap();
        assert_eq!(session.access, AccessState::Denied);
        assert_eq!(session.balance, U256::zero());
        assert!(session.owners.is_empty());
        assert!(cache.safes(&Identity::new(me)).is_empty());
    }

    #[tokio::test]
    async fn test_reverting_owner_read_is_distinct() {
        let chain = MockChain::default();
        let me = Address::repeat_byte(0x0a);
        let safe = chain.deploy_safe([me, Address::repeat_byte(2), Address::repeat_byte(3)]);
        chain.fail_owner_reads(safe);
        let wallet = chain.wallet(&[me]);

        let outcome = loader(&chain, LocalCache::in_memory())
            .load(&format!("{:#x}", safe), &ctx_for(wallet, me), &noop)
            .await;
        assert!(matches!(outcome.error, Some(FortError::OwnerCheckReverted { .. })));
        assert_eq!(outcome.session.unwrap().access, AccessState::Denied);
    }

    #[tokio::test]
    async fn test_without_identity_stops_after_presence_check() {
        let chain = MockChain::default();
        let safe = chain.deploy_safe(strangers());
        let ctx = SessionContext {
            generation: 0,
            identity: None,
            provider_key: None,
            provider: None,
            chain_id: 0,
            chain_ok: false,
        };
        let checked = AtomicBool::new(false);
        let on_checking = |_: &SafeSession| checked.store(true, Ordering::SeqCst);

        let outcome = loader(&chain, LocalCache::in_memory())
            .load(&format!("{:#x}", safe), &ctx, &on_checking)
            .await;
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.session.unwrap().access, AccessState::None);
        assert!(!checked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_invalid_and_absent_addresses() {
        let chain = MockChain::default();
        let me = Address::repeat_byte(0x0a);
        let wallet = chain.wallet(&[me]);
        let ctx = ctx_for(wallet, me);
        let loader = loader(&chain, LocalCache::in_memory());

        let invalid = loader.load("0x1234", &ctx, &noop).await;
        assert_eq!(invalid.error, Some(FortError::InvalidAddress { field: "safe" }));
        assert!(invalid.session.is_none());

        let absent = loader.load(&format!("{:#x}", Address::repeat_byte(0x77)), &ctx, &noop).await;
        assert_eq!(absent.error, Some(FortError::ContractAbsent));
        assert_eq!(absent.session.unwrap().access, AccessState::None);
    }

    #[tokio::test]
    async fn test_wrong_network_clears() {
        let chain = MockChain::default();
        let me = Address::repeat_byte(0x0a);
        let safe = chain.deploy_safe([me, Address::repeat_byte(2), Address::repeat_byte(3)]);
        let wallet = chain.wallet(&[me]);
        wallet.set_chain_silently(999);

        let outcome = loader(&chain, LocalCache::in_memory())
            .load(&format!("{:#x}", safe), &ctx_for(wallet, me), &noop)
            .await;
        assert!(matches!(outcome.error, Some(FortError::WrongNetwork { chain_id: 5042002, .. })));
        assert_eq!(outcome.session.unwrap().access, AccessState::None);
    }
}
