//! Action controller.
//!
//! Every mutating operation runs the same pipeline:
//!
//! 1. preconditions (identity, provider, access, inputs) and the pending set
//! 2. target chain
//! 3. optional read-only simulation to predict the created id or address
//! 4. submission through the wallet
//! 5. wait for inclusion
//! 6. reconcile advisory state (created safe, transaction hashes)
//!
//! The caller reloads the affected safe afterwards. At most one action per
//! `(safe, kind)` is in flight; a second request fails fast.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::adapters::contracts::{
    decode_create_save_output, decode_create_tx_output, encode_confirm_tx, encode_create_save,
    encode_create_tx, encode_execute_tx, find_safe_created,
};
use crate::adapters::ledger::Ledger;
use crate::adapters::{request_with_timeout, SigningProvider};
use crate::cache::LocalCache;
use crate::classifier::classify;
use crate::config::FortConfig;
use crate::error::{FortError, Result};
use crate::runtime::discovery::DiscoveryScanner;
use crate::runtime::network_guard::NetworkGuard;
use crate::runtime::session::SessionContext;
use crate::types::{ActionKind, Identity, PendingAction, SafeSession, OWNER_COUNT};
use crate::utils::{parse_address, parse_amount};

/// Called with the full pending set whenever it changes.
pub type PendingListener = Arc<dyn Fn(Vec<PendingAction>) + Send + Sync>;

/// What a finished action produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionReceipt {
    pub kind: ActionKind,
    pub hash: H256,
    /// The affected safe; for creation, the new safe if it could be determined.
    pub safe: Option<Address>,
    /// The affected transaction id, if known.
    pub tx_id: Option<u64>,
}

struct Pending<'a> {
    controller: &'a ActionController,
    action: PendingAction,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        let snapshot = match self.controller.pending.lock() {
            Ok(mut set) => {
                set.remove(&self.action);
                set.iter().copied().collect()
            }
            Err(_) => return,
        };
        self.controller.notify(snapshot);
    }
}

/// A wallet that passed the preflight checks.
struct Signer {
    identity: Identity,
    ledger: Ledger,
}

pub struct ActionController {
    config: Arc<FortConfig>,
    cache: LocalCache,
    guard: Arc<NetworkGuard>,
    scanner: Arc<DiscoveryScanner>,
    pending: Mutex<HashSet<PendingAction>>,
    listener: Option<PendingListener>,
}

impl ActionController {
    pub fn new(
        config: Arc<FortConfig>,
        cache: LocalCache,
        guard: Arc<NetworkGuard>,
        scanner: Arc<DiscoveryScanner>,
    ) -> Self {
        Self {
            config,
            cache,
            guard,
            scanner,
            pending: Mutex::new(HashSet::new()),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: PendingListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn pending(&self) -> Vec<PendingAction> {
        self.pending
            .lock()
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_pending(&self, action: &PendingAction) -> bool {
        self.pending
            .lock()
            .map(|set| set.contains(action))
            .unwrap_or(false)
    }

    fn notify(&self, snapshot: Vec<PendingAction>) {
        if let Some(listener) = &self.listener {
            listener(snapshot);
        }
    }

    fn begin(&self, safe: Option<Address>, kind: ActionKind) -> Result<Pending<'_>> {
        let action = PendingAction { safe, kind };
        let snapshot = {
            let mut set = self
                .pending
                .lock()
                .map_err(|_| FortError::unknown("pending set poisoned"))?;
            if !set.insert(action) {
                return Err(FortError::ActionInFlight {
                    action: kind.to_string(),
                });
            }
            set.iter().copied().collect()
        };
        self.notify(snapshot);
        Ok(Pending {
            controller: self,
            action,
        })
    }

    fn connected(ctx: &SessionContext) -> Result<(Identity, Arc<dyn SigningProvider>)> {
        let identity = ctx.identity.ok_or(FortError::NotConnected)?;
        let provider = ctx.provider.clone().ok_or(FortError::ProviderMissing)?;
        Ok((identity, provider))
    }

    fn open_owner(session: Option<&SafeSession>) -> Result<&SafeSession> {
        let session = session.ok_or(FortError::NoSafeOpen)?;
        if !session.is_owner() {
            return Err(FortError::AccessDenied);
        }
        Ok(session)
    }

    /// Account access and target chain, prompting the wallet if needed.
    async fn preflight(
        &self,
        identity: Identity,
        provider: Arc<dyn SigningProvider>,
    ) -> Result<Signer> {
        let liveness = self.config.liveness_timeout;
        let accounts = request_with_timeout(provider.as_ref(), "eth_accounts", json!([]), liveness)
            .await
            .ok()
            .and_then(|v| v.as_array().map(|a| !a.is_empty()))
            .unwrap_or(false);
        if !accounts {
            let timeout = self.config.request_timeout;
            request_with_timeout(provider.as_ref(), "eth_requestAccounts", json!([]), timeout)
                .await
                .map_err(|e| classify(&e))?;
        }

        self.guard.require_target_chain(provider.as_ref()).await?;

        Ok(Signer {
            identity,
            ledger: Ledger::new(provider, self.config.request_timeout),
        })
    }

    /// Read-only run of the call; `None` if the provider cannot simulate it.
    async fn simulate<T>(
        &self,
        signer: &Signer,
        to: Address,
        data: &Bytes,
        decode: fn(&[u8]) -> Option<T>,
    ) -> Option<T> {
        let result = signer
            .ledger
            .call(to, data, Some(signer.identity.address()))
            .await
            .and_then(|out| {
                decode(&out).ok_or_else(|| FortError::SimulationUnavailable {
                    reason: "undecodable result".to_string(),
                })
            });
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                let err = match e {
                    FortError::SimulationUnavailable { .. } => e,
                    other => FortError::SimulationUnavailable {
                        reason: other.to_string(),
                    },
                };
                warn!(error = %err, "simulation skipped");
                None
            }
        }
    }

    async fn submit(
        &self,
        signer: &Signer,
        to: Address,
        data: &Bytes,
    ) -> Result<(H256, TransactionReceipt)> {
        let hash = signer.ledger.send_transaction(signer.identity.address(), to, data).await?;
        info!(hash = %format!("{:#x}", hash), to = %to, "transaction submitted");
        let receipt = signer
            .ledger
            .wait_for_receipt(hash, self.config.receipt_poll_interval, self.config.finality_timeout)
            .await?;
        info!(
            hash = %format!("{:#x}", hash),
            block = ?receipt.block_number,
            "transaction included"
        );
        Ok((hash, receipt))
    }

    /// Deploy a new safe with the given owners.
    pub async fn create_safe(
        &self,
        ctx: &SessionContext,
        owners: &[&str; OWNER_COUNT],
        name: Option<&str>,
    ) -> Result<ActionReceipt> {
        let (identity, provider) = Self::connected(ctx)?;

        let mut parsed = [Address::zero(); OWNER_COUNT];
        for (slot, raw) in parsed.iter_mut().zip(owners.iter()) {
            *slot = parse_address(raw, "owner")?;
        }
        let distinct: HashSet<&Address> = parsed.iter().collect();
        if distinct.len() != OWNER_COUNT {
            return Err(FortError::DuplicateOwners);
        }

        let _pending = self.begin(None, ActionKind::CreateSafe)?;
        let signer = self.preflight(identity, provider).await?;
        let factory = self.config.factory_address;
        let data = encode_create_save(&parsed);

        let predicted = self.simulate(&signer, factory, &data, decode_create_save_output).await;
        let (hash, receipt) = self.submit(&signer, factory, &data).await?;

        // Event, then prediction, then the newest safe this rescan adds.
        let mut safe = find_safe_created(&receipt.logs, factory)
            .map(|e| e.safe)
            .or(predicted);
        if safe.is_none() {
            info!("created safe not identified, rescanning");
            safe = match self.scanner.scan(&identity, &signer.ledger).await {
                Ok(report) => report.discovered.last().copied(),
                Err(e) => {
                    warn!(error = %e, "rescan after creation failed");
                    None
                }
            };
        }

        if let Some(safe) = safe {
            self.cache.add_safe(&identity, safe);
            if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
                self.cache.set_name(&safe, name);
            }
            info!(safe = %safe, "safe created");
        }

        Ok(ActionReceipt {
            kind: ActionKind::CreateSafe,
            hash,
            safe,
            tx_id: None,
        })
    }

    /// Propose a native transfer from the open safe.
    pub async fn create_transfer(
        &self,
        ctx: &SessionContext,
        session: Option<&SafeSession>,
        to: &str,
        amount: &str,
    ) -> Result<ActionReceipt> {
        let (identity, provider) = Self::connected(ctx)?;
        let session = Self::open_owner(session)?;
        let recipient = parse_address(to, "recipient")?;
        let amount: U256 = parse_amount(amount, self.config.native_currency.decimals)?;

        let safe = session.address;
        let _pending = self.begin(Some(safe), ActionKind::CreateTransfer)?;
        let signer = self.preflight(identity, provider).await?;
        let data = encode_create_tx(recipient, amount);

        let predicted = self.simulate(&signer, safe, &data, decode_create_tx_output).await;
        let (hash, _) = self.submit(&signer, safe, &data).await?;

        if let Some(id) = predicted {
            self.cache.set_tx_hash(&safe, id, hash, false);
        }
        info!(safe = %safe, id = ?predicted, "transfer proposed");
        Ok(ActionReceipt {
            kind: ActionKind::CreateTransfer,
            hash,
            safe: Some(safe),
            tx_id: predicted,
        })
    }

    /// Add the caller's confirmation to transaction `id`.
    pub async fn confirm(
        &self,
        ctx: &SessionContext,
        session: Option<&SafeSession>,
        id: u64,
    ) -> Result<ActionReceipt> {
        self.transition(ctx, session, ActionKind::Confirm(id)).await
    }

    /// Execute transaction `id` once it has enough confirmations.
    pub async fn execute(
        &self,
        ctx: &SessionContext,
        session: Option<&SafeSession>,
        id: u64,
    ) -> Result<ActionReceipt> {
        self.transition(ctx, session, ActionKind::Execute(id)).await
    }

    async fn transition(
        &self,
        ctx: &SessionContext,
        session: Option<&SafeSession>,
        kind: ActionKind,
    ) -> Result<ActionReceipt> {
        let (identity, provider) = Self::connected(ctx)?;
        let session = Self::open_owner(session)?;
        let (id, data, is_final) = match kind {
            ActionKind::Confirm(id) => (id, encode_confirm_tx(id), false),
            ActionKind::Execute(id) => (id, encode_execute_tx(id), true),
            _ => {
                return Err(FortError::unknown(format!(
                    "{} is not a transaction transition",
                    kind
                )))
            }
        };

        let tx = session.transaction(id).ok_or(FortError::UnknownTransaction { id })?;
        if tx.executed {
            return Err(FortError::AlreadyExecuted { id });
        }
        if is_final && !tx.can_execute(self.config.threshold) {
            return Err(FortError::ThresholdNotMet {
                id,
                required: self.config.threshold,
                confirmations: tx.confirm_count(),
            });
        }

        let safe = session.address;
        let _pending = self.begin(Some(safe), kind)?;
        let signer = self.preflight(identity, provider).await?;
        let (hash, _) = self.submit(&signer, safe, &data).await?;

        if !self.cache.set_tx_hash(&safe, id, hash, is_final) {
            debug!(safe = %safe, id, "tx hash not recorded");
        }
        info!(safe = %safe, id, action = %kind, "transaction updated");
        Ok(ActionReceipt {
            kind,
            hash,
            safe: Some(safe),
            tx_id: Some(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockChain;
    use crate::types::{AccessState, Transaction};

    struct Fixture {
        chain: MockChain,
        me: Address,
        ctx: SessionContext,
        cache: LocalCache,
        controller: ActionController,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(FortConfig {
            receipt_poll_interval: std::time::Duration::from_millis(1),
            ..FortConfig::default()
        });
        let chain = MockChain::new(&config);
        let me = Address::repeat_byte(0x0a);
        let wallet = chain.wallet(&[me]);
        wallet.authorize();
        let cache = LocalCache::in_memory();
        let guard = Arc::new(NetworkGuard::new(config.clone()));
        let scanner = Arc::new(DiscoveryScanner::new(config.clone(), cache.clone()));
        let controller = ActionController::new(config, cache.clone(), guard, scanner);
        let ctx = SessionContext {
            generation: 1,
            identity: Some(Identity::new(me)),
            provider_key: Some("injected:0".into()),
            provider: Some(wallet),
            chain_id: 5042002,
            chain_ok: true,
        };
        Fixture {
            chain,
            me,
            ctx,
            cache,
            controller,
        }
    }

    fn session(safe: Address, idx: usize, txs: Vec<Transaction>) -> SafeSession {
        let owners = [
            Address::repeat_byte(0x0a),
            Address::repeat_byte(0x0b),
            Address::repeat_byte(0x0c),
        ];
        SafeSession::owned(safe, owners, idx, U256::zero(), txs, None)
    }

    fn pending_tx(id: u64, bits: [bool; 3]) -> Transaction {
        Transaction {
            id,
            recipient: Address::repeat_byte(0x33),
            amount: U256::from(5),
            executed: false,
            ledger_confirms: bits.iter().filter(|b| **b).count() as u8,
            per_owner_confirmed: bits,
            cached_hash: None,
        }
    }

    #[tokio::test]
    async fn test_create_safe_identifies_new_safe() {
        let f = fixture();
        let owners = owner_args(&f);
        let refs = [owners[0].as_str(), owners[1].as_str(), owners[2].as_str()];
        let receipt = f.controller.create_safe(&f.ctx, &refs, Some("Treasury")).await.unwrap();

        let safe = receipt.safe.unwrap();
        assert_eq!(f.cache.safes(&Identity::new(f.me)), vec![safe]);
        assert_eq!(f.cache.name(&safe).unwrap().value(), "Treasury");
        assert!(f.controller.pending().is_empty());
    }

    fn co_owned(f: &Fixture, first: u8) -> [Address; 3] {
        [f.me, Address::repeat_byte(first), Address::repeat_byte(first + 1)]
    }

    fn owner_args(f: &Fixture) -> [String; 3] {
        [
            format!("{:#x}", f.me),
            format!("{:#x}", Address::repeat_byte(0x0b)),
            format!("{:#x}", Address::repeat_byte(0x0c)),
        ]
    }

    #[tokio::test]
    async fn test_create_safe_rescan_finds_new_safe() {
        let f = fixture();
        let me = Identity::new(f.me);
        let old = f.chain.deploy_safe(co_owned(&f, 0x0d));
        f.cache.add_safe(&me, old);
        f.cache.set_name(&old, "Payroll");
        f.chain.strip_receipt_events(true);
        f.chain.fail_simulations(true);

        let owners = owner_args(&f);
        let refs = [owners[0].as_str(), owners[1].as_str(), owners[2].as_str()];
        let receipt = f.controller.create_safe(&f.ctx, &refs, Some("Treasury")).await.unwrap();

        let safe = receipt.safe.unwrap();
        assert_ne!(safe, old);
        assert_eq!(
            f.chain.safe_owners(safe),
            Some([f.me, Address::repeat_byte(0x0b), Address::repeat_byte(0x0c)])
        );
        assert_eq!(f.cache.name(&safe).unwrap().value(), "Treasury");
        assert_eq!(f.cache.name(&old).unwrap().value(), "Payroll");
    }

    #[tokio::test]
    async fn test_create_safe_without_any_trace_leaves_existing_safes_alone() {
        let f = fixture();
        let me = Identity::new(f.me);
        let old = f.chain.deploy_safe(co_owned(&f, 0x0d));
        f.cache.add_safe(&me, old);
        f.cache.set_name(&old, "Payroll");
        f.chain.drop_created_events(true);
        f.chain.fail_simulations(true);

        let owners = owner_args(&f);
        let refs = [owners[0].as_str(), owners[1].as_str(), owners[2].as_str()];
        let receipt = f.controller.create_safe(&f.ctx, &refs, Some("Treasury")).await.unwrap();

        assert_eq!(receipt.safe, None);
        assert_eq!(f.cache.name(&old).unwrap().value(), "Payroll");
        assert_eq!(f.cache.safes(&me), vec![old]);
    }

    #[tokio::test]
    async fn test_create_safe_validates_owners() {
        let f = fixture();
        let a = format!("{:#x}", f.me);
        let a = a.as_str();
        let other = "0x0000000000000000000000000000000000000001";
        let err = f.controller.create_safe(&f.ctx, &[a, a, other], None).await;
        assert_eq!(err.unwrap_err(), FortError::DuplicateOwners);
        let err = f.controller.create_safe(&f.ctx, &[a, "nope", a], None).await;
        assert_eq!(err.unwrap_err(), FortError::InvalidAddress { field: "owner" });
    }

    #[tokio::test]
    async fn test_transfer_records_predicted_hash() {
        let f = fixture();
        let safe = f.chain.deploy_safe(co_owned(&f, 0x0b));
        let s = session(safe, 0, Vec::new());
        let to = format!("{:#x}", Address::repeat_byte(0x33));

        let receipt = f.controller.create_transfer(&f.ctx, Some(&s), &to, "5").await.unwrap();
        assert_eq!(receipt.tx_id, Some(0));
        assert_eq!(f.cache.tx_hash(&safe, 0).unwrap().into_inner(), receipt.hash);
        assert_eq!(f.chain.safe_txs(safe)[0].amount, U256::exp10(18) * 5);
    }

    #[tokio::test]
    async fn test_transfer_preconditions() {
        let f = fixture();
        let to = format!("{:#x}", Address::repeat_byte(0x33));
        assert_eq!(
            f.controller.create_transfer(&f.ctx, None, &to, "1").await.unwrap_err(),
            FortError::NoSafeOpen
        );
        let denied = SafeSession::cleared(Address::repeat_byte(9), AccessState::Denied);
        assert_eq!(
            f.controller.create_transfer(&f.ctx, Some(&denied), &to, "1").await.unwrap_err(),
            FortError::AccessDenied
        );
        let s = session(Address::repeat_byte(9), 0, Vec::new());
        assert_eq!(
            f.controller.create_transfer(&f.ctx, Some(&s), "bad", "1").await.unwrap_err(),
            FortError::InvalidAddress { field: "recipient" }
        );
        assert!(matches!(
            f.controller.create_transfer(&f.ctx, Some(&s), &to, "0").await.unwrap_err(),
            FortError::InvalidAmount { .. }
        ));
    }

    #[tokio::test]
    async fn test_execute_below_threshold_is_refused_locally() {
        let f = fixture();
        let safe = Address::repeat_byte(9);
        let s = session(safe, 0, vec![pending_tx(0, [true, false, false])]);
        let err = f.controller.execute(&f.ctx, Some(&s), 0).await.unwrap_err();
        assert_eq!(
            err,
            FortError::ThresholdNotMet {
                id: 0,
                required: 2,
                confirmations: 1
            }
        );
        assert_eq!(
            f.controller.confirm(&f.ctx, Some(&s), 7).await.unwrap_err(),
            FortError::UnknownTransaction { id: 7 }
        );
    }

    #[tokio::test]
    async fn test_double_confirm_is_rejected_by_ledger() {
        let f = fixture();
        let safe = f.chain.deploy_safe(co_owned(&f, 0x0b));
        let s = session(safe, 0, Vec::new());
        let to = format!("{:#x}", Address::repeat_byte(0x33));
        f.controller.create_transfer(&f.ctx, Some(&s), &to, "1").await.unwrap();

        let s = session(safe, 0, vec![pending_tx(0, [false, false, false])]);
        f.controller.confirm(&f.ctx, Some(&s), 0).await.unwrap();
        let err = f.controller.confirm(&f.ctx, Some(&s), 0).await.unwrap_err();
        assert!(matches!(err, FortError::SubmissionFailed { .. }));
        assert_eq!(f.chain.safe_txs(safe)[0].confirms(), 1);
    }

    #[tokio::test]
    async fn test_same_action_is_not_started_twice() {
        let f = fixture();
        let safe = Address::repeat_byte(9);
        let _held = f.controller.begin(Some(safe), ActionKind::Confirm(0)).unwrap();
        let s = session(safe, 0, vec![pending_tx(0, [false, false, false])]);
        let err = f.controller.confirm(&f.ctx, Some(&s), 0).await.unwrap_err();
        assert!(matches!(err, FortError::ActionInFlight { .. }));
        assert!(f.controller.is_pending(&PendingAction {
            safe: Some(safe),
            kind: ActionKind::Confirm(0)
        }));
    }
}
