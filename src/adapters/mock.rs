//! Deterministic in-memory chain and wallet.
//!
//! [`MockChain`] holds ledger state (factory, safes, balances, logs,
//! receipts) and implements the factory and safe contract rules. Any number
//! of [`MockWallet`] handles can be opened on it; each implements
//! [`SigningProvider`] with its own accounts, selected chain and fault
//! injection, so multi-owner flows run against one shared ledger.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::adapters::contracts::{self, Call, SafeCreated};
use crate::adapters::{parse_quantity, ProviderError, ProviderEvent, SigningProvider};
use crate::config::FortConfig;
use crate::types::OWNER_COUNT;

const THRESHOLD: u8 = 2;
const CONTRACT_CODE: &str = "0x6080604052";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MockTx {
    pub to: Address,
    pub amount: U256,
    pub executed: bool,
    pub confirmed: [bool; OWNER_COUNT],
}

impl MockTx {
    pub fn confirms(&self) -> u8 {
        self.confirmed.iter().filter(|c| **c).count() as u8
    }
}

#[derive(Clone, Debug)]
struct SafeState {
    owners: [Address; OWNER_COUNT],
    txs: Vec<MockTx>,
}

#[derive(Default)]
struct Faults {
    failing_log_ranges: Vec<(u64, u64)>,
    gated_reads: bool,
    owner_read_failures: HashSet<Address>,
    confirmed_read_failures: HashSet<Address>,
    drop_created_events: bool,
    strip_receipt_events: bool,
    fail_simulations: bool,
}

struct ChainState {
    chain_id: u64,
    block: u64,
    factory: Address,
    safes: HashMap<Address, SafeState>,
    balances: HashMap<Address, U256>,
    logs: Vec<Log>,
    receipts: HashMap<H256, TransactionReceipt>,
    created: u64,
    tx_seq: u64,
    faults: Faults,
}

fn revert(reason: &str) -> ProviderError {
    ProviderError::Rpc(json!({
        "code": -32603,
        "message": format!("execution reverted: {}", reason),
    }))
}

impl ChainState {
    fn next_safe_address(&self) -> Address {
        let mut seed = self.factory.as_bytes().to_vec();
        seed.extend_from_slice(&self.created.to_be_bytes());
        Address::from_slice(&keccak256(seed)[12..])
    }

    fn next_tx_hash(&mut self) -> H256 {
        self.tx_seq += 1;
        H256::from(keccak256(self.tx_seq.to_be_bytes()))
    }

    fn owner_index(&self, safe: &Address, who: &Address) -> Option<usize> {
        self.safes.get(safe)?.owners.iter().position(|o| o == who)
    }

    fn create_safe(
        &mut self,
        owners: [Address; OWNER_COUNT],
        hash: Option<H256>,
    ) -> Result<(Address, Vec<Log>), ProviderError> {
        let distinct: HashSet<&Address> = owners.iter().collect();
        if distinct.len() != OWNER_COUNT || owners.iter().any(|o| o.is_zero()) {
            return Err(revert("bad owners"));
        }
        let safe = self.next_safe_address();
        self.created += 1;
        self.block += 1;
        self.safes.insert(safe, SafeState { owners, txs: Vec::new() });

        let mut emitted = Vec::new();
        if !self.faults.drop_created_events {
            let (topics, data) = contracts::encode_safe_created(&SafeCreated { safe, owners });
            let log = Log {
                address: self.factory,
                topics,
                data,
                block_number: Some(U64::from(self.block)),
                transaction_hash: hash,
                ..Default::default()
            };
            self.logs.push(log.clone());
            if !self.faults.strip_receipt_events {
                emitted.push(log);
            }
        }
        Ok((safe, emitted))
    }

    /// Apply (or, with `commit == false`, simulate) a call from `from`.
    fn execute(
        &mut self,
        from: Address,
        to: Address,
        call: Call,
        commit: bool,
        hash: Option<H256>,
    ) -> Result<(Bytes, Vec<Log>), ProviderError> {
        if to == self.factory {
            return match call {
                Call::CreateSave(owners) => {
                    if !commit {
                        let distinct: HashSet<&Address> = owners.iter().collect();
                        if distinct.len() != OWNER_COUNT {
                            return Err(revert("bad owners"));
                        }
                        let predicted = self.next_safe_address();
                        let out = contracts::encode_output(&[Token::Address(predicted)]);
                        return Ok((out, Vec::new()));
                    }
                    let (safe, logs) = self.create_safe(owners, hash)?;
                    Ok((contracts::encode_output(&[Token::Address(safe)]), logs))
                }
                _ => Err(revert("unknown factory call")),
            };
        }

        let owner_idx = self.owner_index(&to, &from);
        let balance = self.balances.get(&to).copied().unwrap_or_default();
        let Some(state) = self.safes.get_mut(&to) else {
            return Err(revert("no contract"));
        };
        let Some(idx) = owner_idx else {
            return Err(revert("not owner"));
        };

        let output = match call {
            Call::CreateTx(recipient, amount) => {
                let id = state.txs.len() as u64;
                if commit {
                    state.txs.push(MockTx {
                        to: recipient,
                        amount,
                        ..Default::default()
                    });
                }
                contracts::encode_output(&[Token::Uint(id.into())])
            }
            Call::ConfirmTx(id) => {
                let tx = state.txs.get_mut(id as usize).ok_or_else(|| revert("no tx"))?;
                if tx.executed {
                    return Err(revert("executed"));
                }
                if tx.confirmed[idx] {
                    return Err(revert("already confirmed"));
                }
                if commit {
                    tx.confirmed[idx] = true;
                }
                Bytes::default()
            }
            Call::ExecuteTx(id) => {
                let tx = state.txs.get_mut(id as usize).ok_or_else(|| revert("no tx"))?;
                if tx.executed {
                    return Err(revert("executed"));
                }
                if tx.confirms() < THRESHOLD {
                    return Err(revert("not enough confirmations"));
                }
                if balance < tx.amount {
                    return Err(revert("insufficient balance"));
                }
                let (recipient, amount) = (tx.to, tx.amount);
                if commit {
                    tx.executed = true;
                    self.balances.insert(to, balance - amount);
                    *self.balances.entry(recipient).or_default() += amount;
                }
                Bytes::default()
            }
            _ => return Err(revert("not a state-changing call")),
        };
        if commit {
            self.block += 1;
        }
        Ok((output, Vec::new()))
    }

    fn read(&self, from: Option<Address>, to: Address, call: Call) -> Result<Bytes, ProviderError> {
        let state = self.safes.get(&to).ok_or_else(|| revert("no contract"))?;
        let caller_is_owner = from.map(|f| state.owners.contains(&f)).unwrap_or(false);
        let gated = self.faults.gated_reads && !caller_is_owner;

        match call {
            Call::Owners(i) => {
                if gated || self.faults.owner_read_failures.contains(&to) {
                    return Err(revert("owners: access"));
                }
                let owner = state.owners.get(i as usize).ok_or_else(|| revert("index"))?;
                Ok(contracts::encode_output(&[Token::Address(*owner)]))
            }
            Call::Txs(i) => {
                if gated {
                    return Err(revert("txs: access"));
                }
                let tx = state.txs.get(i as usize).ok_or_else(|| revert("index"))?;
                Ok(contracts::encode_output(&[
                    Token::Address(tx.to),
                    Token::Uint(tx.amount),
                    Token::Bool(tx.executed),
                    Token::Uint(tx.confirms().into()),
                ]))
            }
            Call::Confirmed(id, owner) => {
                if gated || self.faults.confirmed_read_failures.contains(&to) {
                    return Err(revert("confirmed: access"));
                }
                let tx = state.txs.get(id as usize).ok_or_else(|| revert("index"))?;
                let bit = state
                    .owners
                    .iter()
                    .position(|o| *o == owner)
                    .map(|i| tx.confirmed[i])
                    .unwrap_or(false);
                Ok(contracts::encode_output(&[Token::Bool(bit)]))
            }
            _ => Err(revert("not a view")),
        }
    }
}

/// Shared in-memory ledger.
#[derive(Clone)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new(&FortConfig::default())
    }
}

impl MockChain {
    /// A chain matching `config`'s target chain and factory.
    pub fn new(config: &FortConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                chain_id: config.chain_id,
                block: config.factory_from_block,
                factory: config.factory_address,
                safes: HashMap::new(),
                balances: HashMap::new(),
                logs: Vec::new(),
                receipts: HashMap::new(),
                created: 0,
                tx_seq: 0,
                faults: Faults::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn chain_id(&self) -> u64 {
        self.lock().chain_id
    }

    /// Open an unauthorized wallet holding `accounts`, pointed at this chain.
    pub fn wallet(&self, accounts: &[Address]) -> Arc<MockWallet> {
        let chain_id = self.chain_id();
        Arc::new(MockWallet::new(self.clone(), accounts.to_vec(), chain_id, false))
    }

    /// Read-only endpoint with no accounts.
    pub fn rpc(&self) -> Arc<MockWallet> {
        let chain_id = self.chain_id();
        Arc::new(MockWallet::new(self.clone(), Vec::new(), chain_id, true))
    }

    /// Deploy a safe directly, as if another client had created it.
    pub fn deploy_safe(&self, owners: [Address; OWNER_COUNT]) -> Address {
        let mut state = self.lock();
        let hash = state.next_tx_hash();
        match state.create_safe(owners, Some(hash)) {
            Ok((safe, _)) => safe,
            Err(_) => Address::zero(),
        }
    }

    pub fn fund(&self, address: Address, amount: U256) {
        *self.lock().balances.entry(address).or_default() += amount;
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.lock().balances.get(&address).copied().unwrap_or_default()
    }

    pub fn mine(&self, blocks: u64) {
        self.lock().block += blocks;
    }

    pub fn block_number(&self) -> u64 {
        self.lock().block
    }

    pub fn safe_txs(&self, safe: Address) -> Vec<MockTx> {
        self.lock().safes.get(&safe).map(|s| s.txs.clone()).unwrap_or_default()
    }

    pub fn safe_owners(&self, safe: Address) -> Option<[Address; OWNER_COUNT]> {
        self.lock().safes.get(&safe).map(|s| s.owners)
    }

    /// `eth_getLogs` fails for any query overlapping `[from, to]`.
    pub fn fail_logs_between(&self, from: u64, to: u64) {
        self.lock().faults.failing_log_ranges.push((from, to));
    }

    pub fn clear_log_failures(&self) {
        self.lock().faults.failing_log_ranges.clear();
    }

    /// Safe views revert unless the caller is an owner.
    pub fn set_gated_reads(&self, gated: bool) {
        self.lock().faults.gated_reads = gated;
    }

    pub fn fail_owner_reads(&self, safe: Address) {
        self.lock().faults.owner_read_failures.insert(safe);
    }

    pub fn fail_confirmed_reads(&self, safe: Address, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.faults.confirmed_read_failures.insert(safe);
        } else {
            state.faults.confirmed_read_failures.remove(&safe);
        }
    }

    pub fn drop_created_events(&self, drop: bool) {
        self.lock().faults.drop_created_events = drop;
    }

    /// The creation event stays queryable through `eth_getLogs` but is left
    /// out of the transaction receipt.
    pub fn strip_receipt_events(&self, strip: bool) {
        self.lock().faults.strip_receipt_events = strip;
    }

    pub fn fail_simulations(&self, fail: bool) {
        self.lock().faults.fail_simulations = fail;
    }

    fn handle_read(&self, method: &str, params: &Value) -> Result<Value, ProviderError> {
        let state = self.lock();
        match method {
            "eth_blockNumber" => Ok(json!(format!("{:#x}", state.block))),
            "eth_getCode" => {
                let address = param_address(params, 0)?;
                let code = if state.safes.contains_key(&address) || address == state.factory {
                    CONTRACT_CODE
                } else {
                    "0x"
                };
                Ok(json!(code))
            }
            "eth_getBalance" => {
                let address = param_address(params, 0)?;
                let balance = state.balances.get(&address).copied().unwrap_or_default();
                Ok(json!(balance))
            }
            "eth_getLogs" => {
                let filter = params.get(0).ok_or_else(|| bad_params(method))?;
                let bound = |field: &str| {
                    filter.get(field).and_then(parse_quantity).ok_or_else(|| bad_params(method))
                };
                let from = bound("fromBlock")?;
                let to = bound("toBlock")?;
                if state
                    .faults
                    .failing_log_ranges
                    .iter()
                    .any(|(a, b)| from <= *b && *a <= to)
                {
                    return Err(ProviderError::rpc(
                        -32005,
                        "query returned more than 10000 results",
                    ));
                }
                let address: Option<Address> = filter
                    .get("address")
                    .and_then(|a| serde_json::from_value(a.clone()).ok());
                let topic0: Option<H256> = filter
                    .get("topics")
                    .and_then(|t| t.get(0))
                    .and_then(|t| serde_json::from_value(t.clone()).ok());
                let logs: Vec<&Log> = state
                    .logs
                    .iter()
                    .filter(|l| {
                        let block = l.block_number.map(|b| b.as_u64()).unwrap_or(0);
                        block >= from
                            && block <= to
                            && address.map(|a| a == l.address).unwrap_or(true)
                            && topic0.map(|t| l.topics.first() == Some(&t)).unwrap_or(true)
                    })
                    .collect();
                serde_json::to_value(logs).map_err(|e| ProviderError::Transport(e.to_string()))
            }
            "eth_getTransactionReceipt" => {
                let hash: H256 = params
                    .get(0)
                    .and_then(|h| serde_json::from_value(h.clone()).ok())
                    .ok_or_else(|| bad_params(method))?;
                match state.receipts.get(&hash) {
                    Some(r) => serde_json::to_value(r)
                        .map_err(|e| ProviderError::Transport(e.to_string())),
                    None => Ok(Value::Null),
                }
            }
            _ => Err(ProviderError::Unsupported(method.to_string())),
        }
    }

    fn handle_call(&self, params: &Value) -> Result<Value, ProviderError> {
        let request = params.get(0).ok_or_else(|| bad_params("eth_call"))?;
        let (to, data, from) = parse_tx_request(request)?;
        let call = contracts::decode_call(&data).ok_or_else(|| revert("unknown selector"))?;

        let mut state = self.lock();
        let output = match call {
            Call::Owners(_) | Call::Txs(_) | Call::Confirmed(..) => state.read(from, to, call)?,
            _ => {
                if state.faults.fail_simulations {
                    return Err(ProviderError::rpc(-32000, "eth_call is not available"));
                }
                let from = from.unwrap_or_default();
                state.execute(from, to, call, false, None)?.0
            }
        };
        Ok(json!(output))
    }

    fn handle_send(&self, accounts: &[Address], params: &Value) -> Result<Value, ProviderError> {
        let request = params.get(0).ok_or_else(|| bad_params("eth_sendTransaction"))?;
        let (to, data, from) = parse_tx_request(request)?;
        let from = from.ok_or_else(|| bad_params("eth_sendTransaction"))?;
        if !accounts.contains(&from) {
            return Err(ProviderError::rpc(4100, "The requested account has not been authorized"));
        }
        let call = contracts::decode_call(&data).ok_or_else(|| revert("unknown selector"))?;

        let mut state = self.lock();
        let hash = state.next_tx_hash();
        let (_, logs) = state.execute(from, to, call, true, Some(hash))?;
        let receipt = TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(state.block)),
            from,
            to: Some(to),
            logs,
            status: Some(U64::one()),
            ..Default::default()
        };
        state.receipts.insert(hash, receipt);
        Ok(json!(hash))
    }
}

fn bad_params(method: &str) -> ProviderError {
    ProviderError::rpc(-32602, format!("invalid params for {}", method))
}

fn param_address(params: &Value, idx: usize) -> Result<Address, ProviderError> {
    params
        .get(idx)
        .and_then(|a| serde_json::from_value(a.clone()).ok())
        .ok_or_else(|| bad_params("address"))
}

fn parse_tx_request(request: &Value) -> Result<(Address, Bytes, Option<Address>), ProviderError> {
    let to: Address = request
        .get("to")
        .and_then(|a| serde_json::from_value(a.clone()).ok())
        .ok_or_else(|| bad_params("to"))?;
    let data: Bytes = request
        .get("data")
        .or_else(|| request.get("input"))
        .and_then(|d| serde_json::from_value(d.clone()).ok())
        .unwrap_or_default();
    let from: Option<Address> = request
        .get("from")
        .and_then(|a| serde_json::from_value(a.clone()).ok());
    Ok((to, data, from))
}

struct WalletState {
    accounts: Vec<Address>,
    authorized: bool,
    chain_id: u64,
    known_chains: HashSet<u64>,
    reject_add_chain: bool,
    failures: HashMap<String, VecDeque<ProviderError>>,
    delays: HashMap<String, Duration>,
    requests: Vec<String>,
    flags: Vec<String>,
}

/// A wallet (or read-only endpoint) attached to a [`MockChain`].
pub struct MockWallet {
    chain: MockChain,
    read_only: bool,
    state: Mutex<WalletState>,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockWallet {
    fn new(chain: MockChain, accounts: Vec<Address>, chain_id: u64, read_only: bool) -> Self {
        let (events, _) = broadcast::channel(32);
        let mut known_chains = HashSet::new();
        known_chains.insert(chain_id);
        Self {
            chain,
            read_only,
            state: Mutex::new(WalletState {
                accounts,
                authorized: read_only,
                chain_id,
                known_chains,
                reject_add_chain: false,
                failures: HashMap::new(),
                delays: HashMap::new(),
                requests: Vec::new(),
                flags: vec!["isMetaMask".to_string()],
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Grant account access without a prompt (an earlier session did).
    pub fn authorize(&self) {
        self.lock().authorized = true;
    }

    pub fn revoke(&self) {
        self.lock().authorized = false;
    }

    /// User switches the wallet to another chain from the wallet UI.
    pub fn set_chain(&self, chain_id: u64) {
        {
            let mut state = self.lock();
            state.chain_id = chain_id;
            state.known_chains.insert(chain_id);
        }
        let _ = self.events.send(ProviderEvent::ChainChanged(chain_id));
    }

    /// Move the wallet to a chain without notifying listeners.
    pub fn set_chain_silently(&self, chain_id: u64) {
        let mut state = self.lock();
        state.chain_id = chain_id;
        state.known_chains.insert(chain_id);
    }

    /// Remove a chain from the wallet's known set; switching to it then
    /// fails with 4902 until it is added again.
    pub fn forget_chain(&self, chain_id: u64) {
        self.lock().known_chains.remove(&chain_id);
    }

    pub fn reject_add_chain(&self, reject: bool) {
        self.lock().reject_add_chain = reject;
    }

    /// User changes the selected account(s).
    pub fn set_accounts(&self, accounts: Vec<Address>) {
        let visible = {
            let mut state = self.lock();
            state.accounts = accounts;
            if state.authorized {
                state.accounts.clone()
            } else {
                Vec::new()
            }
        };
        let _ = self.events.send(ProviderEvent::AccountsChanged(visible));
    }

    /// Queue a failure for the next request of `method`.
    pub fn fail_next(&self, method: &str, error: ProviderError) {
        self.lock()
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn reject_next(&self, method: &str) {
        self.fail_next(method, ProviderError::rpc(4001, "User rejected the request."));
    }

    pub fn busy_next(&self, method: &str) {
        self.fail_next(method, ProviderError::rpc(-32002, "Request already pending"));
    }

    /// Delay every request of `method`.
    pub fn delay(&self, method: &str, delay: Duration) {
        self.lock().delays.insert(method.to_string(), delay);
    }

    pub fn set_flags(&self, flags: &[&str]) {
        self.lock().flags = flags.iter().map(|f| f.to_string()).collect();
    }

    /// Methods requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.lock().requests.iter().filter(|m| *m == method).count()
    }

    pub fn chain(&self) -> &MockChain {
        &self.chain
    }

    pub fn current_chain(&self) -> u64 {
        self.lock().chain_id
    }

    fn on_ledger_chain(&self) -> bool {
        self.lock().chain_id == self.chain.chain_id()
    }

    fn handle_wallet(&self, method: &str, params: &Value) -> Result<Value, ProviderError> {
        match method {
            "eth_chainId" => Ok(json!(format!("{:#x}", self.lock().chain_id))),
            "eth_accounts" => {
                let state = self.lock();
                let accounts = if state.authorized { state.accounts.clone() } else { Vec::new() };
                Ok(json!(accounts))
            }
            "eth_requestAccounts" => {
                let mut state = self.lock();
                state.authorized = true;
                Ok(json!(state.accounts.clone()))
            }
            "wallet_switchEthereumChain" => {
                let target = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .and_then(parse_quantity)
                    .ok_or_else(|| bad_params(method))?;
                {
                    let mut state = self.lock();
                    if !state.known_chains.contains(&target) {
                        let reason = format!("Unrecognized chain ID \"{:#x}\".", target);
                        return Err(ProviderError::Rpc(json!({
                            "code": -32603,
                            "message": "Internal JSON-RPC error.",
                            "data": {"originalError": {"code": 4902, "message": reason}}
                        })));
                    }
                    if state.chain_id == target {
                        return Ok(Value::Null);
                    }
                    state.chain_id = target;
                }
                let _ = self.events.send(ProviderEvent::ChainChanged(target));
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let target = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .and_then(parse_quantity)
                    .ok_or_else(|| bad_params(method))?;
                let mut state = self.lock();
                if state.reject_add_chain {
                    return Err(ProviderError::rpc(4001, "User rejected the request."));
                }
                state.known_chains.insert(target);
                Ok(Value::Null)
            }
            _ => Err(ProviderError::Unsupported(method.to_string())),
        }
    }
}

#[async_trait]
impl SigningProvider for MockWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let (delay, failure) = {
            let mut state = self.lock();
            state.requests.push(method.to_string());
            let failure = state.failures.get_mut(method).and_then(VecDeque::pop_front);
            (state.delays.get(method).copied(), failure)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }

        match method {
            "eth_chainId" | "eth_accounts" => self.handle_wallet(method, &params),
            "eth_requestAccounts" | "wallet_switchEthereumChain" | "wallet_addEthereumChain"
                if !self.read_only =>
            {
                self.handle_wallet(method, &params)
            }
            "eth_sendTransaction" if !self.read_only => {
                if !self.on_ledger_chain() {
                    return Err(ProviderError::rpc(-32603, "chain mismatch"));
                }
                let accounts = {
                    let state = self.lock();
                    if state.authorized { state.accounts.clone() } else { Vec::new() }
                };
                self.chain.handle_send(&accounts, &params)
            }
            "eth_call" => {
                if !self.on_ledger_chain() {
                    return Err(revert("no contract"));
                }
                self.chain.handle_call(&params)
            }
            "eth_blockNumber" | "eth_getCode" | "eth_getBalance" | "eth_getLogs"
            | "eth_getTransactionReceipt" => {
                if !self.on_ledger_chain() {
                    // A different network: nothing deployed, nothing logged.
                    return Ok(match method {
                        "eth_blockNumber" => json!("0x0"),
                        "eth_getCode" => json!("0x"),
                        "eth_getBalance" => json!("0x0"),
                        "eth_getLogs" => json!([]),
                        _ => Value::Null,
                    });
                }
                self.chain.handle_read(method, &params)
            }
            _ => Err(ProviderError::Unsupported(method.to_string())),
        }
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        if self.read_only {
            return None;
        }
        Some(self.events.subscribe())
    }

    fn capability_flags(&self) -> Vec<String> {
        self.lock().flags.clone()
    }
}
