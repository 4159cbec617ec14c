//! Core data model for safes, sessions and pending actions.
//!
//! Values that come from the local cache are wrapped in [`Advisory`] so they
//! can never be mistaken for on-chain verified fields.

use core::fmt;

use ethers::types::{Address, H256, U256};
use ethers::utils::to_checksum;
use serde::Serialize;

use crate::error::{Affordance, FortError};

/// Number of owner slots of every safe.
pub const OWNER_COUNT: usize = 3;

/// A value read from the advisory (local cache) tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Advisory<T>(T);

impl<T> Advisory<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

/// The normalized account currently authorized through the signing provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Identity(Address);

impl Identity {
    pub fn new(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> Address {
        self.0
    }

    /// Lowercase hex form used to namespace cache keys.
    pub fn cache_key(&self) -> String {
        format!("{:#x}", self.0)
    }

    /// Case-insensitive match against another address.
    pub fn matches(&self, other: &Address) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_checksum(&self.0, None))
    }
}

impl From<Address> for Identity {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

/// Access level of the current identity on a loaded safe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum AccessState {
    #[default]
    None,
    Checking,
    Owner,
    Denied,
}

/// One entry of the identity's safe collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SafeRecord {
    pub address: Address,
    pub cached_name: Option<Advisory<String>>,
    pub hidden: bool,
    /// Scan checkpoint of the owning identity when the record was read.
    pub last_scan_checkpoint: Option<u64>,
}

/// On-chain transaction slot of a safe, with per-owner confirmation bits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: u64,
    pub recipient: Address,
    pub amount: U256,
    pub executed: bool,
    /// Raw confirmation counter reported by the contract.
    pub ledger_confirms: u8,
    pub per_owner_confirmed: [bool; OWNER_COUNT],
    pub cached_hash: Option<Advisory<H256>>,
}

impl Transaction {
    /// Confirmations counted from the per-owner bits.
    ///
    /// Always equal to the number of `true` entries; a bit that could not be
    /// read is `false` and does not count.
    pub fn confirm_count(&self) -> u8 {
        self.per_owner_confirmed.iter().filter(|c| **c).count() as u8
    }

    pub fn can_confirm(&self, owner_index: usize) -> bool {
        !self.executed
            && self
                .per_owner_confirmed
                .get(owner_index)
                .map(|c| !*c)
                .unwrap_or(false)
    }

    pub fn can_execute(&self, threshold: u8) -> bool {
        !self.executed && self.confirm_count() >= threshold
    }
}

/// Fully loaded view of one safe for the current identity.
///
/// Rebuilt on every load. `owner_index` is `Some` only when `access` is
/// [`AccessState::Owner`]; in every other state the owner-scoped fields are
/// empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SafeSession {
    pub address: Address,
    pub access: AccessState,
    pub owners: Vec<Address>,
    pub owner_index: Option<usize>,
    pub balance: U256,
    pub transactions: Vec<Transaction>,
    pub name: Option<Advisory<String>>,
}

impl SafeSession {
    /// A session with every owner-scoped field cleared.
    pub fn cleared(address: Address, access: AccessState) -> Self {
        debug_assert!(access != AccessState::Owner);
        Self {
            address,
            access,
            owners: Vec::new(),
            owner_index: None,
            balance: U256::zero(),
            transactions: Vec::new(),
            name: None,
        }
    }

    pub fn owned(
        address: Address,
        owners: [Address; OWNER_COUNT],
        owner_index: usize,
        balance: U256,
        transactions: Vec<Transaction>,
        name: Option<Advisory<String>>,
    ) -> Self {
        Self {
            address,
            access: AccessState::Owner,
            owners: owners.to_vec(),
            owner_index: Some(owner_index),
            balance,
            transactions,
            name,
        }
    }

    /// Index of the caller among the owners, or -1.
    pub fn owner_index_of_caller(&self) -> i64 {
        match (self.access, self.owner_index) {
            (AccessState::Owner, Some(i)) => i as i64,
            _ => -1,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.access == AccessState::Owner && self.owner_index.is_some()
    }

    pub fn transaction(&self, id: u64) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }
}

/// Mutating operations driven by the action controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    CreateSafe,
    CreateTransfer,
    Confirm(u64),
    Execute(u64),
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateSafe => write!(f, "Create safe"),
            Self::CreateTransfer => write!(f, "Create transfer"),
            Self::Confirm(id) => write!(f, "Confirm TX {}", id),
            Self::Execute(id) => write!(f, "Execute TX {}", id),
        }
    }
}

/// An action in flight for a safe (`None` for factory-level actions).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PendingAction {
    pub safe: Option<Address>,
    pub kind: ActionKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Severity {
    Ok,
    Error,
}

/// Human-readable outcome for one logical area of the UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
    pub tx_hash: Option<H256>,
    pub affordance: Affordance,
}

impl Message {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Ok,
            text: text.into(),
            tx_hash: None,
            affordance: Affordance::None,
        }
    }

    pub fn ok_with_hash(text: impl Into<String>, hash: H256) -> Self {
        Self {
            tx_hash: Some(hash),
            ..Self::ok(text)
        }
    }

    pub fn error(err: &FortError) -> Self {
        Self {
            severity: Severity::Error,
            text: err.to_string(),
            tx_hash: None,
            affordance: err.affordance(),
        }
    }
}
