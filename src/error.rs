//! Error types for safe synchronization operations.
//!
//! Every public operation reports a [`FortError`]; raw provider failures are
//! mapped into it by [`crate::classifier`] and never cross the crate boundary
//! unclassified.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Closed error taxonomy shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    RequestTimeout,
    UserRejected,
    ProviderBusy,
    ChainUnrecognized,
    WrongNetwork,
    /// Owner slots were read and the caller is not among them.
    NotAnOwner,
    /// Owner slots could not be read under the caller's context.
    OwnerCheckReverted,
    ContractAbsent,
    InvalidAddress,
    InvalidAmount,
    /// Non-fatal: the enclosing action continues without a prediction.
    SimulationUnavailable,
    SubmissionFailed,
    /// No identity or no usable provider.
    NotConnected,
    /// A local precondition of an action does not hold.
    Precondition,
    Unknown,
}

/// What the UI collaborator should offer next to an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Affordance {
    Retry,
    SwitchNetwork,
    None,
}

/// Errors that can occur while syncing or acting on a safe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FortError {
    #[error("Wallet request timed out. Open wallet and confirm.")]
    RequestTimeout,
    #[error("Request rejected in wallet.")]
    UserRejected,
    #[error("Wallet request already pending. Open wallet.")]
    ProviderBusy,
    #[error("Wallet does not recognize the requested chain")]
    ChainUnrecognized,
    #[error("Wrong network. Switch to {network} ({chain_id}).")]
    WrongNetwork { network: String, chain_id: u64 },
    #[error("Network switch already requested. Confirm it in wallet.")]
    SwitchInProgress,
    #[error("Access denied. You are not an owner of this safe.")]
    NotAnOwner,
    #[error("Access denied. Owner check failed: {reason}")]
    OwnerCheckReverted { reason: String },
    #[error("No contract at this address on current network")]
    ContractAbsent,
    #[error("Invalid {field} address")]
    InvalidAddress { field: &'static str },
    #[error("Owners must be 3 different addresses")]
    DuplicateOwners,
    #[error("{reason}")]
    InvalidAmount { reason: String },
    #[error("Prediction unavailable: {reason}")]
    SimulationUnavailable { reason: String },
    #[error("Transaction failed: {reason}")]
    SubmissionFailed { reason: String },
    #[error("Transaction {hash} was not finalized within {timeout:?}")]
    FinalityTimeout { hash: String, timeout: Duration },
    #[error("Connect wallet first")]
    NotConnected,
    #[error("Wallet not detected. Reconnect.")]
    ProviderMissing,
    #[error("Open a Safe first")]
    NoSafeOpen,
    #[error("Access denied")]
    AccessDenied,
    #[error("{action} already in progress")]
    ActionInFlight { action: String },
    #[error("TX {id} not found")]
    UnknownTransaction { id: u64 },
    #[error("TX {id} needs {required} confirmations, has {confirmations}")]
    ThresholdNotMet {
        id: u64,
        required: u8,
        confirmations: u8,
    },
    #[error("TX {id} is already executed")]
    AlreadyExecuted { id: u64 },
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
    #[error("{reason}")]
    Unknown { reason: String },
}

impl FortError {
    /// Position of this error in the closed taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RequestTimeout | Self::FinalityTimeout { .. } => ErrorKind::RequestTimeout,
            Self::UserRejected => ErrorKind::UserRejected,
            Self::ProviderBusy | Self::SwitchInProgress => ErrorKind::ProviderBusy,
            Self::ChainUnrecognized => ErrorKind::ChainUnrecognized,
            Self::WrongNetwork { .. } => ErrorKind::WrongNetwork,
            Self::NotAnOwner | Self::AccessDenied => ErrorKind::NotAnOwner,
            Self::OwnerCheckReverted { .. } => ErrorKind::OwnerCheckReverted,
            Self::ContractAbsent => ErrorKind::ContractAbsent,
            Self::InvalidAddress { .. } | Self::DuplicateOwners => ErrorKind::InvalidAddress,
            Self::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            Self::SimulationUnavailable { .. } => ErrorKind::SimulationUnavailable,
            Self::SubmissionFailed { .. } => ErrorKind::SubmissionFailed,
            Self::NotConnected | Self::ProviderMissing => ErrorKind::NotConnected,
            Self::NoSafeOpen
            | Self::ActionInFlight { .. }
            | Self::UnknownTransaction { .. }
            | Self::ThresholdNotMet { .. }
            | Self::AlreadyExecuted { .. } => ErrorKind::Precondition,
            Self::Config { .. } | Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Timeouts, busy providers and wallet rejections are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RequestTimeout | ErrorKind::ProviderBusy | ErrorKind::UserRejected
        )
    }

    pub fn affordance(&self) -> Affordance {
        match self.kind() {
            ErrorKind::WrongNetwork | ErrorKind::ChainUnrecognized => Affordance::SwitchNetwork,
            ErrorKind::NotAnOwner | ErrorKind::OwnerCheckReverted | ErrorKind::ContractAbsent => {
                Affordance::None
            }
            _ if self.is_transient() => Affordance::Retry,
            ErrorKind::SubmissionFailed | ErrorKind::Unknown => Affordance::Retry,
            _ => Affordance::None,
        }
    }

    pub(crate) fn unknown(reason: impl Into<String>) -> Self {
        Self::Unknown {
            reason: reason.into(),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = core::result::Result<T, FortError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds_offer_retry() {
        for err in [FortError::RequestTimeout, FortError::ProviderBusy, FortError::UserRejected] {
            assert!(err.is_transient());
            assert_eq!(err.affordance(), Affordance::Retry);
        }
    }

    #[test]
    fn test_terminal_kinds_offer_nothing() {
        assert_eq!(FortError::NotAnOwner.affordance(), Affordance::None);
        assert_eq!(FortError::ContractAbsent.affordance(), Affordance::None);
        assert_eq!(
            FortError::OwnerCheckReverted { reason: "revert".into() }.affordance(),
            Affordance::None
        );
    }

    #[test]
    fn test_wrong_network_offers_switch() {
        let err = FortError::WrongNetwork {
            network: "Arc Testnet".into(),
            chain_id: 5042002,
        };
        assert_eq!(err.kind(), ErrorKind::WrongNetwork);
        assert_eq!(err.affordance(), Affordance::SwitchNetwork);
        assert_eq!(err.to_string(), "Wrong network. Switch to Arc Testnet (5042002).");
    }

    #[test]
    fn test_precondition_kinds() {
        let err = FortError::ThresholdNotMet { id: 0, required: 2, confirmations: 1 };
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(!err.is_transient());
        assert_eq!(FortError::NoSafeOpen.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn test_pending_switch_is_busy_not_wrong_network() {
        let err = FortError::SwitchInProgress;
        assert_eq!(err.kind(), ErrorKind::ProviderBusy);
        assert_eq!(err.affordance(), Affordance::Retry);
        assert!(!err.to_string().starts_with("Wrong network"));
    }
}
