//! Provider error classification.
//!
//! Wallet vendors wrap JSON-RPC errors in different envelopes (ethers-style
//! `info.error`, MetaMask `data.originalError`, plain `{code, message}`).
//! This module walks the known envelopes and maps them onto [`FortError`].

use serde_json::Value;

use crate::adapters::ProviderError;
use crate::error::FortError;

/// Pointers probed for an error code, in priority order.
const CODE_PATHS: &[&str] = &[
    "/code",
    "/data/originalError/code",
    "/data/code",
    "/error/code",
    "/info/error/code",
    "/info/error/data/originalError/code",
];

/// Pointers probed for a human-readable message, in priority order.
const MESSAGE_PATHS: &[&str] = &[
    "/shortMessage",
    "/reason",
    "/message",
    "/info/error/message",
    "/data/message",
    "/data/originalError/message",
    "/error/message",
];

const USER_REJECTED: i64 = 4001;
const REQUEST_PENDING: i64 = -32002;
const UNRECOGNIZED_CHAIN: i64 = 4902;

/// A code found in an error envelope. Some libraries use string codes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Numeric(i64),
    Named(String),
}

/// First code found along [`CODE_PATHS`].
pub fn error_code(value: &Value) -> Option<ErrorCode> {
    CODE_PATHS.iter().find_map(|path| match value.pointer(path)? {
        Value::Number(n) => n.as_i64().map(ErrorCode::Numeric),
        Value::String(s) if !s.is_empty() => Some(ErrorCode::Named(s.clone())),
        _ => None,
    })
}

/// First non-empty message found along [`MESSAGE_PATHS`].
pub fn error_message(value: &Value) -> Option<String> {
    if let Value::String(s) = value {
        return (!s.trim().is_empty()).then(|| s.trim().to_string());
    }
    MESSAGE_PATHS.iter().find_map(|path| {
        value
            .pointer(path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn has_code(value: &Value, wanted: i64) -> bool {
    CODE_PATHS
        .iter()
        .filter_map(|path| value.pointer(path).and_then(Value::as_i64))
        .any(|c| c == wanted)
}

/// Whether a failed chain switch means the wallet does not know the chain.
pub fn is_chain_unrecognized(err: &ProviderError) -> bool {
    match err {
        ProviderError::Rpc(value) => value_is_chain_unrecognized(value),
        ProviderError::Transport(msg) | ProviderError::Unsupported(msg) => {
            message_is_chain_unrecognized(&msg.to_lowercase())
        }
        ProviderError::Timeout(_) => false,
    }
}

fn value_is_chain_unrecognized(value: &Value) -> bool {
    if has_code(value, UNRECOGNIZED_CHAIN) {
        return true;
    }
    match error_message(value) {
        Some(msg) => message_is_chain_unrecognized(&msg.to_lowercase()),
        None => false,
    }
}

fn message_is_chain_unrecognized(msg: &str) -> bool {
    msg.contains("unrecognized chain")
        || msg.contains("unknown chain")
        || msg.contains("chain is not added")
        || (msg.contains("not added") && msg.contains("chain"))
        || msg.contains("add ethereum chain")
        || msg.contains("wallet_addethereumchain")
}

/// Map a raw provider failure onto the closed taxonomy.
///
/// Shapes that match no known encoding become [`FortError::Unknown`] carrying
/// the best message that could be extracted.
pub fn classify(err: &ProviderError) -> FortError {
    match err {
        ProviderError::Timeout(_) => FortError::RequestTimeout,
        ProviderError::Rpc(value) => classify_value(value),
        ProviderError::Transport(msg) => {
            if message_is_chain_unrecognized(&msg.to_lowercase()) {
                FortError::ChainUnrecognized
            } else {
                FortError::unknown(msg.clone())
            }
        }
        ProviderError::Unsupported(method) => {
            FortError::unknown(format!("Wallet does not support {}", method))
        }
    }
}

/// Classify a JSON error envelope.
pub fn classify_value(value: &Value) -> FortError {
    match error_code(value) {
        Some(ErrorCode::Named(code)) if code == "TIMEOUT" => return FortError::RequestTimeout,
        Some(ErrorCode::Named(code)) if code == "ACTION_REJECTED" => {
            return FortError::UserRejected
        }
        _ => {}
    }
    if has_code(value, USER_REJECTED) {
        return FortError::UserRejected;
    }
    if has_code(value, REQUEST_PENDING) {
        return FortError::ProviderBusy;
    }
    if value_is_chain_unrecognized(value) {
        return FortError::ChainUnrecognized;
    }

    let message = error_message(value);
    if let Some(msg) = &message {
        let lower = msg.to_lowercase();
        if lower.contains("user rejected") || lower.contains("user denied") {
            return FortError::UserRejected;
        }
    }
    FortError::unknown(message.unwrap_or_else(|| "Unknown error".to_string()))
}

/// Classify a failure of a state-changing submission.
///
/// Anything the taxonomy does not otherwise name is reported as the ledger
/// refusing the change.
pub fn classify_submission(err: &ProviderError) -> FortError {
    match classify(err) {
        FortError::Unknown { reason } => FortError::SubmissionFailed { reason },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_plain_codes() {
        assert_eq!(classify(&ProviderError::rpc(4001, "nope")), FortError::UserRejected);
        assert_eq!(classify(&ProviderError::rpc(-32002, "pending")), FortError::ProviderBusy);
        assert_eq!(
            classify(&ProviderError::Timeout(Duration::from_secs(6))),
            FortError::RequestTimeout
        );
        assert_eq!(classify_value(&json!({"code": "TIMEOUT"})), FortError::RequestTimeout);
    }

    #[test]
    fn test_nested_envelopes() {
        let metamask = json!({
            "code": -32603,
            "message": "Internal JSON-RPC error.",
            "data": {"originalError": {"code": 4902, "message": "Unrecognized chain ID"}}
        });
        assert_eq!(classify_value(&metamask), FortError::ChainUnrecognized);

        let ethers_style = json!({
            "shortMessage": "could not coalesce error",
            "info": {"error": {"code": 4001, "message": "User rejected the request."}}
        });
        assert_eq!(classify_value(&ethers_style), FortError::UserRejected);

        let busy = json!({"error": {"code": -32002}});
        assert_eq!(classify_value(&busy), FortError::ProviderBusy);
    }

    #[test]
    fn test_chain_unrecognized_by_message() {
        for msg in [
            "Unrecognized chain ID 0x4cef52",
            "Unknown chain",
            "This chain is not added to your wallet",
            "Try wallet_addEthereumChain first",
        ] {
            assert!(
                is_chain_unrecognized(&ProviderError::rpc(-32603, msg)),
                "{} should be recognized",
                msg
            );
        }
        assert!(!is_chain_unrecognized(&ProviderError::rpc(-32603, "execution reverted")));
        assert!(!is_chain_unrecognized(&ProviderError::Timeout(Duration::from_secs(1))));
    }

    #[test]
    fn test_unknown_keeps_best_message() {
        let err = classify_value(&json!({"reason": "bad thing", "message": "worse thing"}));
        assert_eq!(err, FortError::unknown("bad thing"));
        assert_eq!(classify_value(&json!({})), FortError::unknown("Unknown error"));
        assert_eq!(classify_value(&json!("plain text")), FortError::unknown("plain text"));
    }

    #[test]
    fn test_submission_failures() {
        let revert = ProviderError::rpc(-32603, "execution reverted: already confirmed");
        assert_eq!(
            classify_submission(&revert),
            FortError::SubmissionFailed {
                reason: "execution reverted: already confirmed".into()
            }
        );
        assert_eq!(
            classify_submission(&ProviderError::rpc(4001, "denied")),
            FortError::UserRejected
        );
    }
}
