//! Address, amount and display helpers.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::OnceLock;

use ethers::types::{Address, H256, U256};
use ethers::utils::{format_units, parse_units, to_checksum};
use regex::Regex;

use crate::error::{FortError, Result};

fn address_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static regex"))
}

fn embedded_address_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"0x[a-fA-F0-9]{40}").expect("static regex"))
}

fn separator_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s,;|]+").expect("static regex"))
}

/// Normalize a user-supplied address.
///
/// All-lowercase and all-uppercase hex is accepted as is. Mixed case must be
/// a valid EIP-55 checksum.
pub fn normalize_address(raw: &str) -> Option<Address> {
    let raw = raw.trim();
    if !address_pattern().is_match(raw) {
        return None;
    }

    let body = &raw[2..];
    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());

    let address = Address::from_str(raw).ok()?;
    if has_upper && has_lower && to_checksum(&address, None) != raw {
        return None;
    }
    Some(address)
}

/// Like [`normalize_address`] but reports which field was invalid.
pub fn parse_address(raw: &str, field: &'static str) -> Result<Address> {
    normalize_address(raw).ok_or(FortError::InvalidAddress { field })
}

/// Short display form, `0x1234...abcd`.
pub fn short(address: &Address) -> String {
    let full = to_checksum(address, None);
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// Parse a decimal amount in native units into base units.
pub fn parse_amount(raw: &str, decimals: u8) -> Result<U256> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FortError::InvalidAmount {
            reason: "Enter amount".to_string(),
        });
    }
    if raw.starts_with('-') {
        return Err(FortError::InvalidAmount {
            reason: "Amount must be > 0".to_string(),
        });
    }

    let parsed = parse_units(raw, decimals as u32).map_err(|e| FortError::InvalidAmount {
        reason: format!("Invalid amount: {}", e),
    })?;
    let amount: U256 = parsed.into();
    if amount.is_zero() {
        return Err(FortError::InvalidAmount {
            reason: "Amount must be > 0".to_string(),
        });
    }
    Ok(amount)
}

/// Format base units as a decimal string, trimming trailing zeros.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    let formatted = match format_units(amount, decimals as u32) {
        Ok(s) => s,
        Err(_) => return amount.to_string(),
    };
    match formatted.split_once('.') {
        Some((whole, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                format!("{}.0", whole)
            } else {
                format!("{}.{}", whole, frac)
            }
        }
        None => formatted,
    }
}

/// Explorer link for a transaction hash; empty when either part is empty.
pub fn tx_url(prefix: &str, hash: &str) -> String {
    let hash = hash.trim();
    let prefix = prefix.trim();
    if hash.is_empty() || prefix.is_empty() {
        return String::new();
    }
    if prefix.ends_with('/') {
        format!("{}{}", prefix, hash)
    } else {
        format!("{}/{}", prefix, hash)
    }
}

/// Parse a `0x`-prefixed 32-byte transaction hash.
pub fn parse_tx_hash(raw: &str) -> Option<H256> {
    let body = raw.trim().strip_prefix("0x")?;
    let bytes = hex::decode(body).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    Some(H256::from_slice(&bytes))
}

/// Parse a stored safe list.
///
/// Accepts the current JSON array encoding as well as legacy free text and
/// separator-delimited lists. Entries are deduplicated case-insensitively in
/// first-seen order. The flag is `true` when the input was not a JSON array
/// and should be rewritten.
pub fn parse_safe_list(raw: &str) -> (Vec<Address>, bool) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (Vec::new(), false);
    }

    if let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        let addresses = entries
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(lenient_address);
        return (dedup(addresses), false);
    }

    let embedded: Vec<Address> = embedded_address_pattern()
        .find_iter(raw)
        .filter_map(|m| lenient_address(m.as_str()))
        .collect();
    if !embedded.is_empty() {
        return (dedup(embedded), true);
    }

    let tokens = separator_pattern()
        .split(raw)
        .filter(|t| !t.is_empty())
        .filter_map(lenient_address);
    (dedup(tokens), true)
}

// Legacy entries may carry a bad checksum; the hex is still the address.
fn lenient_address(raw: &str) -> Option<Address> {
    let raw = raw.trim();
    if !address_pattern().is_match(raw) {
        return None;
    }
    Address::from_str(&raw.to_ascii_lowercase()).ok()
}

fn dedup(addresses: impl IntoIterator<Item = Address>) -> Vec<Address> {
    let mut seen = HashSet::new();
    addresses.into_iter().filter(|a| seen.insert(*a)).collect()
}
