//! # FORT Sync
//!
//! Wallet-provider and ledger-state synchronization for 2-of-3 multisig
//! safes on Arc Testnet.
//!
//! The crate keeps three sources of truth apart:
//!
//! - the **ledger**, which is authoritative for owners, balances,
//!   transactions and confirmations;
//! - the **wallet provider**, which is authoritative for the connected
//!   identity and the active chain;
//! - the **local cache**, which only holds advisory hints (names, safe lists,
//!   transaction hashes, scan checkpoints).
//!
//! ## Components
//!
//! - **Provider registry**: discovers announced and injected wallets
//! - **Session manager**: connects, restores and re-derives the session on
//!   every provider notification
//! - **Network guard**: switches (and if needed registers) the target chain
//! - **Discovery scanner**: finds owned safes from factory events, resuming
//!   from a per-identity checkpoint
//! - **Safe state loader**: builds an owner-verified view of one safe
//! - **Action controller**: create, propose, confirm and execute with
//!   pending-action deduplication
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fort_sync::adapters::registry::ProviderRegistry;
//! use fort_sync::{FortConfig, SafeRuntime};
//!
//! # async fn run(wallet: Arc<dyn fort_sync::adapters::SigningProvider>) -> fort_sync::Result<()> {
//! let registry = Arc::new(ProviderRegistry::new());
//! let key = registry.inject(wallet);
//!
//! let runtime = SafeRuntime::builder(FortConfig::from_env(), registry).start();
//! runtime.connect(&key).await?;
//! let safe = runtime.open_safe("0xd09B6D7a1c2e8d1F62a5f0C3b6F2B52E6b1E1b89").await?;
//! println!("{} transactions", safe.transactions.len());
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod probe;
pub mod runtime;
pub mod types;
pub mod utils;

// Re-export the runtime surface
pub use runtime::{ActionReceipt, RuntimeView, SafeRuntime, ScanReport, SessionState};

// Re-export types
pub use cache::LocalCache;
pub use config::FortConfig;
pub use error::{Affordance, ErrorKind, FortError, Result};
pub use types::{AccessState, Identity, Message, SafeRecord, SafeSession, Severity, Transaction};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
