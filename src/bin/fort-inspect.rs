//! Safe inspector CLI.
//!
//! Reads a safe (or an identity's discoverable safes) straight from the
//! configured RPC endpoint, without a wallet.
//!
//! Usage:
//!   fort-inspect <safe> [--as <owner>]
//!   fort-inspect --scan <owner>
//!
//! Endpoint and scan range come from the `FORT_*` environment variables.
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::env;
use std::process;
use std::sync::Arc;

use fort_sync::adapters::ledger::Ledger;
use fort_sync::adapters::rpc::HttpRpcProvider;
use fort_sync::adapters::SigningProvider;
use fort_sync::runtime::{DiscoveryScanner, NetworkGuard, SafeStateLoader, SessionContext};
use fort_sync::utils::{format_amount, normalize_address, short};
use fort_sync::{FortConfig, Identity, LocalCache, SafeSession};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Usage: fort-inspect <safe> [--as <owner>] | fort-inspect --scan <owner>");
    process::exit(2);
}

fn parse_identity(raw: Option<&String>) -> Identity {
    match raw.and_then(|r| normalize_address(r)) {
        Some(a) => Identity::new(a),
        None => {
            eprintln!("Invalid owner address");
            process::exit(2);
        }
    }
}

fn render(session: &SafeSession, decimals: u8) -> serde_json::Value {
    json!({
        "address": format!("{:#x}", session.address),
        "short": short(&session.address),
        "access": format!("{:?}", session.access),
        "ownerIndex": session.owner_index_of_caller(),
        "owners": session.owners.iter().map(|o| format!("{:#x}", o)).collect::<Vec<_>>(),
        "balance": format_amount(session.balance, decimals),
        "transactions": session.transactions.iter().map(|t| json!({
            "id": t.id,
            "to": format!("{:#x}", t.recipient),
            "amount": format_amount(t.amount, decimals),
            "executed": t.executed,
            "confirms": t.confirm_count(),
            "confirmed": t.per_owner_confirmed,
        })).collect::<Vec<_>>(),
    })
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let config = Arc::new(FortConfig::from_env());
    let rpc: Arc<dyn SigningProvider> = match HttpRpcProvider::new(&config.rpc_url) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    let cache = LocalCache::in_memory();

    if args[0] == "--scan" {
        let identity = parse_identity(args.get(1));
        let scanner = DiscoveryScanner::new(config.clone(), cache);
        let ledger = Ledger::new(rpc, config.request_timeout);
        match scanner.scan(&identity, &ledger).await {
            Ok(report) => match serde_json::to_string_pretty(&report) {
                Ok(out) => println!("{}", out),
                Err(e) => eprintln!("{}", e),
            },
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
        return;
    }

    let safe = args[0].clone();
    let identity = match args.get(1).map(String::as_str) {
        Some("--as") => Some(parse_identity(args.get(2))),
        Some(_) => usage(),
        None => None,
    };

    let guard = Arc::new(NetworkGuard::new(config.clone()));
    let loader = SafeStateLoader::new(config.clone(), cache, guard, Some(rpc));
    let ctx = SessionContext {
        generation: 0,
        identity,
        provider_key: None,
        provider: None,
        chain_id: config.chain_id,
        chain_ok: true,
    };

    let outcome = loader.load(&safe, &ctx, &|_: &SafeSession| {}).await;
    if let Some(session) = &outcome.session {
        match serde_json::to_string_pretty(&render(session, config.native_currency.decimals)) {
            Ok(out) => println!("{}", out),
            Err(e) => eprintln!("{}", e),
        }
    }
    if let Some(err) = outcome.error {
        eprintln!("{}", err);
        process::exit(1);
    }
    if outcome.is_truncated() {
        eprintln!("Transaction listing truncated at {}", config.tx_probe_cap);
    }
}
