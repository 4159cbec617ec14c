pub mod actions;
pub mod api;
pub mod discovery;
pub mod loader;
pub mod network_guard;
pub mod session;

pub use actions::{ActionController, ActionReceipt};
pub use api::{Messages, RuntimeBuilder, RuntimeView, SafeRuntime};
pub use discovery::{DiscoveryScanner, ScanReport};
pub use loader::{LoadOutcome, NameResolver, SafeStateLoader};
pub use network_guard::{ChainStatus, NetworkGuard};
pub use session::{SessionContext, SessionManager, SessionMessage, SessionState};
