//! Per-worker proxy rotation: acquisition through a rate-limited issuing
//! API shared by the whole fleet, canary health checks and the block and
//! failure signals coming back from the dispatcher.

pub mod acquisition;
pub mod health;
pub mod provider;
pub mod proxy_manager;
pub mod proxy_state;

pub use acquisition::{Attempt, ProxyAcquirer};
pub use health::HealthTracker;
pub use provider::{HttpProxyApi, IssueOutcome, ProxyApi};
pub use proxy_manager::{ProxyManager, ProxySettings};
pub use proxy_state::{ProxyState, Validity};
