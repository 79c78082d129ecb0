//! Worker runtime: request loop, bounded concurrency, idle shutdown and the
//! single close path.

pub mod idle;
pub mod shutdown;
pub mod sink;
pub mod stats;
pub mod worker;

pub use idle::{IdleDecision, IdleMonitor, IdleState};
pub use shutdown::ShutdownHandle;
pub use sink::RedisSink;
pub use stats::{CrawlStats, StatsSnapshot};
pub use worker::{CloseReason, Worker, WorkerSettings};
