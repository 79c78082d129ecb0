//! Shared crawl queue: frontier, dupefilter and seed set, all living in the
//! coordination store so every worker of a crawl sees the same state.

pub mod dedup;
pub mod frontier;
pub mod scheduler;
pub mod seeds;

pub use dedup::Deduplicator;
pub use frontier::Frontier;
pub use scheduler::Scheduler;
pub use seeds::SeedQueue;
