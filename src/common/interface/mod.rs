pub mod data_store;
pub mod fetcher;
pub mod pipeline;

pub use data_store::PersistenceSink;
pub use fetcher::{FetchTimeout, Fetcher};
pub use pipeline::ExtractionPipeline;
