pub mod dispatcher;
pub mod request_downloader;
pub mod retry;

pub use dispatcher::{DispatchOutcome, Dispatcher, StatusClass, classify_status};
pub use request_downloader::HttpFetcher;
pub use retry::RetryPolicy;
