// Common traits and structs
pub use crate::common::interface::{ExtractionPipeline, Fetcher, PersistenceSink};
pub use crate::common::model::{Config, Request, Response};

// Errors
pub use crate::errors::{BoxError, Error, ErrorKind, ParserError, Result};

// Runtime
pub use crate::engine::{CloseReason, RedisSink, ShutdownHandle, Worker};
pub use crate::proxy::{ProxyManager, ProxyState, Validity};
pub use crate::sync::{CoordinationStore, LocalStore, RedisStore, store_from_config};
pub use crate::utils::logger::{LoggerConfig, init_app_logger, init_logger};
