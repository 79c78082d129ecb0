use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// 通用错误详情类型
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Request,
    Response,
    Proxy,
    Download,
    Queue,
    Store,
    Config,
    Parser,
    DataStore,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Request => write!(f, "request"),
            ErrorKind::Response => write!(f, "response"),
            ErrorKind::Proxy => write!(f, "proxy"),
            ErrorKind::Download => write!(f, "download"),
            ErrorKind::Queue => write!(f, "queue"),
            ErrorKind::Store => write!(f, "store"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Parser => write!(f, "parser"),
            ErrorKind::DataStore => write!(f, "data store"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
            }),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn is_request(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Request)
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Proxy)
    }

    pub fn is_download(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Download)
    }

    pub fn is_store(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Store)
    }

    pub fn is_parser(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Parser)
    }

    /// The only error the proxy core lets escape to the worker: no usable
    /// proxy could be obtained.
    pub fn is_fatal(&self) -> bool {
        self.downcast_source::<ProxyError>()
            .is_some_and(|e| matches!(e, ProxyError::NoProxyAvailable))
    }

    /// Benign request-filtering signal; never counted as a proxy failure.
    pub fn is_ignored(&self) -> bool {
        self.downcast_source::<DownloadError>()
            .is_some_and(|e| matches!(e, DownloadError::Ignored(_)))
    }

    fn downcast_source<T: StdError + 'static>(&self) -> Option<&T> {
        self.inner.source.as_ref().and_then(|s| (**s).downcast_ref::<T>())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("rotacrawl::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error", self.inner.kind)?;
        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        Error::new(ErrorKind::Request, Some(err))
    }
}

impl From<ResponseError> for Error {
    fn from(err: ResponseError) -> Self {
        Error::new(ErrorKind::Response, Some(err))
    }
}

impl From<ProxyError> for Error {
    fn from(err: ProxyError) -> Self {
        Error::new(ErrorKind::Proxy, Some(err))
    }
}

impl From<DownloadError> for Error {
    fn from(err: DownloadError) -> Self {
        Error::new(ErrorKind::Download, Some(err))
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        Error::new(ErrorKind::Queue, Some(err))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::new(ErrorKind::Store, Some(err))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::new(ErrorKind::Config, Some(err))
    }
}

impl From<ParserError> for Error {
    fn from(value: ParserError) -> Self {
        Error::new(ErrorKind::Parser, Some(value))
    }
}

impl From<DataStoreError> for Error {
    fn from(value: DataStoreError) -> Self {
        Error::new(ErrorKind::DataStore, Some(value))
    }
}

// 具体错误类型定义
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid method: {0}")]
    InvalidMethod(String),
}

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("{0}")]
    ParseError(BoxError),
    #[error("empty response")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("get proxy error: {0}")]
    GetProxy(#[source] BoxError),
    #[error("unexpected issuing api response: {0}")]
    UnexpectedResponse(String),
    #[error("no proxy available")]
    NoProxyAvailable,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("client error: {0}")]
    ClientError(#[source] BoxError),
    #[error("timeout: {0}")]
    Timeout(#[source] BoxError),
    #[error("connect error: {0}")]
    Connect(#[source] BoxError),
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    #[error("request ignored: {0}")]
    Ignored(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("push failed: {0}")]
    PushFailed(#[source] BoxError),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),
    #[error("pool error: {0}")]
    Pool(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("wrong type for key: {0}")]
    WrongType(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("parse failed: {0}")]
    Parse(#[source] toml::de::Error),
    #[error("invalid value: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("{0}")]
    ContentAnomaly(String),
}

#[derive(Debug, Error)]
pub enum DataStoreError {
    #[error("{0}")]
    SaveFailed(#[source] BoxError),
    #[error("{0}")]
    ConnectionFailed(#[source] BoxError),
}

// 便利函数，用于创建常见的错误类型
impl Error {
    pub fn no_proxy_available() -> Self {
        Error::from(ProxyError::NoProxyAvailable)
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Error::from(DownloadError::Ignored(reason.into()))
    }

    pub fn content_anomaly(reason: impl Into<String>) -> Self {
        Error::from(ParserError::ContentAnomaly(reason.into()))
    }
}

// 针对常见的外部错误类型的转换
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::from(DownloadError::Timeout(Box::new(err))),
            std::io::ErrorKind::ConnectionRefused => {
                Error::from(DownloadError::Connect(Box::new(err)))
            }
            _ => Error::new(ErrorKind::Download, Some(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::from(ResponseError::ParseError(err.to_string().into()))
    }
}

impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        Error::from(StoreError::Redis(err))
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Error::from(StoreError::Pool(err.to_string()))
    }
}
