pub mod connector;
pub mod encrypt;
pub mod logger;
