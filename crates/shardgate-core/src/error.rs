use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShardgateError {
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}
