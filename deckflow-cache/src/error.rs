//! Cache-internal errors. None of these escape `get`/`put`; they are logged
//! and turned into misses.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("envelope encoding error: {0}")]
    Envelope(#[from] bincode::Error),

    #[error("cached value is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("remote tier error: {0}")]
    Remote(String),
}

impl CacheError {
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        Self::Remote(e.to_string())
    }
}
