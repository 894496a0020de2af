#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("request error: {0}")]
    Request(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("timeout")]
    Timeout,
    #[error("daemon returned an error (code={code}): {message}")]
    Daemon { code: i32, message: String },
    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }
}
