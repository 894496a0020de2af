use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("malformed probe response: {0}")]
    MalformedResponse(String),
}

impl From<Error> for pierce_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => pierce_core::Error::Io(io),
            Error::Timeout(msg) => pierce_core::Error::Timeout(msg),
            Error::MalformedResponse(msg) => pierce_core::Error::ResolveFailed(msg),
        }
    }
}
