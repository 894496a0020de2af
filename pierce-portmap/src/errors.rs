use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("net: {0}")]
    Net(#[from] pierce_net::Error),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store: {0}")]
    Store(#[from] pierce_core::Error),
}

impl From<Error> for pierce_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => pierce_core::Error::Io(io),
            Error::Net(e) => e.into(),
            Error::HandshakeFailed(msg) => pierce_core::Error::HandshakeFailed(msg),
            Error::Unauthorized(msg) => pierce_core::Error::Unauthorized(msg),
            Error::AlreadyExists(msg) => pierce_core::Error::AlreadyExists(msg),
            Error::NotFound(msg) => pierce_core::Error::NotFound(msg),
            Error::InvalidPacket(msg) => pierce_core::Error::InvalidPacket(msg),
            Error::Serde(e) => pierce_core::Error::InvalidPacket(e.to_string()),
            Error::Store(e) => e,
        }
    }
}
