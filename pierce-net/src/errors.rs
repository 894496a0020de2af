use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("stream closed")]
    Closed,
}

impl From<Error> for pierce_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => pierce_core::Error::Io(io),
            Error::Handshake(msg) => pierce_core::Error::HandshakeFailed(msg),
            Error::UnknownProtocol(p) => pierce_core::Error::NotFound(p),
            Error::PeerNotFound(p) => pierce_core::Error::NotFound(p),
            Error::Closed => pierce_core::Error::Unreachable("stream closed".into()),
        }
    }
}
