use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire: {0}")]
    Wire(#[from] pierce_wire::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("peer {0} not registered")]
    NotRegistered(u64),

    #[error("rendezvous request failed: {0}")]
    RequestFailed(String),
}

impl From<Error> for pierce_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => pierce_core::Error::Io(io),
            Error::Wire(w) => pierce_core::Error::InvalidPacket(w.to_string()),
            Error::Json(j) => pierce_core::Error::InvalidPacket(j.to_string()),
            Error::NotRegistered(id) => pierce_core::Error::NotFound(format!("peer {id}")),
            Error::RequestFailed(msg) => pierce_core::Error::ResolveFailed(msg),
        }
    }
}
