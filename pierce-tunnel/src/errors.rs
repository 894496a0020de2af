use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("add-tunnel busy")]
    AddTunnelBusy,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("rendezvous: {0}")]
    Rendezvous(#[from] pierce_rendezvous::Error),

    #[error("transport: {0}")]
    Transport(#[from] pierce_transport::Error),

    #[error("wire: {0}")]
    Wire(#[from] pierce_wire::Error),

    #[error("malformed control message: {0}")]
    MalformedControl(String),

    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<Error> for pierce_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => pierce_core::Error::Io(io),
            Error::AddTunnelBusy => pierce_core::Error::TunnelBusy,
            Error::Timeout(msg) => pierce_core::Error::Timeout(msg),
            Error::HandshakeFailed(msg) => pierce_core::Error::HandshakeFailed(msg),
            Error::Rendezvous(e) => e.into(),
            Error::Transport(e) => e.into(),
            Error::Wire(e) => pierce_core::Error::InvalidPacket(e.to_string()),
            Error::MalformedControl(msg) => pierce_core::Error::InvalidPacket(msg),
            Error::Serde(e) => pierce_core::Error::InvalidPacket(e.to_string()),
        }
    }
}
