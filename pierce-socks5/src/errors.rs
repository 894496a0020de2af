use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("net: {0}")]
    Net(#[from] pierce_net::errors::Error),

    #[error("malformed socks5 message: {0}")]
    Malformed(String),

    #[error("message truncated")]
    Truncated,

    #[error("authentication failed")]
    AuthFailed,

    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("unsupported command {0:#x}")]
    UnsupportedCommand(u8),

    #[error("upstream connect failed: {0}")]
    ConnectFailed(String),

    #[error("stream closed")]
    Closed,
}

impl From<Error> for pierce_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => pierce_core::Error::Io(io),
            Error::Net(n) => n.into(),
            Error::Malformed(s) => pierce_core::Error::InvalidPacket(s),
            Error::Truncated => pierce_core::Error::InvalidPacket("truncated socks5 message".into()),
            Error::AuthFailed => pierce_core::Error::Unauthorized("socks5 authentication failed".into()),
            Error::NoAcceptableMethod => {
                pierce_core::Error::Unauthorized("no acceptable socks5 method".into())
            }
            Error::UnsupportedCommand(cmd) => {
                pierce_core::Error::InvalidPacket(format!("unsupported socks5 command {cmd:#x}"))
            }
            Error::ConnectFailed(s) => pierce_core::Error::Unreachable(s),
            Error::Closed => pierce_core::Error::Unreachable("socks5 stream closed".into()),
        }
    }
}
