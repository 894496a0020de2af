use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("upgrade server request failed: {0}")]
    Request(String),

    #[error("malformed upgrade server response: {0}")]
    Malformed(String),

    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<Error> for pierce_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Request(s) => pierce_core::Error::Unreachable(s),
            Error::Malformed(s) => pierce_core::Error::InvalidPacket(s),
            Error::ChecksumMismatch { expected, computed } => pierce_core::Error::InvalidPacket(
                format!("checksum mismatch: expected {expected}, computed {computed}"),
            ),
            Error::Io(io) => pierce_core::Error::Io(io),
            Error::Join(e) => pierce_core::Error::Io(std::io::Error::other(e)),
        }
    }
}
