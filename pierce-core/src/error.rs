use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Error kinds shared across the workspace.
///
/// Every crate maps its own failure modes onto one of these variants so that
/// callers at the supervisor boundary (`pierce-daemon`) can make a single,
/// consistent decision about what to surface to the CLI/HTTP layer and what
/// to collapse into a generic `Io`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("tunnel busy")]
    TunnelBusy,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("resolve failed: {0}")]
    ResolveFailed(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// True if a caller may retry the operation that produced this error.
    ///
    /// Only `TunnelBusy` is retryable — the tunnel manager's add-judger
    /// race is expected to resolve itself on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TunnelBusy)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidPacket(e.to_string())
    }
}
