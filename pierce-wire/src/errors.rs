use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame exceeds maximum size of {max} bytes (got {got})")]
    TooLarge { max: usize, got: usize },

    #[error("declared length {declared} does not match payload length {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("packet too short: need at least {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },

    #[error("check token mismatch")]
    CheckMismatch,

    #[error("control packet payload too short for an opcode")]
    MissingOpcode,
}
