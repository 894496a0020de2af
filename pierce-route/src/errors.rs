use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid cidr {0:?}")]
    InvalidCidr(String),

    #[error("route overlaps an existing entry")]
    Overlap,

    #[error("no route for {0}")]
    NotFound(String),
}

impl From<Error> for pierce_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidCidr(s) => pierce_core::Error::Config(format!("invalid cidr: {s}")),
            Error::Overlap => pierce_core::Error::AlreadyExists("route overlaps an existing entry".into()),
            Error::NotFound(s) => pierce_core::Error::NotFound(s),
        }
    }
}
