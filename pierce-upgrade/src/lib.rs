#![forbid(unsafe_code)]

//! Version-query and binary-download client for self-upgrade.

pub mod checksum;
pub mod client;
pub mod errors;

pub use checksum::{ChecksumAlgorithm, Sha256Checksum};
pub use client::{UpgradeClient, VersionInfo};
pub use errors::{Error, Result};
