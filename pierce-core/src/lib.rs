#![forbid(unsafe_code)]

//! Shared types, error kinds, configuration, and identity-seed persistence
//! used across the `pierce` workspace.
//!
//! Kept small and dependency-light on purpose: this crate sits underneath
//! every other crate in the workspace, so it must not pull in anything
//! layer-specific (no crypto primitives, no networking).

pub mod config;
pub mod error;
pub mod seed;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use store::KvStore;
pub use types::{now_ns, NatType, PeerRecord, TimestampMs, Transport, TRIAL_RESOURCE_ID};
