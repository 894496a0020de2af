#![forbid(unsafe_code)]

//! Thin client SDK for applications that talk to a running `pierced` over
//! its HTTP surface, without linking against the daemon's internal crates.

pub mod client;
pub mod config;
pub mod error;
pub mod reconnect;
pub mod retry;
pub mod types;

pub use client::DaemonClient;
pub use config::SdkConfig;
pub use error::{Error, Result};
pub use types::{PortmapAppView, PortmapResourceView, SocksOutboundView, TransportView, VersionInfoView};
