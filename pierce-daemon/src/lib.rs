#![forbid(unsafe_code)]

//! Supervisor singleton wiring every other `pierce` crate together, plus
//! its `axum` HTTP/metrics surface.

pub mod http;
pub mod metrics;
pub mod peer_registry;
pub mod proxy_client;
pub mod run;
pub mod supervisor;

pub use metrics::Metrics;
pub use peer_registry::PeerRegistry;
pub use proxy_client::{ProxyClient, SocksOutbound, TunProxy};
pub use run::run;
pub use supervisor::Supervisor;
