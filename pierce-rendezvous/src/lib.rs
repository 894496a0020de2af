#![forbid(unsafe_code)]

//! Peer registry / rendezvous service and client.

pub mod client;
pub mod errors;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod snowflake;

pub use client::{spawn_register_and_heartbeat, RendezvousClient};
pub use errors::{Error, Result};
pub use protocol::{QueryRequest, QueryResponse, RegisterRequest, QUERY_APP, REGISTER_APP};
pub use registry::Registry;
pub use server::RendezvousServer;
pub use snowflake::SnowflakeGenerator;
