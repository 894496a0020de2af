#![forbid(unsafe_code)]

//! SOCKS5 proxying over the overlay transport, including the proprietary
//! `CONNECT-UDP`/`PACKET-CONN` extensions.

pub mod auth;
pub mod client;
pub mod errors;
pub mod io;
pub mod protocol;
pub mod server;
pub mod udp;

pub use auth::{Authenticator, SessionCache, TokenAuthenticator, TrialAuthenticator};
pub use client::{Socks5LocalListener, SocksDialer};
pub use errors::{Error, Result};
pub use server::Socks5GatewayHandler;
