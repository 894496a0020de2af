#![forbid(unsafe_code)]

//! Port-map relay listener/gateway sides and the resource authorization
//! protocol.

pub mod authorize;
pub mod errors;
pub mod gateway;
pub mod listener;
pub mod store;
pub mod types;

pub use authorize::{AuthTransport, AuthorizeRequest, AuthorizeResponse, Authorizer, NetAuthTransport};
pub use errors::{Error, Result};
pub use gateway::{HandshakeResolver, PortmapGatewayHandler, ResourceResolver};
pub use listener::{convert_index, PortmapListener};
pub use store::{AppStore, ResourceStore};
pub use types::{HandshakeResponse, PortmapApp, PortmapHandshake, PortmapResource};
