#![forbid(unsafe_code)]

//! NAT classification and reuse-port dialers.
//!
//! Hole-punching depends on the punch dialing from the exact local port the
//! NAT probe used, so the reuse-port helpers in [`dial`] are shared between
//! the probe and the tunnel manager's punch attempts.

pub mod dial;
pub mod errors;
pub mod natprobe;

pub use dial::{bind_reuseport_tcp, bind_reuseport_udp, local_udp_port};
pub use errors::{Error, Result};
pub use natprobe::{classify, echo_once, serve_echo, NatInfo, ProbeConfig};
