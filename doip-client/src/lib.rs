//! Blocking client for the DOIP binary protocol.
//!
//! One request occupies one connection: connect, send, read the complete
//! response envelope, close. TLS is on by default; peer verification can be
//! disabled for self-signed deployments.

pub mod client;
pub mod mock;
pub mod tls;

pub use client::{ClientError, DoipClient};
pub use mock::MockDoipClient;
