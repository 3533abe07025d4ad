//! DOIP server for the MaRDI object portal.
//!
//! Two listeners share one dispatcher: the strict binary protocol on the
//! configured port and a JSON-segment compat framing on port + 1. Handlers
//! resolve object manifests through the FDO registry and stream component
//! bytes from an S3-compatible blob store under a sharded key layout.

pub mod compat;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod mediawiki;
pub mod registry;
pub mod rocrate;
pub mod server;
pub mod state;
pub mod storage;
pub mod tls;
pub mod workflows;

#[cfg(test)]
pub(crate) mod testutil;
