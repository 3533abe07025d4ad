//! Protocol constants shared by server and client.
//!
//! Message type and op-code fields stay raw `u8` in [`crate::Message`] so
//! that values outside this set survive a decode/encode round trip.

/// Protocol major version carried in every header.
pub const DOIP_VERSION: u8 = 0x02;

/// Fixed envelope header size in bytes.
pub const HEADER_SIZE: usize = 10;

/// Default port of the strict binary listener; compat listens on port + 1.
pub const DEFAULT_PORT: u16 = 3567;

// Message types
pub const MSG_TYPE_REQUEST: u8 = 0x01;
pub const MSG_TYPE_RESPONSE: u8 = 0x02;
pub const MSG_TYPE_ERROR: u8 = 0x7F;

// Operation codes
pub const OP_HELLO: u8 = 0x01;
pub const OP_RETRIEVE: u8 = 0x02;
pub const OP_LIST_OPS: u8 = 0x04;
pub const OP_INVOKE: u8 = 0x05;

// Payload block types
pub const BLOCK_METADATA: u8 = 0x01;
pub const BLOCK_COMPONENT: u8 = 0x02;
pub const BLOCK_WORKFLOW: u8 = 0x03;

/// Media type used when a component carries no declared type.
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";
