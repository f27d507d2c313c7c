//! sshgate-wire: typed SSH payloads
//!
//! This crate provides the binary payload structures carried by SSH global
//! requests, channel requests and channel-open messages, together with the
//! primitive encoding rules from RFC 4251 section 5.
//!
//! Field order is significant: every payload encodes its fields in exactly
//! the order RFC 4254 (and RFC 8160 for terminal modes, OpenSSH's
//! `PROTOCOL` document for the `streamlocal` extensions) lists them.
//!
//! # Example
//!
//! ```
//! use sshgate_wire::{Payload, request::WindowChange};
//!
//! let change = WindowChange { columns: 120, rows: 40, width: 0, height: 0 };
//! let bytes = change.to_bytes();
//! assert_eq!(WindowChange::decode(&bytes).unwrap(), change);
//! ```
//!
//! # Decoding rules
//!
//! - Truncated input fails with [`DecodeError::Truncated`]
//! - Strings must be valid UTF-8; raw byte fields are kept as-is
//! - Trailing bytes after the last field fail with [`DecodeError::TrailingBytes`]
//! - Booleans follow RFC 4251: any non-zero byte is `true`

pub mod channel;
pub mod codec;
pub mod error;
pub mod global;
pub mod open;
pub mod request;

pub use channel::{ChannelType, RejectionReason};
pub use codec::{Payload, Reader, WireWrite};
pub use error::{DecodeError, Result};
pub use global::GlobalRequestType;
pub use request::RequestType;
