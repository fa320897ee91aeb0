//! # relay-protocol
//!
//! Wire protocol definitions for the Relay broadcast server.
//!
//! This crate defines what producers send, what subscribers receive and how
//! the two are framed:
//!
//! - `Message` - The broadcast unit (`type`, `message`, optional `data`)
//! - `publish` - Validation of inbound publish requests
//! - `codec` - Server-Sent Events framing (`data: <json>\n\n`)
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Message};
//!
//! let message = Message::new("info", "Hello from the relay!");
//!
//! let frame = codec::encode(&message).unwrap();
//! assert!(frame.starts_with(b"data: "));
//!
//! let decoded = codec::decode(&frame).unwrap();
//! assert_eq!(decoded, message);
//! ```

pub mod codec;
pub mod message;
pub mod publish;

pub use codec::{decode, encode, ProtocolError};
pub use message::Message;
pub use publish::{validate, Headers, PublishAck, PublishError, JSON_MEDIA_TYPE};
