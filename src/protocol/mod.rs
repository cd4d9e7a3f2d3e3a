//! Wire Protocol Module
//!
//! A minimal binary framing used for every node-to-node exchange. There is no broker:
//! each request opens a fresh TCP connection, writes exactly one frame, reads exactly
//! one reply frame and closes.
//!
//! ## Frame Layout
//! ```text
//! Header (10 bytes): MAGIC(4) | VERSION(1) | TYPE(1) | LENGTH(4, big-endian)
//! Body:   LENGTH bytes of zlib-compressed UTF-8 JSON object
//! ```
//!
//! ## Submodules
//! - **`types`**: Message type codes and header constants.
//! - **`codec`**: Encoding, decoding and async frame I/O.
//! - **`messages`**: Typed bodies carried inside frames.
//! - **`client`**: One-shot request/reply over a fresh connection.

pub mod client;
pub mod codec;
pub mod messages;
pub mod types;

pub use codec::{Frame, Payload, decode, encode, read_frame, write_frame};
pub use types::MessageType;

#[cfg(test)]
mod tests;
