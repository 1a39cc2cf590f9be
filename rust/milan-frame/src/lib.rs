//! Packet framing over byte streams.
//!
//! Two framings turn a reliable byte stream into delimited,
//! integrity-checked packets:
//!
//! - [`protected`]: varint length ‖ payload ‖ 8-byte MAC. The default
//!   over stream sockets.
//! - [`serial`]: COBS-encoded payload‖MAC followed by a zero
//!   terminator, for character devices that cannot carry zero bytes in
//!   a frame.
//!
//! The MAC is a keyed 64-bit HighwayHash over the payload. It detects
//! corruption; it only detects tampering when the key is kept secret.

pub mod cobs;
pub mod mac;
pub mod protected;
pub mod serial;

pub use mac::{DEFAULT_MAC_KEY, Mac};
pub use protected::{ProtectedReader, ProtectedWriter};
pub use serial::{SerialLineReader, SerialLineWriter};

/// Default cap on the payload size of a single packet (16 MiB).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;
