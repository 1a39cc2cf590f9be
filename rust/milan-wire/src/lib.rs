//! Wire-level vocabulary shared by every milan crate.
//!
//! This crate holds the pieces that both ends of a connection must agree
//! on before any higher layer can work: the closed error taxonomy and its
//! portable names, the message-type codes of the RPC envelope, and the
//! varint integer encoding used for lengths and identifier tables.

pub mod error;
pub mod message;
pub mod varint;

pub use error::{Error, ErrorKind, Result};
pub use message::MessageType;
