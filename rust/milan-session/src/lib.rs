//! RPC session layer: typed interfaces, client and server dispatchers.
//!
//! A program declares interfaces with [`interface!`], serves
//! implementations through a [`Server`], and calls them through the
//! proxies a [`Client`] hands out. Deadlines, cancellation and typed
//! errors propagate end to end; structural type fingerprints reject
//! mismatched signatures at dispatch time.

pub mod client;
pub mod interface;
pub mod result;
pub mod server;
pub mod transport;

pub use client::{Client, ClientOptions, RemoteObject};
pub use interface::{DispatchTable, Handler, ProxyHandle};
pub use milan_codec as codec;
pub use milan_runtime as runtime;
pub use milan_wire::{Error, ErrorKind, MessageType, Result};
pub use result::ResultHolder;
pub use server::{Server, ServerOptions};
pub use transport::{Accept, Connect, TcpAcceptor, TcpConnect};
