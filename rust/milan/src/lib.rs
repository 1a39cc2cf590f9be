//! RPC framework for service-to-service communication over stream
//! transports.
//!
//! Declare an interface, implement it server side, call it through a
//! client proxy:
//!
//! ```ignore
//! use milan::prelude::*;
//!
//! milan::interface! {
//!     pub trait Writer via WriterDispatch {
//!         fn get(key: String) -> String;
//!     }
//! }
//!
//! struct Store;
//!
//! impl Writer for Store {
//!     async fn get(&self, key: String) -> milan::Result<String> {
//!         Ok(format!("{}_poo", key))
//!     }
//! }
//!
//! # async fn run() -> milan::Result<()> {
//! let server = Server::new(ServerOptions::default());
//! server.register_object("writer", WriterDispatch::table(&Arc::new(Store))?)?;
//!
//! let client = Client::new(TcpConnect::new("127.0.0.1:9999"), ClientOptions::default());
//! let writer = client.object("writer");
//! let value = writer.get("patata".to_string()).await?;
//! # Ok(()) }
//! ```
//!
//! Calls carry the caller's [`Context`]: its deadline bounds the server
//! handler, cancelling it cancels the handler, and its ambient values
//! are visible as `Context::current()` inside the method body.

pub use milan_codec as codec;
pub use milan_frame as frame;
pub use milan_hash as hash;
pub use milan_runtime as runtime;
pub use milan_session as session;

pub use milan_codec::{
    BigEndian, Decode, Dynamic, DynamicClass, Encode, LittleEndian, Shared, SharedWeak,
    WireOrder,
};
pub use milan_runtime::{
    BoundedQueue, Context, Flag, FutureValue, Promise, Semaphore, WorkerPool, promise, select,
    select_all, spawn, spawn_daemon,
};
pub use milan_session::{
    Client, ClientOptions, DispatchTable, ProxyHandle, RemoteObject, ResultHolder, Server,
    ServerOptions, TcpAcceptor, TcpConnect,
};
pub use milan_wire::{Error, ErrorKind, Result};

// The declarative macros live in their defining crates; re-exported
// here so `milan::interface!` and friends work.
pub use milan_codec::{dynamic_class, portable_enum, serializable};
pub use milan_session::interface;

/// Common imports for applications.
pub mod prelude {
    pub use crate::{
        Client, ClientOptions, Context, Error, ErrorKind, Result, Server, ServerOptions,
        TcpAcceptor, TcpConnect,
    };
    pub use std::sync::Arc;
}
