//! Cooperative runtime pieces of milan.
//!
//! Scheduling follows the framework's two-layer model: connection and
//! housekeeping tasks run cooperatively on the async runtime and
//! suspend only at awaits, while request handlers execute on a
//! [`WorkerPool`]. Every blocking operation in this crate observes the
//! current [`Context`]: cancellation and deadlines interrupt selects,
//! queue operations, lock acquisitions and promise waits alike.

pub mod context;
pub mod flag;
pub mod pool;
pub mod promise;
pub mod queue;
pub mod select;
pub mod sync;
pub mod time;

pub use context::{Context, ContextWire};
pub use flag::Flag;
pub use pool::WorkerPool;
pub use promise::{FutureValue, Promise, promise};
pub use queue::BoundedQueue;
pub use select::{select, select_all};
pub use sync::{Mutex, Permit, Semaphore};
pub use time::{Ticker, after, always, at, never};

use std::future::Future;
use tokio::task::JoinHandle;

/// Spawn a task attached to a child of the current context: cancelling
/// the spawner's context cancels the task's.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let child = Context::current().child();
    tokio::spawn(child.scope(future))
}

/// Spawn a task attached to a child of the *root* context, detached
/// from the spawner's cancellation. The daemon analog of [`spawn`].
pub fn spawn_daemon<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let child = Context::root().child();
    tokio::spawn(child.scope(future))
}
