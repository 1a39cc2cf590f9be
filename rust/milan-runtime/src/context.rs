//! Hierarchical execution contexts.
//!
//! A context bundles an optional wall-clock deadline, a cancellation
//! flag and a map of ambient values, scoped to a task subtree. Children
//! copy the parent's deadline and value map at construction and are
//! cancelled when any ancestor is cancelled; cancellation never travels
//! upwards. Only the deadline and the value map cross the wire;
//! cancellation stays local to each side.
//!
//! The current context is task-local. Work spawned through
//! [`crate::spawn`] runs under a child of the spawner's context; a
//! [`Context::shield`] detaches from the parent's cancellation so that
//! cleanup can finish after the surrounding work is torn down.

use std::collections::HashMap;
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, OnceLock, Weak};
use std::task::Poll;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use milan_codec::dynamic::{Dynamic, DynamicClass};
use milan_codec::{Decode, Decoder, Encode, Encoder, WireOrder};
use milan_wire::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::watch;

tokio::task_local! {
    static CURRENT: Context;
}

struct State {
    deadline: Option<SystemTime>,
    values: HashMap<&'static str, Arc<dyn Dynamic>>,
    children: Vec<Weak<Inner>>,
}

struct Inner {
    state: Mutex<State>,
    cancel_tx: watch::Sender<bool>,
}

fn cancel_tree(inner: &Arc<Inner>) {
    let _ = inner.cancel_tx.send_replace(true);
    let children: Vec<Arc<Inner>> = {
        let mut state = inner.state.lock();
        state.children.retain(|w| w.strong_count() > 0);
        state.children.iter().filter_map(Weak::upgrade).collect()
    };
    for child in &children {
        cancel_tree(child);
    }
}

/// Cancellation, deadline and ambient-value bundle for a task subtree.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    fn make(deadline: Option<SystemTime>, values: HashMap<&'static str, Arc<dyn Dynamic>>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Context {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    deadline,
                    values,
                    children: Vec::new(),
                }),
                cancel_tx,
            }),
        }
    }

    /// The root of the context tree. Cancelling it cancels everything.
    pub fn root() -> &'static Context {
        static ROOT: OnceLock<Context> = OnceLock::new();
        ROOT.get_or_init(|| Context::make(None, HashMap::new()))
    }

    /// The context of the current task, or the root outside any scope.
    pub fn current() -> Context {
        CURRENT
            .try_with(Clone::clone)
            .unwrap_or_else(|_| Context::root().clone())
    }

    /// New child: copies this context's deadline and value map, and is
    /// cancelled whenever this context is.
    pub fn child(&self) -> Context {
        let (deadline, values) = {
            let state = self.inner.state.lock();
            (state.deadline, state.values.clone())
        };
        let child = Context::make(deadline, values);
        self.inner
            .state
            .lock()
            .children
            .push(Arc::downgrade(&child.inner));
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Detached child for cleanup phases: keeps the value map, drops
    /// the deadline, and is only reachable by cancelling the root.
    pub fn shield(&self) -> Context {
        let values = self.inner.state.lock().values.clone();
        let shielded = Context::make(None, values);
        let root = Context::root();
        root.inner
            .state
            .lock()
            .children
            .push(Arc::downgrade(&shielded.inner));
        if root.is_cancelled() {
            shielded.cancel();
        }
        shielded
    }

    /// Cancel this context and every live descendant.
    pub fn cancel(&self) {
        cancel_tree(&self.inner);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel_tx.borrow()
    }

    /// Completes when this context is cancelled.
    pub fn wait_cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.inner.cancel_tx.subscribe();
        async move {
            // The sender lives in the context; an error here means the
            // tree is gone, which we treat the same as cancellation.
            let _ = rx.wait_for(|cancelled| *cancelled).await;
        }
    }

    pub fn deadline(&self) -> Option<SystemTime> {
        self.inner.state.lock().deadline
    }

    /// Tighten the deadline; an existing earlier deadline wins.
    pub fn set_deadline(&self, when: SystemTime) {
        let mut state = self.inner.state.lock();
        state.deadline = Some(match state.deadline {
            Some(existing) => existing.min(when),
            None => when,
        });
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.set_deadline(SystemTime::now() + timeout);
    }

    /// Time left until the deadline; `None` when there is none.
    pub fn deadline_left(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
    }

    /// Completes when the deadline (as of this call) fires; pending
    /// forever without one.
    pub fn wait_deadline(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self.deadline();
        async move {
            match deadline {
                Some(when) => {
                    let left = when
                        .duration_since(SystemTime::now())
                        .unwrap_or(Duration::ZERO);
                    tokio::time::sleep(left).await;
                }
                None => std::future::pending().await,
            }
        }
    }

    /// Store an ambient value under its portable class name.
    pub fn set<T: DynamicClass>(&self, value: T) {
        self.set_value(Arc::new(value));
    }

    pub fn set_value(&self, value: Arc<dyn Dynamic>) {
        let name = value.portable_class_name();
        self.inner.state.lock().values.insert(name, value);
    }

    /// Fetch an ambient value; default-constructed when absent.
    pub fn get<T: DynamicClass + Clone>(&self) -> T {
        self.inner
            .state
            .lock()
            .values
            .get(T::CLASS_NAME)
            .and_then(|v| v.as_any().downcast_ref::<T>().cloned())
            .unwrap_or_default()
    }

    /// Remove an ambient value.
    pub fn reset<T: DynamicClass>(&self) {
        self.inner.state.lock().values.remove(T::CLASS_NAME);
    }

    /// Snapshot of the ambient values, for serialization.
    pub fn values(&self) -> Vec<Arc<dyn Dynamic>> {
        self.inner.state.lock().values.values().cloned().collect()
    }

    /// Wire form of this context: deadline and values only.
    pub fn to_wire(&self) -> ContextWire {
        let deadline_unix_ms = self.deadline().map(|d| {
            d.duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_millis() as u64
        });
        ContextWire {
            deadline_unix_ms,
            values: self.values(),
        }
    }

    /// Fold a received wire context into this one: the deadline is
    /// min-merged, values are inserted.
    pub fn apply_wire(&self, wire: ContextWire) {
        if let Some(ms) = wire.deadline_unix_ms {
            self.set_deadline(UNIX_EPOCH + Duration::from_millis(ms));
        }
        for value in wire.values {
            self.set_value(value);
        }
    }

    /// Run `fut` with this context installed as the current one.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// Await `fut` while watching this context: cancellation raises
    /// `cancelled`, an elapsed deadline raises `deadline_exceeded`.
    /// The future is polled first, so a result that is already
    /// available wins over a deadline that fired in the meantime.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        let mut fut = pin!(fut);
        let mut cancelled = pin!(self.wait_cancelled());
        let mut deadline = pin!(self.wait_deadline());
        std::future::poll_fn(move |cx| {
            if let Poll::Ready(value) = fut.as_mut().poll(cx) {
                return Poll::Ready(Ok(value));
            }
            if cancelled.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Err(Error::cancelled("context cancelled")));
            }
            if deadline.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Err(Error::deadline_exceeded(
                    "context deadline exceeded",
                )));
            }
            Poll::Pending
        })
        .await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &state.deadline)
            .field("values", &state.values.len())
            .finish()
    }
}

/// Serialized form of a context: optional absolute deadline in
/// milliseconds since the epoch, then the ambient values as dynamic
/// objects.
pub struct ContextWire {
    pub deadline_unix_ms: Option<u64>,
    pub values: Vec<Arc<dyn Dynamic>>,
}

impl Encode for ContextWire {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        self.deadline_unix_ms.encode(enc)?;
        self.values.encode(enc)
    }
}

impl Decode for ContextWire {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        Ok(ContextWire {
            deadline_unix_ms: Decode::decode(dec)?,
            values: Decode::decode(dec)?,
        })
    }
}
