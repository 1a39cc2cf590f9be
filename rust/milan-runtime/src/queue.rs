//! Bounded multi-producer multi-consumer queue.
//!
//! A ring buffer guarded by a mutex, with one notification side for
//! waiting producers and one for waiting consumers. `put`/`get` block
//! under the current context; `maybe_put`/`maybe_get` fail with
//! `try_again` instead of blocking. Closing the queue fails producers
//! immediately with `shutting_down` and lets consumers drain what is
//! left before failing the same way.

use std::collections::VecDeque;
use std::sync::Arc;

use milan_wire::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::context::Context;

struct State<T> {
    buf: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    item_ready: Notify,
    space_ready: Notify,
}

/// Bounded blocking queue; clones share the same buffer.
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        BoundedQueue {
            inner: self.inner.clone(),
        }
    }
}

enum PushBlocked<T> {
    Full(T),
    Closed,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    buf: VecDeque::with_capacity(capacity.max(1)),
                    capacity: capacity.max(1),
                    closed: false,
                }),
                item_ready: Notify::new(),
                space_ready: Notify::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    pub fn is_full(&self) -> bool {
        let state = self.inner.state.lock();
        state.buf.len() == state.capacity
    }

    fn push_inner(&self, value: T) -> std::result::Result<(), PushBlocked<T>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PushBlocked::Closed);
        }
        if state.buf.len() == state.capacity {
            return Err(PushBlocked::Full(value));
        }
        state.buf.push_back(value);
        drop(state);
        self.inner.item_ready.notify_one();
        Ok(())
    }

    /// Enqueue without blocking. A full queue drops the value and
    /// fails with `try_again`; a closed one with `shutting_down`.
    pub fn maybe_put(&self, value: T) -> Result<()> {
        match self.push_inner(value) {
            Ok(()) => Ok(()),
            Err(PushBlocked::Full(_)) => Err(Error::try_again("queue is full")),
            Err(PushBlocked::Closed) => Err(Error::shutting_down("queue is closed")),
        }
    }

    /// Enqueue, blocking under the current context while full.
    pub async fn put(&self, value: T) -> Result<()> {
        let ctx = Context::current();
        let mut pending = value;
        loop {
            let space = self.inner.space_ready.notified();
            match self.push_inner(pending) {
                Ok(()) => return Ok(()),
                Err(PushBlocked::Closed) => {
                    return Err(Error::shutting_down("queue is closed"));
                }
                Err(PushBlocked::Full(back)) => {
                    pending = back;
                    ctx.run(space).await?;
                }
            }
        }
    }

    /// Dequeue without blocking. An empty open queue fails with
    /// `try_again`; an empty closed one with `shutting_down`.
    pub fn maybe_get(&self) -> Result<T> {
        let mut state = self.inner.state.lock();
        match state.buf.pop_front() {
            Some(value) => {
                drop(state);
                self.inner.space_ready.notify_one();
                Ok(value)
            }
            None if state.closed => Err(Error::shutting_down("queue is closed")),
            None => Err(Error::try_again("queue is empty")),
        }
    }

    /// Dequeue, blocking under the current context while empty.
    pub async fn get(&self) -> Result<T> {
        let ctx = Context::current();
        loop {
            let item = self.inner.item_ready.notified();
            match self.maybe_get() {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == milan_wire::ErrorKind::TryAgain => {
                    ctx.run(item).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Close the queue: producers fail immediately, consumers drain.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.item_ready.notify_waiters();
        self.inner.space_ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}
