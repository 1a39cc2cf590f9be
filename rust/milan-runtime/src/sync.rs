//! Context-aware mutex and semaphore.
//!
//! Thin wrappers over the tokio primitives: every blocking acquisition
//! goes through the current context, so cancellation and deadlines
//! interrupt it; the non-blocking variants surface `try_again` instead
//! of blocking.

use std::sync::Arc;

use milan_wire::{Error, Result};
use tokio::sync::{OwnedSemaphorePermit, TryAcquireError};

use crate::context::Context;

pub use tokio::sync::MutexGuard;

/// Context-aware mutual exclusion around a value.
pub struct Mutex<T> {
    inner: tokio::sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex {
            inner: tokio::sync::Mutex::new(value),
        }
    }

    /// Lock, observing the current context.
    pub async fn lock(&self) -> Result<MutexGuard<'_, T>> {
        Context::current().run(self.inner.lock()).await
    }

    /// Lock without blocking; `try_again` when contended.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>> {
        self.inner
            .try_lock()
            .map_err(|_| Error::try_again("mutex is locked"))
    }
}

/// Permit returned by [`Semaphore::acquire`]; dropping it releases the
/// slot.
pub type Permit = OwnedSemaphorePermit;

/// Context-aware counting semaphore.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<tokio::sync::Semaphore>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            inner: Arc::new(tokio::sync::Semaphore::new(permits)),
        }
    }

    /// Acquire one permit, observing the current context.
    pub async fn acquire(&self) -> Result<Permit> {
        let acquired = Context::current()
            .run(self.inner.clone().acquire_owned())
            .await?;
        acquired.map_err(|_| Error::shutting_down("semaphore closed"))
    }

    /// Acquire without blocking; `try_again` when exhausted.
    pub fn try_acquire(&self) -> Result<Permit> {
        self.inner
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => Error::try_again("no permits available"),
                TryAcquireError::Closed => Error::shutting_down("semaphore closed"),
            })
    }

    pub fn add_permits(&self, n: usize) {
        self.inner.add_permits(n);
    }

    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn mutex_try_lock_reports_try_again() {
        let mutex = Mutex::new(1u32);
        let guard = mutex.lock().await.unwrap();
        let err = mutex.try_lock().unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::TryAgain);
        drop(guard);
        assert_eq!(*mutex.try_lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn mutex_lock_observes_deadlines() {
        let mutex = Arc::new(Mutex::new(()));
        let _held = mutex.lock().await.unwrap();

        let ctx = Context::root().child();
        ctx.set_timeout(Duration::from_millis(20));
        let contended = mutex.clone();
        let err = ctx
            .scope(async move { contended.lock().await.map(|_| ()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::DeadlineExceeded);
    }

    #[tokio::test]
    async fn semaphore_counts_permits() {
        let sem = Semaphore::new(2);
        let a = sem.acquire().await.unwrap();
        let _b = sem.acquire().await.unwrap();
        let err = sem.try_acquire().unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::TryAgain);
        drop(a);
        assert!(sem.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn semaphore_acquire_observes_cancellation() {
        let sem = Semaphore::new(0);
        let ctx = Context::root().child();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let err = ctx
            .scope(async { sem.acquire().await.map(|_| ()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::Cancelled);
    }
}
