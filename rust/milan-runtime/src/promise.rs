//! One-shot promise / future-value pair.

use futures_util::future::BoxFuture;
use milan_wire::{Error, Result};
use tokio::sync::oneshot;

use crate::context::Context;

/// Create a linked promise and future value.
pub fn promise<T: Send + 'static>() -> (Promise<T>, FutureValue<T>) {
    let (tx, rx) = oneshot::channel::<Result<T>>();
    let fut = Box::pin(async move {
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::invalid_state("promise dropped without a result")),
        }
    });
    (Promise { tx: Some(tx) }, FutureValue { fut })
}

/// Producing half: settable exactly once with a value or an error.
pub struct Promise<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T> Promise<T> {
    /// Returns false if the promise was already settled or abandoned.
    pub fn set_value(&mut self, value: T) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Returns false if the promise was already settled or abandoned.
    pub fn set_error(&mut self, error: Error) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx.is_none()
    }
}

/// Consuming half: awaits the settled result under the current context.
pub struct FutureValue<T> {
    fut: BoxFuture<'static, Result<T>>,
}

impl<T: Send + 'static> FutureValue<T> {
    /// Await the result; cancellation and deadlines of the current
    /// context interrupt the wait.
    pub async fn get(self) -> Result<T> {
        Context::current().run(self.fut).await?
    }

    /// Compose a continuation without consuming the state; it runs on
    /// the task that observes the completion.
    pub fn map<U, F>(self, f: F) -> FutureValue<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let fut = self.fut;
        FutureValue {
            fut: Box::pin(async move { f(fut.await?) }),
        }
    }
}
