//! Binary latch.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// A settable, resettable latch whose `wait_set` is an awaitable.
///
/// Clones observe the same latch.
#[derive(Clone)]
pub struct Flag {
    tx: Arc<watch::Sender<bool>>,
}

impl Flag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Flag { tx: Arc::new(tx) }
    }

    pub fn set(&self) {
        self.tx.send_if_modified(|state| {
            let changed = !*state;
            *state = true;
            changed
        });
    }

    pub fn reset(&self) {
        self.tx.send_if_modified(|state| {
            let changed = *state;
            *state = false;
            changed
        });
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes as soon as the flag is (or becomes) set.
    pub fn wait_set(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|set| *set).await;
        }
    }
}

impl Default for Flag {
    fn default() -> Self {
        Flag::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::select;
    use crate::time::after;
    use std::time::Duration;

    #[tokio::test]
    async fn set_wakes_waiters() {
        let flag = Flag::new();
        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.wait_set().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        flag.set();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn already_set_completes_immediately() {
        let flag = Flag::new();
        flag.set();
        let (ready, _) = select((flag.wait_set(), after(Duration::from_secs(60))))
            .await
            .unwrap();
        assert!(ready.is_some());
    }

    #[tokio::test]
    async fn reset_drains_the_latch() {
        let flag = Flag::new();
        flag.set();
        assert!(flag.is_set());
        flag.reset();
        assert!(!flag.is_set());
        // A waiter created after the reset must block again.
        let (ready, timer) = select((flag.wait_set(), after(Duration::from_millis(20))))
            .await
            .unwrap();
        assert!(ready.is_none());
        assert!(timer.is_some());
    }
}
