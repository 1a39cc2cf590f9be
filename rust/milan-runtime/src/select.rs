//! Batch select over heterogeneous futures.
//!
//! [`select`] takes a tuple of futures (arity 1 to 8), [`select_all`] a
//! vector of homogeneous ones. Both block until at least one input is
//! ready and report *every* input that completed in the same poll
//! batch, as `Option`s in input order, so ties are stable. Both always
//! watch the current context as well: cancellation and deadlines
//! surface as errors rather than results.
//!
//! An input that is ready at entry is reported before the deadline
//! fires; after entry, whichever event wakes the task first wins.

use std::future::Future;
use std::pin::{Pin, pin};
use std::task::Poll;

use milan_wire::{Error, Result};

use crate::context::Context;

/// A tuple of futures usable with [`select`].
pub trait SelectSet {
    /// Tuple of `Option<Output>`s, one per input.
    type Ready: Default;
    #[doc(hidden)]
    type Pinned;

    #[doc(hidden)]
    fn pin_set(self) -> Self::Pinned;

    #[doc(hidden)]
    fn poll_set(
        pinned: &mut Self::Pinned,
        out: &mut Self::Ready,
        cx: &mut std::task::Context<'_>,
    ) -> bool;
}

macro_rules! impl_select_set {
    ($( $f:ident . $idx:tt ),+) => {
        impl<$($f: Future),+> SelectSet for ($($f,)+) {
            type Ready = ($(Option<$f::Output>,)+);
            type Pinned = ($(Option<Pin<Box<$f>>>,)+);

            fn pin_set(self) -> Self::Pinned {
                ($(Some(Box::pin(self.$idx)),)+)
            }

            fn poll_set(
                pinned: &mut Self::Pinned,
                out: &mut Self::Ready,
                cx: &mut std::task::Context<'_>,
            ) -> bool {
                let mut any = false;
                $(
                    if let Some(fut) = pinned.$idx.as_mut() {
                        if let Poll::Ready(value) = fut.as_mut().poll(cx) {
                            out.$idx = Some(value);
                            pinned.$idx = None;
                            any = true;
                        }
                    }
                )+
                any
            }
        }
    };
}

impl_select_set!(A.0);
impl_select_set!(A.0, B.1);
impl_select_set!(A.0, B.1, C.2);
impl_select_set!(A.0, B.1, C.2, D.3);
impl_select_set!(A.0, B.1, C.2, D.3, E.4);
impl_select_set!(A.0, B.1, C.2, D.3, E.4, F.5);
impl_select_set!(A.0, B.1, C.2, D.3, E.4, F.5, G.6);
impl_select_set!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);

/// Await the first ready future(s) of a tuple, under the current
/// context's cancellation and deadline.
pub async fn select<S: SelectSet>(set: S) -> Result<S::Ready> {
    let ctx = Context::current();
    let mut pinned = S::pin_set(set);
    let mut out = S::Ready::default();
    let mut cancelled = pin!(ctx.wait_cancelled());
    let mut deadline = pin!(ctx.wait_deadline());
    let mut done = false;

    std::future::poll_fn(move |cx| {
        if done {
            return Poll::Pending;
        }
        if S::poll_set(&mut pinned, &mut out, cx) {
            done = true;
            return Poll::Ready(Ok(std::mem::take(&mut out)));
        }
        if cancelled.as_mut().poll(cx).is_ready() {
            done = true;
            return Poll::Ready(Err(Error::cancelled("context cancelled")));
        }
        if deadline.as_mut().poll(cx).is_ready() {
            done = true;
            return Poll::Ready(Err(Error::deadline_exceeded(
                "context deadline exceeded",
            )));
        }
        Poll::Pending
    })
    .await
}

/// [`select`] over a homogeneous vector of futures.
pub async fn select_all<F: Future>(futures: Vec<F>) -> Result<Vec<Option<F::Output>>> {
    let ctx = Context::current();
    let mut pinned: Vec<Option<Pin<Box<F>>>> =
        futures.into_iter().map(|f| Some(Box::pin(f))).collect();
    let mut out: Vec<Option<F::Output>> = pinned.iter().map(|_| None).collect();
    let mut cancelled = pin!(ctx.wait_cancelled());
    let mut deadline = pin!(ctx.wait_deadline());
    let mut done = false;

    std::future::poll_fn(move |cx| {
        if done {
            return Poll::Pending;
        }
        let mut any = false;
        for (slot, result) in pinned.iter_mut().zip(out.iter_mut()) {
            if let Some(fut) = slot {
                if let Poll::Ready(value) = fut.as_mut().poll(cx) {
                    *result = Some(value);
                    *slot = None;
                    any = true;
                }
            }
        }
        if any {
            done = true;
            return Poll::Ready(Ok(std::mem::take(&mut out)));
        }
        if cancelled.as_mut().poll(cx).is_ready() {
            done = true;
            return Poll::Ready(Err(Error::cancelled("context cancelled")));
        }
        if deadline.as_mut().poll(cx).is_ready() {
            done = true;
            return Poll::Ready(Err(Error::deadline_exceeded(
                "context deadline exceeded",
            )));
        }
        Poll::Pending
    })
    .await
}
