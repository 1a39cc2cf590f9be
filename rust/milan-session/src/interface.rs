//! Interface declarations and method dispatch tables.
//!
//! [`interface!`](crate::interface) declares a group of remotely
//! callable method signatures as a trait. Server side, the companion
//! dispatch struct builds a [`DispatchTable`] that resolves
//! `(method_name, signature_hash)` to a type-checked handler; client
//! side, a blanket impl makes any [`ProxyHandle`] (in particular
//! [`RemoteObject`](crate::client::RemoteObject)) a proxy of every
//! declared interface.
//!
//! The signature hash of a method is the structural fingerprint of the
//! tuple `(return_type, arg_types…)`, so renaming parameters keeps
//! compatibility while changing any type breaks it.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;

use futures_util::future::BoxFuture;
use milan_codec::{Decode, Encode, LittleEndian, WireOrder};
use milan_wire::{Error, Result};

#[doc(hidden)]
pub use bytes::Bytes;

/// Future returned by a method handler: the encoded `ResultHolder`.
pub type HandlerFuture = BoxFuture<'static, Result<Vec<u8>>>;

/// A registered method body: decodes its argument tuple, invokes the
/// implementation, and packages the outcome.
pub type Handler = std::sync::Arc<dyn Fn(Bytes) -> HandlerFuture + Send + Sync>;

struct MethodEntry {
    type_hash: u32,
    handler: Handler,
}

/// Method table of one served object, keyed by method name with the
/// signature hash checked on every lookup.
pub struct DispatchTable<O: WireOrder = LittleEndian> {
    methods: HashMap<&'static str, MethodEntry>,
    _order: PhantomData<fn() -> O>,
}

impl<O: WireOrder> DispatchTable<O> {
    pub fn new() -> Self {
        DispatchTable {
            methods: HashMap::new(),
            _order: PhantomData,
        }
    }

    /// Install a handler. A method already present with the same hash
    /// is kept (diamond-shaped interface extension); a conflicting
    /// signature is an `invalid_state`.
    pub fn insert(
        &mut self,
        name: &'static str,
        type_hash: u32,
        handler: Handler,
    ) -> Result<()> {
        match self.methods.get(name) {
            Some(existing) if existing.type_hash == type_hash => Ok(()),
            Some(_) => Err(Error::invalid_state(format!(
                "method {} registered twice with different signatures",
                name
            ))),
            None => {
                self.methods.insert(name, MethodEntry { type_hash, handler });
                Ok(())
            }
        }
    }

    /// Fold another table in, with [`insert`](Self::insert) semantics
    /// per method.
    pub fn merge(&mut self, other: DispatchTable<O>) -> Result<()> {
        for (name, entry) in other.methods {
            self.insert(name, entry.type_hash, entry.handler)?;
        }
        Ok(())
    }

    /// Resolve a wire call. An unknown name is `not_found`; a known
    /// name with a different signature hash is `data_mismatch`.
    pub fn lookup(&self, name: &str, type_hash: u32) -> Result<Handler> {
        let entry = self
            .methods
            .get(name)
            .ok_or_else(|| Error::not_found(format!("method {} not found in object", name)))?;
        if entry.type_hash != type_hash {
            return Err(Error::data_mismatch(format!(
                "method {} signature hash mismatch",
                name
            )));
        }
        Ok(entry.handler.clone())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.keys().copied()
    }
}

impl<O: WireOrder> Default for DispatchTable<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything that can carry a typed call to a remote object. The
/// [`interface!`](crate::interface) macro implements every declared
/// interface for all `ProxyHandle`s.
pub trait ProxyHandle {
    fn call_remote<Args, R>(
        &self,
        method: &'static str,
        method_hash: u32,
        args: Args,
    ) -> impl Future<Output = Result<R>> + Send
    where
        Args: Encode + Send + Sync + 'static,
        R: Decode + Send + 'static;
}

#[doc(hidden)]
#[macro_export]
macro_rules! __interface_ret {
    () => { () };
    ($t:ty) => { $t };
}

/// Declare an RPC interface.
///
/// ```ignore
/// milan_session::interface! {
///     /// A remote key-value store.
///     pub trait KeyValue via KeyValueDispatch {
///         fn get(key: String) -> String;
///         fn put(key: String, value: String);
///     }
/// }
/// ```
///
/// This generates:
/// - `trait KeyValue` with one async method per signature, returning
///   `Result<R>`; implement it for your server object.
/// - a blanket impl of `KeyValue` for every [`ProxyHandle`], so a
///   client-side `RemoteObject` can be called directly.
/// - `struct KeyValueDispatch` whose `table()` builds the server
///   [`DispatchTable`] for an implementation.
///
/// An interface extending others names the base traits and their
/// dispatch companions:
///
/// ```ignore
/// milan_session::interface! {
///     pub trait Writer: KeyValue via WriterDispatch + KeyValueDispatch {
///         fn wipe();
///     }
/// }
/// ```
///
/// Every extended interface stays independently registrable: a `Writer`
/// implementation can be served as a `KeyValue` object through
/// `KeyValueDispatch::table` alone.
#[macro_export]
macro_rules! interface {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident $( : $super:ident $( + $extra_super:ident )* )? via $dispatch:ident $( + $base_dispatch:ident )* {
            $(
                $(#[$mmeta:meta])*
                fn $method:ident ( $($arg:ident : $aty:ty),* $(,)? ) $( -> $ret:ty )? ;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis trait $name: $( $super + $( $extra_super + )* )? ::std::marker::Send + ::std::marker::Sync + 'static {
            $(
                $(#[$mmeta])*
                fn $method(
                    &self
                    $(, $arg: $aty)*
                ) -> impl ::std::future::Future<
                    Output = $crate::Result<$crate::__interface_ret!($($ret)?)>,
                > + ::std::marker::Send;
            )*
        }

        impl<P> $name for P
        where
            P: $crate::interface::ProxyHandle
                + ::std::marker::Send
                + ::std::marker::Sync
                + 'static,
        {
            $(
                fn $method(
                    &self
                    $(, $arg: $aty)*
                ) -> impl ::std::future::Future<
                    Output = $crate::Result<$crate::__interface_ret!($($ret)?)>,
                > + ::std::marker::Send {
                    self.call_remote::<($($aty,)*), $crate::__interface_ret!($($ret)?)>(
                        stringify!($method),
                        $crate::codec::hash::type_hash_of::<(
                            $crate::__interface_ret!($($ret)?),
                            $($aty,)*
                        )>(),
                        ($($arg,)*),
                    )
                }
            )*
        }

        $vis struct $dispatch;

        impl $dispatch {
            /// Dispatch table for `obj`, covering this interface and
            /// every extended one.
            $vis fn table<T, O>(
                obj: &::std::sync::Arc<T>,
            ) -> $crate::Result<$crate::interface::DispatchTable<O>>
            where
                T: $name,
                O: $crate::codec::WireOrder,
            {
                #[allow(unused_mut)]
                let mut table = $crate::interface::DispatchTable::<O>::new();
                $(
                    table.merge($base_dispatch::table::<T, O>(obj)?)?;
                )*
                $(
                    {
                        let obj = obj.clone();
                        let handler: $crate::interface::Handler =
                            ::std::sync::Arc::new(move |args: $crate::interface::Bytes| {
                                let obj = obj.clone();
                                ::std::boxed::Box::pin(async move {
                                    let holder = match $crate::codec::decode_one::<
                                        O,
                                        ($($aty,)*),
                                    >(&args)
                                    {
                                        Ok(($($arg,)*)) => {
                                            $crate::ResultHolder::from_result(
                                                obj.$method($($arg),*).await,
                                            )
                                        }
                                        Err(e) => {
                                            $crate::ResultHolder::from_error(
                                                &$crate::Error::data_mismatch(format!(
                                                    "failed to decode arguments: {}",
                                                    e
                                                )),
                                            )
                                        }
                                    };
                                    $crate::codec::encode_one::<O, _>(&holder)
                                })
                            });
                        table.insert(
                            stringify!($method),
                            $crate::codec::hash::type_hash_of::<(
                                $crate::__interface_ret!($($ret)?),
                                $($aty,)*
                            )>(),
                            handler,
                        )?;
                    }
                )*
                Ok(table)
            }
        }
    };
}
