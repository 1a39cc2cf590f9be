//! Shared and weak pointers with content-addressed serialization.
//!
//! A [`Shared<T>`] is a nullable, reference-counted handle with interior
//! mutability. Interior mutability is what makes cyclic graphs
//! decodable: the handle is registered in the per-message table before
//! its content is read, so an inner back-reference can resolve to the
//! very object being populated.
//!
//! On the wire a shared value is an object id varint: 0 is null, an id
//! equal to the current table size introduces a new object whose content
//! follows, and a smaller id references an earlier entry. Reusing an
//! entry through an incompatible pointer type fails with
//! `data_mismatch`.

use std::any::Any;
use std::sync::{Arc, Weak};

use milan_hash::{Family, SeenTypes, TypeHash, fold};
use milan_wire::{Error, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::decode::{Decoder, SharedSlot};
use crate::encode::Encoder;
use crate::{Decode, Encode, WireOrder};

/// Nullable shared handle participating in identity-preserving
/// serialization.
pub struct Shared<T>(Option<Arc<RwLock<T>>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared(Some(Arc::new(RwLock::new(value))))
    }

    pub fn null() -> Self {
        Shared(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Read access to the pointee; `None` when null.
    pub fn read(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.0.as_ref().map(|arc| arc.read())
    }

    /// Write access to the pointee; `None` when null.
    pub fn write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.0.as_ref().map(|arc| arc.write())
    }

    /// Pointer identity. Two null handles compare equal.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn downgrade(&self) -> SharedWeak<T> {
        match &self.0 {
            Some(arc) => SharedWeak(Arc::downgrade(arc)),
            None => SharedWeak(Weak::new()),
        }
    }

    fn from_arc(arc: Arc<RwLock<T>>) -> Self {
        Shared(Some(arc))
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(self.0.clone())
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Shared::null()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.read() {
            Some(guard) => f.debug_tuple("Shared").field(&*guard).finish(),
            None => f.write_str("Shared(null)"),
        }
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    /// Structural equality by value. Aliased handles compare equal
    /// without locking twice.
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.read(), other.read()) {
            (Some(a), Some(b)) => *a == *b,
            (None, None) => true,
            _ => false,
        }
    }
}

/// Weak counterpart of [`Shared`]; serialized as the result of
/// attempting an upgrade.
pub struct SharedWeak<T>(Weak<RwLock<T>>);

impl<T> SharedWeak<T> {
    pub fn new() -> Self {
        SharedWeak(Weak::new())
    }

    pub fn upgrade(&self) -> Shared<T> {
        match self.0.upgrade() {
            Some(arc) => Shared::from_arc(arc),
            None => Shared::null(),
        }
    }
}

impl<T> Clone for SharedWeak<T> {
    fn clone(&self) -> Self {
        SharedWeak(self.0.clone())
    }
}

impl<T> Default for SharedWeak<T> {
    fn default() -> Self {
        SharedWeak::new()
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

impl<T: TypeHash> TypeHash for Shared<T> {
    fn accumulate(h: u32, seen: &mut SeenTypes) -> u32 {
        if let Some(ix) = seen.find::<Self>() {
            return fold(h, Family::SeenBackreference, false, ix);
        }
        let h = fold(h, Family::SharedPtr, false, 0);
        seen.push::<Self>();
        let h = T::accumulate(h, seen);
        seen.pop();
        h
    }
}

impl<T: TypeHash> TypeHash for SharedWeak<T> {
    fn accumulate(h: u32, seen: &mut SeenTypes) -> u32 {
        if let Some(ix) = seen.find::<Self>() {
            return fold(h, Family::SeenBackreference, false, ix);
        }
        let h = fold(h, Family::WeakPtr, false, 0);
        seen.push::<Self>();
        let h = T::accumulate(h, seen);
        seen.pop();
        h
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

impl<T: Encode> Encode for Shared<T> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        let Some(arc) = &self.0 else {
            enc.put_varint(0);
            return Ok(());
        };
        let key = Arc::as_ptr(arc) as usize;
        if let Some(id) = enc.shared_lookup(key) {
            enc.put_varint(id);
            return Ok(());
        }
        let id = enc.shared_register(key);
        enc.put_varint(id);
        let guard = arc.read();
        guard.encode_pointee(enc)
    }
}

impl<T> Decode for Shared<T>
where
    T: Decode + Default + Send + Sync + 'static,
{
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let id = dec.get_varint()?;
        if id == 0 {
            return Ok(Shared::null());
        }
        let table_len = dec.shared_len();
        if id > table_len {
            return Err(Error::data_mismatch("wrong object id in stream"));
        }
        if id == table_len {
            // New object: enter the handle into the table before the
            // content is read, so cycles can point back at it.
            let arc = Arc::new(RwLock::new(T::default()));
            dec.push_shared(SharedSlot {
                any: arc.clone(),
                class_name: T::wire_class_name(),
            });
            let value = T::decode_pointee(dec)?;
            *arc.write() = value;
            Ok(Shared::from_arc(arc))
        } else {
            let slot = dec.shared_slot(id)?.clone();
            let arc = slot.any.downcast::<RwLock<T>>().map_err(|_| {
                Error::data_mismatch(match slot.class_name {
                    Some(name) => format!(
                        "object of class {} shared among incompatible pointers",
                        name
                    ),
                    None => "data shared among incompatible pointers".to_string(),
                })
            })?;
            Ok(Shared::from_arc(arc))
        }
    }
}

impl<T: Encode> Encode for SharedWeak<T> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        self.upgrade().encode(enc)
    }
}

impl<T> Decode for SharedWeak<T>
where
    T: Decode + Default + Send + Sync + 'static,
{
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let shared: Shared<T> = Shared::decode(dec)?;
        Ok(shared.downgrade())
    }
}
