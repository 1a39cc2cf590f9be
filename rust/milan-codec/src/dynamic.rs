//! Polymorphic (dynamic) objects.
//!
//! A dynamic class is a user type with a stable portable name. The name,
//! not the Rust type, identifies the class on the wire, which lets a
//! peer decode into whatever concrete type it registered under that
//! name. Registration happens at program start through the
//! [`dynamic_class!`](crate::dynamic_class) macro or explicitly via
//! [`registry::register_class`](crate::registry::register_class).

use std::any::Any;
use std::sync::Arc;

use milan_wire::Result;

use crate::decode::Decoder;
use crate::encode::Encoder;
use crate::{Decode, Encode, WireOrder};

/// Object-safe face of a dynamic class.
pub trait Dynamic: Any + Send + Sync {
    /// Stable name identifying the class on the wire.
    fn portable_class_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// A concrete, registered dynamic class.
pub trait DynamicClass: Dynamic + Encode + Decode + Default {
    /// Portable class name; must be unique process-wide.
    const CLASS_NAME: &'static str;

    /// Interfaces this class is decodable under, for the per-interface
    /// subclass check.
    const BASE_INTERFACES: &'static [&'static str];
}

impl Encode for Arc<dyn Dynamic> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.encode_dynamic(&**self)
    }
}

impl Decode for Arc<dyn Dynamic> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        Ok(Arc::from(dec.decode_dynamic(None)?))
    }
}

impl Encode for Box<dyn Dynamic> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.encode_dynamic(&**self)
    }
}

impl Decode for Box<dyn Dynamic> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        dec.decode_dynamic(None)
    }
}
