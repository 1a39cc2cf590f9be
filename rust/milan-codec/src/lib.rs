//! Binary serialization engine.
//!
//! Values are encoded by an [`Encoder`] driven by the [`Encode`] trait
//! and read back by a [`Decoder`] driven by [`Decode`]. Scalars are
//! bit-transferred in the selected byte order, variable-length data is
//! varint-prefixed, shared pointers go through a per-message identity
//! table, and polymorphic objects are resolved through the process-wide
//! [`registry`].
//!
//! Two byte orders exist as zero-sized type parameters. Peers must agree
//! on the dialect; [`LittleEndian`] is the default for new deployments.

pub mod decode;
pub mod dynamic;
pub mod encode;
pub mod io;
pub mod macros;
pub mod registry;
pub mod shared;

mod impls;

pub use decode::{Decoder, decode_one};
pub use dynamic::{Dynamic, DynamicClass};
pub use encode::{Encoder, encode_one, encoded_size};
pub use milan_hash as hash;
pub use milan_wire::{Error, ErrorKind, Result};
pub use shared::{Shared, SharedWeak};

use registry::ClassEntry;

#[doc(hidden)]
pub mod export {
    //! Items referenced by macro expansions. Not public API.
    pub use ctor::ctor;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::LittleEndian {}
    impl Sealed for super::BigEndian {}
}

/// Byte-order dialect of a codec, chosen at compile time.
pub trait WireOrder: sealed::Sealed + Sized + Send + 'static {
    const LITTLE: bool;

    #[doc(hidden)]
    fn class_encode(
        entry: &ClassEntry,
        enc: &mut Encoder<'_, Self>,
        obj: &dyn Dynamic,
    ) -> Result<()>;

    #[doc(hidden)]
    fn class_decode(
        entry: &ClassEntry,
        dec: &mut Decoder<'_, Self>,
        obj: &mut dyn Dynamic,
    ) -> Result<()>;
}

/// Little-endian dialect (the default for new deployments).
pub struct LittleEndian;

/// Big-endian dialect.
pub struct BigEndian;

impl WireOrder for LittleEndian {
    const LITTLE: bool = true;

    fn class_encode(
        entry: &ClassEntry,
        enc: &mut Encoder<'_, Self>,
        obj: &dyn Dynamic,
    ) -> Result<()> {
        (entry.encode_le)(enc, obj)
    }

    fn class_decode(
        entry: &ClassEntry,
        dec: &mut Decoder<'_, Self>,
        obj: &mut dyn Dynamic,
    ) -> Result<()> {
        (entry.decode_le)(dec, obj)
    }
}

impl WireOrder for BigEndian {
    const LITTLE: bool = false;

    fn class_encode(
        entry: &ClassEntry,
        enc: &mut Encoder<'_, Self>,
        obj: &dyn Dynamic,
    ) -> Result<()> {
        (entry.encode_be)(enc, obj)
    }

    fn class_decode(
        entry: &ClassEntry,
        dec: &mut Decoder<'_, Self>,
        obj: &mut dyn Dynamic,
    ) -> Result<()> {
        (entry.decode_be)(dec, obj)
    }
}

/// Values that can be written by an [`Encoder`].
pub trait Encode {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()>;

    /// Encoding used when the value sits behind a pointer. Dynamic
    /// classes override this to emit a class reference instead of bare
    /// fields.
    fn encode_pointee<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        self.encode(enc)
    }
}

/// Values that can be read by a [`Decoder`].
pub trait Decode: Sized {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self>;

    /// Decoding counterpart of [`Encode::encode_pointee`].
    fn decode_pointee<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        Self::decode(dec)
    }

    /// Portable class name recorded in the shared-object table, for
    /// dynamic-compatibility checks on pointer reuse.
    fn wire_class_name() -> Option<&'static str> {
        None
    }
}
