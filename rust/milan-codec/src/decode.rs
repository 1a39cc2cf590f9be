//! Binary decoder.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use milan_hash::{TypeHash, type_hash_of};
use milan_wire::{Error, Result};

use crate::dynamic::Dynamic;
use crate::io::Reader;
use crate::registry::{self, ClassEntry};
use crate::{Decode, LittleEndian, WireOrder};

/// Entry in the per-message shared-object table.
#[derive(Clone)]
pub struct SharedSlot {
    /// The decoded pointer, type-erased.
    pub any: Arc<dyn Any + Send + Sync>,
    /// Portable class name for dynamic values, used to diagnose
    /// incompatible reuse.
    pub class_name: Option<&'static str>,
}

/// Reads values from a borrowed buffer in the dialect selected by `O`.
///
/// Like the encoder, a decoder corresponds to one message: its
/// shared-object and class tables never persist across messages.
pub struct Decoder<'a, O: WireOrder = LittleEndian> {
    input: Reader<'a>,
    shared: Vec<SharedSlot>,
    classes: Vec<Arc<ClassEntry>>,
    _order: PhantomData<O>,
}

macro_rules! get_scalar {
    ($($fn_name:ident : $t:ty => $n:expr;)*) => {
        $(
            pub fn $fn_name(&mut self) -> Result<$t> {
                let raw = self.input.take($n)?;
                let mut bytes = [0u8; $n];
                bytes.copy_from_slice(raw);
                Ok(if O::LITTLE {
                    <$t>::from_le_bytes(bytes)
                } else {
                    <$t>::from_be_bytes(bytes)
                })
            }
        )*
    };
}

impl<'a, O: WireOrder> Decoder<'a, O> {
    pub fn new(input: &'a [u8]) -> Self {
        Decoder {
            input: Reader::new(input),
            shared: Vec::new(),
            classes: Vec::new(),
            _order: PhantomData,
        }
    }

    pub fn position(&self) -> usize {
        self.input.position()
    }

    pub fn remaining(&self) -> usize {
        self.input.remaining()
    }

    pub fn take_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.input.take(n)
    }

    /// Hand back whatever follows; used to split a message into
    /// independently decoded sections.
    pub fn take_rest(&mut self) -> &'a [u8] {
        self.input.take_rest()
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.input.take_u8()
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(self.input.take_u8()? as i8)
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.input.take_u8()? != 0)
    }

    get_scalar! {
        get_u16: u16 => 2;
        get_u32: u32 => 4;
        get_u64: u64 => 8;
        get_i16: i16 => 2;
        get_i32: i32 => 4;
        get_i64: i64 => 8;
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.get_u32()?))
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64()?))
    }

    pub fn get_varint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            if shift > 63 {
                return Err(Error::data_mismatch("varint exceeded 10 bytes"));
            }
            let byte = self.input.take_u8()?;
            let group = (byte & 0x7f) as u64;
            if shift == 63 && group > 1 {
                return Err(Error::data_mismatch("varint overflows 64 bits"));
            }
            value |= group << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn decode<T: Decode>(&mut self) -> Result<T> {
        T::decode(self)
    }

    /// Counterpart of [`Encoder::encode_verified`]: read the prepended
    /// fingerprint and reject the payload on mismatch.
    ///
    /// [`Encoder::encode_verified`]: crate::Encoder::encode_verified
    pub fn decode_verified<T: Decode + TypeHash>(&mut self) -> Result<T> {
        let wire_hash = self.get_u32()?;
        let expected = type_hash_of::<T>();
        if wire_hash != expected {
            return Err(Error::data_mismatch(format!(
                "wrong type hash in verified read: {:#010x}, expected {:#010x}",
                wire_hash, expected
            )));
        }
        T::decode(self)
    }

    /// Read a polymorphic object reference written by
    /// [`Encoder::encode_dynamic`]. When `expected_base` is given, the
    /// wire class must be registered in that interface's subclass set.
    ///
    /// [`Encoder::encode_dynamic`]: crate::Encoder::encode_dynamic
    pub fn decode_dynamic(
        &mut self,
        expected_base: Option<&str>,
    ) -> Result<Box<dyn Dynamic>> {
        let id = self.get_varint()? as usize;
        if id > self.classes.len() {
            return Err(Error::data_mismatch("received wrong class id in stream"));
        }
        if id == self.classes.len() {
            let name: String = self.decode()?;
            let wire_hash = self.get_u32()?;
            let entry = registry::global().get(&name)?;
            if wire_hash != entry.type_hash {
                return Err(Error::data_mismatch(format!(
                    "wrong type hash for dynamic class {}",
                    name
                )));
            }
            self.classes.push(entry);
        }
        let entry = self.classes[id].clone();

        if let Some(base) = expected_base {
            if !registry::global().is_subclass(base, entry.name) {
                return Err(Error::data_mismatch(format!(
                    "class {} is not a subclass of pointed-to type {}",
                    entry.name, base
                )));
            }
        }

        let mut obj = (entry.factory)();
        O::class_decode(&entry, self, &mut *obj)?;
        Ok(obj)
    }

    /// Current size of the shared-object table, counting the implicit
    /// null entry at id 0.
    pub fn shared_len(&self) -> u64 {
        self.shared.len() as u64 + 1
    }

    /// Record a freshly decoded shared object, returning its id.
    pub fn push_shared(&mut self, slot: SharedSlot) -> u64 {
        self.shared.push(slot);
        self.shared.len() as u64
    }

    pub fn shared_slot(&self, id: u64) -> Result<&SharedSlot> {
        let ix = (id as usize)
            .checked_sub(1)
            .ok_or_else(|| Error::data_mismatch("null shared object dereferenced"))?;
        self.shared
            .get(ix)
            .ok_or_else(|| Error::data_mismatch("wrong object id in stream"))
    }
}

/// Decode one value from a buffer.
pub fn decode_one<O: WireOrder, T: Decode>(bytes: &[u8]) -> Result<T> {
    let mut dec = Decoder::<O>::new(bytes);
    dec.decode()
}
