//! Binary encoder.

use std::collections::HashMap;
use std::marker::PhantomData;

use milan_hash::{TypeHash, type_hash_of};
use milan_wire::{Result, varint};

use crate::dynamic::Dynamic;
use crate::io::{SizeSink, WriteBytes};
use crate::registry;
use crate::{Encode, LittleEndian, WireOrder};

/// Writes values into a byte sink in the dialect selected by `O`.
///
/// One encoder corresponds to one message: the shared-object and
/// class-id tables live for the encoder's lifetime and are never reused
/// across messages.
pub struct Encoder<'a, O: WireOrder = LittleEndian> {
    out: &'a mut dyn WriteBytes,
    shared_ids: HashMap<usize, u64>,
    class_ids: HashMap<&'static str, u64>,
    _order: PhantomData<O>,
}

macro_rules! put_scalar {
    ($($fn_name:ident : $t:ty;)*) => {
        $(
            pub fn $fn_name(&mut self, value: $t) {
                if O::LITTLE {
                    self.out.put(&value.to_le_bytes());
                } else {
                    self.out.put(&value.to_be_bytes());
                }
            }
        )*
    };
}

impl<'a, O: WireOrder> Encoder<'a, O> {
    pub fn new(out: &'a mut dyn WriteBytes) -> Self {
        Encoder {
            out,
            shared_ids: HashMap::new(),
            class_ids: HashMap::new(),
            _order: PhantomData,
        }
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.out.put(bytes);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.out.put(&[value]);
    }

    pub fn put_i8(&mut self, value: i8) {
        self.out.put(&[value as u8]);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    put_scalar! {
        put_u16: u16;
        put_u32: u32;
        put_u64: u64;
        put_i16: i16;
        put_i32: i32;
        put_i64: i64;
    }

    pub fn put_f32(&mut self, value: f32) {
        self.put_u32(value.to_bits());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.put_u64(value.to_bits());
    }

    pub fn put_varint(&mut self, value: u64) {
        let mut buf = [0u8; varint::MAX_VARINT_LEN];
        let n = varint::encode(value, &mut buf);
        self.out.put(&buf[..n]);
    }

    pub fn encode<T: Encode + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.encode(self)
    }

    /// Encode with the value's structural fingerprint prepended, so the
    /// reader can reject a schema mismatch before touching the payload.
    pub fn encode_verified<T: Encode + TypeHash>(&mut self, value: &T) -> Result<()> {
        self.put_u32(type_hash_of::<T>());
        value.encode(self)
    }

    /// Write a polymorphic object reference: a per-stream class id,
    /// followed (on first occurrence) by the portable class name and the
    /// class's type hash, then the object's content through the
    /// registered encoder.
    pub fn encode_dynamic(&mut self, obj: &dyn Dynamic) -> Result<()> {
        let name = obj.portable_class_name();
        let entry = registry::global().get(name)?;
        let known = self.class_ids.get(name).copied();
        match known {
            Some(id) => self.put_varint(id),
            None => {
                let id = self.class_ids.len() as u64;
                self.class_ids.insert(name, id);
                self.put_varint(id);
                self.encode(name)?;
                self.put_u32(entry.type_hash);
            }
        }
        O::class_encode(&entry, self, obj)
    }

    /// Object id for a pointer already written on this stream.
    pub fn shared_lookup(&self, ptr: usize) -> Option<u64> {
        self.shared_ids.get(&ptr).copied()
    }

    /// Assign the next object id to `ptr`. Id 0 is the null object, so
    /// fresh ids start at 1 and always equal the table size at the time
    /// of writing.
    pub fn shared_register(&mut self, ptr: usize) -> u64 {
        let id = self.shared_ids.len() as u64 + 1;
        self.shared_ids.insert(ptr, id);
        id
    }
}

/// Encode one value into a fresh buffer.
pub fn encode_one<O: WireOrder, T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut enc = Encoder::<O>::new(&mut out);
    enc.encode(value)?;
    Ok(out)
}

/// Number of bytes `value` would occupy, without materializing them.
pub fn encoded_size<O: WireOrder, T: Encode + ?Sized>(value: &T) -> Result<usize> {
    let mut sink = SizeSink::new();
    let mut enc = Encoder::<O>::new(&mut sink);
    enc.encode(value)?;
    Ok(sink.len())
}
