//! Codec implementations for primitives, containers and tuples.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;

use bytes::Bytes;
use milan_wire::{Error, Result};

use crate::decode::Decoder;
use crate::encode::Encoder;
use crate::{Decode, Encode, WireOrder};

// Cap for speculative pre-allocation while decoding: a hostile length
// prefix must not translate into a huge reservation before any element
// has actually been read.
const MAX_PREALLOC: usize = 4096;

fn prealloc(len: usize) -> usize {
    len.min(MAX_PREALLOC)
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

macro_rules! scalar_codec {
    ($($t:ty => $put:ident / $get:ident;)*) => {
        $(
            impl Encode for $t {
                fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
                    enc.$put(*self);
                    Ok(())
                }
            }

            impl Decode for $t {
                fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
                    dec.$get()
                }
            }
        )*
    };
}

scalar_codec! {
    u8 => put_u8 / get_u8;
    u16 => put_u16 / get_u16;
    u32 => put_u32 / get_u32;
    u64 => put_u64 / get_u64;
    i8 => put_i8 / get_i8;
    i16 => put_i16 / get_i16;
    i32 => put_i32 / get_i32;
    i64 => put_i64 / get_i64;
    f32 => put_f32 / get_f32;
    f64 => put_f64 / get_f64;
    bool => put_bool / get_bool;
}

impl Encode for () {
    fn encode<O: WireOrder>(&self, _enc: &mut Encoder<'_, O>) -> Result<()> {
        Ok(())
    }
}

impl Decode for () {
    fn decode<O: WireOrder>(_dec: &mut Decoder<'_, O>) -> Result<Self> {
        Ok(())
    }
}

impl Encode for char {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_u32(*self as u32);
        Ok(())
    }
}

impl Decode for char {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let raw = dec.get_u32()?;
        char::from_u32(raw)
            .ok_or_else(|| Error::data_mismatch(format!("invalid char scalar {:#x}", raw)))
    }
}

// ---------------------------------------------------------------------------
// Strings and byte buffers
// ---------------------------------------------------------------------------

impl Encode for str {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_varint(self.len() as u64);
        enc.put_bytes(self.as_bytes());
        Ok(())
    }
}

impl Encode for &str {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        (**self).encode(enc)
    }
}

impl Encode for String {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        self.as_str().encode(enc)
    }
}

impl Decode for String {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let len = dec.get_varint()? as usize;
        let bytes = dec.take_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::data_mismatch("string is not valid utf-8"))
    }
}

// Contiguous scalar block; collides with Vec<u8> on the wire by design.
impl Encode for Bytes {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_varint(self.len() as u64);
        enc.put_bytes(self);
        Ok(())
    }
}

impl Decode for Bytes {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let len = dec.get_varint()? as usize;
        Ok(Bytes::copy_from_slice(dec.take_bytes(len)?))
    }
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

impl<T: Encode> Encode for [T] {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_varint(self.len() as u64);
        for item in self {
            item.encode(enc)?;
        }
        Ok(())
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        self.as_slice().encode(enc)
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let len = dec.get_varint()? as usize;
        let mut out = Vec::with_capacity(prealloc(len));
        for _ in 0..len {
            out.push(T::decode(dec)?);
        }
        Ok(out)
    }
}

impl<T: Encode> Encode for VecDeque<T> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_varint(self.len() as u64);
        for item in self {
            item.encode(enc)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for VecDeque<T> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let len = dec.get_varint()? as usize;
        let mut out = VecDeque::with_capacity(prealloc(len));
        for _ in 0..len {
            out.push_back(T::decode(dec)?);
        }
        Ok(out)
    }
}

// Statically sized containers omit the size prefix.
impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        for item in self {
            item.encode(enc)?;
        }
        Ok(())
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let mut out = Vec::with_capacity(N);
        for _ in 0..N {
            out.push(T::decode(dec)?);
        }
        out.try_into()
            .map_err(|_| Error::invalid_state("array rebuild length mismatch"))
    }
}

// ---------------------------------------------------------------------------
// Associative containers
// ---------------------------------------------------------------------------

impl<T: Encode> Encode for HashSet<T> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_varint(self.len() as u64);
        for item in self {
            item.encode(enc)?;
        }
        Ok(())
    }
}

impl<T: Decode + Eq + Hash> Decode for HashSet<T> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let len = dec.get_varint()? as usize;
        let mut out = HashSet::with_capacity(prealloc(len));
        for _ in 0..len {
            out.insert(T::decode(dec)?);
        }
        Ok(out)
    }
}

impl<T: Encode> Encode for BTreeSet<T> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_varint(self.len() as u64);
        for item in self {
            item.encode(enc)?;
        }
        Ok(())
    }
}

impl<T: Decode + Ord> Decode for BTreeSet<T> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let len = dec.get_varint()? as usize;
        let mut out = BTreeSet::new();
        for _ in 0..len {
            out.insert(T::decode(dec)?);
        }
        Ok(out)
    }
}

impl<K: Encode, V: Encode> Encode for HashMap<K, V> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_varint(self.len() as u64);
        for (k, v) in self {
            k.encode(enc)?;
            v.encode(enc)?;
        }
        Ok(())
    }
}

impl<K: Decode + Eq + Hash, V: Decode> Decode for HashMap<K, V> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let len = dec.get_varint()? as usize;
        let mut out = HashMap::with_capacity(prealloc(len));
        for _ in 0..len {
            let k = K::decode(dec)?;
            let v = V::decode(dec)?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_varint(self.len() as u64);
        for (k, v) in self {
            k.encode(enc)?;
            v.encode(enc)?;
        }
        Ok(())
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let len = dec.get_varint()? as usize;
        let mut out = BTreeMap::new();
        for _ in 0..len {
            let k = K::decode(dec)?;
            let v = V::decode(dec)?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tuples
// ---------------------------------------------------------------------------

macro_rules! tuple_codec {
    ($($t:ident . $idx:tt),+) => {
        impl<$($t: Encode),+> Encode for ($($t,)+) {
            fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
                $( self.$idx.encode(enc)?; )+
                Ok(())
            }
        }

        impl<$($t: Decode),+> Decode for ($($t,)+) {
            fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
                Ok(($( $t::decode(dec)?, )+))
            }
        }
    };
}

tuple_codec!(A.0);
tuple_codec!(A.0, B.1);
tuple_codec!(A.0, B.1, C.2);
tuple_codec!(A.0, B.1, C.2, D.3);
tuple_codec!(A.0, B.1, C.2, D.3, E.4);
tuple_codec!(A.0, B.1, C.2, D.3, E.4, F.5);
tuple_codec!(A.0, B.1, C.2, D.3, E.4, F.5, G.6);
tuple_codec!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);

// ---------------------------------------------------------------------------
// Nullable indirections
// ---------------------------------------------------------------------------

impl<T: Encode> Encode for Option<T> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        match self {
            Some(value) => {
                enc.put_bool(true);
                value.encode_pointee(enc)
            }
            None => {
                enc.put_bool(false);
                Ok(())
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        if dec.get_bool()? {
            Ok(Some(T::decode_pointee(dec)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Encode> Encode for Box<T> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        enc.put_bool(true);
        self.as_ref().encode_pointee(enc)
    }
}

impl<T: Decode> Decode for Box<T> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        if !dec.get_bool()? {
            return Err(Error::data_mismatch(
                "null pointee for a non-nullable box",
            ));
        }
        Ok(Box::new(T::decode_pointee(dec)?))
    }
}

#[cfg(test)]
mod tests {
    use crate::{BigEndian, Decode, Encode, LittleEndian, decode_one, encode_one, encoded_size};
    use std::collections::{BTreeMap, HashMap};

    fn roundtrip_le<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = encode_one::<LittleEndian, _>(&value).unwrap();
        let back: T = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert_eq!(back, value);
    }

    fn roundtrip_be<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = encode_one::<BigEndian, _>(&value).unwrap();
        let back: T = decode_one::<BigEndian, _>(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn scalar_roundtrips() {
        roundtrip_le(0x1234_5678u32);
        roundtrip_le(-77i64);
        roundtrip_le(3.25f64);
        roundtrip_le(true);
        roundtrip_le('λ');
        roundtrip_be(0x1234_5678u32);
        roundtrip_be(-77i64);
        roundtrip_be(3.25f64);
    }

    #[test]
    fn scalar_byte_order() {
        let le = encode_one::<LittleEndian, _>(&0x0102_0304u32).unwrap();
        assert_eq!(le, [0x04, 0x03, 0x02, 0x01]);
        let be = encode_one::<BigEndian, _>(&0x0102_0304u32).unwrap();
        assert_eq!(be, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn string_layout() {
        let bytes = encode_one::<LittleEndian, _>(&"abc".to_string()).unwrap();
        assert_eq!(bytes, [0x03, b'a', b'b', b'c']);
        roundtrip_le(String::new());
        roundtrip_le("κόσμος".to_string());
    }

    #[test]
    fn container_roundtrips() {
        roundtrip_le(vec![1u16, 2, 3]);
        roundtrip_le(Vec::<u64>::new());
        roundtrip_le([9u8, 8, 7]);
        roundtrip_le(vec!["a".to_string(), "b".to_string()]);

        let mut map = HashMap::new();
        map.insert("one".to_string(), 1u32);
        map.insert("two".to_string(), 2u32);
        roundtrip_le(map);

        let mut ordered = BTreeMap::new();
        ordered.insert(3u8, vec![1u8]);
        ordered.insert(4u8, vec![]);
        roundtrip_le(ordered);
    }

    #[test]
    fn fixed_size_containers_omit_the_prefix() {
        let arr = encode_one::<LittleEndian, _>(&[1u8, 2, 3]).unwrap();
        assert_eq!(arr, [1, 2, 3]);
        let vec = encode_one::<LittleEndian, _>(&vec![1u8, 2, 3]).unwrap();
        assert_eq!(vec, [3, 1, 2, 3]);
    }

    #[test]
    fn option_and_box() {
        roundtrip_le(Some(41u32));
        roundtrip_le(None::<u32>);
        roundtrip_le(Box::new("boxed".to_string()));
        roundtrip_le(Some(Box::new(7u8)));
    }

    #[test]
    fn tuples() {
        roundtrip_le((1u8,));
        roundtrip_le((1u8, "two".to_string(), 3.0f64));
        // A pair encodes as its elements in order, nothing more.
        let bytes = encode_one::<LittleEndian, _>(&(0x01u8, 0x02u8)).unwrap();
        assert_eq!(bytes, [0x01, 0x02]);
    }

    #[test]
    fn sizing_matches_encoding() {
        let value = (7u32, "seven".to_string(), vec![1u8, 2, 3]);
        let bytes = encode_one::<LittleEndian, _>(&value).unwrap();
        assert_eq!(
            encoded_size::<LittleEndian, _>(&value).unwrap(),
            bytes.len()
        );
    }

    #[test]
    fn truncated_input_reports_eof() {
        let bytes = encode_one::<LittleEndian, _>(&0x01020304u32).unwrap();
        let err = decode_one::<LittleEndian, u32>(&bytes[..2]).unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::Eof);
    }

    #[test]
    fn hostile_length_prefix_does_not_allocate() {
        // Length claims 2^40 elements but carries none.
        let mut bytes = Vec::new();
        milan_wire::varint::encode_to_vec(1u64 << 40, &mut bytes);
        let err = decode_one::<LittleEndian, Vec<u64>>(&bytes).unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::Eof);
    }
}
