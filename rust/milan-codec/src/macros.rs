//! Declarative macros that bind user types into the codec.
//!
//! [`serializable!`](crate::serializable) declares a struct whose
//! ordered field list drives hashing and serialization, optionally with
//! embedded base values that are visited first.
//! [`dynamic_class!`](crate::dynamic_class) additionally gives the
//! struct a portable class name, registers it at program start, and
//! switches its pointer encoding to the polymorphic class-reference
//! form. [`portable_enum!`](crate::portable_enum) declares a
//! wire-stable enum over an explicit integer repr.

/// Declare a serializable struct.
///
/// ```ignore
/// milan_codec::serializable! {
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Point {
///         pub x: i32,
///         pub y: f64,
///     }
/// }
/// ```
///
/// Bases are embedded values visited before the struct's own fields:
///
/// ```ignore
/// milan_codec::serializable! {
///     pub struct Circle extends (base: Point) {
///         pub radius: f64,
///     }
/// }
/// ```
#[macro_export]
macro_rules! serializable {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident extends ( $($bname:ident : $bty:ty),+ $(,)? ) {
            $( $(#[$fmeta:meta])* $fvis:vis $fname:ident : $fty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( pub $bname: $bty, )+
            $( $(#[$fmeta])* $fvis $fname: $fty, )*
        }

        $crate::serializable!(@typehash $name,
            [ $( $bty ),+ ], [ $( $fty ),* ]);
        $crate::serializable!(@codec $name,
            [ $( $bname ),+ ], [ $( $fname ),* ]);
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $fname:ident : $fty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $fname: $fty, )*
        }

        $crate::serializable!(@typehash $name, [ ], [ $( $fty ),* ]);
        $crate::serializable!(@codec $name, [ ], [ $( $fname ),* ]);
    };

    (@typehash $name:ident, [ $($bty:ty),* ], [ $($fty:ty),* ]) => {
        impl $crate::hash::TypeHash for $name {
            fn accumulate(h: u32, seen: &mut $crate::hash::SeenTypes) -> u32 {
                use $crate::hash::{Family, fold};
                if let Some(ix) = seen.find::<Self>() {
                    return fold(h, Family::SeenBackreference, false, ix);
                }
                let nbases = 0usize $( + { let _ = stringify!($bty); 1 } )*;
                let nfields = 0usize $( + { let _ = stringify!($fty); 1 } )*;
                let mut h = fold(h, Family::Class, false, nbases + nfields);
                h = fold(h, Family::BaseClass, false, nbases);
                seen.push::<Self>();
                $( h = <$bty as $crate::hash::TypeHash>::accumulate(h, seen); )*
                h = fold(h, Family::Field, false, nfields);
                $( h = <$fty as $crate::hash::TypeHash>::accumulate(h, seen); )*
                seen.pop();
                fold(h, Family::CustomSerialization, false, 0)
            }
        }
    };

    (@codec $name:ident, [ $($bname:ident),* ], [ $($fname:ident),* ]) => {
        impl $crate::Encode for $name {
            fn encode<O: $crate::WireOrder>(
                &self,
                enc: &mut $crate::Encoder<'_, O>,
            ) -> $crate::Result<()> {
                $( $crate::Encode::encode(&self.$bname, enc)?; )*
                $( $crate::Encode::encode(&self.$fname, enc)?; )*
                Ok(())
            }
        }

        impl $crate::Decode for $name {
            fn decode<O: $crate::WireOrder>(
                dec: &mut $crate::Decoder<'_, O>,
            ) -> $crate::Result<Self> {
                Ok($name {
                    $( $bname: $crate::Decode::decode(dec)?, )*
                    $( $fname: $crate::Decode::decode(dec)?, )*
                })
            }
        }
    };
}

/// Declare a serializable struct with a portable class name, registered
/// at program start for polymorphic encode/decode.
///
/// The struct must be default-constructible; `Default` is derived
/// automatically, so do not list it again.
///
/// ```ignore
/// milan_codec::dynamic_class! {
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Sentiment {
///         pub score: i32,
///     }
///     name = "demo.Sentiment";
///     implements = ["demo.Signal"];
/// }
/// ```
#[macro_export]
macro_rules! dynamic_class {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $fname:ident : $fty:ty ),* $(,)?
        }
        name = $pname:literal;
        $( implements = [ $($iface:literal),* $(,)? ]; )?
    ) => {
        $(#[$meta])*
        #[derive(Default)]
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $fname: $fty, )*
        }

        $crate::serializable!(@typehash $name, [ ], [ $( $fty ),* ]);

        impl $crate::Encode for $name {
            fn encode<O: $crate::WireOrder>(
                &self,
                enc: &mut $crate::Encoder<'_, O>,
            ) -> $crate::Result<()> {
                $( $crate::Encode::encode(&self.$fname, enc)?; )*
                Ok(())
            }

            fn encode_pointee<O: $crate::WireOrder>(
                &self,
                enc: &mut $crate::Encoder<'_, O>,
            ) -> $crate::Result<()> {
                enc.encode_dynamic(self)
            }
        }

        impl $crate::Decode for $name {
            fn decode<O: $crate::WireOrder>(
                dec: &mut $crate::Decoder<'_, O>,
            ) -> $crate::Result<Self> {
                Ok($name {
                    $( $fname: $crate::Decode::decode(dec)?, )*
                })
            }

            fn decode_pointee<O: $crate::WireOrder>(
                dec: &mut $crate::Decoder<'_, O>,
            ) -> $crate::Result<Self> {
                let obj = dec.decode_dynamic(Some(
                    <Self as $crate::dynamic::DynamicClass>::CLASS_NAME,
                ))?;
                $crate::dynamic::Dynamic::into_any(obj)
                    .downcast::<Self>()
                    .map(|boxed| *boxed)
                    .map_err(|_| {
                        $crate::Error::data_mismatch(concat!(
                            "wire object is not a ",
                            $pname
                        ))
                    })
            }

            fn wire_class_name() -> Option<&'static str> {
                Some(<Self as $crate::dynamic::DynamicClass>::CLASS_NAME)
            }
        }

        impl $crate::dynamic::Dynamic for $name {
            fn portable_class_name(&self) -> &'static str {
                $pname
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            fn into_any(self: Box<Self>) -> Box<dyn ::std::any::Any> {
                self
            }
        }

        impl $crate::dynamic::DynamicClass for $name {
            const CLASS_NAME: &'static str = $pname;
            const BASE_INTERFACES: &'static [&'static str] = &[ $($( $iface ),*)? ];
        }

        const _: () = {
            #[$crate::export::ctor]
            fn register() {
                if let Err(e) = $crate::registry::register_class::<$name>() {
                    panic!(
                        "failed to register dynamic class {}: {}",
                        $pname, e
                    );
                }
            }
        };
    };
}

/// Declare a wire-stable enum over an explicit integer repr. The enum
/// must be `Copy`; derive `Clone, Copy` in the attribute list.
#[macro_export]
macro_rules! portable_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ty {
            $( $(#[$vmeta:meta])* $var:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr($repr)]
        $vis enum $name {
            $( $(#[$vmeta])* $var = $val, )+
        }

        impl $name {
            pub fn from_raw(raw: $repr) -> Option<Self> {
                match raw {
                    $( $val => Some($name::$var), )+
                    _ => None,
                }
            }

            pub fn as_raw(self) -> $repr {
                self as $repr
            }
        }

        impl $crate::hash::TypeHash for $name {
            fn accumulate(h: u32, _seen: &mut $crate::hash::SeenTypes) -> u32 {
                let signed = <$repr>::MIN != 0;
                $crate::hash::fold(
                    h,
                    $crate::hash::Family::Enum,
                    signed,
                    ::std::mem::size_of::<$repr>(),
                )
            }
        }

        impl $crate::Encode for $name {
            fn encode<O: $crate::WireOrder>(
                &self,
                enc: &mut $crate::Encoder<'_, O>,
            ) -> $crate::Result<()> {
                $crate::Encode::encode(&((*self) as $repr), enc)
            }
        }

        impl $crate::Decode for $name {
            fn decode<O: $crate::WireOrder>(
                dec: &mut $crate::Decoder<'_, O>,
            ) -> $crate::Result<Self> {
                let raw = <$repr as $crate::Decode>::decode(dec)?;
                $name::from_raw(raw).ok_or_else(|| {
                    $crate::Error::data_mismatch(format!(
                        concat!("unknown ", stringify!($name), " discriminant {}"),
                        raw
                    ))
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::hash::type_hash_of;
    use crate::{
        LittleEndian, Shared, SharedWeak, decode_one, dynamic::Dynamic, encode_one, registry,
    };
    use std::sync::Arc;

    crate::serializable! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Sample {
            pub x: i32,
            pub y: f64,
            pub z: Vec<String>,
        }
    }

    crate::serializable! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct SampleSwapped {
            pub y: f64,
            pub x: i32,
            pub z: Vec<String>,
        }
    }

    crate::serializable! {
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct Base {
            pub id: u32,
        }
    }

    crate::serializable! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Derived extends (base: Base) {
            pub label: String,
        }
    }

    crate::dynamic_class! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Sentiment {
            pub score: i32,
            pub tags: Vec<String>,
        }
        name = "test.Sentiment";
        implements = ["test.Signal"];
    }

    crate::dynamic_class! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Heartbeat {
            pub beats: u64,
        }
        name = "test.Heartbeat";
    }

    crate::portable_enum! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Mood : u8 {
            Calm = 0,
            Stormy = 1,
        }
    }

    fn sample() -> Sample {
        Sample {
            x: 4,
            y: 5.5,
            z: vec!["first".into(), "second".into(), "third".into()],
        }
    }

    #[test]
    fn struct_roundtrip() {
        let value = sample();
        let bytes = encode_one::<LittleEndian, _>(&value).unwrap();
        let back: Sample = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn struct_bytes_match_structural_tuple() {
        // Serialization visits fields in declaration order, so the
        // struct's bytes decode as the structural tuple and vice versa.
        let value = sample();
        let bytes = encode_one::<LittleEndian, _>(&value).unwrap();
        let tuple: (i32, f64, Vec<String>) = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert_eq!(tuple.0, 4);
        assert_eq!(tuple.1, 5.5);
        assert_eq!(tuple.2, value.z);

        let tuple_bytes = encode_one::<LittleEndian, _>(&tuple).unwrap();
        assert_eq!(tuple_bytes, bytes);
    }

    #[test]
    fn verified_tuple_roundtrip() {
        let value = (4i32, 5.5f64, vec!["first".to_string()]);
        let mut bytes = Vec::new();
        let mut enc = crate::Encoder::<LittleEndian>::new(&mut bytes);
        enc.encode_verified(&value).unwrap();

        let mut dec = crate::Decoder::<LittleEndian>::new(&bytes);
        let back: (i32, f64, Vec<String>) = dec.decode_verified().unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn verified_read_rejects_wrong_type() {
        let mut bytes = Vec::new();
        let mut enc = crate::Encoder::<LittleEndian>::new(&mut bytes);
        enc.encode_verified(&42u32).unwrap();

        let mut dec = crate::Decoder::<LittleEndian>::new(&bytes);
        let err = dec.decode_verified::<i32>().unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::DataMismatch);
    }

    #[test]
    fn field_names_do_not_affect_the_hash_but_order_of_types_does() {
        // Same field types in the same order hash identically even with
        // different names; a different type order hashes differently.
        assert_ne!(type_hash_of::<Sample>(), type_hash_of::<SampleSwapped>());

        crate::serializable! {
            pub struct SampleRenamed {
                pub a: i32,
                pub b: f64,
                pub c: Vec<String>,
            }
        }
        assert_eq!(type_hash_of::<Sample>(), type_hash_of::<SampleRenamed>());
    }

    #[test]
    fn class_hash_differs_from_structural_tuple() {
        assert_ne!(
            type_hash_of::<Sample>(),
            type_hash_of::<(i32, f64, Vec<String>)>()
        );
    }

    #[test]
    fn base_values_are_visited_first() {
        let value = Derived {
            base: Base { id: 9 },
            label: "nine".into(),
        };
        let bytes = encode_one::<LittleEndian, _>(&value).unwrap();
        // u32 id first, then the label.
        assert_eq!(&bytes[..4], &[9, 0, 0, 0]);
        let back: Derived = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert_eq!(back, value);
        // The base list is hashed separately from the field list.
        assert_ne!(type_hash_of::<Derived>(), type_hash_of::<(u32, String)>());
    }

    #[test]
    fn dynamic_class_is_registered_at_startup() {
        let entry = registry::global().get("test.Sentiment").unwrap();
        assert_eq!(entry.type_hash, type_hash_of::<Sentiment>());
        assert!(registry::global().is_subclass("test.Signal", "test.Sentiment"));
        assert!(registry::global().is_subclass("test.Sentiment", "test.Sentiment"));
        assert!(!registry::global().is_subclass("test.Signal", "test.Heartbeat"));
    }

    #[test]
    fn dynamic_value_roundtrip() {
        let value: Arc<dyn Dynamic> = Arc::new(Sentiment {
            score: -3,
            tags: vec!["gloomy".into()],
        });
        let bytes = encode_one::<LittleEndian, _>(&value).unwrap();
        let back: Arc<dyn Dynamic> = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert_eq!(back.portable_class_name(), "test.Sentiment");
        let concrete = back.as_any().downcast_ref::<Sentiment>().unwrap();
        assert_eq!(concrete.score, -3);
        assert_eq!(concrete.tags, vec!["gloomy".to_string()]);
    }

    #[test]
    fn repeated_class_writes_the_name_once() {
        let a: Arc<dyn Dynamic> = Arc::new(Heartbeat { beats: 1 });
        let b: Arc<dyn Dynamic> = Arc::new(Heartbeat { beats: 2 });
        let once = encode_one::<LittleEndian, _>(&vec![a.clone()]).unwrap();
        let twice = encode_one::<LittleEndian, _>(&vec![a, b]).unwrap();
        // Second occurrence costs the class id and payload only, far
        // less than a repeated name + hash.
        assert!(twice.len() < 2 * once.len());
    }

    #[test]
    fn unknown_class_fails_not_found() {
        // A class id introducing the name of a class nobody registered.
        let mut bytes = Vec::new();
        let mut enc = crate::Encoder::<LittleEndian>::new(&mut bytes);
        enc.put_varint(0);
        enc.encode("test.Nobody").unwrap();
        enc.put_u32(0xdead_beef);
        let err = decode_one::<LittleEndian, Arc<dyn Dynamic>>(&bytes).unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::NotFound);
    }

    #[test]
    fn wrong_dynamic_hash_is_a_mismatch() {
        let mut bytes = Vec::new();
        let mut enc = crate::Encoder::<LittleEndian>::new(&mut bytes);
        enc.put_varint(0);
        enc.encode("test.Heartbeat").unwrap();
        enc.put_u32(type_hash_of::<Heartbeat>() ^ 1);
        let err = decode_one::<LittleEndian, Arc<dyn Dynamic>>(&bytes).unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::DataMismatch);
    }

    #[test]
    fn shared_dynamic_respects_the_subclass_set() {
        // A Heartbeat on the wire cannot decode into a Shared<Sentiment>.
        let value = Shared::new(Heartbeat { beats: 3 });
        let bytes = encode_one::<LittleEndian, _>(&value).unwrap();
        let err = decode_one::<LittleEndian, Shared<Sentiment>>(&bytes).unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::DataMismatch);
    }

    #[test]
    fn shared_self_cycle_roundtrips() {
        crate::serializable! {
            #[derive(Debug, Default)]
            pub struct Knot {
                pub name: String,
                pub this: Shared<Knot>,
            }
        }

        let knot = Shared::new(Knot {
            name: "tied".into(),
            this: Shared::null(),
        });
        if let Some(mut inner) = knot.write() {
            inner.this = knot.clone();
        }

        let bytes = encode_one::<LittleEndian, _>(&knot).unwrap();
        let back: Shared<Knot> = decode_one::<LittleEndian, _>(&bytes).unwrap();
        let guard = back.read().unwrap();
        assert_eq!(guard.name, "tied");
        assert!(guard.this.ptr_eq(&back));
    }

    #[test]
    fn shared_aliasing_is_preserved() {
        let one = Shared::new(41u32);
        let pair = (one.clone(), one.clone());
        let bytes = encode_one::<LittleEndian, _>(&pair).unwrap();
        let back: (Shared<u32>, Shared<u32>) = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert!(back.0.ptr_eq(&back.1));
        assert_eq!(*back.0.read().unwrap(), 41);

        // Distinct sources stay distinct.
        let distinct = (Shared::new(1u32), Shared::new(1u32));
        let bytes = encode_one::<LittleEndian, _>(&distinct).unwrap();
        let back: (Shared<u32>, Shared<u32>) = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert!(!back.0.ptr_eq(&back.1));
    }

    #[test]
    fn shared_null_roundtrips() {
        let bytes = encode_one::<LittleEndian, _>(&Shared::<u32>::null()).unwrap();
        assert_eq!(bytes, [0x00]);
        let back: Shared<u32> = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert!(back.is_null());
    }

    #[test]
    fn incompatible_shared_reuse_is_a_mismatch() {
        // Both types have the same wire layout, so only the identity
        // table can catch the aliasing violation.
        let one = Shared::new(7u32);
        let pair = (one.clone(), one);
        let bytes = encode_one::<LittleEndian, _>(&pair).unwrap();
        let err = decode_one::<LittleEndian, (Shared<u32>, Shared<i32>)>(&bytes).unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::DataMismatch);
    }

    #[test]
    fn weak_pointers_serialize_through_upgrade() {
        let strong = Shared::new("alive".to_string());
        let weak = strong.downgrade();
        let bytes = encode_one::<LittleEndian, _>(&(strong, weak)).unwrap();
        let back: (Shared<String>, SharedWeak<String>) =
            decode_one::<LittleEndian, _>(&bytes).unwrap();
        let upgraded = back.1.upgrade();
        assert!(upgraded.ptr_eq(&back.0));

        // A dangling weak encodes as null.
        let dangling = Shared::new(1u8).downgrade();
        let bytes = encode_one::<LittleEndian, _>(&dangling).unwrap();
        assert_eq!(bytes, [0x00]);
    }

    #[test]
    fn enum_roundtrip_and_unknown_discriminant() {
        let bytes = encode_one::<LittleEndian, _>(&Mood::Stormy).unwrap();
        assert_eq!(bytes, [0x01]);
        let back: Mood = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert_eq!(back, Mood::Stormy);

        let err = decode_one::<LittleEndian, Mood>(&[0x07]).unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::DataMismatch);
    }

    #[test]
    fn duplicate_registration_fails() {
        let err = registry::register_class::<Sentiment>().unwrap_err();
        assert_eq!(err.kind(), milan_wire::ErrorKind::InvalidState);
    }
}
