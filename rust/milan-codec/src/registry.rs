//! Process-wide dynamic class registry.
//!
//! One table maps each portable class name to its factory, type hash
//! and per-dialect codec functions; a second set of tables tracks which
//! classes may decode under which interface, so a wire class can be
//! rejected when it lands in an incompatible pointer target.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use milan_hash::{TypeHash, type_hash_of};
use milan_wire::{Error, Result};
use parking_lot::RwLock;

use crate::decode::Decoder;
use crate::dynamic::{Dynamic, DynamicClass};
use crate::encode::Encoder;
use crate::{BigEndian, Decode, Encode, LittleEndian};

/// Everything the codecs need to handle one dynamic class.
pub struct ClassEntry {
    pub name: &'static str,
    pub type_hash: u32,
    pub factory: fn() -> Box<dyn Dynamic>,
    pub encode_le: fn(&mut Encoder<'_, LittleEndian>, &dyn Dynamic) -> Result<()>,
    pub encode_be: fn(&mut Encoder<'_, BigEndian>, &dyn Dynamic) -> Result<()>,
    pub decode_le: fn(&mut Decoder<'_, LittleEndian>, &mut dyn Dynamic) -> Result<()>,
    pub decode_be: fn(&mut Decoder<'_, BigEndian>, &mut dyn Dynamic) -> Result<()>,
}

fn factory<T: DynamicClass>() -> Box<dyn Dynamic> {
    Box::new(T::default())
}

fn encode_erased<O: crate::WireOrder, T: DynamicClass>(
    enc: &mut Encoder<'_, O>,
    obj: &dyn Dynamic,
) -> Result<()> {
    let concrete = obj.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::invalid_state("dynamic object does not match its registered class")
    })?;
    Encode::encode(concrete, enc)
}

fn decode_erased<O: crate::WireOrder, T: DynamicClass>(
    dec: &mut Decoder<'_, O>,
    obj: &mut dyn Dynamic,
) -> Result<()> {
    let concrete = obj.as_any_mut().downcast_mut::<T>().ok_or_else(|| {
        Error::invalid_state("dynamic object does not match its registered class")
    })?;
    *concrete = <T as Decode>::decode(dec)?;
    Ok(())
}

#[derive(Default)]
pub struct Registry {
    classes: RwLock<HashMap<&'static str, Arc<ClassEntry>>>,
    subclasses: RwLock<HashMap<&'static str, HashSet<&'static str>>>,
}

impl Registry {
    /// Register `T` under its portable name, install codec entries for
    /// both dialects, and add the class to its own subclass set and to
    /// the set of every declared base interface.
    pub fn register<T: DynamicClass + TypeHash>(&self) -> Result<()> {
        let entry = Arc::new(ClassEntry {
            name: T::CLASS_NAME,
            type_hash: type_hash_of::<T>(),
            factory: factory::<T>,
            encode_le: encode_erased::<LittleEndian, T>,
            encode_be: encode_erased::<BigEndian, T>,
            decode_le: decode_erased::<LittleEndian, T>,
            decode_be: decode_erased::<BigEndian, T>,
        });

        {
            let mut classes = self.classes.write();
            if classes.contains_key(T::CLASS_NAME) {
                return Err(Error::invalid_state(format!(
                    "duplicate registration for dynamic class {}",
                    T::CLASS_NAME
                )));
            }
            classes.insert(T::CLASS_NAME, entry);
        }

        let mut subclasses = self.subclasses.write();
        subclasses
            .entry(T::CLASS_NAME)
            .or_default()
            .insert(T::CLASS_NAME);
        for &base in T::BASE_INTERFACES {
            subclasses.entry(base).or_default().insert(T::CLASS_NAME);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<ClassEntry>> {
        self.classes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("dynamic class {} not registered", name)))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    /// Whether `class` may decode under `base`.
    pub fn is_subclass(&self, base: &str, class: &str) -> bool {
        self.subclasses
            .read()
            .get(base)
            .is_some_and(|set| set.contains(class))
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry, initialized on first use.
pub fn global() -> &'static Registry {
    REGISTRY.get_or_init(Registry::default)
}

/// Register `T` in the global registry.
pub fn register_class<T: DynamicClass + TypeHash>() -> Result<()> {
    global().register::<T>()
}
