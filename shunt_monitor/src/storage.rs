//! Persistent key-value storage contract and a RAM-backed implementation.
//!
//! Values are scalar and live under a namespace, like NVS on the ESP32 or a flash page
//! store. A missing entry is the normal "not configured" outcome. Read failures of a
//! backend are reported as missing entries, write failures as [StoreError].

use core::fmt::Write;

use heapless::index_map::FnvIndexMap;
use heapless::String;
use no_std_compat::cell::{Cell, RefCell};

use crate::error::StoreError;

/// Longest key or namespace accepted by the store
pub const KEY_LEN: usize = 15;
pub const MEMORY_STORE_CAPACITY: usize = 256;

pub type Key = String<KEY_LEN>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StoredValue {
    Float(f32),
    Uint(u32),
}

pub trait KeyValueStore {
    fn get(&self, namespace: &str, key: &str) -> Option<StoredValue>;
    fn put(&self, namespace: &str, key: &str, value: StoredValue) -> Result<(), StoreError>;
    /// Removing an entry which does not exist succeeds
    fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError>;

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.get(namespace, key).is_some()
    }

    /// Reads a float, treating a value of the wrong type or a non-finite value as missing
    fn get_f32(&self, namespace: &str, key: &str) -> Option<f32> {
        match self.get(namespace, key)? {
            StoredValue::Float(value) if value.is_finite() => Some(value),
            _ => None,
        }
    }

    fn get_u32(&self, namespace: &str, key: &str) -> Option<u32> {
        match self.get(namespace, key)? {
            StoredValue::Uint(value) => Some(value),
            _ => None,
        }
    }

    fn put_f32(&self, namespace: &str, key: &str, value: f32) -> Result<(), StoreError> {
        self.put(namespace, key, StoredValue::Float(value))
    }

    fn put_u32(&self, namespace: &str, key: &str, value: u32) -> Result<(), StoreError> {
        self.put(namespace, key, StoredValue::Uint(value))
    }
}

/// Key for a per-rating entry, e.g. `lg100`
pub fn rated_key(prefix: &str, amps: u16) -> Result<Key, StoreError> {
    let mut key = Key::new();
    write!(key, "{}{}", prefix, amps).map_err(|_| StoreError::KeyTooLong)?;
    Ok(key)
}

/// Key for one element of a per-rating sequence, e.g. `tr100_3`
pub fn indexed_key(prefix: &str, amps: u16, index: usize) -> Result<Key, StoreError> {
    let mut key = Key::new();
    write!(key, "{}{}_{}", prefix, amps, index).map_err(|_| StoreError::KeyTooLong)?;
    Ok(key)
}

fn entry_key(namespace: &str, key: &str) -> Result<(Key, Key), StoreError> {
    let namespace = Key::try_from(namespace).map_err(|_| StoreError::KeyTooLong)?;
    let key = Key::try_from(key).map_err(|_| StoreError::KeyTooLong)?;
    Ok((namespace, key))
}

/// Store which resides in memory, for simulation or testing. Survives everything except
/// dropping it, which makes it a stand-in for flash across simulated reboots.
pub struct MemoryStore {
    entries: RefCell<FnvIndexMap<(Key, Key), StoredValue, MEMORY_STORE_CAPACITY>>,
    available: Cell<bool>,
}

impl MemoryStore {
    pub fn create() -> Self {
        MemoryStore {
            entries: RefCell::new(FnvIndexMap::new()),
            available: Cell::new(true),
        }
    }

    /// An unavailable store behaves like a failed flash: reads find nothing, writes fail
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::create()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Option<StoredValue> {
        if !self.available.get() {
            return None;
        }
        let entry = entry_key(namespace, key).ok()?;
        self.entries.borrow().get(&entry).copied()
    }

    fn put(&self, namespace: &str, key: &str, value: StoredValue) -> Result<(), StoreError> {
        if !self.available.get() {
            return Err(StoreError::Unavailable);
        }
        let entry = entry_key(namespace, key)?;
        self.entries
            .borrow_mut()
            .insert(entry, value)
            .map(|_| ())
            .map_err(|_| StoreError::Full)
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        if !self.available.get() {
            return Err(StoreError::Unavailable);
        }
        let entry = entry_key(namespace, key)?;
        self.entries.borrow_mut().remove(&entry);
        Ok(())
    }
}
