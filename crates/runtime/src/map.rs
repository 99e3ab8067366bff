//! Ordered Hash Map
//!
//! The sole aggregate of the language, used as array, record, scope, and
//! class. A map pairs a hash table with a densely packed array of keys
//! in insertion order; iteration and printing follow that array, so a
//! literal's items keep their written order.
//!
//! Keys are addressed by a canonical raw-bit form computed by the state
//! (heap strings canonicalize to their interned id, `-0.0` to `+0.0`),
//! which lets the table be a plain `HashMap<u64, Value>` while
//! reproducing content-based string equality. The key array stores the
//! original key values for iteration.
//!
//! The `contiguous` flag is true while the nth inserted key is the
//! number n; once broken it stays false. Array-style printing keys off
//! it.

use nominal_core::Value;
use std::collections::HashMap;

/// The data of a map object.
pub struct MapData {
    entries: HashMap<u64, Value>,
    /// Keys in insertion order, as originally supplied.
    keys: Vec<Value>,
    class: Value,
    contiguous: bool,
}

impl MapData {
    pub fn new() -> MapData {
        MapData {
            entries: HashMap::new(),
            keys: Vec::new(),
            class: Value::NIL,
            contiguous: true,
        }
    }

    /// Insert a new entry. Returns false (without modifying the map) if
    /// the key already has a value.
    pub fn insert(&mut self, canonical: u64, key: Value, value: Value) -> bool {
        if self.entries.contains_key(&canonical) {
            return false;
        }
        self.entries.insert(canonical, value);
        self.push_key(key);
        true
    }

    /// Update an existing entry. Returns false if the key has no value.
    /// The key keeps its original position in the iteration order.
    pub fn update(&mut self, canonical: u64, value: Value) -> bool {
        match self.entries.get_mut(&canonical) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Insert or update. Returns true if a new entry was inserted, false
    /// if an existing one was changed.
    pub fn set(&mut self, canonical: u64, key: Value, value: Value) -> bool {
        if self.update(canonical, value) {
            false
        } else {
            self.entries.insert(canonical, value);
            self.push_key(key);
            true
        }
    }

    /// The value for a key, if present.
    pub fn find(&self, canonical: u64) -> Option<Value> {
        self.entries.get(&canonical).copied()
    }

    pub fn contains(&self, canonical: u64) -> bool {
        self.entries.contains_key(&canonical)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> &[Value] {
        &self.keys
    }

    /// Values in no particular order (iteration in key order goes
    /// through [`MapData::keys`] and a per-key lookup).
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn class(&self) -> Value {
        self.class
    }

    pub fn set_class(&mut self, class: Value) {
        self.class = class;
    }

    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    fn push_key(&mut self, key: Value) {
        if self.contiguous {
            // The map stays contiguous only while the new key equals its
            // own insertion index
            self.contiguous = key.is_number() && key.to_f64() == self.keys.len() as f64;
        }
        self.keys.push(key);
    }
}

impl Default for MapData {
    fn default() -> MapData {
        MapData::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number_key(n: f64) -> (u64, Value) {
        let value = Value::number(n);
        (value.raw(), value)
    }

    #[test]
    fn test_insert_and_find() {
        let mut map = MapData::new();
        let (canon, key) = number_key(0.0);
        assert!(map.insert(canon, key, Value::number(10.0)));
        assert_eq!(map.find(canon).unwrap().to_f64(), 10.0);
    }

    #[test]
    fn test_insert_fails_on_existing_key() {
        let mut map = MapData::new();
        let (canon, key) = number_key(0.0);
        assert!(map.insert(canon, key, Value::number(1.0)));
        assert!(!map.insert(canon, key, Value::number(2.0)));
        assert_eq!(map.find(canon).unwrap().to_f64(), 1.0);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_update_fails_on_missing_key() {
        let mut map = MapData::new();
        let (canon, _) = number_key(0.0);
        assert!(!map.update(canon, Value::number(1.0)));
    }

    #[test]
    fn test_update_does_not_reorder_keys() {
        // P3: iteration order is insertion order even across updates
        let mut map = MapData::new();
        for n in 0..3 {
            let (canon, key) = number_key(n as f64);
            map.insert(canon, key, Value::number(n as f64));
        }
        let (canon, _) = number_key(0.0);
        assert!(map.update(canon, Value::number(99.0)));

        let keys: Vec<f64> = map.keys().iter().map(|k| k.to_f64()).collect();
        assert_eq!(keys, vec![0.0, 1.0, 2.0]);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_set_inserts_then_updates() {
        let mut map = MapData::new();
        let (canon, key) = number_key(0.0);
        assert!(map.set(canon, key, Value::number(1.0)));
        assert!(!map.set(canon, key, Value::number(2.0)));
        assert_eq!(map.find(canon).unwrap().to_f64(), 2.0);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_contiguous_tracks_sequential_number_keys() {
        // P4: contiguous iff keys are 0, 1, …, n-1 in insertion order
        let mut map = MapData::new();
        assert!(map.is_contiguous());

        for n in 0..3 {
            let (canon, key) = number_key(n as f64);
            map.insert(canon, key, Value::NIL);
            assert!(map.is_contiguous());
        }

        let (canon, key) = number_key(7.0);
        map.insert(canon, key, Value::NIL);
        assert!(!map.is_contiguous());
    }

    #[test]
    fn test_contiguous_broken_by_non_number_key() {
        let mut map = MapData::new();
        let key = Value::interned(0);
        map.insert(key.raw(), key, Value::NIL);
        assert!(!map.is_contiguous());
    }

    #[test]
    fn test_contiguous_stays_broken() {
        // I4: once broken, contiguous never comes back
        let mut map = MapData::new();
        let key = Value::interned(0);
        map.insert(key.raw(), key, Value::NIL);
        let (canon, key) = number_key(1.0);
        map.insert(canon, key, Value::NIL);
        assert!(!map.is_contiguous());
    }

    #[test]
    fn test_class_reference() {
        let mut map = MapData::new();
        assert!(map.class().is_nil());
        map.set_class(Value::object(3));
        assert!(map.class().is_object());
        assert_eq!(map.class().payload(), 3);
    }
}
