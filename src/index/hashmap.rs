use crate::error::{Error, Result};
use crate::index::intern::InternPool;
use crate::index::OrderedIndex;
use crate::record::Payload;
use fasthash::xx::Hash64;
use fasthash::RandomState;
use json::{object, JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Unordered fallback backend over a hash map.
///
/// Point operations are O(1); a range scan is a linear filter over every
/// entry and makes no ordering promise. All keys and range bounds pass
/// through the shared interning pool, so equal keys across collections
/// resolve to one canonical instance.
pub struct HashIndex {
    data: HashMap<Arc<str>, Payload, RandomState<Hash64>>,
    pool: &'static InternPool,
}

impl HashIndex {
    /// Creates new instance bound to the process-wide interning pool.
    pub fn new() -> Self {
        Self {
            data: HashMap::with_hasher(RandomState::new()),
            pool: InternPool::global(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let mut entries = JsonValue::new_object();
        for (key, value) in &self.data {
            entries[key.as_ref()] = value.to_json();
        }
        object! {
            "backend" => "map",
            "entries" => entries,
        }
    }

    pub fn from_json(doc: &JsonValue) -> Result<Self> {
        if doc["backend"] != "map" {
            return Err(Error::corrupt("not a map snapshot"));
        }
        if !doc["entries"].is_object() {
            return Err(Error::corrupt("entries must be an object"));
        }
        let mut index = Self::new();
        for (key, value) in doc["entries"].entries() {
            let key = index.pool.intern(key);
            index.data.insert(key, Payload::from_json(value)?);
        }
        Ok(index)
    }
}

/// Access points for the uniform contract.
impl OrderedIndex for HashIndex {
    fn insert(&mut self, key: String, value: Payload) -> Result<()> {
        let key = self.pool.intern(&key);
        if self.data.contains_key(&key) {
            return Err(Error::DuplicateKey);
        }
        self.data.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<&Payload> {
        let key = self.pool.intern(key);
        self.data.get(&key).ok_or(Error::NotFound)
    }

    fn get_range(&self, min: &str, max: &str) -> Vec<String> {
        let min = self.pool.intern(min);
        let max = self.pool.intern(max);
        let mut result = Vec::new();
        for key in self.data.keys() {
            if key.as_ref() >= min.as_ref() && key.as_ref() <= max.as_ref() {
                result.push(key.as_ref().to_string());
            }
        }
        result
    }

    fn update(&mut self, key: &str, value: Payload) -> Result<()> {
        let key = self.pool.intern(key);
        match self.data.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let key = self.pool.intern(key);
        match self.data.remove(&key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound),
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        self.to_json().dump().into_bytes()
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        let text =
            std::str::from_utf8(bytes).map_err(|_| Error::corrupt("snapshot is not utf-8"))?;
        let doc = json::parse(text).map_err(|err| Error::corrupt(&err.to_string()))?;
        *self = Self::from_json(&doc)?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
