use crate::error::{Error, Result};
use crate::index::{IndexKind, OrderedIndex};
use crate::record::Payload;
use json::{object, JsonValue};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// A named collection: one index backend behind the uniform contract.
///
/// The collection forwards every operation verbatim; it performs no
/// validation of its own and never looks inside the backend.
pub struct Collection {
    kind: IndexKind,
    index: Box<dyn OrderedIndex>,
}

impl Collection {
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            index: kind.new_index(),
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn insert(&mut self, key: String, value: Payload) -> Result<()> {
        self.index.insert(key, value)
    }

    pub fn get(&self, key: &str) -> Result<&Payload> {
        self.index.get(key)
    }

    pub fn get_range(&self, min: &str, max: &str) -> Vec<String> {
        self.index.get_range(min, max)
    }

    pub fn update(&mut self, key: &str, value: Payload) -> Result<()> {
        self.index.update(key, value)
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        self.index.remove(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.index.snapshot()
    }

    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        self.index.restore(bytes)
    }

    /// Snapshot wrapped with the backend tag, so the right backend can be
    /// rebuilt on load.
    pub fn to_json(&self) -> Result<JsonValue> {
        let bytes = self.index.snapshot();
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| Error::corrupt("index snapshot is not utf-8"))?;
        let doc = json::parse(text).map_err(|err| Error::corrupt(&err.to_string()))?;
        Ok(object! {
            "kind" => self.kind.tag(),
            "snapshot" => doc,
        })
    }

    pub fn from_json(doc: &JsonValue) -> Result<Self> {
        let tag = match doc["kind"].as_str() {
            Some(tag) => tag,
            None => return Err(Error::corrupt("collection kind must be a string")),
        };
        let mut collection = Self::new(IndexKind::from_tag(tag));
        collection
            .index
            .restore(doc["snapshot"].dump().as_bytes())?;
        Ok(collection)
    }
}

/// A schema: a flat set of named collections.
pub struct Schema {
    collections: HashMap<String, Collection>,
}

impl Schema {
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
        }
    }

    /// Creates a collection with the backend selected by `kind`.
    pub fn add_collection(&mut self, name: &str, kind: IndexKind) -> Result<()> {
        if self.collections.contains_key(name) {
            return Err(Error::DuplicateKey);
        }
        debug!(collection = name, kind = kind.tag(), "collection created");
        self.collections
            .insert(name.to_string(), Collection::new(kind));
        Ok(())
    }

    pub fn remove_collection(&mut self, name: &str) -> Result<()> {
        match self.collections.remove(name) {
            Some(_) => {
                debug!(collection = name, "collection dropped");
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.collections.get(name).ok_or(Error::NotFound)
    }

    pub fn collection_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.collections.get_mut(name).ok_or(Error::NotFound)
    }

    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.keys().map(String::as_str).collect()
    }

    pub fn to_json(&self) -> Result<JsonValue> {
        let mut collections = JsonValue::new_object();
        for (name, collection) in &self.collections {
            collections[name.as_str()] = collection.to_json()?;
        }
        Ok(object! { "collections" => collections })
    }

    pub fn from_json(doc: &JsonValue) -> Result<Self> {
        if !doc["collections"].is_object() {
            return Err(Error::corrupt("schema collections must be an object"));
        }
        let mut schema = Self::new();
        for (name, entry) in doc["collections"].entries() {
            schema
                .collections
                .insert(name.to_string(), Collection::from_json(entry)?);
        }
        Ok(schema)
    }
}

/// A pool: a flat set of named schemas.
pub struct Pool {
    schemas: HashMap<String, Schema>,
}

impl Pool {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    pub fn add_schema(&mut self, name: &str) -> Result<()> {
        if self.schemas.contains_key(name) {
            return Err(Error::DuplicateKey);
        }
        debug!(schema = name, "schema created");
        self.schemas.insert(name.to_string(), Schema::new());
        Ok(())
    }

    /// Drops a schema along with every collection beneath it.
    pub fn remove_schema(&mut self, name: &str) -> Result<()> {
        match self.schemas.remove(name) {
            Some(_) => {
                debug!(schema = name, "schema dropped");
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    pub fn schema(&self, name: &str) -> Result<&Schema> {
        self.schemas.get(name).ok_or(Error::NotFound)
    }

    pub fn schema_mut(&mut self, name: &str) -> Result<&mut Schema> {
        self.schemas.get_mut(name).ok_or(Error::NotFound)
    }

    pub fn schema_names(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn to_json(&self) -> Result<JsonValue> {
        let mut schemas = JsonValue::new_object();
        for (name, schema) in &self.schemas {
            schemas[name.as_str()] = schema.to_json()?;
        }
        Ok(object! { "schemas" => schemas })
    }

    pub fn from_json(doc: &JsonValue) -> Result<Self> {
        if !doc["schemas"].is_object() {
            return Err(Error::corrupt("pool schemas must be an object"));
        }
        let mut pool = Self::new();
        for (name, entry) in doc["schemas"].entries() {
            pool.schemas
                .insert(name.to_string(), Schema::from_json(entry)?);
        }
        Ok(pool)
    }
}

/// Root of the namespace: named pools of schemas of collections.
///
/// The manager stores index instances opaquely; every data operation is
/// routed through the collection's uniform contract and persistence works
/// by recursively invoking each index's snapshot.
pub struct PoolManager {
    pools: HashMap<String, Pool>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
        }
    }

    pub fn add_pool(&mut self, name: &str) -> Result<()> {
        if self.pools.contains_key(name) {
            return Err(Error::DuplicateKey);
        }
        info!(pool = name, "pool created");
        self.pools.insert(name.to_string(), Pool::new());
        Ok(())
    }

    /// Drops a pool along with every schema and collection beneath it.
    pub fn remove_pool(&mut self, name: &str) -> Result<()> {
        match self.pools.remove(name) {
            Some(_) => {
                info!(pool = name, "pool dropped");
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    pub fn pool(&self, name: &str) -> Result<&Pool> {
        self.pools.get(name).ok_or(Error::NotFound)
    }

    pub fn pool_mut(&mut self, name: &str) -> Result<&mut Pool> {
        self.pools.get_mut(name).ok_or(Error::NotFound)
    }

    pub fn pool_names(&self) -> Vec<&str> {
        self.pools.keys().map(String::as_str).collect()
    }

    /// Convenience path lookup used by the command dispatcher.
    pub fn collection_mut(
        &mut self,
        pool: &str,
        schema: &str,
        name: &str,
    ) -> Result<&mut Collection> {
        self.pool_mut(pool)?.schema_mut(schema)?.collection_mut(name)
    }

    pub fn collection(&self, pool: &str, schema: &str, name: &str) -> Result<&Collection> {
        self.pool(pool)?.schema(schema)?.collection(name)
    }

    pub fn to_json(&self) -> Result<JsonValue> {
        let mut pools = JsonValue::new_object();
        for (name, pool) in &self.pools {
            pools[name.as_str()] = pool.to_json()?;
        }
        Ok(object! { "pools" => pools })
    }

    pub fn from_json(doc: &JsonValue) -> Result<Self> {
        if !doc["pools"].is_object() {
            return Err(Error::corrupt("namespace pools must be an object"));
        }
        let mut manager = Self::new();
        for (name, entry) in doc["pools"].entries() {
            manager
                .pools
                .insert(name.to_string(), Pool::from_json(entry)?);
        }
        Ok(manager)
    }

    /// Writes the whole namespace tree, snapshots included, to one file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let doc = self.to_json()?;
        fs::write(path.as_ref(), doc.dump())?;
        info!(path = %path.as_ref().display(), "namespace saved");
        Ok(())
    }

    /// Loads a namespace tree previously written by [`Self::save_to_file`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let doc = json::parse(&text).map_err(|err| Error::corrupt(&err.to_string()))?;
        let manager = Self::from_json(&doc)?;
        info!(path = %path.as_ref().display(), "namespace loaded");
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::{Collection, PoolManager};
    use crate::error::Error;
    use crate::index::IndexKind;
    use crate::record::Payload;

    fn populated_manager() -> PoolManager {
        let mut pools = PoolManager::new();
        pools.add_pool("main").unwrap();
        let pool = pools.pool_mut("main").unwrap();
        pool.add_schema("docs").unwrap();
        let schema = pool.schema_mut("docs").unwrap();
        schema.add_collection("by-avl", IndexKind::Avl).unwrap();
        schema.add_collection("by-rb", IndexKind::RedBlack).unwrap();
        schema.add_collection("by-btree", IndexKind::BTree).unwrap();
        schema.add_collection("by-map", IndexKind::Map).unwrap();
        for name in ["by-avl", "by-rb", "by-btree", "by-map"] {
            let collection = schema.collection_mut(name).unwrap();
            for key in ["ada", "grace", "edsger", "barbara"] {
                collection.insert(key.to_string(), Payload::from(key)).unwrap();
            }
        }
        pools
    }

    #[test]
    fn hierarchy_creation_and_lookup() {
        let mut pools = populated_manager();
        assert!(matches!(pools.add_pool("main"), Err(Error::DuplicateKey)));
        assert!(matches!(pools.pool("ghost"), Err(Error::NotFound)));

        let pool = pools.pool_mut("main").unwrap();
        assert!(matches!(pool.add_schema("docs"), Err(Error::DuplicateKey)));
        let schema = pool.schema_mut("docs").unwrap();
        assert!(matches!(
            schema.add_collection("by-avl", IndexKind::Map),
            Err(Error::DuplicateKey)
        ));

        let collection = pools.collection("main", "docs", "by-rb").unwrap();
        assert_eq!(collection.kind(), IndexKind::RedBlack);
        assert_eq!(collection.len(), 4);
        assert_eq!(collection.get("grace").unwrap().as_ref(), b"grace");
    }

    #[test]
    fn operations_forward_to_the_selected_backend() {
        let mut pools = populated_manager();
        let collection = pools.collection_mut("main", "docs", "by-avl").unwrap();
        collection.update("ada", Payload::from("countess")).unwrap();
        collection.remove("edsger").unwrap();
        assert!(matches!(collection.get("edsger"), Err(Error::NotFound)));
        assert_eq!(
            collection.get_range("a", "z"),
            vec!["ada", "barbara", "grace"]
        );
        assert_eq!(collection.get("ada").unwrap().as_ref(), b"countess");
    }

    #[test]
    fn removal_drops_everything_beneath() {
        let mut pools = populated_manager();
        pools
            .pool_mut("main")
            .unwrap()
            .remove_schema("docs")
            .unwrap();
        assert!(matches!(
            pools.collection("main", "docs", "by-avl"),
            Err(Error::NotFound)
        ));
        pools.remove_pool("main").unwrap();
        assert!(matches!(pools.pool("main"), Err(Error::NotFound)));
        assert!(matches!(pools.remove_pool("main"), Err(Error::NotFound)));
    }

    #[test]
    fn namespace_save_and_load_round_trip() {
        let pools = populated_manager();
        let mut path = std::env::temp_dir();
        path.push("_arborstor_namespace_round_trip.db");

        pools.save_to_file(&path).unwrap();
        let reloaded = PoolManager::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        for name in ["by-avl", "by-rb", "by-btree", "by-map"] {
            let original = pools.collection("main", "docs", name).unwrap();
            let restored = reloaded.collection("main", "docs", name).unwrap();
            assert_eq!(restored.kind(), original.kind());
            assert_eq!(restored.len(), original.len());
            for key in ["ada", "grace", "edsger", "barbara"] {
                assert_eq!(restored.get(key).unwrap(), original.get(key).unwrap());
            }
        }
    }

    #[test]
    fn collection_json_keeps_the_backend_kind() {
        let mut collection = Collection::new(IndexKind::BTree);
        collection
            .insert(String::from("k"), Payload::from("v"))
            .unwrap();
        let doc = collection.to_json().unwrap();
        let twin = Collection::from_json(&doc).unwrap();
        assert_eq!(twin.kind(), IndexKind::BTree);
        assert_eq!(twin.get("k").unwrap().as_ref(), b"v");

        assert!(Collection::from_json(&json::parse("{}").unwrap()).is_err());
    }
}
