mod avl;
mod btree;
mod hashmap;
mod intern;
mod rbtree;

pub use avl::AvlTree;
pub use btree::BTreeImpl;
pub use hashmap::HashIndex;
pub use intern::InternPool;
pub use rbtree::RBTree;

use crate::error::Result;
use crate::record::Payload;

/// Minimum degree used for B-tree collections built through [`IndexKind`].
pub const BTREE_ORDER: usize = 2;

/// The uniform contract every index backend satisfies.
///
/// Keys are strings under lexicographic order; values are opaque
/// [`Payload`]s. A failing mutation leaves the structure observably
/// unchanged, and every successful mutation restores the backend's
/// structural invariants before returning. Instances are single-owner:
/// callers serialize access themselves.
pub trait OrderedIndex {
    /// Adds an entry, failing with `DuplicateKey` when the key exists.
    fn insert(&mut self, key: String, value: Payload) -> Result<()>;

    /// Exact lookup, failing with `NotFound` for absent keys.
    fn get(&self, key: &str) -> Result<&Payload>;

    /// All keys with `min <= key <= max`, both bounds inclusive. Ordered
    /// backends return them sorted ascending; the map backend does not.
    /// An inverted bound pair simply yields no keys.
    fn get_range(&self, min: &str, max: &str) -> Vec<String>;

    /// Replaces the value of an existing entry without touching structure.
    fn update(&mut self, key: &str, value: Payload) -> Result<()>;

    /// Deletes an entry, failing with `NotFound` for absent keys.
    fn remove(&mut self, key: &str) -> Result<()>;

    /// Serializes the whole structure into a self-contained byte sequence.
    /// The format is backend-specific; only the same backend kind can load
    /// it back.
    fn snapshot(&self) -> Vec<u8>;

    /// Replaces the contents from a snapshot produced by [`Self::snapshot`],
    /// failing with `CorruptSnapshot` (and preserving the old contents) when
    /// the data is malformed.
    fn restore(&mut self, bytes: &[u8]) -> Result<()>;

    /// Number of entries currently held.
    fn len(&self) -> usize;
}

/// Backend selector, parsed from the collection-creation type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Avl,
    RedBlack,
    BTree,
    Map,
}

impl IndexKind {
    /// Parses a type tag; anything unrecognized falls back to the map.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "avl" => IndexKind::Avl,
            "redblack" => IndexKind::RedBlack,
            "btree" => IndexKind::BTree,
            _ => IndexKind::Map,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            IndexKind::Avl => "avl",
            IndexKind::RedBlack => "redblack",
            IndexKind::BTree => "btree",
            IndexKind::Map => "map",
        }
    }

    /// Constructs an empty backend of this kind behind the uniform contract.
    pub fn new_index(&self) -> Box<dyn OrderedIndex> {
        match self {
            IndexKind::Avl => Box::new(AvlTree::<String, Payload>::new()),
            IndexKind::RedBlack => Box::new(RBTree::<String, Payload>::new()),
            IndexKind::BTree => Box::new(BTreeImpl::<String, Payload, BTREE_ORDER>::new()),
            IndexKind::Map => Box::new(HashIndex::new()),
        }
    }
}
