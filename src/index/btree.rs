use crate::error::{Error, Result};
use crate::index::OrderedIndex;
use crate::record::Payload;
use json::{object, JsonValue};
use std::borrow::Borrow;

/// A B-tree of key-value pairs with minimum degree `M`.
///
/// Every node holds between `M - 1` and `2M - 1` keys (the root is exempt
/// from the lower bound) with one value per key, and all leaves sit at the
/// same depth. Inserts split full nodes on the way down so the target leaf
/// always has room; deletes borrow from or merge with siblings on the way
/// down so no visited child is ever below the minimum.
pub struct BTreeImpl<K: Ord, V, const M: usize> {
    root: BNode<K, V>,
    length: usize,
}

struct BNode<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    children: Vec<BNode<K, V>>,
    leaf: bool,
}

impl<K, V> BNode<K, V> {
    fn new(leaf: bool) -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            leaf,
        }
    }
}

/// Implementations for fundamental tree algorithms.
impl<K: Ord, V, const M: usize> BTreeImpl<K, V, M> {
    const MAX_KEYS: usize = 2 * M - 1;
    const MIN_KEYS: usize = M - 1;

    /// Creates new instance.
    pub fn new() -> Self {
        Self {
            root: BNode::new(true),
            length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Self::find_in(&self.root, key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Self::find_in_mut(&mut self.root, key)
    }

    fn find_in<'a, Q>(mut node: &'a BNode<K, V>, key: &Q) -> Option<&'a V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        loop {
            let mut i = 0;
            while i < node.keys.len() && key > node.keys[i].borrow() {
                i += 1;
            }
            if i < node.keys.len() && key == node.keys[i].borrow() {
                return Some(&node.values[i]);
            }
            if node.leaf {
                return None;
            }
            node = &node.children[i];
        }
    }

    fn find_in_mut<'a, Q>(node: &'a mut BNode<K, V>, key: &Q) -> Option<&'a mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut i = 0;
        while i < node.keys.len() && key > node.keys[i].borrow() {
            i += 1;
        }
        if i < node.keys.len() && key == node.keys[i].borrow() {
            return Some(&mut node.values[i]);
        }
        if node.leaf {
            return None;
        }
        Self::find_in_mut(&mut node.children[i], key)
    }

    /// Inserts a key-value pair, failing with [`Error::DuplicateKey`] when
    /// the key is already present.
    ///
    /// Presence is checked before the descent, because the descent splits
    /// full nodes preemptively and a failing insert must not reshape the
    /// tree.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if Self::find_in(&self.root, key.borrow()).is_some() {
            return Err(Error::DuplicateKey);
        }
        if self.root.keys.len() == Self::MAX_KEYS {
            // split-before-descend: give the root room before walking down
            let old_root = std::mem::replace(&mut self.root, BNode::new(false));
            self.root.children.push(old_root);
            Self::split_child(&mut self.root, 0);
        }
        Self::insert_non_full(&mut self.root, key, value);
        self.length += 1;
        Ok(())
    }

    fn insert_non_full(node: &mut BNode<K, V>, key: K, value: V) {
        let mut i = node.keys.len();
        while i > 0 && key < node.keys[i - 1] {
            i -= 1;
        }
        if node.leaf {
            node.keys.insert(i, key);
            node.values.insert(i, value);
            return;
        }
        if node.children[i].keys.len() == Self::MAX_KEYS {
            // the separator promoted out of the split decides the side
            Self::split_child(node, i);
            if key > node.keys[i] {
                i += 1;
            }
        }
        Self::insert_non_full(&mut node.children[i], key, value)
    }

    /// Splits the full child at `i`, promoting its middle entry into `node`.
    fn split_child(node: &mut BNode<K, V>, i: usize) {
        let child = &mut node.children[i];
        let mid = child.keys.len() / 2;

        let mut right = BNode::new(child.leaf);
        right.keys = child.keys.split_off(mid + 1);
        right.values = child.values.split_off(mid + 1);
        if !child.leaf {
            right.children = child.children.split_off(mid + 1);
        }
        let up_key = child.keys.remove(mid);
        let up_value = child.values.remove(mid);

        node.keys.insert(i, up_key);
        node.values.insert(i, up_value);
        node.children.insert(i + 1, right);
    }

    /// Removes a key, failing with [`Error::NotFound`] when absent.
    ///
    /// Presence is checked first so that a miss cannot leave the descent's
    /// borrow/merge rebalancing behind.
    pub fn remove<Q>(&mut self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if Self::find_in(&self.root, key).is_none() {
            return Err(Error::NotFound);
        }
        Self::delete_from(&mut self.root, key);
        if self.root.keys.is_empty() && !self.root.leaf && self.root.children.len() == 1 {
            // root underflow: the tree shrinks by one level
            let child = self.root.children.remove(0);
            self.root = child;
        }
        self.length -= 1;
        Ok(())
    }

    fn delete_from<Q>(node: &mut BNode<K, V>, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut i = 0;
        while i < node.keys.len() && key > node.keys[i].borrow() {
            i += 1;
        }

        if i < node.keys.len() && key == node.keys[i].borrow() {
            if node.leaf {
                let removed_key = node.keys.remove(i);
                let removed_value = node.values.remove(i);
                return Some((removed_key, removed_value));
            }
            // found in an internal node: swap in the neighbouring entry
            // from whichever child subtree can spare a key
            if node.children[i].keys.len() >= M {
                let (pred_key, pred_value) = Self::take_max(&mut node.children[i]);
                let removed_key = std::mem::replace(&mut node.keys[i], pred_key);
                let removed_value = std::mem::replace(&mut node.values[i], pred_value);
                return Some((removed_key, removed_value));
            }
            if node.children[i + 1].keys.len() >= M {
                let (succ_key, succ_value) = Self::take_min(&mut node.children[i + 1]);
                let removed_key = std::mem::replace(&mut node.keys[i], succ_key);
                let removed_value = std::mem::replace(&mut node.values[i], succ_value);
                return Some((removed_key, removed_value));
            }
            // neither side can spare one: absorb the separator into a merge
            // and continue inside the merged child
            Self::merge_children(node, i);
            return Self::delete_from(&mut node.children[i], key);
        }

        if node.leaf {
            return None;
        }
        if node.children[i].keys.len() <= Self::MIN_KEYS {
            // rebalance before descending; separators may move, so rescan
            Self::fill(node, i);
            return Self::delete_from(node, key);
        }
        Self::delete_from(&mut node.children[i], key)
    }

    /// Removes and returns the largest entry of the subtree, keeping every
    /// visited child at or above the minimum on the way down.
    fn take_max(node: &mut BNode<K, V>) -> (K, V) {
        if node.leaf {
            match (node.keys.pop(), node.values.pop()) {
                (Some(key), Some(value)) => return (key, value),
                _ => unreachable!("leaf drained below the minimum"),
            }
        }
        let last = node.children.len() - 1;
        if node.children[last].keys.len() <= Self::MIN_KEYS {
            Self::fill(node, last);
        }
        let last = node.children.len() - 1;
        Self::take_max(&mut node.children[last])
    }

    /// Removes and returns the smallest entry of the subtree.
    fn take_min(node: &mut BNode<K, V>) -> (K, V) {
        if node.leaf {
            return (node.keys.remove(0), node.values.remove(0));
        }
        if node.children[0].keys.len() <= Self::MIN_KEYS {
            Self::fill(node, 0);
        }
        Self::take_min(&mut node.children[0])
    }

    /// Brings the child at `i` up to at least `M` keys by borrowing from a
    /// sibling with surplus, or merging when neither sibling can spare one.
    fn fill(node: &mut BNode<K, V>, i: usize) {
        if i > 0 && node.children[i - 1].keys.len() >= M {
            Self::borrow_from_prev(node, i);
        } else if i + 1 < node.children.len() && node.children[i + 1].keys.len() >= M {
            Self::borrow_from_next(node, i);
        } else if i + 1 < node.children.len() {
            Self::merge_children(node, i);
        } else {
            Self::merge_children(node, i - 1);
        }
    }

    /// Rotates one entry clockwise through the separator: the left
    /// sibling's last entry moves up, the separator moves down.
    fn borrow_from_prev(node: &mut BNode<K, V>, i: usize) {
        let sibling = &mut node.children[i - 1];
        let last = sibling.keys.len() - 1;
        let sib_key = sibling.keys.remove(last);
        let sib_value = sibling.values.remove(last);
        let moved_child = if sibling.leaf {
            None
        } else {
            sibling.children.pop()
        };

        let sep_key = std::mem::replace(&mut node.keys[i - 1], sib_key);
        let sep_value = std::mem::replace(&mut node.values[i - 1], sib_value);

        let child = &mut node.children[i];
        child.keys.insert(0, sep_key);
        child.values.insert(0, sep_value);
        if let Some(grand) = moved_child {
            child.children.insert(0, grand);
        }
    }

    /// Mirror image of [`Self::borrow_from_prev`].
    fn borrow_from_next(node: &mut BNode<K, V>, i: usize) {
        let sibling = &mut node.children[i + 1];
        let sib_key = sibling.keys.remove(0);
        let sib_value = sibling.values.remove(0);
        let moved_child = if sibling.leaf {
            None
        } else {
            Some(sibling.children.remove(0))
        };

        let sep_key = std::mem::replace(&mut node.keys[i], sib_key);
        let sep_value = std::mem::replace(&mut node.values[i], sib_value);

        let child = &mut node.children[i];
        child.keys.push(sep_key);
        child.values.push(sep_value);
        if let Some(grand) = moved_child {
            child.children.push(grand);
        }
    }

    /// Merges the child at `i`, the separator at `i` and the child at
    /// `i + 1` into one node.
    fn merge_children(node: &mut BNode<K, V>, i: usize) {
        let sep_key = node.keys.remove(i);
        let sep_value = node.values.remove(i);
        let mut right = node.children.remove(i + 1);

        let left = &mut node.children[i];
        left.keys.push(sep_key);
        left.values.push(sep_value);
        left.keys.append(&mut right.keys);
        left.values.append(&mut right.values);
        left.children.append(&mut right.children);
    }

    /// Collects all keys within `[min, max]` in ascending order, visiting
    /// only keys and children that can still satisfy the bounds.
    pub fn range<Q>(&self, min: &Q, max: &Q) -> Vec<K>
    where
        K: Borrow<Q> + Clone,
        Q: Ord + ?Sized,
    {
        let mut result = Vec::new();
        Self::range_walk(&self.root, min, max, &mut result);
        result
    }

    fn range_walk<Q>(node: &BNode<K, V>, min: &Q, max: &Q, out: &mut Vec<K>)
    where
        K: Borrow<Q> + Clone,
        Q: Ord + ?Sized,
    {
        let mut i = 0;
        while i < node.keys.len() && node.keys[i].borrow() < min {
            i += 1;
        }
        while i < node.keys.len() {
            if !node.leaf {
                Self::range_walk(&node.children[i], min, max, out);
            }
            let key = node.keys[i].borrow();
            if key >= min && key <= max {
                out.push(node.keys[i].clone());
            }
            if key > max {
                return;
            }
            i += 1;
        }
        if !node.leaf {
            Self::range_walk(&node.children[i], min, max, out);
        }
    }

    /// Verifies the occupancy, ordering and uniform-leaf-depth invariants,
    /// returning the total entry count.
    fn validate(&self) -> Result<usize> {
        let mut leaf_depth = None;
        let count = Self::validate_at(&self.root, None, None, 0, &mut leaf_depth, true)?;
        if count != self.length {
            return Err(Error::corrupt("entry count does not match structure"));
        }
        Ok(count)
    }

    fn validate_at<'a>(
        node: &'a BNode<K, V>,
        lower: Option<&'a K>,
        upper: Option<&'a K>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        is_root: bool,
    ) -> Result<usize> {
        if node.keys.len() != node.values.len() {
            return Err(Error::corrupt("keys and values out of step"));
        }
        if node.keys.len() > Self::MAX_KEYS {
            return Err(Error::corrupt("node over capacity"));
        }
        if !is_root && node.keys.len() < Self::MIN_KEYS {
            return Err(Error::corrupt("node under occupancy"));
        }
        for pair in node.keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(Error::corrupt("keys not strictly increasing"));
            }
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if first <= lo {
                return Err(Error::corrupt("key order violated"));
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if last >= hi {
                return Err(Error::corrupt("key order violated"));
            }
        }

        if node.leaf {
            if !node.children.is_empty() {
                return Err(Error::corrupt("leaf with children"));
            }
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected == depth => {}
                Some(_) => return Err(Error::corrupt("leaves at unequal depth")),
            }
            return Ok(node.keys.len());
        }

        if node.children.len() != node.keys.len() + 1 {
            return Err(Error::corrupt("child count does not match key count"));
        }
        let mut count = node.keys.len();
        for (i, child) in node.children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
            let child_upper = if i == node.keys.len() {
                upper
            } else {
                Some(&node.keys[i])
            };
            count += Self::validate_at(child, child_lower, child_upper, depth + 1, leaf_depth, false)?;
        }
        Ok(count)
    }
}

/// Structural snapshot support for the engine's key and value types.
impl<const M: usize> BTreeImpl<String, Payload, M> {
    pub fn to_json(&self) -> JsonValue {
        object! {
            "backend" => "btree",
            "order" => M,
            "root" => Self::node_to_json(&self.root),
        }
    }

    fn node_to_json(node: &BNode<String, Payload>) -> JsonValue {
        object! {
            "keys" => JsonValue::Array(node.keys.iter().map(|k| k.as_str().into()).collect()),
            "values" => JsonValue::Array(node.values.iter().map(Payload::to_json).collect()),
            "children" => JsonValue::Array(node.children.iter().map(Self::node_to_json).collect()),
            "leaf" => node.leaf,
        }
    }

    pub fn from_json(doc: &JsonValue) -> Result<Self> {
        if doc["backend"] != "btree" {
            return Err(Error::corrupt("not a btree snapshot"));
        }
        if doc["order"].as_usize() != Some(M) {
            return Err(Error::corrupt("snapshot order does not match this tree"));
        }
        let root = Self::node_from_json(&doc["root"])?;
        let mut tree = Self { root, length: 0 };
        let mut leaf_depth = None;
        tree.length = Self::validate_at(&tree.root, None, None, 0, &mut leaf_depth, true)?;
        Ok(tree)
    }

    fn node_from_json(doc: &JsonValue) -> Result<BNode<String, Payload>> {
        if !doc.is_object() {
            return Err(Error::corrupt("node must be an object"));
        }
        let leaf = match doc["leaf"].as_bool() {
            Some(flag) => flag,
            None => return Err(Error::corrupt("leaf flag must be a boolean")),
        };
        let mut node = BNode::new(leaf);
        for key in doc["keys"].members() {
            match key.as_str() {
                Some(text) => node.keys.push(text.to_string()),
                None => return Err(Error::corrupt("node key must be a string")),
            }
        }
        for value in doc["values"].members() {
            node.values.push(Payload::from_json(value)?);
        }
        for child in doc["children"].members() {
            node.children.push(Self::node_from_json(child)?);
        }
        Ok(node)
    }
}

/// Access points for the uniform contract.
impl<const M: usize> OrderedIndex for BTreeImpl<String, Payload, M> {
    fn insert(&mut self, key: String, value: Payload) -> Result<()> {
        BTreeImpl::insert(self, key, value)
    }

    fn get(&self, key: &str) -> Result<&Payload> {
        BTreeImpl::get(self, key).ok_or(Error::NotFound)
    }

    fn get_range(&self, min: &str, max: &str) -> Vec<String> {
        self.range(min, max)
    }

    fn update(&mut self, key: &str, value: Payload) -> Result<()> {
        match self.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        BTreeImpl::remove(self, key)
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
        self.length
    }
}
