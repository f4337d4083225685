use crate::error::{Error, Result};
use crate::index::OrderedIndex;
use crate::record::Payload;
use json::{object, JsonValue};
use std::borrow::Borrow;
use std::cmp::Ordering;

/// An AVL tree of key-value pairs.
///
/// Every node carries its own height and the tree keeps the balance factor
/// (left height minus right height) within `{-1, 0, 1}` by rotating on the
/// unwind path of each insert and delete. Children are owned exclusively by
/// their parent link, so no parent references are needed.
pub struct AvlTree<K: Ord, V> {
    root: Link<K, V>,
    length: usize,
}

type Link<K, V> = Option<Box<Node<K, V>>>;

struct Node<K: Ord, V> {
    key: K,
    value: V,
    height: i32,
    left: Link<K, V>,
    right: Link<K, V>,
}

fn height<K: Ord, V>(link: &Link<K, V>) -> i32 {
    match link {
        None => 0,
        Some(node) => node.height,
    }
}

impl<K: Ord, V> Node<K, V> {
    fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            height: 1,
            left: None,
            right: None,
        }
    }

    fn update_height(&mut self) {
        self.height = 1 + i32::max(height(&self.left), height(&self.right));
    }

    fn balance(&self) -> i32 {
        height(&self.left) - height(&self.right)
    }
}

/// Implementations for fundamental tree algorithms.
impl<K: Ord + Clone, V> AvlTree<K, V> {
    /// Creates new instance.
    pub fn new() -> Self {
        Self {
            root: None,
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
        Self::find(&self.root, key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Self::find_mut(&mut self.root, key)
    }

    fn find<'a, Q>(link: &'a Link<K, V>, key: &Q) -> Option<&'a V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match link {
            None => None,
            Some(node) => match key.cmp(node.key.borrow()) {
                Ordering::Less => Self::find(&node.left, key),
                Ordering::Greater => Self::find(&node.right, key),
                Ordering::Equal => Some(&node.value),
            },
        }
    }

    fn find_mut<'a, Q>(link: &'a mut Link<K, V>, key: &Q) -> Option<&'a mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match link {
            None => None,
            Some(node) => match key.cmp(node.key.borrow()) {
                Ordering::Less => Self::find_mut(&mut node.left, key),
                Ordering::Greater => Self::find_mut(&mut node.right, key),
                Ordering::Equal => Some(&mut node.value),
            },
        }
    }

    /// Inserts a key-value pair, failing with [`Error::DuplicateKey`] when
    /// the key is already present. The tree is left untouched on failure.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let probe = key.clone();
        Self::insert_at(&mut self.root, &probe, key, value)?;
        self.length += 1;
        Ok(())
    }

    fn insert_at(link: &mut Link<K, V>, probe: &K, key: K, value: V) -> Result<()> {
        let node = match link {
            None => {
                *link = Some(Box::new(Node::new(key, value)));
                return Ok(());
            }
            Some(node) => node,
        };
        match probe.cmp(&node.key) {
            Ordering::Less => Self::insert_at(&mut node.left, probe, key, value)?,
            Ordering::Greater => Self::insert_at(&mut node.right, probe, key, value)?,
            Ordering::Equal => return Err(Error::DuplicateKey),
        }

        node.update_height();
        let balance = node.balance();
        // single versus double rotation is decided against the child's key,
        // not against which side the recursion took
        let probe_vs_left = node.left.as_ref().map(|child| probe.cmp(&child.key));
        let probe_vs_right = node.right.as_ref().map(|child| probe.cmp(&child.key));

        if balance > 1 {
            match probe_vs_left {
                Some(Ordering::Less) => Self::rotate_right(link),
                Some(Ordering::Greater) => {
                    if let Some(node) = link {
                        Self::rotate_left(&mut node.left);
                    }
                    Self::rotate_right(link);
                }
                _ => {}
            }
        } else if balance < -1 {
            match probe_vs_right {
                Some(Ordering::Greater) => Self::rotate_left(link),
                Some(Ordering::Less) => {
                    if let Some(node) = link {
                        Self::rotate_right(&mut node.right);
                    }
                    Self::rotate_left(link);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Removes a key, failing with [`Error::NotFound`] when absent. The tree
    /// is left untouched on failure.
    pub fn remove<Q>(&mut self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Self::remove_at(&mut self.root, key)?;
        self.length -= 1;
        Ok(())
    }

    fn remove_at<Q>(link: &mut Link<K, V>, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let node = match link {
            None => return Err(Error::NotFound),
            Some(node) => node,
        };
        match key.cmp(node.key.borrow()) {
            Ordering::Less => Self::remove_at(&mut node.left, key)?,
            Ordering::Greater => Self::remove_at(&mut node.right, key)?,
            Ordering::Equal => Self::splice(link),
        }
        Self::rebalance_after_remove(link);
        Ok(())
    }

    /// Detaches the node at `link`. A node with at most one child is
    /// replaced by that child; a node with two children takes over its
    /// in-order successor's entry instead.
    fn splice(link: &mut Link<K, V>) {
        if let Some(mut node) = link.take() {
            match (node.left.is_some(), node.right.is_some()) {
                (true, true) => {
                    if let Some((key, value)) = Self::take_min(&mut node.right) {
                        node.key = key;
                        node.value = value;
                    }
                    *link = Some(node);
                }
                (true, false) => *link = node.left.take(),
                (false, _) => *link = node.right.take(),
            }
        }
    }

    /// Unlinks the smallest node of the subtree and hands back its entry,
    /// rebalancing the subtree on the way out.
    fn take_min(link: &mut Link<K, V>) -> Option<(K, V)> {
        let has_left = match link {
            None => return None,
            Some(node) => node.left.is_some(),
        };
        if has_left {
            let taken = match link {
                Some(node) => Self::take_min(&mut node.left),
                None => None,
            };
            Self::rebalance_after_remove(link);
            taken
        } else {
            match link.take() {
                None => None,
                Some(mut node) => {
                    *link = node.right.take();
                    Some((node.key, node.value))
                }
            }
        }
    }

    /// Recomputes the height at `link` and repairs the balance invariant.
    ///
    /// After a deletion the rotation is chosen by the surviving heavier
    /// child's balance; the removed key tells us nothing about the shape
    /// that is left behind.
    fn rebalance_after_remove(link: &mut Link<K, V>) {
        let node = match link {
            None => return,
            Some(node) => node,
        };
        node.update_height();
        let balance = node.balance();
        let left_balance = node.left.as_ref().map_or(0, |child| child.balance());
        let right_balance = node.right.as_ref().map_or(0, |child| child.balance());

        if balance > 1 && left_balance >= 0 {
            Self::rotate_right(link);
        } else if balance > 1 {
            if let Some(node) = link {
                Self::rotate_left(&mut node.left);
            }
            Self::rotate_right(link);
        } else if balance < -1 && right_balance <= 0 {
            Self::rotate_left(link);
        } else if balance < -1 {
            if let Some(node) = link {
                Self::rotate_right(&mut node.right);
            }
            Self::rotate_left(link);
        }
    }

    fn rotate_right(link: &mut Link<K, V>) {
        if let Some(mut y) = link.take() {
            match y.left.take() {
                Some(mut x) => {
                    y.left = x.right.take();
                    y.update_height();
                    x.right = Some(y);
                    x.update_height();
                    *link = Some(x);
                }
                None => *link = Some(y),
            }
        }
    }

    fn rotate_left(link: &mut Link<K, V>) {
        if let Some(mut x) = link.take() {
            match x.right.take() {
                Some(mut y) => {
                    x.right = y.left.take();
                    x.update_height();
                    y.left = Some(x);
                    y.update_height();
                    *link = Some(y);
                }
                None => *link = Some(x),
            }
        }
    }

    /// Collects all keys within `[min, max]` in ascending order, descending
    /// only into subtrees that can still contain qualifying keys.
    pub fn range<Q>(&self, min: &Q, max: &Q) -> Vec<K>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut result = Vec::new();
        Self::range_walk(&self.root, min, max, &mut result);
        result
    }

    fn range_walk<Q>(link: &Link<K, V>, min: &Q, max: &Q, out: &mut Vec<K>)
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if let Some(node) = link {
            let key = node.key.borrow();
            if key >= min {
                Self::range_walk(&node.left, min, max, out);
            }
            if key >= min && key <= max {
                out.push(node.key.clone());
            }
            if key <= max {
                Self::range_walk(&node.right, min, max, out);
            }
        }
    }
}

/// Structural snapshot support for the engine's key and value types.
impl AvlTree<String, Payload> {
    pub fn to_json(&self) -> JsonValue {
        object! {
            "backend" => "avl",
            "root" => Self::node_to_json(&self.root),
        }
    }

    fn node_to_json(link: &Link<String, Payload>) -> JsonValue {
        match link {
            None => JsonValue::Null,
            Some(node) => object! {
                "key" => node.key.as_str(),
                "value" => node.value.to_json(),
                "height" => node.height,
                "left" => Self::node_to_json(&node.left),
                "right" => Self::node_to_json(&node.right),
            },
        }
    }

    pub fn from_json(doc: &JsonValue) -> Result<Self> {
        if doc["backend"] != "avl" {
            return Err(Error::corrupt("not an avl snapshot"));
        }
        let mut length = 0;
        let root = Self::node_from_json(&doc["root"], None, None, &mut length)?;
        Ok(Self { root, length })
    }

    fn node_from_json(
        doc: &JsonValue,
        lower: Option<&str>,
        upper: Option<&str>,
        count: &mut usize,
    ) -> Result<Link<String, Payload>> {
        if doc.is_null() {
            return Ok(None);
        }
        let key = match doc["key"].as_str() {
            Some(text) => text.to_string(),
            None => return Err(Error::corrupt("node key must be a string")),
        };
        if let Some(lo) = lower {
            if key.as_str() <= lo {
                return Err(Error::corrupt("key order violated"));
            }
        }
        if let Some(hi) = upper {
            if key.as_str() >= hi {
                return Err(Error::corrupt("key order violated"));
            }
        }
        let value = Payload::from_json(&doc["value"])?;
        let left = Self::node_from_json(&doc["left"], lower, Some(key.as_str()), count)?;
        let right = Self::node_from_json(&doc["right"], Some(key.as_str()), upper, count)?;

        let mut node = Node::new(key, value);
        node.left = left;
        node.right = right;
        node.update_height();
        let stored = match doc["height"].as_i32() {
            Some(value) => value,
            None => return Err(Error::corrupt("node height must be an integer")),
        };
        if stored != node.height {
            return Err(Error::corrupt("stored height does not match structure"));
        }
        if node.balance().abs() > 1 {
            return Err(Error::corrupt("balance factor out of range"));
        }
        *count += 1;
        Ok(Some(Box::new(node)))
    }
}

/// Access points for the uniform contract.
impl OrderedIndex for AvlTree<String, Payload> {
    fn insert(&mut self, key: String, value: Payload) -> Result<()> {
        AvlTree::insert(self, key, value)
    }

    fn get(&self, key: &str) -> Result<&Payload> {
        AvlTree::get(self, key).ok_or(Error::NotFound)
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
        AvlTree::remove(self, key)
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

#[cfg(test)]
impl<K: Ord + Clone, V> AvlTree<K, V> {
    /// Walks the whole tree asserting the height and balance invariants.
    fn check_invariants(&self) {
        let mut counted = 0;
        Self::check_node(&self.root, &mut counted);
        assert_eq!(counted, self.length, "length matches node count");
    }

    fn check_node(link: &Link<K, V>, count: &mut usize) -> i32 {
        match link {
            None => 0,
            Some(node) => {
                let left_height = Self::check_node(&node.left, count);
                let right_height = Self::check_node(&node.right, count);
                assert_eq!(node.height, 1 + left_height.max(right_height));
                assert!((left_height - right_height).abs() <= 1, "balance in range");
                if let Some(left) = &node.left {
                    assert!(left.key < node.key);
                }
                if let Some(right) = &node.right {
                    assert!(right.key > node.key);
                }
                *count += 1;
                node.height
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AvlTree;
    use crate::error::Error;
    use crate::index::OrderedIndex;
    use crate::record::Payload;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn tree_of(keys: &[&str]) -> AvlTree<String, Payload> {
        let mut tree = AvlTree::new();
        for key in keys {
            tree.insert(key.to_string(), Payload::from(*key)).unwrap();
        }
        tree
    }

    #[test]
    fn ascending_insert_rotates_to_b_root() {
        // "b", "a", "c" settles without any rotation
        let tree = tree_of(&["b", "a", "c"]);
        let root = tree.root.as_ref().unwrap();
        assert_eq!(root.key, "b");
        assert_eq!(root.left.as_ref().unwrap().key, "a");
        assert_eq!(root.right.as_ref().unwrap().key, "c");

        // a full ascending run must left-rotate, leaving "b" at the root
        let tree = tree_of(&["a", "b", "c", "d"]);
        let root = tree.root.as_ref().unwrap();
        assert_eq!(root.key, "b");
        assert_eq!(root.left.as_ref().unwrap().key, "a");
        assert_eq!(root.right.as_ref().unwrap().key, "c");
        assert_eq!(root.right.as_ref().unwrap().right.as_ref().unwrap().key, "d");
        tree.check_invariants();
    }

    #[test]
    fn duplicate_insert_leaves_tree_unchanged() {
        let mut tree = tree_of(&["m", "f", "t"]);
        let before = tree.snapshot();
        let err = tree.insert(String::from("f"), Payload::from("other"));
        assert!(matches!(err, Err(Error::DuplicateKey)));
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.snapshot(), before);
        assert_eq!(tree.get("f").unwrap().as_ref(), b"f");
    }

    #[test]
    fn remove_missing_key_is_not_found() {
        let mut tree = tree_of(&["m", "f", "t"]);
        let before = tree.snapshot();
        assert!(matches!(tree.remove("zzz"), Err(Error::NotFound)));
        assert_eq!(tree.snapshot(), before);
    }

    #[test]
    fn last_written_value_wins() {
        let mut tree = tree_of(&["a", "b", "c"]);
        OrderedIndex::update(&mut tree, "b", Payload::from("fresh")).unwrap();
        assert_eq!(tree.get("b").unwrap().as_ref(), b"fresh");
        assert!(matches!(
            OrderedIndex::update(&mut tree, "x", Payload::from("nope")),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let tree = tree_of(&["a", "c", "e", "g", "i"]);
        assert_eq!(tree.range("c", "g"), vec!["c", "e", "g"]);
        assert_eq!(tree.range("b", "h"), vec!["c", "e", "g"]);
        assert_eq!(tree.range("e", "e"), vec!["e"]);
        assert!(tree.range("g", "c").is_empty());
        assert!(tree.range("x", "z").is_empty());
    }

    #[test]
    fn randomized_inserts_and_removes_hold_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut tree = AvlTree::<String, Payload>::new();
        let mut alive = Vec::<String>::new();

        for round in 0..2000 {
            if alive.is_empty() || rng.gen_bool(0.6) {
                let key = format!("{:06}", rng.gen_range(0..100000));
                match tree.insert(key.clone(), Payload::from(round.to_string().as_str())) {
                    Ok(()) => alive.push(key),
                    Err(Error::DuplicateKey) => assert!(alive.contains(&key)),
                    Err(other) => panic!("unexpected error: {other}"),
                }
            } else {
                let at = rng.gen_range(0..alive.len());
                let key = alive.swap_remove(at);
                tree.remove(key.as_str()).unwrap();
            }
            tree.check_invariants();
        }

        alive.sort();
        assert_eq!(tree.range("0", "~"), alive);
    }

    #[test]
    fn snapshot_round_trip() {
        let tree = tree_of(&["delta", "alpha", "echo", "bravo", "charlie"]);
        let mut restored = AvlTree::<String, Payload>::new();
        restored.restore(&tree.snapshot()).unwrap();
        restored.check_invariants();
        assert_eq!(restored.len(), tree.len());
        for key in ["alpha", "bravo", "charlie", "delta", "echo"] {
            assert_eq!(restored.get(key).unwrap(), tree.get(key).unwrap());
        }
        assert_eq!(restored.range("a", "z"), tree.range("a", "z"));
    }

    #[test]
    fn restore_rejects_malformed_snapshots() {
        let mut tree = AvlTree::<String, Payload>::new();
        assert!(tree.restore(b"not json at all").is_err());
        assert!(tree.restore(br#"{"backend":"btree","root":null}"#).is_err());
        // a right-leaning chain of three nodes is no longer balanced
        let lopsided = br#"{"backend":"avl","root":{"key":"a","value":[],"height":3,"left":null,
            "right":{"key":"b","value":[],"height":2,"left":null,
            "right":{"key":"c","value":[],"height":1,"left":null,"right":null}}}}"#;
        assert!(tree.restore(lopsided).is_err());
        // tampered height
        let lying = br#"{"backend":"avl","root":{"key":"a","value":[],"height":7,"left":null,"right":null}}"#;
        assert!(tree.restore(lying).is_err());
    }
}
