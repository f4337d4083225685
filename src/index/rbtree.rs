use crate::error::{Error, Result};
use crate::index::OrderedIndex;
use crate::record::Payload;
use json::{object, JsonValue};
use std::borrow::Borrow;
use std::cmp::Ordering;

/// Index of a node inside the arena; `NIL` marks an absent link.
type Link = usize;

const NIL: Link = usize::MAX;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Color {
    Red,
    Black,
}

/// A red-black tree of key-value pairs.
///
/// Nodes live in an index-addressed arena so that parent back-references are
/// plain indices instead of owning pointers; rotations and fix-ups become
/// index reassignments. Slots freed by deletions are recycled through a free
/// list, so a removed node is unlinked immediately but its slot may hold
/// stale contents until reused.
pub struct RBTree<K: Ord, V> {
    nodes: Vec<Node<K, V>>,
    root: Link,
    free: Vec<Link>,
    length: usize,
}

struct Node<K: Ord, V> {
    key: K,
    value: V,
    color: Color,
    parent: Link,
    child: [Link; 2], // left: [0], right: [1]
}

/// Implementations for fundamental tree algorithms.
impl<K: Ord, V> RBTree<K, V> {
    /// Creates new instance.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: NIL,
            free: Vec::new(),
            length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    /// Color of a node, where absent links count as black.
    fn color(&self, p: Link) -> Color {
        if p == NIL {
            Color::Black
        } else {
            self.nodes[p].color
        }
    }

    /// Places a node into the arena, reusing a freed slot when one exists.
    ///
    /// The new node is red so that every path keeps its black count until
    /// the insert fix-up has run.
    fn alloc(&mut self, key: K, value: V) -> Link {
        let node = Node {
            key,
            value,
            color: Color::Red,
            parent: NIL,
            child: [NIL, NIL],
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, p: Link) {
        self.free.push(p);
    }

    /// Side of `p` relative to its parent `g`.
    fn side(&self, p: Link, g: Link) -> usize {
        if self.nodes[g].child[1] == p {
            1
        } else {
            0
        }
    }

    /// Finds the node holding `key`, or `NIL`.
    fn access<Q>(&self, key: &Q) -> Link
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut p = self.root;
        while p != NIL {
            match key.cmp(self.nodes[p].key.borrow()) {
                Ordering::Equal => break,
                Ordering::Less => p = self.nodes[p].child[0],
                Ordering::Greater => p = self.nodes[p].child[1],
            }
        }
        p
    }

    /// Leftmost node of the subtree rooted at `p`.
    fn minimum(&self, mut p: Link) -> Link {
        while self.nodes[p].child[0] != NIL {
            p = self.nodes[p].child[0];
        }
        p
    }

    /// Rotate the subtree at `p` towards `side` (left: 0, right: 1).
    fn rotate(&mut self, p: Link, side: usize) {
        let g = self.nodes[p].parent; // parent of the rotated pair
        let s = self.nodes[p].child[1 - side]; // the child replacing p
        let c = self.nodes[s].child[side]; // grandchild switching sides

        // attach the grandchild on the vacated side
        self.nodes[p].child[1 - side] = c;
        if c != NIL {
            self.nodes[c].parent = p;
        }

        // reconnect p under s
        self.nodes[s].child[side] = p;
        self.nodes[p].parent = s;

        // connect s to the old parent, or promote it to root
        self.nodes[s].parent = g;
        if g != NIL {
            let gside = self.side(p, g);
            self.nodes[g].child[gside] = s;
        } else {
            self.root = s;
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.access(key) {
            NIL => None,
            p => Some(&self.nodes[p].value),
        }
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.access(key) {
            NIL => None,
            p => Some(&mut self.nodes[p].value),
        }
    }

    /// Inserts a key-value pair, failing with [`Error::DuplicateKey`] when
    /// the key is already present. The tree is left untouched on failure.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if self.root == NIL {
            let n = self.alloc(key, value);
            self.root = n;
            self.insert_fixup(n);
            self.length += 1;
            return Ok(());
        }
        let mut p = self.root;
        loop {
            match key.cmp(&self.nodes[p].key) {
                Ordering::Equal => return Err(Error::DuplicateKey),
                Ordering::Less => {
                    if self.nodes[p].child[0] == NIL {
                        let n = self.alloc(key, value);
                        self.attach(n, p, 0);
                        break;
                    }
                    p = self.nodes[p].child[0];
                }
                Ordering::Greater => {
                    if self.nodes[p].child[1] == NIL {
                        let n = self.alloc(key, value);
                        self.attach(n, p, 1);
                        break;
                    }
                    p = self.nodes[p].child[1];
                }
            }
        }
        self.length += 1;
        Ok(())
    }

    fn attach(&mut self, n: Link, p: Link, side: usize) {
        self.nodes[n].parent = p;
        self.nodes[p].child[side] = n;
        self.insert_fixup(n);
    }

    /// Walks up from a freshly inserted red node restoring the color
    /// invariants.
    fn insert_fixup(&mut self, mut n: Link) {
        loop {
            let p = self.nodes[n].parent;
            if p == NIL {
                // n is the root
                self.nodes[n].color = Color::Black;
                return;
            }
            if self.color(p) == Color::Black {
                // a black parent cannot create a red-red violation
                return;
            }
            let g = self.nodes[p].parent;
            if g == NIL {
                // the red parent is the root; repainting it black restores
                // the invariants and grows the black height by one
                self.nodes[p].color = Color::Black;
                return;
            }
            let side = self.side(p, g);
            let u = self.nodes[g].child[1 - side]; // uncle of n
            if self.color(u) == Color::Red {
                // red parent, red uncle: repaint both black, push the red
                // violation up to the grandparent and continue from there
                self.nodes[p].color = Color::Black;
                self.nodes[u].color = Color::Black;
                self.nodes[g].color = Color::Red;
                n = g;
                continue;
            }
            // black or absent uncle: one or two rotations finish the repair
            let p = if self.side(n, p) != side {
                // triangle case, rotate the parent first to make a line
                self.rotate(p, side);
                self.nodes[g].child[side]
            } else {
                p
            };
            self.rotate(g, 1 - side);
            self.nodes[p].color = Color::Black;
            self.nodes[g].color = Color::Red;
            return;
        }
    }

    /// Removes a key, failing with [`Error::NotFound`] when absent. The tree
    /// is left untouched on failure.
    pub fn remove<Q>(&mut self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let z = self.access(key);
        if z == NIL {
            return Err(Error::NotFound);
        }
        self.delete_node(z);
        self.length -= 1;
        Ok(())
    }

    fn delete_node(&mut self, z: Link) {
        // a node with two children trades entries with its in-order
        // successor, which has at most one child
        let target = if self.nodes[z].child[0] != NIL && self.nodes[z].child[1] != NIL {
            let s = self.minimum(self.nodes[z].child[1]);
            self.swap_entry(z, s);
            s
        } else {
            z
        };

        // splice target out, replacing it with its only child (possibly NIL)
        let child = if self.nodes[target].child[0] != NIL {
            self.nodes[target].child[0]
        } else {
            self.nodes[target].child[1]
        };
        let parent = self.nodes[target].parent;

        if child != NIL {
            self.nodes[child].parent = parent;
        }
        if parent == NIL {
            self.root = child;
        } else {
            let side = self.side(target, parent);
            self.nodes[parent].child[side] = child;
        }

        if self.nodes[target].color == Color::Black {
            // removing a black node leaves one path short of a black
            self.delete_fixup(child, parent);
        }
        self.release(target);
    }

    /// Swaps the entries of two distinct arena slots, leaving links and
    /// colors in place.
    fn swap_entry(&mut self, a: Link, b: Link) {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.nodes.split_at_mut(hi);
        let x = &mut head[lo];
        let y = &mut tail[0];
        std::mem::swap(&mut x.key, &mut y.key);
        std::mem::swap(&mut x.value, &mut y.value);
    }

    /// Repairs the black-height deficit left on `x` (possibly `NIL`) whose
    /// parent is `parent`, walking upward until the deficit is absorbed.
    ///
    /// Whenever a deficit exists the sibling side carries at least one black
    /// node, so the sibling link is never `NIL` here.
    fn delete_fixup(&mut self, mut x: Link, mut parent: Link) {
        while x != self.root && self.color(x) == Color::Black {
            let side = if self.nodes[parent].child[0] == x { 0 } else { 1 };
            let mut sib = self.nodes[parent].child[1 - side];

            if self.color(sib) == Color::Red {
                // red sibling: rotate it over the parent to get a black one
                self.nodes[sib].color = Color::Black;
                self.nodes[parent].color = Color::Red;
                self.rotate(parent, side);
                sib = self.nodes[parent].child[1 - side];
            }

            let near = self.nodes[sib].child[side];
            let far = self.nodes[sib].child[1 - side];
            if self.color(near) == Color::Black && self.color(far) == Color::Black {
                // both nephews black: repaint the sibling red and move the
                // deficit up to the parent
                self.nodes[sib].color = Color::Red;
                x = parent;
                parent = self.nodes[x].parent;
                continue;
            }

            let sib = if self.color(far) == Color::Black {
                // only the near nephew is red: rotate it into the far slot
                self.nodes[near].color = Color::Black;
                self.nodes[sib].color = Color::Red;
                self.rotate(sib, 1 - side);
                self.nodes[parent].child[1 - side]
            } else {
                sib
            };

            // far nephew red: the final rotation absorbs the deficit
            self.nodes[sib].color = self.nodes[parent].color;
            self.nodes[parent].color = Color::Black;
            let far = self.nodes[sib].child[1 - side];
            if far != NIL {
                self.nodes[far].color = Color::Black;
            }
            self.rotate(parent, side);
            x = self.root;
            parent = NIL;
        }
        if x != NIL {
            self.nodes[x].color = Color::Black;
        }
    }

    /// Collects all keys within `[min, max]` in ascending order, descending
    /// only into subtrees that can still contain qualifying keys.
    pub fn range<Q>(&self, min: &Q, max: &Q) -> Vec<K>
    where
        K: Borrow<Q> + Clone,
        Q: Ord + ?Sized,
    {
        let mut result = Vec::new();
        self.range_walk(self.root, min, max, &mut result);
        result
    }

    fn range_walk<Q>(&self, p: Link, min: &Q, max: &Q, out: &mut Vec<K>)
    where
        K: Borrow<Q> + Clone,
        Q: Ord + ?Sized,
    {
        if p == NIL {
            return;
        }
        let key = self.nodes[p].key.borrow();
        if key >= min {
            self.range_walk(self.nodes[p].child[0], min, max, out);
        }
        let key = self.nodes[p].key.borrow();
        if key >= min && key <= max {
            out.push(self.nodes[p].key.clone());
        }
        if key <= max {
            self.range_walk(self.nodes[p].child[1], min, max, out);
        }
    }

    /// Verifies the full set of red-black invariants, returning a corrupt
    /// error naming the first violation found.
    fn validate(&self) -> Result<()> {
        if self.color(self.root) == Color::Red {
            return Err(Error::corrupt("root must be black"));
        }
        if self.root != NIL && self.nodes[self.root].parent != NIL {
            return Err(Error::corrupt("root has a parent"));
        }
        self.validate_at(self.root, None, None).map(|_| ())
    }

    /// Returns the black height of the subtree at `p`.
    fn validate_at(&self, p: Link, lower: Option<&K>, upper: Option<&K>) -> Result<u32> {
        if p == NIL {
            return Ok(1);
        }
        let node = &self.nodes[p];
        if let Some(lo) = lower {
            if node.key <= *lo {
                return Err(Error::corrupt("key order violated"));
            }
        }
        if let Some(hi) = upper {
            if node.key >= *hi {
                return Err(Error::corrupt("key order violated"));
            }
        }
        for side in 0..2 {
            let child = node.child[side];
            if child != NIL && self.nodes[child].parent != p {
                return Err(Error::corrupt("parent link broken"));
            }
        }
        if node.color == Color::Red
            && (self.color(node.child[0]) == Color::Red || self.color(node.child[1]) == Color::Red)
        {
            return Err(Error::corrupt("red node with red child"));
        }
        let left = self.validate_at(node.child[0], lower, Some(&node.key))?;
        let right = self.validate_at(node.child[1], Some(&node.key), upper)?;
        if left != right {
            return Err(Error::corrupt("black height not uniform"));
        }
        Ok(left + if node.color == Color::Black { 1 } else { 0 })
    }
}

/// Structural snapshot support for the engine's key and value types.
impl RBTree<String, Payload> {
    pub fn to_json(&self) -> JsonValue {
        object! {
            "backend" => "redblack",
            "root" => self.node_to_json(self.root),
        }
    }

    fn node_to_json(&self, p: Link) -> JsonValue {
        if p == NIL {
            return JsonValue::Null;
        }
        let node = &self.nodes[p];
        object! {
            "key" => node.key.as_str(),
            "value" => node.value.to_json(),
            "color" => match node.color {
                Color::Red => "red",
                Color::Black => "black",
            },
            "left" => self.node_to_json(node.child[0]),
            "right" => self.node_to_json(node.child[1]),
        }
    }

    pub fn from_json(doc: &JsonValue) -> Result<Self> {
        if doc["backend"] != "redblack" {
            return Err(Error::corrupt("not a redblack snapshot"));
        }
        let mut tree = Self::new();
        tree.root = tree.node_from_json(&doc["root"], NIL)?;
        tree.length = tree.nodes.len();
        tree.validate()?;
        Ok(tree)
    }

    fn node_from_json(&mut self, doc: &JsonValue, parent: Link) -> Result<Link> {
        if doc.is_null() {
            return Ok(NIL);
        }
        let key = match doc["key"].as_str() {
            Some(text) => text.to_string(),
            None => return Err(Error::corrupt("node key must be a string")),
        };
        let value = Payload::from_json(&doc["value"])?;
        let color = match doc["color"].as_str() {
            Some("red") => Color::Red,
            Some("black") => Color::Black,
            _ => return Err(Error::corrupt("node color must be red or black")),
        };
        let n = self.alloc(key, value);
        self.nodes[n].color = color;
        self.nodes[n].parent = parent;
        let left = self.node_from_json(&doc["left"], n)?;
        self.nodes[n].child[0] = left;
        let right = self.node_from_json(&doc["right"], n)?;
        self.nodes[n].child[1] = right;
        Ok(n)
    }
}

/// Access points for the uniform contract.
impl OrderedIndex for RBTree<String, Payload> {
    fn insert(&mut self, key: String, value: Payload) -> Result<()> {
        RBTree::insert(self, key, value)
    }

    fn get(&self, key: &str) -> Result<&Payload> {
        RBTree::get(self, key).ok_or(Error::NotFound)
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
        RBTree::remove(self, key)
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
mod tests {
    use super::{Color, RBTree, NIL};
    use crate::error::Error;
    use crate::index::OrderedIndex;
    use crate::record::Payload;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn tree_of(keys: &[&str]) -> RBTree<String, Payload> {
        let mut tree = RBTree::new();
        for key in keys {
            tree.insert(key.to_string(), Payload::from(*key)).unwrap();
        }
        tree
    }

    /// Counts black nodes along every root-to-nil path, asserting they all
    /// agree.
    fn black_height(tree: &RBTree<String, Payload>, p: usize) -> u32 {
        if p == NIL {
            return 1;
        }
        let left = black_height(tree, tree.nodes[p].child[0]);
        let right = black_height(tree, tree.nodes[p].child[1]);
        assert_eq!(left, right, "black count equal on both sides");
        left + if tree.nodes[p].color == Color::Black {
            1
        } else {
            0
        }
    }

    #[test]
    fn ascending_run_keeps_black_root_and_uniform_black_height() {
        let tree = tree_of(&["1", "2", "3", "4", "5", "6", "7"]);
        assert_eq!(tree.color(tree.root), Color::Black);
        black_height(&tree, tree.root);
        tree.validate().unwrap();
        assert_eq!(tree.len(), 7);
        assert_eq!(
            tree.range("1", "7"),
            vec!["1", "2", "3", "4", "5", "6", "7"]
        );
    }

    #[test]
    fn duplicate_insert_leaves_tree_unchanged() {
        let mut tree = tree_of(&["k1", "k2", "k3"]);
        let before = tree.snapshot();
        assert!(matches!(
            tree.insert(String::from("k2"), Payload::from("other")),
            Err(Error::DuplicateKey)
        ));
        assert_eq!(tree.snapshot(), before);
        assert_eq!(tree.get("k2").unwrap().as_ref(), b"k2");
    }

    #[test]
    fn remove_missing_key_is_not_found() {
        let mut tree = tree_of(&["k1", "k2", "k3"]);
        let before = tree.snapshot();
        assert!(matches!(tree.remove("absent"), Err(Error::NotFound)));
        assert_eq!(tree.snapshot(), before);
    }

    #[test]
    fn update_replaces_value_in_place() {
        let mut tree = tree_of(&["a", "b", "c"]);
        let shape = tree.snapshot();
        OrderedIndex::update(&mut tree, "b", Payload::from("fresh")).unwrap();
        assert_eq!(tree.get("b").unwrap().as_ref(), b"fresh");
        // structure is untouched, only the payload changed
        let mut reverted = RBTree::<String, Payload>::new();
        reverted.restore(&shape).unwrap();
        assert_eq!(reverted.len(), tree.len());
        assert!(matches!(
            OrderedIndex::update(&mut tree, "zz", Payload::new()),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let tree = tree_of(&["a", "c", "e", "g", "i"]);
        assert_eq!(tree.range("c", "g"), vec!["c", "e", "g"]);
        assert_eq!(tree.range("e", "e"), vec!["e"]);
        assert!(tree.range("g", "c").is_empty());
    }

    #[test]
    fn randomized_inserts_and_removes_hold_invariants() {
        let mut rng = StdRng::seed_from_u64(0xb1ac4);
        let mut tree = RBTree::<String, Payload>::new();
        let mut alive = Vec::<String>::new();

        for round in 0..2000 {
            if alive.is_empty() || rng.gen_bool(0.55) {
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
            tree.validate().unwrap();
            assert_eq!(tree.len(), alive.len());
        }

        alive.sort();
        assert_eq!(tree.range("0", "~"), alive);
    }

    #[test]
    fn deleting_black_leaves_exercises_fixup_cases() {
        // ascending removals force the double-black repair repeatedly
        let mut tree = tree_of(&["a", "b", "c", "d", "e", "f", "g", "h"]);
        for key in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            tree.remove(key).unwrap();
            tree.validate().unwrap();
        }
        assert_eq!(tree.len(), 0);
        assert!(tree.range("a", "z").is_empty());
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut tree = tree_of(&["a", "b", "c"]);
        let slots = tree.nodes.len();
        tree.remove("b").unwrap();
        tree.insert(String::from("d"), Payload::from("d")).unwrap();
        assert_eq!(tree.nodes.len(), slots, "slot recycled instead of grown");
        tree.validate().unwrap();
    }

    #[test]
    fn snapshot_round_trip() {
        let tree = tree_of(&["delta", "alpha", "echo", "bravo", "charlie"]);
        let mut restored = RBTree::<String, Payload>::new();
        restored.restore(&tree.snapshot()).unwrap();
        restored.validate().unwrap();
        assert_eq!(restored.len(), tree.len());
        for key in ["alpha", "bravo", "charlie", "delta", "echo"] {
            assert_eq!(restored.get(key).unwrap(), tree.get(key).unwrap());
        }
        assert_eq!(restored.range("a", "z"), tree.range("a", "z"));
    }

    #[test]
    fn restore_rejects_malformed_snapshots() {
        let mut tree = RBTree::<String, Payload>::new();
        assert!(tree.restore(b"[]").is_err());
        assert!(tree.restore(br#"{"backend":"avl","root":null}"#).is_err());
        // red root
        let red_root =
            br#"{"backend":"redblack","root":{"key":"a","value":[],"color":"red","left":null,"right":null}}"#;
        assert!(tree.restore(red_root).is_err());
        // red node with a red child
        let red_red = br#"{"backend":"redblack","root":{"key":"b","value":[],"color":"black","left":
            {"key":"a","value":[],"color":"red","left":null,"right":
            null},"right":{"key":"c","value":[],"color":"red","left":
            {"key":"b2","value":[],"color":"red","left":null,"right":null},"right":null}}}"#;
        assert!(tree.restore(red_red).is_err());
        // unbalanced black heights
        let short_side = br#"{"backend":"redblack","root":{"key":"b","value":[],"color":"black","left":
            {"key":"a","value":[],"color":"black","left":null,"right":null},"right":null}}"#;
        assert!(tree.restore(short_side).is_err());
    }
}
