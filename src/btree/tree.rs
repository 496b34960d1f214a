//! # Tree Operations
//!
//! The ordered-map surface over node pages: point lookup, insert/replace,
//! and delete, all copy-on-write.
//!
//! ## Insert Algorithm
//!
//! ```text
//! 1. Descend from the root toward the target leaf.
//! 2. Clone the leaf under a fresh page id, insert or replace the entry.
//! 3. If the clone no longer fits, split at n/2; the promoted separator is
//!    the right half's first key and the next-leaf chain becomes
//!    left -> right -> old next.
//! 4. Unwinding, clone each branch on the path under a fresh page id,
//!    point it at the new child, and insert the promoted separator and
//!    right child where a split happened; split overfull branches the same
//!    way, promoting the middle key.
//! 5. Free every replaced page. If the root split, a new one-key branch
//!    becomes the root.
//! ```
//!
//! ## Delete Algorithm
//!
//! Locate the key; absent keys rewrite nothing. A hit clones the leaf
//! without the entry and rewrites the path exactly like an insert. No
//! sibling merging or borrowing is performed: empty leaves are legal and
//! persist until their pages fall out of the tree, and the root only
//! collapses when it is a branch with a single child.

use super::node::Node;
use crate::error::{Error, Result};
use crate::storage::node::{max_key_len, MAX_VALUE_LEN};
use crate::storage::{PageId, PageStore};

/// An ordered map rooted at a page id. The root moves on every mutation;
/// callers keep the handle and persist `root` wherever they reference the
/// tree (bucket headers, the meta page).
#[derive(Debug, Clone, Copy)]
pub struct Tree {
    pub root: PageId,
}

enum SetOutcome {
    Done(PageId),
    Split {
        left: PageId,
        separator: Vec<u8>,
        right: PageId,
    },
}

enum DeleteOutcome {
    NotFound,
    Deleted(PageId),
}

impl Tree {
    pub fn new(root: PageId) -> Tree {
        Tree { root }
    }

    /// Allocates and writes an empty leaf, returning a tree rooted at it.
    pub fn create<S: PageStore>(store: &mut S) -> Result<Tree> {
        let root = store.alloc_page();
        Node::leaf(root).write(store)?;
        Ok(Tree { root })
    }

    pub fn get<S: PageStore>(&self, store: &S, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut node = Node::read(store, self.root)?;
        loop {
            if node.is_leaf {
                return Ok(match node.search(key) {
                    Ok(idx) => Some(node.values.swap_remove(idx)),
                    Err(_) => None,
                });
            }
            let idx = node.child_index(key);
            node = Node::read(store, node.children[idx])?;
        }
    }

    /// Inserts or replaces `key`. Equal keys replace; the tree never holds
    /// duplicates.
    pub fn set<S: PageStore>(&mut self, store: &mut S, key: &[u8], value: &[u8]) -> Result<()> {
        let max_key = max_key_len(store.page_size());
        if key.len() > max_key {
            return Err(Error::KeyTooLarge {
                size: key.len(),
                max: max_key,
            });
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(Error::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_LEN,
            });
        }

        match Self::set_in(store, self.root, key, value)? {
            SetOutcome::Done(id) => self.root = id,
            SetOutcome::Split {
                left,
                separator,
                right,
            } => {
                let root_id = store.alloc_page();
                Node::branch(root_id, vec![separator], vec![left, right]).write(store)?;
                self.root = root_id;
            }
        }
        Ok(())
    }

    /// Removes `key` if present. Returns whether an entry was removed.
    pub fn delete<S: PageStore>(&mut self, store: &mut S, key: &[u8]) -> Result<bool> {
        match Self::delete_in(store, self.root, key)? {
            DeleteOutcome::NotFound => Ok(false),
            DeleteOutcome::Deleted(new_root) => {
                let node = Node::read(store, new_root)?;
                if !node.is_leaf && node.keys.is_empty() && node.children.len() == 1 {
                    self.root = node.children[0];
                    store.free_page(new_root);
                } else {
                    self.root = new_root;
                }
                Ok(true)
            }
        }
    }

    fn set_in<S: PageStore>(
        store: &mut S,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> Result<SetOutcome> {
        let node = Node::read(store, page_id)?;
        if node.is_leaf {
            return Self::set_in_leaf(store, node, key, value);
        }
        let idx = node.child_index(key);
        let outcome = Self::set_in(store, node.children[idx], key, value)?;
        Self::apply_to_branch(store, node, idx, outcome)
    }

    fn set_in_leaf<S: PageStore>(
        store: &mut S,
        old: Node,
        key: &[u8],
        value: &[u8],
    ) -> Result<SetOutcome> {
        let mut node = old.clone_to(store.alloc_page());
        match node.search(key) {
            Ok(idx) => node.values[idx] = value.to_vec(),
            Err(idx) => {
                node.keys.insert(idx, key.to_vec());
                node.values.insert(idx, value.to_vec());
            }
        }

        let outcome = if node.fits(store.page_size()) {
            node.write(store)?;
            SetOutcome::Done(node.page_id)
        } else {
            Self::split_leaf(store, node)?
        };
        old.free_overflow(store)?;
        store.free_page(old.page_id);
        Ok(outcome)
    }

    fn split_leaf<S: PageStore>(store: &mut S, mut node: Node) -> Result<SetOutcome> {
        let mid = node.keys.len() / 2;
        let right_id = store.alloc_page();
        let mut right = Node::leaf(right_id);
        right.keys = node.keys.split_off(mid);
        right.values = node.values.split_off(mid);
        right.next_leaf = node.next_leaf;
        node.next_leaf = right_id;
        let separator = right.keys[0].clone();

        node.write(store)?;
        right.write(store)?;
        Ok(SetOutcome::Split {
            left: node.page_id,
            separator,
            right: right_id,
        })
    }

    fn apply_to_branch<S: PageStore>(
        store: &mut S,
        old: Node,
        idx: usize,
        outcome: SetOutcome,
    ) -> Result<SetOutcome> {
        let mut node = old.clone_to(store.alloc_page());
        match outcome {
            SetOutcome::Done(id) => node.children[idx] = id,
            SetOutcome::Split {
                left,
                separator,
                right,
            } => {
                node.children[idx] = left;
                node.keys.insert(idx, separator);
                node.children.insert(idx + 1, right);
            }
        }

        let outcome = if node.fits(store.page_size()) {
            node.write(store)?;
            SetOutcome::Done(node.page_id)
        } else {
            Self::split_branch(store, node)?
        };
        store.free_page(old.page_id);
        Ok(outcome)
    }

    fn split_branch<S: PageStore>(store: &mut S, mut node: Node) -> Result<SetOutcome> {
        let mid = node.keys.len() / 2;
        let right_id = store.alloc_page();
        let right_keys = node.keys.split_off(mid + 1);
        // The middle key is promoted, not kept on either side.
        let separator = node.keys.pop().expect("split of a branch without keys");
        let right_children = node.children.split_off(mid + 1);
        let right = Node::branch(right_id, right_keys, right_children);

        node.write(store)?;
        right.write(store)?;
        Ok(SetOutcome::Split {
            left: node.page_id,
            separator,
            right: right_id,
        })
    }

    fn delete_in<S: PageStore>(store: &mut S, page_id: PageId, key: &[u8]) -> Result<DeleteOutcome> {
        let node = Node::read(store, page_id)?;
        if node.is_leaf {
            let idx = match node.search(key) {
                Ok(idx) => idx,
                Err(_) => return Ok(DeleteOutcome::NotFound),
            };
            let mut replacement = node.clone_to(store.alloc_page());
            replacement.keys.remove(idx);
            replacement.values.remove(idx);
            replacement.write(store)?;
            node.free_overflow(store)?;
            store.free_page(node.page_id);
            return Ok(DeleteOutcome::Deleted(replacement.page_id));
        }

        let idx = node.child_index(key);
        match Self::delete_in(store, node.children[idx], key)? {
            DeleteOutcome::NotFound => Ok(DeleteOutcome::NotFound),
            DeleteOutcome::Deleted(child) => {
                let mut replacement = node.clone_to(store.alloc_page());
                replacement.children[idx] = child;
                replacement.write(store)?;
                store.free_page(node.page_id);
                Ok(DeleteOutcome::Deleted(replacement.page_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mem::MemPager;

    const PAGE_SIZE: usize = 4096;

    fn new_tree(store: &mut MemPager) -> Tree {
        Tree::create(store).unwrap()
    }

    #[test]
    fn get_on_empty_tree_returns_none() {
        let mut store = MemPager::new(PAGE_SIZE);
        let tree = new_tree(&mut store);

        assert!(tree.get(&store, b"missing").unwrap().is_none());
    }

    #[test]
    fn set_and_get_single_key() {
        let mut store = MemPager::new(PAGE_SIZE);
        let mut tree = new_tree(&mut store);

        tree.set(&mut store, b"hello", b"world").unwrap();

        assert_eq!(tree.get(&store, b"hello").unwrap(), Some(b"world".to_vec()));
        assert!(tree.get(&store, b"hell").unwrap().is_none());
    }

    #[test]
    fn set_replaces_existing_key() {
        let mut store = MemPager::new(PAGE_SIZE);
        let mut tree = new_tree(&mut store);

        tree.set(&mut store, b"k", b"v1").unwrap();
        tree.set(&mut store, b"k", b"v2").unwrap();

        assert_eq!(tree.get(&store, b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn splits_preserve_every_key() {
        let mut store = MemPager::new(PAGE_SIZE);
        let mut tree = new_tree(&mut store);

        for i in 0..500u32 {
            let key = format!("key{i:05}");
            let value = format!("value{i:05}");
            tree.set(&mut store, key.as_bytes(), value.as_bytes())
                .unwrap();
        }

        for i in 0..500u32 {
            let key = format!("key{i:05}");
            let expected = format!("value{i:05}");
            assert_eq!(
                tree.get(&store, key.as_bytes()).unwrap(),
                Some(expected.into_bytes()),
                "key {key} lost"
            );
        }
    }

    #[test]
    fn reverse_insertion_order_still_sorted() {
        let mut store = MemPager::new(PAGE_SIZE);
        let mut tree = new_tree(&mut store);

        for i in (0..200u32).rev() {
            let key = format!("key{i:05}");
            tree.set(&mut store, key.as_bytes(), b"x").unwrap();
        }

        for i in 0..200u32 {
            let key = format!("key{i:05}");
            assert!(tree.get(&store, key.as_bytes()).unwrap().is_some());
        }
    }

    #[test]
    fn delete_existing_and_missing() {
        let mut store = MemPager::new(PAGE_SIZE);
        let mut tree = new_tree(&mut store);

        tree.set(&mut store, b"a", b"1").unwrap();
        tree.set(&mut store, b"b", b"2").unwrap();

        assert!(tree.delete(&mut store, b"a").unwrap());
        assert!(!tree.delete(&mut store, b"a").unwrap());
        assert!(tree.get(&store, b"a").unwrap().is_none());
        assert_eq!(tree.get(&store, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn delete_after_splits() {
        let mut store = MemPager::new(PAGE_SIZE);
        let mut tree = new_tree(&mut store);

        for i in 0..300u32 {
            let key = format!("key{i:05}");
            tree.set(&mut store, key.as_bytes(), b"payload-payload").unwrap();
        }
        for i in (0..300u32).step_by(2) {
            let key = format!("key{i:05}");
            assert!(tree.delete(&mut store, key.as_bytes()).unwrap());
        }

        for i in 0..300u32 {
            let key = format!("key{i:05}");
            let got = tree.get(&store, key.as_bytes()).unwrap();
            if i % 2 == 0 {
                assert!(got.is_none());
            } else {
                assert!(got.is_some());
            }
        }
    }

    #[test]
    fn mutation_leaves_old_root_intact() {
        let mut store = MemPager::new(PAGE_SIZE);
        let mut tree = new_tree(&mut store);
        tree.set(&mut store, b"k", b"old").unwrap();

        let snapshot = Tree::new(tree.root);
        tree.set(&mut store, b"k", b"new").unwrap();

        // The pre-mutation tree is untouched; the rewrite went to new pages.
        assert_eq!(snapshot.get(&store, b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(tree.get(&store, b"k").unwrap(), Some(b"new".to_vec()));
        assert_ne!(snapshot.root, tree.root);
    }

    #[test]
    fn mutations_schedule_replaced_pages_for_reclaim() {
        let mut store = MemPager::new(PAGE_SIZE);
        let mut tree = new_tree(&mut store);
        let first_root = tree.root;

        tree.set(&mut store, b"k", b"v").unwrap();

        assert!(store.freed.contains(&first_root));
    }

    #[test]
    fn rejects_oversized_keys_and_values() {
        let mut store = MemPager::new(PAGE_SIZE);
        let mut tree = new_tree(&mut store);

        let huge_key = vec![1u8; PAGE_SIZE];
        assert!(matches!(
            tree.set(&mut store, &huge_key, b"v"),
            Err(Error::KeyTooLarge { .. })
        ));
    }
}
