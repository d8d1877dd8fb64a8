//! Ordered Prefix Index
//!
//! A thin semantic wrapper over an ordered map from raw byte keys to
//! [`ItemHandle`]s. Point lookups go through `find`/`insert`/`remove`;
//! multi-key operations use `search`, which walks the contiguous key range
//! sharing a prefix expression and returns a snapshot of the matches.
//!
//! Handing out a snapshot (rather than iterating live) is what gives
//! multi-key operations their traversal semantics: a callback that inserts
//! or removes keys can never be re-visited by its own traversal.

use crate::storage::pool::ItemHandle;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Ordered index of key -> item handle.
#[derive(Debug, Default)]
pub struct PrefixIndex {
    map: BTreeMap<Vec<u8>, ItemHandle>,
}

impl PrefixIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point lookup.
    pub fn find(&self, key: &[u8]) -> Option<ItemHandle> {
        self.map.get(key).copied()
    }

    /// Inserts a handle, returning the handle it displaced, if any.
    pub fn insert(&mut self, key: &[u8], handle: ItemHandle) -> Option<ItemHandle> {
        self.map.insert(key.to_vec(), handle)
    }

    /// Removes a key, returning the handle it held.
    pub fn remove(&mut self, key: &[u8]) -> Option<ItemHandle> {
        self.map.remove(key)
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Collects the `(key, handle)` pairs whose key starts with `expr`,
    /// in key order.
    ///
    /// `limit` bounds the number of matches (`-1` = unbounded) and keys
    /// longer than `max_key_len` are skipped. An empty expression matches
    /// every key.
    pub fn search(&self, expr: &[u8], limit: i64, max_key_len: usize) -> Vec<(Vec<u8>, ItemHandle)> {
        let mut out = Vec::new();

        for (key, handle) in self.prefix_range(expr) {
            if limit >= 0 && out.len() as i64 >= limit {
                break;
            }
            if key.len() > max_key_len {
                continue;
            }
            out.push((key.clone(), *handle));
        }

        out
    }

    /// Keys-only variant of [`search`](Self::search).
    pub fn search_keys(&self, expr: &[u8], limit: i64, max_key_len: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();

        for (key, _) in self.prefix_range(expr) {
            if limit >= 0 && out.len() as i64 >= limit {
                break;
            }
            if key.len() > max_key_len {
                continue;
            }
            out.push(key.clone());
        }

        out
    }

    /// The contiguous range of entries whose key starts with `expr`.
    fn prefix_range<'a>(
        &'a self,
        expr: &'a [u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a ItemHandle)> {
        self.map
            .range::<[u8], _>((Bound::Included(expr), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(keys: &[&[u8]]) -> PrefixIndex {
        let mut index = PrefixIndex::new();
        for (handle, key) in keys.iter().enumerate() {
            index.insert(key, handle);
        }
        index
    }

    #[test]
    fn test_point_ops() {
        let mut index = PrefixIndex::new();

        assert_eq!(index.insert(b"alpha", 1), None);
        assert_eq!(index.find(b"alpha"), Some(1));
        assert_eq!(index.len(), 1);

        // Replacement hands back the displaced handle
        assert_eq!(index.insert(b"alpha", 2), Some(1));
        assert_eq!(index.find(b"alpha"), Some(2));
        assert_eq!(index.len(), 1);

        assert_eq!(index.remove(b"alpha"), Some(2));
        assert_eq!(index.find(b"alpha"), None);
        assert!(index.is_empty());
        assert_eq!(index.remove(b"alpha"), None);
    }

    #[test]
    fn test_search_prefix() {
        let index = index_of(&[b"user:1", b"user:2", b"user:30", b"other"]);

        let hits = index.search(b"user:", -1, 1024);
        let keys: Vec<&[u8]> = hits.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"user:1"[..], &b"user:2"[..], &b"user:30"[..]]);

        // Exact key is itself a prefix match
        assert_eq!(index.search(b"user:1", -1, 1024).len(), 1);

        // No match
        assert!(index.search(b"zzz", -1, 1024).is_empty());
    }

    #[test]
    fn test_search_empty_expr_matches_all() {
        let index = index_of(&[b"a", b"b", b"c"]);
        assert_eq!(index.search(b"", -1, 1024).len(), 3);
    }

    #[test]
    fn test_search_limit() {
        let index = index_of(&[b"k:1", b"k:2", b"k:3", b"k:4"]);

        assert_eq!(index.search(b"k:", 2, 1024).len(), 2);
        assert_eq!(index.search(b"k:", 0, 1024).len(), 0);
        assert_eq!(index.search(b"k:", -1, 1024).len(), 4);
    }

    #[test]
    fn test_search_max_key_len() {
        let index = index_of(&[b"ab", b"abcdef"]);

        let hits = index.search(b"ab", -1, 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, b"ab");
    }

    #[test]
    fn test_search_keys_matches_search() {
        let index = index_of(&[b"p:a", b"p:b", b"q:c"]);

        let keys = index.search_keys(b"p:", -1, 1024);
        assert_eq!(keys, vec![b"p:a".to_vec(), b"p:b".to_vec()]);
    }

    #[test]
    fn test_search_is_ordered() {
        let index = index_of(&[b"m:3", b"m:1", b"m:2"]);
        let keys = index.search_keys(b"m:", -1, 1024);
        assert_eq!(keys, vec![b"m:1".to_vec(), b"m:2".to_vec(), b"m:3".to_vec()]);
    }
}
