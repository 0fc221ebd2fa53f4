//! Memoization of witness-search outcomes.
//!
//! The cache records, per contracted-candidate node x, whether the shortcut
//! for a (u, x, v) triple was decided necessary or unnecessary, so repeated
//! cost simulations of the same node skip the search. Entries are reasoning
//! shortcuts, not authoritative: absence always triggers a real witness
//! search, and entries must be invalidated as soon as the sub-paths they
//! reasoned about change.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::graph::NodeId;
use crate::witness::ShortcutStatus;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("duplicate witness cache entry for triple ({u}, {x}, {v})")]
    DuplicateEntry { u: NodeId, x: NodeId, v: NodeId },
}

/// A decided (u, x, v) triple. Undecided triples are simply absent.
#[derive(Debug, Clone, Copy)]
pub struct WitnessCacheEntry {
    pub status: ShortcutStatus,
    pub complexity: u32,
    pub u: NodeId,
    pub x: NodeId,
    pub v: NodeId,
}

/// One map per node x, keyed by the (u, v) endpoints. At most one entry per
/// triple.
#[derive(Debug)]
pub struct WitnessCache {
    data: Vec<FxHashMap<(NodeId, NodeId), WitnessCacheEntry>>,
}

impl WitnessCache {
    pub fn new(n_nodes: usize) -> Self {
        WitnessCache { data: vec![FxHashMap::default(); n_nodes] }
    }

    pub fn lookup(&self, u: NodeId, x: NodeId, v: NodeId) -> Option<&WitnessCacheEntry> {
        self.data[x as usize].get(&(u, v))
    }

    pub fn insert(&mut self, entry: WitnessCacheEntry) -> Result<(), CacheError> {
        let key = (entry.u, entry.v);
        let slot = &mut self.data[entry.x as usize];
        if slot.contains_key(&key) {
            debug_assert!(false, "duplicate witness cache entry");
            return Err(CacheError::DuplicateEntry { u: entry.u, x: entry.x, v: entry.v });
        }
        slot.insert(key, entry);
        Ok(())
    }

    /// Drop every entry for x (x itself was contracted).
    pub fn remove_node(&mut self, x: NodeId) {
        self.data[x as usize] = FxHashMap::default();
    }

    /// Drop entries for x whose endpoints match; `None` matches any node.
    /// Used to invalidate triples whose underlying sub-paths changed.
    pub fn remove_matching(&mut self, u: Option<NodeId>, x: NodeId, v: Option<NodeId>) {
        self.data[x as usize].retain(|&(eu, ev), _| {
            !(u.map_or(true, |u| u == eu) && v.map_or(true, |v| v == ev))
        });
    }

    #[cfg(test)]
    fn len(&self, x: NodeId) -> usize {
        self.data[x as usize].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(u: NodeId, x: NodeId, v: NodeId) -> WitnessCacheEntry {
        WitnessCacheEntry { status: ShortcutStatus::Necessary, complexity: 1, u, x, v }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut cache = WitnessCache::new(4);
        cache.insert(entry(0, 1, 2)).unwrap();

        let hit = cache.lookup(0, 1, 2).unwrap();
        assert_eq!(hit.status, ShortcutStatus::Necessary);
        assert!(cache.lookup(2, 1, 0).is_none());
        assert!(cache.lookup(0, 2, 2).is_none());
    }

    #[test]
    fn test_duplicate_insert_is_error() {
        let mut cache = WitnessCache::new(4);
        cache.insert(entry(0, 1, 2)).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.insert(entry(0, 1, 2))
        }));
        // debug builds assert; release builds report the error
        match result {
            Ok(inner) => assert!(matches!(inner, Err(CacheError::DuplicateEntry { .. }))),
            Err(_) => {}
        }
    }

    #[test]
    fn test_remove_node() {
        let mut cache = WitnessCache::new(4);
        cache.insert(entry(0, 1, 2)).unwrap();
        cache.insert(entry(3, 1, 2)).unwrap();
        cache.remove_node(1);
        assert_eq!(cache.len(1), 0);
    }

    #[test]
    fn test_remove_matching_wildcards() {
        let mut cache = WitnessCache::new(5);
        cache.insert(entry(0, 1, 2)).unwrap();
        cache.insert(entry(0, 1, 3)).unwrap();
        cache.insert(entry(4, 1, 2)).unwrap();

        // any u, v == 2
        cache.remove_matching(None, 1, Some(2));
        assert_eq!(cache.len(1), 1);
        assert!(cache.lookup(0, 1, 3).is_some());

        // u == 0, any v
        cache.remove_matching(Some(0), 1, None);
        assert_eq!(cache.len(1), 0);
    }
}
