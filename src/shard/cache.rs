// Copyright 2026 The QuiltKV Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rand::Rng;
use static_assertions::assert_impl_all;
use tracing::trace;

use crate::cluster::NodeSet;
use crate::keys;
use crate::span::KeyRange;

/// Interval map from key ranges to the node sets believed to serve them.
///
/// Entries always tile the whole key space: an entry starts at its map key
/// and ends at the next entry's key, the first entry starts at the empty
/// key and the last one ends at [`keys::MAX_KEY`]. `None` marks a range
/// whose assignment is unknown and must be asked from the location service.
/// Exceeding the entry cap evicts random ranges back to unknown.
#[derive(Debug)]
pub struct ShardLocationCache {
    state: Mutex<BTreeMap<Vec<u8>, Option<Arc<NodeSet>>>>,
    capacity: usize,
    max_eviction_attempts: usize,
}

assert_impl_all!(ShardLocationCache: Send, Sync);

impl ShardLocationCache {
    pub fn new(capacity: usize, max_eviction_attempts: usize) -> Self {
        let mut state = BTreeMap::new();
        state.insert(Vec::new(), None);
        Self { state: Mutex::new(state), capacity: capacity.max(1), max_eviction_attempts }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    /// The cached entry covering `key`.
    pub fn lookup(&self, key: &[u8]) -> (KeyRange, Option<Arc<NodeSet>>) {
        let state = self.state.lock().unwrap();
        Self::entry_at(&state, key)
    }

    /// The cached entry covering keys strictly before `key`, for reverse
    /// scans and exclusive boundaries.
    pub fn lookup_before(&self, key: &[u8]) -> (KeyRange, Option<Arc<NodeSet>>) {
        let state = self.state.lock().unwrap();
        let begin = match state
            .range::<[u8], _>((std::ops::Bound::Unbounded, std::ops::Bound::Excluded(key)))
            .next_back()
        {
            Some((begin, _)) => begin.clone(),
            None => Vec::new(),
        };
        Self::entry_at(&state, &begin)
    }

    /// Cached entries intersecting `range` in order, at most `limit` of
    /// them. Entry ranges are not clipped to `range`.
    pub fn lookup_range(&self, range: &KeyRange, limit: usize) -> Vec<(KeyRange, Option<Arc<NodeSet>>)> {
        let state = self.state.lock().unwrap();
        let mut entries = Vec::new();
        let (mut cursor, _) = Self::entry_at(&state, &range.begin);
        loop {
            if entries.len() >= limit || cursor.begin >= range.end {
                break;
            }
            let value = state.get(&cursor.begin).cloned().flatten();
            entries.push((cursor.clone(), value));
            if cursor.end.as_slice() >= keys::MAX_KEY {
                break;
            }
            (cursor, _) = Self::entry_at(&state, &cursor.end.clone());
        }
        entries
    }

    /// Installs `nodes` as the assignment of exactly `range`, splitting and
    /// merging neighbors to keep the space tiled, then evicts while over
    /// capacity.
    pub fn insert(&self, range: KeyRange, nodes: Option<Arc<NodeSet>>) {
        if range.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        Self::overwrite(&mut state, range, nodes);

        let mut attempts = 0;
        while state.len() > self.capacity && attempts < self.max_eviction_attempts {
            Self::evict_one(&mut state);
            attempts += 1;
        }
    }

    /// Forgets the assignment covering `key`; with `backward` the one
    /// covering the key's predecessor.
    pub fn invalidate(&self, key: &[u8], backward: bool) {
        let range = if backward { self.lookup_before(key).0 } else { self.lookup(key).0 };
        trace!("invalidating location cache range {range}");
        let mut state = self.state.lock().unwrap();
        Self::overwrite(&mut state, range, None);
    }

    /// Forgets every assignment intersecting `range`.
    pub fn invalidate_range(&self, range: &KeyRange) {
        if range.is_empty() {
            return;
        }
        let (first, _) = self.lookup(&range.begin);
        let (last, _) = self.lookup_before(&range.end);
        let covering = KeyRange::new(first.begin, std::cmp::max(last.end, range.end.clone()));
        trace!("invalidating location cache range {covering}");
        let mut state = self.state.lock().unwrap();
        Self::overwrite(&mut state, covering, None);
    }

    /// Entry ranges in order, for diagnostics.
    pub fn ranges(&self) -> Vec<KeyRange> {
        let state = self.state.lock().unwrap();
        let mut ranges = Vec::with_capacity(state.len());
        let mut iter = state.keys().peekable();
        while let Some(begin) = iter.next() {
            let end = iter.peek().map(|next| next.to_vec()).unwrap_or_else(|| keys::MAX_KEY.to_vec());
            ranges.push(KeyRange::new(begin.clone(), end));
        }
        ranges
    }

    fn entry_at(
        state: &BTreeMap<Vec<u8>, Option<Arc<NodeSet>>>,
        key: &[u8],
    ) -> (KeyRange, Option<Arc<NodeSet>>) {
        let key = std::cmp::min(key, keys::MAX_KEY);
        let (begin, value) = state
            .range::<[u8], _>((std::ops::Bound::Unbounded, std::ops::Bound::Included(key)))
            .next_back()
            .map(|(begin, value)| (begin.clone(), value.clone()))
            .unwrap_or_default();
        let end = state
            .range::<[u8], _>((std::ops::Bound::Excluded(begin.as_slice()), std::ops::Bound::Unbounded))
            .next()
            .map(|(next, _)| next.clone())
            .unwrap_or_else(|| keys::MAX_KEY.to_vec());
        (KeyRange::new(begin, end), value)
    }

    fn overwrite(state: &mut BTreeMap<Vec<u8>, Option<Arc<NodeSet>>>, range: KeyRange, value: Option<Arc<NodeSet>>) {
        let mut range = range;
        if range.end.as_slice() > keys::MAX_KEY {
            range.end = keys::MAX_KEY.to_vec();
        }
        if range.is_empty() {
            return;
        }
        if range.end.as_slice() < keys::MAX_KEY {
            let (tail_begin, tail_value) = state
                .range::<[u8], _>((std::ops::Bound::Unbounded, std::ops::Bound::Included(range.end.as_slice())))
                .next_back()
                .map(|(begin, value)| (begin.clone(), value.clone()))
                .expect("location cache lost its origin entry");
            if tail_begin != range.end {
                state.insert(range.end.clone(), tail_value);
            }
        }
        let covered: Vec<Vec<u8>> =
            state.range(range.begin.clone()..range.end.clone()).map(|(begin, _)| begin.clone()).collect();
        for begin in covered {
            state.remove(&begin);
        }
        state.insert(range.begin.clone(), value);
        Self::coalesce(state, &range.begin);
        Self::coalesce(state, &range.end);
    }

    /// Merges the entry starting at `begin` into its predecessor when both
    /// hold the same assignment.
    fn coalesce(state: &mut BTreeMap<Vec<u8>, Option<Arc<NodeSet>>>, begin: &[u8]) {
        if begin.is_empty() {
            return;
        }
        let Some(value) = state.get(begin) else {
            return;
        };
        let Some((_, previous)) =
            state.range::<[u8], _>((std::ops::Bound::Unbounded, std::ops::Bound::Excluded(begin))).next_back()
        else {
            return;
        };
        let same = match (value, previous) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        if same {
            state.remove(begin);
        }
    }

    /// Drops one cached assignment by invalidating a random entry together
    /// with its left neighbor, whose merge shrinks the map.
    fn evict_one(state: &mut BTreeMap<Vec<u8>, Option<Arc<NodeSet>>>) {
        let len = state.len();
        if len < 2 {
            return;
        }
        let i = rand::thread_rng().gen_range(1..len);
        let begin = state.keys().nth(i).expect("indexed past location cache end").clone();
        let previous = state
            .range::<[u8], _>((std::ops::Bound::Unbounded, std::ops::Bound::Excluded(begin.as_slice())))
            .next_back()
            .map(|(key, _)| key.clone());
        trace!("evicting location cache entry at {begin:?}");
        state.insert(begin.clone(), None);
        if let Some(previous) = previous {
            state.insert(previous, None);
        }
        Self::coalesce(state, &begin);
        let next = state
            .range::<[u8], _>((std::ops::Bound::Excluded(begin.as_slice()), std::ops::Bound::Unbounded))
            .next()
            .map(|(key, _)| key.clone());
        if let Some(next) = next {
            Self::coalesce(state, &next);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use speculoos::prelude::*;

    use super::*;
    use crate::cluster::NodeId;

    fn nodes(name: &str) -> Option<Arc<NodeSet>> {
        Some(Arc::new(NodeSet::new([NodeId::new(name)])))
    }

    fn assert_tiled(cache: &ShardLocationCache) {
        let ranges = cache.ranges();
        assert_that!(ranges.first().unwrap().begin.as_slice()).is_equal_to(b"".as_slice());
        assert_that!(ranges.last().unwrap().end.as_slice()).is_equal_to(keys::MAX_KEY);
        for pair in ranges.windows(2) {
            assert_that!(pair[0].end).is_equal_to(pair[1].begin.clone());
            assert_that!(pair[0].is_empty()).is_false();
        }
    }

    #[test]
    fn test_cache_starts_unknown() {
        let cache = ShardLocationCache::new(100, 10);
        let (range, nodes) = cache.lookup(b"anything");
        assert_that!(range).is_equal_to(KeyRange::all());
        assert_that!(nodes.is_none()).is_true();
        assert_tiled(&cache);
    }

    #[test]
    fn test_cache_insert_splits_neighbors() {
        let cache = ShardLocationCache::new(100, 10);
        cache.insert(KeyRange::new(b"b".to_vec(), b"d".to_vec()), nodes("n1"));
        assert_tiled(&cache);

        let (range, found) = cache.lookup(b"c");
        assert_that!(range).is_equal_to(KeyRange::new(b"b".to_vec(), b"d".to_vec()));
        assert_that!(found.is_some()).is_true();

        let (range, found) = cache.lookup(b"a");
        assert_that!(range).is_equal_to(KeyRange::new(b"".to_vec(), b"b".to_vec()));
        assert_that!(found.is_none()).is_true();

        let (range, found) = cache.lookup(b"d");
        assert_that!(range).is_equal_to(KeyRange::new(b"d".to_vec(), keys::MAX_KEY.to_vec()));
        assert_that!(found.is_none()).is_true();
    }

    #[test]
    fn test_cache_insert_overwrites_covered() {
        let cache = ShardLocationCache::new(100, 10);
        cache.insert(KeyRange::new(b"b".to_vec(), b"d".to_vec()), nodes("n1"));
        cache.insert(KeyRange::new(b"c".to_vec(), b"f".to_vec()), nodes("n2"));
        assert_tiled(&cache);

        let (range, _) = cache.lookup(b"b");
        assert_that!(range).is_equal_to(KeyRange::new(b"b".to_vec(), b"c".to_vec()));
        let (range, _) = cache.lookup(b"e");
        assert_that!(range).is_equal_to(KeyRange::new(b"c".to_vec(), b"f".to_vec()));
    }

    #[test]
    fn test_cache_lookup_before() {
        let cache = ShardLocationCache::new(100, 10);
        cache.insert(KeyRange::new(b"b".to_vec(), b"d".to_vec()), nodes("n1"));

        let (range, _) = cache.lookup_before(b"d");
        assert_that!(range).is_equal_to(KeyRange::new(b"b".to_vec(), b"d".to_vec()));

        let (range, _) = cache.lookup_before(b"b");
        assert_that!(range).is_equal_to(KeyRange::new(b"".to_vec(), b"b".to_vec()));

        let (range, _) = cache.lookup_before(b"");
        assert_that!(range.begin.is_empty()).is_true();
    }

    #[test]
    fn test_cache_lookup_idempotent() {
        let cache = ShardLocationCache::new(100, 10);
        cache.insert(KeyRange::new(b"b".to_vec(), b"d".to_vec()), nodes("n1"));
        let (_, first) = cache.lookup(b"c");
        let (_, second) = cache.lookup(b"c");
        assert_that!(Arc::ptr_eq(&first.unwrap(), &second.unwrap())).is_true();
    }

    #[test]
    fn test_cache_invalidate() {
        let cache = ShardLocationCache::new(100, 10);
        cache.insert(KeyRange::new(b"b".to_vec(), b"d".to_vec()), nodes("n1"));
        cache.invalidate(b"c", false);
        assert_tiled(&cache);
        let (_, found) = cache.lookup(b"c");
        assert_that!(found.is_none()).is_true();
    }

    #[test]
    fn test_cache_invalidate_range() {
        let cache = ShardLocationCache::new(100, 10);
        cache.insert(KeyRange::new(b"b".to_vec(), b"d".to_vec()), nodes("n1"));
        cache.insert(KeyRange::new(b"d".to_vec(), b"f".to_vec()), nodes("n2"));
        cache.invalidate_range(&KeyRange::new(b"c".to_vec(), b"e".to_vec()));
        assert_tiled(&cache);
        assert_that!(cache.lookup(b"b").1.is_none()).is_true();
        assert_that!(cache.lookup(b"e").1.is_none()).is_true();
    }

    #[test]
    fn test_cache_lookup_range() {
        let cache = ShardLocationCache::new(100, 10);
        cache.insert(KeyRange::new(b"b".to_vec(), b"d".to_vec()), nodes("n1"));
        cache.insert(KeyRange::new(b"d".to_vec(), b"f".to_vec()), nodes("n2"));

        let entries = cache.lookup_range(&KeyRange::new(b"c".to_vec(), b"g".to_vec()), 10);
        assert_that!(entries.len()).is_equal_to(3);
        assert_that!(entries[0].0.begin).is_equal_to(b"b".to_vec());
        assert_that!(entries[2].1.is_none()).is_true();

        let capped = cache.lookup_range(&KeyRange::new(b"c".to_vec(), b"g".to_vec()), 2);
        assert_that!(capped.len()).is_equal_to(2);
    }

    #[test]
    fn test_cache_eviction_bound() {
        let capacity = 8;
        let cache = ShardLocationCache::new(capacity, 100);
        for i in 0..200u32 {
            let begin = format!("key-{i:04}").into_bytes();
            let end = format!("key-{i:04}x").into_bytes();
            cache.insert(KeyRange::new(begin, end), nodes("n"));
            assert_that!(cache.len()).is_less_than_or_equal_to(capacity + 1);
            assert_tiled(&cache);
        }
    }

    #[test]
    fn test_cache_tiling_under_random_ops() {
        let cache = ShardLocationCache::new(32, 100);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..2000 {
            let a = rng.gen_range(0u8..250);
            let b = rng.gen_range(0u8..250);
            let (begin, end) = if a <= b { (vec![a], vec![b + 1]) } else { (vec![b], vec![a]) };
            match rng.gen_range(0..3) {
                0 => cache.insert(KeyRange::new(begin, end), nodes("n")),
                1 => cache.insert(KeyRange::new(begin, end), None),
                _ => cache.invalidate_range(&KeyRange::new(begin, end)),
            }
            assert_tiled(&cache);
        }
    }
}
