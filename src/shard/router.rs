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

use std::sync::Arc;

use tracing::debug;

use crate::cluster::NodeSet;
use crate::error::Result;
use crate::service::{FailureDetector, LocationService};
use crate::shard::ShardLocationCache;
use crate::span::KeyRange;

/// A shard and the nodes believed to serve it.
#[derive(Clone, Debug)]
pub struct ShardLocation {
    pub range: KeyRange,
    pub nodes: Arc<NodeSet>,
}

/// Resolves keys and ranges to serving nodes through the location cache,
/// falling back to the location service on misses and on entries whose
/// nodes are all known dead.
///
/// The router resolves once per call. Per-call failure signals are the
/// caller's to handle: invalidate the affected entry and resolve again.
pub struct FailureAwareRouter {
    cache: Arc<ShardLocationCache>,
    locator: Arc<dyn LocationService>,
    detector: Arc<dyn FailureDetector>,
    max_shards: usize,
}

impl FailureAwareRouter {
    pub fn new(
        cache: Arc<ShardLocationCache>,
        locator: Arc<dyn LocationService>,
        detector: Arc<dyn FailureDetector>,
        max_shards: usize,
    ) -> Self {
        Self { cache, locator, detector, max_shards: max_shards.max(1) }
    }

    pub fn cache(&self) -> &Arc<ShardLocationCache> {
        &self.cache
    }

    /// The shard serving `key`, or with `reverse` the shard serving the
    /// keys strictly before it.
    pub async fn resolve_key(&self, key: &[u8], reverse: bool) -> Result<ShardLocation> {
        let (range, cached) = if reverse { self.cache.lookup_before(key) } else { self.cache.lookup(key) };
        if let Some(nodes) = cached {
            if !self.all_failed(&nodes) {
                return Ok(ShardLocation { range, nodes });
            }
        }
        let resolved = self.locator.resolve_key(key, reverse).await?;
        debug!("resolved key {:?} to shard {}", key, resolved.range);
        let nodes = Arc::new(resolved.nodes);
        self.cache.insert(resolved.range.clone(), Some(nodes.clone()));
        Ok(ShardLocation { range: resolved.range, nodes })
    }

    /// The covering shard sequence of `range` in order, capped at the
    /// per-call shard limit. Callers that cannot drain the sequence
    /// re-invoke for the remainder; full coverage in one call is not part
    /// of the contract.
    pub async fn resolve_range(&self, range: &KeyRange, reverse: bool) -> Result<Vec<ShardLocation>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        if !reverse {
            if let Some(locations) = self.cached_range(range) {
                return Ok(locations);
            }
        }
        let resolved = self.locator.resolve_range(range.clone(), self.max_shards, reverse).await?;
        debug!("resolved range {} to {} shards", range, resolved.len());
        let mut locations = Vec::with_capacity(resolved.len());
        for shard in resolved {
            let nodes = Arc::new(shard.nodes);
            self.cache.insert(shard.range.clone(), Some(nodes.clone()));
            locations.push(ShardLocation { range: shard.range, nodes });
        }
        Ok(locations)
    }

    pub fn invalidate(&self, key: &[u8], backward: bool) {
        self.cache.invalidate(key, backward);
    }

    pub fn invalidate_range(&self, range: &KeyRange) {
        self.cache.invalidate_range(range);
    }

    fn cached_range(&self, range: &KeyRange) -> Option<Vec<ShardLocation>> {
        let entries = self.cache.lookup_range(range, self.max_shards);
        let covered = match entries.last() {
            None => return None,
            Some((last, _)) => last.end >= range.end || entries.len() == self.max_shards,
        };
        if !covered {
            return None;
        }
        let mut locations = Vec::with_capacity(entries.len());
        for (range, nodes) in entries {
            let nodes = nodes?;
            if self.all_failed(&nodes) {
                return None;
            }
            locations.push(ShardLocation { range, nodes });
        }
        Some(locations)
    }

    fn all_failed(&self, nodes: &NodeSet) -> bool {
        !nodes.is_empty() && nodes.iter().all(|node| self.detector.is_failed(node))
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;
    use crate::cluster::NodeId;
    use crate::keys;
    use crate::service::MemoryCluster;

    fn router(cluster: &MemoryCluster) -> FailureAwareRouter {
        FailureAwareRouter::new(
            Arc::new(ShardLocationCache::new(1000, 10)),
            cluster.locator(),
            cluster.failure_detector(),
            8,
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_router_caches_resolution() {
        let cluster = MemoryCluster::new();
        let router = router(&cluster);

        let first = router.resolve_key(b"a", false).await.unwrap();
        assert_that!(cluster.location_lookups()).is_equal_to(1);

        let second = router.resolve_key(b"a", false).await.unwrap();
        assert_that!(cluster.location_lookups()).is_equal_to(1);
        assert_that!(Arc::ptr_eq(&first.nodes, &second.nodes)).is_true();
    }

    #[test_log::test(tokio::test)]
    async fn test_router_invalidation_forces_miss() {
        let cluster = MemoryCluster::new();
        let router = router(&cluster);

        router.resolve_key(b"a", false).await.unwrap();
        router.invalidate(b"a", false);
        router.resolve_key(b"a", false).await.unwrap();
        assert_that!(cluster.location_lookups()).is_equal_to(2);
    }

    #[test_log::test(tokio::test)]
    async fn test_router_skips_all_failed_entries() {
        let cluster = MemoryCluster::new();
        let router = router(&cluster);

        router.resolve_key(b"a", false).await.unwrap();
        cluster.fail_node("node-0");
        cluster.add_node("node-1");
        cluster.assign(KeyRange::all(), vec![NodeId::new("node-1")]);

        let resolved = router.resolve_key(b"a", false).await.unwrap();
        assert_that!(cluster.location_lookups()).is_equal_to(2);
        assert_that!(resolved.nodes.first().unwrap().as_ref()).is_equal_to("node-1");
    }

    #[test_log::test(tokio::test)]
    async fn test_router_resolves_range_per_shard() {
        let cluster = MemoryCluster::new();
        cluster.split(b"m");
        let router = router(&cluster);

        let range = KeyRange::new(b"a".to_vec(), b"z".to_vec());
        let locations = router.resolve_range(&range, false).await.unwrap();
        assert_that!(locations.len()).is_equal_to(2);
        assert_that!(locations[0].range.end).is_equal_to(b"m".to_vec());
        assert_that!(cluster.location_lookups()).is_equal_to(1);

        let cached = router.resolve_range(&range, false).await.unwrap();
        assert_that!(cached.len()).is_equal_to(2);
        assert_that!(cluster.location_lookups()).is_equal_to(1);
    }

    #[test_log::test(tokio::test)]
    async fn test_router_reverse_resolves_predecessor() {
        let cluster = MemoryCluster::new();
        cluster.split(b"m");
        let router = router(&cluster);

        let resolved = router.resolve_key(b"m", true).await.unwrap();
        assert_that!(resolved.range).is_equal_to(KeyRange::new(b"".to_vec(), b"m".to_vec()));

        let resolved = router.resolve_key(b"z", true).await.unwrap();
        assert_that!(resolved.range).is_equal_to(KeyRange::new(b"m".to_vec(), keys::MAX_KEY.to_vec()));
    }
}
