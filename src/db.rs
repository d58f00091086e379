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

use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

use crate::config::Config;
use crate::error::Result;
use crate::service::{
    FailureDetector,
    FaultInjection,
    LocationService,
    NoFaults,
    Priority,
    Transport,
    Version,
    VersionFlags,
    VersionReply,
    VersionService,
};
use crate::shard::{FailureAwareRouter, LoadBalancer, ShardLocationCache};
use crate::txn::{Transaction, WatchManager};
use crate::version::ReadVersionBatcher;

/// Everything a database needs from its surroundings: the collaborator
/// services and the configuration.
#[derive(Clone)]
pub struct DatabaseEnv {
    transport: Arc<dyn Transport>,
    locator: Arc<dyn LocationService>,
    versions: Arc<dyn VersionService>,
    detector: Arc<dyn FailureDetector>,
    faults: Arc<dyn FaultInjection>,
    config: Config,
}

impl DatabaseEnv {
    pub fn new(
        transport: Arc<dyn Transport>,
        locator: Arc<dyn LocationService>,
        versions: Arc<dyn VersionService>,
        detector: Arc<dyn FailureDetector>,
    ) -> Self {
        Self { transport, locator, versions, detector, faults: Arc::new(NoFaults), config: Config::new() }
    }

    pub fn with_config(self, config: Config) -> Self {
        Self { config, ..self }
    }

    pub fn with_fault_injection(self, faults: Arc<dyn FaultInjection>) -> Self {
        Self { faults, ..self }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

struct DatabaseState {
    config: Config,
    router: FailureAwareRouter,
    balancer: LoadBalancer,
    versions: Arc<dyn VersionService>,
    watches: WatchManager,
    batchers: Mutex<HashMap<(Priority, VersionFlags), ReadVersionBatcher>>,
    /// Raised by every read version and commit version observed; versions
    /// below it are known stale.
    min_acceptable_version: Mutex<Version>,
}

/// Process-wide handle to one cluster: the shared location cache, the
/// router on top of it, per-class read version batchers and the watch
/// index. Cheap to clone; every transaction opened from a clone shares the
/// same state.
#[derive(Clone)]
pub struct Database {
    state: Arc<DatabaseState>,
}

impl Database {
    pub fn open(env: DatabaseEnv) -> Self {
        let config = env.config;
        let cache = Arc::new(ShardLocationCache::new(config.location_cache_size, config.max_eviction_attempts));
        let router = FailureAwareRouter::new(cache, env.locator, env.detector.clone(), config.max_shards_per_resolve);
        let balancer = LoadBalancer::new(env.transport, env.detector, env.faults);
        let watches = WatchManager::new(config.max_watches);
        let state = DatabaseState {
            router,
            balancer,
            versions: env.versions,
            watches,
            batchers: Mutex::new(HashMap::new()),
            min_acceptable_version: Mutex::new(Version::ZERO),
            config,
        };
        Self { state: Arc::new(state) }
    }

    /// Opens a transaction against this database.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    #[inline]
    pub(crate) fn router(&self) -> &FailureAwareRouter {
        &self.state.router
    }

    #[inline]
    pub(crate) fn balancer(&self) -> &LoadBalancer {
        &self.state.balancer
    }

    #[inline]
    pub(crate) fn watches(&self) -> &WatchManager {
        &self.state.watches
    }

    /// Outstanding watch entries in the process-wide index.
    pub fn outstanding_watches(&self) -> usize {
        self.state.watches.outstanding()
    }

    /// Shadow verification mismatches observed so far.
    pub fn shadow_mismatches(&self) -> u64 {
        self.state.balancer.shadow_mismatches()
    }

    /// A read version through the batcher of the given class, started on
    /// first use.
    pub(crate) async fn read_version(&self, priority: Priority, flags: VersionFlags) -> Result<VersionReply> {
        let batcher = {
            let mut batchers = self.state.batchers.lock().unwrap();
            batchers
                .entry((priority, flags))
                .or_insert_with(|| {
                    ReadVersionBatcher::start(
                        self.state.versions.clone(),
                        priority,
                        flags,
                        self.state.config.grv_batch_size,
                        self.state.config.grv_batch_timeout,
                    )
                })
                .clone()
        };
        let reply = batcher.get_read_version().await?;
        self.observe_version(reply.version);
        Ok(reply)
    }

    /// Versions below this one are known stale; any fresher result is
    /// acceptable.
    pub fn minimum_acceptable_version(&self) -> Version {
        *self.state.min_acceptable_version.lock().unwrap()
    }

    pub(crate) fn observe_version(&self, version: Version) {
        if !version.is_valid() {
            return;
        }
        let mut min = self.state.min_acceptable_version.lock().unwrap();
        if version > *min {
            *min = version;
        }
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use crate::service::{MemoryCluster, Version};

    #[test_log::test(tokio::test)]
    async fn test_database_read_version_observes_minimum() {
        let cluster = MemoryCluster::new();
        let db = cluster.database();
        assert_that!(db.minimum_acceptable_version()).is_equal_to(Version::ZERO);

        let reply = db.read_version(crate::service::Priority::Default, 0).await.unwrap();
        assert_that!(reply.version.is_valid()).is_true();
        assert_that!(db.minimum_acceptable_version()).is_equal_to(reply.version);
    }

    #[test_log::test(tokio::test)]
    async fn test_database_batchers_per_class() {
        let cluster = MemoryCluster::new();
        let db = cluster.database();

        let (r1, r2) = tokio::join!(
            db.read_version(crate::service::Priority::Default, 0),
            db.read_version(crate::service::Priority::Immediate, 0)
        );
        r1.unwrap();
        r2.unwrap();
        // Distinct classes flush through distinct upstream calls.
        assert_that!(cluster.grv_calls()).is_equal_to(2);
    }
}
