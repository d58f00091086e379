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

use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cluster::NodeSet;
use crate::error::{Error, Result};
use crate::service::{
    CommitOutcome,
    CommitRequest,
    FailureDetector,
    FaultInjection,
    FaultPoint,
    StorageNode,
    Transport,
};

/// Delivery discipline of one balanced call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallMode {
    /// Idempotent request; alternatives may be tried freely.
    Balanced,
    /// Non-idempotent request; once delivery becomes uncertain the call
    /// resolves with that uncertainty instead of retrying.
    AtMostOnce,
}

/// Issues a request against one node of a candidate set, preferring healthy
/// nodes in set order and failing over between alternatives.
///
/// Routing failures resolve as [`Error::WrongShard`] or
/// [`Error::AllAlternativesFailed`]; the caller invalidates the affected
/// cache entry, backs off briefly and re-routes. This component never
/// retries a request whose delivery is uncertain.
pub struct LoadBalancer {
    transport: Arc<dyn Transport>,
    detector: Arc<dyn FailureDetector>,
    faults: Arc<dyn FaultInjection>,
    shadow_mismatches: Arc<AtomicU64>,
}

impl LoadBalancer {
    pub fn new(transport: Arc<dyn Transport>, detector: Arc<dyn FailureDetector>, faults: Arc<dyn FaultInjection>) -> Self {
        Self { transport, detector, faults, shadow_mismatches: Arc::new(AtomicU64::new(0)) }
    }

    /// Correctness signals reported by shadow verification so far.
    pub fn shadow_mismatches(&self) -> u64 {
        self.shadow_mismatches.load(Ordering::Relaxed)
    }

    pub async fn storage_call<R, F, Fut>(&self, nodes: &NodeSet, mode: CallMode, op: F) -> Result<R>
    where
        F: Fn(Arc<dyn StorageNode>) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Clone + PartialEq + Debug + Send + Sync + 'static,
    {
        if let Some(error) = self.faults.inject(FaultPoint::StorageRequest) {
            return Err(error);
        }
        let mut candidates: Vec<_> = nodes.iter().filter(|node| !self.detector.is_failed(node)).collect();
        if candidates.is_empty() {
            // Nothing believed alive; the detector may be wrong, so try
            // the full set before giving up.
            candidates = nodes.iter().collect();
        }
        for node in candidates {
            let handle = match self.transport.storage_node(node) {
                Ok(handle) => handle,
                Err(error) => {
                    debug!("skipping node {node}: {error}");
                    continue;
                },
            };
            match op(handle).await {
                Ok(reply) => {
                    self.shadow_verify(nodes, &op, &reply);
                    return Ok(reply);
                },
                Err(error @ Error::WrongShard { .. }) => return Err(error),
                Err(Error::NodeNotAvailable { node }) => {
                    debug!("node {node} not available, trying next alternative");
                    continue;
                },
                Err(Error::RequestMaybeDelivered) => match mode {
                    CallMode::AtMostOnce => return Err(Error::RequestMaybeDelivered),
                    CallMode::Balanced => continue,
                },
                Err(error) => return Err(error),
            }
        }
        Err(Error::AllAlternativesFailed)
    }

    /// Submits a commit to one healthy commit proxy, at most once. A proxy
    /// that rejected the request outright is safe to skip; anything past
    /// that point resolves as delivered or uncertain, never retried here.
    pub async fn commit_call(&self, request: CommitRequest) -> Result<CommitOutcome> {
        if let Some(error) = self.faults.inject(FaultPoint::CommitSubmit) {
            return Err(error);
        }
        let proxies = self.transport.commit_proxies();
        let mut candidates: Vec<_> = proxies.iter().filter(|node| !self.detector.is_failed(node)).collect();
        if candidates.is_empty() {
            candidates = proxies.iter().collect();
        }
        for node in candidates {
            let proxy = match self.transport.commit_proxy(node) {
                Ok(proxy) => proxy,
                Err(error) => {
                    debug!("skipping commit proxy {node}: {error}");
                    continue;
                },
            };
            match proxy.commit(request.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(Error::NodeNotAvailable { node }) => {
                    debug!("commit proxy {node} rejected the request, trying next");
                    continue;
                },
                Err(error) => return Err(error),
            }
        }
        Err(Error::AllAlternativesFailed)
    }

    /// Fires a duplicate of the request at the set's verification node and
    /// compares replies, without touching the primary result.
    fn shadow_verify<R, F, Fut>(&self, nodes: &NodeSet, op: &F, reply: &R)
    where
        F: Fn(Arc<dyn StorageNode>) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Clone + PartialEq + Debug + Send + Sync + 'static,
    {
        let Some(verifier) = nodes.verifier() else {
            return;
        };
        let Ok(handle) = self.transport.storage_node(verifier) else {
            return;
        };
        let shadow = op(handle);
        let expected = reply.clone();
        let verifier = verifier.clone();
        let mismatches = self.shadow_mismatches.clone();
        tokio::spawn(async move {
            match shadow.await {
                Ok(reply) if reply == expected => {},
                Ok(reply) => {
                    warn!("shadow mismatch from {verifier}: primary {expected:?}, shadow {reply:?}");
                    mismatches.fetch_add(1, Ordering::Relaxed);
                },
                // A failed shadow carries no verdict.
                Err(_) => {},
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assertor::*;

    use super::*;
    use crate::cluster::NodeId;
    use crate::service::{MemoryCluster, NoFaults, ScriptedFaults, Version};
    use crate::span::KeyRange;

    fn balancer(cluster: &MemoryCluster) -> LoadBalancer {
        LoadBalancer::new(cluster.transport(), cluster.failure_detector(), Arc::new(NoFaults))
    }

    #[test_log::test(tokio::test)]
    async fn test_call_prefers_first_healthy_node() {
        let cluster = MemoryCluster::new();
        cluster.add_node("node-1");
        cluster.assign(KeyRange::all(), vec![NodeId::new("node-0"), NodeId::new("node-1")]);
        cluster.force_write(b"k".to_vec(), b"v".as_slice());

        let balancer = balancer(&cluster);
        let nodes = NodeSet::new([NodeId::new("node-0"), NodeId::new("node-1")]);
        let key = b"k".to_vec();
        let value = balancer
            .storage_call(&nodes, CallMode::Balanced, move |node| {
                let key = key.clone();
                async move { node.get(&key, Version::LATEST).await }
            })
            .await
            .unwrap();
        assert_that!(value.unwrap().as_ref()).is_equal_to(b"v".as_slice());
    }

    #[test_log::test(tokio::test)]
    async fn test_call_fails_over_to_alternative() {
        let cluster = MemoryCluster::new();
        cluster.add_node("node-1");
        cluster.assign(KeyRange::all(), vec![NodeId::new("node-0"), NodeId::new("node-1")]);
        cluster.force_write(b"k".to_vec(), b"v".as_slice());
        cluster.fail_node("node-0");

        let balancer = balancer(&cluster);
        let nodes = NodeSet::new([NodeId::new("node-0"), NodeId::new("node-1")]);
        let key = b"k".to_vec();
        let value = balancer
            .storage_call(&nodes, CallMode::Balanced, move |node| {
                let key = key.clone();
                async move { node.get(&key, Version::LATEST).await }
            })
            .await
            .unwrap();
        assert_that!(value.unwrap().as_ref()).is_equal_to(b"v".as_slice());
    }

    #[test_log::test(tokio::test)]
    async fn test_call_all_alternatives_failed() {
        let cluster = MemoryCluster::new();
        cluster.fail_node("node-0");

        let balancer = balancer(&cluster);
        let nodes = NodeSet::new([NodeId::new("node-0")]);
        let result = balancer
            .storage_call(&nodes, CallMode::Balanced, |node| async move { node.get(b"k", Version::LATEST).await })
            .await;
        match result {
            Err(Error::AllAlternativesFailed) => {},
            r => panic!("expect all alternatives failed, got {r:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_call_wrong_shard_propagates() {
        let cluster = MemoryCluster::new();
        cluster.add_node("node-1");
        cluster.assign(KeyRange::new(b"m".to_vec(), crate::keys::MAX_KEY.to_vec()), vec![NodeId::new("node-1")]);

        let balancer = balancer(&cluster);
        let nodes = NodeSet::new([NodeId::new("node-0")]);
        let result = balancer
            .storage_call(&nodes, CallMode::Balanced, |node| async move { node.get(b"z", Version::LATEST).await })
            .await;
        match result {
            Err(Error::WrongShard { key }) => assert_that!(key).is_equal_to(b"z".to_vec()),
            r => panic!("expect wrong shard, got {r:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_commit_maybe_delivered_not_retried() {
        let cluster = MemoryCluster::new();
        let faults = Arc::new(ScriptedFaults::new());
        faults.push(FaultPoint::CommitSubmit, Error::RequestMaybeDelivered);
        let balancer = LoadBalancer::new(cluster.transport(), cluster.failure_detector(), faults);

        let request = CommitRequest {
            id: uuid::Uuid::new_v4(),
            mutations: Vec::new(),
            read_conflicts: Vec::new(),
            write_conflicts: Vec::new(),
            read_version: cluster.current_version(),
            lock_aware: false,
            tags: Vec::new(),
        };
        match balancer.commit_call(request).await {
            Err(Error::RequestMaybeDelivered) => {},
            r => panic!("expect request maybe delivered, got {r:?}"),
        }
        assert_that!(cluster.commit_calls()).is_equal_to(0);
    }

    #[test_log::test(tokio::test)]
    async fn test_shadow_mismatch_reported() {
        let cluster = MemoryCluster::new();
        cluster.add_node("verifier-0");
        cluster.poison_node("verifier-0");
        cluster.force_write(b"k".to_vec(), b"v".as_slice());
        cluster.assign_with_verifier(KeyRange::all(), vec![NodeId::new("node-0")], Some(NodeId::new("verifier-0")));

        let balancer = balancer(&cluster);
        let nodes = NodeSet::new([NodeId::new("node-0")]).with_verifier(NodeId::new("verifier-0"));
        let key = b"k".to_vec();
        let value = balancer
            .storage_call(&nodes, CallMode::Balanced, move |node| {
                let key = key.clone();
                async move { node.get(&key, Version::LATEST).await }
            })
            .await
            .unwrap();
        assert_that!(value.unwrap().as_ref()).is_equal_to(b"v".as_slice());

        for _ in 0..100 {
            if balancer.shadow_mismatches() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_that!(balancer.shadow_mismatches()).is_equal_to(1);
    }
}
