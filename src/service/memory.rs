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

//! In-memory cluster implementing every collaborator interface: a versioned
//! store partitioned into movable shards, a location service, commit
//! proxies and a version issuer. Single process, no durability.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use ignore_result::Ignore;
use tokio::sync::watch;

use crate::cluster::{NodeId, NodeSet};
use crate::error::{Error, Result};
use crate::service::{
    AtomicOp,
    CommitOutcome,
    CommitRequest,
    CommitService,
    FailureDetector,
    FaultInjection,
    FaultPoint,
    KeyResolution,
    KeyValue,
    LocationService,
    Priority,
    RangeResult,
    ResolvedShard,
    StorageNode,
    Transport,
    Value,
    Version,
    VersionFlags,
    VersionReply,
    VersionService,
};
use crate::span::{KeyRange, KeySelector, RangeLimits};

#[derive(Clone, Debug)]
struct ShardAssignment {
    range: KeyRange,
    nodes: Vec<NodeId>,
    verifier: Option<NodeId>,
}

impl ShardAssignment {
    fn node_set(&self) -> NodeSet {
        let set = NodeSet::new(self.nodes.iter().cloned());
        match &self.verifier {
            Some(verifier) => set.with_verifier(verifier.clone()),
            None => set,
        }
    }

    fn serves(&self, node: &NodeId) -> bool {
        self.nodes.contains(node) || self.verifier.as_ref() == Some(node)
    }
}

#[derive(Debug, Default)]
struct Store {
    current: i64,
    oldest: i64,
    data: BTreeMap<Vec<u8>, Vec<(i64, Option<Value>)>>,
    writes: Vec<(KeyRange, i64)>,
}

impl Store {
    fn resolve_version(&self, version: Version) -> Result<i64> {
        if version.is_latest() {
            return Ok(self.current);
        }
        if !version.is_valid() {
            return Err(Error::internal(format!("unusable read version {version}")));
        }
        if version.number() > self.current {
            return Err(Error::FutureVersion);
        }
        if version.number() < self.oldest {
            return Err(Error::TransactionTooOld);
        }
        Ok(version.number())
    }

    fn value_at(&self, key: &[u8], version: i64) -> Option<Value> {
        let history = self.data.get(key)?;
        history.iter().rev().find(|(v, _)| *v <= version).and_then(|(_, value)| value.clone())
    }

    fn last_change(&self, key: &[u8]) -> i64 {
        self.data.get(key).and_then(|history| history.last()).map(|(v, _)| *v).unwrap_or(self.current)
    }

    /// Keys holding a live value at `version` within `range`, in order.
    fn keys_at(&self, range: &KeyRange, version: i64) -> Vec<Vec<u8>> {
        self.data
            .range(range.begin.clone()..range.end.clone())
            .filter(|(key, _)| self.value_at(key, version).is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn write(&mut self, key: Vec<u8>, version: i64, value: Option<Value>) {
        self.data.entry(key).or_default().push((version, value));
    }

    fn apply(&mut self, request: &CommitRequest) -> CommitOutcome {
        for read in &request.read_conflicts {
            let conflicted = self
                .writes
                .iter()
                .any(|(range, version)| *version > request.read_version.number() && range.intersects(read));
            if conflicted {
                return CommitOutcome::Conflict;
            }
        }
        let version = self.current + 1;
        for mutation in &request.mutations {
            match mutation {
                crate::service::Mutation::Set { key, value } => {
                    self.write(key.clone(), version, Some(value.clone()));
                },
                crate::service::Mutation::Clear { range } => {
                    let cleared: Vec<_> =
                        self.keys_at(range, self.current).into_iter().collect();
                    for key in cleared {
                        self.write(key, version, None);
                    }
                },
                crate::service::Mutation::Atomic { op, key, param } => {
                    let existing = self.value_at(key, self.current);
                    let merged = apply_atomic(*op, existing.as_deref(), param);
                    self.write(key.clone(), version, Some(merged));
                },
            }
        }
        for range in &request.write_conflicts {
            self.writes.push((range.clone(), version));
        }
        self.current = version;
        CommitOutcome::Committed(Version(version))
    }
}

fn le_number(bytes: &[u8]) -> u128 {
    let mut number = 0u128;
    for (i, byte) in bytes.iter().take(16).enumerate() {
        number |= (*byte as u128) << (8 * i);
    }
    number
}

fn le_bytes(number: u128, len: usize) -> Value {
    let mut bytes = Vec::with_capacity(len);
    for i in 0..len.min(16) {
        bytes.push((number >> (8 * i)) as u8);
    }
    bytes.resize(len, 0);
    Value::from(bytes)
}

fn apply_atomic(op: AtomicOp, existing: Option<&[u8]>, param: &Value) -> Value {
    let existing = existing.unwrap_or_default();
    match op {
        AtomicOp::Add => le_bytes(le_number(existing).wrapping_add(le_number(param)), param.len()),
        AtomicOp::BitAnd => le_bytes(le_number(existing) & le_number(param), param.len()),
        AtomicOp::BitOr => le_bytes(le_number(existing) | le_number(param), param.len()),
        AtomicOp::BitXor => le_bytes(le_number(existing) ^ le_number(param), param.len()),
        AtomicOp::Max => {
            if le_number(param) >= le_number(existing) {
                param.clone()
            } else {
                Value::copy_from_slice(existing)
            }
        },
        AtomicOp::Min => {
            if le_number(param) <= le_number(existing) {
                param.clone()
            } else {
                Value::copy_from_slice(existing)
            }
        },
        AtomicOp::ByteMax => {
            if param.as_ref() >= existing {
                param.clone()
            } else {
                Value::copy_from_slice(existing)
            }
        },
        AtomicOp::ByteMin => {
            if existing.is_empty() || param.as_ref() <= existing {
                param.clone()
            } else {
                Value::copy_from_slice(existing)
            }
        },
    }
}

#[derive(Debug)]
struct ClusterCore {
    store: Mutex<Store>,
    shards: Mutex<Vec<ShardAssignment>>,
    nodes: Mutex<HashSet<NodeId>>,
    failed: Mutex<HashSet<NodeId>>,
    poisoned: Mutex<HashSet<NodeId>>,
    proxies: Mutex<Arc<NodeSet>>,
    storage_handles: Mutex<HashMap<NodeId, Arc<MemoryStorageNode>>>,
    proxy_handles: Mutex<HashMap<NodeId, Arc<MemoryCommitProxy>>>,
    location_lookups: AtomicUsize,
    grv_calls: AtomicUsize,
    commit_calls: AtomicUsize,
    ambiguous_commits: Mutex<VecDeque<bool>>,
    empty_more_replies: AtomicBool,
    locked: AtomicBool,
    commit_signal: watch::Sender<Version>,
}

impl ClusterCore {
    fn shard_of(&self, key: &[u8]) -> Result<ShardAssignment> {
        let shards = self.shards.lock().unwrap();
        shards
            .iter()
            .find(|shard| shard.range.contains(key))
            .cloned()
            .ok_or_else(|| Error::corrupted(format!("no shard covers key {key:?}")))
    }

    /// The shard owning keys strictly before `key`.
    fn shard_before(&self, key: &[u8]) -> Result<ShardAssignment> {
        let shards = self.shards.lock().unwrap();
        shards
            .iter()
            .rev()
            .find(|shard| shard.range.begin.as_slice() < key)
            .cloned()
            .ok_or_else(|| Error::corrupted(format!("no shard precedes key {key:?}")))
    }

    fn is_failed(&self, node: &NodeId) -> bool {
        self.failed.lock().unwrap().contains(node)
    }

    fn check_node(&self, node: &NodeId) -> Result<()> {
        if self.is_failed(node) {
            return Err(Error::node_not_available(node.clone()));
        }
        Ok(())
    }
}

/// A self-contained cluster for tests, examples and simulations.
#[derive(Clone, Debug)]
pub struct MemoryCluster {
    core: Arc<ClusterCore>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        let node = NodeId::new("node-0");
        let proxy = NodeId::new("proxy-0");
        let shard = ShardAssignment { range: KeyRange::all(), nodes: vec![node.clone()], verifier: None };
        let core = ClusterCore {
            store: Mutex::new(Store { current: 1, ..Default::default() }),
            shards: Mutex::new(vec![shard]),
            nodes: Mutex::new([node].into_iter().collect()),
            failed: Mutex::new(HashSet::new()),
            poisoned: Mutex::new(HashSet::new()),
            proxies: Mutex::new(Arc::new(NodeSet::new([proxy.clone()]))),
            storage_handles: Mutex::new(HashMap::new()),
            proxy_handles: Mutex::new(HashMap::new()),
            location_lookups: AtomicUsize::new(0),
            grv_calls: AtomicUsize::new(0),
            commit_calls: AtomicUsize::new(0),
            ambiguous_commits: Mutex::new(VecDeque::new()),
            empty_more_replies: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            commit_signal: watch::channel(Version(1)).0,
        };
        let mut proxy_nodes = core.nodes.lock().unwrap();
        proxy_nodes.insert(proxy);
        drop(proxy_nodes);
        Self { core: Arc::new(core) }
    }

    pub fn add_node(&self, node: impl Into<NodeId>) {
        self.core.nodes.lock().unwrap().insert(node.into());
    }

    /// Splits the shard containing `key` at `key`.
    pub fn split(&self, key: &[u8]) {
        let mut shards = self.core.shards.lock().unwrap();
        let i = shards.iter().position(|shard| shard.range.contains(key)).unwrap();
        if shards[i].range.begin.as_slice() == key {
            return;
        }
        let mut right = shards[i].clone();
        right.range.begin = key.to_vec();
        shards[i].range.end = key.to_vec();
        shards.insert(i + 1, right);
    }

    /// Reassigns `range` to `nodes`, splitting neighbors as needed. Shard
    /// movement that the client only learns about through stale routing.
    pub fn assign(&self, range: KeyRange, nodes: Vec<NodeId>) {
        self.assign_with_verifier(range, nodes, None);
    }

    pub fn assign_with_verifier(&self, range: KeyRange, nodes: Vec<NodeId>, verifier: Option<NodeId>) {
        {
            let mut known = self.core.nodes.lock().unwrap();
            known.extend(nodes.iter().cloned());
            known.extend(verifier.iter().cloned());
        }
        let mut shards = self.core.shards.lock().unwrap();
        let mut retiled = Vec::with_capacity(shards.len() + 2);
        for shard in shards.drain(..) {
            if !shard.range.intersects(&range) {
                retiled.push(shard);
                continue;
            }
            if shard.range.begin < range.begin {
                let mut left = shard.clone();
                left.range.end = range.begin.clone();
                retiled.push(left);
            }
            if range.end < shard.range.end {
                let mut right = shard.clone();
                right.range.begin = range.end.clone();
                retiled.push(right);
            }
        }
        retiled.push(ShardAssignment { range, nodes, verifier });
        retiled.sort_by(|a, b| a.range.begin.cmp(&b.range.begin));
        *shards = retiled;
    }

    pub fn fail_node(&self, node: impl Into<NodeId>) {
        self.core.failed.lock().unwrap().insert(node.into());
    }

    pub fn recover_node(&self, node: &NodeId) {
        self.core.failed.lock().unwrap().remove(node);
    }

    /// Makes reads served by `node` return garbage, to exercise shadow
    /// verification.
    pub fn poison_node(&self, node: impl Into<NodeId>) {
        self.core.poisoned.lock().unwrap().insert(node.into());
    }

    pub fn set_locked(&self, locked: bool) {
        self.core.locked.store(locked, Ordering::SeqCst);
    }

    /// Scripts the next commits to report an unknown outcome; `true`
    /// entries apply the commit before losing the reply, `false` entries
    /// drop it entirely.
    pub fn script_ambiguous_commits(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.core.ambiguous_commits.lock().unwrap().extend(outcomes);
    }

    /// Makes range replies claim more data while carrying no rows.
    pub fn inject_empty_more_replies(&self, on: bool) {
        self.core.empty_more_replies.store(on, Ordering::SeqCst);
    }

    /// Drops the ability to read at versions below `version`.
    pub fn expire_versions_before(&self, version: Version) {
        self.core.store.lock().unwrap().oldest = version.number();
    }

    pub fn location_lookups(&self) -> usize {
        self.core.location_lookups.load(Ordering::SeqCst)
    }

    pub fn grv_calls(&self) -> usize {
        self.core.grv_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.core.commit_calls.load(Ordering::SeqCst)
    }

    pub fn current_version(&self) -> Version {
        Version(self.core.store.lock().unwrap().current)
    }

    /// Latest value of `key`, bypassing the transaction machinery.
    pub fn value(&self, key: &[u8]) -> Option<Value> {
        let store = self.core.store.lock().unwrap();
        store.value_at(key, store.current)
    }

    /// Writes directly into the store, bypassing conflict detection.
    pub fn force_write(&self, key: impl Into<Vec<u8>>, value: impl Into<Value>) -> Version {
        let mut store = self.core.store.lock().unwrap();
        let version = store.current + 1;
        let key = key.into();
        store.write(key.clone(), version, Some(value.into()));
        store.writes.push((KeyRange::single(key), version));
        store.current = version;
        drop(store);
        self.core.commit_signal.send(Version(version)).ignore();
        Version(version)
    }

    /// Environment wiring every collaborator to this cluster.
    pub fn env(&self) -> crate::db::DatabaseEnv {
        crate::db::DatabaseEnv::new(self.transport(), self.locator(), self.version_service(), self.failure_detector())
    }

    pub fn database(&self) -> crate::db::Database {
        crate::db::Database::open(self.env())
    }

    pub fn locator(&self) -> Arc<dyn LocationService> {
        Arc::new(MemoryLocator { core: self.core.clone() })
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(MemoryTransport { core: self.core.clone() })
    }

    pub fn version_service(&self) -> Arc<dyn VersionService> {
        Arc::new(MemoryVersionService { core: self.core.clone() })
    }

    pub fn failure_detector(&self) -> Arc<dyn FailureDetector> {
        Arc::new(MemoryDetector { core: self.core.clone() })
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct MemoryStorageNode {
    core: Arc<ClusterCore>,
    node: NodeId,
}

impl MemoryStorageNode {
    fn check_serving(&self, key: &[u8], backward: bool) -> Result<ShardAssignment> {
        self.core.check_node(&self.node)?;
        let shard = if backward { self.core.shard_before(key)? } else { self.core.shard_of(key)? };
        if !shard.serves(&self.node) {
            return Err(Error::wrong_shard(key.to_vec()));
        }
        Ok(shard)
    }

    fn is_poisoned(&self) -> bool {
        self.core.poisoned.lock().unwrap().contains(&self.node)
    }

    /// Global selector resolution clamped to the key space bounds.
    fn resolve_selector(store: &Store, selector: &KeySelector, version: i64) -> Vec<u8> {
        let keys = store.keys_at(&KeyRange::all(), version);
        let base = keys.partition_point(|key| {
            if selector.or_equal {
                key.as_slice() <= selector.key.as_slice()
            } else {
                key.as_slice() < selector.key.as_slice()
            }
        });
        let index = base as i64 + selector.offset as i64 - 1;
        if index < 0 {
            Vec::new()
        } else if index >= keys.len() as i64 {
            crate::keys::MAX_KEY.to_vec()
        } else {
            keys[index as usize].clone()
        }
    }
}

#[async_trait]
impl StorageNode for MemoryStorageNode {
    async fn get(&self, key: &[u8], version: Version) -> Result<Option<Value>> {
        self.check_serving(key, false)?;
        if self.is_poisoned() {
            return Ok(Some(Value::from_static(b"\x00poisoned")));
        }
        let store = self.core.store.lock().unwrap();
        let version = store.resolve_version(version)?;
        Ok(store.value_at(key, version))
    }

    async fn get_key(&self, selector: KeySelector, version: Version) -> Result<KeyResolution> {
        let shard = self.check_serving(&selector.key, selector.is_backward())?;
        let store = self.core.store.lock().unwrap();
        let version = store.resolve_version(version)?;
        let keys = store.keys_at(&shard.range, version);
        let base = keys.partition_point(|key| {
            if selector.or_equal {
                key.as_slice() <= selector.key.as_slice()
            } else {
                key.as_slice() < selector.key.as_slice()
            }
        });
        let index = base as i64 + selector.offset as i64 - 1;
        if index < 0 {
            if shard.range.begin.is_empty() {
                return Ok(KeyResolution::Resolved(Vec::new()));
            }
            let offset = (index + 1) as i32;
            return Ok(KeyResolution::Continue(KeySelector { key: shard.range.begin, or_equal: false, offset }));
        }
        if index >= keys.len() as i64 {
            if shard.range.end.as_slice() == crate::keys::MAX_KEY {
                return Ok(KeyResolution::Resolved(crate::keys::MAX_KEY.to_vec()));
            }
            let offset = (index - keys.len() as i64 + 1) as i32;
            return Ok(KeyResolution::Continue(KeySelector { key: shard.range.end, or_equal: false, offset }));
        }
        Ok(KeyResolution::Resolved(keys[index as usize].clone()))
    }

    async fn get_range(
        &self,
        begin: KeySelector,
        end: KeySelector,
        version: Version,
        limits: RangeLimits,
        reverse: bool,
    ) -> Result<RangeResult> {
        let shard = if reverse {
            self.check_serving(&end.key, true)?
        } else {
            self.check_serving(&begin.key, begin.is_backward())?
        };
        if self.core.empty_more_replies.load(Ordering::SeqCst) {
            return Ok(RangeResult { rows: Vec::new(), more: true });
        }
        let store = self.core.store.lock().unwrap();
        let version = store.resolve_version(version)?;
        let begin_key = Self::resolve_selector(&store, &begin, version);
        let end_key = Self::resolve_selector(&store, &end, version);
        if begin_key.as_slice() < shard.range.begin.as_slice() {
            // The begin selector resolves left of this shard; nothing to
            // serve here, the client must re-resolve.
            return Ok(RangeResult::default());
        }
        let lo = std::cmp::max(begin_key.as_slice(), shard.range.begin.as_slice()).to_vec();
        let hi = std::cmp::min(end_key.as_slice(), shard.range.end.as_slice()).to_vec();
        if lo >= hi {
            return Ok(RangeResult::default());
        }
        let keys = store.keys_at(&KeyRange::new(lo, hi), version);
        let mut limits = limits;
        let mut rows = Vec::new();
        let mut more = false;
        let ordered: Box<dyn Iterator<Item = &Vec<u8>>> =
            if reverse { Box::new(keys.iter().rev()) } else { Box::new(keys.iter()) };
        for key in ordered {
            if limits.is_reached() {
                more = true;
                break;
            }
            let value = store.value_at(key, version).unwrap_or_default();
            limits.consume(key.len(), value.len());
            rows.push(KeyValue { key: key.clone(), value });
        }
        Ok(RangeResult { rows, more })
    }

    async fn watch(&self, key: &[u8], expected: Option<Value>, version: Version) -> Result<Version> {
        self.check_serving(key, false)?;
        {
            let store = self.core.store.lock().unwrap();
            store.resolve_version(version)?;
        }
        let mut signal = self.core.commit_signal.subscribe();
        loop {
            self.core.check_node(&self.node)?;
            {
                let store = self.core.store.lock().unwrap();
                let current = store.value_at(key, store.current);
                if current != expected {
                    return Ok(Version(store.last_change(key)));
                }
            }
            if signal.changed().await.is_err() {
                return Err(Error::internal("memory cluster torn down"));
            }
        }
    }

    async fn split_points(&self, range: KeyRange, chunk_bytes: u64) -> Result<Vec<Vec<u8>>> {
        self.core.check_node(&self.node)?;
        let store = self.core.store.lock().unwrap();
        let keys = store.keys_at(&range, store.current);
        let mut points = Vec::new();
        let mut accumulated = 0u64;
        for key in keys {
            let value_len = store.value_at(&key, store.current).map(|v| v.len()).unwrap_or(0);
            if accumulated >= chunk_bytes {
                points.push(key.clone());
                accumulated = 0;
            }
            accumulated += (key.len() + value_len) as u64;
        }
        Ok(points)
    }
}

#[derive(Debug)]
struct MemoryLocator {
    core: Arc<ClusterCore>,
}

#[async_trait]
impl LocationService for MemoryLocator {
    async fn resolve_key(&self, key: &[u8], reverse: bool) -> Result<ResolvedShard> {
        self.core.location_lookups.fetch_add(1, Ordering::SeqCst);
        let shard = if reverse { self.core.shard_before(key)? } else { self.core.shard_of(key)? };
        Ok(ResolvedShard { range: shard.range.clone(), nodes: shard.node_set() })
    }

    async fn resolve_range(&self, range: KeyRange, limit: usize, reverse: bool) -> Result<Vec<ResolvedShard>> {
        self.core.location_lookups.fetch_add(1, Ordering::SeqCst);
        let shards = self.core.shards.lock().unwrap();
        let mut resolved: Vec<_> = shards
            .iter()
            .filter(|shard| shard.range.intersects(&range))
            .map(|shard| ResolvedShard { range: shard.range.clone(), nodes: shard.node_set() })
            .collect();
        if reverse {
            resolved.reverse();
        }
        resolved.truncate(limit);
        Ok(resolved)
    }
}

#[derive(Debug)]
struct MemoryCommitProxy {
    core: Arc<ClusterCore>,
    node: NodeId,
}

#[async_trait]
impl CommitService for MemoryCommitProxy {
    async fn commit(&self, request: CommitRequest) -> Result<CommitOutcome> {
        self.core.check_node(&self.node)?;
        self.core.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.core.locked.load(Ordering::SeqCst) && !request.lock_aware {
            return Err(Error::DatabaseLocked);
        }
        if !request.read_version.is_valid() {
            return Err(Error::internal(format!("commit with read version {}", request.read_version)));
        }
        let scripted = self.core.ambiguous_commits.lock().unwrap().pop_front();
        let mut store = self.core.store.lock().unwrap();
        let outcome = match scripted {
            Some(false) => return Err(Error::RequestMaybeDelivered),
            Some(true) => {
                let outcome = store.apply(&request);
                drop(store);
                if let CommitOutcome::Committed(version) = outcome {
                    self.core.commit_signal.send(version).ignore();
                }
                return Err(Error::RequestMaybeDelivered);
            },
            None => store.apply(&request),
        };
        drop(store);
        if let CommitOutcome::Committed(version) = outcome {
            self.core.commit_signal.send(version).ignore();
        }
        Ok(outcome)
    }
}

#[derive(Debug)]
struct MemoryVersionService {
    core: Arc<ClusterCore>,
}

#[async_trait]
impl VersionService for MemoryVersionService {
    async fn get_read_version(&self, _count: usize, _priority: Priority, _flags: VersionFlags) -> Result<VersionReply> {
        self.core.grv_calls.fetch_add(1, Ordering::SeqCst);
        let version = Version(self.core.store.lock().unwrap().current);
        Ok(VersionReply { version, locked: self.core.locked.load(Ordering::SeqCst) })
    }
}

#[derive(Debug)]
struct MemoryTransport {
    core: Arc<ClusterCore>,
}

impl Transport for MemoryTransport {
    fn storage_node(&self, node: &NodeId) -> Result<Arc<dyn StorageNode>> {
        if !self.core.nodes.lock().unwrap().contains(node) {
            return Err(Error::node_not_available(node.clone()));
        }
        let mut handles = self.core.storage_handles.lock().unwrap();
        let handle = handles
            .entry(node.clone())
            .or_insert_with(|| Arc::new(MemoryStorageNode { core: self.core.clone(), node: node.clone() }));
        Ok(handle.clone())
    }

    fn commit_proxy(&self, node: &NodeId) -> Result<Arc<dyn CommitService>> {
        if !self.core.nodes.lock().unwrap().contains(node) {
            return Err(Error::node_not_available(node.clone()));
        }
        let mut handles = self.core.proxy_handles.lock().unwrap();
        let handle = handles
            .entry(node.clone())
            .or_insert_with(|| Arc::new(MemoryCommitProxy { core: self.core.clone(), node: node.clone() }));
        Ok(handle.clone())
    }

    fn commit_proxies(&self) -> Arc<NodeSet> {
        self.core.proxies.lock().unwrap().clone()
    }
}

#[derive(Debug)]
struct MemoryDetector {
    core: Arc<ClusterCore>,
}

impl FailureDetector for MemoryDetector {
    fn is_failed(&self, node: &NodeId) -> bool {
        self.core.is_failed(node)
    }
}

/// Scripted fault injection: queued errors popped per decision point.
#[derive(Debug, Default)]
pub struct ScriptedFaults {
    scripted: Mutex<HashMap<FaultPoint, VecDeque<Error>>>,
}

impl ScriptedFaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, point: FaultPoint, error: Error) {
        self.scripted.lock().unwrap().entry(point).or_default().push_back(error);
    }
}

impl FaultInjection for ScriptedFaults {
    fn inject(&self, point: FaultPoint) -> Option<Error> {
        self.scripted.lock().unwrap().get_mut(&point).and_then(|queue| queue.pop_front())
    }
}
