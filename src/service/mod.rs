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

//! Collaborator interfaces consumed by the transaction engine and the
//! logical messages exchanged with them. Wire formats are owned by the
//! implementations behind these traits.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use compact_str::CompactString;
use uuid::Uuid;

pub use self::memory::{MemoryCluster, ScriptedFaults};
use crate::cluster::{NodeId, NodeSet};
use crate::error::Result;
use crate::span::{KeyRange, KeySelector, RangeLimits};

pub type Value = Bytes;

/// Logical timestamp a transaction reads or commits at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub i64);

impl Version {
    pub const INVALID: Version = Version(-1);
    /// Sentinel asking a node for its newest readable version.
    pub const LATEST: Version = Version(-2);
    pub const ZERO: Version = Version(0);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    pub fn is_latest(self) -> bool {
        self == Self::LATEST
    }

    pub fn number(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::INVALID => f.write_str("invalid"),
            Self::LATEST => f.write_str("latest"),
            Version(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Value>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// One shard's worth of a range read. `more` promises that the shard holds
/// further rows past the last one returned; it says nothing about other
/// shards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RangeResult {
    pub rows: Vec<KeyValue>,
    pub more: bool,
}

/// Outcome of resolving a key selector against one shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyResolution {
    /// The selector resolved to this key.
    Resolved(Vec<u8>),
    /// The selector walks off the shard; resolution continues against the
    /// adjacent shard with this remainder.
    Continue(KeySelector),
}

/// A shard assignment answer from the location service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedShard {
    pub range: KeyRange,
    pub nodes: NodeSet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    BitAnd,
    BitOr,
    BitXor,
    Max,
    Min,
    ByteMin,
    ByteMax,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    Set { key: Vec<u8>, value: Value },
    Clear { range: KeyRange },
    Atomic { op: AtomicOp, key: Vec<u8>, param: Value },
}

impl Mutation {
    /// Span of keys this mutation touches.
    pub fn span(&self) -> KeyRange {
        match self {
            Self::Set { key, .. } | Self::Atomic { key, .. } => KeyRange::single(key.clone()),
            Self::Clear { range } => range.clone(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Set { key, value } => key.len() + value.len(),
            Self::Clear { range } => range.begin.len() + range.end.len(),
            Self::Atomic { key, param, .. } => key.len() + param.len(),
        }
    }
}

/// Snapshot of a transaction handed to the commit service. Immutable once
/// constructed; retry decisions live with the caller, never in here.
#[derive(Clone, Debug)]
pub struct CommitRequest {
    pub id: Uuid,
    pub mutations: Vec<Mutation>,
    pub read_conflicts: Vec<KeyRange>,
    pub write_conflicts: Vec<KeyRange>,
    pub read_version: Version,
    pub lock_aware: bool,
    pub tags: Vec<CompactString>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(Version),
    /// An overlapping concurrent write won; the transaction must restart.
    Conflict,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Batch,
    #[default]
    Default,
    Immediate,
}

/// Read version request flags, batched per distinct value.
pub type VersionFlags = u32;

pub const FLAG_CAUSAL_READ_RISKY: VersionFlags = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionReply {
    pub version: Version,
    /// Whether the cluster is administratively locked; only lock-aware
    /// transactions may proceed.
    pub locked: bool,
}

/// Resolves keys and ranges to their serving nodes. Carried to any
/// available metadata node by the implementation.
#[async_trait]
pub trait LocationService: Send + Sync + 'static {
    async fn resolve_key(&self, key: &[u8], reverse: bool) -> Result<ResolvedShard>;

    /// Resolves the covering shard sequence of `range` in order, at most
    /// `limit` shards per call. Callers re-invoke for the remainder.
    async fn resolve_range(&self, range: KeyRange, limit: usize, reverse: bool) -> Result<Vec<ResolvedShard>>;
}

/// One serving node of the storage tier.
#[async_trait]
pub trait StorageNode: Send + Sync + 'static {
    async fn get(&self, key: &[u8], version: Version) -> Result<Option<Value>>;

    async fn get_key(&self, selector: KeySelector, version: Version) -> Result<KeyResolution>;

    async fn get_range(
        &self,
        begin: KeySelector,
        end: KeySelector,
        version: Version,
        limits: RangeLimits,
        reverse: bool,
    ) -> Result<RangeResult>;

    /// Long poll resolving once the key's value moves away from `expected`
    /// as of `version`.
    async fn watch(&self, key: &[u8], expected: Option<Value>, version: Version) -> Result<Version>;

    /// Keys splitting `range` into chunks of roughly `chunk_bytes` each.
    async fn split_points(&self, range: KeyRange, chunk_bytes: u64) -> Result<Vec<Vec<u8>>>;
}

/// The commit tier. One call per commit attempt; delivery is at most once
/// and ambiguity surfaces as an error, never as a silent retry.
#[async_trait]
pub trait CommitService: Send + Sync + 'static {
    async fn commit(&self, request: CommitRequest) -> Result<CommitOutcome>;
}

/// Issues read versions, batched by the engine per priority and flag class.
#[async_trait]
pub trait VersionService: Send + Sync + 'static {
    async fn get_read_version(&self, count: usize, priority: Priority, flags: VersionFlags) -> Result<VersionReply>;
}

/// Hands out per-node request handles and the current commit proxy set.
pub trait Transport: Send + Sync + 'static {
    fn storage_node(&self, node: &NodeId) -> Result<Arc<dyn StorageNode>>;

    fn commit_proxy(&self, node: &NodeId) -> Result<Arc<dyn CommitService>>;

    fn commit_proxies(&self) -> Arc<NodeSet>;
}

/// Knowledge about dead nodes, consulted to skip them without waiting for a
/// timeout.
pub trait FailureDetector: Send + Sync + 'static {
    fn is_failed(&self, node: &NodeId) -> bool;
}

/// A detector that believes every node is healthy.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFailures;

impl FailureDetector for NoFailures {
    fn is_failed(&self, _node: &NodeId) -> bool {
        false
    }
}

/// Decision points where faults may be injected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    StorageRequest,
    CommitSubmit,
    VersionRequest,
}

/// Injection port consulted at a handful of explicit decision points.
/// Production code paths stay free of test-only branches.
pub trait FaultInjection: Send + Sync + 'static {
    fn inject(&self, point: FaultPoint) -> Option<crate::error::Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoFaults;

impl FaultInjection for NoFaults {
    fn inject(&self, _point: FaultPoint) -> Option<crate::error::Error> {
        None
    }
}
