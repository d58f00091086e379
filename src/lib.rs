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

//! Client-side transaction engine for a sharded, strictly serializable
//! key-value store.
//!
//! Callers read and write keys inside ACID transactions without knowing
//! which storage nodes serve which keys. The engine routes requests
//! through a process-wide shard location cache, recovers transparently
//! from shard movement and node failure, batches read version requests,
//! and resolves ambiguous commit outcomes through a probe protocol that
//! makes idempotent replay safe.
//!
//! The storage tier itself is reached through the collaborator traits in
//! [`service`]; [`service::MemoryCluster`] wires them to an in-process
//! cluster for tests and experiments.

pub mod cluster;
pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod service;
pub mod shard;
pub mod span;
pub mod txn;
pub mod version;

pub use self::cluster::{NodeId, NodeSet};
pub use self::config::Config;
pub use self::db::{Database, DatabaseEnv};
pub use self::error::{Error, Result};
pub use self::service::{AtomicOp, KeyValue, Priority, RangeResult, Value, Version};
pub use self::span::{KeyRange, KeySelector, RangeLimits};
pub use self::txn::{RangeStream, Transaction, TransactionOptions, Watch, WatchManager};
