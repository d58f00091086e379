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

use std::time::Duration;

use bytesize::ByteSize;
use compact_str::CompactString;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::keys;
use crate::service::{AtomicOp, CommitRequest, Mutation, Priority, Value, Version, VersionFlags, FLAG_CAUSAL_READ_RISKY};
use crate::span::KeyRange;

/// Per-transaction options. Named flags with documented effects on retry,
/// backoff and read version behavior.
#[derive(Clone, Debug)]
pub struct TransactionOptions {
    /// Scheduling class of read version requests: batch work yields to
    /// default traffic, immediate bypasses ratekeeping.
    pub priority: Priority,
    /// Proceed while the cluster is administratively locked.
    pub lock_aware: bool,
    /// Accept a slightly stale read version in exchange for a cheaper
    /// request; first reads may miss the latest commits.
    pub causal_read_risky: bool,
    /// Skip the ambiguity-resolution probe on unknown commit outcomes. The
    /// caller accepts that an ambiguous commit may still apply later.
    pub causal_write_risky: bool,
    /// Allow reads and writes under the system key prefix.
    pub access_system_keys: bool,
    /// Throttling tags attached to commits.
    pub tags: Vec<CompactString>,
    /// Ceiling of the escalating retry backoff handed out by `on_error`.
    pub max_backoff: Duration,
    /// Per-transaction byte budget for mutations and conflict ranges.
    pub size_limit: ByteSize,
    /// Retries allowed through `on_error` before errors surface raw.
    pub retry_limit: Option<u32>,
}

impl TransactionOptions {
    pub fn new(config: &Config) -> Self {
        Self {
            priority: Priority::Default,
            lock_aware: false,
            causal_read_risky: false,
            causal_write_risky: false,
            access_system_keys: false,
            tags: Vec::new(),
            max_backoff: config.max_backoff,
            size_limit: config.transaction_size_limit,
            retry_limit: None,
        }
    }

    pub(crate) fn version_flags(&self) -> VersionFlags {
        if self.causal_read_risky {
            FLAG_CAUSAL_READ_RISKY
        } else {
            0
        }
    }
}

/// Mutable record of one transaction attempt: pending mutations, conflict
/// ranges and commit progress. Owned exclusively by one transaction handle
/// and emptied by reset; nothing survives into the next attempt.
#[derive(Debug)]
pub(crate) struct TransactionState {
    id: Uuid,
    mutations: Vec<Mutation>,
    read_conflicts: Vec<KeyRange>,
    write_conflicts: Vec<KeyRange>,
    size: usize,
    committed: Option<Option<Version>>,
}

impl TransactionState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            mutations: Vec::new(),
            read_conflicts: Vec::new(),
            write_conflicts: Vec::new(),
            size: 0,
            committed: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn check_active(&self) -> Result<()> {
        match self.committed {
            None => Ok(()),
            Some(_) => Err(Error::UsedDuringCommit),
        }
    }

    pub fn mark_committed(&mut self, version: Option<Version>) {
        self.committed = Some(version);
    }

    pub fn committed_version(&self) -> Option<Version> {
        self.committed.flatten()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Value, config: &Config, options: &TransactionOptions) -> Result<()> {
        self.check_active()?;
        check_key(&key, config, options)?;
        check_value(&value, config)?;
        self.add_write_conflict(KeyRange::single(key.clone()));
        self.push(Mutation::Set { key, value });
        Ok(())
    }

    pub fn clear_key(&mut self, key: Vec<u8>, config: &Config, options: &TransactionOptions) -> Result<()> {
        self.check_active()?;
        check_key(&key, config, options)?;
        let range = KeyRange::single(key);
        self.add_write_conflict(range.clone());
        self.push(Mutation::Clear { range });
        Ok(())
    }

    pub fn clear_range(&mut self, range: KeyRange, config: &Config, options: &TransactionOptions) -> Result<()> {
        self.check_active()?;
        check_key(&range.begin, config, options)?;
        check_range_end(&range.end, config, options)?;
        if range.is_empty() {
            return Ok(());
        }
        self.add_write_conflict(range.clone());
        self.push(Mutation::Clear { range });
        Ok(())
    }

    pub fn atomic_op(
        &mut self,
        op: AtomicOp,
        key: Vec<u8>,
        param: Value,
        config: &Config,
        options: &TransactionOptions,
    ) -> Result<()> {
        self.check_active()?;
        check_key(&key, config, options)?;
        check_value(&param, config)?;
        self.add_write_conflict(KeyRange::single(key.clone()));
        self.push(Mutation::Atomic { op, key, param });
        Ok(())
    }

    /// Records a read conflict, truncating over-long boundary keys to a
    /// covering prefix range.
    pub fn add_read_conflict(&mut self, range: KeyRange, config: &Config) {
        if range.is_empty() {
            return;
        }
        let range = truncated(range, config.max_conflict_key_length);
        self.size += range.begin.len() + range.end.len();
        self.read_conflicts.push(range);
    }

    pub fn add_write_conflict(&mut self, range: KeyRange) {
        if range.is_empty() {
            return;
        }
        self.size += range.begin.len() + range.end.len();
        self.write_conflicts.push(range);
    }

    pub fn read_conflicts(&self) -> &[KeyRange] {
        &self.read_conflicts
    }

    pub fn write_conflicts(&self) -> &[KeyRange] {
        &self.write_conflicts
    }

    /// The value this transaction's own pending mutations would leave at
    /// `key`, when that is determinable without the storage tier.
    pub fn pending_value(&self, key: &[u8]) -> Option<Option<Value>> {
        for mutation in self.mutations.iter().rev() {
            match mutation {
                Mutation::Set { key: written, value } if written.as_slice() == key => {
                    return Some(Some(value.clone()))
                },
                Mutation::Clear { range } if range.contains(key) => return Some(None),
                Mutation::Atomic { key: written, .. } if written.as_slice() == key => return None,
                _ => {},
            }
        }
        None
    }

    /// Whether commit has anything to submit.
    pub fn has_writes(&self) -> bool {
        !self.mutations.is_empty() || !self.write_conflicts.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// A key range conflicting with both the reads and the writes of this
    /// transaction, the anchor for ambiguity-resolution probes.
    pub fn self_conflicting_range(&self) -> Option<KeyRange> {
        for write in &self.write_conflicts {
            for read in &self.read_conflicts {
                if let Some(intersection) = write.intersection(read) {
                    return Some(intersection);
                }
            }
        }
        None
    }

    /// Adds a private range to both conflict sets so the commit serializes
    /// against a later probe of the same range.
    pub fn make_self_conflicting(&mut self) {
        let range = KeyRange::single(keys::self_conflicting_key(self.id));
        self.read_conflicts.push(range.clone());
        self.size += 2 * (range.begin.len() + range.end.len());
        self.write_conflicts.push(range);
    }

    pub fn commit_request(&self, read_version: Version, options: &TransactionOptions) -> CommitRequest {
        CommitRequest {
            id: self.id,
            mutations: self.mutations.clone(),
            read_conflicts: self.read_conflicts.clone(),
            write_conflicts: self.write_conflicts.clone(),
            read_version,
            lock_aware: options.lock_aware,
            tags: options.tags.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn push(&mut self, mutation: Mutation) {
        self.size += mutation.size();
        self.mutations.push(mutation);
    }
}

pub(crate) fn check_key(key: &[u8], config: &Config, options: &TransactionOptions) -> Result<()> {
    if key.len() > config.key_size_limit {
        return Err(Error::KeyTooLarge { size: key.len(), limit: config.key_size_limit });
    }
    if key >= keys::MAX_KEY || (keys::is_system_key(key) && !options.access_system_keys) {
        return Err(Error::KeyOutsideLegalRange { key: key.to_vec() });
    }
    Ok(())
}

/// Range ends may sit one past the last legal key.
fn check_range_end(end: &[u8], config: &Config, options: &TransactionOptions) -> Result<()> {
    if end.len() > config.key_size_limit {
        return Err(Error::KeyTooLarge { size: end.len(), limit: config.key_size_limit });
    }
    if end > keys::MAX_KEY || (keys::is_system_key(end) && !options.access_system_keys && end != keys::SYSTEM_KEY_PREFIX)
    {
        return Err(Error::KeyOutsideLegalRange { key: end.to_vec() });
    }
    Ok(())
}

fn check_value(value: &Value, config: &Config) -> Result<()> {
    let limit = config.value_size_limit.as_u64() as usize;
    if value.len() > limit {
        return Err(Error::ValueTooLarge { size: value.len(), limit });
    }
    Ok(())
}

fn truncated(range: KeyRange, limit: usize) -> KeyRange {
    if range.begin.len() <= limit && range.end.len() <= limit {
        return range;
    }
    let begin = if range.begin.len() > limit { range.begin[..limit].to_vec() } else { range.begin };
    let end = if range.end.len() > limit { keys::prefix_end(&range.end[..limit]) } else { range.end };
    KeyRange::new(begin, end)
}
