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

//! Error taxonomy of the transaction engine.
//!
//! Errors fall into a handful of categories with different recovery rules:
//! routing errors are absorbed inside the read and commit paths, staleness
//! and conflict errors are retried through [`Transaction::on_error`],
//! ambiguous commit outcomes and usage errors always reach the caller.
//!
//! [`Transaction::on_error`]: crate::txn::Transaction::on_error

use std::sync::Arc;

use thiserror::Error;

use crate::cluster::NodeId;

#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The contacted node no longer serves the key. Recovered by cache
    /// invalidation and re-routing.
    #[error("node does not serve key {key:?}")]
    WrongShard { key: Vec<u8> },
    /// Every candidate node of a set failed. Recovered like [`Self::WrongShard`].
    #[error("all alternative nodes failed")]
    AllAlternativesFailed,
    /// The node rejected or never received the request.
    #[error("node {node} not available")]
    NodeNotAvailable { node: NodeId },

    /// The requested read version fell out of the retention window.
    #[error("transaction too old")]
    TransactionTooOld,
    /// The requested read version is ahead of the contacted node.
    #[error("future version")]
    FutureVersion,
    /// The cluster rejects non lock-aware transactions while locked.
    #[error("database locked")]
    DatabaseLocked,
    /// Serving nodes lag too far behind to answer.
    #[error("storage nodes are behind")]
    ProcessBehind,

    /// Optimistic concurrency conflict, the expected retry signal.
    #[error("transaction not committed due to conflict with another transaction")]
    NotCommitted,

    /// The commit outcome is unknown; replaying risks a double apply.
    #[error("transaction may or may not have committed")]
    CommitUnknownResult,
    /// A non-idempotent request left the client but its delivery is unknown.
    #[error("request may or may not have been delivered")]
    RequestMaybeDelivered,

    /// The storage node discarded the long poll; poll again later.
    #[error("watch cancelled by storage node")]
    WatchCancelled,
    /// The per-database outstanding watch budget is exhausted.
    #[error("too many outstanding watches")]
    TooManyWatches,
    /// The owning transaction went away before the result arrived.
    #[error("transaction cancelled")]
    TransactionCancelled,

    #[error("key of {size} bytes exceeds limit of {limit} bytes")]
    KeyTooLarge { size: usize, limit: usize },
    #[error("value of {size} bytes exceeds limit of {limit} bytes")]
    ValueTooLarge { size: usize, limit: usize },
    #[error("transaction of {size} bytes exceeds limit of {limit} bytes")]
    TransactionTooLarge { size: usize, limit: usize },
    #[error("key {key:?} outside legal key space")]
    KeyOutsideLegalRange { key: Vec<u8> },
    #[error("read version already set")]
    ReadVersionAlreadySet,
    #[error("invalid range limits: rows {rows}, bytes {bytes}")]
    InvalidRangeLimits { rows: usize, bytes: usize },
    #[error("operation issued on a committed or committing transaction")]
    UsedDuringCommit,

    #[error("data corruption: {message}")]
    DataCorruption { message: String },
    #[error("{0}")]
    Internal(Arc<anyhow::Error>),
}

impl Error {
    pub fn wrong_shard(key: impl Into<Vec<u8>>) -> Self {
        Self::WrongShard { key: key.into() }
    }

    pub fn node_not_available(node: impl Into<NodeId>) -> Self {
        Self::NodeNotAvailable { node: node.into() }
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::DataCorruption { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(Arc::new(anyhow::anyhow!(message.into())))
    }

    /// Routing failures recovered by invalidating the affected cache entry
    /// and re-resolving, without surfacing to the caller.
    pub fn is_routing(&self) -> bool {
        matches!(self, Self::WrongShard { .. } | Self::AllAlternativesFailed)
    }

    /// Failures that leave the commit outcome unknown.
    pub fn is_maybe_committed(&self) -> bool {
        matches!(self, Self::CommitUnknownResult | Self::RequestMaybeDelivered)
    }

    /// Whether a fresh attempt after transaction reset may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotCommitted
                | Self::TransactionTooOld
                | Self::FutureVersion
                | Self::DatabaseLocked
                | Self::ProcessBehind
        )
    }

    /// Staleness errors retried after a short fixed delay instead of the
    /// escalating backoff.
    pub fn is_stale_version(&self) -> bool {
        matches!(self, Self::TransactionTooOld | Self::FutureVersion)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(Arc::new(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[test]
    fn test_error_classification() {
        assert_that!(Error::wrong_shard(b"k".to_vec()).is_routing()).is_true();
        assert_that!(Error::AllAlternativesFailed.is_routing()).is_true();
        assert_that!(Error::NotCommitted.is_routing()).is_false();

        assert_that!(Error::NotCommitted.is_retryable()).is_true();
        assert_that!(Error::TransactionTooOld.is_retryable()).is_true();
        assert_that!(Error::CommitUnknownResult.is_retryable()).is_false();
        assert_that!(Error::KeyTooLarge { size: 20_000, limit: 10_000 }.is_retryable()).is_false();

        assert_that!(Error::CommitUnknownResult.is_maybe_committed()).is_true();
        assert_that!(Error::RequestMaybeDelivered.is_maybe_committed()).is_true();

        assert_that!(Error::TransactionTooOld.is_stale_version()).is_true();
        assert_that!(Error::NotCommitted.is_stale_version()).is_false();
    }

    #[test]
    fn test_error_clone_broadcastable() {
        let err = Error::internal("version service unreachable");
        let copy = err.clone();
        assert_that!(copy.to_string()).is_equal_to(err.to_string());
    }
}
