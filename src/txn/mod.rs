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

//! Transactions: serializable reads and writes against the sharded store
//! without knowing which nodes serve which keys.
//!
//! The usual shape of an application retry loop:
//!
//! ```ignore
//! let mut txn = db.transaction();
//! loop {
//!     let result = async {
//!         let balance = txn.get(b"balance", false).await?;
//!         txn.set(b"balance", next(balance));
//!         txn.commit().await
//!     }
//!     .await;
//!     match result {
//!         Ok(()) => break,
//!         Err(error) => txn.on_error(error).await?,
//!     }
//! }
//! ```

mod commit;
mod read;
mod state;
mod watch;

use std::sync::Mutex;
use std::time::Duration;

use ignore_result::Ignore;
use tokio::sync::oneshot;
use tracing::debug;

pub use self::read::RangeStream;
pub use self::state::TransactionOptions;
use self::state::TransactionState;
pub use self::watch::WatchManager;
use self::watch::WatchWaiter;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::keys;
use crate::service::{
    AtomicOp,
    RangeResult,
    Value,
    Version,
    VersionFlags,
    FLAG_CAUSAL_READ_RISKY,
};
use crate::span::{KeyRange, KeySelector, RangeLimits};

struct PendingWatch {
    key: Vec<u8>,
    expected: Option<Value>,
    waiter: WatchWaiter,
}

/// Handle to a registered key watch. Resolves once the key's value moves
/// away from the value the registering transaction observed.
pub struct Watch {
    receiver: oneshot::Receiver<Result<Version>>,
}

impl Watch {
    /// Waits for the change and yields the version it was noticed at.
    pub async fn changed(self) -> Result<Version> {
        self.receiver.await.map_err(|_| Error::TransactionCancelled)?
    }
}

/// One transaction against a [`Database`].
///
/// Reads observe the database as of the transaction's read version; the
/// transaction's own uncommitted writes are not visible to them. Every
/// non-snapshot read grows the read conflict footprint that commit checks
/// against concurrent writers.
pub struct Transaction {
    db: Database,
    options: TransactionOptions,
    state: Mutex<TransactionState>,
    read_version: tokio::sync::OnceCell<Version>,
    pending_watches: Mutex<Vec<PendingWatch>>,
    backoff: Duration,
    retries: u32,
}

impl Transaction {
    pub(crate) fn new(db: Database) -> Self {
        let options = TransactionOptions::new(db.config());
        let backoff = db.config().default_backoff;
        Self {
            db,
            options,
            state: Mutex::new(TransactionState::new()),
            read_version: tokio::sync::OnceCell::new(),
            pending_watches: Mutex::new(Vec::new()),
            backoff,
            retries: 0,
        }
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut TransactionOptions {
        &mut self.options
    }

    /// Pins the read version instead of asking the version service.
    pub fn set_read_version(&self, version: Version) -> Result<()> {
        if !version.is_valid() {
            return Err(Error::internal(format!("cannot pin unusable read version {version}")));
        }
        self.read_version.set(version).map_err(|_| Error::ReadVersionAlreadySet)
    }

    /// The transaction's read version, resolved through the shared batcher
    /// on first use.
    pub async fn get_read_version(&self) -> Result<Version> {
        self.resolve_read_version(0).await
    }

    async fn resolve_read_version(&self, extra_flags: VersionFlags) -> Result<Version> {
        if let Some(version) = self.read_version.get() {
            return Ok(*version);
        }
        let version = self
            .read_version
            .get_or_try_init(|| async {
                let flags = self.options.version_flags() | extra_flags;
                let reply = self.db.read_version(self.options.priority, flags).await?;
                if reply.locked && !self.options.lock_aware {
                    return Err(Error::DatabaseLocked);
                }
                Ok(reply.version)
            })
            .await?;
        Ok(*version)
    }

    pub async fn get(&self, key: &[u8], snapshot: bool) -> Result<Option<Value>> {
        self.state.lock().unwrap().check_active()?;
        state::check_key(key, self.db.config(), &self.options)?;
        let version = self.resolve_read_version(0).await?;
        let value = read::get_value(&self.db, version, key).await?;
        if !snapshot {
            let mut state = self.state.lock().unwrap();
            state.add_read_conflict(KeyRange::single(key.to_vec()), self.db.config());
        }
        Ok(value)
    }

    /// Resolves a key selector to an absolute key.
    pub async fn get_key(&self, selector: KeySelector, snapshot: bool) -> Result<Vec<u8>> {
        self.state.lock().unwrap().check_active()?;
        let version = self.resolve_read_version(0).await?;
        let resolved = read::get_key(&self.db, version, selector.clone()).await?;
        if !snapshot {
            let begin = std::cmp::min(resolved.as_slice(), selector.key.as_slice()).to_vec();
            let end = std::cmp::max(keys::key_after(&resolved), keys::key_after(&selector.key));
            let mut state = self.state.lock().unwrap();
            state.add_read_conflict(KeyRange::new(begin, end), self.db.config());
        }
        Ok(resolved)
    }

    /// Reads the rows between two key selectors, up to `limits`. `more`
    /// reports that rows past the limit remain.
    pub async fn get_range(
        &self,
        begin: KeySelector,
        end: KeySelector,
        limits: RangeLimits,
        reverse: bool,
        snapshot: bool,
    ) -> Result<RangeResult> {
        self.state.lock().unwrap().check_active()?;
        let version = self.resolve_read_version(0).await?;
        let scan = read::get_range(&self.db, version, begin, end, limits, reverse).await?;
        if !snapshot && !scan.read_span.is_empty() {
            let mut state = self.state.lock().unwrap();
            state.add_read_conflict(scan.read_span.clone(), self.db.config());
        }
        Ok(RangeResult { rows: scan.rows, more: scan.more })
    }

    /// Streams the rows between two key selectors in key order through a
    /// backpressured channel, fetching shard fragments concurrently.
    pub async fn get_range_stream(&self, begin: KeySelector, end: KeySelector, snapshot: bool) -> Result<RangeStream> {
        self.state.lock().unwrap().check_active()?;
        let version = self.resolve_read_version(0).await?;
        let begin = self.resolve_boundary(version, begin).await?;
        let end = self.resolve_boundary(version, end).await?;
        let range = KeyRange::new(begin, end);
        if !snapshot && !range.is_empty() {
            let mut state = self.state.lock().unwrap();
            state.add_read_conflict(range.clone(), self.db.config());
        }
        Ok(read::stream_range(self.db.clone(), version, range))
    }

    async fn resolve_boundary(&self, version: Version, selector: KeySelector) -> Result<Vec<u8>> {
        let selector = read::normalize(selector);
        if selector.is_first_greater_or_equal() {
            return Ok(selector.key);
        }
        read::get_key(&self.db, version, selector).await
    }

    pub fn set(&self, key: impl Into<Vec<u8>>, value: impl Into<Value>) -> Result<()> {
        self.state.lock().unwrap().set(key.into(), value.into(), self.db.config(), &self.options)
    }

    pub fn clear(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.state.lock().unwrap().clear_key(key.into(), self.db.config(), &self.options)
    }

    pub fn clear_range(&self, range: KeyRange) -> Result<()> {
        self.state.lock().unwrap().clear_range(range, self.db.config(), &self.options)
    }

    pub fn atomic_op(&self, op: AtomicOp, key: impl Into<Vec<u8>>, param: impl Into<Value>) -> Result<()> {
        self.state.lock().unwrap().atomic_op(op, key.into(), param.into(), self.db.config(), &self.options)
    }

    pub fn add_read_conflict_range(&self, range: KeyRange) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check_active()?;
        state.add_read_conflict(range, self.db.config());
        Ok(())
    }

    pub fn add_write_conflict_range(&self, range: KeyRange) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check_active()?;
        state.add_write_conflict(range);
        Ok(())
    }

    /// Registers a watch on `key`, anchored at this transaction's commit
    /// version once it commits. The baseline value is the one this
    /// transaction leaves behind: its own pending write if any, otherwise
    /// the stored value at the read version.
    pub async fn watch(&self, key: impl Into<Vec<u8>>) -> Result<Watch> {
        let key = key.into();
        self.state.lock().unwrap().check_active()?;
        state::check_key(&key, self.db.config(), &self.options)?;
        let pending = self.state.lock().unwrap().pending_value(&key);
        let expected = match pending {
            Some(value) => value,
            None => {
                let version = self.resolve_read_version(0).await?;
                read::get_value(&self.db, version, &key).await?
            },
        };
        let (waiter, receiver) = oneshot::channel();
        self.pending_watches.lock().unwrap().push(PendingWatch { key, expected, waiter });
        Ok(Watch { receiver })
    }

    /// Commits the transaction. Read-only transactions resolve locally
    /// without contacting the commit service.
    pub async fn commit(&mut self) -> Result<()> {
        match self.commit_inner().await {
            Ok(()) => {
                self.setup_watches().await;
                Ok(())
            },
            Err(error) => {
                self.cancel_pending_watches(&error);
                Err(error)
            },
        }
    }

    async fn commit_inner(&mut self) -> Result<()> {
        self.state.lock().unwrap().check_active()?;
        let (has_writes, size) = {
            let state = self.state.lock().unwrap();
            (state.has_writes(), state.size())
        };
        if !has_writes {
            let has_watches = !self.pending_watches.lock().unwrap().is_empty();
            if has_watches {
                self.resolve_read_version(0).await?;
            }
            self.state.lock().unwrap().mark_committed(None);
            self.retries = 0;
            return Ok(());
        }
        let limit =
            std::cmp::min(self.options.size_limit.as_u64(), self.db.config().transaction_size_limit.as_u64()) as usize;
        if size > limit {
            return Err(Error::TransactionTooLarge { size, limit });
        }
        // Nothing read through this transaction resolved a version by now,
        // so the commit itself does not need full causal consistency.
        let read_version = self.resolve_read_version(FLAG_CAUSAL_READ_RISKY).await?;
        let (request, probe_range) = {
            let mut state = self.state.lock().unwrap();
            if !self.options.causal_write_risky && state.self_conflicting_range().is_none() {
                state.make_self_conflicting();
            }
            (state.commit_request(read_version, &self.options), state.self_conflicting_range())
        };
        assert!(
            self.options.causal_write_risky || probe_range.is_some(),
            "commit must carry intersecting read and write conflict ranges to anchor ambiguity probes",
        );
        let version = commit::submit(&self.db, request, &self.options, probe_range).await?;
        self.state.lock().unwrap().mark_committed(Some(version));
        self.retries = 0;
        self.backoff = self.db.config().default_backoff;
        Ok(())
    }

    async fn setup_watches(&mut self) {
        let pending = std::mem::take(&mut *self.pending_watches.lock().unwrap());
        if pending.is_empty() {
            return;
        }
        let version = self.state.lock().unwrap().committed_version().or_else(|| self.read_version.get().copied());
        let Some(version) = version else {
            for watch in pending {
                watch.waiter.send(Err(Error::internal("no version to anchor watch at"))).ignore();
            }
            return;
        };
        for watch in pending {
            self.db.watches().register(&self.db, watch.key, watch.expected, version, watch.waiter).await;
        }
    }

    fn cancel_pending_watches(&self, error: &Error) {
        let pending = std::mem::take(&mut *self.pending_watches.lock().unwrap());
        for watch in pending {
            watch.waiter.send(Err(error.clone())).ignore();
        }
    }

    /// The version this transaction committed at, once it has.
    pub fn committed_version(&self) -> Option<Version> {
        self.state.lock().unwrap().committed_version()
    }

    /// The single retry decision point. Recoverable errors reset the
    /// transaction and resolve after a delay so the caller simply loops;
    /// conflicts and staleness never surface raw unless the retry budget
    /// is spent. Ambiguous commit outcomes and usage errors are returned
    /// to the caller, which must decide whether replaying is safe.
    pub async fn on_error(&mut self, error: Error) -> Result<()> {
        if !error.is_retryable() {
            return Err(error);
        }
        self.retries += 1;
        if let Some(limit) = self.options.retry_limit {
            if self.retries > limit {
                return Err(error);
            }
        }
        let delay = if error.is_stale_version() {
            std::cmp::min(self.db.config().future_version_retry_delay, self.options.max_backoff)
        } else {
            let delay = self.backoff;
            self.backoff = commit::escalate(self.backoff, self.options.max_backoff);
            delay
        };
        debug!("retrying transaction after {error} in {delay:?}");
        self.reset();
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Discards every pending mutation, conflict range and the read
    /// version; options and the retry budget carry over to the next
    /// attempt.
    pub fn reset(&mut self) {
        self.cancel_pending_watches(&Error::TransactionCancelled);
        self.state.lock().unwrap().reset();
        self.read_version = tokio::sync::OnceCell::new();
    }

    /// [`Self::reset`] plus restoring options and the retry budget to
    /// their defaults.
    pub fn full_reset(&mut self) {
        self.reset();
        self.options = TransactionOptions::new(self.db.config());
        self.backoff = self.db.config().default_backoff;
        self.retries = 0;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.cancel_pending_watches(&Error::TransactionCancelled);
    }
}
