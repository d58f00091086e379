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

//! Key watches. One entry per watched key exists process-wide; watch
//! handles on the same key share the entry's long poll, and the index is
//! the canonical record of what is being watched.

use std::sync::Mutex;

use hashbrown::HashMap;
use ignore_result::Ignore;
use static_assertions::assert_impl_all;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::service::{Value, Version};
use crate::shard::CallMode;
use crate::txn::read;

pub(crate) type WatchWaiter = oneshot::Sender<Result<Version>>;

struct WatchEntry {
    expected: Option<Value>,
    version: Version,
    waiters: Vec<WatchWaiter>,
    poll: Option<AbortHandle>,
}

impl WatchEntry {
    fn new(expected: Option<Value>, version: Version, waiter: WatchWaiter) -> Self {
        Self { expected, version, waiters: vec![waiter], poll: None }
    }

    fn deliver(self, result: Result<Version>) {
        if let Some(poll) = self.poll {
            poll.abort();
        }
        for waiter in self.waiters {
            waiter.send(result.clone()).ignore();
        }
    }
}

/// Process-wide watch index with a bounded number of outstanding entries.
pub struct WatchManager {
    index: Mutex<HashMap<Vec<u8>, WatchEntry>>,
    max_watches: usize,
}

assert_impl_all!(WatchManager: Send, Sync);

impl WatchManager {
    pub(crate) fn new(max_watches: usize) -> Self {
        Self { index: Mutex::new(HashMap::new()), max_watches }
    }

    pub fn outstanding(&self) -> usize {
        self.index.lock().unwrap().len()
    }

    /// Registers interest in `key` moving away from `expected` as of
    /// `version`, merging with or superseding an existing entry for the
    /// key.
    pub(crate) async fn register(
        &self,
        db: &Database,
        key: Vec<u8>,
        expected: Option<Value>,
        version: Version,
        waiter: WatchWaiter,
    ) {
        enum Action {
            Started,
            Shared,
            Superseded(WatchEntry),
            Consult(WatchWaiter),
        }
        let action = {
            let mut index = self.index.lock().unwrap();
            match index.get_mut(&key) {
                None => {
                    if index.len() >= self.max_watches {
                        drop(index);
                        waiter.send(Err(Error::TooManyWatches)).ignore();
                        return;
                    }
                    index.insert(key.clone(), WatchEntry::new(expected.clone(), version, waiter));
                    Action::Started
                },
                Some(entry) if entry.expected == expected => {
                    if version > entry.version {
                        entry.version = version;
                    }
                    entry.waiters.push(waiter);
                    Action::Shared
                },
                Some(entry) if version > entry.version => {
                    // A strictly newer baseline expects a different value:
                    // the old expectation is already disproven.
                    let old = std::mem::replace(entry, WatchEntry::new(expected.clone(), version, waiter));
                    Action::Superseded(old)
                },
                Some(_) => Action::Consult(waiter),
            }
        };
        match action {
            Action::Shared => {},
            Action::Started => self.start_poll(db, key),
            Action::Superseded(old) => {
                trace!("watch on {key:?} superseded at version {version}");
                old.deliver(Ok(version));
                self.start_poll(db, key);
            },
            Action::Consult(waiter) => self.consult_store(db, key, expected, version, waiter).await,
        }
    }

    /// Cross-checks conflicting expectations at the same version against
    /// the store: whichever expectation the current value disproves
    /// resolves immediately.
    async fn consult_store(
        &self,
        db: &Database,
        key: Vec<u8>,
        expected: Option<Value>,
        version: Version,
        waiter: WatchWaiter,
    ) {
        let current = match read::get_value(db, Version::LATEST, &key).await {
            Ok(current) => current,
            Err(error) => {
                waiter.send(Err(error)).ignore();
                return;
            },
        };
        {
            let mut index = self.index.lock().unwrap();
            if let Some(entry) = index.get(&key) {
                if entry.expected != current {
                    let old = index.remove(&key).expect("watch entry vanished under the index lock");
                    drop(index);
                    old.deliver(Ok(version));
                }
            }
        }
        if current != expected {
            waiter.send(Ok(version)).ignore();
            return;
        }
        // The store agrees with the new expectation; install it as the
        // fresh entry, or join one that raced us to the same target.
        let started = {
            let mut index = self.index.lock().unwrap();
            match index.get_mut(&key) {
                None => {
                    if index.len() >= self.max_watches {
                        drop(index);
                        waiter.send(Err(Error::TooManyWatches)).ignore();
                        return;
                    }
                    index.insert(key.clone(), WatchEntry::new(expected, version, waiter));
                    true
                },
                Some(entry) if entry.expected == expected => {
                    if version > entry.version {
                        entry.version = version;
                    }
                    entry.waiters.push(waiter);
                    false
                },
                Some(_) => {
                    drop(index);
                    waiter.send(Err(Error::internal("watch expectation raced with another registration"))).ignore();
                    return;
                },
            }
        };
        if started {
            self.start_poll(db, key);
        }
    }

    fn start_poll(&self, db: &Database, key: Vec<u8>) {
        let task = tokio::spawn(poll_key(db.clone(), key.clone()));
        let mut index = self.index.lock().unwrap();
        if let Some(entry) = index.get_mut(&key) {
            entry.poll = Some(task.abort_handle());
        } else {
            // Resolved before the handle landed; the poll loop will find
            // no entry and exit.
            task.abort();
        }
    }

    fn entry_target(&self, key: &[u8]) -> Option<(Option<Value>, Version)> {
        let index = self.index.lock().unwrap();
        index.get(key).map(|entry| (entry.expected.clone(), entry.version))
    }

    /// Applies a poll result. Returns whether the poll loop is done with
    /// this key.
    fn settle(&self, key: &[u8], changed_version: Version) -> bool {
        let mut index = self.index.lock().unwrap();
        let Some(entry) = index.get_mut(key) else {
            return true;
        };
        if changed_version >= entry.version {
            let entry = index.remove(key).expect("watch entry vanished under the index lock");
            drop(index);
            debug!("watch on {key:?} resolved at version {changed_version}");
            for waiter in entry.waiters {
                waiter.send(Ok(changed_version)).ignore();
            }
            return true;
        }
        // Stale notification from before the tracked baseline. Keep
        // polling while anybody still listens.
        entry.waiters.retain(|waiter| !waiter.is_closed());
        if entry.waiters.is_empty() {
            index.remove(key);
            return true;
        }
        trace!("watch on {key:?} ignoring stale notification at version {changed_version}");
        false
    }

    fn fail(&self, key: &[u8], error: Error) {
        let mut index = self.index.lock().unwrap();
        let Some(entry) = index.remove(key) else {
            return;
        };
        drop(index);
        for waiter in entry.waiters.into_iter().filter(|waiter| !waiter.is_closed()) {
            waiter.send(Err(error.clone())).ignore();
        }
    }
}

/// Long-poll loop for one watched key, driven by the entry in the index;
/// exits once the entry is gone.
async fn poll_key(db: Database, key: Vec<u8>) {
    loop {
        let Some((expected, version)) = db.watches().entry_target(&key) else {
            return;
        };
        let location = match db.router().resolve_key(&key, false).await {
            Ok(location) => location,
            Err(error) => {
                debug!("watch on {key:?} cannot resolve location: {error}");
                tokio::time::sleep(db.config().watch_poll_delay).await;
                continue;
            },
        };
        let request = (key.clone(), expected);
        let result = db
            .balancer()
            .storage_call(&location.nodes, CallMode::Balanced, move |node| {
                let (key, expected) = request.clone();
                async move { node.watch(&key, expected, version).await }
            })
            .await;
        match result {
            Ok(changed_version) => {
                if db.watches().settle(&key, changed_version) {
                    return;
                }
            },
            Err(error) if error.is_routing() => {
                db.router().invalidate(&key, false);
                tokio::time::sleep(db.config().wrong_shard_delay).await;
            },
            Err(Error::WatchCancelled | Error::ProcessBehind) => {
                tokio::time::sleep(db.config().watch_poll_delay).await;
            },
            Err(Error::TransactionTooOld | Error::FutureVersion) => {
                tokio::time::sleep(db.config().future_version_retry_delay).await;
            },
            Err(error) => {
                db.watches().fail(&key, error);
                return;
            },
        }
    }
}
