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

//! Commit submission and ambiguity resolution.
//!
//! A commit whose reply is lost leaves its outcome unknown. Unless the
//! caller opted out, the pipeline then commits a minimal probe transaction
//! against a single key inside the intersection of the original write- and
//! read-conflict ranges: the probe serializes against the original commit,
//! so once the probe lands the original can no longer apply. The caller
//! still observes the unknown outcome, but the window is closed and an
//! idempotent replay is safe.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::service::{CommitOutcome, CommitRequest, Version};
use crate::span::KeyRange;
use crate::txn::TransactionOptions;

pub(crate) async fn submit(
    db: &Database,
    request: CommitRequest,
    options: &TransactionOptions,
    probe_range: Option<KeyRange>,
) -> Result<Version> {
    let id = request.id;
    match db.balancer().commit_call(request).await {
        Ok(CommitOutcome::Committed(version)) => {
            debug!("transaction {id} committed at {version}");
            db.observe_version(version);
            Ok(version)
        },
        Ok(CommitOutcome::Conflict) => Err(Error::NotCommitted),
        Err(error) if error.is_maybe_committed() => {
            if !options.causal_write_risky {
                let range = probe_range
                    .expect("commit without a self-conflicting range cannot resolve an ambiguous outcome");
                warn!("commit of transaction {id} is ambiguous, probing {range}");
                probe(db, KeyRange::single(range.begin), options).await?;
            }
            Err(Error::CommitUnknownResult)
        },
        Err(error) => Err(error),
    }
}

/// Commits a transaction that reads and writes `range` and nothing else.
/// It can only serialize after the ambiguous commit; once it lands, the
/// ambiguous commit either already applied or never will.
// Boxing the returned future with an explicit `Send` bound cuts the
// auto-trait inference cycle between commit and its own probe: the
// recursion edge back into `commit` now awaits a concretely-`Send`
// `dyn Future`, so the compiler no longer has to prove this future
// `Send` in terms of itself.
fn probe<'a>(db: &'a Database, range: KeyRange, options: &'a TransactionOptions) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let mut backoff = db.config().default_backoff;
        let mut attempts = 0u32;
        loop {
            let mut txn = db.transaction();
            {
                let probe_options = txn.options_mut();
                probe_options.lock_aware = true;
                probe_options.access_system_keys = true;
                // The probe itself must not recurse into another probe.
                probe_options.causal_write_risky = true;
                probe_options.tags = options.tags.clone();
            }
            txn.add_read_conflict_range(range.clone())?;
            txn.add_write_conflict_range(range.clone())?;
            match txn.commit().await {
                Ok(()) => {
                    debug!("ambiguity probe of {range} committed after {attempts} retries");
                    return Ok(());
                },
                // The probe only carries conflict ranges, so replaying it is
                // harmless; even its own ambiguous outcomes are retried.
                Err(error) if error.is_retryable() || error.is_maybe_committed() => {
                    attempts += 1;
                    debug!("ambiguity probe of {range} retrying after {error}");
                    tokio::time::sleep(backoff).await;
                    backoff = escalate(backoff, options.max_backoff);
                },
                Err(error) => return Err(error),
            }
        }
    })
}

pub(crate) fn escalate(backoff: Duration, max: Duration) -> Duration {
    std::cmp::min(backoff * 2, max)
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[test]
    fn test_escalate_caps() {
        let max = Duration::from_secs(1);
        let mut backoff = Duration::from_millis(10);
        for _ in 0..20 {
            backoff = escalate(backoff, max);
        }
        assert_that!(backoff).is_equal_to(max);
    }
}
