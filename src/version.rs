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

//! Read version batching. One batcher runs per (priority, flags) class and
//! coalesces concurrent requests into upstream calls, flushing on size or
//! on an adaptively tuned timer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ignore_result::Ignore;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::service::{Priority, VersionFlags, VersionReply, VersionService};

struct VersionRequest {
    reply: oneshot::Sender<Result<VersionReply>>,
}

/// Handle to one running batcher. Every request merged into a flushed
/// batch observes the identical reply: one shared version on success, the
/// same error on failure.
#[derive(Clone)]
pub struct ReadVersionBatcher {
    requests: mpsc::Sender<VersionRequest>,
}

impl ReadVersionBatcher {
    pub fn start(
        service: Arc<dyn VersionService>,
        priority: Priority,
        flags: VersionFlags,
        max_batch_size: usize,
        max_batch_timeout: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(4096);
        tokio::spawn(batch_loop(service, priority, flags, max_batch_size.max(1), max_batch_timeout, receiver));
        Self { requests: sender }
    }

    pub async fn get_read_version(&self) -> Result<VersionReply> {
        let (reply, receiver) = oneshot::channel();
        self.requests
            .send(VersionRequest { reply })
            .await
            .map_err(|_| Error::internal("read version batcher stopped"))?;
        receiver.await.map_err(|_| Error::internal("read version batch torn down"))?
    }
}

/// Nudges the flush timeout toward half the observed reply latency,
/// exponentially smoothed and capped.
fn tune_batch_time(batch_time: Duration, reply_latency: Duration, cap: Duration) -> Duration {
    let target = reply_latency / 2;
    std::cmp::min(target.mul_f64(0.1) + batch_time.mul_f64(0.9), cap)
}

async fn batch_loop(
    service: Arc<dyn VersionService>,
    priority: Priority,
    flags: VersionFlags,
    max_batch_size: usize,
    max_batch_timeout: Duration,
    mut receiver: mpsc::Receiver<VersionRequest>,
) {
    let mut pending: Vec<oneshot::Sender<Result<VersionReply>>> = Vec::new();
    // Start from the cap and let reply latency feedback pull the timer
    // down, trading first-request latency for batch size.
    let mut batch_time = max_batch_timeout;
    let mut deadline: Option<Instant> = None;
    let (latency_sender, mut latencies) = mpsc::unbounded_channel::<Duration>();
    loop {
        let flush = tokio::select! {
            request = receiver.recv() => match request {
                None => break,
                Some(request) => {
                    pending.push(request.reply);
                    if pending.len() >= max_batch_size {
                        true
                    } else {
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + batch_time);
                        }
                        false
                    }
                },
            },
            _ = async { tokio::time::sleep_until(tokio::time::Instant::from_std(deadline.unwrap())).await },
                if deadline.is_some() => true,
            Some(reply_latency) = latencies.recv() => {
                batch_time = tune_batch_time(batch_time, reply_latency, max_batch_timeout);
                trace!("tuned {priority:?} batch timeout to {batch_time:?}");
                false
            },
        };
        if !flush {
            continue;
        }
        deadline = None;
        if !pending.is_empty() {
            let batch = std::mem::take(&mut pending);
            debug!("flushing batch of {} read version requests", batch.len());
            let service = service.clone();
            let latency_sender = latency_sender.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                let result = service.get_read_version(batch.len(), priority, flags).await;
                latency_sender.send(start.elapsed()).ignore();
                for reply in batch {
                    reply.send(result.clone()).ignore();
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;
    use crate::service::{MemoryCluster, FLAG_CAUSAL_READ_RISKY};

    #[test]
    fn test_tune_batch_time() {
        let cap = Duration::from_millis(5);
        let tuned = tune_batch_time(Duration::ZERO, Duration::from_millis(10), cap);
        assert_that!(tuned).is_equal_to(Duration::from_micros(500));

        // Converges toward half the latency.
        let mut batch_time = Duration::ZERO;
        for _ in 0..200 {
            batch_time = tune_batch_time(batch_time, Duration::from_millis(4), cap);
        }
        assert_that!(batch_time).is_greater_than(Duration::from_micros(1900));
        assert_that!(batch_time).is_less_than(Duration::from_micros(2100));

        // Never beyond the cap.
        let capped = tune_batch_time(Duration::from_millis(5), Duration::from_secs(10), cap);
        assert_that!(capped).is_equal_to(cap);
    }

    #[test_log::test(tokio::test)]
    async fn test_batch_shares_one_upstream_call() {
        let cluster = MemoryCluster::new();
        let batcher = ReadVersionBatcher::start(
            cluster.version_service(),
            Priority::Default,
            0,
            1024,
            Duration::from_millis(50),
        );

        let (r1, r2, r3) =
            tokio::join!(batcher.get_read_version(), batcher.get_read_version(), batcher.get_read_version());
        let v1 = r1.unwrap().version;
        let v2 = r2.unwrap().version;
        let v3 = r3.unwrap().version;

        assert_that!(cluster.grv_calls()).is_equal_to(1);
        assert_that!(v1).is_equal_to(v2);
        assert_that!(v2).is_equal_to(v3);
    }

    #[test_log::test(tokio::test)]
    async fn test_batch_flushes_on_size() {
        let cluster = MemoryCluster::new();
        let batcher = ReadVersionBatcher::start(
            cluster.version_service(),
            Priority::Batch,
            FLAG_CAUSAL_READ_RISKY,
            2,
            Duration::from_secs(3600),
        );

        let (r1, r2) = tokio::join!(batcher.get_read_version(), batcher.get_read_version());
        assert_that!(r1.unwrap().version).is_equal_to(r2.unwrap().version);
        assert_that!(cluster.grv_calls()).is_equal_to(1);
    }

    #[test_log::test(tokio::test)]
    async fn test_batch_failure_is_broadcast() {
        let cluster = MemoryCluster::new();
        cluster.fail_node("proxy-0");

        // The memory version service itself stays reachable; simulate an
        // unreachable one instead.
        struct DownService;
        #[async_trait::async_trait]
        impl VersionService for DownService {
            async fn get_read_version(
                &self,
                _count: usize,
                _priority: Priority,
                _flags: VersionFlags,
            ) -> Result<VersionReply> {
                Err(Error::internal("version service unreachable"))
            }
        }

        let batcher = ReadVersionBatcher::start(
            Arc::new(DownService),
            Priority::Default,
            0,
            1024,
            Duration::from_millis(10),
        );
        let (r1, r2) = tokio::join!(batcher.get_read_version(), batcher.get_read_version());
        assert_that!(r1.is_err()).is_true();
        assert_that!(r2.is_err()).is_true();
    }
}
