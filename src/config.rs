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

/// Tunables of the transaction engine, constructed once and handed to every
/// component that needs them.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum location cache entries before random eviction kicks in.
    pub location_cache_size: usize,
    /// Bound on eviction rounds per insert.
    pub max_eviction_attempts: usize,
    /// Maximum shards resolved per location service call.
    pub max_shards_per_resolve: usize,

    /// Delay before re-routing after a stale shard assignment.
    pub wrong_shard_delay: Duration,
    /// Delay before retrying a read whose version the node cannot serve yet.
    pub future_version_retry_delay: Duration,
    /// Initial retry backoff handed out by `on_error`.
    pub default_backoff: Duration,
    /// Ceiling of the escalating retry backoff.
    pub max_backoff: Duration,

    /// Read version requests coalesced into one upstream call.
    pub grv_batch_size: usize,
    /// Ceiling of the adaptive batching timeout.
    pub grv_batch_timeout: Duration,

    /// Outstanding watches allowed per database.
    pub max_watches: usize,
    /// Delay between watch polls when the serving node sheds the long poll.
    pub watch_poll_delay: Duration,

    pub key_size_limit: usize,
    pub value_size_limit: ByteSize,
    pub transaction_size_limit: ByteSize,
    /// Conflict keys longer than this are truncated to a covering prefix
    /// range.
    pub max_conflict_key_length: usize,

    /// Target reply size for one range read round trip.
    pub range_bytes_limit: ByteSize,
    /// Fragment size streamed range reads carve a shard into.
    pub stream_fragment_bytes: ByteSize,
    /// Fragments fetched concurrently per streamed range read.
    pub stream_parallelism: usize,
}

impl Config {
    pub fn new() -> Self {
        Self {
            location_cache_size: 20_000,
            max_eviction_attempts: 100,
            max_shards_per_resolve: 64,
            wrong_shard_delay: Duration::from_millis(10),
            future_version_retry_delay: Duration::from_millis(10),
            default_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            grv_batch_size: 1024,
            grv_batch_timeout: Duration::from_millis(5),
            max_watches: 10_000,
            watch_poll_delay: Duration::from_secs(1),
            key_size_limit: 10_000,
            value_size_limit: ByteSize::kb(100),
            transaction_size_limit: ByteSize::mb(10),
            max_conflict_key_length: 10_000,
            range_bytes_limit: ByteSize::kb(80),
            stream_fragment_bytes: ByteSize::mb(1),
            stream_parallelism: 8,
        }
    }

    pub fn with_location_cache_size(self, location_cache_size: usize) -> Self {
        Self { location_cache_size, ..self }
    }

    pub fn with_grv_batch(self, grv_batch_size: usize, grv_batch_timeout: Duration) -> Self {
        Self { grv_batch_size, grv_batch_timeout, ..self }
    }

    pub fn with_max_watches(self, max_watches: usize) -> Self {
        Self { max_watches, ..self }
    }

    pub fn with_backoff(self, default_backoff: Duration, max_backoff: Duration) -> Self {
        Self { default_backoff, max_backoff, ..self }
    }

    pub fn with_retry_delays(self, wrong_shard_delay: Duration, future_version_retry_delay: Duration) -> Self {
        Self { wrong_shard_delay, future_version_retry_delay, ..self }
    }

    pub fn with_stream_fragments(self, stream_fragment_bytes: ByteSize, stream_parallelism: usize) -> Self {
        Self { stream_fragment_bytes, stream_parallelism, ..self }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
