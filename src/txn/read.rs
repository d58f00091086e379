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

//! Point and range reads: shard routing with transparent recovery from
//! stale assignments, boundary stitching across shards and incremental
//! streaming delivery.

use futures::StreamExt;
use ignore_result::Ignore;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::keys;
use crate::service::{KeyResolution, KeyValue, Value, Version};
use crate::shard::CallMode;
use crate::span::{KeyRange, KeySelector, RangeLimits};

/// Outcome of one range read: the rows, whether data remains past them and
/// the key span actually inspected, which the transaction records as its
/// read conflict footprint.
#[derive(Clone, Debug, Default)]
pub(crate) struct RangeRead {
    pub rows: Vec<KeyValue>,
    pub more: bool,
    pub read_span: KeyRange,
}

pub(crate) async fn get_value(db: &Database, version: Version, key: &[u8]) -> Result<Option<Value>> {
    loop {
        let location = db.router().resolve_key(key, false).await?;
        let request_key = key.to_vec();
        let result = db
            .balancer()
            .storage_call(&location.nodes, CallMode::Balanced, move |node| {
                let key = request_key.clone();
                async move { node.get(&key, version).await }
            })
            .await;
        match result {
            Ok(value) => return Ok(value),
            Err(error) => recover_routing(db, &error, key, false, version).await?,
        }
    }
}

/// Resolves a key selector to an absolute key, stepping across shards as
/// the selector's offset walks off each one.
pub(crate) async fn get_key(db: &Database, version: Version, selector: KeySelector) -> Result<Vec<u8>> {
    let mut selector = selector;
    loop {
        let backward = selector.is_backward();
        let location = db.router().resolve_key(&selector.key, backward).await?;
        let request = selector.clone();
        let result = db
            .balancer()
            .storage_call(&location.nodes, CallMode::Balanced, move |node| {
                let selector = request.clone();
                async move { node.get_key(selector, version).await }
            })
            .await;
        match result {
            Ok(KeyResolution::Resolved(key)) => return Ok(key),
            Ok(KeyResolution::Continue(next)) => {
                trace!("selector {selector} continues as {next}");
                selector = next;
            },
            Err(error) => recover_routing(db, &error, &selector.key, backward, version).await?,
        }
    }
}

pub(crate) async fn get_range(
    db: &Database,
    version: Version,
    begin: KeySelector,
    end: KeySelector,
    limits: RangeLimits,
    reverse: bool,
) -> Result<RangeRead> {
    if !limits.is_valid() {
        return Err(Error::InvalidRangeLimits { rows: limits.rows, bytes: limits.bytes });
    }
    let begin = normalize(begin);
    let end = normalize(end);
    if begin.is_first_greater_or_equal() && end.is_first_greater_or_equal() {
        let range = KeyRange::new(begin.key, end.key);
        if range.is_empty() {
            return Ok(RangeRead::default());
        }
        return scan_exact(db, version, range, limits, reverse).await;
    }
    if reverse || !end.is_first_greater_or_equal() {
        return range_fallback(db, version, begin, end, limits, reverse).await;
    }
    selector_scan(db, version, begin, end, limits).await
}

/// `first_greater_than` is `first_greater_or_equal` of the successor key.
pub(crate) fn normalize(selector: KeySelector) -> KeySelector {
    if selector.or_equal && selector.offset == 1 {
        KeySelector::first_greater_or_equal(keys::key_after(&selector.key))
    } else {
        selector
    }
}

/// Forward range read carrying raw selectors, shard by shard. Boundaries
/// narrowed to fit a shard are continued from the shard's end rather than
/// trusting the shard's `more` flag.
async fn selector_scan(
    db: &Database,
    version: Version,
    begin: KeySelector,
    end: KeySelector,
    limits: RangeLimits,
) -> Result<RangeRead> {
    let original_begin = begin.clone();
    let original_end = end.clone();
    let mut begin = begin;
    let mut rows: Vec<KeyValue> = Vec::new();
    let mut remaining = limits;
    let more;
    loop {
        let location = db.router().resolve_key(&begin.key, begin.is_backward()).await?;
        let (request_end, modified) = if end.key.as_slice() > location.range.end.as_slice() {
            (KeySelector::first_greater_or_equal(location.range.end.clone()), true)
        } else {
            (end.clone(), false)
        };
        let request = (begin.clone(), request_end, remaining);
        let result = db
            .balancer()
            .storage_call(&location.nodes, CallMode::Balanced, move |node| {
                let (begin, end, limits) = request.clone();
                async move { node.get_range(begin, end, version, limits, false).await }
            })
            .await;
        let reply = match result {
            Ok(reply) => reply,
            Err(error) => {
                recover_routing(db, &error, &begin.key, begin.is_backward(), version).await?;
                continue;
            },
        };
        if reply.more && reply.rows.is_empty() {
            return Err(Error::corrupted("range reply claims more rows but carries none"));
        }
        let shard_had_more = reply.more;
        let got_rows = !reply.rows.is_empty();
        for row in reply.rows {
            remaining.consume(row.key.len(), row.value.len());
            rows.push(row);
        }
        if remaining.is_reached() {
            more = shard_had_more || modified;
            break;
        }
        if shard_had_more {
            let last = rows.last().expect("shard promised more rows yet returned none").key.clone();
            begin = KeySelector::first_greater_or_equal(keys::key_after(&last));
            continue;
        }
        if !got_rows && !begin.is_first_greater_or_equal() {
            // The shard cannot satisfy the selector; re-resolve both
            // boundaries and scan the exact range instead.
            debug!("range selectors {original_begin}..{original_end} stalled, falling back to exact scan");
            return range_fallback(db, version, original_begin, original_end, limits, false).await;
        }
        if modified {
            begin = KeySelector::first_greater_or_equal(location.range.end.clone());
            continue;
        }
        more = false;
        break;
    }
    let read_span = selector_read_span(&original_begin, &original_end, &rows, more);
    Ok(RangeRead { rows, more, read_span })
}

/// Degraded path: resolve both selectors to absolute keys at the committed
/// read version, then scan the exact range.
async fn range_fallback(
    db: &Database,
    version: Version,
    begin: KeySelector,
    end: KeySelector,
    limits: RangeLimits,
    reverse: bool,
) -> Result<RangeRead> {
    let begin_key = get_key(db, version, begin).await?;
    let end_key = get_key(db, version, end).await?;
    let range = KeyRange::new(begin_key, end_key);
    if range.is_empty() {
        return Ok(RangeRead::default());
    }
    scan_exact(db, version, range, limits, reverse).await
}

/// Scans an absolute key range shard by shard, stitching replies across
/// boundaries until the range or the limits are exhausted.
pub(crate) async fn scan_exact(
    db: &Database,
    version: Version,
    range: KeyRange,
    limits: RangeLimits,
    reverse: bool,
) -> Result<RangeRead> {
    let mut rows: Vec<KeyValue> = Vec::new();
    let mut remaining = limits;
    let more;
    if !reverse {
        let mut cursor = range.begin.clone();
        loop {
            let location = db.router().resolve_key(&cursor, false).await?;
            let narrowed = location.range.end.as_slice() < range.end.as_slice();
            let request_end = if narrowed { location.range.end.clone() } else { range.end.clone() };
            let request = (cursor.clone(), request_end.clone(), remaining);
            let result = db
                .balancer()
                .storage_call(&location.nodes, CallMode::Balanced, move |node| {
                    let (begin, end, limits) = request.clone();
                    async move {
                        node.get_range(
                            KeySelector::first_greater_or_equal(begin),
                            KeySelector::first_greater_or_equal(end),
                            version,
                            limits,
                            false,
                        )
                        .await
                    }
                })
                .await;
            let reply = match result {
                Ok(reply) => reply,
                Err(error) => {
                    recover_routing(db, &error, &cursor, false, version).await?;
                    continue;
                },
            };
            if reply.more && reply.rows.is_empty() {
                return Err(Error::corrupted("range reply claims more rows but carries none"));
            }
            let shard_had_more = reply.more;
            for row in reply.rows {
                remaining.consume(row.key.len(), row.value.len());
                rows.push(row);
            }
            if remaining.is_reached() {
                more = shard_had_more || narrowed;
                break;
            }
            if shard_had_more {
                cursor = keys::key_after(&rows.last().expect("shard promised more rows yet returned none").key);
                continue;
            }
            if narrowed {
                cursor = request_end;
                continue;
            }
            more = false;
            break;
        }
    } else {
        let mut cursor = range.end.clone();
        loop {
            let location = db.router().resolve_key(&cursor, true).await?;
            let narrowed = location.range.begin.as_slice() > range.begin.as_slice();
            let request_begin = if narrowed { location.range.begin.clone() } else { range.begin.clone() };
            let request = (request_begin.clone(), cursor.clone(), remaining);
            let result = db
                .balancer()
                .storage_call(&location.nodes, CallMode::Balanced, move |node| {
                    let (begin, end, limits) = request.clone();
                    async move {
                        node.get_range(
                            KeySelector::first_greater_or_equal(begin),
                            KeySelector::first_greater_or_equal(end),
                            version,
                            limits,
                            true,
                        )
                        .await
                    }
                })
                .await;
            let reply = match result {
                Ok(reply) => reply,
                Err(error) => {
                    recover_routing(db, &error, &cursor, true, version).await?;
                    continue;
                },
            };
            if reply.more && reply.rows.is_empty() {
                return Err(Error::corrupted("range reply claims more rows but carries none"));
            }
            let shard_had_more = reply.more;
            for row in reply.rows {
                remaining.consume(row.key.len(), row.value.len());
                rows.push(row);
            }
            if remaining.is_reached() {
                more = shard_had_more || narrowed;
                break;
            }
            if shard_had_more {
                // Rows arrive in descending order; the scan continues below
                // the smallest one.
                cursor = rows.last().expect("shard promised more rows yet returned none").key.clone();
                continue;
            }
            if narrowed {
                cursor = request_begin;
                continue;
            }
            more = false;
            break;
        }
    }
    let read_span = exact_read_span(&range, &rows, more, reverse);
    Ok(RangeRead { rows, more, read_span })
}

/// Incremental range delivery: shards in order, each shard carved into
/// bounded fragments fetched concurrently, rows arriving in key order
/// through a backpressured channel.
pub(crate) fn stream_range(db: Database, version: Version, range: KeyRange) -> RangeStream {
    let (sender, receiver) = mpsc::channel(db.config().stream_parallelism.max(2));
    tokio::spawn(stream_driver(db, version, range, sender));
    RangeStream { inner: ReceiverStream::new(receiver) }
}

/// Ordered, backpressured stream of range read row batches.
pub struct RangeStream {
    inner: ReceiverStream<Result<Vec<KeyValue>>>,
}

impl RangeStream {
    pub async fn next(&mut self) -> Option<Result<Vec<KeyValue>>> {
        self.inner.next().await
    }

    /// Drains the stream into one row vector.
    pub async fn collect_rows(mut self) -> Result<Vec<KeyValue>> {
        let mut rows = Vec::new();
        while let Some(batch) = self.next().await {
            rows.extend(batch?);
        }
        Ok(rows)
    }
}

impl futures::Stream for RangeStream {
    type Item = Result<Vec<KeyValue>>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

async fn stream_driver(db: Database, version: Version, range: KeyRange, sender: mpsc::Sender<Result<Vec<KeyValue>>>) {
    let fragment_bytes = db.config().stream_fragment_bytes.as_u64();
    let parallelism = db.config().stream_parallelism.max(1);
    let mut cursor = range.begin.clone();
    'shards: while cursor < range.end {
        let location = match db.router().resolve_key(&cursor, false).await {
            Ok(location) => location,
            Err(error) => {
                sender.send(Err(error)).await.ignore();
                return;
            },
        };
        let shard_end = std::cmp::min(location.range.end.clone(), range.end.clone());
        let shard_range = KeyRange::new(cursor.clone(), shard_end.clone());
        let request_range = shard_range.clone();
        let result = db
            .balancer()
            .storage_call(&location.nodes, CallMode::Balanced, move |node| {
                let range = request_range.clone();
                async move { node.split_points(range, fragment_bytes).await }
            })
            .await;
        let points = match result {
            Ok(points) => points,
            Err(error) if error.is_routing() => {
                db.router().invalidate_range(&shard_range);
                tokio::time::sleep(db.config().wrong_shard_delay).await;
                continue 'shards;
            },
            Err(error) => {
                sender.send(Err(error)).await.ignore();
                return;
            },
        };
        let mut bounds = vec![cursor.clone()];
        bounds.extend(points.into_iter().filter(|point| shard_range.contains(point)));
        bounds.push(shard_end.clone());
        let fragments: Vec<KeyRange> = bounds
            .windows(2)
            .filter(|pair| pair[0] < pair[1])
            .map(|pair| KeyRange::new(pair[0].clone(), pair[1].clone()))
            .collect();
        trace!("streaming shard {} as {} fragments", shard_range, fragments.len());
        let mut reads = futures::stream::iter(fragments.into_iter().map(|fragment| {
            let db = db.clone();
            async move { scan_exact(&db, version, fragment, RangeLimits::default(), false).await }
        }))
        .buffered(parallelism);
        while let Some(read) = reads.next().await {
            match read {
                Ok(read) => {
                    if !read.rows.is_empty() && sender.send(Ok(read.rows)).await.is_err() {
                        return;
                    }
                },
                Err(error) => {
                    sender.send(Err(error)).await.ignore();
                    return;
                },
            }
        }
        cursor = shard_end;
    }
}

/// Shared recovery for per-call failure signals: stale routing is
/// invalidated and retried after a bounded delay, anything else surfaces.
async fn recover_routing(db: &Database, error: &Error, key: &[u8], backward: bool, version: Version) -> Result<()> {
    if error.is_routing() {
        debug!("routing failure for key {key:?}: {error}");
        db.router().invalidate(key, backward);
        tokio::time::sleep(db.config().wrong_shard_delay).await;
        return Ok(());
    }
    // A read at the newest version may legitimately reach a node that no
    // longer serves the key's history after a shard handoff.
    if matches!(error, Error::TransactionTooOld) && version.is_latest() {
        debug!("latest-version read hit stale routing for key {key:?}");
        db.router().invalidate(key, backward);
        tokio::time::sleep(db.config().wrong_shard_delay).await;
        return Ok(());
    }
    Err(error.clone())
}

fn selector_read_span(begin: &KeySelector, end: &KeySelector, rows: &[KeyValue], more: bool) -> KeyRange {
    let mut span_begin = begin.key.clone();
    if let Some(first) = rows.first() {
        span_begin = std::cmp::min(span_begin, first.key.clone());
    }
    let anchor_end = if end.or_equal { keys::key_after(&end.key) } else { end.key.clone() };
    let span_end = match rows.last() {
        Some(last) if more => keys::key_after(&last.key),
        Some(last) => std::cmp::max(anchor_end, keys::key_after(&last.key)),
        None => anchor_end,
    };
    KeyRange::new(span_begin, span_end)
}

fn exact_read_span(range: &KeyRange, rows: &[KeyValue], more: bool, reverse: bool) -> KeyRange {
    if !more {
        return range.clone();
    }
    if reverse {
        let begin = rows.last().map(|row| row.key.clone()).unwrap_or_else(|| range.begin.clone());
        KeyRange::new(begin, range.end.clone())
    } else {
        let end = rows.last().map(|row| keys::key_after(&row.key)).unwrap_or_else(|| range.end.clone());
        KeyRange::new(range.begin.clone(), end)
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;
    use crate::cluster::NodeId;
    use crate::service::MemoryCluster;

    fn populate(cluster: &MemoryCluster, keys: &[&[u8]]) {
        for key in keys {
            cluster.force_write(key.to_vec(), b"v".as_slice());
        }
    }

    fn row_keys(rows: &[KeyValue]) -> Vec<Vec<u8>> {
        rows.iter().map(|row| row.key.clone()).collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_get_value_caches_location() {
        let cluster = MemoryCluster::new();
        populate(&cluster, &[b"a"]);
        let db = cluster.database();
        let version = cluster.current_version();

        let value = get_value(&db, version, b"a").await.unwrap();
        assert_that!(value.unwrap().as_ref()).is_equal_to(b"v".as_slice());
        assert_that!(cluster.location_lookups()).is_equal_to(1);

        get_value(&db, version, b"a").await.unwrap();
        assert_that!(cluster.location_lookups()).is_equal_to(1);
    }

    #[test_log::test(tokio::test)]
    async fn test_get_value_recovers_from_moved_shard() {
        let cluster = MemoryCluster::new();
        populate(&cluster, &[b"a"]);
        let db = cluster.database();

        get_value(&db, cluster.current_version(), b"a").await.unwrap();

        cluster.add_node("node-1");
        cluster.assign(KeyRange::all(), vec![NodeId::new("node-1")]);

        let value = get_value(&db, cluster.current_version(), b"a").await.unwrap();
        assert_that!(value.unwrap().as_ref()).is_equal_to(b"v".as_slice());
        assert_that!(cluster.location_lookups()).is_equal_to(2);
    }

    #[test_log::test(tokio::test)]
    async fn test_get_value_failed_node_reresolves() {
        let cluster = MemoryCluster::new();
        populate(&cluster, &[b"a"]);
        let db = cluster.database();
        get_value(&db, cluster.current_version(), b"a").await.unwrap();

        cluster.fail_node("node-0");
        cluster.add_node("node-1");
        cluster.assign(KeyRange::all(), vec![NodeId::new("node-1")]);

        let value = get_value(&db, cluster.current_version(), b"a").await.unwrap();
        assert_that!(value.unwrap().as_ref()).is_equal_to(b"v".as_slice());
        assert_that!(cluster.location_lookups()).is_equal_to(2);
    }

    #[test_log::test(tokio::test)]
    async fn test_scan_stitches_across_shards() {
        let cluster = MemoryCluster::new();
        cluster.split(b"c");
        cluster.split(b"e");
        populate(&cluster, &[b"a", b"b", b"c", b"d", b"e", b"f"]);
        let db = cluster.database();
        let version = cluster.current_version();

        let read = scan_exact(&db, version, KeyRange::new(b"a".to_vec(), b"g".to_vec()), RangeLimits::default(), false)
            .await
            .unwrap();
        assert_that!(row_keys(&read.rows))
            .is_equal_to(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec(), b"f".to_vec()]);
        assert_that!(read.more).is_false();
        assert_that!(read.read_span).is_equal_to(KeyRange::new(b"a".to_vec(), b"g".to_vec()));
    }

    #[test_log::test(tokio::test)]
    async fn test_scan_respects_row_limit() {
        let cluster = MemoryCluster::new();
        cluster.split(b"c");
        populate(&cluster, &[b"a", b"b", b"c", b"d"]);
        let db = cluster.database();
        let version = cluster.current_version();

        let read = scan_exact(&db, version, KeyRange::new(b"a".to_vec(), b"z".to_vec()), RangeLimits::rows(3), false)
            .await
            .unwrap();
        assert_that!(row_keys(&read.rows)).is_equal_to(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_that!(read.more).is_true();
        // The conflict span covers only what was inspected.
        assert_that!(read.read_span).is_equal_to(KeyRange::new(b"a".to_vec(), b"c\x00".to_vec()));
    }

    #[test_log::test(tokio::test)]
    async fn test_scan_reverse_across_shards() {
        let cluster = MemoryCluster::new();
        cluster.split(b"c");
        populate(&cluster, &[b"a", b"b", b"c", b"d"]);
        let db = cluster.database();
        let version = cluster.current_version();

        let read = scan_exact(&db, version, KeyRange::new(b"a".to_vec(), b"z".to_vec()), RangeLimits::default(), true)
            .await
            .unwrap();
        assert_that!(row_keys(&read.rows))
            .is_equal_to(vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);

        let limited = scan_exact(&db, version, KeyRange::new(b"a".to_vec(), b"z".to_vec()), RangeLimits::rows(2), true)
            .await
            .unwrap();
        assert_that!(row_keys(&limited.rows)).is_equal_to(vec![b"d".to_vec(), b"c".to_vec()]);
        assert_that!(limited.more).is_true();
        assert_that!(limited.read_span).is_equal_to(KeyRange::new(b"c".to_vec(), b"z".to_vec()));
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_more_reply_fails_fast() {
        let cluster = MemoryCluster::new();
        populate(&cluster, &[b"a", b"b"]);
        cluster.inject_empty_more_replies(true);
        let db = cluster.database();
        let version = cluster.current_version();

        let result =
            scan_exact(&db, version, KeyRange::new(b"a".to_vec(), b"z".to_vec()), RangeLimits::default(), false).await;
        match result {
            Err(Error::DataCorruption { .. }) => {},
            r => panic!("expect data corruption, got {r:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_get_key_resolves_across_shards() {
        let cluster = MemoryCluster::new();
        cluster.split(b"c");
        populate(&cluster, &[b"a", b"b", b"c", b"d"]);
        let db = cluster.database();
        let version = cluster.current_version();

        let key = get_key(&db, version, KeySelector { key: b"a".to_vec(), or_equal: false, offset: 4 }).await.unwrap();
        assert_that!(key).is_equal_to(b"d".to_vec());

        let key = get_key(&db, version, KeySelector::last_less_than(b"c".to_vec())).await.unwrap();
        assert_that!(key).is_equal_to(b"b".to_vec());
    }

    #[test_log::test(tokio::test)]
    async fn test_get_range_with_selectors() {
        let cluster = MemoryCluster::new();
        cluster.split(b"c");
        populate(&cluster, &[b"a", b"b", b"c", b"d"]);
        let db = cluster.database();
        let version = cluster.current_version();

        let read = get_range(
            &db,
            version,
            KeySelector::first_greater_than(b"a".to_vec()),
            KeySelector::first_greater_than(b"c".to_vec()),
            RangeLimits::default(),
            false,
        )
        .await
        .unwrap();
        assert_that!(row_keys(&read.rows)).is_equal_to(vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_get_range_offset_selectors_fall_back() {
        let cluster = MemoryCluster::new();
        cluster.split(b"c");
        populate(&cluster, &[b"a", b"b", b"c", b"d", b"e"]);
        let db = cluster.database();
        let version = cluster.current_version();

        // Walks backward from "e" over two shards before any row matches.
        let read = get_range(
            &db,
            version,
            KeySelector { key: b"e".to_vec(), or_equal: false, offset: -2 },
            KeySelector::first_greater_or_equal(b"e".to_vec()),
            RangeLimits::default(),
            false,
        )
        .await
        .unwrap();
        assert_that!(row_keys(&read.rows)).is_equal_to(vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_stream_range_preserves_order() {
        let cluster = MemoryCluster::new();
        cluster.split(b"h");
        let expected: Vec<Vec<u8>> = (0..50u8).map(|i| vec![b'a' + i % 26, i]).collect();
        let mut sorted = expected.clone();
        sorted.sort();
        for key in &sorted {
            cluster.force_write(key.clone(), b"value".as_slice());
        }
        let db = cluster.database();
        let version = cluster.current_version();

        let mut config = db.config().clone();
        config.stream_fragment_bytes = bytesize::ByteSize(64);
        let db = crate::db::Database::open(cluster.env().with_config(config));

        let stream = stream_range(db, version, KeyRange::all());
        let rows = stream.collect_rows().await.unwrap();
        assert_that!(row_keys(&rows)).is_equal_to(sorted);
    }
}
