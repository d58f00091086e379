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

//! Key ranges, key selectors and range read limits.

use std::cmp::Ordering::{self, *};

use crate::keys;

/// Half-open `[begin, end)` byte-string interval. An empty range carries no
/// meaning; operations either reject or drop it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub begin: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self { begin: begin.into(), end: end.into() }
    }

    /// The range covering exactly `key`.
    pub fn single(key: impl Into<Vec<u8>>) -> Self {
        let begin = key.into();
        let end = keys::key_after(&begin);
        Self { begin, end }
    }

    /// The whole key space, system keys included.
    pub fn all() -> Self {
        Self { begin: Vec::new(), end: keys::MAX_KEY.to_vec() }
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.begin.as_slice() <= key && key < self.end.as_slice()
    }

    pub fn intersects(&self, other: &KeyRange) -> bool {
        !(self.end <= other.begin || other.end <= self.begin)
    }

    /// The overlap of two ranges, if any.
    pub fn intersection(&self, other: &KeyRange) -> Option<KeyRange> {
        let begin = std::cmp::max(self.begin.as_slice(), other.begin.as_slice());
        let end = std::cmp::min(self.end.as_slice(), other.end.as_slice());
        if begin < end {
            Some(KeyRange::new(begin, end))
        } else {
            None
        }
    }

    /// Positions `key` relative to this range: `Less` when the whole range
    /// sorts before `key`, `Greater` when it sorts after.
    pub fn compare(&self, key: &[u8]) -> Ordering {
        if self.end.as_slice() <= key {
            Less
        } else if key < self.begin.as_slice() {
            Greater
        } else {
            Equal
        }
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}, {:?})", self.begin, self.end)
    }
}

/// A key position described relative to existing keys.
///
/// A selector names an anchor `key`, whether the anchor itself participates
/// (`or_equal`) and an `offset` counted in existing keys. `offset > 0`
/// searches at or right of the anchor, `offset <= 0` strictly left of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySelector {
    pub key: Vec<u8>,
    pub or_equal: bool,
    pub offset: i32,
}

impl KeySelector {
    pub fn first_greater_or_equal(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), or_equal: false, offset: 1 }
    }

    pub fn first_greater_than(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), or_equal: true, offset: 1 }
    }

    pub fn last_less_than(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), or_equal: false, offset: 0 }
    }

    pub fn last_less_or_equal(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), or_equal: true, offset: 0 }
    }

    /// Whether resolution searches strictly before the anchor key, which
    /// routes to the shard owning the anchor's predecessor.
    pub fn is_backward(&self) -> bool {
        self.offset <= 0
    }

    /// Whether this selector trivially resolves to its own anchor when used
    /// as a range boundary.
    pub fn is_first_greater_or_equal(&self) -> bool {
        !self.or_equal && self.offset == 1
    }
}

impl std::fmt::Display for KeySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{}{:+}", self.key, if self.or_equal { "=" } else { "" }, self.offset)
    }
}

/// Row and byte caps for one range read. Whichever cap is reached first
/// stops the scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeLimits {
    pub rows: usize,
    pub bytes: usize,
}

impl RangeLimits {
    pub const UNLIMITED: usize = usize::MAX;

    pub fn new(rows: usize, bytes: usize) -> Self {
        Self { rows, bytes }
    }

    pub fn rows(rows: usize) -> Self {
        Self { rows, bytes: Self::UNLIMITED }
    }

    pub fn is_valid(&self) -> bool {
        self.rows > 0 && self.bytes > 0
    }

    pub fn is_reached(&self) -> bool {
        self.rows == 0 || self.bytes == 0
    }

    /// Accounts one returned row against the caps.
    pub fn consume(&mut self, key_len: usize, value_len: usize) {
        self.rows = self.rows.saturating_sub(1);
        self.bytes = self.bytes.saturating_sub(key_len + value_len);
    }
}

impl Default for RangeLimits {
    fn default() -> Self {
        Self { rows: Self::UNLIMITED, bytes: Self::UNLIMITED }
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_range_contains() {
        let range = KeyRange::new(b"b".to_vec(), b"d".to_vec());
        assert_that!(range.contains(b"b")).is_true();
        assert_that!(range.contains(b"c")).is_true();
        assert_that!(range.contains(b"d")).is_false();
        assert_that!(range.contains(b"a")).is_false();
    }

    #[test]
    fn test_range_single() {
        let range = KeyRange::single(b"k".to_vec());
        assert_that!(range.contains(b"k")).is_true();
        assert_that!(range.contains(b"k\x00")).is_false();
        assert_that!(range.is_empty()).is_false();
    }

    #[test_case(b"a", b"b", b"b", b"c", None; "touching")]
    #[test_case(b"a", b"c", b"b", b"d", Some((b"b" as &[u8], b"c" as &[u8])); "overlapping")]
    #[test_case(b"a", b"z", b"f", b"g", Some((b"f" as &[u8], b"g" as &[u8])); "contained")]
    fn test_range_intersection(b1: &[u8], e1: &[u8], b2: &[u8], e2: &[u8], expect: Option<(&[u8], &[u8])>) {
        let r1 = KeyRange::new(b1, e1);
        let r2 = KeyRange::new(b2, e2);
        let expect = expect.map(|(b, e)| KeyRange::new(b, e));
        assert_that!(r1.intersection(&r2)).is_equal_to(expect.clone());
        assert_that!(r2.intersection(&r1)).is_equal_to(expect);
    }

    #[test]
    fn test_range_compare() {
        let range = KeyRange::new(b"b".to_vec(), b"d".to_vec());
        assert_that!(range.compare(b"a")).is_equal_to(std::cmp::Ordering::Greater);
        assert_that!(range.compare(b"c")).is_equal_to(std::cmp::Ordering::Equal);
        assert_that!(range.compare(b"d")).is_equal_to(std::cmp::Ordering::Less);
    }

    #[test]
    fn test_selector_direction() {
        assert_that!(KeySelector::first_greater_or_equal(b"k".to_vec()).is_backward()).is_false();
        assert_that!(KeySelector::first_greater_than(b"k".to_vec()).is_backward()).is_false();
        assert_that!(KeySelector::last_less_than(b"k".to_vec()).is_backward()).is_true();
        assert_that!(KeySelector::last_less_or_equal(b"k".to_vec()).is_backward()).is_true();
    }

    #[test]
    fn test_limits_consume() {
        let mut limits = RangeLimits::new(2, 10);
        assert_that!(limits.is_reached()).is_false();
        limits.consume(3, 4);
        assert_that!(limits.is_reached()).is_false();
        limits.consume(3, 4);
        assert_that!(limits.is_reached()).is_true();

        let mut limits = RangeLimits::new(10, 5);
        limits.consume(4, 4);
        assert_that!(limits.is_reached()).is_true();
    }
}
