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

use uuid::Uuid;

/// Keys at or above this prefix belong to the system key space and require
/// system key access on the issuing transaction.
pub const SYSTEM_KEY_PREFIX: &[u8] = &[0xff];

/// Exclusive upper bound of the whole key space, system keys included.
pub const MAX_KEY: &[u8] = &[0xff, 0xff];

const SELF_CONFLICTING_PREFIX: &[u8] = b"\xff/SC/";

pub fn is_system_key(key: &[u8]) -> bool {
    key.first() == Some(&0xff)
}

/// The smallest key strictly greater than `key`.
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend(key.iter());
    next.push(0x00);
    next
}

/// The exclusive upper bound of all keys prefixed with `key`. Trailing
/// `0xff` bytes carry no in-place successor and are dropped.
pub fn prefix_end(key: &[u8]) -> Vec<u8> {
    let mut end = key.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    MAX_KEY.to_vec()
}

/// Private key used to make a transaction conflict with its own probe.
pub fn self_conflicting_key(id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(SELF_CONFLICTING_PREFIX.len() + 16);
    key.extend(SELF_CONFLICTING_PREFIX.iter());
    key.extend(id.as_bytes().iter());
    key
}
