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

//! Shard routing: the location cache, the failure-aware router on top of it
//! and the load-balanced per-node call primitive.

mod cache;
mod call;
mod router;

pub use self::cache::ShardLocationCache;
pub use self::call::{CallMode, LoadBalancer};
pub use self::router::{FailureAwareRouter, ShardLocation};
