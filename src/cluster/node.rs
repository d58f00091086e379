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

use smallvec::SmallVec;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NodeId(pub(crate) String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for NodeId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Ordered candidate serving nodes for one key range.
///
/// The order encodes routing preference. A set is never mutated in place:
/// shard movement and cache augmentation replace it wholesale so that every
/// holder of a shared reference keeps a consistent view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSet {
    nodes: SmallVec<[NodeId; 4]>,
    verifier: Option<NodeId>,
    cache_augmented: bool,
}

impl NodeSet {
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self { nodes: nodes.into_iter().collect(), verifier: None, cache_augmented: false }
    }

    /// Designates a secondary node that shadow-verifies replies from this
    /// set without participating in serving.
    pub fn with_verifier(self, verifier: NodeId) -> Self {
        Self { verifier: Some(verifier), ..self }
    }

    /// Appends auxiliary cache nodes and marks the set as augmented.
    pub fn with_cache_nodes(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.nodes.extend(nodes);
        self.cache_augmented = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    pub fn first(&self) -> Option<&NodeId> {
        self.nodes.first()
    }

    pub fn verifier(&self) -> Option<&NodeId> {
        self.verifier.as_ref()
    }

    pub fn is_cache_augmented(&self) -> bool {
        self.cache_augmented
    }
}

impl FromIterator<NodeId> for NodeSet {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[test]
    fn test_node_set() {
        let set = NodeSet::new([NodeId::new("n1"), NodeId::new("n2")]);
        assert_that!(set.len()).is_equal_to(2);
        assert_that!(set.first().unwrap().as_ref()).is_equal_to("n1");
        assert_that!(set.is_cache_augmented()).is_false();
        assert_that!(set.verifier().is_none()).is_true();
    }

    #[test]
    fn test_node_set_cache_augmented() {
        let set = NodeSet::new([NodeId::new("n1")]).with_cache_nodes([NodeId::new("c1")]);
        assert_that!(set.len()).is_equal_to(2);
        assert_that!(set.is_cache_augmented()).is_true();
    }

    #[test]
    fn test_node_set_verifier() {
        let set = NodeSet::new([NodeId::new("n1")]).with_verifier(NodeId::new("v1"));
        assert_that!(set.verifier().unwrap().as_ref()).is_equal_to("v1");
        assert_that!(set.len()).is_equal_to(1);
    }
}
