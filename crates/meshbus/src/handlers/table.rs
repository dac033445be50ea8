// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two-level handler storage shared by subscriptions, repliers, and
//! pending requests: `topic -> node -> handler_id -> handler`.
//!
//! The table itself is not synchronized; it lives behind the shared core
//! lock, which is what makes "bulk remove then lookup" atomic.

use std::collections::HashMap;
use std::sync::Arc;

use crate::identity::{HandlerId, NodeId};

/// Handlers for one topic, grouped by owning node.
pub type TopicHandlers<H> = HashMap<NodeId, HashMap<HandlerId, Arc<H>>>;

pub struct HandlerTable<H: ?Sized> {
    map: HashMap<String, TopicHandlers<H>>,
}

impl<H: ?Sized> Default for HandlerTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> HandlerTable<H> {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Insert a handler under `(topic, node, handler_id)`. Returns the
    /// previous handler when that exact triple was occupied.
    pub fn add_handler(
        &mut self,
        topic: &str,
        node_id: NodeId,
        handler_id: HandlerId,
        handler: Arc<H>,
    ) -> Option<Arc<H>> {
        self.map
            .entry(topic.to_string())
            .or_default()
            .entry(node_id)
            .or_default()
            .insert(handler_id, handler)
    }

    /// Look up one handler by its full triple.
    pub fn handler(
        &self,
        topic: &str,
        node_id: NodeId,
        handler_id: HandlerId,
    ) -> Option<Arc<H>> {
        self.map.get(topic)?.get(&node_id)?.get(&handler_id).cloned()
    }

    /// Any handler for `topic` matching `pred`; iteration order is
    /// unspecified.
    pub fn first_handler(&self, topic: &str, mut pred: impl FnMut(&H) -> bool) -> Option<Arc<H>> {
        self.map
            .get(topic)?
            .values()
            .flat_map(|handlers| handlers.values())
            .find(|h| pred(h))
            .cloned()
    }

    /// Snapshot of every handler for a topic.
    pub fn handlers(&self, topic: &str) -> Vec<Arc<H>> {
        self.map
            .get(topic)
            .map(|nodes| {
                nodes
                    .values()
                    .flat_map(|handlers| handlers.values().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_handlers_for_topic(&self, topic: &str) -> bool {
        self.map.get(topic).is_some_and(|nodes| !nodes.is_empty())
    }

    /// Remove one handler, pruning empty inner maps.
    pub fn remove_handler(&mut self, topic: &str, node_id: NodeId, handler_id: HandlerId) -> bool {
        let Some(nodes) = self.map.get_mut(topic) else {
            return false;
        };
        let Some(handlers) = nodes.get_mut(&node_id) else {
            return false;
        };
        let removed = handlers.remove(&handler_id).is_some();
        if handlers.is_empty() {
            nodes.remove(&node_id);
        }
        if nodes.is_empty() {
            self.map.remove(topic);
        }
        removed
    }

    /// Remove every handler owned by `node_id` on `topic`. Returns the
    /// removed handlers so callers can run teardown on them.
    pub fn remove_node_from_topic(&mut self, topic: &str, node_id: NodeId) -> Vec<Arc<H>> {
        let Some(nodes) = self.map.get_mut(topic) else {
            return Vec::new();
        };
        let removed = nodes
            .remove(&node_id)
            .map(|handlers| handlers.into_values().collect())
            .unwrap_or_default();
        if nodes.is_empty() {
            self.map.remove(topic);
        }
        removed
    }

    /// Remove every handler owned by `node_id` across all topics. Returns
    /// `(topic, handler)` pairs.
    pub fn remove_by_node(&mut self, node_id: NodeId) -> Vec<(String, Arc<H>)> {
        let mut removed = Vec::new();
        self.map.retain(|topic, nodes| {
            if let Some(handlers) = nodes.remove(&node_id) {
                for handler in handlers.into_values() {
                    removed.push((topic.clone(), handler));
                }
            }
            !nodes.is_empty()
        });
        removed
    }

    /// Topics on which `node_id` owns at least one handler.
    pub fn topics_for_node(&self, node_id: NodeId) -> Vec<String> {
        self.map
            .iter()
            .filter(|(_, nodes)| nodes.contains_key(&node_id))
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str);

    #[test]
    fn test_add_and_lookup() {
        let mut table: HandlerTable<Tag> = HandlerTable::new();
        let node = NodeId::new();
        let id = HandlerId::new();
        assert!(table.add_handler("@/a", node, id, Arc::new(Tag("one"))).is_none());

        let found = table.handler("@/a", node, id).expect("handler should be stored");
        assert_eq!(found.0, "one");
        assert!(table.has_handlers_for_topic("@/a"));
        assert!(!table.has_handlers_for_topic("@/b"));
    }

    #[test]
    fn test_add_returns_previous_on_same_triple() {
        let mut table: HandlerTable<Tag> = HandlerTable::new();
        let node = NodeId::new();
        let id = HandlerId::new();
        table.add_handler("@/a", node, id, Arc::new(Tag("old")));
        let prev = table
            .add_handler("@/a", node, id, Arc::new(Tag("new")))
            .expect("same triple should evict");
        assert_eq!(prev.0, "old");
        assert_eq!(table.handlers("@/a").len(), 1);
    }

    #[test]
    fn test_first_handler_respects_predicate() {
        let mut table: HandlerTable<Tag> = HandlerTable::new();
        let node = NodeId::new();
        table.add_handler("@/a", node, HandlerId::new(), Arc::new(Tag("x")));
        table.add_handler("@/a", node, HandlerId::new(), Arc::new(Tag("y")));

        let found = table.first_handler("@/a", |h| h.0 == "y").expect("predicate should match");
        assert_eq!(found.0, "y");
        assert!(table.first_handler("@/a", |h| h.0 == "z").is_none());
    }

    #[test]
    fn test_live_set_equals_added_minus_removed() {
        let mut table: HandlerTable<Tag> = HandlerTable::new();
        let node_a = NodeId::new();
        let node_b = NodeId::new();
        let ids: Vec<HandlerId> = (0..4).map(|_| HandlerId::new()).collect();

        table.add_handler("@/a", node_a, ids[0], Arc::new(Tag("a0")));
        table.add_handler("@/a", node_a, ids[1], Arc::new(Tag("a1")));
        table.add_handler("@/a", node_b, ids[2], Arc::new(Tag("b0")));
        table.add_handler("@/b", node_b, ids[3], Arc::new(Tag("b1")));

        assert!(table.remove_handler("@/a", node_a, ids[0]));
        let removed = table.remove_by_node(node_b);
        assert_eq!(removed.len(), 2);

        // Exactly a1 remains.
        assert_eq!(table.handlers("@/a").len(), 1);
        assert!(table.handler("@/a", node_a, ids[1]).is_some());
        assert!(!table.has_handlers_for_topic("@/b"));
        for id in [ids[0], ids[2], ids[3]] {
            assert!(table.handler("@/a", node_a, id).is_none());
            assert!(table.handler("@/a", node_b, id).is_none());
        }
    }

    #[test]
    fn test_remove_node_from_topic_leaves_other_topics() {
        let mut table: HandlerTable<Tag> = HandlerTable::new();
        let node = NodeId::new();
        table.add_handler("@/a", node, HandlerId::new(), Arc::new(Tag("a")));
        table.add_handler("@/b", node, HandlerId::new(), Arc::new(Tag("b")));

        let removed = table.remove_node_from_topic("@/a", node);
        assert_eq!(removed.len(), 1);
        assert!(!table.has_handlers_for_topic("@/a"));
        assert!(table.has_handlers_for_topic("@/b"));
        assert_eq!(table.topics_for_node(node), vec!["@/b".to_string()]);
    }
}
