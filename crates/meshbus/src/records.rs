// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher records and the table that tracks them.
//!
//! A record describes one offering (address, type, identity) advertised by
//! discovery. [`PublisherTable`] keys records by
//! `topic -> process -> node` and backs three different concerns in the
//! shared core: subscriber connections, remote subscribers, and the remote
//! side of both discovery stores.

use std::collections::HashMap;

use crate::identity::{NodeId, ProcessId, SocketId};
use crate::node::{AdvertiseMessageOptions, AdvertiseServiceOptions};

/// Common shape of message and service publisher records.
pub trait PublisherRecord: Clone + Send + Sync + 'static {
    /// Fully qualified topic this record offers.
    fn topic(&self) -> &str;
    /// Primary endpoint of the offering (data or service address).
    fn addr(&self) -> &str;
    fn process_id(&self) -> ProcessId;
    fn node_id(&self) -> NodeId;
}

/// One advertised message publisher.
#[derive(Clone, Debug, PartialEq)]
pub struct MessagePublisher {
    pub topic: String,
    /// Endpoint of the data (pub/sub) socket.
    pub msg_addr: String,
    /// Endpoint of the control socket used for subscribe notifications.
    pub ctrl_addr: String,
    pub process_id: ProcessId,
    pub node_id: NodeId,
    pub msg_type: String,
    pub options: AdvertiseMessageOptions,
}

impl PublisherRecord for MessagePublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn addr(&self) -> &str {
        &self.msg_addr
    }

    fn process_id(&self) -> ProcessId {
        self.process_id
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }
}

/// One advertised service responder.
#[derive(Clone, Debug, PartialEq)]
pub struct ServicePublisher {
    pub topic: String,
    /// Endpoint of the replier router socket.
    pub addr: String,
    /// Routing identity of the replier socket.
    pub socket_id: SocketId,
    pub process_id: ProcessId,
    pub node_id: NodeId,
    pub req_type: String,
    pub rep_type: String,
    pub options: AdvertiseServiceOptions,
}

impl PublisherRecord for ServicePublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    fn process_id(&self) -> ProcessId {
        self.process_id
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }
}

/// Records keyed by `topic -> process -> node`.
///
/// Insertion is idempotent on the key triple; a repeated announcement for
/// the same offering is a no-op that reports `false`.
pub struct PublisherTable<P> {
    map: HashMap<String, HashMap<ProcessId, HashMap<NodeId, P>>>,
}

impl<P: PublisherRecord> Default for PublisherTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PublisherRecord> PublisherTable<P> {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Insert a record. Returns `false` when the same
    /// `(topic, process, node)` was already present.
    pub fn add(&mut self, record: P) -> bool {
        let nodes = self
            .map
            .entry(record.topic().to_string())
            .or_default()
            .entry(record.process_id())
            .or_default();
        if nodes.contains_key(&record.node_id()) {
            return false;
        }
        nodes.insert(record.node_id(), record);
        true
    }

    pub fn get(&self, topic: &str, process_id: ProcessId, node_id: NodeId) -> Option<&P> {
        self.map.get(topic)?.get(&process_id)?.get(&node_id)
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.map.get(topic).is_some_and(|procs| !procs.is_empty())
    }

    /// Whether any record in the table offers `addr`.
    pub fn has_addr(&self, addr: &str) -> bool {
        self.map
            .values()
            .flat_map(|procs| procs.values())
            .flat_map(|nodes| nodes.values())
            .any(|record| record.addr() == addr)
    }

    /// All records for a topic, grouped by process.
    pub fn publishers(&self, topic: &str) -> HashMap<ProcessId, Vec<P>> {
        let mut out = HashMap::new();
        if let Some(procs) = self.map.get(topic) {
            for (pid, nodes) in procs {
                out.insert(*pid, nodes.values().cloned().collect());
            }
        }
        out
    }

    /// Remove the record for one node, pruning empty inner maps.
    pub fn remove_by_node(&mut self, topic: &str, process_id: ProcessId, node_id: NodeId) -> bool {
        let Some(procs) = self.map.get_mut(topic) else {
            return false;
        };
        let Some(nodes) = procs.get_mut(&process_id) else {
            return false;
        };
        let removed = nodes.remove(&node_id).is_some();
        if nodes.is_empty() {
            procs.remove(&process_id);
        }
        if procs.is_empty() {
            self.map.remove(topic);
        }
        removed
    }

    /// Remove every record owned by a process, across all topics. Returns
    /// the removed records.
    pub fn remove_by_process(&mut self, process_id: ProcessId) -> Vec<P> {
        let mut removed = Vec::new();
        self.map.retain(|_, procs| {
            if let Some(nodes) = procs.remove(&process_id) {
                removed.extend(nodes.into_values());
            }
            !procs.is_empty()
        });
        removed
    }

    /// Every topic with at least one record.
    pub fn topics(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    /// Visit every record.
    pub fn for_each(&self, mut f: impl FnMut(&P)) {
        for procs in self.map.values() {
            for nodes in procs.values() {
                for record in nodes.values() {
                    f(record);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topic: &str, pid: ProcessId, nid: NodeId, addr: &str) -> MessagePublisher {
        MessagePublisher {
            topic: topic.to_string(),
            msg_addr: addr.to_string(),
            ctrl_addr: format!("{}-ctrl", addr),
            process_id: pid,
            node_id: nid,
            msg_type: "x.Int32".to_string(),
            options: AdvertiseMessageOptions::default(),
        }
    }

    #[test]
    fn test_add_is_idempotent_per_key() {
        let mut table = PublisherTable::new();
        let pid = ProcessId::new();
        let nid = NodeId::new();
        assert!(table.add(record("@/a", pid, nid, "tcp://h:1")));
        assert!(!table.add(record("@/a", pid, nid, "tcp://h:1")));
        assert_eq!(table.publishers("@/a").len(), 1);
    }

    #[test]
    fn test_addr_lookup() {
        let mut table = PublisherTable::new();
        table.add(record("@/a", ProcessId::new(), NodeId::new(), "tcp://h:1"));
        assert!(table.has_addr("tcp://h:1"));
        assert!(!table.has_addr("tcp://h:2"));
    }

    #[test]
    fn test_remove_by_node_prunes() {
        let mut table = PublisherTable::new();
        let pid = ProcessId::new();
        let nid = NodeId::new();
        table.add(record("@/a", pid, nid, "tcp://h:1"));
        assert!(table.remove_by_node("@/a", pid, nid));
        assert!(!table.has_topic("@/a"));
        assert!(table.topics().is_empty());
        // Removing again is a no-op.
        assert!(!table.remove_by_node("@/a", pid, nid));
    }

    #[test]
    fn test_remove_by_process_spans_topics() {
        let mut table = PublisherTable::new();
        let gone = ProcessId::new();
        let stays = ProcessId::new();
        table.add(record("@/a", gone, NodeId::new(), "tcp://h:1"));
        table.add(record("@/b", gone, NodeId::new(), "tcp://h:2"));
        table.add(record("@/a", stays, NodeId::new(), "tcp://h:3"));

        let removed = table.remove_by_process(gone);
        assert_eq!(removed.len(), 2);
        assert!(table.has_topic("@/a"));
        assert!(!table.has_topic("@/b"));
    }
}
