// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Options accepted by node construction and the advertise/subscribe
//! operations.

use crate::config::{self, UNTHROTTLED};

/// Per-node options. The partition defaults to `IGN_PARTITION`; the
/// namespace prefixes every relative topic the node uses.
#[derive(Clone, Debug)]
pub struct NodeOptions {
    partition: String,
    namespace: String,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self { partition: config::partition(), namespace: String::new() }
    }
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the process-wide partition for this node.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    /// Set the namespace applied beneath the partition.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Options attached to an advertised topic and carried in its discovery
/// record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdvertiseMessageOptions {
    /// Maximum publication rate; [`UNTHROTTLED`] disables the limit.
    pub msgs_per_sec: u64,
}

impl Default for AdvertiseMessageOptions {
    fn default() -> Self {
        Self { msgs_per_sec: UNTHROTTLED }
    }
}

impl AdvertiseMessageOptions {
    pub fn throttled(msgs_per_sec: u64) -> Self {
        Self { msgs_per_sec }
    }

    pub fn is_throttled(&self) -> bool {
        self.msgs_per_sec != UNTHROTTLED
    }
}

/// Options attached to an advertised service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdvertiseServiceOptions {}

/// Options attached to a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Maximum delivery rate; [`UNTHROTTLED`] disables the limit.
    pub msgs_per_sec: u64,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { msgs_per_sec: UNTHROTTLED }
    }
}

impl SubscribeOptions {
    pub fn throttled(msgs_per_sec: u64) -> Self {
        Self { msgs_per_sec }
    }

    pub fn is_throttled(&self) -> bool {
        self.msgs_per_sec != UNTHROTTLED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_subscribe_options_are_unthrottled() {
        assert!(!SubscribeOptions::default().is_throttled());
        assert!(SubscribeOptions::throttled(10).is_throttled());
    }

    #[test]
    fn test_node_options_builders() {
        let opts = NodeOptions::new().with_partition("test0").with_namespace("robot1");
        assert_eq!(opts.partition(), "test0");
        assert_eq!(opts.namespace(), "robot1");
    }
}
