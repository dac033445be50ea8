// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # meshbus - brokerless peer-to-peer message transport
//!
//! A transport library that lets independent processes exchange typed
//! messages through two primitives: publish/subscribe on named topics and
//! request/reply on named service endpoints. Peers discover each other over
//! UDP beacons on the local network; no central broker participates in
//! steady-state traffic.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshbus::{Message, Node};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Int32 { value: i32 }
//!
//! impl Message for Int32 {
//!     const TYPE_NAME: &'static str = "example.msgs.Int32";
//!     fn encode(&self) -> Vec<u8> { self.value.to_le_bytes().to_vec() }
//!     fn decode(data: &[u8]) -> Option<Self> {
//!         Some(Self { value: i32::from_le_bytes(data.try_into().ok()?) })
//!     }
//! }
//!
//! let node = Node::new();
//! node.subscribe("/chatter", |msg: &Int32| println!("got {}", msg.value))?;
//!
//! let publisher = node.advertise::<Int32>("/chatter", Default::default())?;
//! publisher.publish(&Int32 { value: 7 })?;
//! # Ok::<(), meshbus::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                           Node facade                              |
//! |     advertise / subscribe / advertise_service / request            |
//! +--------------------------------------------------------------------+
//! |                      Shared core (one per process)                 |
//! |   handler tables | connection tables | outbound sockets | lock     |
//! +------------------------------+-------------------------------------+
//! |       Reception loop         |         Discovery beacons           |
//! |  SUB / control / replier /   |   msg beacon (UDP 11317)            |
//! |  response-receiver sockets   |   srv beacon (UDP 11318)            |
//! +------------------------------+-------------------------------------+
//! |                    ZeroMQ data plane (TCP)                         |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Node`] | Entry point; owns subscriptions and service handlers |
//! | [`Publisher`] | Handle returned by `advertise`, used to publish |
//! | [`Message`] | Trait tying a payload type to its wire type name |
//! | [`MessageInfo`] | Metadata handed to subscription callbacks |
//!
//! ## Environment
//!
//! - `IGN_PARTITION`: default partition for every node in the process.
//! - `IGN_VERBOSE=1`: diagnostic logging on stderr.
//! - `IGN_IP`: preferred local IPv4 address for socket binding.
//! - `IGN_TRANSPORT_USERNAME` / `IGN_TRANSPORT_PASSWORD`: PLAIN credentials.

pub mod config;
mod core;
pub mod discovery;
mod handlers;
mod identity;
mod message;
mod node;
mod records;
pub mod topic;
mod transport;
mod verbose;

pub use crate::handlers::{HandlerKind, OpaqueMsg, ReplyHandler, SubscriptionHandler};
pub use crate::identity::{HandlerId, NodeId, ProcessId, SocketId};
pub use crate::message::{Empty, Message, MessageInfo, GENERIC_MESSAGE_TYPE};
pub use crate::node::{
    AdvertiseMessageOptions, AdvertiseServiceOptions, Node, NodeOptions, Publisher,
    SubscribeOptions,
};
pub use crate::records::{MessagePublisher, PublisherRecord, ServicePublisher};

/// Errors surfaced by the node facade.
///
/// Peer and protocol failures never show up here: a remote peer that is not
/// up yet is retried on the next discovery event, and a malformed frame is
/// dropped by the reception loop. This enum covers the conditions a caller
/// can act on.
#[derive(Debug)]
pub enum Error {
    /// The topic or service name did not survive validation.
    InvalidTopic(String),
    /// The node already advertised this topic.
    AlreadyAdvertised(String),
    /// The node never advertised this topic.
    NotAdvertised(String),
    /// Declared message type does not match the registered one.
    TypeMismatch,
    /// The discovery service rejected an operation (not started, send failed).
    DiscoveryFailure,
    /// A blocking request expired, or its owner went away while waiting.
    Timeout,
    /// Exactly one of `IGN_TRANSPORT_USERNAME` / `IGN_TRANSPORT_PASSWORD`
    /// is set.
    AuthConfigError,
    /// A data-plane socket could not be created, bound, or written.
    SocketError(String),
    /// Payload could not be encoded or decoded.
    SerializationError,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTopic(name) => write!(f, "Invalid topic name: [{}]", name),
            Error::AlreadyAdvertised(topic) => write!(f, "Topic already advertised: [{}]", topic),
            Error::NotAdvertised(topic) => write!(f, "Topic not advertised: [{}]", topic),
            Error::TypeMismatch => write!(f, "Message type mismatch"),
            Error::DiscoveryFailure => write!(f, "Discovery operation failed"),
            Error::Timeout => write!(f, "Request timed out"),
            Error::AuthConfigError => write!(
                f,
                "Both IGN_TRANSPORT_USERNAME and IGN_TRANSPORT_PASSWORD must be set to \
                 enable authentication"
            ),
            Error::SocketError(msg) => write!(f, "Socket error: {}", msg),
            Error::SerializationError => write!(f, "Payload serialization failed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<zmq::Error> for Error {
    fn from(e: zmq::Error) -> Self {
        Error::SocketError(e.to_string())
    }
}

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
