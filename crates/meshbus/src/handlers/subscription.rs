// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription handlers.
//!
//! The reception loop only ever holds a byte string and a type name, so
//! handlers are modeled as a capability set: declare a type name, turn
//! bytes into an opaque decoded value once, and run the user callback
//! against that value. The decoded value is shared across every handler of
//! the same kind and type within one dispatch, so a payload is decoded at
//! most once per delivery.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::UNTHROTTLED;
use crate::handlers::HandlerKind;
use crate::identity::{HandlerId, NodeId};
use crate::message::{Message, MessageInfo, GENERIC_MESSAGE_TYPE};

/// Decoded payload shared across handlers within one dispatch.
pub type OpaqueMsg = Arc<dyn Any + Send + Sync>;

/// A local subscription stored in the shared core's table.
pub trait SubscriptionHandler: Send + Sync {
    /// Declared payload type; [`GENERIC_MESSAGE_TYPE`] accepts anything.
    fn type_name(&self) -> &str;

    fn node_id(&self) -> NodeId;

    fn handler_id(&self) -> HandlerId;

    fn kind(&self) -> HandlerKind;

    /// Decode the payload into the opaque value `run_callback` consumes.
    /// `None` means the bytes are not a valid payload for this handler.
    fn create_msg(&self, data: &[u8]) -> Option<OpaqueMsg>;

    /// Invoke the user callback. Returns `false` when the opaque value is
    /// not of the expected shape or the subscription is throttled.
    fn run_callback(&self, msg: &OpaqueMsg, info: &MessageInfo) -> bool;
}

/// Message-rate limiter for throttled subscriptions and publishers.
pub struct Throttle {
    period: Option<Duration>,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    /// `msgs_per_sec == UNTHROTTLED` disables the limiter.
    pub fn new(msgs_per_sec: u64) -> Self {
        let period = if msgs_per_sec == UNTHROTTLED || msgs_per_sec == 0 {
            None
        } else {
            Some(Duration::from_secs(1) / msgs_per_sec.min(u32::MAX as u64) as u32)
        };
        Self { period, last: Mutex::new(None) }
    }

    /// Whether the next message may pass; advances the window when it does.
    pub fn admit(&self) -> bool {
        let Some(period) = self.period else {
            return true;
        };
        let mut last = self.last.lock();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Subscription that decodes into a concrete [`Message`] type.
pub struct TypedSubscriptionHandler<M: Message> {
    node_id: NodeId,
    handler_id: HandlerId,
    throttle: Throttle,
    callback: Box<dyn Fn(&M, &MessageInfo) + Send + Sync>,
}

impl<M: Message> TypedSubscriptionHandler<M> {
    pub fn new(
        node_id: NodeId,
        msgs_per_sec: u64,
        callback: impl Fn(&M, &MessageInfo) + Send + Sync + 'static,
    ) -> Self {
        Self {
            node_id,
            handler_id: HandlerId::new(),
            throttle: Throttle::new(msgs_per_sec),
            callback: Box::new(callback),
        }
    }
}

impl<M: Message> SubscriptionHandler for TypedSubscriptionHandler<M> {
    fn type_name(&self) -> &str {
        M::TYPE_NAME
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn handler_id(&self) -> HandlerId {
        self.handler_id
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Typed
    }

    fn create_msg(&self, data: &[u8]) -> Option<OpaqueMsg> {
        M::decode(data).map(|msg| Arc::new(msg) as OpaqueMsg)
    }

    fn run_callback(&self, msg: &OpaqueMsg, info: &MessageInfo) -> bool {
        let Some(msg) = msg.downcast_ref::<M>() else {
            return false;
        };
        if !self.throttle.admit() {
            return false;
        }
        (self.callback)(msg, info);
        true
    }
}

/// Subscription that consumes the payload verbatim. Registered with the
/// wildcard type by default, or with an explicit type name to filter.
pub struct RawSubscriptionHandler {
    msg_type: String,
    node_id: NodeId,
    handler_id: HandlerId,
    throttle: Throttle,
    callback: Box<dyn Fn(&[u8], &MessageInfo) + Send + Sync>,
}

impl RawSubscriptionHandler {
    pub fn new(
        node_id: NodeId,
        msg_type: impl Into<String>,
        msgs_per_sec: u64,
        callback: impl Fn(&[u8], &MessageInfo) + Send + Sync + 'static,
    ) -> Self {
        Self {
            msg_type: msg_type.into(),
            node_id,
            handler_id: HandlerId::new(),
            throttle: Throttle::new(msgs_per_sec),
            callback: Box::new(callback),
        }
    }

    /// Wildcard subscription accepting any payload type.
    pub fn wildcard(
        node_id: NodeId,
        msgs_per_sec: u64,
        callback: impl Fn(&[u8], &MessageInfo) + Send + Sync + 'static,
    ) -> Self {
        Self::new(node_id, GENERIC_MESSAGE_TYPE, msgs_per_sec, callback)
    }
}

impl SubscriptionHandler for RawSubscriptionHandler {
    fn type_name(&self) -> &str {
        &self.msg_type
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn handler_id(&self) -> HandlerId {
        self.handler_id
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Raw
    }

    fn create_msg(&self, data: &[u8]) -> Option<OpaqueMsg> {
        Some(Arc::new(data.to_vec()) as OpaqueMsg)
    }

    fn run_callback(&self, msg: &OpaqueMsg, info: &MessageInfo) -> bool {
        let Some(bytes) = msg.downcast_ref::<Vec<u8>>() else {
            return false;
        };
        if !self.throttle.admit() {
            return false;
        }
        (self.callback)(bytes, info);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq)]
    struct TestInt {
        value: i32,
    }

    impl Message for TestInt {
        const TYPE_NAME: &'static str = "test.msgs.Int";

        fn encode(&self) -> Vec<u8> {
            self.value.to_le_bytes().to_vec()
        }

        fn decode(data: &[u8]) -> Option<Self> {
            Some(Self { value: i32::from_le_bytes(data.try_into().ok()?) })
        }
    }

    #[test]
    fn test_typed_handler_decodes_and_dispatches() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let handler = TypedSubscriptionHandler::<TestInt>::new(NodeId::new(), UNTHROTTLED, {
            move |msg, info| {
                assert_eq!(msg.value, 7);
                assert_eq!(info.topic, "/chatter");
                hits2.fetch_add(1, Ordering::SeqCst);
            }
        });

        let info = MessageInfo::new("p@/chatter", TestInt::TYPE_NAME, "tcp://h:1");
        let msg = handler
            .create_msg(&TestInt { value: 7 }.encode())
            .expect("valid payload should decode");
        assert!(handler.run_callback(&msg, &info));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_typed_handler_rejects_foreign_opaque() {
        let handler =
            TypedSubscriptionHandler::<TestInt>::new(NodeId::new(), UNTHROTTLED, |_, _| {
                panic!("callback must not run for a foreign payload");
            });
        let info = MessageInfo::default();
        let foreign: OpaqueMsg = Arc::new("not an int".to_string());
        assert!(!handler.run_callback(&foreign, &info));
    }

    #[test]
    fn test_typed_handler_rejects_truncated_payload() {
        let handler =
            TypedSubscriptionHandler::<TestInt>::new(NodeId::new(), UNTHROTTLED, |_, _| {});
        assert!(handler.create_msg(&[1, 2]).is_none());
    }

    #[test]
    fn test_raw_handler_passes_bytes_through() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let handler = RawSubscriptionHandler::wildcard(NodeId::new(), UNTHROTTLED, move |data, _| {
            seen2.lock().extend_from_slice(data);
        });
        assert_eq!(handler.type_name(), GENERIC_MESSAGE_TYPE);
        assert_eq!(handler.kind(), HandlerKind::Raw);

        let msg = handler.create_msg(b"\x01\x02\x03").expect("raw payload always decodes");
        assert!(handler.run_callback(&msg, &MessageInfo::default()));
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_throttle_admits_first_and_blocks_burst() {
        let throttle = Throttle::new(1);
        assert!(throttle.admit());
        assert!(!throttle.admit());

        let unlimited = Throttle::new(UNTHROTTLED);
        assert!(unlimited.admit());
        assert!(unlimited.admit());
    }
}
