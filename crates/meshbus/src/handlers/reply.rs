// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service replier handlers.
//!
//! The canonical replier shape takes serialized request bytes and produces
//! `(serialized response, success flag)`; the typed wrapper decodes and
//! encodes around a user callback.

use crate::identity::{HandlerId, NodeId};
use crate::message::Message;

/// A local service responder stored in the shared core's table.
pub trait ReplyHandler: Send + Sync {
    fn req_type(&self) -> &str;

    fn rep_type(&self) -> &str;

    fn node_id(&self) -> NodeId;

    fn handler_id(&self) -> HandlerId;

    /// Run the service callback over serialized request bytes. The flag is
    /// `false` when the request failed to decode or the callback declined.
    fn run_callback(&self, req: &[u8]) -> (Vec<u8>, bool);
}

/// Typed responder: `Fn(&Req) -> Option<Rep>`, where `None` reports
/// failure to the caller.
pub struct ServiceReplyHandler<Req: Message, Rep: Message> {
    node_id: NodeId,
    handler_id: HandlerId,
    callback: Box<dyn Fn(&Req) -> Option<Rep> + Send + Sync>,
}

impl<Req: Message, Rep: Message> ServiceReplyHandler<Req, Rep> {
    pub fn new(
        node_id: NodeId,
        callback: impl Fn(&Req) -> Option<Rep> + Send + Sync + 'static,
    ) -> Self {
        Self { node_id, handler_id: HandlerId::new(), callback: Box::new(callback) }
    }
}

impl<Req: Message, Rep: Message> ReplyHandler for ServiceReplyHandler<Req, Rep> {
    fn req_type(&self) -> &str {
        Req::TYPE_NAME
    }

    fn rep_type(&self) -> &str {
        Rep::TYPE_NAME
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn handler_id(&self) -> HandlerId {
        self.handler_id
    }

    fn run_callback(&self, req: &[u8]) -> (Vec<u8>, bool) {
        let Some(req) = Req::decode(req) else {
            log::debug!("[Reply] Dropping request: payload is not a valid {}", Req::TYPE_NAME);
            return (Vec::new(), false);
        };
        match (self.callback)(&req) {
            Some(rep) => (rep.encode(), true),
            None => (Vec::new(), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Empty;

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
    fn test_echo_service() {
        let handler = ServiceReplyHandler::<TestInt, TestInt>::new(NodeId::new(), |req| {
            Some(TestInt { value: req.value })
        });
        assert_eq!(handler.req_type(), TestInt::TYPE_NAME);

        let (rep, ok) = handler.run_callback(&TestInt { value: 3 }.encode());
        assert!(ok);
        assert_eq!(TestInt::decode(&rep), Some(TestInt { value: 3 }));
    }

    #[test]
    fn test_declined_request_reports_false() {
        let handler = ServiceReplyHandler::<TestInt, TestInt>::new(NodeId::new(), |_| None);
        let (rep, ok) = handler.run_callback(&TestInt { value: 3 }.encode());
        assert!(!ok);
        assert!(rep.is_empty());
    }

    #[test]
    fn test_undecodable_request_reports_false() {
        let handler = ServiceReplyHandler::<TestInt, Empty>::new(NodeId::new(), |_| Some(Empty));
        let (_, ok) = handler.run_callback(b"xy");
        assert!(!ok);
    }
}
