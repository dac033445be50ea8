// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload typing. The core moves opaque byte strings tagged with a type
//! name; the [`Message`] trait is the seam where a typed facade plugs in
//! its serialization.

/// Canonical empty-payload type name.
///
/// It plays three roles: the request type of services that take no input,
/// the response type of oneway services (no response is sent), and the
/// wildcard type of raw subscriptions that accept any payload.
pub const GENERIC_MESSAGE_TYPE: &str = "ignition.msgs.Empty";

/// A payload type the transport can carry.
///
/// Implementations pair a globally unique type name with an encoding. Type
/// compatibility between peers is string equality on `TYPE_NAME`; there is
/// no schema negotiation.
pub trait Message: Send + Sync + Sized + 'static {
    /// Fully qualified type name, compared verbatim across the wire.
    const TYPE_NAME: &'static str;

    /// Serialize into an opaque byte string.
    fn encode(&self) -> Vec<u8>;

    /// Deserialize; `None` when the bytes do not form a valid payload.
    fn decode(data: &[u8]) -> Option<Self>;
}

/// The empty message: no payload, accepts anything on decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Empty;

impl Message for Empty {
    const TYPE_NAME: &'static str = GENERIC_MESSAGE_TYPE;

    fn encode(&self) -> Vec<u8> {
        Vec::new()
    }

    fn decode(_data: &[u8]) -> Option<Self> {
        Some(Empty)
    }
}

/// Metadata delivered alongside every subscription callback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageInfo {
    /// Topic name with the partition prefix stripped.
    pub topic: String,
    /// Wire type name of the payload.
    pub msg_type: String,
    /// Data endpoint of the sending process.
    pub sender_addr: String,
}

impl MessageInfo {
    pub(crate) fn new(topic: &str, msg_type: &str, sender_addr: &str) -> Self {
        Self {
            topic: crate::topic::partition_stripped(topic).to_string(),
            msg_type: msg_type.to_string(),
            sender_addr: sender_addr.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_round_trip() {
        assert!(Empty.encode().is_empty());
        assert_eq!(Empty::decode(b"anything at all"), Some(Empty));
        assert_eq!(Empty::TYPE_NAME, GENERIC_MESSAGE_TYPE);
    }

    #[test]
    fn test_info_strips_partition() {
        let info = MessageInfo::new("test0@/chatter", "x.Int32", "tcp://10.0.0.1:4242");
        assert_eq!(info.topic, "/chatter");
        assert_eq!(info.msg_type, "x.Int32");
    }
}
