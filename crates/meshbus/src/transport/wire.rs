// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multipart frame layouts of the four data-plane exchanges.
//!
//! These sequences are the compatibility contract between processes; every
//! builder and parser here is a pure function over byte frames so the
//! layouts can be pinned down by tests without opening a socket.
//!
//! ```text
//! publish   : topic | sender_data_addr | payload | msg_type
//! control   : topic | process_id | node_id | msg_type | event
//! request   : responder_id | topic | sender_addr | receiver_id |
//!             node_id | request_id | payload | req_type | rep_type
//! response  : destination_id | topic | node_id | request_id |
//!             payload | result
//! ```
//!
//! Router sockets prepend the peer identity frame on receive; the parsers
//! below take the frame list with that identity already stripped.

use crate::identity::{HandlerId, NodeId, ProcessId, SocketId};

/// Control event: a remote subscriber connected.
pub const NEW_CONNECTION: u8 = 0;

/// Control event: a remote subscriber went away.
pub const END_CONNECTION: u8 = 1;

/// Service result frames are ASCII `"1"` / `"0"`.
fn result_frame(result: bool) -> Vec<u8> {
    if result { b"1".to_vec() } else { b"0".to_vec() }
}

/// Frame parse failure; the reception loop drops the message and moves on.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Wrong number of frames.
    FrameCount { expected: usize, got: usize },
    /// A frame that must be an identifier or ASCII token is not.
    BadFrame(&'static str),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::FrameCount { expected, got } => {
                write!(f, "expected {} frames, got {}", expected, got)
            }
            FrameError::BadFrame(what) => write!(f, "malformed {} frame", what),
        }
    }
}

fn utf8(frame: &[u8], what: &'static str) -> Result<String, FrameError> {
    String::from_utf8(frame.to_vec()).map_err(|_| FrameError::BadFrame(what))
}

// ===== Message publish =====

/// Four frames sent on the publisher socket.
pub fn message_frames(topic: &str, sender_addr: &str, payload: &[u8], msg_type: &str) -> [Vec<u8>; 4] {
    [
        topic.as_bytes().to_vec(),
        sender_addr.as_bytes().to_vec(),
        payload.to_vec(),
        msg_type.as_bytes().to_vec(),
    ]
}

/// A publish as seen by a subscriber.
#[derive(Debug, PartialEq)]
pub struct MessageUpdate {
    pub topic: String,
    pub sender_addr: String,
    pub payload: Vec<u8>,
    pub msg_type: String,
}

pub fn parse_message(frames: &[Vec<u8>]) -> Result<MessageUpdate, FrameError> {
    let [topic, sender, payload, msg_type] = frames else {
        return Err(FrameError::FrameCount { expected: 4, got: frames.len() });
    };
    Ok(MessageUpdate {
        topic: utf8(topic, "topic")?,
        sender_addr: utf8(sender, "sender address")?,
        payload: payload.clone(),
        msg_type: utf8(msg_type, "message type")?,
    })
}

// ===== Control notification =====

/// Five frames sent on a control dealer when a subscriber (dis)connects.
pub fn control_frames(
    topic: &str,
    process_id: ProcessId,
    node_id: NodeId,
    msg_type: &str,
    event: u8,
) -> [Vec<u8>; 5] {
    [
        topic.as_bytes().to_vec(),
        process_id.to_frame(),
        node_id.to_frame(),
        msg_type.as_bytes().to_vec(),
        event.to_string().into_bytes(),
    ]
}

/// A subscriber connect/disconnect notification.
#[derive(Debug, PartialEq)]
pub struct ControlUpdate {
    pub topic: String,
    pub process_id: ProcessId,
    pub node_id: NodeId,
    pub msg_type: String,
    pub event: u8,
}

pub fn parse_control(frames: &[Vec<u8>]) -> Result<ControlUpdate, FrameError> {
    let [topic, pid, nid, msg_type, event] = frames else {
        return Err(FrameError::FrameCount { expected: 5, got: frames.len() });
    };
    let event = utf8(event, "event")?
        .parse::<u8>()
        .map_err(|_| FrameError::BadFrame("event"))?;
    if event != NEW_CONNECTION && event != END_CONNECTION {
        return Err(FrameError::BadFrame("event"));
    }
    Ok(ControlUpdate {
        topic: utf8(topic, "topic")?,
        process_id: ProcessId::parse(&utf8(pid, "process id")?)
            .ok_or(FrameError::BadFrame("process id"))?,
        node_id: NodeId::parse(&utf8(nid, "node id")?).ok_or(FrameError::BadFrame("node id"))?,
        msg_type: utf8(msg_type, "message type")?,
        event,
    })
}

// ===== Service request =====

/// Nine frames written to the requester router. The first frame is the
/// responder's routing identity.
#[allow(clippy::too_many_arguments)]
pub fn request_frames(
    responder_id: SocketId,
    topic: &str,
    sender_addr: &str,
    receiver_id: SocketId,
    node_id: NodeId,
    request_id: HandlerId,
    payload: &[u8],
    req_type: &str,
    rep_type: &str,
) -> [Vec<u8>; 9] {
    [
        responder_id.to_frame(),
        topic.as_bytes().to_vec(),
        sender_addr.as_bytes().to_vec(),
        receiver_id.to_frame(),
        node_id.to_frame(),
        request_id.to_frame(),
        payload.to_vec(),
        req_type.as_bytes().to_vec(),
        rep_type.as_bytes().to_vec(),
    ]
}

/// A service request as seen by the replier (identity frame stripped).
#[derive(Debug, PartialEq)]
pub struct ServiceRequest {
    pub topic: String,
    /// Address of the sender's response-receiver socket.
    pub sender_addr: String,
    /// Routing identity the response must carry.
    pub destination_id: SocketId,
    pub node_id: NodeId,
    pub request_id: HandlerId,
    pub payload: Vec<u8>,
    pub req_type: String,
    pub rep_type: String,
}

pub fn parse_request(frames: &[Vec<u8>]) -> Result<ServiceRequest, FrameError> {
    let [topic, sender, dst, nid, rid, payload, req_type, rep_type] = frames else {
        return Err(FrameError::FrameCount { expected: 8, got: frames.len() });
    };
    Ok(ServiceRequest {
        topic: utf8(topic, "topic")?,
        sender_addr: utf8(sender, "sender address")?,
        destination_id: SocketId::parse(&utf8(dst, "destination id")?)
            .ok_or(FrameError::BadFrame("destination id"))?,
        node_id: NodeId::parse(&utf8(nid, "node id")?).ok_or(FrameError::BadFrame("node id"))?,
        request_id: HandlerId::parse(&utf8(rid, "request id")?)
            .ok_or(FrameError::BadFrame("request id"))?,
        payload: payload.clone(),
        req_type: utf8(req_type, "request type")?,
        rep_type: utf8(rep_type, "response type")?,
    })
}

// ===== Service response =====

/// Six frames written back by the replier. The first frame is the routing
/// identity of the requester's response receiver.
pub fn response_frames(
    destination_id: SocketId,
    topic: &str,
    node_id: NodeId,
    request_id: HandlerId,
    payload: &[u8],
    result: bool,
) -> [Vec<u8>; 6] {
    [
        destination_id.to_frame(),
        topic.as_bytes().to_vec(),
        node_id.to_frame(),
        request_id.to_frame(),
        payload.to_vec(),
        result_frame(result),
    ]
}

/// A service response as seen by the response receiver (identity frame
/// stripped).
#[derive(Debug, PartialEq)]
pub struct ServiceResponse {
    pub topic: String,
    pub node_id: NodeId,
    pub request_id: HandlerId,
    pub payload: Vec<u8>,
    pub result: bool,
}

pub fn parse_response(frames: &[Vec<u8>]) -> Result<ServiceResponse, FrameError> {
    let [topic, nid, rid, payload, result] = frames else {
        return Err(FrameError::FrameCount { expected: 5, got: frames.len() });
    };
    Ok(ServiceResponse {
        topic: utf8(topic, "topic")?,
        node_id: NodeId::parse(&utf8(nid, "node id")?).ok_or(FrameError::BadFrame("node id"))?,
        request_id: HandlerId::parse(&utf8(rid, "request id")?)
            .ok_or(FrameError::BadFrame("request id"))?,
        payload: payload.clone(),
        result: result.as_slice() == b"1",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_frame_layout() {
        let frames = message_frames("p@/chatter", "tcp://10.0.0.1:4000", b"\x07\x00\x00\x00", "x.Int32");
        assert_eq!(frames[0], b"p@/chatter");
        assert_eq!(frames[1], b"tcp://10.0.0.1:4000");
        assert_eq!(frames[2], b"\x07\x00\x00\x00");
        assert_eq!(frames[3], b"x.Int32");

        let parsed = parse_message(&frames).expect("own frames should parse");
        assert_eq!(parsed.topic, "p@/chatter");
        assert_eq!(parsed.payload, b"\x07\x00\x00\x00");
    }

    #[test]
    fn test_control_frame_layout_and_events() {
        let pid = ProcessId::new();
        let nid = NodeId::new();
        let frames = control_frames("p@/chatter", pid, nid, "x.Int32", NEW_CONNECTION);
        assert_eq!(frames[4], b"0", "NewConnection is ASCII decimal zero");

        let parsed = parse_control(&frames).expect("own frames should parse");
        assert_eq!(parsed.process_id, pid);
        assert_eq!(parsed.node_id, nid);
        assert_eq!(parsed.event, NEW_CONNECTION);

        let frames = control_frames("p@/chatter", pid, nid, "x.Int32", END_CONNECTION);
        assert_eq!(frames[4], b"1", "EndConnection is ASCII decimal one");
    }

    #[test]
    fn test_control_rejects_unknown_event() {
        let mut frames =
            control_frames("t", ProcessId::new(), NodeId::new(), "x", NEW_CONNECTION).to_vec();
        frames[4] = b"7".to_vec();
        assert_eq!(parse_control(&frames), Err(FrameError::BadFrame("event")));
    }

    #[test]
    fn test_request_frame_layout() {
        let responder = SocketId::new();
        let receiver = SocketId::new();
        let nid = NodeId::new();
        let rid = HandlerId::new();
        let frames = request_frames(
            responder,
            "p@/add",
            "tcp://10.0.0.2:4001",
            receiver,
            nid,
            rid,
            b"\x03\x00\x00\x00",
            "x.Int32",
            "x.Int32",
        );
        assert_eq!(frames.len(), 9);
        assert_eq!(frames[0], responder.to_frame(), "identity routes the request");

        // The replier sees frames 1.. after the router strips identities.
        let parsed = parse_request(&frames[1..]).expect("own frames should parse");
        assert_eq!(parsed.destination_id, receiver);
        assert_eq!(parsed.node_id, nid);
        assert_eq!(parsed.request_id, rid);
        assert_eq!(parsed.payload, b"\x03\x00\x00\x00");
        assert_eq!(parsed.rep_type, "x.Int32");
    }

    #[test]
    fn test_response_frame_layout() {
        let dst = SocketId::new();
        let nid = NodeId::new();
        let rid = HandlerId::new();
        let frames = response_frames(dst, "p@/add", nid, rid, b"\x03\x00\x00\x00", true);
        assert_eq!(frames[0], dst.to_frame());
        assert_eq!(frames[5], b"1");

        let parsed = parse_response(&frames[1..]).expect("own frames should parse");
        assert!(parsed.result);
        assert_eq!(parsed.request_id, rid);

        let frames = response_frames(dst, "p@/add", nid, rid, b"", false);
        assert_eq!(frames[5], b"0");
        let parsed = parse_response(&frames[1..]).expect("own frames should parse");
        assert!(!parsed.result);
    }

    #[test]
    fn test_truncated_sequences_are_rejected() {
        let frames = message_frames("t", "a", b"d", "m");
        assert_eq!(
            parse_message(&frames[..3]),
            Err(FrameError::FrameCount { expected: 4, got: 3 })
        );
        assert_eq!(
            parse_control(&frames),
            Err(FrameError::FrameCount { expected: 5, got: 4 })
        );
    }
}
