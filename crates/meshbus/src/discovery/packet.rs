// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Beacon packet codec.
//!
//! Layout: 4-byte magic, version byte, message-type byte, sender process
//! id, then a type-dependent body. Strings are length-prefixed (u16 LE).
//! Malformed packets produce a typed [`ParseError`] and are dropped by the
//! beacon thread; they never tear it down.

use crate::identity::{NodeId, ProcessId, SocketId};
use crate::node::{AdvertiseMessageOptions, AdvertiseServiceOptions};
use crate::records::{MessagePublisher, ServicePublisher};

const MAGIC: &[u8; 4] = b"MBUS";
const VERSION: u8 = 1;

/// Parse failures for inbound beacon packets.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Packet shorter than its declared contents.
    Truncated,
    /// Magic or version mismatch; not one of ours.
    BadHeader,
    /// Unknown message-type byte.
    UnknownType(u8),
    /// A field that must be a UUID or UTF-8 string is not.
    BadField,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Truncated => write!(f, "truncated beacon packet"),
            ParseError::BadHeader => write!(f, "bad beacon header"),
            ParseError::UnknownType(t) => write!(f, "unknown beacon type {}", t),
            ParseError::BadField => write!(f, "malformed beacon field"),
        }
    }
}

/// One beacon, generic over the record kind the service announces.
#[derive(Debug, PartialEq)]
pub enum Beacon<P> {
    /// A local offering, sent immediately on advertise and re-sent every
    /// heartbeat.
    Advertise(P),
    /// An offering going away.
    Unadvertise(P),
    /// Explicit query: peers holding records for the topic re-advertise.
    Subscribe(String),
    /// Process liveness.
    Heartbeat,
    /// Orderly shutdown of the whole process.
    Bye,
}

const TYPE_ADVERTISE: u8 = 0;
const TYPE_UNADVERTISE: u8 = 1;
const TYPE_SUBSCRIBE: u8 = 2;
const TYPE_HEARTBEAT: u8 = 3;
const TYPE_BYE: u8 = 4;

/// A record kind the beacon services can carry.
pub trait WireRecord: Sized {
    fn encode_into(&self, buf: &mut Vec<u8>);
    fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError>;
}

// ===== Primitive encoding =====

fn put_str(buf: &mut Vec<u8>, s: &str) {
    let len = s.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&s.as_bytes()[..len as usize]);
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Cursor over a received datagram.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.pos + n > self.data.len() {
            return Err(ParseError::Truncated);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn str(&mut self) -> Result<String, ParseError> {
        let len_bytes = self.take(2)?;
        let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::BadField)
    }

    pub fn u64(&mut self) -> Result<u64, ParseError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("take(8) returns 8 bytes")))
    }
}

// ===== Record encodings =====

impl WireRecord for MessagePublisher {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        put_str(buf, &self.topic);
        put_str(buf, &self.msg_addr);
        put_str(buf, &self.ctrl_addr);
        put_str(buf, &self.process_id.to_string());
        put_str(buf, &self.node_id.to_string());
        put_str(buf, &self.msg_type);
        put_u64(buf, self.options.msgs_per_sec);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            topic: r.str()?,
            msg_addr: r.str()?,
            ctrl_addr: r.str()?,
            process_id: ProcessId::parse(&r.str()?).ok_or(ParseError::BadField)?,
            node_id: NodeId::parse(&r.str()?).ok_or(ParseError::BadField)?,
            msg_type: r.str()?,
            options: AdvertiseMessageOptions { msgs_per_sec: r.u64()? },
        })
    }
}

impl WireRecord for ServicePublisher {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        put_str(buf, &self.topic);
        put_str(buf, &self.addr);
        put_str(buf, &self.socket_id.to_string());
        put_str(buf, &self.process_id.to_string());
        put_str(buf, &self.node_id.to_string());
        put_str(buf, &self.req_type);
        put_str(buf, &self.rep_type);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            topic: r.str()?,
            addr: r.str()?,
            socket_id: SocketId::parse(&r.str()?).ok_or(ParseError::BadField)?,
            process_id: ProcessId::parse(&r.str()?).ok_or(ParseError::BadField)?,
            node_id: NodeId::parse(&r.str()?).ok_or(ParseError::BadField)?,
            req_type: r.str()?,
            rep_type: r.str()?,
            options: AdvertiseServiceOptions::default(),
        })
    }
}

// ===== Packet encode / decode =====

/// Serialize a beacon for the wire.
pub fn encode<P: WireRecord>(sender: ProcessId, beacon: &Beacon<P>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.push(match beacon {
        Beacon::Advertise(_) => TYPE_ADVERTISE,
        Beacon::Unadvertise(_) => TYPE_UNADVERTISE,
        Beacon::Subscribe(_) => TYPE_SUBSCRIBE,
        Beacon::Heartbeat => TYPE_HEARTBEAT,
        Beacon::Bye => TYPE_BYE,
    });
    put_str(&mut buf, &sender.to_string());
    match beacon {
        Beacon::Advertise(record) | Beacon::Unadvertise(record) => record.encode_into(&mut buf),
        Beacon::Subscribe(topic) => put_str(&mut buf, topic),
        Beacon::Heartbeat | Beacon::Bye => {}
    }
    buf
}

/// Parse a datagram into `(sender, beacon)`.
pub fn decode<P: WireRecord>(data: &[u8]) -> Result<(ProcessId, Beacon<P>), ParseError> {
    if data.len() < MAGIC.len() + 2 {
        return Err(ParseError::Truncated);
    }
    if &data[..4] != MAGIC || data[4] != VERSION {
        return Err(ParseError::BadHeader);
    }
    let msg_type = data[5];
    let mut r = Reader { data, pos: 6 };
    let sender = ProcessId::parse(&r.str()?).ok_or(ParseError::BadField)?;
    let beacon = match msg_type {
        TYPE_ADVERTISE => Beacon::Advertise(P::decode(&mut r)?),
        TYPE_UNADVERTISE => Beacon::Unadvertise(P::decode(&mut r)?),
        TYPE_SUBSCRIBE => Beacon::Subscribe(r.str()?),
        TYPE_HEARTBEAT => Beacon::Heartbeat,
        TYPE_BYE => Beacon::Bye,
        other => return Err(ParseError::UnknownType(other)),
    };
    Ok((sender, beacon))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_record() -> MessagePublisher {
        MessagePublisher {
            topic: "p@/chatter".to_string(),
            msg_addr: "tcp://10.0.0.1:44211".to_string(),
            ctrl_addr: "tcp://10.0.0.1:44212".to_string(),
            process_id: ProcessId::new(),
            node_id: NodeId::new(),
            msg_type: "x.Int32".to_string(),
            options: AdvertiseMessageOptions::default(),
        }
    }

    #[test]
    fn test_advertise_round_trip() {
        let sender = ProcessId::new();
        let record = msg_record();
        let wire = encode(sender, &Beacon::Advertise(record.clone()));

        let (from, beacon) =
            decode::<MessagePublisher>(&wire).expect("own encoding should parse");
        assert_eq!(from, sender);
        assert_eq!(beacon, Beacon::Advertise(record));
    }

    #[test]
    fn test_service_record_round_trip() {
        let record = ServicePublisher {
            topic: "p@/add".to_string(),
            addr: "tcp://10.0.0.1:44213".to_string(),
            socket_id: SocketId::new(),
            process_id: ProcessId::new(),
            node_id: NodeId::new(),
            req_type: "x.Int32".to_string(),
            rep_type: "x.Int32".to_string(),
            options: AdvertiseServiceOptions::default(),
        };
        let wire = encode(ProcessId::new(), &Beacon::Unadvertise(record.clone()));
        let (_, beacon) = decode::<ServicePublisher>(&wire).expect("own encoding should parse");
        assert_eq!(beacon, Beacon::Unadvertise(record));
    }

    #[test]
    fn test_control_beacons() {
        let sender = ProcessId::new();
        for beacon in [
            Beacon::<MessagePublisher>::Heartbeat,
            Beacon::Bye,
            Beacon::Subscribe("p@/chatter".to_string()),
        ] {
            let wire = encode(sender, &beacon);
            let (from, parsed) = decode::<MessagePublisher>(&wire).expect("should parse");
            assert_eq!(from, sender);
            assert_eq!(parsed, beacon);
        }
    }

    #[test]
    fn test_truncated_packet_is_rejected_not_panicked() {
        let wire = encode(ProcessId::new(), &Beacon::Advertise(msg_record()));
        for cut in [0, 3, 5, 6, 10, wire.len() - 1] {
            let err = decode::<MessagePublisher>(&wire[..cut]).expect_err("cut packet must fail");
            assert!(matches!(err, ParseError::Truncated | ParseError::BadHeader));
        }
    }

    #[test]
    fn test_foreign_traffic_is_rejected() {
        assert_eq!(
            decode::<MessagePublisher>(b"GARBAGE-DATAGRAM"),
            Err(ParseError::BadHeader)
        );
        let mut wire = encode(ProcessId::new(), &Beacon::<MessagePublisher>::Heartbeat);
        wire[5] = 99;
        assert_eq!(decode::<MessagePublisher>(&wire), Err(ParseError::UnknownType(99)));
    }
}
