// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP beacon discovery.
//!
//! Two instances of [`Discovery`] run per process: one announcing message
//! publishers on port 11317, one announcing service responders on 11318.
//! Each joins a multicast group (loopback enabled, so processes on one
//! host hear each other), beacons its local catalogue every heartbeat, and
//! surfaces remote catalogues through connection/disconnection callbacks.
//! A peer silent for three heartbeats is declared gone.
//!
//! The shared core never sees wire details; it consumes `advertise`,
//! `unadvertise`, `discover`, `publishers`, and the two callbacks.

pub mod packet;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{
    DISCOVERY_MULTICAST_GROUP, DISCOVERY_READ_TIMEOUT, HEARTBEAT_INTERVAL, MAX_SILENCE_INTERVAL,
};
use crate::identity::{NodeId, ProcessId};
use crate::records::{MessagePublisher, PublisherRecord, PublisherTable, ServicePublisher};
use crate::{Error, Result};

use self::packet::{Beacon, WireRecord};

/// Callback invoked for each record appearing or disappearing.
pub type DiscoveryCallback<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// A record kind a beacon service can announce.
pub trait DiscoveryRecord: PublisherRecord + WireRecord + std::fmt::Debug + PartialEq {
    /// Synthetic record standing for a whole process going away; its topic
    /// and node id are empty.
    fn process_wide(process_id: ProcessId) -> Self;
}

impl DiscoveryRecord for MessagePublisher {
    fn process_wide(process_id: ProcessId) -> Self {
        Self {
            topic: String::new(),
            msg_addr: String::new(),
            ctrl_addr: String::new(),
            process_id,
            node_id: NodeId::nil(),
            msg_type: String::new(),
            options: Default::default(),
        }
    }
}

impl DiscoveryRecord for ServicePublisher {
    fn process_wide(process_id: ProcessId) -> Self {
        Self {
            topic: String::new(),
            addr: String::new(),
            socket_id: crate::identity::SocketId::nil(),
            process_id,
            node_id: NodeId::nil(),
            req_type: String::new(),
            rep_type: String::new(),
            options: Default::default(),
        }
    }
}

struct Inner<P: DiscoveryRecord> {
    process_id: ProcessId,
    port: u16,
    socket: UdpSocket,
    /// Our own offerings, re-beaconed every heartbeat.
    local: Mutex<PublisherTable<P>>,
    /// Offerings learned from peers.
    remote: Mutex<PublisherTable<P>>,
    /// Last time each peer was heard from.
    activity: Mutex<HashMap<ProcessId, Instant>>,
    connection_cb: Mutex<Option<DiscoveryCallback<P>>>,
    disconnection_cb: Mutex<Option<DiscoveryCallback<P>>>,
    running: AtomicBool,
    ready: Mutex<bool>,
    ready_cv: Condvar,
}

/// One beacon service.
pub struct Discovery<P: DiscoveryRecord> {
    inner: Arc<Inner<P>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<P: DiscoveryRecord> Discovery<P> {
    /// Create a stopped service bound to `port`. Fails when the beacon
    /// socket cannot be created.
    pub fn new(process_id: ProcessId, port: u16) -> Result<Self> {
        let socket = bind_beacon_socket(port)
            .map_err(|e| Error::SocketError(format!("discovery bind on {}: {}", port, e)))?;
        Ok(Self {
            inner: Arc::new(Inner {
                process_id,
                port,
                socket,
                local: Mutex::new(PublisherTable::new()),
                remote: Mutex::new(PublisherTable::new()),
                activity: Mutex::new(HashMap::new()),
                connection_cb: Mutex::new(None),
                disconnection_cb: Mutex::new(None),
                running: AtomicBool::new(false),
                ready: Mutex::new(false),
                ready_cv: Condvar::new(),
            }),
            thread: Mutex::new(None),
        })
    }

    /// Register the callback fired when a remote offering appears.
    pub fn set_connections_cb(&self, cb: impl Fn(&P) + Send + Sync + 'static) {
        *self.inner.connection_cb.lock() = Some(Arc::new(cb));
    }

    /// Register the callback fired when an offering disappears.
    pub fn set_disconnections_cb(&self, cb: impl Fn(&P) + Send + Sync + 'static) {
        *self.inner.disconnection_cb.lock() = Some(Arc::new(cb));
    }

    /// Start the beacon thread. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name(format!("mbus-disc-{}", self.inner.port))
            .spawn(move || beacon_loop(&inner))
            .expect("spawning the discovery thread should not fail");
        *self.thread.lock() = Some(handle);
    }

    /// Stop the beacon thread, announcing BYE first.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.send(&Beacon::Bye);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Begin beaconing a local offering; also announces it immediately.
    pub fn advertise(&self, record: P) -> Result<()> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(Error::DiscoveryFailure);
        }
        self.inner.local.lock().add(record.clone());
        self.inner.send(&Beacon::Advertise(record));
        Ok(())
    }

    /// Stop beaconing the offering of `node_id` on `topic` and announce
    /// its removal.
    pub fn unadvertise(&self, topic: &str, node_id: NodeId) -> Result<()> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(Error::DiscoveryFailure);
        }
        let record = {
            let mut local = self.inner.local.lock();
            let record = local.get(topic, self.inner.process_id, node_id).cloned();
            local.remove_by_node(topic, self.inner.process_id, node_id);
            record
        };
        if let Some(record) = record {
            self.inner.send(&Beacon::Unadvertise(record));
        }
        Ok(())
    }

    /// Explicitly query the network for `topic`. Records already known are
    /// replayed through the connection callback right away; peers holding
    /// more will re-advertise in response to the query.
    pub fn discover(&self, topic: &str) -> Result<()> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(Error::DiscoveryFailure);
        }
        let known: Vec<P> = {
            let remote = self.inner.remote.lock();
            remote.publishers(topic).into_values().flatten().collect()
        };
        let cb = self.inner.connection_cb.lock().clone();
        if let Some(cb) = cb {
            for record in &known {
                cb(record);
            }
        }
        self.inner.send(&Beacon::Subscribe(topic.to_string()));
        Ok(())
    }

    /// All known offerings for `topic`, local and remote, by process.
    pub fn publishers(&self, topic: &str) -> HashMap<ProcessId, Vec<P>> {
        let mut out = self.inner.remote.lock().publishers(topic);
        for (pid, records) in self.inner.local.lock().publishers(topic) {
            out.entry(pid).or_default().extend(records);
        }
        out
    }

    /// Every topic with at least one known offering.
    pub fn topics(&self) -> Vec<String> {
        let mut topics = self.inner.remote.lock().topics();
        topics.extend(self.inner.local.lock().topics());
        topics.sort();
        topics.dedup();
        topics
    }

    /// Block until the service had one full heartbeat to converge. Bounded
    /// by two heartbeat intervals as a safety net.
    pub fn wait_ready(&self) {
        let deadline = Instant::now() + HEARTBEAT_INTERVAL * 2;
        let mut ready = self.inner.ready.lock();
        while !*ready {
            if self.inner.ready_cv.wait_until(&mut ready, deadline).timed_out() {
                break;
            }
        }
    }
}

impl<P: DiscoveryRecord> Drop for Discovery<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<P: DiscoveryRecord> Inner<P> {
    fn send(&self, beacon: &Beacon<P>) {
        let wire = packet::encode(self.process_id, beacon);
        let dest = SocketAddr::from((DISCOVERY_MULTICAST_GROUP, self.port));
        if let Err(e) = self.socket.send_to(&wire, dest) {
            log::debug!("[Discovery] Beacon send to {} failed: {}", dest, e);
        }
    }

    fn fire_connection(&self, record: &P) {
        let cb = self.connection_cb.lock().clone();
        if let Some(cb) = cb {
            cb(record);
        }
    }

    fn fire_disconnection(&self, record: &P) {
        let cb = self.disconnection_cb.lock().clone();
        if let Some(cb) = cb {
            cb(record);
        }
    }

    fn handle_beacon(&self, sender: ProcessId, beacon: Beacon<P>) {
        if sender == self.process_id {
            return;
        }
        self.activity.lock().insert(sender, Instant::now());

        match beacon {
            Beacon::Advertise(record) => {
                let fresh = self.remote.lock().add(record.clone());
                if fresh {
                    log::debug!("[Discovery] New offering {:?}", record);
                    self.fire_connection(&record);
                }
            }
            Beacon::Unadvertise(record) => {
                self.remote.lock().remove_by_node(
                    record.topic(),
                    record.process_id(),
                    record.node_id(),
                );
                self.fire_disconnection(&record);
            }
            Beacon::Subscribe(topic) => {
                let matching: Vec<P> = {
                    let local = self.local.lock();
                    local.publishers(&topic).into_values().flatten().collect()
                };
                for record in matching {
                    self.send(&Beacon::Advertise(record));
                }
            }
            Beacon::Heartbeat => {}
            Beacon::Bye => self.drop_process(sender),
        }
    }

    /// Forget everything a process offered and notify the core once with a
    /// process-wide record.
    fn drop_process(&self, process_id: ProcessId) {
        self.activity.lock().remove(&process_id);
        let removed = self.remote.lock().remove_by_process(process_id);
        if !removed.is_empty() {
            log::debug!(
                "[Discovery] Process {} gone, dropping {} offerings",
                process_id,
                removed.len()
            );
            self.fire_disconnection(&P::process_wide(process_id));
        }
    }

    /// Peers silent for longer than the tolerated interval.
    fn silent_peers(&self) -> Vec<ProcessId> {
        let now = Instant::now();
        self.activity
            .lock()
            .iter()
            .filter(|(_, last)| now.duration_since(**last) > MAX_SILENCE_INTERVAL)
            .map(|(pid, _)| *pid)
            .collect()
    }

    fn heartbeat(&self) {
        self.send(&Beacon::Heartbeat);
        let records: Vec<P> = {
            let local = self.local.lock();
            let mut out = Vec::new();
            local.for_each(|record| out.push(record.clone()));
            out
        };
        for record in records {
            self.send(&Beacon::Advertise(record));
        }
    }
}

fn beacon_loop<P: DiscoveryRecord>(inner: &Inner<P>) {
    let start = Instant::now();
    let mut last_heartbeat = Instant::now();
    inner.heartbeat();

    let mut buf = [0u8; 65536];
    while inner.running.load(Ordering::Acquire) {
        match inner.socket.recv_from(&mut buf) {
            Ok((len, from)) => match packet::decode::<P>(&buf[..len]) {
                Ok((sender, beacon)) => inner.handle_beacon(sender, beacon),
                Err(e) => log::debug!("[Discovery] Dropping datagram from {}: {}", from, e),
            },
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => log::debug!("[Discovery] Beacon recv error: {}", e),
        }

        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            last_heartbeat = Instant::now();
            inner.heartbeat();
            for pid in inner.silent_peers() {
                inner.drop_process(pid);
            }
        }

        // One full heartbeat after start the catalogue is considered
        // converged; topic listings block on this.
        if start.elapsed() >= HEARTBEAT_INTERVAL {
            let mut ready = inner.ready.lock();
            if !*ready {
                *ready = true;
                inner.ready_cv.notify_all();
            }
        }
    }
}

/// Beacon socket: reusable port, multicast member, bounded reads.
fn bind_beacon_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.set_multicast_loop_v4(true)?;
    // Best effort: on hosts with no multicast route the beacons degrade to
    // whatever the kernel still delivers locally.
    if let Err(e) = socket.join_multicast_v4(&DISCOVERY_MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED) {
        log::debug!(
            "[Discovery] join_multicast_v4({}) failed: {}",
            DISCOVERY_MULTICAST_GROUP,
            e
        );
    }
    socket.set_read_timeout(Some(DISCOVERY_READ_TIMEOUT))?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::AdvertiseMessageOptions;

    fn record(topic: &str, pid: ProcessId) -> MessagePublisher {
        MessagePublisher {
            topic: topic.to_string(),
            msg_addr: "tcp://127.0.0.1:45001".to_string(),
            ctrl_addr: "tcp://127.0.0.1:45002".to_string(),
            process_id: pid,
            node_id: NodeId::new(),
            msg_type: "x.Int32".to_string(),
            options: AdvertiseMessageOptions::default(),
        }
    }

    #[test]
    fn test_advertise_requires_start() {
        let disc = Discovery::<MessagePublisher>::new(ProcessId::new(), 18511)
            .expect("beacon socket should bind");
        let err = disc.advertise(record("@/a", ProcessId::new()));
        assert!(matches!(err, Err(Error::DiscoveryFailure)));
    }

    #[test]
    fn test_remote_advertise_fires_callback_once() {
        let pid = ProcessId::new();
        let disc = Discovery::<MessagePublisher>::new(pid, 18512)
            .expect("beacon socket should bind");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        disc.set_connections_cb(move |r: &MessagePublisher| seen2.lock().push(r.clone()));

        let remote_pid = ProcessId::new();
        let remote = record("@/a", remote_pid);
        disc.inner.handle_beacon(remote_pid, Beacon::Advertise(remote.clone()));
        // A duplicate announcement is a no-op.
        disc.inner.handle_beacon(remote_pid, Beacon::Advertise(remote.clone()));

        assert_eq!(seen.lock().as_slice(), &[remote]);
        assert_eq!(disc.publishers("@/a").len(), 1);
    }

    #[test]
    fn test_own_beacons_are_ignored() {
        let pid = ProcessId::new();
        let disc = Discovery::<MessagePublisher>::new(pid, 18513)
            .expect("beacon socket should bind");
        disc.inner.handle_beacon(pid, Beacon::Advertise(record("@/a", pid)));
        assert!(disc.publishers("@/a").is_empty());
    }

    #[test]
    fn test_bye_drops_whole_process() {
        let disc = Discovery::<MessagePublisher>::new(ProcessId::new(), 18514)
            .expect("beacon socket should bind");
        let gone = Arc::new(Mutex::new(Vec::new()));
        let gone2 = Arc::clone(&gone);
        disc.set_disconnections_cb(move |r: &MessagePublisher| gone2.lock().push(r.clone()));

        let remote_pid = ProcessId::new();
        disc.inner.handle_beacon(remote_pid, Beacon::Advertise(record("@/a", remote_pid)));
        disc.inner.handle_beacon(remote_pid, Beacon::Advertise(record("@/b", remote_pid)));
        disc.inner.handle_beacon(remote_pid, Beacon::Bye);

        let gone = gone.lock();
        assert_eq!(gone.len(), 1, "process loss should surface as one record");
        assert!(gone[0].topic.is_empty());
        assert!(gone[0].node_id.is_nil());
        assert_eq!(gone[0].process_id, remote_pid);
        assert!(disc.publishers("@/a").is_empty());
        assert!(disc.publishers("@/b").is_empty());
    }
}
