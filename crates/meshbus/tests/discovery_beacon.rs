// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two beacon services talking over the loopback multicast group, standing
//! in for two processes. Uses a dedicated port so the per-process core's
//! own discovery never interferes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use meshbus::discovery::Discovery;
use meshbus::{
    AdvertiseMessageOptions, MessagePublisher, NodeId, ProcessId,
};

const TEST_PORT: u16 = 18731;

fn record(topic: &str, process_id: ProcessId, node_id: NodeId) -> MessagePublisher {
    MessagePublisher {
        topic: topic.to_string(),
        msg_addr: "tcp://127.0.0.1:45021".to_string(),
        ctrl_addr: "tcp://127.0.0.1:45022".to_string(),
        process_id,
        node_id,
        msg_type: "test.msgs.Int32".to_string(),
        options: AdvertiseMessageOptions::default(),
    }
}

fn wait_for(deadline: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if ready() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    ready()
}

#[test]
fn beacons_cross_between_services() {
    let pid_a = ProcessId::new();
    let pid_b = ProcessId::new();
    let node_a = NodeId::new();

    let alice = Discovery::<MessagePublisher>::new(pid_a, TEST_PORT)
        .expect("beacon socket should bind");
    let bob = Discovery::<MessagePublisher>::new(pid_b, TEST_PORT)
        .expect("beacon socket should bind");

    let connections = Arc::new(Mutex::new(Vec::<MessagePublisher>::new()));
    let disconnections = Arc::new(Mutex::new(Vec::<MessagePublisher>::new()));
    let sink = Arc::clone(&connections);
    bob.set_connections_cb(move |r| sink.lock().push(r.clone()));
    let sink = Arc::clone(&disconnections);
    bob.set_disconnections_cb(move |r| sink.lock().push(r.clone()));

    alice.start();
    bob.start();

    // Advertise on one side, observe on the other.
    let offering = record("test0@/chatter", pid_a, node_a);
    alice.advertise(offering.clone()).expect("advertise should succeed");

    let arrived = wait_for(Duration::from_secs(3), || {
        connections.lock().iter().any(|r| r == &offering)
    });
    assert!(arrived, "bob should learn alice's offering");
    assert!(bob.publishers("test0@/chatter").contains_key(&pid_a));

    // Re-announcements (heartbeat re-advertise) must not refire the
    // callback for a known record.
    std::thread::sleep(Duration::from_millis(1500));
    let count = connections.lock().iter().filter(|r| *r == &offering).count();
    assert_eq!(count, 1, "duplicate announcements are a no-op");

    // Unadvertise crosses over too.
    alice.unadvertise("test0@/chatter", node_a).expect("unadvertise should succeed");
    let gone = wait_for(Duration::from_secs(3), || {
        disconnections.lock().iter().any(|r| r.topic == "test0@/chatter")
    });
    assert!(gone, "bob should see the offering go away");
    assert!(!bob.publishers("test0@/chatter").contains_key(&pid_a));

    alice.stop();
    bob.stop();
}

#[test]
fn discover_query_makes_peers_readvertise() {
    let port = TEST_PORT + 1;
    let pid_a = ProcessId::new();
    let pid_b = ProcessId::new();

    let alice = Discovery::<MessagePublisher>::new(pid_a, port)
        .expect("beacon socket should bind");
    alice.start();
    alice
        .advertise(record("test0@/scan", pid_a, NodeId::new()))
        .expect("advertise should succeed");

    // Bob comes up late and may have missed the announcement; an explicit
    // query has to close the gap faster than a heartbeat.
    let bob = Discovery::<MessagePublisher>::new(pid_b, port)
        .expect("beacon socket should bind");
    let connections = Arc::new(Mutex::new(Vec::<MessagePublisher>::new()));
    let sink = Arc::clone(&connections);
    bob.set_connections_cb(move |r| sink.lock().push(r.clone()));
    bob.start();

    bob.discover("test0@/scan").expect("discover should succeed");
    let arrived = wait_for(Duration::from_secs(3), || {
        connections.lock().iter().any(|r| r.topic == "test0@/scan")
    });
    assert!(arrived, "a query should trigger a re-advertisement");

    alice.stop();
    bob.stop();
}

#[test]
fn bye_beacon_drops_the_peer_processwide() {
    let port = TEST_PORT + 2;
    let pid_a = ProcessId::new();
    let pid_b = ProcessId::new();

    let alice = Discovery::<MessagePublisher>::new(pid_a, port)
        .expect("beacon socket should bind");
    let bob = Discovery::<MessagePublisher>::new(pid_b, port)
        .expect("beacon socket should bind");

    let disconnections = Arc::new(Mutex::new(Vec::<MessagePublisher>::new()));
    let sink = Arc::clone(&disconnections);
    bob.set_disconnections_cb(move |r| sink.lock().push(r.clone()));

    alice.start();
    bob.start();
    alice
        .advertise(record("test0@/doomed", pid_a, NodeId::new()))
        .expect("advertise should succeed");

    assert!(wait_for(Duration::from_secs(3), || {
        bob.publishers("test0@/doomed").contains_key(&pid_a)
    }));

    // Orderly shutdown sends BYE; bob forgets the whole process at once.
    alice.stop();
    let dropped = wait_for(Duration::from_secs(3), || {
        disconnections.lock().iter().any(|r| r.topic.is_empty() && r.process_id == pid_a)
    });
    assert!(dropped, "BYE should surface as a process-wide disconnection");
    assert!(!bob.publishers("test0@/doomed").contains_key(&pid_a));

    bob.stop();
}
