// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The process-wide shared core.
//!
//! One [`Shared`] instance exists per process, lazily constructed on first
//! facade call. It owns the six data-plane sockets, the handler and
//! connection tables, and both discovery services; every node in the
//! process funnels through it.
//!
//! # Locking
//!
//! A single mutex guards [`State`]: all tables, the two outbound sockets,
//! and the service connection list. The lock is never held across a user
//! callback; handler routines copy out what they need and release it
//! first. The four inbound sockets are not in `State` at all: the
//! reception thread owns them exclusively, and other threads reach them
//! through a command queue drained between polls.

pub(crate) mod reception;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;

use crate::config::{self, CONNECTION_SETTLE_DELAY, CONTROL_LINGER_MS};
use crate::discovery::Discovery;
use crate::handlers::{
    HandlerKind, HandlerTable, PendingRequest, ReplyHandler, RequestOutcome, ResponseCallback,
    SubscriptionHandler,
};
use crate::identity::{NodeId, ProcessId, SocketId};
use crate::message::{MessageInfo, GENERIC_MESSAGE_TYPE};
use crate::node::{AdvertiseMessageOptions, AdvertiseServiceOptions};
use crate::records::{MessagePublisher, PublisherTable, ServicePublisher};
use crate::transport::wire::{END_CONNECTION, NEW_CONNECTION};
use crate::transport::{sockets, wire, SocketCommand};
use crate::{verbose, Error, Result};

/// Mutable state behind the core lock.
pub(crate) struct State {
    /// Fanout out; sends serialize under the core lock.
    pub publisher: zmq::Socket,
    /// Service requests out; connects and sends under the core lock.
    pub requester: zmq::Socket,
    pub subscriptions: HandlerTable<dyn SubscriptionHandler>,
    pub repliers: HandlerTable<dyn ReplyHandler>,
    pub requests: HandlerTable<PendingRequest>,
    /// Publishers the subscriber socket is connected to.
    pub connections: PublisherTable<MessagePublisher>,
    /// Remote subscribers interested in our topics.
    pub remote_subscribers: PublisherTable<MessagePublisher>,
    /// Addresses the requester or replier already connected to. Each
    /// address appears at most once.
    pub srv_connections: Vec<String>,
}

/// The per-process transport core.
pub(crate) struct Shared {
    pub process_id: ProcessId,
    pub replier_id: SocketId,
    pub response_receiver_id: SocketId,
    pub endpoints: sockets::Endpoints,
    context: zmq::Context,
    pub state: Mutex<State>,
    pub msg_discovery: Discovery<MessagePublisher>,
    pub srv_discovery: Discovery<ServicePublisher>,
    cmd_tx: Sender<SocketCommand>,
    exit: AtomicBool,
    reception: Mutex<Option<JoinHandle<()>>>,
}

/// Why the core failed to come up; replayed to every subsequent caller.
#[derive(Clone)]
enum InitError {
    Auth,
    Socket(String),
}

static INSTANCE: OnceLock<std::result::Result<Arc<Shared>, InitError>> = OnceLock::new();

/// The process-wide instance, constructed on first access.
pub(crate) fn instance() -> Result<Arc<Shared>> {
    match INSTANCE.get_or_init(Shared::create) {
        Ok(shared) => Ok(Arc::clone(shared)),
        Err(InitError::Auth) => Err(Error::AuthConfigError),
        Err(InitError::Socket(msg)) => Err(Error::SocketError(msg.clone())),
    }
}

impl Shared {
    fn create() -> std::result::Result<Arc<Shared>, InitError> {
        if config::verbose() {
            verbose::install();
        }

        let process_id = ProcessId::new();
        let replier_id = SocketId::new();
        let response_receiver_id = SocketId::new();
        let host_addr = config::host_addr().to_string();

        let msg_discovery = Discovery::new(process_id, config::MSG_DISCOVERY_PORT)
            .map_err(|e| InitError::Socket(e.to_string()))?;
        let srv_discovery = Discovery::new(process_id, config::SRV_DISCOVERY_PORT)
            .map_err(|e| InitError::Socket(e.to_string()))?;

        let context = zmq::Context::new();
        let socket_set = sockets::build(&context, &host_addr, replier_id, response_receiver_id)
            .map_err(|e| match e {
                Error::AuthConfigError => InitError::Auth,
                other => InitError::Socket(other.to_string()),
            })?;

        log::info!("[Core] Process {} on host {}", process_id, host_addr);
        log::debug!("[Core] Replier identity {}", replier_id);
        log::debug!("[Core] Response receiver identity {}", response_receiver_id);

        let (cmd_tx, cmd_rx) = unbounded();
        let shared = Arc::new(Shared {
            process_id,
            replier_id,
            response_receiver_id,
            endpoints: socket_set.endpoints.clone(),
            context,
            state: Mutex::new(State {
                publisher: socket_set.publisher,
                requester: socket_set.requester,
                subscriptions: HandlerTable::new(),
                repliers: HandlerTable::new(),
                requests: HandlerTable::new(),
                connections: PublisherTable::new(),
                remote_subscribers: PublisherTable::new(),
                srv_connections: Vec::new(),
            }),
            msg_discovery,
            srv_discovery,
            cmd_tx,
            exit: AtomicBool::new(false),
            reception: Mutex::new(None),
        });

        let loop_handle = reception::spawn(
            Arc::clone(&shared),
            socket_set.subscriber,
            socket_set.control,
            socket_set.replier,
            socket_set.response_receiver,
            cmd_rx,
        )
        .map_err(|e| InitError::Socket(e.to_string()))?;
        *shared.reception.lock() = Some(loop_handle);

        // Discovery callbacks run on the beacon threads and take the core
        // lock like everyone else.
        {
            let core = Arc::clone(&shared);
            shared.msg_discovery.set_connections_cb(move |r| core.on_new_connection(r));
        }
        {
            let core = Arc::clone(&shared);
            shared.msg_discovery.set_disconnections_cb(move |r| core.on_new_disconnection(r));
        }
        {
            let core = Arc::clone(&shared);
            shared.srv_discovery.set_connections_cb(move |r| core.on_new_srv_connection(r));
        }
        {
            let core = Arc::clone(&shared);
            shared.srv_discovery.set_disconnections_cb(move |r| core.on_new_srv_disconnection(r));
        }

        shared.msg_discovery.start();
        shared.srv_discovery.start();

        Ok(shared)
    }

    pub fn exiting(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    /// Orderly teardown: stop the reception thread, then discovery. Only
    /// meaningful right before process exit; the instance itself stays.
    #[allow(dead_code)]
    pub fn shutdown(&self) {
        self.exit.store(true, Ordering::Release);
        if let Some(handle) = self.reception.lock().take() {
            let _ = handle.join();
        }
        self.msg_discovery.stop();
        self.srv_discovery.stop();
    }

    fn send_command(&self, command: SocketCommand) {
        if self.cmd_tx.send(command).is_err() {
            log::debug!("[Core] Reception loop gone, socket command dropped");
        }
    }

    // ===== Pub/sub =====

    /// Register a message offering with discovery.
    pub fn advertise_message(
        &self,
        topic: &str,
        msg_type: &str,
        node_id: NodeId,
        options: AdvertiseMessageOptions,
    ) -> Result<MessagePublisher> {
        let mine = self.msg_discovery.publishers(topic);
        if mine
            .get(&self.process_id)
            .is_some_and(|records| records.iter().any(|r| r.node_id == node_id))
        {
            return Err(Error::AlreadyAdvertised(topic.to_string()));
        }

        let record = MessagePublisher {
            topic: topic.to_string(),
            msg_addr: self.endpoints.msg_addr.clone(),
            ctrl_addr: self.endpoints.ctrl_addr.clone(),
            process_id: self.process_id,
            node_id,
            msg_type: msg_type.to_string(),
            options,
        };
        self.msg_discovery.advertise(record.clone())?;
        Ok(record)
    }

    pub fn unadvertise_message(&self, topic: &str, node_id: NodeId) -> Result<()> {
        self.msg_discovery.unadvertise(topic, node_id)
    }

    /// Publish a payload: local handlers synchronously, remote subscribers
    /// through the publisher socket.
    pub fn publish(&self, topic: &str, payload: &[u8], msg_type: &str) -> Result<()> {
        let local = { self.state.lock().subscriptions.handlers(topic) };
        dispatch(topic, &self.endpoints.msg_addr, payload, msg_type, &local);

        let state = self.state.lock();
        if state.remote_subscribers.has_topic(topic) {
            let frames = wire::message_frames(topic, &self.endpoints.msg_addr, payload, msg_type);
            state.publisher.send_multipart(frames, 0)?;
        }
        Ok(())
    }

    /// Store a subscription handler and ask discovery for publishers.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn SubscriptionHandler>) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.subscriptions.add_handler(topic, handler.node_id(), handler.handler_id(), handler);
        }
        self.msg_discovery.discover(topic)
    }

    /// Drop every subscription `node_id` holds on `topic`; when the last
    /// local handler goes, clear the socket filter and tell connected
    /// publishers.
    pub fn unsubscribe(&self, topic: &str, node_id: NodeId) -> Result<()> {
        let (removed, last_one, publishers) = {
            let mut state = self.state.lock();
            let removed = state.subscriptions.remove_node_from_topic(topic, node_id);
            let last_one = !state.subscriptions.has_handlers_for_topic(topic);
            let publishers: Vec<MessagePublisher> =
                state.connections.publishers(topic).into_values().flatten().collect();
            (removed, last_one, publishers)
        };
        if removed.is_empty() {
            return Err(Error::NotAdvertised(topic.to_string()));
        }
        if last_one {
            self.send_command(SocketCommand::SubscriberUnfilter { topic: topic.to_string() });
        }
        for publisher in &publishers {
            self.notify_control(publisher, &removed, END_CONNECTION);
        }
        Ok(())
    }

    // ===== Services =====

    pub fn advertise_service(
        &self,
        topic: &str,
        handler: Arc<dyn ReplyHandler>,
        options: AdvertiseServiceOptions,
    ) -> Result<()> {
        let record = ServicePublisher {
            topic: topic.to_string(),
            addr: self.endpoints.replier_addr.clone(),
            socket_id: self.replier_id,
            process_id: self.process_id,
            node_id: handler.node_id(),
            req_type: handler.req_type().to_string(),
            rep_type: handler.rep_type().to_string(),
            options,
        };
        {
            let mut state = self.state.lock();
            state.repliers.add_handler(topic, handler.node_id(), handler.handler_id(), handler);
        }
        self.srv_discovery.advertise(record)
    }

    pub fn unadvertise_service(&self, topic: &str, node_id: NodeId) -> Result<()> {
        let removed = { self.state.lock().repliers.remove_node_from_topic(topic, node_id) };
        if removed.is_empty() {
            return Err(Error::NotAdvertised(topic.to_string()));
        }
        self.srv_discovery.unadvertise(topic, node_id)
    }

    fn local_replier(
        &self,
        topic: &str,
        req_type: &str,
        rep_type: &str,
    ) -> Option<Arc<dyn ReplyHandler>> {
        self.state
            .lock()
            .repliers
            .first_handler(topic, |h| h.req_type() == req_type && h.rep_type() == rep_type)
    }

    /// Fire-and-forget request; the callback runs when a response arrives,
    /// on the reception thread, or inline when a local responder matches.
    pub fn request_async(
        &self,
        topic: &str,
        node_id: NodeId,
        payload: &[u8],
        req_type: &str,
        rep_type: &str,
        callback: ResponseCallback,
    ) -> Result<()> {
        if let Some(replier) = self.local_replier(topic, req_type, rep_type) {
            let (rep, result) = replier.run_callback(payload);
            callback(&rep, result);
            return Ok(());
        }
        let request = Arc::new(PendingRequest::new(
            topic,
            node_id,
            req_type,
            rep_type,
            payload.to_vec(),
            Some(callback),
        ));
        self.enqueue_request(request)
    }

    /// Blocking request. `Err(Timeout)` when no response arrived within
    /// `timeout` or the owner went away while waiting.
    pub fn request_sync(
        &self,
        topic: &str,
        node_id: NodeId,
        payload: &[u8],
        req_type: &str,
        rep_type: &str,
        timeout: std::time::Duration,
    ) -> Result<(Vec<u8>, bool)> {
        if let Some(replier) = self.local_replier(topic, req_type, rep_type) {
            return Ok(replier.run_callback(payload));
        }
        let request = Arc::new(PendingRequest::new(
            topic,
            node_id,
            req_type,
            rep_type,
            payload.to_vec(),
            None,
        ));
        self.enqueue_request(Arc::clone(&request))?;
        match request.wait(timeout) {
            Some(RequestOutcome::Response(rep, result)) => Ok((rep, result)),
            // Timed out: the handler stays parked so a late response can
            // still collect it.
            Some(RequestOutcome::Cancelled) | None => Err(Error::Timeout),
        }
    }

    /// Park the request and either flush it to a known responder or ask
    /// discovery to find one.
    fn enqueue_request(&self, request: Arc<PendingRequest>) -> Result<()> {
        let topic = request.topic().to_string();
        let req_type = request.req_type().to_string();
        let rep_type = request.rep_type().to_string();
        {
            let mut state = self.state.lock();
            state.requests.add_handler(
                &topic,
                request.node_id(),
                request.handler_id(),
                request,
            );
        }
        if self.srv_discovery.publishers(&topic).is_empty() {
            self.srv_discovery.discover(&topic)
        } else {
            self.send_pending_remote_reqs(&topic, &req_type, &rep_type);
            Ok(())
        }
    }

    /// Flush every unsent pending request for `(topic, req, rep)` to a
    /// responder advertising that exact signature.
    pub fn send_pending_remote_reqs(&self, topic: &str, req_type: &str, rep_type: &str) {
        let responder = self
            .srv_discovery
            .publishers(topic)
            .into_values()
            .flatten()
            .find(|p| p.req_type == req_type && p.rep_type == rep_type)
            .map(|p| (p.addr, p.socket_id));
        let Some((addr, responder_id)) = responder else {
            return;
        };

        let fresh = {
            let mut state = self.state.lock();
            if state.srv_connections.iter().any(|a| a == &addr) {
                false
            } else {
                match state.requester.connect(&addr) {
                    Ok(()) => {
                        state.srv_connections.push(addr.clone());
                        true
                    }
                    Err(e) => {
                        log::debug!("[Core] Requester connect to {} failed: {}", addr, e);
                        return;
                    }
                }
            }
        };
        if fresh {
            log::debug!("[Core] Connected to {} for service requests", addr);
            std::thread::sleep(CONNECTION_SETTLE_DELAY);
        }

        let mut state = self.state.lock();
        let pending = state.requests.handlers(topic);
        let mut oneway_sent = Vec::new();
        for request in pending {
            if request.req_type() != req_type || request.rep_type() != rep_type {
                continue;
            }
            if !request.mark_requested() {
                continue;
            }
            let frames = wire::request_frames(
                responder_id,
                topic,
                &self.endpoints.requester_addr,
                self.response_receiver_id,
                request.node_id(),
                request.handler_id(),
                request.payload(),
                req_type,
                rep_type,
            );
            if let Err(e) = state.requester.send_multipart(frames, 0) {
                // The peer may not be up yet; discovery will retrigger us.
                log::debug!("[Core] Request send to {} failed: {}", addr, e);
            }
            // No response will ever come for a oneway request.
            if rep_type == GENERIC_MESSAGE_TYPE {
                oneway_sent.push((request.node_id(), request.handler_id()));
            }
        }
        for (node_id, handler_id) in oneway_sent {
            state.requests.remove_handler(topic, node_id, handler_id);
        }
    }

    // ===== Discovery callbacks =====

    /// A remote message publisher appeared.
    fn on_new_connection(&self, record: &MessagePublisher) {
        if record.process_id == self.process_id {
            return;
        }
        let matching = {
            let mut state = self.state.lock();
            if !state.subscriptions.has_handlers_for_topic(&record.topic) {
                return;
            }
            if !state.connections.has_addr(&record.msg_addr) {
                if let Ok(Some((username, password))) = config::plain_credentials() {
                    self.send_command(SocketCommand::SubscriberCredentials { username, password });
                }
                self.send_command(SocketCommand::SubscriberConnect {
                    addr: record.msg_addr.clone(),
                });
            }
            self.send_command(SocketCommand::SubscriberFilter { topic: record.topic.clone() });
            state.connections.add(record.clone());

            state
                .subscriptions
                .handlers(&record.topic)
                .into_iter()
                .filter(|h| {
                    h.type_name() == record.msg_type || h.type_name() == GENERIC_MESSAGE_TYPE
                })
                .collect::<Vec<_>>()
        };
        log::debug!("[Core] Connecting to publisher of {}", record.topic);
        self.notify_control(record, &matching, NEW_CONNECTION);
    }

    /// Tell a publisher about our subscribers over a short-lived dealer.
    /// The remote side may not be up yet; failures are swallowed.
    fn notify_control(
        &self,
        publisher: &MessagePublisher,
        handlers: &[Arc<dyn SubscriptionHandler>],
        event: u8,
    ) {
        if handlers.is_empty() {
            return;
        }
        let outcome: std::result::Result<(), zmq::Error> = (|| {
            let socket = self.context.socket(zmq::DEALER)?;
            socket.set_linger(CONTROL_LINGER_MS)?;
            socket.connect(&publisher.ctrl_addr)?;
            std::thread::sleep(CONNECTION_SETTLE_DELAY);
            for handler in handlers {
                let frames = wire::control_frames(
                    &publisher.topic,
                    self.process_id,
                    handler.node_id(),
                    &publisher.msg_type,
                    event,
                );
                socket.send_multipart(frames, 0)?;
            }
            Ok(())
        })();
        if let Err(e) = outcome {
            log::debug!("[Core] Control notification to {} failed: {}", publisher.ctrl_addr, e);
        }
    }

    /// A remote message publisher (or a whole process) went away.
    fn on_new_disconnection(&self, record: &MessagePublisher) {
        let mut state = self.state.lock();
        if !record.topic.is_empty() && !record.node_id.is_nil() {
            state.remote_subscribers.remove_by_node(
                &record.topic,
                record.process_id,
                record.node_id,
            );
            state.connections.remove_by_node(&record.topic, record.process_id, record.node_id);
        } else {
            log::debug!("[Core] Process {} disconnected", record.process_id);
            state.remote_subscribers.remove_by_process(record.process_id);
            state.connections.remove_by_process(record.process_id);
        }
    }

    /// A remote service responder appeared.
    fn on_new_srv_connection(&self, record: &ServicePublisher) {
        let fresh = {
            let mut state = self.state.lock();
            if state.srv_connections.iter().any(|a| a == &record.addr) {
                false
            } else {
                match state.requester.connect(&record.addr) {
                    Ok(()) => {
                        state.srv_connections.push(record.addr.clone());
                        true
                    }
                    Err(e) => {
                        log::debug!(
                            "[Core] Requester connect to {} failed: {}",
                            record.addr,
                            e
                        );
                        false
                    }
                }
            }
        };
        if fresh {
            std::thread::sleep(CONNECTION_SETTLE_DELAY);
        }

        let has_pending = {
            self.state
                .lock()
                .requests
                .first_handler(&record.topic, |r| {
                    r.req_type() == record.req_type && r.rep_type() == record.rep_type
                })
                .is_some()
        };
        if has_pending {
            self.send_pending_remote_reqs(&record.topic, &record.req_type, &record.rep_type);
        }
    }

    /// A remote service responder went away.
    fn on_new_srv_disconnection(&self, record: &ServicePublisher) {
        let mut state = self.state.lock();
        state.srv_connections.retain(|a| a != &record.addr);
    }

    // ===== Node lifecycle =====

    /// Tear down everything a node owns: subscriptions (with the same side
    /// effects as an explicit unsubscribe), repliers, and pending requests.
    /// In-flight blocking requests wake with no response.
    pub fn on_node_destroyed(&self, node_id: NodeId) {
        let subscribed = { self.state.lock().subscriptions.topics_for_node(node_id) };
        for topic in subscribed {
            let _ = self.unsubscribe(&topic, node_id);
        }

        let replier_topics = { self.state.lock().repliers.topics_for_node(node_id) };
        for topic in replier_topics {
            let _ = self.unadvertise_service(&topic, node_id);
        }

        let cancelled = { self.state.lock().requests.remove_by_node(node_id) };
        for (_, request) in cancelled {
            request.cancel();
        }
    }

    // ===== Introspection =====

    /// Whether anything, local or remote, listens on `topic`.
    pub fn has_subscribers(&self, topic: &str) -> bool {
        let state = self.state.lock();
        state.remote_subscribers.has_topic(topic) || state.subscriptions.has_handlers_for_topic(topic)
    }

    /// Topics advertised anywhere on the network. Blocks until discovery
    /// had one heartbeat to converge.
    pub fn topic_list(&self) -> Vec<String> {
        self.msg_discovery.wait_ready();
        self.msg_discovery.topics()
    }

    /// Services advertised anywhere on the network.
    pub fn service_list(&self) -> Vec<String> {
        self.srv_discovery.wait_ready();
        self.srv_discovery.topics()
    }

    pub fn topic_info(&self, topic: &str) -> Vec<MessagePublisher> {
        self.msg_discovery.publishers(topic).into_values().flatten().collect()
    }

    pub fn service_info(&self, topic: &str) -> Vec<ServicePublisher> {
        self.srv_discovery.publishers(topic).into_values().flatten().collect()
    }
}

/// Deliver one payload to a snapshot of local handlers. Runs without the
/// core lock; a payload is decoded at most once per `(kind, type)` group,
/// and a panicking callback is contained here.
pub(crate) fn dispatch(
    topic: &str,
    sender_addr: &str,
    payload: &[u8],
    msg_type: &str,
    handlers: &[Arc<dyn SubscriptionHandler>],
) {
    if handlers.is_empty() {
        // Discovery can race a local unsubscribe; delivering to nobody is
        // a no-op.
        return;
    }
    let info = MessageInfo::new(topic, msg_type, sender_addr);
    let mut decoded: HashMap<(HandlerKind, String), Option<crate::handlers::OpaqueMsg>> =
        HashMap::new();
    for handler in handlers {
        if handler.type_name() != msg_type && handler.type_name() != GENERIC_MESSAGE_TYPE {
            continue;
        }
        let key = (handler.kind(), handler.type_name().to_string());
        let msg = decoded.entry(key).or_insert_with(|| handler.create_msg(payload));
        let Some(msg) = msg else {
            log::debug!("[Core] Payload on {} does not decode as {}", topic, msg_type);
            continue;
        };
        let msg = Arc::clone(msg);
        if catch_unwind(AssertUnwindSafe(|| handler.run_callback(&msg, &info))).is_err() {
            log::error!("[Core] Subscription callback on {} panicked", topic);
        }
    }
}
