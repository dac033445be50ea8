// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The user-facing node.
//!
//! A [`Node`] is a lightweight handle onto the process-wide core: it owns
//! a node id, a partition/namespace pair, and whatever handlers it
//! registered. Many nodes coexist in one process; dropping a node removes
//! every handler it owns and wakes its in-flight blocking requests.

mod options;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{self, Shared};
use crate::handlers::{
    RawSubscriptionHandler, ServiceReplyHandler, SubscriptionHandler, Throttle,
    TypedSubscriptionHandler,
};
use crate::identity::NodeId;
use crate::message::{Empty, Message, MessageInfo};
use crate::records::{MessagePublisher, ServicePublisher};
use crate::topic::fully_qualified_name;
use crate::{Error, Result};

pub use options::{
    AdvertiseMessageOptions, AdvertiseServiceOptions, NodeOptions, SubscribeOptions,
};

/// A client of the transport: publishes, subscribes, serves, and requests.
pub struct Node {
    options: NodeOptions,
    node_id: NodeId,
    advertised_topics: Mutex<HashSet<String>>,
    subscribed_topics: Mutex<HashSet<String>>,
    advertised_services: Mutex<HashSet<String>>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    /// Node with default options (partition from `IGN_PARTITION`, no
    /// namespace).
    pub fn new() -> Self {
        Self::with_options(NodeOptions::default())
    }

    pub fn with_options(options: NodeOptions) -> Self {
        Self {
            options,
            node_id: NodeId::new(),
            advertised_topics: Mutex::new(HashSet::new()),
            subscribed_topics: Mutex::new(HashSet::new()),
            advertised_services: Mutex::new(HashSet::new()),
        }
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn resolve(&self, topic: &str) -> Result<String> {
        fully_qualified_name(self.options.partition(), self.options.namespace(), topic)
            .ok_or_else(|| Error::InvalidTopic(topic.to_string()))
    }

    // ===== Publish =====

    /// Advertise a topic carrying `M`. The returned [`Publisher`] is the
    /// only way to publish; dropping its last clone unadvertises.
    pub fn advertise<M: Message>(
        &self,
        topic: &str,
        options: AdvertiseMessageOptions,
    ) -> Result<Publisher> {
        self.advertise_raw(topic, M::TYPE_NAME, options)
    }

    /// Advertise with an explicit type name; for forwarding pre-serialized
    /// payloads.
    pub fn advertise_raw(
        &self,
        topic: &str,
        msg_type: &str,
        options: AdvertiseMessageOptions,
    ) -> Result<Publisher> {
        let name = self.resolve(topic)?;
        let shared = core::instance()?;
        let record = shared.advertise_message(&name, msg_type, self.node_id, options)?;
        self.advertised_topics.lock().insert(name);
        Ok(Publisher::new(shared, record))
    }

    // ===== Subscribe =====

    /// Subscribe with a message-only callback.
    pub fn subscribe<M: Message>(
        &self,
        topic: &str,
        callback: impl Fn(&M) + Send + Sync + 'static,
    ) -> Result<()> {
        self.subscribe_with_options(topic, SubscribeOptions::default(), move |msg: &M, _| {
            callback(msg)
        })
    }

    /// Subscribe with a callback that also receives [`MessageInfo`].
    pub fn subscribe_with_info<M: Message>(
        &self,
        topic: &str,
        callback: impl Fn(&M, &MessageInfo) + Send + Sync + 'static,
    ) -> Result<()> {
        self.subscribe_with_options(topic, SubscribeOptions::default(), callback)
    }

    pub fn subscribe_with_options<M: Message>(
        &self,
        topic: &str,
        options: SubscribeOptions,
        callback: impl Fn(&M, &MessageInfo) + Send + Sync + 'static,
    ) -> Result<()> {
        let handler = TypedSubscriptionHandler::<M>::new(self.node_id, options.msgs_per_sec, callback);
        self.register_subscription(topic, Arc::new(handler))
    }

    /// Subscribe to the raw payload of any type published on the topic.
    pub fn raw_subscribe(
        &self,
        topic: &str,
        callback: impl Fn(&[u8], &MessageInfo) + Send + Sync + 'static,
    ) -> Result<()> {
        let handler =
            RawSubscriptionHandler::wildcard(self.node_id, crate::config::UNTHROTTLED, callback);
        self.register_subscription(topic, Arc::new(handler))
    }

    /// Raw subscription filtered to one declared type name.
    pub fn raw_subscribe_typed(
        &self,
        topic: &str,
        msg_type: &str,
        options: SubscribeOptions,
        callback: impl Fn(&[u8], &MessageInfo) + Send + Sync + 'static,
    ) -> Result<()> {
        let handler =
            RawSubscriptionHandler::new(self.node_id, msg_type, options.msgs_per_sec, callback);
        self.register_subscription(topic, Arc::new(handler))
    }

    fn register_subscription(
        &self,
        topic: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<()> {
        let name = self.resolve(topic)?;
        let shared = core::instance()?;
        shared.subscribe(&name, handler)?;
        self.subscribed_topics.lock().insert(name);
        Ok(())
    }

    /// Drop every subscription this node holds on the topic.
    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        let name = self.resolve(topic)?;
        let shared = core::instance()?;
        shared.unsubscribe(&name, self.node_id)?;
        self.subscribed_topics.lock().remove(&name);
        Ok(())
    }

    // ===== Services =====

    /// Advertise a service. `None` from the callback reports failure to
    /// the caller.
    pub fn advertise_service<Req: Message, Rep: Message>(
        &self,
        topic: &str,
        callback: impl Fn(&Req) -> Option<Rep> + Send + Sync + 'static,
    ) -> Result<()> {
        self.advertise_service_with_options(topic, AdvertiseServiceOptions::default(), callback)
    }

    pub fn advertise_service_with_options<Req: Message, Rep: Message>(
        &self,
        topic: &str,
        options: AdvertiseServiceOptions,
        callback: impl Fn(&Req) -> Option<Rep> + Send + Sync + 'static,
    ) -> Result<()> {
        let name = self.resolve(topic)?;
        if self.advertised_services.lock().contains(&name) {
            return Err(Error::AlreadyAdvertised(name));
        }
        let shared = core::instance()?;
        let handler = ServiceReplyHandler::<Req, Rep>::new(self.node_id, callback);
        shared.advertise_service(&name, Arc::new(handler), options)?;
        self.advertised_services.lock().insert(name);
        Ok(())
    }

    /// Oneway service: consumes requests, never responds.
    pub fn advertise_oneway_service<Req: Message>(
        &self,
        topic: &str,
        callback: impl Fn(&Req) + Send + Sync + 'static,
    ) -> Result<()> {
        self.advertise_service::<Req, Empty>(topic, move |req| {
            callback(req);
            Some(Empty)
        })
    }

    pub fn unadvertise_service(&self, topic: &str) -> Result<()> {
        let name = self.resolve(topic)?;
        let shared = core::instance()?;
        shared.unadvertise_service(&name, self.node_id)?;
        self.advertised_services.lock().remove(&name);
        Ok(())
    }

    /// Asynchronous request. The callback runs once with the decoded
    /// response and the responder's success flag; a response that does not
    /// decode as `Rep` is logged and never reaches the callback.
    pub fn request<Req: Message, Rep: Message>(
        &self,
        topic: &str,
        request: &Req,
        callback: impl Fn(&Rep, bool) + Send + Sync + 'static,
    ) -> Result<()> {
        let name = self.resolve(topic)?;
        let shared = core::instance()?;
        shared.request_async(
            &name,
            self.node_id,
            &request.encode(),
            Req::TYPE_NAME,
            Rep::TYPE_NAME,
            Box::new(move |payload, result| match Rep::decode(payload) {
                Some(rep) => callback(&rep, result),
                None => log::debug!(
                    "[Node] Response does not decode as {}, callback skipped",
                    Rep::TYPE_NAME
                ),
            }),
        )
    }

    /// Asynchronous request with no input.
    pub fn request_no_input<Rep: Message>(
        &self,
        topic: &str,
        callback: impl Fn(&Rep, bool) + Send + Sync + 'static,
    ) -> Result<()> {
        self.request(topic, &Empty, callback)
    }

    /// Blocking request. `Ok(Some(rep))` on success, `Ok(None)` when the
    /// responder reported failure or its response did not decode, and
    /// `Err(Timeout)` when nothing came back in time.
    pub fn request_sync<Req: Message, Rep: Message>(
        &self,
        topic: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Option<Rep>> {
        let name = self.resolve(topic)?;
        let shared = core::instance()?;
        let (payload, result) = shared.request_sync(
            &name,
            self.node_id,
            &request.encode(),
            Req::TYPE_NAME,
            Rep::TYPE_NAME,
            timeout,
        )?;
        if !result {
            return Ok(None);
        }
        Ok(Rep::decode(&payload))
    }

    /// Blocking request with no input.
    pub fn request_sync_no_input<Rep: Message>(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Rep>> {
        self.request_sync(topic, &Empty, timeout)
    }

    /// Fire a request expecting no response.
    pub fn request_oneway<Req: Message>(&self, topic: &str, request: &Req) -> Result<()> {
        self.request::<Req, Empty>(topic, request, |_, _| {})
    }

    // ===== Introspection =====

    /// Topics this node advertised.
    pub fn advertised_topics(&self) -> Vec<String> {
        self.advertised_topics.lock().iter().cloned().collect()
    }

    /// Topics this node subscribed to (an address for them may not be
    /// known yet).
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscribed_topics.lock().iter().cloned().collect()
    }

    /// Services this node advertised.
    pub fn advertised_services(&self) -> Vec<String> {
        self.advertised_services.lock().iter().cloned().collect()
    }

    /// Every topic advertised on the network. Blocks up to one heartbeat
    /// interval while discovery converges.
    pub fn topic_list(&self) -> Result<Vec<String>> {
        Ok(core::instance()?.topic_list())
    }

    /// Every service advertised on the network. Blocks up to one
    /// heartbeat interval while discovery converges.
    pub fn service_list(&self) -> Result<Vec<String>> {
        Ok(core::instance()?.service_list())
    }

    /// Known publishers of one topic.
    pub fn topic_info(&self, topic: &str) -> Result<Vec<MessagePublisher>> {
        let name = self.resolve(topic)?;
        Ok(core::instance()?.topic_info(&name))
    }

    /// Known responders of one service.
    pub fn service_info(&self, topic: &str) -> Result<Vec<ServicePublisher>> {
        let name = self.resolve(topic)?;
        Ok(core::instance()?.service_info(&name))
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Ok(shared) = core::instance() {
            shared.on_node_destroyed(self.node_id);
        }
    }
}

// ===== Publisher handle =====

struct PublisherInner {
    shared: Arc<Shared>,
    record: MessagePublisher,
    throttle: Throttle,
}

impl Drop for PublisherInner {
    fn drop(&mut self) {
        if let Err(e) = self.shared.unadvertise_message(&self.record.topic, self.record.node_id) {
            log::debug!("[Node] Unadvertise of {} failed: {}", self.record.topic, e);
        }
    }
}

/// Handle for publishing on an advertised topic. Clones share the
/// advertisement; the topic is unadvertised when the last clone drops.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

impl Publisher {
    pub(crate) fn new(shared: Arc<Shared>, record: MessagePublisher) -> Self {
        let throttle = Throttle::new(record.options.msgs_per_sec);
        Self { inner: Arc::new(PublisherInner { shared, record, throttle }) }
    }

    /// Publish a typed message. Local subscribers run before this returns;
    /// remote delivery goes out on the data socket.
    pub fn publish<M: Message>(&self, msg: &M) -> Result<()> {
        if M::TYPE_NAME != self.inner.record.msg_type {
            return Err(Error::TypeMismatch);
        }
        self.publish_raw(&msg.encode(), M::TYPE_NAME)
    }

    /// Publish pre-serialized bytes; `msg_type` must match the advertised
    /// type.
    pub fn publish_raw(&self, payload: &[u8], msg_type: &str) -> Result<()> {
        if msg_type != self.inner.record.msg_type {
            return Err(Error::TypeMismatch);
        }
        // A throttled publisher silently drops messages above its rate.
        if !self.inner.throttle.admit() {
            return Ok(());
        }
        self.inner.shared.publish(&self.inner.record.topic, payload, msg_type)
    }

    /// Fully qualified topic this handle publishes on.
    pub fn topic(&self) -> &str {
        &self.inner.record.topic
    }

    /// Whether any subscriber, local or remote, listens on this topic.
    pub fn has_connections(&self) -> bool {
        self.inner.shared.has_subscribers(&self.inner.record.topic)
    }
}
