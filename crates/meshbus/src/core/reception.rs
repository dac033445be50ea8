// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The reception loop.
//!
//! A dedicated thread exclusively owns the four inbound sockets. Each
//! iteration drains queued socket commands, polls the sockets with a
//! bounded timeout, dispatches whatever arrived, and checks the exit flag.
//! Malformed traffic is dropped with a diagnostic; nothing thrown by a
//! user callback crosses this thread's boundary.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::Receiver;

use crate::config::{CONNECTION_SETTLE_DELAY, RECEPTION_POLL_TIMEOUT_MS};
use crate::core::{dispatch, Shared};
use crate::message::GENERIC_MESSAGE_TYPE;
use crate::records::MessagePublisher;
use crate::transport::wire::{self, NEW_CONNECTION};
use crate::transport::SocketCommand;

pub(crate) fn spawn(
    shared: Arc<Shared>,
    subscriber: zmq::Socket,
    control: zmq::Socket,
    replier: zmq::Socket,
    response_receiver: zmq::Socket,
    commands: Receiver<SocketCommand>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name("mbus-reception".to_string()).spawn(move || {
        let reception = ReceptionLoop {
            shared,
            subscriber,
            control,
            replier,
            response_receiver,
            commands,
        };
        reception.run();
    })
}

struct ReceptionLoop {
    shared: Arc<Shared>,
    subscriber: zmq::Socket,
    control: zmq::Socket,
    replier: zmq::Socket,
    response_receiver: zmq::Socket,
    commands: Receiver<SocketCommand>,
}

impl ReceptionLoop {
    fn run(&self) {
        log::debug!("[Reception] Loop started");
        loop {
            self.apply_commands();

            let readable = {
                let mut items = [
                    self.subscriber.as_poll_item(zmq::POLLIN),
                    self.control.as_poll_item(zmq::POLLIN),
                    self.replier.as_poll_item(zmq::POLLIN),
                    self.response_receiver.as_poll_item(zmq::POLLIN),
                ];
                match zmq::poll(&mut items, RECEPTION_POLL_TIMEOUT_MS) {
                    Ok(_) => [
                        items[0].is_readable(),
                        items[1].is_readable(),
                        items[2].is_readable(),
                        items[3].is_readable(),
                    ],
                    Err(e) => {
                        log::debug!("[Reception] Poll error: {}", e);
                        [false; 4]
                    }
                }
            };

            if readable[0] {
                self.recv_msg_update();
            }
            if readable[1] {
                self.recv_control_update();
            }
            if readable[2] {
                self.recv_srv_request();
            }
            if readable[3] {
                self.recv_srv_response();
            }

            if self.shared.exiting() {
                break;
            }
        }
        log::debug!("[Reception] Loop exiting");
    }

    /// Apply socket operations forwarded by discovery and facade threads.
    fn apply_commands(&self) {
        while let Ok(command) = self.commands.try_recv() {
            let outcome = match &command {
                SocketCommand::SubscriberConnect { addr } => self.subscriber.connect(addr),
                SocketCommand::SubscriberFilter { topic } => {
                    self.subscriber.set_subscribe(topic.as_bytes())
                }
                SocketCommand::SubscriberUnfilter { topic } => {
                    self.subscriber.set_unsubscribe(topic.as_bytes())
                }
                SocketCommand::SubscriberCredentials { username, password } => self
                    .subscriber
                    .set_plain_username(Some(username.as_str()))
                    .and_then(|()| self.subscriber.set_plain_password(Some(password.as_str()))),
            };
            if let Err(e) = outcome {
                // The remote peer may not be up yet; discovery will come
                // around again.
                log::debug!("[Reception] {:?} failed: {}", command, e);
            }
        }
    }

    /// Four-frame publish from a remote publisher.
    fn recv_msg_update(&self) {
        let frames = match self.subscriber.recv_multipart(0) {
            Ok(frames) => frames,
            Err(e) => {
                log::debug!("[Reception] Subscriber recv error: {}", e);
                return;
            }
        };
        let update = match wire::parse_message(&frames) {
            Ok(update) => update,
            Err(e) => {
                log::debug!("[Reception] Dropping publish: {}", e);
                return;
            }
        };

        let handlers = { self.shared.state.lock().subscriptions.handlers(&update.topic) };
        dispatch(
            &update.topic,
            &update.sender_addr,
            &update.payload,
            &update.msg_type,
            &handlers,
        );
    }

    /// Five-frame subscriber notification on the control socket.
    fn recv_control_update(&self) {
        let frames = match self.control.recv_multipart(0) {
            Ok(frames) => frames,
            Err(e) => {
                log::debug!("[Reception] Control recv error: {}", e);
                return;
            }
        };
        let update = match wire::parse_control(&frames) {
            Ok(update) => update,
            Err(e) => {
                log::debug!("[Reception] Dropping control update: {}", e);
                return;
            }
        };

        let mut state = self.shared.state.lock();
        if update.event == NEW_CONNECTION {
            log::debug!(
                "[Reception] Remote subscriber {} on {}",
                update.node_id,
                update.topic
            );
            state.remote_subscribers.add(MessagePublisher {
                topic: update.topic,
                msg_addr: String::new(),
                ctrl_addr: String::new(),
                process_id: update.process_id,
                node_id: update.node_id,
                msg_type: update.msg_type,
                options: Default::default(),
            });
        } else {
            log::debug!(
                "[Reception] Remote subscriber {} left {}",
                update.node_id,
                update.topic
            );
            state.remote_subscribers.remove_by_node(
                &update.topic,
                update.process_id,
                update.node_id,
            );
        }
    }

    /// Nine-frame service request (the router prepends the peer identity).
    fn recv_srv_request(&self) {
        let frames = match self.replier.recv_multipart(0) {
            Ok(frames) => frames,
            Err(e) => {
                log::debug!("[Reception] Replier recv error: {}", e);
                return;
            }
        };
        if frames.len() < 2 {
            log::debug!("[Reception] Dropping request with no body");
            return;
        }
        let request = match wire::parse_request(&frames[1..]) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("[Reception] Dropping request: {}", e);
                return;
            }
        };

        let handler = {
            self.shared.state.lock().repliers.first_handler(&request.topic, |h| {
                h.req_type() == request.req_type && h.rep_type() == request.rep_type
            })
        };
        let Some(handler) = handler else {
            log::debug!("[Reception] No replier for {}", request.topic);
            return;
        };

        let Ok((rep, result)) =
            catch_unwind(AssertUnwindSafe(|| handler.run_callback(&request.payload)))
        else {
            log::error!("[Reception] Service callback on {} panicked", request.topic);
            return;
        };

        // A oneway request gets no response at all.
        if request.rep_type == GENERIC_MESSAGE_TYPE {
            return;
        }

        let known = {
            let state = self.shared.state.lock();
            state.srv_connections.iter().any(|a| a == &request.sender_addr)
        };
        if !known {
            if let Err(e) = self.replier.connect(&request.sender_addr) {
                log::debug!(
                    "[Reception] Replier connect to {} failed: {}",
                    request.sender_addr,
                    e
                );
                return;
            }
            self.shared.state.lock().srv_connections.push(request.sender_addr.clone());
            log::debug!("[Reception] Connected to {} for responses", request.sender_addr);
            std::thread::sleep(CONNECTION_SETTLE_DELAY);
        }

        let frames = wire::response_frames(
            request.destination_id,
            &request.topic,
            request.node_id,
            request.request_id,
            &rep,
            result,
        );
        if let Err(e) = self.replier.send_multipart(frames, 0) {
            log::debug!("[Reception] Response send failed: {}", e);
        }
    }

    /// Six-frame service response (identity frame first).
    fn recv_srv_response(&self) {
        let frames = match self.response_receiver.recv_multipart(0) {
            Ok(frames) => frames,
            Err(e) => {
                log::debug!("[Reception] Response recv error: {}", e);
                return;
            }
        };
        if frames.len() < 2 {
            log::debug!("[Reception] Dropping response with no body");
            return;
        }
        let response = match wire::parse_response(&frames[1..]) {
            Ok(response) => response,
            Err(e) => {
                log::debug!("[Reception] Dropping response: {}", e);
                return;
            }
        };

        let request = {
            let mut state = self.shared.state.lock();
            let request = state.requests.handler(
                &response.topic,
                response.node_id,
                response.request_id,
            );
            if request.is_some() {
                state.requests.remove_handler(
                    &response.topic,
                    response.node_id,
                    response.request_id,
                );
            }
            request
        };
        match request {
            Some(request) => {
                if catch_unwind(AssertUnwindSafe(|| {
                    request.notify(&response.payload, response.result)
                }))
                .is_err()
                {
                    log::error!("[Reception] Response callback on {} panicked", response.topic);
                }
            }
            // The requester timed out long ago or its node is gone.
            None => log::debug!("[Reception] Late response on {} dropped", response.topic),
        }
    }
}
