// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data-plane plumbing: socket construction, multipart frame layouts, and
//! the PLAIN authentication handler.

pub mod auth;
pub mod sockets;
pub mod wire;

/// Operations on the inbound sockets requested by other threads.
///
/// The reception thread exclusively owns the four inbound sockets; when a
/// discovery callback or facade call needs to touch the subscriber socket
/// it forwards the operation here and the loop applies it between polls.
#[derive(Debug)]
pub enum SocketCommand {
    /// Connect the subscriber socket to a remote data endpoint.
    SubscriberConnect { addr: String },
    /// Add a subscription filter for a topic.
    SubscriberFilter { topic: String },
    /// Drop the subscription filter for a topic.
    SubscriberUnfilter { topic: String },
    /// Attach PLAIN credentials before connecting to an authenticated
    /// publisher.
    SubscriberCredentials { username: String, password: String },
}
