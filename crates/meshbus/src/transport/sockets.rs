// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Construction of the six data-plane sockets.
//!
//! All sockets bind to an ephemeral TCP port on the host address; the
//! endpoint actually bound is read back and later published through
//! discovery. Router sockets get zero linger plus mandatory routing so a
//! send to an unknown peer fails synchronously instead of queueing
//! forever.

use crate::config::plain_credentials;
use crate::identity::SocketId;
use crate::transport::auth;
use crate::{Error, Result};

/// The six sockets plus their bound endpoints.
pub struct SocketSet {
    /// Fanout out (PUB).
    pub publisher: zmq::Socket,
    /// Fanout in (SUB); filters are set per discovered topic.
    pub subscriber: zmq::Socket,
    /// Subscribe notifications in (DEALER, bound).
    pub control: zmq::Socket,
    /// Service requests in, responses out (ROUTER).
    pub replier: zmq::Socket,
    /// Service requests out (ROUTER).
    pub requester: zmq::Socket,
    /// Service responses in (ROUTER).
    pub response_receiver: zmq::Socket,
    pub endpoints: Endpoints,
}

/// Bound endpoints advertised through discovery.
#[derive(Clone, Debug)]
pub struct Endpoints {
    /// Publisher (data) endpoint.
    pub msg_addr: String,
    /// Control endpoint.
    pub ctrl_addr: String,
    /// Replier endpoint; where requesters send requests.
    pub replier_addr: String,
    /// Response-receiver endpoint; where repliers send responses.
    pub requester_addr: String,
}

fn last_endpoint(socket: &zmq::Socket) -> Result<String> {
    socket
        .get_last_endpoint()?
        .map_err(|_| Error::SocketError("bound endpoint is not valid UTF-8".to_string()))
}

/// Build and bind all six sockets.
///
/// When PLAIN credentials are configured the publisher becomes an
/// authenticating server and the ZAP thread is started before its bind.
/// Exactly one credential variable set fails with
/// [`Error::AuthConfigError`] without touching any socket.
pub fn build(
    context: &zmq::Context,
    host_addr: &str,
    replier_id: SocketId,
    response_receiver_id: SocketId,
) -> Result<SocketSet> {
    let credentials = plain_credentials()?;

    let any_tcp = format!("tcp://{}:*", host_addr);

    let publisher = context.socket(zmq::PUB)?;
    if let Some((username, password)) = credentials {
        auth::spawn_zap_handler(context, username, password)?;
        publisher.set_zap_domain(auth::ZAP_DOMAIN)?;
        publisher.set_plain_server(true)?;
    }
    publisher.set_linger(0)?;
    publisher.bind(&any_tcp)?;
    let msg_addr = last_endpoint(&publisher)?;

    let subscriber = context.socket(zmq::SUB)?;

    let control = context.socket(zmq::DEALER)?;
    control.bind(&any_tcp)?;
    let ctrl_addr = last_endpoint(&control)?;

    let response_receiver = context.socket(zmq::ROUTER)?;
    response_receiver.set_identity(&response_receiver_id.to_frame())?;
    response_receiver.bind(&any_tcp)?;
    let requester_addr = last_endpoint(&response_receiver)?;

    let replier = context.socket(zmq::ROUTER)?;
    replier.set_identity(&replier_id.to_frame())?;
    replier.set_linger(0)?;
    replier.set_router_mandatory(true)?;
    replier.bind(&any_tcp)?;
    let replier_addr = last_endpoint(&replier)?;

    let requester = context.socket(zmq::ROUTER)?;
    requester.set_linger(0)?;
    requester.set_router_mandatory(true)?;

    log::debug!("[Sockets] data={} ctrl={} replier={} responses={}",
        msg_addr, ctrl_addr, replier_addr, requester_addr);

    Ok(SocketSet {
        publisher,
        subscriber,
        control,
        replier,
        requester,
        response_receiver,
        endpoints: Endpoints { msg_addr, ctrl_addr, replier_addr, requester_addr },
    })
}
