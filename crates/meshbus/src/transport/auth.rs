// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PLAIN credential check over the ZMTP authentication protocol (ZAP).
//!
//! When credentials are configured the publisher socket runs in PLAIN
//! server mode and delegates every connection attempt to this handler via
//! the well-known in-process endpoint. The thread lives until that
//! endpoint is torn down with its context.

use std::thread::JoinHandle;

use crate::{Error, Result};

const ZAP_ENDPOINT: &str = "inproc://zeromq.zap.01";
const ZAP_VERSION: &[u8] = b"1.0";

/// ZAP domain stamped on the authenticated publisher socket.
pub const ZAP_DOMAIN: &str = "meshbus";

/// Start the authentication thread. Must run before the PLAIN server
/// socket binds, so connection attempts always find the handler.
pub fn spawn_zap_handler(
    context: &zmq::Context,
    username: String,
    password: String,
) -> Result<JoinHandle<()>> {
    let handler = context.socket(zmq::REP)?;
    handler.bind(ZAP_ENDPOINT)?;

    std::thread::Builder::new()
        .name("mbus-zap".to_string())
        .spawn(move || zap_loop(&handler, &username, &password))
        .map_err(|e| Error::SocketError(format!("zap thread: {}", e)))
}

fn zap_loop(handler: &zmq::Socket, username: &str, password: &str) {
    loop {
        // Request: version, request id, domain, address, identity,
        // mechanism, then the mechanism-specific credential frames.
        let frames = match handler.recv_multipart(0) {
            Ok(frames) => frames,
            // The endpoint went away with the context.
            Err(_) => break,
        };

        let (request_id, given_user, given_pass) = match parse_zap_request(&frames) {
            Some(parts) => parts,
            None => {
                log::debug!("[Auth] Dropping malformed ZAP request ({} frames)", frames.len());
                continue;
            }
        };

        let granted = given_user == username.as_bytes() && given_pass == password.as_bytes();
        let reply: [&[u8]; 6] = if granted {
            [ZAP_VERSION, &request_id, b"200", b"OK", b"anonymous", b""]
        } else {
            [ZAP_VERSION, &request_id, b"400", b"Invalid username or password", b"", b""]
        };
        if let Err(e) = handler.send_multipart(reply, 0) {
            log::debug!("[Auth] ZAP reply failed: {}", e);
            break;
        }
        if !granted {
            log::debug!("[Auth] Rejected PLAIN credentials");
        }
    }
}

type ZapRequest<'a> = (Vec<u8>, &'a [u8], &'a [u8]);

fn parse_zap_request(frames: &[Vec<u8>]) -> Option<ZapRequest<'_>> {
    let [version, request_id, _domain, _address, _identity, mechanism, credentials @ ..] = frames
    else {
        return None;
    };
    if version.as_slice() != ZAP_VERSION || mechanism.as_slice() != b"PLAIN" {
        return None;
    }
    let [user, pass] = credentials else {
        return None;
    };
    Some((request_id.clone(), user.as_slice(), pass.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zap_request(user: &str, pass: &str) -> Vec<Vec<u8>> {
        vec![
            ZAP_VERSION.to_vec(),
            b"1".to_vec(),
            ZAP_DOMAIN.as_bytes().to_vec(),
            b"127.0.0.1".to_vec(),
            Vec::new(),
            b"PLAIN".to_vec(),
            user.as_bytes().to_vec(),
            pass.as_bytes().to_vec(),
        ]
    }

    #[test]
    fn test_parse_valid_request() {
        let frames = zap_request("admin", "secret");
        let (request_id, user, pass) =
            parse_zap_request(&frames).expect("well-formed request should parse");
        assert_eq!(request_id, b"1");
        assert_eq!(user, b"admin");
        assert_eq!(pass, b"secret");
    }

    #[test]
    fn test_rejects_wrong_mechanism_and_version() {
        let mut frames = zap_request("admin", "secret");
        frames[5] = b"CURVE".to_vec();
        assert!(parse_zap_request(&frames).is_none());

        let mut frames = zap_request("admin", "secret");
        frames[0] = b"2.0".to_vec();
        assert!(parse_zap_request(&frames).is_none());
    }

    #[test]
    fn test_rejects_short_request() {
        assert!(parse_zap_request(&[b"1.0".to_vec()]).is_none());
        let frames = &zap_request("a", "b")[..7];
        assert!(parse_zap_request(frames).is_none());
    }
}
