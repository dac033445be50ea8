// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending outgoing service requests.
//!
//! A pending request is created when the user issues a request with no
//! local responder, parked in the shared core's request table, flushed to a
//! remote responder once one is known, and completed (or cancelled) by id
//! lookup from the reception loop. Each request carries its own mutex and
//! condition variable so a blocked caller never holds the core lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::identity::{HandlerId, NodeId};

/// Callback of an asynchronous request, fed serialized response bytes and
/// the responder's success flag.
pub type ResponseCallback = Box<dyn Fn(&[u8], bool) + Send + Sync>;

/// Terminal state observed by a blocking caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The responder answered: serialized response plus its success flag.
    Response(Vec<u8>, bool),
    /// The owning node went away while the request was in flight.
    Cancelled,
}

enum RequestState {
    Waiting,
    Done(RequestOutcome),
}

/// One in-flight service request.
pub struct PendingRequest {
    topic: String,
    node_id: NodeId,
    handler_id: HandlerId,
    req_type: String,
    rep_type: String,
    payload: Vec<u8>,
    /// Set once the request has been written to a responder; transitions
    /// are monotonic (unsent -> sent -> completed).
    requested: AtomicBool,
    state: Mutex<RequestState>,
    completed: Condvar,
    callback: Option<ResponseCallback>,
}

impl PendingRequest {
    pub fn new(
        topic: impl Into<String>,
        node_id: NodeId,
        req_type: impl Into<String>,
        rep_type: impl Into<String>,
        payload: Vec<u8>,
        callback: Option<ResponseCallback>,
    ) -> Self {
        Self {
            topic: topic.into(),
            node_id,
            handler_id: HandlerId::new(),
            req_type: req_type.into(),
            rep_type: rep_type.into(),
            payload,
            requested: AtomicBool::new(false),
            state: Mutex::new(RequestState::Waiting),
            completed: Condvar::new(),
            callback,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn handler_id(&self) -> HandlerId {
        self.handler_id
    }

    pub fn req_type(&self) -> &str {
        &self.req_type
    }

    pub fn rep_type(&self) -> &str {
        &self.rep_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Mark the request as written to a responder. Returns `false` when it
    /// already was, so a request is never flushed twice.
    pub fn mark_requested(&self) -> bool {
        !self.requested.swap(true, Ordering::AcqRel)
    }

    /// Store the response, wake the blocking caller, and run the async
    /// callback if one is attached.
    pub fn notify(&self, response: &[u8], result: bool) {
        {
            let mut state = self.state.lock();
            *state = RequestState::Done(RequestOutcome::Response(response.to_vec(), result));
        }
        self.completed.notify_all();
        if let Some(cb) = &self.callback {
            cb(response, result);
        }
    }

    /// Wake a blocking caller with no response; used when the owning node
    /// is destroyed.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, RequestState::Done(_)) {
                return;
            }
            *state = RequestState::Done(RequestOutcome::Cancelled);
        }
        self.completed.notify_all();
    }

    /// Block until the request completes or `timeout` expires. `None`
    /// means the timeout hit; the request stays parked in the table so a
    /// late response can still collect it.
    pub fn wait(&self, timeout: Duration) -> Option<RequestOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let RequestState::Done(outcome) = &*state {
                return Some(outcome.clone());
            }
            if self.completed.wait_until(&mut state, deadline).timed_out() {
                if let RequestState::Done(outcome) = &*state {
                    return Some(outcome.clone());
                }
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request() -> PendingRequest {
        PendingRequest::new(
            "@/add",
            NodeId::new(),
            "test.msgs.Int",
            "test.msgs.Int",
            vec![3, 0, 0, 0],
            None,
        )
    }

    #[test]
    fn test_wait_times_out() {
        let req = request();
        let start = Instant::now();
        assert_eq!(req.wait(Duration::from_millis(50)), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let req = Arc::new(request());
        let waiter = Arc::clone(&req);
        let handle = std::thread::spawn(move || waiter.wait(Duration::from_secs(5)));

        // Give the waiter a moment to park.
        std::thread::sleep(Duration::from_millis(20));
        req.notify(b"pong", true);

        let outcome = handle.join().expect("waiter should not panic");
        assert_eq!(outcome, Some(RequestOutcome::Response(b"pong".to_vec(), true)));
    }

    #[test]
    fn test_cancel_wakes_with_no_response() {
        let req = Arc::new(request());
        let waiter = Arc::clone(&req);
        let handle = std::thread::spawn(move || waiter.wait(Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(20));
        req.cancel();

        let outcome = handle.join().expect("waiter should not panic");
        assert_eq!(outcome, Some(RequestOutcome::Cancelled));
    }

    #[test]
    fn test_cancel_after_notify_keeps_response() {
        let req = request();
        req.notify(b"pong", true);
        req.cancel();
        assert_eq!(
            req.wait(Duration::from_millis(1)),
            Some(RequestOutcome::Response(b"pong".to_vec(), true))
        );
    }

    #[test]
    fn test_mark_requested_is_one_shot() {
        let req = request();
        assert!(!req.requested());
        assert!(req.mark_requested());
        assert!(!req.mark_requested());
        assert!(req.requested());
    }

    #[test]
    fn test_async_callback_runs_on_notify() {
        let hits = Arc::new(AtomicBool::new(false));
        let hits2 = Arc::clone(&hits);
        let req = PendingRequest::new(
            "@/add",
            NodeId::new(),
            "t",
            "t",
            Vec::new(),
            Some(Box::new(move |rep, ok| {
                assert_eq!(rep, b"pong");
                assert!(ok);
                hits2.store(true, Ordering::SeqCst);
            })),
        );
        req.notify(b"pong", true);
        assert!(hits.load(Ordering::SeqCst));
    }
}
