// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Identifiers for processes, nodes, handlers, and socket endpoints.
//!
//! All four are 16-byte v4 UUIDs; the newtypes keep them from being mixed
//! up at call sites. On the wire every identifier travels as its hyphenated
//! ASCII form.

use std::fmt;

use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The all-zero identifier, used as an "unset" marker in
            /// process-wide discovery records.
            pub fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Whether this is the all-zero marker.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Parse the hyphenated wire form.
            pub fn parse(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }

            /// Wire form as bytes, suitable for a message frame.
            pub fn to_frame(self) -> Vec<u8> {
                self.to_string().into_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.hyphenated().fmt(f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

uuid_id! {
    /// One per process, assigned when the shared core comes up.
    ProcessId
}

uuid_id! {
    /// One per user-facing node, created on node construction.
    NodeId
}

uuid_id! {
    /// Identifies one subscription, replier, or pending request.
    HandlerId
}

uuid_id! {
    /// Routing identity of a router socket endpoint.
    SocketId
}
