// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic name validation and qualification.
//!
//! A raw topic supplied by the user becomes a fully qualified name of the
//! form `<partition>@<namespace>/<raw>`: runs of slashes collapse, the
//! result is checked against a printable-ASCII whitelist, and `@` is
//! reserved as the partition separator. Every public operation passes user
//! names through [`fully_qualified_name`] before touching any table.

use crate::config::MAX_NAME_LENGTH;

/// Whether `name` only contains characters a topic component may use:
/// printable ASCII, no whitespace, no `@`.
fn has_valid_charset(name: &str) -> bool {
    name.bytes().all(|b| (0x21..=0x7e).contains(&b) && b != b'@')
}

/// Whether `partition` may prefix a fully qualified name. Empty means "no
/// partition"; anything else follows the component charset.
pub fn is_valid_partition(partition: &str) -> bool {
    partition.is_empty() || has_valid_charset(partition)
}

/// Whether `ns` may be used as a node namespace.
pub fn is_valid_namespace(ns: &str) -> bool {
    ns.is_empty() || has_valid_charset(ns)
}

/// Whether `topic` may be subscribed or advertised. Unlike partitions and
/// namespaces, a topic must be non-empty.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && has_valid_charset(topic)
}

/// Collapse runs of `/` and drop a trailing slash.
fn collapse_slashes(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_slash = false;
    for c in name.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Combine a partition, a namespace, and a user-supplied topic into the
/// canonical fully qualified name, or `None` when any component fails
/// validation or the result is too long.
///
/// A topic starting with `/` is absolute: the namespace is not applied.
pub fn fully_qualified_name(partition: &str, ns: &str, topic: &str) -> Option<String> {
    if !is_valid_partition(partition) || !is_valid_namespace(ns) || !is_valid_topic(topic) {
        return None;
    }

    let scoped = if topic.starts_with('/') {
        collapse_slashes(topic)
    } else if ns.is_empty() {
        collapse_slashes(&format!("/{}", topic))
    } else {
        collapse_slashes(&format!("/{}/{}", ns, topic))
    };

    // A topic that collapsed to nothing but the root is not addressable.
    if scoped == "/" {
        return None;
    }

    let name = format!("{}@{}", partition, scoped);
    if name.len() > MAX_NAME_LENGTH {
        return None;
    }
    Some(name)
}

/// Drop the partition prefix from a fully qualified name; this is the form
/// handed to subscription callbacks.
pub fn partition_stripped(name: &str) -> &str {
    match name.rfind('@') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_qualification() {
        assert_eq!(
            fully_qualified_name("test0", "", "/chatter"),
            Some("test0@/chatter".to_string())
        );
        assert_eq!(
            fully_qualified_name("", "ns", "chatter"),
            Some("@/ns/chatter".to_string())
        );
        assert_eq!(fully_qualified_name("", "", "chatter"), Some("@/chatter".to_string()));
    }

    #[test]
    fn test_absolute_topic_ignores_namespace() {
        assert_eq!(
            fully_qualified_name("p", "ns", "/abs/topic"),
            Some("p@/abs/topic".to_string())
        );
    }

    #[test]
    fn test_slash_collapse() {
        assert_eq!(
            fully_qualified_name("p", "", "/a//b///c/"),
            Some("p@/a/b/c".to_string())
        );
        assert_eq!(
            fully_qualified_name("p", "ns//x", "t"),
            Some("p@/ns/x/t".to_string())
        );
    }

    #[test]
    fn test_rejections() {
        // Empty topic.
        assert_eq!(fully_qualified_name("p", "ns", ""), None);
        // Only slashes collapses to the root.
        assert_eq!(fully_qualified_name("p", "", "///"), None);
        // Reserved separator inside a component.
        assert_eq!(fully_qualified_name("p", "", "/a@b"), None);
        assert_eq!(fully_qualified_name("p@q", "", "/a"), None);
        // Whitespace and non-printables.
        assert_eq!(fully_qualified_name("p", "", "/a b"), None);
        assert_eq!(fully_qualified_name("p", "", "/a\tb"), None);
        assert_eq!(fully_qualified_name("p", "", "/a\u{7f}b"), None);
    }

    #[test]
    fn test_length_bound() {
        let long = format!("/{}", "x".repeat(MAX_NAME_LENGTH));
        assert_eq!(fully_qualified_name("p", "", &long), None);
    }

    #[test]
    fn test_deterministic_and_injective() {
        let a = fully_qualified_name("p", "ns", "t").expect("valid name should qualify");
        let b = fully_qualified_name("p", "ns", "t").expect("valid name should qualify");
        assert_eq!(a, b);

        // Distinct canonical inputs map to distinct outputs.
        let cases = [
            ("p", "ns", "t"),
            ("p", "ns", "u"),
            ("p", "other", "t"),
            ("q", "ns", "t"),
            ("", "ns", "t"),
        ];
        let mut seen = std::collections::HashSet::new();
        for (p, ns, t) in cases {
            let name = fully_qualified_name(p, ns, t).expect("valid name should qualify");
            assert!(seen.insert(name.clone()), "duplicate output {}", name);
        }
    }

    #[test]
    fn test_partition_stripped() {
        assert_eq!(partition_stripped("test0@/chatter"), "/chatter");
        assert_eq!(partition_stripped("@/chatter"), "/chatter");
        assert_eq!(partition_stripped("/no/partition"), "/no/partition");
    }
}
