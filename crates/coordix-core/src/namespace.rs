//! Deterministic key-space partitioning.
//!
//! A [`Namespace`] is a dotted or slashed root path shared by every handle a
//! provider creates; a [`KeyPrefixer`] combines it with a caller-supplied user
//! key into a **prefixed key** (the string actually stored in the backend)
//! and a **resolved key** (the string surfaced in events and serialized
//! envelopes). Two independent providers on the same backend never collide
//! as long as their namespaces differ.

use std::fmt;

/// Delimiter separating namespace segments and the namespace from the user key.
const DELIMITER: char = '/';

/// A root path identifying one provider's key space on a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Builds a namespace from a root path, stripping any leading/trailing
    /// delimiters so concatenation is unambiguous.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_matches(DELIMITER);
        Self(trimmed.to_string())
    }

    /// Returns a child namespace, e.g. `ns.child("groupA")`.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        Self::new(format!("{}{DELIMITER}{}", self.0, segment.trim_matches(DELIMITER)))
    }

    /// The namespace's underlying path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Combines a [`Namespace`] with user keys into prefixed/resolved forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefixer {
    namespace: Namespace,
}

impl KeyPrefixer {
    /// Builds a prefixer bound to `namespace`.
    #[must_use]
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    /// The bound namespace.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The key as stored in the backend: `{namespace}/{user_key}`.
    ///
    /// `user_key` is sanitized by replacing any embedded delimiter with an
    /// escaped form so a caller-controlled key cannot be crafted to collide
    /// with another namespace's prefix.
    #[must_use]
    pub fn prefixed_key(&self, user_key: &str) -> String {
        format!("{}{DELIMITER}{}", self.namespace, escape(user_key))
    }

    /// The key as surfaced in events/serialized envelopes: just the
    /// caller-supplied user key, unescaped and delimiter-free by invariant.
    #[must_use]
    pub fn resolved_key(&self, user_key: &str) -> String {
        user_key.to_string()
    }

    /// Recovers the user key from a previously-prefixed key, if it belongs
    /// to this namespace.
    #[must_use]
    pub fn strip_prefix<'a>(&self, prefixed: &'a str) -> Option<&'a str> {
        let prefix = format!("{}{DELIMITER}", self.namespace);
        prefixed.strip_prefix(prefix.as_str())
    }
}

/// Replaces the reserved delimiter inside a user key with an escaped token so
/// resolved keys never contain it (the data-model invariant in §3).
fn escape(user_key: &str) -> String {
    user_key.replace(DELIMITER, "%2F")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_trims_delimiters() {
        let ns = Namespace::new("/@lock/");
        assert_eq!(ns.as_str(), "@lock");
    }

    #[test]
    fn child_namespace_nests() {
        let ns = Namespace::new("@cache");
        let child = ns.child("group-a");
        assert_eq!(child.as_str(), "@cache/group-a");
    }

    #[test]
    fn prefixed_key_round_trips_through_strip_prefix() {
        let prefixer = KeyPrefixer::new(Namespace::new("@lock"));
        let prefixed = prefixer.prefixed_key("order-42");
        assert_eq!(prefixed, "@lock/order-42");
        assert_eq!(prefixer.strip_prefix(&prefixed), Some("order-42"));
    }

    #[test]
    fn resolved_key_never_contains_delimiter() {
        let prefixer = KeyPrefixer::new(Namespace::new("@lock"));
        let resolved = prefixer.resolved_key("order-42");
        assert!(!resolved.contains(DELIMITER));
    }

    #[test]
    fn prefixed_key_escapes_embedded_delimiter() {
        let prefixer = KeyPrefixer::new(Namespace::new("@lock"));
        let prefixed = prefixer.prefixed_key("a/b");
        assert_eq!(prefixed, "@lock/a%2Fb");
    }

    #[test]
    fn strip_prefix_rejects_foreign_namespace() {
        let prefixer = KeyPrefixer::new(Namespace::new("@lock"));
        assert_eq!(prefixer.strip_prefix("@cache/order-42"), None);
    }
}
