//! Cross-process handle identity.
//!
//! Serialized as a [`HandleEnvelope`] and carried through a
//! [`SerdeRegistry`] of [`SerdeTransformer`]s, each scoped to a
//! `(backend_kind, namespace, transformer_name)` tuple. A handle acquired on
//! node A can be reconstructed on node B only if node B's provider registered
//! a transformer whose tuple matches — otherwise the transformer declines
//! (`is_applicable` returns `false`) rather than attempting a lossy decode.
//!
//! Grounded on the teacher's `ServiceRegistry` (`DashMap`-backed, explicit
//! `register`, keyed lookup) generalized from a single key to a 3-tuple.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// The only envelope format version this crate emits or accepts. Unknown
/// versions are rejected, never guessed at.
pub const ENVELOPE_VERSION: &str = "1";

/// The wire-shape of a serialized handle identity (lock/semaphore/circuit
/// breaker). JSON-shaped per spec §6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandleEnvelope {
    /// Envelope format version; always [`ENVELOPE_VERSION`] for envelopes
    /// this crate produces.
    pub version: String,
    /// Which backend kind produced this handle (e.g. `"memory"`, `"redis"`,
    /// `"postgres"`).
    pub backend_kind: String,
    /// The namespace the owning provider was constructed with.
    pub namespace: String,
    /// The name of the transformer that can round-trip this envelope.
    pub serde_transformer_name: String,
    /// The resolved (unprefixed) user key.
    pub key: String,
    /// Owner id (lock) or slot id (semaphore); unused for circuit breakers.
    pub owner_or_slot_id: String,
    /// The semaphore's admission limit, if applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// TTL in milliseconds, if the handle carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl HandleEnvelope {
    /// Two envelopes identify the same handle iff their identity tuple
    /// (backend kind, namespace, key, owner/slot id) matches — this is
    /// intentionally narrower than full field equality, matching §3's
    /// "Two handles are equal iff all four identity tuple components match".
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.backend_kind == other.backend_kind
            && self.namespace == other.namespace
            && self.key == other.key
            && self.owner_or_slot_id == other.owner_or_slot_id
    }
}

/// A pluggable (serialize, deserialize, `is_applicable`) triple.
///
/// `is_applicable` must discriminate purely by the `(backend_kind,
/// namespace, name)` tuple — never by attempting and catching a failed
/// decode — so that a mismatched transformer declines cheaply and
/// predictably.
pub trait SerdeTransformer: Send + Sync {
    /// The transformer's own name, matched against
    /// [`HandleEnvelope::serde_transformer_name`].
    fn name(&self) -> &str;

    /// The backend kind this transformer's provider is bound to.
    fn backend_kind(&self) -> &str;

    /// The namespace this transformer's provider is bound to.
    fn namespace(&self) -> &str;

    /// Whether this transformer can handle `envelope`, by tuple equality
    /// only.
    fn is_applicable(&self, envelope: &HandleEnvelope) -> bool {
        envelope.version == ENVELOPE_VERSION
            && envelope.backend_kind == self.backend_kind()
            && envelope.namespace == self.namespace()
            && envelope.serde_transformer_name == self.name()
    }
}

/// Registers transformers scoped by `(backend_kind, namespace,
/// serde_transformer_name)` and resolves a [`HandleEnvelope`] back to the
/// (sole) applicable transformer.
#[derive(Default)]
pub struct SerdeRegistry {
    transformers: DashMap<(String, String, String), Arc<dyn SerdeTransformer>>,
}

impl SerdeRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transformers: DashMap::new(),
        }
    }

    /// Registers a transformer under its own `(backend_kind, namespace,
    /// name)` tuple. Registration is explicit, never discovered via global
    /// state.
    pub fn register(&self, transformer: Arc<dyn SerdeTransformer>) {
        let key = (
            transformer.backend_kind().to_string(),
            transformer.namespace().to_string(),
            transformer.name().to_string(),
        );
        self.transformers.insert(key, transformer);
    }

    /// Finds the transformer applicable to `envelope`, if any is registered.
    #[must_use]
    pub fn resolve(&self, envelope: &HandleEnvelope) -> Option<Arc<dyn SerdeTransformer>> {
        let key = (
            envelope.backend_kind.clone(),
            envelope.namespace.clone(),
            envelope.serde_transformer_name.clone(),
        );
        self.transformers
            .get(&key)
            .filter(|t| t.is_applicable(envelope))
            .map(|t| Arc::clone(t.value()))
    }

    /// Serializes an envelope to its JSON wire form.
    ///
    /// # Errors
    /// Returns an error if JSON encoding fails (never expected for this
    /// shape, but `serde_json::Error` is propagated rather than unwrapped).
    pub fn serialize(envelope: &HandleEnvelope) -> Result<String, serde_json::Error> {
        serde_json::to_string(envelope)
    }

    /// Parses a JSON wire form back into a [`HandleEnvelope`], rejecting
    /// unknown versions before the caller even attempts to resolve a
    /// transformer.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or its `version` field is
    /// not [`ENVELOPE_VERSION`].
    pub fn deserialize(blob: &str) -> Result<HandleEnvelope, anyhow::Error> {
        let envelope: HandleEnvelope = serde_json::from_str(blob)?;
        if envelope.version != ENVELOPE_VERSION {
            anyhow::bail!(
                "unsupported envelope version {:?}, expected {ENVELOPE_VERSION:?}",
                envelope.version
            );
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTransformer {
        name: String,
        backend_kind: String,
        namespace: String,
    }

    impl SerdeTransformer for StubTransformer {
        fn name(&self) -> &str {
            &self.name
        }

        fn backend_kind(&self) -> &str {
            &self.backend_kind
        }

        fn namespace(&self) -> &str {
            &self.namespace
        }
    }

    fn envelope(backend_kind: &str, namespace: &str) -> HandleEnvelope {
        HandleEnvelope {
            version: ENVELOPE_VERSION.to_string(),
            backend_kind: backend_kind.to_string(),
            namespace: namespace.to_string(),
            serde_transformer_name: "lock".to_string(),
            key: "order-42".to_string(),
            owner_or_slot_id: "owner-a".to_string(),
            limit: None,
            ttl_ms: Some(5_000),
        }
    }

    #[test]
    fn resolves_matching_transformer_only() {
        let registry = SerdeRegistry::new();
        registry.register(Arc::new(StubTransformer {
            name: "lock".to_string(),
            backend_kind: "memory".to_string(),
            namespace: "@lock".to_string(),
        }));

        let matching = envelope("memory", "@lock");
        assert!(registry.resolve(&matching).is_some());

        let mismatched_backend = envelope("postgres", "@lock");
        assert!(registry.resolve(&mismatched_backend).is_none());

        let mismatched_namespace = envelope("memory", "@other");
        assert!(registry.resolve(&mismatched_namespace).is_none());
    }

    #[test]
    fn json_round_trip_preserves_identity() {
        let original = envelope("memory", "@lock");
        let blob = SerdeRegistry::serialize(&original).unwrap();
        let decoded = SerdeRegistry::deserialize(&blob).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let blob = r#"{"version":"2","backend_kind":"memory","namespace":"@lock","serde_transformer_name":"lock","key":"k","owner_or_slot_id":"o"}"#;
        let result = SerdeRegistry::deserialize(blob);
        assert!(result.is_err());
    }

    #[test]
    fn same_identity_ignores_ttl_and_limit() {
        let mut a = envelope("memory", "@lock");
        let mut b = a.clone();
        a.ttl_ms = Some(1_000);
        b.ttl_ms = Some(2_000);
        assert!(a.same_identity(&b));

        b.key = "different-key".to_string();
        assert!(!a.same_identity(&b));
    }
}
