//! Backend-agnostic leaf utilities shared by every coordination primitive in
//! `coordix-runtime`: time-to-live values, namespace/key prefixing, the
//! shared error taxonomy, backoff policies, the retry/`Task` engine, the
//! cross-process handle SerDe registry, and the generic event-bus contract.
//!
//! Nothing in this crate talks to a backend; it is pure logic reusable
//! regardless of whether the eventual adapter is in-memory, Redis, or SQL.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod error;
pub mod events;
pub mod namespace;
pub mod retry;
pub mod serde_registry;
pub mod time;

pub use backoff::BackoffPolicy;
pub use error::CoordError;
pub use events::{EventBus, ListenerFn, NamedEvent, RejectionSink, Unsubscribe};
pub use namespace::{KeyPrefixer, Namespace};
pub use retry::{retry, RetryConfig, RetryPolicy, Task};
pub use serde_registry::{HandleEnvelope, SerdeRegistry, SerdeTransformer, ENVELOPE_VERSION};
pub use time::TimeSpan;

#[cfg(test)]
mod tests {
    /// Smoke test: the crate's public surface loads and its modules are
    /// wired together (mirrors the teacher's `crate_loads` test in
    /// `packages/server-rust/src/lib.rs`).
    #[test]
    fn crate_loads() {
        let ns = crate::Namespace::new("@smoke");
        let prefixer = crate::KeyPrefixer::new(ns);
        assert_eq!(prefixer.prefixed_key("k"), "@smoke/k");
    }
}
