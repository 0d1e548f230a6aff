//! Process-local [`CircuitBreakerAdapter`].
//!
//! Grounded on `storage/engines/hashmap.rs`'s `DashMap` table, same shape as
//! [`crate::lock::memory`]; each record sits behind a `parking_lot::Mutex`
//! since `decide_transition` is a synchronous critical section.

use async_trait::async_trait;
use coordix_core::CoordError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;

use super::{decide_transition, BreakerPolicy, BreakerRecord, CircuitBreakerAdapter, StateTransition};

/// A process-local circuit breaker table.
#[derive(Default)]
pub struct MemoryCircuitBreakerAdapter {
    records: DashMap<String, Mutex<BreakerRecord>>,
}

impl MemoryCircuitBreakerAdapter {
    /// An empty breaker table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

#[async_trait]
impl CircuitBreakerAdapter for MemoryCircuitBreakerAdapter {
    fn backend_kind(&self) -> &str {
        "memory"
    }

    async fn update_state(
        &self,
        key: &str,
        policy: &dyn BreakerPolicy,
        cooldown: Duration,
        now: u64,
    ) -> Result<StateTransition, CoordError> {
        let entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(BreakerRecord::initial(policy, now)));
        let mut record = entry.lock();
        Ok(decide_transition(&mut record, policy, cooldown, now))
    }

    async fn track_success(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError> {
        let entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(BreakerRecord::initial(policy, now)));
        let mut record = entry.lock();
        record.metrics = policy.track_success(&record.metrics, now);
        Ok(())
    }

    async fn track_failure(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError> {
        let entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(BreakerRecord::initial(policy, now)));
        let mut record = entry.lock();
        record.metrics = policy.track_failure(&record.metrics, now);
        Ok(())
    }

    async fn reset(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError> {
        self.records
            .insert(key.to_string(), Mutex::new(BreakerRecord::initial(policy, now)));
        Ok(())
    }

    async fn isolate(&self, key: &str, policy: &dyn BreakerPolicy, now: u64) -> Result<(), CoordError> {
        let entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(BreakerRecord::initial(policy, now)));
        let mut record = entry.lock();
        record.state = super::BreakerStateKind::Open;
        record.last_transition_at = now;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<BreakerRecord>, CoordError> {
        Ok(self.records.get(key).map(|entry| entry.lock().clone()))
    }
}
