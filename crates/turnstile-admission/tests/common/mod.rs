#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use turnstile_admission::{AdmissionConfig, PermissionGate};
use turnstile_core::StoreError;
use turnstile_core::ports::{CounterStore, KeyTtl, ManualClock};
use turnstile_infra::InMemoryCounterStore;

// 2024-03-10T15:30:00Z
pub const NOW: i64 = 1_710_084_600;
// 2024-03-11T00:00:00Z
pub const MIDNIGHT: i64 = 1_710_115_200;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryCounterStore>,
    pub gate: PermissionGate,
}

impl Harness {
    pub fn new(config: AdmissionConfig) -> Self {
        let clock = Arc::new(ManualClock::at_unix(NOW));
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let gate = PermissionGate::new(store.clone(), clock.clone(), &config);
        Self { clock, store, gate }
    }

    pub fn set_time(&self, unix: i64) {
        self.clock.set(Utc.timestamp_opt(unix, 0).unwrap());
    }
}

/// A store whose every call fails as if the network were down.
pub struct UnreachableStore;

fn refused() -> StoreError {
    StoreError::Connection("connection refused".to_string())
}

#[async_trait]
impl CounterStore for UnreachableStore {
    async fn incr(&self, _key: &str, _delta: i64) -> Result<i64, StoreError> {
        Err(refused())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Err(refused())
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(refused())
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(refused())
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Err(refused())
    }

    async fn keys_matching(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        Err(refused())
    }

    async fn ttl(&self, _key: &str) -> Result<KeyTtl, StoreError> {
        Err(refused())
    }
}

pub fn unreachable_gate(config: AdmissionConfig) -> PermissionGate {
    PermissionGate::new(
        Arc::new(UnreachableStore),
        Arc::new(ManualClock::at_unix(NOW)),
        &config,
    )
}
