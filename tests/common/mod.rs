// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use flashcore::application::{LedgerConfig, LedgerService};
use flashcore::storage::{
    Backend, KeyValueStore, MemoryBackend, RetryPolicy, StoreError, StoreResult, Updater,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Retry policy with millisecond backoff so failure tests stay fast
pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

pub fn test_config() -> LedgerConfig {
    LedgerConfig::default().with_retry(quick_retry(3))
}

/// Helper to create a service over process memory
pub fn memory_service() -> LedgerService {
    LedgerService::in_memory(test_config())
}

/// Helper to create a test service with a temporary database
pub async fn sqlite_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap(), test_config()).await?;
    Ok((service, temp_dir))
}

/// A service with no namespace over a backend whose failures the test controls.
/// Profile keys are plain `<user>_<guild>`.
pub fn flaky_service() -> (LedgerService, Arc<FlakyBackend>) {
    let flaky = Arc::new(FlakyBackend::default());
    let backend: Arc<dyn Backend> = flaky.clone();
    let service = LedgerService::new(
        KeyValueStore::from_arc(backend),
        test_config().with_namespace(None),
    );
    (service, flaky)
}

#[derive(Debug, Default, Clone, Copy)]
struct FailurePlan {
    /// Updates that go through before failures start
    skip: u32,
    /// Updates that fail once skipping is over
    fail: u32,
}

/// Memory backend that reports `Unavailable` for scheduled updates.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    plans: Mutex<HashMap<String, FailurePlan>>,
    /// Key deleted whenever an injected failure hits the map key
    victims: Mutex<HashMap<String, String>>,
    delays: Mutex<HashMap<String, Duration>>,
    failed: Mutex<u32>,
}

impl FlakyBackend {
    /// Fail the next `times` updates of `key`.
    pub fn fail_updates(&self, key: &str, times: u32) {
        self.fail_updates_after(key, 0, times);
    }

    /// Let `skip` updates of `key` through, then fail the following `times`.
    pub fn fail_updates_after(&self, key: &str, skip: u32, times: u32) {
        self.plans.lock().unwrap().insert(
            key.to_string(),
            FailurePlan {
                skip,
                fail: times,
            },
        );
    }

    /// Each injected failure on `key` also deletes `victim`, as if another
    /// client removed that profile while `key` was unreachable.
    pub fn delete_on_failure(&self, key: &str, victim: &str) {
        self.victims
            .lock()
            .unwrap()
            .insert(key.to_string(), victim.to_string());
    }

    /// Hold every update of `key` for `delay` before it runs.
    pub fn delay_updates(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn failures_injected(&self) -> u32 {
        *self.failed.lock().unwrap()
    }

    fn should_fail(&self, key: &str) -> bool {
        let mut plans = self.plans.lock().unwrap();
        let Some(plan) = plans.get_mut(key) else {
            return false;
        };
        if plan.skip > 0 {
            plan.skip -= 1;
            return false;
        }
        if plan.fail > 0 {
            plan.fail -= 1;
            *self.failed.lock().unwrap() += 1;
            return true;
        }
        false
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(key, value).await
    }

    async fn update(&self, key: &str, updater: &mut Updater<'_>) -> StoreResult<()> {
        let delay = self.delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail(key) {
            let victim = self.victims.lock().unwrap().get(key).cloned();
            if let Some(victim) = victim {
                self.inner.delete(&victim).await?;
            }
            return Err(StoreError::Unavailable(format!("injected failure on {}", key)));
        }
        self.inner.update(key, updater).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }
}
