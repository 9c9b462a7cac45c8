use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

use super::{Backend, KeyLocks, MemoryBackend, Mutation, RetryPolicy, StoreError, StoreResult};

/// Separates a namespace from the key inside it.
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Why a [`KeyValueStore::transact`] call did not commit.
#[derive(Debug)]
pub enum TransactError<E> {
    /// The updater refused the current value. Nothing was written.
    Rejected(E),
    Store(StoreError),
}

impl<E> From<StoreError> for TransactError<E> {
    fn from(err: StoreError) -> Self {
        TransactError::Store(err)
    }
}

/// Typed, namespaced handle over a [`Backend`].
///
/// Values cross the backend boundary as JSON. Mutations of one key are
/// admitted one at a time, in arrival order; transient backend failures are
/// retried according to the handle's [`RetryPolicy`].
///
/// Cloning is cheap and clones share the backend and the admission locks.
#[derive(Clone)]
pub struct KeyValueStore {
    backend: Arc<dyn Backend>,
    locks: Arc<KeyLocks>,
    namespace: Option<String>,
    retry: RetryPolicy,
}

impl KeyValueStore {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            locks: Arc::new(KeyLocks::new()),
            namespace: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A handle whose keys live under `namespace`. Shares backend and locks
    /// with `self`.
    pub fn namespaced(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..self.clone()
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn physical_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}{}{}", ns, NAMESPACE_SEPARATOR, key),
            None => key.to_string(),
        }
    }

    /// Read a value. A missing key is `Ok(None)`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let physical = self.physical_key(key);
        let raw = self
            .retry
            .run("get", || self.backend.get(&physical))
            .await?;

        raw.map(|raw| decode(&physical, &raw)).transpose()
    }

    /// Overwrite a value unconditionally.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let physical = self.physical_key(key);
        let encoded = encode(&physical, value)?;

        let _guard = self.locks.lock(&physical).await;
        self.retry
            .run("set", || self.backend.set(&physical, &encoded))
            .await?;
        debug!(key = %physical, "Record set");
        Ok(())
    }

    /// Atomic read-modify-write of one key.
    ///
    /// `updater` sees the current value (or `None`) and returns the value to
    /// store, `None` to remove the record, or `Err` to reject the change. A
    /// rejection writes nothing and is handed back as
    /// [`TransactError::Rejected`]. The updater may run more than once when
    /// the backend has to retry; only the last run counts.
    ///
    /// Returns the value that was committed.
    pub async fn transact<T, E, F>(
        &self,
        key: &str,
        mut updater: F,
    ) -> Result<Option<T>, TransactError<E>>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Send,
        F: FnMut(Option<T>) -> Result<Option<T>, E> + Send,
    {
        let physical = self.physical_key(key);
        let _guard = self.locks.lock(&physical).await;

        let mut attempt = 1;
        loop {
            let mut rejection: Option<E> = None;
            let mut failure: Option<StoreError> = None;
            let mut committed: Option<T> = None;

            let mut step = |current: Option<String>| -> Mutation {
                rejection = None;
                failure = None;
                committed = None;

                let current = match current.map(|raw| decode::<T>(&physical, &raw)).transpose() {
                    Ok(current) => current,
                    Err(err) => {
                        failure = Some(err);
                        return Mutation::Keep;
                    }
                };

                match updater(current) {
                    Err(reason) => {
                        rejection = Some(reason);
                        Mutation::Keep
                    }
                    Ok(None) => Mutation::Remove,
                    Ok(Some(next)) => match encode(&physical, &next) {
                        Ok(encoded) => {
                            committed = Some(next);
                            Mutation::Put(encoded)
                        }
                        Err(err) => {
                            failure = Some(err);
                            Mutation::Keep
                        }
                    },
                }
            };

            match self.backend.update(&physical, &mut step).await {
                Ok(()) => {
                    if let Some(err) = failure {
                        return Err(TransactError::Store(err));
                    }
                    if let Some(reason) = rejection {
                        debug!(key = %physical, "Update rejected");
                        return Err(TransactError::Rejected(reason));
                    }
                    debug!(key = %physical, attempt, "Update committed");
                    return Ok(committed);
                }
                Err(err) => {
                    if self.retry.should_retry("transact", attempt, &err).await {
                        attempt += 1;
                        continue;
                    }
                    return Err(TransactError::Store(self.retry.give_up(err, attempt)));
                }
            }
        }
    }

    /// Remove a key. Returns whether a record existed; removing a missing
    /// key is not an error.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let physical = self.physical_key(key);
        let _guard = self.locks.lock(&physical).await;
        let existed = self
            .retry
            .run("delete", || self.backend.delete(&physical))
            .await?;
        debug!(key = %physical, existed, "Record deleted");
        Ok(existed)
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}
