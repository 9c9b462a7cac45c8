use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient backend failure. Nothing was applied.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record {key} could not be decoded: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What an updater wants done with the record it was shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put(String),
    Remove,
    Keep,
}

/// Synchronous read-modify-write step handed to [`Backend::update`].
/// May be called more than once if the backend has to retry internally;
/// only the result of the last call is applied.
pub type Updater<'a> = dyn FnMut(Option<String>) -> Mutation + Send + 'a;

/// Persistence contract: opaque string keys mapped to opaque string values.
///
/// `update` must apply the updater's result atomically: no other `set`,
/// `update` or `delete` of the same key may land between the read the
/// updater saw and the write.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn update(&self, key: &str, updater: &mut Updater<'_>) -> StoreResult<()>;

    /// Returns whether a record was removed. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<bool>;
}
