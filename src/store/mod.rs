//! A transactional document store.
//!
//! Every register and campaign operation runs inside exactly one
//! [`Transaction`]. Changes become visible on [`Transaction::commit`];
//! dropping a transaction without committing discards them.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::Document;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::model::mongodb::{Id, MongoCollection};

mod memory;
mod mongo;

pub use memory::{MemoryStore, MemoryTransaction};
pub use mongo::{MongoStore, MongoTransaction};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error(transparent)]
    Serialize(#[from] mongodb::bson::ser::Error),
    #[error(transparent)]
    Deserialize(#[from] mongodb::bson::de::Error),
    #[error("Duplicate key in collection '{0}'")]
    DuplicateKey(&'static str),
    #[error("Cannot increment non-numeric field '{0}'")]
    NonNumericField(String),
    #[error("Inserted document in collection '{0}' has no ObjectId")]
    MissingId(&'static str),
    #[error("Store is unreachable")]
    Unavailable,
    #[error("Store operation timed out")]
    Timeout,
}

/// A record type that a store can hold.
pub trait Record: MongoCollection + Serialize + DeserializeOwned + Unpin + Send + Sync {}

impl<T> Record for T where T: MongoCollection + Serialize + DeserializeOwned + Unpin + Send + Sync {}

/// A handle on a shared store, cheap to clone.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Txn: Transaction;

    /// Start a new transaction.
    async fn begin(&self) -> StoreResult<Self::Txn>;
}

/// A unit of work against the store.
///
/// Filters match documents whose top-level fields equal every field of the
/// filter; an empty filter matches everything. Patches assign top-level fields.
#[async_trait]
pub trait Transaction: Send + Sized {
    /// Find the first record matching `filter`.
    async fn find<T: Record>(&mut self, filter: Document) -> StoreResult<Option<T>>;

    /// Find all records matching `filter`.
    async fn find_all<T: Record>(&mut self, filter: Document) -> StoreResult<Vec<T>>;

    /// Insert a record, returning its ID.
    async fn insert<T: Record>(&mut self, record: &T) -> StoreResult<Id>;

    /// Assign the fields of `patch` on every matching record.
    /// Returns the number of records actually modified.
    async fn update<T: Record>(&mut self, filter: Document, patch: Document) -> StoreResult<u64>;

    /// Delete every matching record, returning the number deleted.
    async fn delete<T: Record>(&mut self, filter: Document) -> StoreResult<u64>;

    /// Add `delta` to a numeric field of every matching record.
    /// Returns the number of records modified.
    async fn increment<T: Record>(
        &mut self,
        filter: Document,
        field: &str,
        delta: i64,
    ) -> StoreResult<u64>;

    /// Atomically apply every change made in this transaction.
    async fn commit(self) -> StoreResult<()>;
}

/// Run `fut`, failing with [`StoreError::Timeout`] if it takes longer than `limit`.
///
/// The future is dropped on timeout, taking any open transaction with it.
pub async fn with_timeout<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout.into()),
    }
}
