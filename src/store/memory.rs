use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex,
};
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{self, oid::ObjectId, Bson, Document};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Record, Store, StoreError, StoreResult, Transaction};
use crate::model::mongodb::Id;

type Collections = HashMap<&'static str, Vec<Document>>;

/// An in-process store.
///
/// Transactions are serialised: each one holds the store lock from `begin`
/// until it is committed or dropped, working on a private copy of the data.
/// Supports fault injection for exercising failure paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<Collections>>,
    faults: Arc<Faults>,
}

#[derive(Default)]
struct Faults {
    down: AtomicBool,
    /// Operations allowed to succeed before every further one fails.
    ops_before_failure: StdMutex<Option<usize>>,
    latency: StdMutex<Option<Duration>>,
}

impl Faults {
    fn check_up(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn take_op(&self) -> StoreResult<()> {
        self.check_up()?;
        let mut remaining = self
            .ops_before_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match remaining.as_mut() {
            Some(0) => Err(StoreError::Unavailable),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn latency(&self) -> Option<Duration> {
        *self
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (`true`) or reachable again.
    pub fn set_unavailable(&self, down: bool) {
        self.faults.down.store(down, Ordering::SeqCst);
    }

    /// Let the next `ops` operations succeed, then fail every further one
    /// until [`MemoryStore::recover`] is called.
    pub fn fail_after(&self, ops: usize) {
        *self
            .faults
            .ops_before_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(ops);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self
            .faults
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(latency);
    }

    /// Clear all injected faults.
    pub fn recover(&self) {
        self.set_unavailable(false);
        *self
            .faults
            .ops_before_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        *self
            .faults
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// A snapshot of the committed documents in the named collection.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Txn = MemoryTransaction;

    async fn begin(&self) -> StoreResult<MemoryTransaction> {
        self.faults.check_up()?;
        let committed = self.collections.clone().lock_owned().await;
        let working = committed.clone();
        Ok(MemoryTransaction {
            committed,
            working,
            faults: self.faults.clone(),
        })
    }
}

/// A transaction on a [`MemoryStore`].
pub struct MemoryTransaction {
    committed: OwnedMutexGuard<Collections>,
    working: Collections,
    faults: Arc<Faults>,
}

impl MemoryTransaction {
    async fn step(&self) -> StoreResult<()> {
        if let Some(latency) = self.faults.latency() {
            tokio::time::sleep(latency).await;
        }
        self.faults.take_op()
    }

    fn docs(&self, collection: &str) -> &[Document] {
        self.working
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn docs_mut(&mut self, collection: &'static str) -> &mut Vec<Document> {
        self.working.entry(collection).or_default()
    }
}

/// Does `doc` have every field-value pair in `filter`?
fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, value)| doc.get(key) == Some(value))
}

/// Numeric addition with MongoDB's `$inc` type promotion rules.
fn add(current: Option<&Bson>, field: &str, delta: i64) -> StoreResult<Bson> {
    match current {
        None => Ok(Bson::Int64(delta)),
        Some(Bson::Int32(v)) => Ok(Bson::Int64(i64::from(*v) + delta)),
        Some(Bson::Int64(v)) => Ok(Bson::Int64(v + delta)),
        Some(Bson::Double(v)) => Ok(Bson::Double(v + delta as f64)),
        Some(_) => Err(StoreError::NonNumericField(field.to_string())),
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn find<T: Record>(&mut self, filter: Document) -> StoreResult<Option<T>> {
        self.step().await?;
        self.docs(T::NAME)
            .iter()
            .find(|doc| matches(doc, &filter))
            .map(|doc| bson::from_document(doc.clone()))
            .transpose()
            .map_err(Into::into)
    }

    async fn find_all<T: Record>(&mut self, filter: Document) -> StoreResult<Vec<T>> {
        self.step().await?;
        self.docs(T::NAME)
            .iter()
            .filter(|doc| matches(doc, &filter))
            .map(|doc| bson::from_document(doc.clone()).map_err(Into::into))
            .collect()
    }

    async fn insert<T: Record>(&mut self, record: &T) -> StoreResult<Id> {
        self.step().await?;
        let mut doc = bson::to_document(record)?;
        let id = match doc.get("_id") {
            Some(Bson::ObjectId(oid)) => *oid,
            Some(_) => return Err(StoreError::MissingId(T::NAME)),
            None => {
                let oid = ObjectId::new();
                doc.insert("_id", oid);
                oid
            }
        };

        // Emulate the unique indexes.
        let docs = self.docs_mut(T::NAME);
        let clashes = |existing: &Document| {
            existing.get("_id") == doc.get("_id")
                || T::UNIQUE
                    .iter()
                    .any(|field| doc.get(*field).is_some() && existing.get(*field) == doc.get(*field))
        };
        if docs.iter().any(clashes) {
            return Err(StoreError::DuplicateKey(T::NAME));
        }

        docs.push(doc);
        Ok(id.into())
    }

    async fn update<T: Record>(&mut self, filter: Document, patch: Document) -> StoreResult<u64> {
        self.step().await?;
        let mut modified = 0;
        for doc in self.docs_mut(T::NAME).iter_mut() {
            if !matches(doc, &filter) {
                continue;
            }
            let mut changed = false;
            for (key, value) in patch.iter() {
                if doc.get(key) != Some(value) {
                    doc.insert(key.clone(), value.clone());
                    changed = true;
                }
            }
            if changed {
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn delete<T: Record>(&mut self, filter: Document) -> StoreResult<u64> {
        self.step().await?;
        let docs = self.docs_mut(T::NAME);
        let before = docs.len();
        docs.retain(|doc| !matches(doc, &filter));
        Ok((before - docs.len()) as u64)
    }

    async fn increment<T: Record>(
        &mut self,
        filter: Document,
        field: &str,
        delta: i64,
    ) -> StoreResult<u64> {
        self.step().await?;
        let mut modified = 0;
        for doc in self.docs_mut(T::NAME).iter_mut() {
            if matches(doc, &filter) {
                let sum = add(doc.get(field), field, delta)?;
                doc.insert(field, sum);
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn commit(self) -> StoreResult<()> {
        let Self {
            mut committed,
            working,
            faults,
        } = self;
        faults.check_up()?;
        *committed = working;
        Ok(())
    }
}
