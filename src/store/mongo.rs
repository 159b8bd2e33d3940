use async_trait::async_trait;
use mongodb::{
    bson::{doc, Document},
    error::Error as DbError,
    Client, ClientSession, Database,
};

use super::{Record, Store, StoreError, StoreResult, Transaction};
use crate::model::mongodb::{
    ensure_indexes_exist, is_duplicate_key_error, is_transient_transaction_error, Coll, Id,
};

/// A store backed by a MongoDB deployment.
///
/// Transactions need a replica set or sharded cluster.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Wrap an existing client, using the named database.
    pub fn new(client: Client, db_name: &str) -> Self {
        let db = client.database(db_name);
        Self { client, db }
    }

    /// Connect to the deployment at `uri` and ensure the required indexes exist.
    pub async fn connect(uri: &str, db_name: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let store = Self::new(client, db_name);
        ensure_indexes_exist(&store.db).await?;
        Ok(store)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Store for MongoStore {
    type Txn = MongoTransaction;

    async fn begin(&self) -> StoreResult<MongoTransaction> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(MongoTransaction {
            db: self.db.clone(),
            session,
        })
    }
}

/// A multi-document transaction in a MongoDB client session.
///
/// Dropping the session while the transaction is in progress aborts it.
pub struct MongoTransaction {
    db: Database,
    session: ClientSession,
}

/// Translate driver errors, singling out the ones racing writers cause.
fn write_error(collection: &'static str, err: DbError) -> StoreError {
    if is_duplicate_key_error(&err) {
        warn!("Concurrent insert rejected by unique index on '{collection}'");
        StoreError::DuplicateKey(collection)
    } else {
        if is_transient_transaction_error(&err) {
            warn!("Write conflict on '{collection}': {err}");
        }
        StoreError::Db(err)
    }
}

#[async_trait]
impl Transaction for MongoTransaction {
    async fn find<T: Record>(&mut self, filter: Document) -> StoreResult<Option<T>> {
        let record = Coll::<T>::from_db(&self.db)
            .find_one_with_session(filter, None, &mut self.session)
            .await?;
        Ok(record)
    }

    async fn find_all<T: Record>(&mut self, filter: Document) -> StoreResult<Vec<T>> {
        let mut cursor = Coll::<T>::from_db(&self.db)
            .find_with_session(filter, None, &mut self.session)
            .await?;
        let mut records = Vec::new();
        while let Some(record) = cursor.next(&mut self.session).await {
            records.push(record?);
        }
        Ok(records)
    }

    async fn insert<T: Record>(&mut self, record: &T) -> StoreResult<Id> {
        let result = Coll::<T>::from_db(&self.db)
            .insert_one_with_session(record, None, &mut self.session)
            .await
            .map_err(|e| write_error(T::NAME, e))?;
        result
            .inserted_id
            .as_object_id()
            .map(Id::from)
            .ok_or(StoreError::MissingId(T::NAME))
    }

    async fn update<T: Record>(&mut self, filter: Document, patch: Document) -> StoreResult<u64> {
        let update = doc! {
            "$set": patch,
        };
        let result = Coll::<T>::from_db(&self.db)
            .update_many_with_session(filter, update, None, &mut self.session)
            .await
            .map_err(|e| write_error(T::NAME, e))?;
        Ok(result.modified_count)
    }

    async fn delete<T: Record>(&mut self, filter: Document) -> StoreResult<u64> {
        let result = Coll::<T>::from_db(&self.db)
            .delete_many_with_session(filter, None, &mut self.session)
            .await
            .map_err(|e| write_error(T::NAME, e))?;
        Ok(result.deleted_count)
    }

    async fn increment<T: Record>(
        &mut self,
        filter: Document,
        field: &str,
        delta: i64,
    ) -> StoreResult<u64> {
        let update = doc! {
            "$inc": { field: delta },
        };
        let result = Coll::<T>::from_db(&self.db)
            .update_many_with_session(filter, update, None, &mut self.session)
            .await
            .map_err(|e| write_error(T::NAME, e))?;
        Ok(result.modified_count)
    }

    async fn commit(mut self) -> StoreResult<()> {
        self.session.commit_transaction().await?;
        Ok(())
    }
}

/// Test support: a store on a fresh, randomly named database.
#[cfg(test)]
impl MongoStore {
    /// Environment variable holding the URI of the test deployment.
    pub const TEST_URI_VAR: &'static str = "CLEANCITY_TEST_DB_URI";

    /// Connect to the test deployment. Use a random database name to avoid
    /// collisions between tests.
    pub async fn test_instance() -> Self {
        let uri = std::env::var(Self::TEST_URI_VAR)
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());
        let random: u32 = rand::random();
        let db = format!("test{random}");
        info!("Using database {db}");
        Self::connect(&uri, &db)
            .await
            .expect("test database should be reachable")
    }
}
