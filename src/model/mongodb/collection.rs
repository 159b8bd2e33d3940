use std::ops::Deref;

use mongodb::{
    bson::{doc, Document},
    error::Error as DbError,
    options::IndexOptions,
    Collection, Database, IndexModel,
};

use crate::model::db::{
    ballot::{Ballot, NewBallot},
    candidate::{Candidate, NewCandidate},
    settings::CampaignDates,
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
    /// Fields whose values must be unique across the collection.
    const UNIQUE: &'static [&'static str] = &[];
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Candidate collections
const CITIES: &str = "cities";
impl MongoCollection for Candidate {
    const NAME: &'static str = CITIES;
    const UNIQUE: &'static [&'static str] = &["name"];
}
impl MongoCollection for NewCandidate {
    const NAME: &'static str = CITIES;
    const UNIQUE: &'static [&'static str] = &["name"];
}

// Ballot collections
const BALLOTS: &str = "ballots";
impl MongoCollection for Ballot {
    const NAME: &'static str = BALLOTS;
    const UNIQUE: &'static [&'static str] = &["voter_key"];
}
impl MongoCollection for NewBallot {
    const NAME: &'static str = BALLOTS;
    const UNIQUE: &'static [&'static str] = &["voter_key"];
}

// Settings collection
impl MongoCollection for CampaignDates {
    const NAME: &'static str = "app_settings";
}

/// Create a unique index on each of the collection's unique fields.
async fn ensure_unique_indexes<T: MongoCollection>(db: &Database) -> Result<(), DbError> {
    let unique = IndexOptions::builder().unique(true).build();
    for field in T::UNIQUE {
        let mut keys = Document::new();
        keys.insert(*field, 1);
        let index = IndexModel::builder()
            .keys(keys)
            .options(unique.clone())
            .build();
        Coll::<T>::from_db(db).create_index(index, None).await?;
    }
    Ok(())
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    ensure_unique_indexes::<Candidate>(db).await?;
    ensure_unique_indexes::<Ballot>(db).await?;

    // Cascading deletes and audits look ballots up by candidate.
    let by_candidate = IndexModel::builder().keys(doc! {"candidate": 1}).build();
    Coll::<Ballot>::from_db(db)
        .create_index(by_candidate, None)
        .await?;

    Ok(())
}
