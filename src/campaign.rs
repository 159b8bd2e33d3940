//! Administration of the cleanup campaign: the candidate cities and the
//! campaign-wide operations on their ballots.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc};
use rand::Rng;

use crate::{
    config::Config,
    error::{Error, Result},
    logging::OpId,
    model::{
        common::{CandidateId, MAX_WASTE_INDEX},
        db::{
            ballot::Ballot,
            candidate::{Candidate, NewCandidate, DEFAULT_CANDIDATES},
            settings::CampaignDates,
        },
    },
    register::find_candidate,
    store::{with_timeout, Store, StoreError, Transaction},
};

/// A disagreement between a stored vote counter and the live ballots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyMismatch {
    /// The candidate's counter differs from its number of ballots.
    Miscounted {
        candidate: CandidateId,
        recorded: i64,
        actual: u32,
    },
    /// Ballots name a candidate that does not exist.
    Orphaned { candidate: CandidateId, ballots: u32 },
}

impl Display for TallyMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Miscounted {
                candidate,
                recorded,
                actual,
            } => write!(
                f,
                "{candidate}: counter says {recorded}, ballots say {actual}"
            ),
            Self::Orphaned { candidate, ballots } => write!(
                f,
                "{candidate}: {ballots} ballot{} for a city that does not exist",
                if *ballots != 1 { "s" } else { "" }
            ),
        }
    }
}

/// Administrative operations on the campaign's candidate cities.
pub struct Campaign<S> {
    store: S,
    op_timeout: Duration,
}

impl<S: Store> Campaign<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            op_timeout: config.op_timeout(),
        }
    }

    /// Override the configured per-operation timeout.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Add a new city with no votes.
    /// Without an explicit waste index, one is picked at random.
    pub async fn add_candidate(&self, name: &str, waste_index: Option<u32>) -> Result<Candidate> {
        let op = OpId::start(format_args!("add_candidate {name}"));
        let result = match validate(name, waste_index) {
            Ok((name, waste_index)) => {
                with_timeout(self.op_timeout, self.insert_candidate(name, waste_index)).await
            }
            Err(err) => Err(err),
        };
        op.finish(&result);
        result
    }

    /// Set the waste index of an existing city.
    pub async fn set_waste_index(&self, name: &str, waste_index: u32) -> Result<()> {
        let op = OpId::start(format_args!("set_waste_index {name} {waste_index}"));
        let result = with_timeout(self.op_timeout, async {
            let waste_index = check_waste_index(waste_index)?;
            let mut txn = self.store.begin().await?;
            find_candidate(&mut txn, name).await?;
            txn.update::<Candidate>(doc! {"name": name}, doc! {"waste_index": i32::from(waste_index)})
                .await?;
            txn.commit().await?;
            Ok::<_, Error>(())
        })
        .await;
        op.finish(&result);
        result
    }

    /// Delete a city together with every ballot cast for it.
    /// Returns the number of ballots removed.
    pub async fn delete_candidate(&self, name: &str) -> Result<u64> {
        let op = OpId::start(format_args!("delete_candidate {name}"));
        let result = with_timeout(self.op_timeout, async {
            let mut txn = self.store.begin().await?;
            find_candidate(&mut txn, name).await?;
            txn.delete::<Candidate>(doc! {"name": name}).await?;
            let ballots = txn.delete::<Ballot>(doc! {"candidate": name}).await?;
            txn.commit().await?;
            Ok::<_, Error>(ballots)
        })
        .await;
        op.finish(&result);
        result
    }

    /// All cities, most votes first.
    pub async fn standings(&self) -> Result<Vec<Candidate>> {
        let op = OpId::start("standings");
        let result = with_timeout(self.op_timeout, async {
            let mut txn = self.store.begin().await?;
            let mut cities = txn.find_all::<Candidate>(doc! {}).await?;
            cities.sort_by(Candidate::standings_order);
            Ok::<_, Error>(cities)
        })
        .await;
        // Only log the size; the full list is noisy.
        op.finish_with(&result, Vec::len);
        result
    }

    /// Zero every counter, delete every ballot and restart the campaign
    /// dates from now. Returns the number of ballots removed.
    pub async fn reset(&self) -> Result<u64> {
        let op = OpId::start("reset");
        let result = with_timeout(self.op_timeout, async {
            let mut txn = self.store.begin().await?;
            txn.update::<Candidate>(doc! {}, doc! {"votes": 0_i64})
                .await?;
            let ballots = txn.delete::<Ballot>(doc! {}).await?;
            write_dates(&mut txn, &CampaignDates::starting_at(Utc::now())).await?;
            txn.commit().await?;
            Ok::<_, Error>(ballots)
        })
        .await;
        op.finish(&result);
        result
    }

    /// When voting closes and the campaign ends.
    /// Until dates are set, they are a week and a fortnight from now.
    pub async fn dates(&self) -> Result<CampaignDates> {
        let op = OpId::start("dates");
        let result = with_timeout(self.op_timeout, async {
            let mut txn = self.store.begin().await?;
            let dates = txn.find::<CampaignDates>(doc! {}).await?;
            Ok::<_, Error>(dates.unwrap_or_else(|| CampaignDates::starting_at(Utc::now())))
        })
        .await;
        op.finish(&result);
        result
    }

    /// Set when voting closes and the campaign ends.
    pub async fn set_dates(
        &self,
        voting_end: DateTime<Utc>,
        campaign_end: DateTime<Utc>,
    ) -> Result<()> {
        let op = OpId::start(format_args!("set_dates {voting_end} {campaign_end}"));
        let dates = CampaignDates {
            voting_end,
            campaign_end,
        };
        let result = if dates.is_valid_at(Utc::now()) {
            with_timeout(self.op_timeout, async {
                let mut txn = self.store.begin().await?;
                write_dates(&mut txn, &dates).await?;
                txn.commit().await?;
                Ok::<_, Error>(())
            })
            .await
        } else {
            Err(Error::InvalidDates)
        };
        op.finish(&result);
        result
    }

    /// Insert the default cities if there are none.
    /// Returns whether anything was inserted.
    pub async fn seed_defaults(&self) -> Result<bool> {
        let op = OpId::start("seed_defaults");
        let result = with_timeout(self.op_timeout, async {
            let mut txn = self.store.begin().await?;
            if txn.find::<Candidate>(doc! {}).await?.is_some() {
                return Ok(false);
            }
            for (name, waste_index) in DEFAULT_CANDIDATES {
                txn.insert(&NewCandidate::new(name, waste_index)).await?;
            }
            txn.commit().await?;
            Ok::<_, Error>(true)
        })
        .await;
        op.finish(&result);
        result
    }

    /// Recount every city's ballots and report any counter that disagrees.
    pub async fn audit(&self) -> Result<Vec<TallyMismatch>> {
        let op = OpId::start("audit");
        let result = with_timeout(self.op_timeout, async {
            let mut txn = self.store.begin().await?;
            let cities = txn.find_all::<Candidate>(doc! {}).await?;
            let ballots = txn.find_all::<Ballot>(doc! {}).await?;

            let mut counts = BTreeMap::<CandidateId, u32>::new();
            for ballot in ballots {
                *counts.entry(ballot.ballot.candidate).or_default() += 1;
            }

            let mut mismatches = Vec::new();
            for city in cities {
                let actual = counts.remove(&city.name).unwrap_or(0);
                if city.votes != i64::from(actual) {
                    mismatches.push(TallyMismatch::Miscounted {
                        candidate: city.candidate.name,
                        recorded: city.candidate.votes,
                        actual,
                    });
                }
            }
            // Whatever is left has no city.
            mismatches.extend(
                counts
                    .into_iter()
                    .map(|(candidate, ballots)| TallyMismatch::Orphaned { candidate, ballots }),
            );
            Ok::<_, Error>(mismatches)
        })
        .await;
        op.finish(&result);
        result
    }

    async fn insert_candidate(&self, name: &str, waste_index: u8) -> Result<Candidate> {
        let mut txn = self.store.begin().await?;
        if txn.find::<Candidate>(doc! {"name": name}).await?.is_some() {
            return Err(Error::DuplicateCandidate(name.to_string()));
        }
        let id = txn
            .insert(&NewCandidate::new(name, waste_index))
            .await
            .map_err(|err| insert_error(name, err))?;
        let candidate = txn
            .find::<Candidate>(id.as_doc())
            .await?
            .ok_or_else(|| Error::UnknownCandidate(name.to_string()))?;
        txn.commit().await?;
        Ok(candidate)
    }
}

/// A unique index clash means another admin added the same city first.
fn insert_error(name: &str, err: StoreError) -> Error {
    match err {
        StoreError::DuplicateKey(_) => Error::DuplicateCandidate(name.to_string()),
        err => err.into(),
    }
}

/// Replace the stored campaign dates, creating the settings record if needed.
async fn write_dates<T: Transaction>(txn: &mut T, dates: &CampaignDates) -> Result<()> {
    if txn.find::<CampaignDates>(doc! {}).await?.is_some() {
        let patch = bson::to_document(dates).map_err(StoreError::from)?;
        txn.update::<CampaignDates>(doc! {}, patch).await?;
    } else {
        txn.insert(dates).await?;
    }
    Ok(())
}

/// Normalise a new city's name and settle its waste index.
fn validate(name: &str, waste_index: Option<u32>) -> Result<(&str, u8)> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidName);
    }
    let waste_index = match waste_index {
        Some(index) => check_waste_index(index)?,
        None => rand::thread_rng().gen_range(30..=95),
    };
    Ok((name, waste_index))
}

fn check_waste_index(waste_index: u32) -> Result<u8> {
    u8::try_from(waste_index)
        .ok()
        .filter(|index| *index <= MAX_WASTE_INDEX)
        .ok_or(Error::InvalidWasteIndex(waste_index))
}
