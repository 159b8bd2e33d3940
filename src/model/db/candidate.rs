use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::{common::CandidateId, mongodb::Id};

/// Core candidate city data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    /// Unique city name.
    pub name: CandidateId,
    /// How badly the city needs a cleanup, out of 100.
    pub waste_index: u8,
    /// Number of live ballots for this city.
    ///
    /// Signed so that a drifted counter still loads and can be audited.
    pub votes: i64,
}

impl CandidateCore {
    /// A new candidate with no votes.
    pub fn new(name: impl Into<CandidateId>, waste_index: u8) -> Self {
        Self {
            name: name.into(),
            waste_index,
            votes: 0,
        }
    }

    /// The counter as a tally, with a drifted negative counter read as zero.
    pub fn tally(&self) -> u32 {
        u32::try_from(self.votes.max(0)).unwrap_or(u32::MAX)
    }
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Candidate {
    /// Campaign standings order: most votes first, ties broken by name.
    pub fn standings_order(a: &Self, b: &Self) -> Ordering {
        b.votes.cmp(&a.votes).then_with(|| a.name.cmp(&b.name))
    }
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}

/// The cities a fresh campaign starts with, and their waste indexes.
pub const DEFAULT_CANDIDATES: [(&str, u8); 8] = [
    ("Bangalore", 85),
    ("Mumbai", 78),
    ("Chennai", 72),
    ("Delhi", 90),
    ("Kolkata", 82),
    ("Hyderabad", 75),
    ("Pune", 70),
    ("Ahmedabad", 80),
];
