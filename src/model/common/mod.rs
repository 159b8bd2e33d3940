mod voter;

pub use voter::{VoterId, VoterKey};

/// Candidate IDs are city names.
pub type CandidateId = String;

/// Waste indexes are severity scores out of this maximum.
pub const MAX_WASTE_INDEX: u8 = 100;
