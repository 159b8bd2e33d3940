//! Records as they are stored: one per city on the ballot, one per voter
//! who has voted, and the campaign settings. IDs and datetimes use MongoDB's
//! own representation.

pub mod ballot;
pub mod candidate;
pub mod settings;
