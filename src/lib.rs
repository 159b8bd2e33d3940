//! Vote-once-per-voter ballot register for the CleanCity cleanup campaign.
//!
//! Voters pick the one city most in need of a cleanup drive. Each voter has
//! at most one live ballot, and every city's vote counter always equals the
//! number of ballots naming it.

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate register_test;

pub mod campaign;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod register;
pub mod store;

pub use campaign::{Campaign, TallyMismatch};
pub use config::{Config, DbConfig};
pub use error::{Error, Result};
pub use model::common::VoterId;
pub use register::{BallotRegister, VoteOutcome};
