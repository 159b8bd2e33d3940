//! Data model for the ballot register.
//!
//! - [`common`] holds types shared by every layer, e.g. voter identities.
//! - [`db`] holds the records as they are stored.
//! - [`mongodb`] holds MongoDB plumbing: IDs, typed collections and indexes.

pub mod common;
pub mod db;
pub mod mongodb;
