//! For some reason, the mongodb crate doesn't provide error code constants.
//! This module fills in the gaps.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure};

pub const DUPLICATE_KEY: i32 = 11000;

/// Return true if the given error is a duplicate key write error.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    if let ErrorKind::Write(WriteFailure::WriteError(ref e)) = *err.kind {
        return e.code == DUPLICATE_KEY;
    }
    false
}

/// Return true if the server flagged the error as a transaction conflict
/// that could succeed on resubmission.
pub fn is_transient_transaction_error(err: &DbError) -> bool {
    err.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR)
}
