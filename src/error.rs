use thiserror::Error;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the ballot register and campaign administration.
///
/// All of these leave the store exactly as it was before the call.
#[derive(Debug, Error)]
pub enum Error {
    #[error("City '{0}' is not on the ballot; choose a valid option")]
    UnknownCandidate(String),
    #[error("City '{0}' already exists")]
    DuplicateCandidate(String),
    #[error("Waste index must be between 0 and 100, got {0}")]
    InvalidWasteIndex(u32),
    #[error("City name must not be empty")]
    InvalidName,
    #[error("Invalid dates. Voting end must be in the future, and campaign end must be after voting end.")]
    InvalidDates,
    #[error("Storage unavailable, please try again: {0}")]
    StorageUnavailable(#[from] StoreError),
}

impl Error {
    /// Can the caller reasonably resubmit the same request?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(Error::StorageUnavailable(StoreError::Timeout).is_retryable());
        assert!(!Error::UnknownCandidate("Atlantis".to_string()).is_retryable());
        assert!(!Error::DuplicateCandidate("Pune".to_string()).is_retryable());
        assert!(!Error::InvalidWasteIndex(101).is_retryable());
        assert!(!Error::InvalidDates.is_retryable());
    }

    #[test]
    fn unknown_candidate_message_asks_for_valid_option() {
        let msg = Error::UnknownCandidate("NoSuchCity".to_string()).to_string();
        assert_eq!(
            msg,
            "City 'NoSuchCity' is not on the ballot; choose a valid option"
        );
    }
}
