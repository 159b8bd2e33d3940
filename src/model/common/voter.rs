use std::fmt::{Display, Formatter};

use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub type HmacSha256 = Hmac<Sha256>;

/// An opaque, stable voter identity, as supplied by the enclosing
/// application's session or account layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoterId(String);

impl VoterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for VoterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for VoterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Display for VoterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The key a ballot is stored under: the hex-encoded HMAC of the voter identity.
///
/// Do not directly store potentially sensitive session or account data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterKey(String);

impl VoterKey {
    /// Derive the stored key for `voter` under the given secret.
    pub fn derive(voter: &VoterId, secret: &[u8]) -> Self {
        let mut hmac =
            HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
        hmac.update(voter.as_str().as_bytes());
        Self(HEXLOWER.encode(&hmac.finalize().into_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VoterKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_per_voter_and_secret() {
        let voter = VoterId::from("u1");
        let key = VoterKey::derive(&voter, b"secret");
        assert_eq!(key, VoterKey::derive(&voter, b"secret"));
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_hides_voter_identity() {
        let voter = VoterId::from("alice@example.com");
        let key = VoterKey::derive(&voter, b"secret");
        assert!(!key.as_str().contains("alice"));
        assert_ne!(key, VoterKey::derive(&VoterId::from("bob"), b"secret"));
        assert_ne!(key, VoterKey::derive(&voter, b"other secret"));
    }
}
