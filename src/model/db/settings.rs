use chrono::{DateTime, Duration, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

/// Days from a reset until voting closes.
pub const DEFAULT_VOTING_DAYS: i64 = 7;
/// Days from a reset until the campaign as a whole ends.
pub const DEFAULT_CAMPAIGN_DAYS: i64 = 14;

/// When voting closes and when the cleanup campaign ends.
///
/// Stored as the single document of the settings collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignDates {
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voting_end: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub campaign_end: DateTime<Utc>,
}

impl CampaignDates {
    /// The dates a campaign (re)started at `now` runs to.
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            voting_end: now + Duration::days(DEFAULT_VOTING_DAYS),
            campaign_end: now + Duration::days(DEFAULT_CAMPAIGN_DAYS),
        }
    }

    /// Voting may not already be over, and the campaign must outlast it.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.voting_end >= now && self.campaign_end > self.voting_end
    }

    /// Is voting still open at `at`?
    pub fn voting_open(&self, at: DateTime<Utc>) -> bool {
        at <= self.voting_end
    }
}
