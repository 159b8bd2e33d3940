//! The ballot register: at most one live ballot per voter, with per-city
//! vote counters kept equal to the number of ballots naming each city.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use chrono::Utc;
use mongodb::bson::{doc, DateTime};

use crate::{
    config::Config,
    error::{Error, Result},
    logging::OpId,
    model::{
        common::{CandidateId, VoterId, VoterKey},
        db::{
            ballot::{Ballot, NewBallot},
            candidate::Candidate,
        },
    },
    store::{with_timeout, Store, Transaction},
};

/// The result of a successful [`BallotRegister::cast_vote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First vote by this voter.
    Recorded,
    /// The voter already voted for this candidate; nothing changed.
    Unchanged,
    /// The voter's ballot moved from another candidate to this one.
    Changed,
}

impl Display for VoteOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::Recorded => "Vote recorded successfully!",
            Self::Unchanged => "You have already voted for this city",
            Self::Changed => "Vote changed successfully!",
        };
        write!(f, "{msg}")
    }
}

/// Records votes in a shared store.
pub struct BallotRegister<S> {
    store: S,
    voter_secret: Vec<u8>,
    op_timeout: Duration,
}

impl<S: Store> BallotRegister<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            voter_secret: config.voter_secret().to_vec(),
            op_timeout: config.op_timeout(),
        }
    }

    /// Override the configured per-operation timeout.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The key this voter's ballot is stored under.
    pub fn voter_key(&self, voter: &VoterId) -> VoterKey {
        VoterKey::derive(voter, &self.voter_secret)
    }

    /// Vote for `candidate`, replacing any earlier vote by the same voter.
    ///
    /// The ballot and both affected counters change together or not at all.
    pub async fn cast_vote(&self, voter: &VoterId, candidate: &str) -> Result<VoteOutcome> {
        let op = OpId::start(format_args!("cast_vote {candidate}"));
        let key = self.voter_key(voter);
        let result = with_timeout(self.op_timeout, self.record_vote(key, candidate)).await;
        op.finish(&result);
        result
    }

    /// The number of live ballots for `candidate`.
    pub async fn tally(&self, candidate: &str) -> Result<u32> {
        let op = OpId::start(format_args!("tally {candidate}"));
        let result = with_timeout(self.op_timeout, async {
            let mut txn = self.store.begin().await?;
            let city = find_candidate(&mut txn, candidate).await?;
            Ok::<_, Error>(city.tally())
        })
        .await;
        op.finish(&result);
        result
    }

    /// The candidate the voter currently has a live ballot for, if any.
    pub async fn current_choice(&self, voter: &VoterId) -> Result<Option<CandidateId>> {
        let op = OpId::start("current_choice");
        let key = self.voter_key(voter);
        let result = with_timeout(self.op_timeout, async {
            let mut txn = self.store.begin().await?;
            let ballot = txn
                .find::<Ballot>(doc! {"voter_key": key.as_str()})
                .await?;
            Ok::<_, Error>(ballot.map(|b| b.ballot.candidate))
        })
        .await;
        op.finish(&result);
        result
    }

    async fn record_vote(&self, key: VoterKey, candidate: &str) -> Result<VoteOutcome> {
        let mut txn = self.store.begin().await?;

        // Ensure the candidate exists.
        find_candidate(&mut txn, candidate).await?;

        let existing = txn
            .find::<Ballot>(doc! {"voter_key": key.as_str()})
            .await?;
        let outcome = match existing {
            None => {
                txn.insert(&NewBallot::new(key, candidate)).await?;
                count_vote(&mut txn, candidate).await?;
                VoteOutcome::Recorded
            }
            Some(ballot) if ballot.candidate == candidate => {
                // Nothing to write; dropping the transaction releases it.
                return Ok(VoteOutcome::Unchanged);
            }
            Some(ballot) => {
                let old = ballot.candidate.as_str();
                match txn.find::<Candidate>(doc! {"name": old}).await? {
                    Some(city) if city.votes > 0 => {
                        txn.increment::<Candidate>(doc! {"name": old}, "votes", -1)
                            .await?;
                    }
                    Some(city) => warn!(
                        "Ballot {} is for '{old}', whose counter is already {}",
                        ballot.id, city.votes
                    ),
                    None => warn!("Ballot {} referenced missing city '{old}'", ballot.id),
                }
                let update = doc! {
                    "candidate": candidate,
                    "cast_at": DateTime::from_chrono(Utc::now()),
                };
                txn.update::<Ballot>(ballot.id.as_doc(), update).await?;
                count_vote(&mut txn, candidate).await?;
                VoteOutcome::Changed
            }
        };

        txn.commit().await?;
        Ok(outcome)
    }
}

/// Add one vote to a candidate's counter.
async fn count_vote<T: Transaction>(txn: &mut T, name: &str) -> Result<()> {
    let modified = txn
        .increment::<Candidate>(doc! {"name": name}, "votes", 1)
        .await?;
    require_counted(modified, name)
}

/// A ballot may only be committed if its candidate's counter moved with it.
fn require_counted(modified: u64, name: &str) -> Result<()> {
    if modified == 0 {
        warn!("No counter for city '{name}', abandoning vote");
        return Err(Error::UnknownCandidate(name.to_string()));
    }
    Ok(())
}

/// Look up a candidate by name within a transaction.
pub(crate) async fn find_candidate<T: Transaction>(txn: &mut T, name: &str) -> Result<Candidate> {
    txn.find::<Candidate>(doc! {"name": name})
        .await?
        .ok_or_else(|| Error::UnknownCandidate(name.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    use crate::{campaign::Campaign, store::MemoryStore};

    /// Add cities "A" and "B" with no votes.
    async fn add_a_and_b<S: Store>(campaign: &Campaign<S>) {
        campaign.add_candidate("A", Some(50)).await.unwrap();
        campaign.add_candidate("B", Some(60)).await.unwrap();
    }

    /// Assert that every counter equals its number of ballots.
    async fn assert_consistent<S: Store>(campaign: &Campaign<S>) {
        let mismatches = campaign.audit().await.unwrap();
        assert!(mismatches.is_empty(), "{mismatches:?}");
    }

    #[register_test]
    async fn scenario<S: Store>(register: BallotRegister<S>, campaign: Campaign<S>) {
        add_a_and_b(&campaign).await;
        let u1 = VoterId::from("u1");
        let u2 = VoterId::from("u2");

        assert_eq!(register.cast_vote(&u1, "A").await.unwrap(), VoteOutcome::Recorded);
        assert_eq!(register.tally("A").await.unwrap(), 1);

        assert_eq!(register.cast_vote(&u1, "A").await.unwrap(), VoteOutcome::Unchanged);
        assert_eq!(register.tally("A").await.unwrap(), 1);

        assert_eq!(register.cast_vote(&u1, "B").await.unwrap(), VoteOutcome::Changed);
        assert_eq!(register.tally("A").await.unwrap(), 0);
        assert_eq!(register.tally("B").await.unwrap(), 1);

        assert_eq!(register.cast_vote(&u2, "B").await.unwrap(), VoteOutcome::Recorded);
        assert_eq!(register.tally("B").await.unwrap(), 2);

        assert_consistent(&campaign).await;
    }

    #[register_test]
    async fn repeated_vote_counts_once<S: Store>(
        register: BallotRegister<S>,
        campaign: Campaign<S>,
    ) {
        add_a_and_b(&campaign).await;
        let voter = VoterId::from("repeat");
        let before = register.tally("A").await.unwrap();

        let first = register.cast_vote(&voter, "A").await.unwrap();
        let second = register.cast_vote(&voter, "A").await.unwrap();

        assert_eq!(first, VoteOutcome::Recorded);
        assert_eq!(second, VoteOutcome::Unchanged);
        assert_eq!(register.tally("A").await.unwrap(), before + 1);
    }

    #[register_test]
    async fn vote_change_conserves_total<S: Store>(
        register: BallotRegister<S>,
        campaign: Campaign<S>,
    ) {
        add_a_and_b(&campaign).await;
        let other = VoterId::from("other");
        register.cast_vote(&other, "A").await.unwrap();
        register.cast_vote(&other, "B").await.unwrap();
        register.cast_vote(&VoterId::from("third"), "B").await.unwrap();

        let voter = VoterId::from("switcher");
        let total = |a: u32, b: u32| a + b;
        let before = total(
            register.tally("A").await.unwrap(),
            register.tally("B").await.unwrap(),
        );

        register.cast_vote(&voter, "A").await.unwrap();
        let mid_a = register.tally("A").await.unwrap();
        let mid_b = register.tally("B").await.unwrap();

        assert_eq!(register.cast_vote(&voter, "B").await.unwrap(), VoteOutcome::Changed);
        let after_a = register.tally("A").await.unwrap();
        let after_b = register.tally("B").await.unwrap();

        assert_eq!(after_a, mid_a - 1);
        assert_eq!(after_b, mid_b + 1);
        assert_eq!(total(after_a, after_b), before + 1);
        assert_eq!(
            register.current_choice(&voter).await.unwrap().as_deref(),
            Some("B")
        );
        assert_consistent(&campaign).await;
    }

    #[register_test]
    async fn unknown_candidate_rejected<S: Store>(
        register: BallotRegister<S>,
        campaign: Campaign<S>,
    ) {
        add_a_and_b(&campaign).await;
        let voter = VoterId::from("u1");
        register.cast_vote(&voter, "A").await.unwrap();

        let result = register.cast_vote(&voter, "NoSuchCity").await;
        assert!(matches!(result, Err(Error::UnknownCandidate(ref c)) if c == "NoSuchCity"));

        let fresh = register.cast_vote(&VoterId::from("u2"), "NoSuchCity").await;
        assert!(matches!(fresh, Err(Error::UnknownCandidate(_))));

        assert_eq!(register.tally("A").await.unwrap(), 1);
        assert_eq!(register.tally("B").await.unwrap(), 0);
        assert_eq!(
            register.current_choice(&voter).await.unwrap().as_deref(),
            Some("A")
        );
        assert_eq!(
            register.current_choice(&VoterId::from("u2")).await.unwrap(),
            None
        );
        assert!(matches!(
            register.tally("NoSuchCity").await,
            Err(Error::UnknownCandidate(_))
        ));
        assert_consistent(&campaign).await;
    }

    #[register_test]
    async fn concurrent_votes_by_one_voter_count_once<S: Store>(
        register: BallotRegister<S>,
        campaign: Campaign<S>,
    ) {
        const N: usize = 16;
        add_a_and_b(&campaign).await;
        let register = Arc::new(register);

        let handles = (0..N)
            .map(|_| {
                let register = register.clone();
                tokio::spawn(async move {
                    register.cast_vote(&VoterId::from("racer"), "A").await
                })
            })
            .collect::<Vec<_>>();

        let mut recorded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(VoteOutcome::Recorded) => recorded += 1,
                Ok(VoteOutcome::Unchanged) => {}
                Ok(VoteOutcome::Changed) => panic!("no other candidate was voted for"),
                // Losing a write conflict is allowed, as long as it left nothing behind.
                Err(err) => assert!(err.is_retryable(), "{err}"),
            }
        }

        assert_eq!(recorded, 1);
        assert_eq!(register.tally("A").await.unwrap(), 1);
        assert_eq!(
            register
                .current_choice(&VoterId::from("racer"))
                .await
                .unwrap()
                .as_deref(),
            Some("A")
        );
        assert_consistent(&campaign).await;
    }

    #[register_test]
    async fn concurrent_changes_by_one_voter_leave_one_ballot<S: Store>(
        register: BallotRegister<S>,
        campaign: Campaign<S>,
    ) {
        const CITIES: [&str; 3] = ["A", "B", "C"];
        add_a_and_b(&campaign).await;
        campaign.add_candidate("C", Some(70)).await.unwrap();
        let register = Arc::new(register);

        let handles = (0..30)
            .map(|i| {
                let register = register.clone();
                tokio::spawn(async move {
                    register
                        .cast_vote(&VoterId::from("flipper"), CITIES[i % CITIES.len()])
                        .await
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            if let Err(err) = handle.await.unwrap() {
                assert!(err.is_retryable(), "{err}");
            }
        }

        let mut total = 0;
        for city in CITIES {
            total += register.tally(city).await.unwrap();
        }
        assert_eq!(total, 1);
        let choice = register
            .current_choice(&VoterId::from("flipper"))
            .await
            .unwrap()
            .expect("at least one vote succeeds");
        assert_eq!(register.tally(&choice).await.unwrap(), 1);
        assert_consistent(&campaign).await;
    }

    #[register_test]
    async fn concurrent_voters_all_count<S: Store>(
        register: BallotRegister<S>,
        campaign: Campaign<S>,
    ) {
        add_a_and_b(&campaign).await;
        let register = Arc::new(register);

        let handles = (0..10)
            .map(|i| {
                let register = register.clone();
                let city = if i % 2 == 0 { "A" } else { "B" };
                tokio::spawn(async move {
                    let voter = VoterId::from(format!("voter{i}"));
                    // Retry conflicts like a resubmitted form would.
                    loop {
                        match register.cast_vote(&voter, city).await {
                            Err(err) if err.is_retryable() => continue,
                            other => break other,
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), VoteOutcome::Recorded);
        }

        assert_eq!(register.tally("A").await.unwrap(), 5);
        assert_eq!(register.tally("B").await.unwrap(), 5);
        assert_consistent(&campaign).await;
    }

    #[register_test]
    async fn outage_changes_nothing(store: MemoryStore, config: Config) {
        let campaign = Campaign::new(store.clone(), &config);
        let register = BallotRegister::new(store.clone(), &config);
        add_a_and_b(&campaign).await;
        let voter = VoterId::from("u1");
        register.cast_vote(&voter, "A").await.unwrap();

        store.set_unavailable(true);
        let result = register.cast_vote(&voter, "B").await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
        store.recover();

        assert_eq!(register.tally("A").await.unwrap(), 1);
        assert_eq!(register.tally("B").await.unwrap(), 0);
        assert_consistent(&campaign).await;
    }

    #[register_test]
    async fn failure_mid_change_changes_nothing(store: MemoryStore, config: Config) {
        let campaign = Campaign::new(store.clone(), &config);
        let register = BallotRegister::new(store.clone(), &config);
        add_a_and_b(&campaign).await;
        let voter = VoterId::from("u1");
        register.cast_vote(&voter, "A").await.unwrap();

        // Look up the candidate, the ballot and the old city, decrement A,
        // then fail while moving the ballot.
        store.fail_after(4);
        let result = register.cast_vote(&voter, "B").await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
        store.recover();

        assert_eq!(register.tally("A").await.unwrap(), 1);
        assert_eq!(register.tally("B").await.unwrap(), 0);
        assert_eq!(
            register.current_choice(&voter).await.unwrap().as_deref(),
            Some("A")
        );
        assert_consistent(&campaign).await;
    }

    #[register_test]
    async fn failure_mid_first_vote_changes_nothing(store: MemoryStore, config: Config) {
        let campaign = Campaign::new(store.clone(), &config);
        let register = BallotRegister::new(store.clone(), &config);
        add_a_and_b(&campaign).await;
        let voter = VoterId::from("u1");

        // Insert the ballot, then fail before the counter moves.
        store.fail_after(3);
        let result = register.cast_vote(&voter, "A").await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
        store.recover();

        assert_eq!(register.current_choice(&voter).await.unwrap(), None);
        assert_eq!(register.tally("A").await.unwrap(), 0);
        assert!(store.documents("ballots").await.is_empty());
    }

    #[register_test]
    async fn timeout_changes_nothing(store: MemoryStore, config: Config) {
        let campaign = Campaign::new(store.clone(), &config);
        let register = BallotRegister::new(store.clone(), &config)
            .with_op_timeout(Duration::from_millis(50));
        add_a_and_b(&campaign).await;
        let voter = VoterId::from("slowpoke");

        store.set_latency(Duration::from_millis(40));
        let result = register.cast_vote(&voter, "A").await;
        assert!(matches!(
            result,
            Err(Error::StorageUnavailable(crate::store::StoreError::Timeout))
        ));
        store.recover();

        // The abandoned transaction released the store.
        assert_eq!(register.tally("A").await.unwrap(), 0);
        assert_eq!(register.current_choice(&voter).await.unwrap(), None);
        assert_eq!(register.cast_vote(&voter, "A").await.unwrap(), VoteOutcome::Recorded);
    }

    #[register_test]
    async fn voter_identity_is_not_stored(store: MemoryStore, config: Config) {
        let campaign = Campaign::new(store.clone(), &config);
        let register = BallotRegister::new(store.clone(), &config);
        add_a_and_b(&campaign).await;
        let voter = VoterId::from("alice@example.com");
        register.cast_vote(&voter, "A").await.unwrap();

        let ballots = store.documents("ballots").await;
        assert_eq!(ballots.len(), 1);
        let stored = ballots[0].get_str("voter_key").unwrap();
        assert_eq!(stored, register.voter_key(&voter).as_str());
        assert!(!format!("{:?}", ballots[0]).contains("alice"));
    }

    #[register_test]
    async fn at_most_one_ballot_per_voter(store: MemoryStore, config: Config) {
        let campaign = Campaign::new(store.clone(), &config);
        let register = BallotRegister::new(store.clone(), &config);
        add_a_and_b(&campaign).await;

        for (voter, city) in [("u1", "A"), ("u1", "B"), ("u2", "A"), ("u1", "A"), ("u2", "A")] {
            register.cast_vote(&voter.into(), city).await.unwrap();
        }

        let ballots = store.documents("ballots").await;
        let keys = ballots
            .iter()
            .map(|b| b.get_str("voter_key").unwrap().to_string())
            .collect::<HashSet<_>>();
        assert_eq!(ballots.len(), 2);
        assert_eq!(keys.len(), 2);
        assert_eq!(register.tally("A").await.unwrap(), 2);
        assert_consistent(&campaign).await;
    }

    #[test]
    fn uncounted_ballot_is_rejected() {
        assert!(require_counted(1, "A").is_ok());
        assert!(matches!(
            require_counted(0, "A"),
            Err(Error::UnknownCandidate(ref name)) if name == "A"
        ));
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(VoteOutcome::Recorded.to_string(), "Vote recorded successfully!");
        assert_eq!(
            VoteOutcome::Unchanged.to_string(),
            "You have already voted for this city"
        );
        assert_eq!(VoteOutcome::Changed.to_string(), "Vote changed successfully!");
    }
}
