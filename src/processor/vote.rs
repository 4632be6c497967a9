use crate::messaging::{PollCastMessage, VoteCastMessage};
use crate::presentation::SessionStore;

/// Count a cast vote. Repeat voters and unknown vote indexes are dropped
/// by the store, so replayed messages are harmless.
pub fn handle_vote_cast(store: &SessionStore, vote: &VoteCastMessage) -> bool {
    if !super::is_current_keynote(store, &vote.keynote_id, &vote.participant_id) {
        return false;
    }

    let recorded = store.record_vote(&vote.participant_id, vote.vote_index, vote.choice);
    if !recorded {
        debug!(
            "{} vote {} for {} was not counted",
            vote.participant_id, vote.choice, vote.vote_index
        );
    }
    recorded
}

pub fn handle_poll_cast(store: &SessionStore, poll: &PollCastMessage) -> bool {
    if !super::is_current_keynote(store, &poll.keynote_id, &poll.participant_id) {
        return false;
    }

    store.record_poll_vote(&poll.participant_id, &poll.poll_id, poll.choice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{PollChoice, VoteChoice};
    use crate::persistence::MemoryStorage;
    use std::sync::Arc;

    fn vote(store: &SessionStore, participant_id: &str, choice: VoteChoice) -> VoteCastMessage {
        VoteCastMessage {
            keynote_id: store.keynote_id(),
            participant_id: participant_id.to_string(),
            vote_index: 0,
            choice,
            timestamp: 1000,
        }
    }

    #[test]
    fn replayed_votes_count_once() {
        let store = SessionStore::open(Arc::new(MemoryStorage::new()));
        let message = vote(&store, "p1", VoteChoice::A);

        assert!(handle_vote_cast(&store, &message));
        assert!(!handle_vote_cast(&store, &message));
        assert_eq!(store.snapshot().vote_results[&0].a, vec!["p1"]);
    }

    #[test]
    fn votes_for_another_keynote_are_ignored() {
        let store = SessionStore::open(Arc::new(MemoryStorage::new()));
        let mut message = vote(&store, "p1", VoteChoice::B);
        message.keynote_id = "keynote-stale".to_string();

        assert!(!handle_vote_cast(&store, &message));
        assert!(store.snapshot().vote_results[&0].b.is_empty());
    }

    #[test]
    fn poll_picks_are_counted() {
        let store = SessionStore::open(Arc::new(MemoryStorage::new()));
        let message = PollCastMessage {
            keynote_id: store.keynote_id(),
            participant_id: "p1".to_string(),
            poll_id: "rank".to_string(),
            choice: PollChoice::Quartermaster,
            timestamp: 1000,
        };

        assert!(handle_poll_cast(&store, &message));
        assert_eq!(store.snapshot().poll_results["rank"].quartermaster, vec!["p1"]);
    }
}
