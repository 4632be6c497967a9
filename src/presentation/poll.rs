use serde::{Deserialize, Serialize};

use crate::messaging::{PollChoice, VoteChoice, VoteCounts};

/// Who voted what in one A/B vote. A participant appears in at most one
/// list; their first vote is the one that counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResults {
    #[serde(rename = "A")]
    pub a: Vec<String>,
    #[serde(rename = "B")]
    pub b: Vec<String>,
    pub winner: Option<VoteChoice>,
}

impl VoteResults {
    pub fn has_voted(&self, participant_id: &str) -> bool {
        self.a.iter().chain(self.b.iter()).any(|id| id == participant_id)
    }

    /// Returns false when the participant already voted.
    pub fn record(&mut self, participant_id: &str, choice: VoteChoice) -> bool {
        if self.has_voted(participant_id) {
            return false;
        }

        match choice {
            VoteChoice::A => self.a.push(participant_id.to_string()),
            VoteChoice::B => self.b.push(participant_id.to_string()),
        }
        true
    }

    pub fn counts(&self) -> VoteCounts {
        VoteCounts {
            a: self.a.len(),
            b: self.b.len(),
        }
    }

    /// Settle the vote. B needs a strict majority; a tie goes to A.
    pub fn decide(&mut self) -> VoteChoice {
        let winner = if self.b.len() > self.a.len() {
            VoteChoice::B
        } else {
            VoteChoice::A
        };
        self.winner = Some(winner);
        winner
    }
}

/// Who picked which rank in one poll, same at-most-once rule as votes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResults {
    pub cabin_boy: Vec<String>,
    pub quartermaster: Vec<String>,
    pub captain: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PollCounts {
    pub cabin_boy: usize,
    pub quartermaster: usize,
    pub captain: usize,
}

impl PollResults {
    pub fn has_voted(&self, participant_id: &str) -> bool {
        self.cabin_boy
            .iter()
            .chain(self.quartermaster.iter())
            .chain(self.captain.iter())
            .any(|id| id == participant_id)
    }

    pub fn record(&mut self, participant_id: &str, choice: PollChoice) -> bool {
        if self.has_voted(participant_id) {
            return false;
        }

        let voters = match choice {
            PollChoice::CabinBoy => &mut self.cabin_boy,
            PollChoice::Quartermaster => &mut self.quartermaster,
            PollChoice::Captain => &mut self.captain,
        };
        voters.push(participant_id.to_string());
        true
    }

    pub fn counts(&self) -> PollCounts {
        PollCounts {
            cabin_boy: self.cabin_boy.len(),
            quartermaster: self.quartermaster.len(),
            captain: self.captain.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_vote_wins() {
        let mut results = VoteResults::default();
        assert!(results.record("p1", VoteChoice::A));
        assert!(!results.record("p1", VoteChoice::B));
        assert!(!results.record("p1", VoteChoice::A));

        assert_eq!(results.a, vec!["p1"]);
        assert!(results.b.is_empty());
    }

    #[test]
    fn serializes_like_the_wire_format() {
        let mut results = VoteResults::default();
        results.record("p1", VoteChoice::A);

        assert_eq!(
            serde_json::to_value(&results).unwrap(),
            json!({"A": ["p1"], "B": [], "winner": null})
        );
    }

    #[test]
    fn ties_go_to_a() {
        let mut results = VoteResults::default();
        results.record("p1", VoteChoice::A);
        results.record("p2", VoteChoice::B);
        assert_eq!(results.decide(), VoteChoice::A);

        results.record("p3", VoteChoice::B);
        assert_eq!(results.decide(), VoteChoice::B);
        assert_eq!(results.winner, Some(VoteChoice::B));
    }

    #[test]
    fn poll_keeps_only_the_first_pick() {
        let mut results = PollResults::default();
        assert!(results.record("p1", PollChoice::Captain));
        assert!(!results.record("p1", PollChoice::CabinBoy));
        assert!(results.record("p2", PollChoice::Quartermaster));

        assert_eq!(
            results.counts(),
            PollCounts {
                cabin_boy: 0,
                quartermaster: 1,
                captain: 1
            }
        );
    }
}
