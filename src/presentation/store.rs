use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::poll::{PollCounts, PollResults, VoteResults};
use crate::messaging::{
    PollChoice, SessionPhase, SessionStateMessage, VoteChoice, VoteCounts, VotePhase,
};
use crate::persistence::{KeyValueStore, PersistedSession, Snapshot, SESSION_KEY};

/// Number of A/B votes in a keynote, one per Lighthouse category.
pub const VOTE_COUNT: usize = 4;

pub const FIRST_SLIDE: u32 = 1;

pub type VotePath = [Option<VoteChoice>; VOTE_COUNT];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewMember {
    #[serde(rename = "odientId")]
    pub participant_id: String,
    pub name: String,
    /// Serialized avatar, never interpreted here
    pub avatar: Option<String>,
    pub joined_at: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub winner: VoteChoice,
    pub counts: VoteCounts,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub keynote_id: String,
    pub session_id: String,
    pub created_at: u64,
    pub started_at: u64,
    pub current_slide: u32,
    pub phase: SessionPhase,
    pub vote_path: VotePath,
    pub crew: Vec<CrewMember>,
    /// Participant id to the time of its last sign of life
    pub active_crew: BTreeMap<String, u64>,
    pub vote_results: BTreeMap<usize, VoteResults>,
    pub poll_results: BTreeMap<String, PollResults>,
    pub active_vote_index: Option<usize>,
    pub vote_phase: VotePhase,
    pub active_poll_id: Option<String>,
    pub poll_phase: VotePhase,
}

impl SessionState {
    fn fresh(keynote_id: String, created_at: u64, now: u64) -> Self {
        Self {
            keynote_id,
            session_id: new_session_id(),
            created_at,
            started_at: now,
            current_slide: FIRST_SLIDE,
            phase: SessionPhase::Intro,
            vote_path: [None; VOTE_COUNT],
            crew: Vec::new(),
            active_crew: BTreeMap::new(),
            vote_results: empty_vote_results(),
            poll_results: BTreeMap::new(),
            active_vote_index: None,
            vote_phase: VotePhase::Waiting,
            active_poll_id: None,
            poll_phase: VotePhase::Waiting,
        }
    }

    fn restored(saved: PersistedSession, now: u64) -> Self {
        let mut state = Self::fresh(saved.keynote_id, saved.created_at, now);
        state.current_slide = saved.last_slide;
        for (slot, choice) in state.vote_path.iter_mut().zip(saved.vote_path) {
            *slot = choice;
        }
        state
    }

    fn persisted(&self) -> PersistedSession {
        PersistedSession {
            keynote_id: self.keynote_id.clone(),
            created_at: self.created_at,
            last_slide: self.current_slide,
            vote_path: self.vote_path.to_vec(),
        }
    }

    pub fn active_participants(&self) -> Vec<String> {
        self.active_crew.keys().cloned().collect()
    }

    pub fn to_message(&self, timestamp: u64) -> SessionStateMessage {
        SessionStateMessage {
            keynote_id: Some(self.keynote_id.clone()),
            session_id: self.session_id.clone(),
            current_slide: self.current_slide,
            path: self.vote_path.to_vec(),
            phase: self.phase,
            active_vote_index: self.active_vote_index,
            timestamp,
        }
    }
}

fn empty_vote_results() -> BTreeMap<usize, VoteResults> {
    (0..VOTE_COUNT).map(|index| (index, VoteResults::default())).collect()
}

fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4().as_simple())
}

fn new_keynote_id() -> String {
    format!("keynote-{}", Uuid::new_v4().as_simple())
}

/// Aggregated state of the presentation. Every write goes through one of
/// the mutation methods; watchers are notified only on actual changes.
pub struct SessionStore {
    state: watch::Sender<SessionState>,
    snapshot: Snapshot<PersistedSession>,
}

impl SessionStore {
    /// Restore the keynote from storage, or start a new one and persist it.
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Self {
        let snapshot: Snapshot<PersistedSession> = Snapshot::new(storage, SESSION_KEY);
        let now = crate::now_millis();

        let state = match snapshot.load() {
            Some(saved) => {
                info!("Restored keynote {} on slide {}", saved.keynote_id, saved.last_slide);
                SessionState::restored(saved, now)
            }
            None => {
                let state = SessionState::fresh(new_keynote_id(), now, now);
                info!("Starting keynote {}", state.keynote_id);
                snapshot.save(&state.persisted());
                state
            }
        };

        Self {
            state: watch::channel(state).0,
            snapshot,
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn keynote_id(&self) -> String {
        self.state.borrow().keynote_id.clone()
    }

    pub fn session_message(&self, timestamp: u64) -> SessionStateMessage {
        self.state.borrow().to_message(timestamp)
    }

    fn persist(&self) {
        let persisted = self.state.borrow().persisted();
        self.snapshot.save(&persisted);
    }

    /// Returns false when the participant is already in the crew.
    pub fn add_crew_member(&self, member: CrewMember) -> bool {
        let participant_id = member.participant_id.clone();
        let added = self.state.send_if_modified(|state| {
            if state.crew.iter().any(|m| m.participant_id == member.participant_id) {
                return false;
            }
            state.crew.push(member);
            true
        });

        if added {
            info!("{participant_id} joined the crew");
        }
        added
    }

    /// Mark a participant as alive at `seen_at`. Returns true when it was
    /// not active before.
    pub fn update_active_crew(&self, participant_id: &str, seen_at: u64) -> bool {
        let mut newly_active = false;
        self.state.send_if_modified(|state| {
            match state.active_crew.get_mut(participant_id) {
                Some(last_seen) if *last_seen >= seen_at => return false,
                Some(last_seen) => *last_seen = seen_at,
                None => {
                    state.active_crew.insert(participant_id.to_string(), seen_at);
                    newly_active = true;
                }
            }
            true
        });
        newly_active
    }

    /// Drop every participant not heard from within `timeout` of `now`.
    pub fn prune_inactive(&self, now: u64, timeout: Duration) -> Vec<String> {
        let timeout = timeout.as_millis() as u64;
        let mut expired = Vec::new();
        self.state.send_if_modified(|state| {
            state.active_crew.retain(|participant_id, last_seen| {
                let alive = now.saturating_sub(*last_seen) <= timeout;
                if !alive {
                    expired.push(participant_id.clone());
                }
                alive
            });
            !expired.is_empty()
        });

        if !expired.is_empty() {
            debug!("Expired inactive participants: {}", expired.join(","));
        }
        expired
    }

    /// Count a vote. Unknown vote indexes and repeat voters are ignored.
    pub fn record_vote(&self, participant_id: &str, vote_index: usize, choice: VoteChoice) -> bool {
        let recorded = self.state.send_if_modified(|state| {
            state
                .vote_results
                .get_mut(&vote_index)
                .map_or(false, |results| results.record(participant_id, choice))
        });

        if recorded {
            debug!("{participant_id} voted {choice} in vote {vote_index}");
        }
        recorded
    }

    /// Count a poll pick, creating the poll's results on first use.
    pub fn record_poll_vote(
        &self,
        participant_id: &str,
        poll_id: &str,
        choice: PollChoice,
    ) -> bool {
        let recorded = self.state.send_if_modified(|state| {
            state
                .poll_results
                .entry(poll_id.to_string())
                .or_default()
                .record(participant_id, choice)
        });

        if recorded {
            debug!("{participant_id} picked {choice} in poll {poll_id}");
        }
        recorded
    }

    pub fn start_vote(&self, vote_index: usize) -> bool {
        self.state.send_if_modified(|state| {
            if !state.vote_results.contains_key(&vote_index) {
                return false;
            }
            state.active_vote_index = Some(vote_index);
            state.vote_phase = VotePhase::Voting;
            state.phase = SessionPhase::Voting;
            true
        })
    }

    /// Close the open vote and settle its winner. Only the active vote,
    /// while still in `Voting`, can be ended.
    pub fn end_vote(&self, vote_index: usize) -> Option<VoteOutcome> {
        let mut outcome = None;
        self.state.send_if_modified(|state| {
            let open = state.active_vote_index == Some(vote_index)
                && state.vote_phase == VotePhase::Voting;
            if !open {
                return false;
            }
            let results = match state.vote_results.get_mut(&vote_index) {
                Some(results) => results,
                None => return false,
            };
            outcome = Some(VoteOutcome {
                winner: results.decide(),
                counts: results.counts(),
            });
            state.vote_phase = VotePhase::Ended;
            state.phase = SessionPhase::Results;
            true
        });
        outcome
    }

    pub fn start_poll(&self, poll_id: &str) {
        self.state.send_modify(|state| {
            state.poll_results.entry(poll_id.to_string()).or_default();
            state.active_poll_id = Some(poll_id.to_string());
            state.poll_phase = VotePhase::Voting;
        });
    }

    pub fn end_poll(&self, poll_id: &str) -> Option<PollCounts> {
        let mut counts = None;
        self.state.send_if_modified(|state| {
            counts = state.poll_results.get(poll_id).map(PollResults::counts);
            if counts.is_none() {
                return false;
            }
            if state.active_poll_id.as_deref() == Some(poll_id) {
                state.poll_phase = VotePhase::Ended;
            }
            true
        });
        counts
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.state.send_if_modified(|state| {
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        });
    }

    pub fn set_current_slide(&self, slide: u32) {
        let changed = self.state.send_if_modified(|state| {
            let changed = state.current_slide != slide;
            state.current_slide = slide;
            changed
        });

        if changed {
            self.persist();
        }
    }

    /// Record the presenter's own choice for a vote slot.
    pub fn choose_path(&self, vote_index: usize, choice: Option<VoteChoice>) -> bool {
        let changed = self.state.send_if_modified(|state| {
            match state.vote_path.get_mut(vote_index) {
                Some(slot) if *slot != choice => {
                    *slot = choice;
                    true
                }
                _ => false,
            }
        });

        if changed {
            self.persist();
        }
        changed
    }

    /// New session within the same keynote: fresh session id, empty crew
    /// and tallies. Keynote id, creation time, slide and path survive.
    pub fn reset_session(&self) {
        self.state.send_modify(|state| {
            let now = crate::now_millis();
            let mut fresh = SessionState::fresh(state.keynote_id.clone(), state.created_at, now);
            fresh.current_slide = state.current_slide;
            fresh.vote_path = state.vote_path;
            *state = fresh;
        });
        info!("Session reset, now {}", self.state.borrow().session_id);
    }

    /// Throw the keynote away and start a brand new one.
    pub fn start_new_session(&self) {
        self.snapshot.clear();
        let now = crate::now_millis();
        self.state.send_replace(SessionState::fresh(new_keynote_id(), now, now));
        self.persist();
        info!("Started new keynote {}", self.keynote_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStorage;
    use serde_json::json;

    fn store() -> (Arc<MemoryStorage>, SessionStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::open(storage.clone());
        (storage, store)
    }

    fn member(participant_id: &str, name: &str) -> CrewMember {
        CrewMember {
            participant_id: participant_id.to_string(),
            name: name.to_string(),
            avatar: None,
            joined_at: 1000,
        }
    }

    fn stored(storage: &Arc<MemoryStorage>) -> serde_json::Value {
        let raw = storage.read(SESSION_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn records_a_first_vote() {
        let (_, store) = store();
        assert!(store.record_vote("p1", 0, VoteChoice::A));

        assert_eq!(
            serde_json::to_value(&store.snapshot().vote_results[&0]).unwrap(),
            json!({"A": ["p1"], "B": [], "winner": null})
        );
    }

    #[test]
    fn only_the_first_choice_per_vote_is_kept() {
        let (_, store) = store();
        assert!(store.record_vote("p1", 2, VoteChoice::B));
        assert!(!store.record_vote("p1", 2, VoteChoice::A));
        assert!(!store.record_vote("p1", 2, VoteChoice::B));
        assert!(store.record_vote("p1", 3, VoteChoice::A));

        let state = store.snapshot();
        assert_eq!(state.vote_results[&2].b, vec!["p1"]);
        assert!(state.vote_results[&2].a.is_empty());
    }

    #[test]
    fn votes_for_unknown_indexes_are_ignored() {
        let (_, store) = store();
        let mut changes = store.subscribe();
        changes.borrow_and_update();

        assert!(!store.record_vote("p1", VOTE_COUNT, VoteChoice::A));
        assert!(!changes.has_changed().unwrap());
    }

    #[test]
    fn joining_twice_keeps_one_crew_member() {
        let (_, store) = store();
        assert!(store.add_crew_member(member("p1", "Anne")));
        assert!(!store.add_crew_member(member("p1", "Anne again")));

        let crew = store.snapshot().crew;
        assert_eq!(crew.len(), 1);
        assert_eq!(crew[0].name, "Anne");
    }

    #[test]
    fn polls_are_created_lazily() {
        let (_, store) = store();
        assert!(store.record_poll_vote("p1", "rank", PollChoice::Captain));
        assert!(!store.record_poll_vote("p1", "rank", PollChoice::CabinBoy));

        assert_eq!(store.snapshot().poll_results["rank"].captain, vec!["p1"]);
    }

    #[test]
    fn heartbeats_keep_participants_active_until_they_expire() {
        let (_, store) = store();
        assert!(store.update_active_crew("p1", 1_000));
        assert!(!store.update_active_crew("p1", 5_000));
        assert!(store.update_active_crew("p2", 2_000));

        let expired = store.prune_inactive(18_000, Duration::from_millis(15_000));
        assert_eq!(expired, vec!["p2"]);
        assert_eq!(store.snapshot().active_participants(), vec!["p1"]);
    }

    #[test]
    fn vote_lifecycle_drives_phases() {
        let (_, store) = store();
        assert!(store.start_vote(1));
        store.record_vote("p1", 1, VoteChoice::B);

        let state = store.snapshot();
        assert_eq!(state.vote_phase, VotePhase::Voting);
        assert_eq!(state.phase, SessionPhase::Voting);
        assert_eq!(state.active_vote_index, Some(1));

        let outcome = store.end_vote(1).unwrap();
        assert_eq!(outcome.winner, VoteChoice::B);
        assert_eq!(outcome.counts, VoteCounts { a: 0, b: 1 });
        assert_eq!(store.snapshot().vote_phase, VotePhase::Ended);
        assert_eq!(store.end_vote(9), None);
    }

    #[test]
    fn only_the_open_vote_can_be_ended() {
        let (_, store) = store();
        assert_eq!(store.end_vote(0), None);

        assert!(store.start_vote(1));
        assert_eq!(store.end_vote(0), None);

        let state = store.snapshot();
        assert_eq!(state.active_vote_index, Some(1));
        assert_eq!(state.vote_phase, VotePhase::Voting);
        assert_eq!(state.phase, SessionPhase::Voting);
        assert_eq!(state.vote_results[&0].winner, None);

        assert!(store.end_vote(1).is_some());
        assert_eq!(store.end_vote(1), None);
    }

    #[test]
    fn path_and_slide_are_persisted() {
        let (storage, store) = store();
        store.set_current_slide(16);
        assert!(store.choose_path(1, Some(VoteChoice::A)));
        assert!(!store.choose_path(1, Some(VoteChoice::A)));
        assert!(!store.choose_path(7, Some(VoteChoice::A)));

        let saved = stored(&storage);
        assert_eq!(saved["lastSlide"], json!(16));
        assert_eq!(saved["votePath"], json!([null, "A", null, null]));

        let reopened = SessionStore::open(storage);
        let state = reopened.snapshot();
        assert_eq!(state.keynote_id, store.keynote_id());
        assert_eq!(state.current_slide, 16);
        assert_eq!(state.vote_path[1], Some(VoteChoice::A));
        assert_ne!(state.session_id, store.snapshot().session_id);
    }

    #[test]
    fn reset_session_keeps_the_keynote() {
        let (_, store) = store();
        let before = store.snapshot();
        store.add_crew_member(member("p1", "Anne"));
        store.record_vote("p1", 0, VoteChoice::A);
        store.update_active_crew("p1", 1000);

        store.reset_session();

        let after = store.snapshot();
        assert_eq!(after.keynote_id, before.keynote_id);
        assert_eq!(after.created_at, before.created_at);
        assert_ne!(after.session_id, before.session_id);
        assert!(after.crew.is_empty());
        assert!(after.active_crew.is_empty());
        assert_eq!(after.vote_results[&0], VoteResults::default());
    }

    #[test]
    fn new_session_replaces_the_keynote_in_storage() {
        let (storage, store) = store();
        let previous = store.keynote_id();
        store.choose_path(0, Some(VoteChoice::B));

        store.start_new_session();

        let saved = stored(&storage);
        assert_ne!(saved["keynoteId"], json!(previous));
        assert_eq!(saved["keynoteId"], json!(store.keynote_id()));
        assert_eq!(saved["votePath"], json!([null, null, null, null]));
    }

    #[test]
    fn corrupt_storage_starts_fresh() {
        let storage = Arc::new(MemoryStorage::new());
        storage.write(SESSION_KEY, "][").unwrap();

        let store = SessionStore::open(storage.clone());
        assert!(store.keynote_id().starts_with("keynote-"));
        assert_eq!(stored(&storage)["keynoteId"], json!(store.keynote_id()));
    }
}
