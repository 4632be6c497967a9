use crate::messaging::AvatarCreatedMessage;
use crate::presentation::{CrewMember, SessionStore};

/// A join adds the participant to the crew and counts as a sign of life.
pub fn handle_avatar_created(
    store: &SessionStore,
    message: &AvatarCreatedMessage,
    now: u64,
) -> bool {
    if !super::is_current_keynote(store, &message.keynote_id, &message.participant_id) {
        return false;
    }

    store.update_active_crew(&message.participant_id, now);
    store.add_crew_member(CrewMember {
        participant_id: message.participant_id.clone(),
        name: message.name.clone(),
        avatar: message.avatar.clone(),
        joined_at: message.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStorage;
    use std::sync::Arc;

    #[test]
    fn joining_makes_the_participant_active() {
        let store = SessionStore::open(Arc::new(MemoryStorage::new()));
        let message = AvatarCreatedMessage {
            keynote_id: store.keynote_id(),
            participant_id: "pirate-1".to_string(),
            name: "Mary Read".to_string(),
            avatar: Some("{}".to_string()),
            timestamp: 500,
        };

        assert!(handle_avatar_created(&store, &message, 1_000));
        assert!(!handle_avatar_created(&store, &message, 2_000));

        let state = store.snapshot();
        assert_eq!(state.crew.len(), 1);
        assert_eq!(state.crew[0].joined_at, 500);
        assert_eq!(state.crew[0].avatar.as_deref(), Some("{}"));
        assert_eq!(state.active_crew.get("pirate-1"), Some(&2_000));
    }
}
