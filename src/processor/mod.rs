//! Feeds validated audience messages into the presentation's store.
//!
//! Each handler is called from the channel router, once per message, and
//! runs to completion before the next message on that channel.

mod crew;
mod heartbeat;
mod vote;

use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::presentation::SessionStore;
use crate::router::Subscription;

pub use crew::handle_avatar_created;
pub use heartbeat::handle_heartbeat_response;
pub use vote::{handle_poll_cast, handle_vote_cast};

/// Register the store's handlers for every inbound audience message.
pub fn attach(connection: &ConnectionManager, store: &Arc<SessionStore>) -> Vec<Subscription> {
    let avatars = {
        let store = store.clone();
        connection.on_avatar_created(move |message| {
            handle_avatar_created(&store, message, crate::now_millis());
        })
    };
    let votes = {
        let store = store.clone();
        connection.on_vote_cast(move |message| {
            handle_vote_cast(&store, message);
        })
    };
    let polls = {
        let store = store.clone();
        connection.on_poll_cast(move |message| {
            handle_poll_cast(&store, message);
        })
    };
    let heartbeats = {
        let store = store.clone();
        connection.on_heartbeat_response(move |message| {
            handle_heartbeat_response(&store, message, crate::now_millis());
        })
    };

    vec![avatars, votes, polls, heartbeats]
}

/// Messages from another keynote run are stale and never counted.
fn is_current_keynote(store: &SessionStore, keynote_id: &str, participant_id: &str) -> bool {
    let current = store.keynote_id();
    if current != keynote_id {
        debug!("Ignoring {participant_id} message for keynote {keynote_id}, current is {current}");
        return false;
    }
    true
}
