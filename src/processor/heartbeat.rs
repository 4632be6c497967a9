use crate::messaging::HeartbeatResponseMessage;
use crate::presentation::SessionStore;

pub fn handle_heartbeat_response(
    store: &SessionStore,
    message: &HeartbeatResponseMessage,
    now: u64,
) {
    if store.update_active_crew(&message.participant_id, now) {
        debug!("{} is back on deck", message.participant_id);
    }
}
