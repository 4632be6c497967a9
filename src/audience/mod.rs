//! The vote app side: one participant joining the crew and voting.
//!
//! The client only mirrors what the presentation broadcasts; it never
//! aggregates other participants' votes.

mod avatar;

use std::sync::Arc;

use tokio::sync::watch;

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::messaging::*;
use crate::persistence::{KeyValueStore, PersistedParticipant, Snapshot, PARTICIPANT_KEY};

pub use self::avatar::*;

/// Local echo of the presentation's broadcasts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudienceState {
    pub session: Option<SessionStateMessage>,
    pub active_vote: Option<VoteStartedMessage>,
    pub last_result: Option<VoteEndedMessage>,
    pub active_poll: Option<PollStartedMessage>,
    /// Crew name once this participant joined
    pub joined_as: Option<String>,
}

pub struct CrewClient {
    connection: Arc<ConnectionManager>,
    state: Arc<watch::Sender<AudienceState>>,
    participant: Snapshot<PersistedParticipant>,
}

impl CrewClient {
    pub fn new(connection: Arc<ConnectionManager>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            connection,
            state: Arc::new(watch::channel(AudienceState::default()).0),
            participant: Snapshot::new(storage, PARTICIPANT_KEY),
        }
    }

    /// Connect under the identity saved by a previous visit, if any.
    pub async fn connect(&self, api_key: &str) -> Result<()> {
        if self.connection.is_connected() {
            return Ok(());
        }

        let saved = self.participant.load();
        let restore_id = saved.as_ref().map(|p| p.participant_id.as_str());
        self.connection.connect(api_key, restore_id).await?;
        self.attach();

        match saved {
            Some(saved) => {
                info!("Rejoined as {}", saved.participant_id);
                self.state.send_modify(|state| state.joined_as = saved.name);
            }
            None => {
                if let Some(participant_id) = self.connection.client_id() {
                    self.participant.save(&PersistedParticipant {
                        participant_id,
                        name: None,
                        keynote_id: None,
                    });
                }
            }
        }
        Ok(())
    }

    fn attach(&self) {
        let state = self.state.clone();
        self.connection.on_session_state(move |session| {
            state.send_modify(|s| s.session = Some(session.clone()));
        });

        let state = self.state.clone();
        self.connection.on_vote_started(move |vote| {
            state.send_modify(|s| s.active_vote = Some(vote.clone()));
        });

        let state = self.state.clone();
        self.connection.on_vote_ended(move |ended| {
            state.send_modify(|s| {
                if s.active_vote.as_ref().map(|v| v.vote_index) == Some(ended.vote_index) {
                    s.active_vote = None;
                }
                s.last_result = Some(ended.clone());
            });
        });

        let state = self.state.clone();
        self.connection.on_poll_started(move |poll| {
            state.send_modify(|s| s.active_poll = Some(poll.clone()));
        });

        let connection = Arc::downgrade(&self.connection);
        self.connection.on_heartbeat_request(move |_| {
            let Some(connection) = connection.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                let Some(participant_id) = connection.client_id() else {
                    return;
                };
                let reply = Message::HeartbeatResponse(HeartbeatResponseMessage {
                    participant_id,
                    timestamp: crate::now_millis(),
                });
                if let Err(e) = connection.publish(&reply).await {
                    warn!("Could not answer heartbeat: {e}");
                }
            });
        });
    }

    fn participant_or_fail(&self) -> Result<String> {
        self.connection.client_id().ok_or(Error::NotConnected)
    }

    /// Announce this participant to the presentation. `avatar` is a
    /// serialized [`PirateAvatar`].
    pub async fn join_crew(
        &self,
        name: &str,
        keynote_id: &str,
        avatar: Option<String>,
    ) -> Result<()> {
        let participant_id = self.participant_or_fail()?;

        self.connection
            .send(&Message::AvatarCreated(AvatarCreatedMessage {
                keynote_id: keynote_id.to_string(),
                participant_id: participant_id.clone(),
                name: name.to_string(),
                avatar,
                timestamp: crate::now_millis(),
            }))
            .await?;

        self.participant.save(&PersistedParticipant {
            participant_id,
            name: Some(name.to_string()),
            keynote_id: Some(keynote_id.to_string()),
        });
        self.state.send_modify(|state| state.joined_as = Some(name.to_string()));
        info!("Joined crew as {name} for keynote {keynote_id}");
        Ok(())
    }

    pub async fn send_vote(
        &self,
        vote_index: usize,
        choice: VoteChoice,
        keynote_id: &str,
    ) -> Result<()> {
        let participant_id = self.participant_or_fail()?;

        self.connection
            .send(&Message::VoteCast(VoteCastMessage {
                keynote_id: keynote_id.to_string(),
                participant_id,
                vote_index,
                choice,
                timestamp: crate::now_millis(),
            }))
            .await?;
        debug!("Vote sent: {choice} for vote {vote_index}");
        Ok(())
    }

    pub async fn send_poll(
        &self,
        poll_id: &str,
        choice: PollChoice,
        keynote_id: &str,
    ) -> Result<()> {
        let participant_id = self.participant_or_fail()?;

        self.connection
            .send(&Message::PollCast(PollCastMessage {
                keynote_id: keynote_id.to_string(),
                participant_id,
                poll_id: poll_id.to_string(),
                choice,
                timestamp: crate::now_millis(),
            }))
            .await?;
        debug!("Poll sent: {choice} for poll {poll_id}");
        Ok(())
    }

    /// Resume a dropped connection under a saved identity without joining
    /// the crew again.
    pub fn restore_session(&self, saved_id: &str) {
        self.connection.restore_identity(saved_id);

        let participant = match self.participant.load() {
            Some(saved) if saved.participant_id == saved_id => saved,
            _ => PersistedParticipant {
                participant_id: saved_id.to_string(),
                name: None,
                keynote_id: None,
            },
        };
        self.participant.save(&participant);
    }

    pub fn participant_id(&self) -> Option<String> {
        self.connection.client_id()
    }

    /// The identity and crew name kept from a previous visit.
    pub fn saved_participant(&self) -> Option<PersistedParticipant> {
        self.participant.load()
    }

    pub fn state(&self) -> AudienceState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AudienceState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::connection::ConnectionOptions;
    use crate::persistence::MemoryStorage;

    fn client(broker: &Arc<LocalBroker>, storage: &Arc<MemoryStorage>) -> CrewClient {
        let connection =
            Arc::new(ConnectionManager::new(broker.clone(), ConnectionOptions::audience()));
        CrewClient::new(connection, storage.clone())
    }

    #[tokio::test]
    async fn sending_requires_a_connection() {
        let broker = Arc::new(LocalBroker::new("key"));
        let client = client(&broker, &Arc::new(MemoryStorage::new()));

        assert!(matches!(client.join_crew("Anne", "k1", None).await, Err(Error::NotConnected)));
        assert!(matches!(client.send_vote(0, VoteChoice::A, "k1").await, Err(Error::NotConnected)));
        assert!(matches!(
            client.send_poll("rank", PollChoice::Captain, "k1").await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn reconnecting_keeps_the_saved_identity() {
        let broker = Arc::new(LocalBroker::new("key"));
        let storage = Arc::new(MemoryStorage::new());

        let first = client(&broker, &storage);
        first.connect("key").await.unwrap();
        first.join_crew("Anne Bonny", "k1", None).await.unwrap();
        let participant_id = first.participant_id().unwrap();
        first.disconnect();
        assert_eq!(first.participant_id(), None);

        let second = client(&broker, &storage);
        second.connect("key").await.unwrap();
        assert_eq!(second.participant_id(), Some(participant_id));
        assert_eq!(second.state().joined_as.as_deref(), Some("Anne Bonny"));
    }

    #[tokio::test]
    async fn restore_session_adopts_the_saved_id() {
        let broker = Arc::new(LocalBroker::new("key"));
        let storage = Arc::new(MemoryStorage::new());
        let client = client(&broker, &storage);
        client.connect("key").await.unwrap();

        client.restore_session("pirate-from-before");

        assert_eq!(client.participant_id().as_deref(), Some("pirate-from-before"));
        assert_eq!(client.saved_participant().unwrap().participant_id, "pirate-from-before");
    }

    #[tokio::test]
    async fn broadcasts_are_mirrored_locally() {
        let broker = Arc::new(LocalBroker::new("key"));
        let client = client(&broker, &Arc::new(MemoryStorage::new()));
        client.connect("key").await.unwrap();
        let mut changes = client.subscribe();

        let presenter = ConnectionManager::new(broker.clone(), ConnectionOptions::presentation());
        presenter.connect("key", None).await.unwrap();
        presenter
            .send(&Message::VoteStarted(VoteStartedMessage {
                vote_index: 2,
                duration: 20,
                timestamp: 1,
            }))
            .await
            .unwrap();
        presenter
            .send(&Message::VoteEnded(VoteEndedMessage {
                vote_index: 2,
                winner: VoteChoice::A,
                results: VoteCounts { a: 3, b: 1 },
                timestamp: 2,
            }))
            .await
            .unwrap();

        let state = changes
            .wait_for(|state| state.last_result.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(state.active_vote, None);
        assert_eq!(state.last_result.unwrap().winner, VoteChoice::A);
    }
}
