//! The presentation side: aggregates what the audience sends and
//! broadcasts the session back to every vote app.

mod poll;
mod store;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Configuration;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::messaging::*;
use crate::processor;

pub use self::poll::{PollCounts, PollResults, VoteResults};
pub use self::store::*;

/// Slides that open each A/B vote, in vote order.
pub const VOTE_SLIDES: [u32; VOTE_COUNT] = [11, 16, 21, 26];

/// Lighthouse category decided by each vote.
pub const CATEGORIES: [&str; VOTE_COUNT] =
    ["Performance", "Accessibility", "Best Practices", "SEO"];

pub fn vote_index_for_slide(slide: u32) -> Option<usize> {
    VOTE_SLIDES.iter().position(|s| *s == slide)
}

#[derive(Clone, Debug)]
pub struct HostSettings {
    pub vote_duration_seconds: u32,
    pub heartbeat_interval: Duration,
    /// Participants silent for longer than this drop out of the active crew
    pub heartbeat_timeout: Duration,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            vote_duration_seconds: 20,
            heartbeat_interval: Duration::from_millis(10_000),
            heartbeat_timeout: Duration::from_millis(15_000),
        }
    }
}

impl From<&Configuration> for HostSettings {
    fn from(config: &Configuration) -> Self {
        Self {
            vote_duration_seconds: config.vote_duration_seconds,
            heartbeat_interval: Duration::from_millis(config.heartbeat.interval_ms),
            heartbeat_timeout: Duration::from_millis(config.heartbeat.timeout_ms),
        }
    }
}

/// Owns the session store and the presentation's broker connection. Every
/// operator action mutates the store first and then tells the audience.
pub struct PresentationHost {
    connection: Arc<ConnectionManager>,
    store: Arc<SessionStore>,
    settings: HostSettings,
}

impl PresentationHost {
    pub fn new(
        connection: Arc<ConnectionManager>,
        store: Arc<SessionStore>,
        settings: HostSettings,
    ) -> Self {
        Self {
            connection,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Connect, start feeding audience messages into the store and announce
    /// the current session.
    pub async fn connect(&self, api_key: &str) -> Result<()> {
        if self.connection.is_connected() {
            return Ok(());
        }

        self.connection.connect(api_key, None).await?;
        let handlers = processor::attach(&self.connection, &self.store);
        debug!("Attached {} audience handlers", handlers.len());

        self.broadcast_state().await
    }

    pub async fn broadcast_state(&self) -> Result<()> {
        let message = Message::SessionState(self.store.session_message(crate::now_millis()));
        self.connection.publish(&message).await
    }

    /// Open a vote. Returns false for an unknown vote index.
    pub async fn start_vote(&self, vote_index: usize) -> Result<bool> {
        if !self.store.start_vote(vote_index) {
            return Ok(false);
        }
        info!("Vote {vote_index} ({}) is open", CATEGORIES[vote_index]);

        self.connection
            .publish(&Message::VoteStarted(VoteStartedMessage {
                vote_index,
                duration: self.settings.vote_duration_seconds,
                timestamp: crate::now_millis(),
            }))
            .await?;
        self.broadcast_state().await?;
        Ok(true)
    }

    pub async fn end_vote(&self, vote_index: usize) -> Result<Option<VoteOutcome>> {
        let outcome = match self.store.end_vote(vote_index) {
            Some(outcome) => outcome,
            None => return Ok(None),
        };
        info!(
            "Vote {vote_index} ended {}-{}, {} wins",
            outcome.counts.a, outcome.counts.b, outcome.winner
        );

        self.connection
            .publish(&Message::VoteEnded(VoteEndedMessage {
                vote_index,
                winner: outcome.winner,
                results: outcome.counts,
                timestamp: crate::now_millis(),
            }))
            .await?;
        self.broadcast_state().await?;
        Ok(Some(outcome))
    }

    pub async fn start_poll(&self, poll_id: &str) -> Result<()> {
        self.store.start_poll(poll_id);
        self.connection
            .publish(&Message::PollStarted(PollStartedMessage {
                poll_id: poll_id.to_string(),
                duration: self.settings.vote_duration_seconds,
                timestamp: crate::now_millis(),
            }))
            .await?;
        self.broadcast_state().await
    }

    pub async fn end_poll(&self, poll_id: &str) -> Result<Option<PollCounts>> {
        let counts = self.store.end_poll(poll_id);
        if counts.is_some() {
            self.broadcast_state().await?;
        }
        Ok(counts)
    }

    pub async fn go_to_slide(&self, slide: u32) -> Result<()> {
        self.store.set_current_slide(slide);
        if let Some(vote_index) = vote_index_for_slide(slide) {
            debug!("Slide {slide} holds the {} vote", CATEGORIES[vote_index]);
        }
        self.broadcast_state().await
    }

    /// Move the keynote to another phase, for the application and recap
    /// parts that follow the votes.
    pub async fn set_phase(&self, phase: SessionPhase) -> Result<()> {
        self.store.set_phase(phase);
        self.broadcast_state().await
    }

    pub async fn choose_path(&self, vote_index: usize, choice: Option<VoteChoice>) -> Result<bool> {
        if !self.store.choose_path(vote_index, choice) {
            return Ok(false);
        }
        self.broadcast_state().await?;
        Ok(true)
    }

    pub async fn reset_session(&self) -> Result<()> {
        self.store.reset_session();
        self.broadcast_state().await
    }

    pub async fn start_new_session(&self) -> Result<()> {
        self.store.start_new_session();
        self.broadcast_state().await
    }

    /// Ask the audience for a sign of life and expire whoever stayed quiet.
    pub async fn heartbeat(&self) -> Result<Vec<String>> {
        let now = crate::now_millis();
        let expired = self.store.prune_inactive(now, self.settings.heartbeat_timeout);
        self.connection
            .publish(&Message::HeartbeatRequest(HeartbeatRequestMessage { timestamp: now }))
            .await?;
        Ok(expired)
    }

    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let host = self.clone();
        tokio::task::spawn(async move {
            let mut ticks = tokio::time::interval(host.settings.heartbeat_interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;
                if let Err(e) = host.heartbeat().await {
                    warn!("Heartbeat failed: {e}");
                }
            }
        })
    }
}
