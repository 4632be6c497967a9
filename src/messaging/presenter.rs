//! Messages the presentation broadcasts on the session channel.

use serde::{Deserialize, Serialize};

use super::{required_nullable, SessionPhase, VoteChoice};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateMessage {
    #[serde(deserialize_with = "required_nullable")]
    pub keynote_id: Option<String>,
    pub session_id: String,
    pub current_slide: u32,
    /// The presenter's own A/B choices, one slot per vote.
    pub path: Vec<Option<VoteChoice>>,
    #[serde(default)]
    pub phase: SessionPhase,
    #[serde(default)]
    pub active_vote_index: Option<usize>,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequestMessage {
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStartedMessage {
    pub vote_index: usize,
    /// Seconds
    pub duration: u32,
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    #[serde(rename = "A")]
    pub a: usize,
    #[serde(rename = "B")]
    pub b: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEndedMessage {
    pub vote_index: usize,
    pub winner: VoteChoice,
    pub results: VoteCounts,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStartedMessage {
    pub poll_id: String,
    /// Seconds
    pub duration: u32,
    pub timestamp: u64,
}
