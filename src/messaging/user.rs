//! Messages the vote app sends to the presentation.

use serde::{Deserialize, Serialize};

use super::{required_nullable, PollChoice, VoteChoice};

/// A participant joining the crew. `avatar` is a serialized
/// [`PirateAvatar`](crate::audience::PirateAvatar), opaque to the presentation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarCreatedMessage {
    pub keynote_id: String,
    #[serde(rename = "odientId")]
    pub participant_id: String,
    pub name: String,
    #[serde(deserialize_with = "required_nullable")]
    pub avatar: Option<String>,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCastMessage {
    pub keynote_id: String,
    #[serde(rename = "odientId")]
    pub participant_id: String,
    pub vote_index: usize,
    pub choice: VoteChoice,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCastMessage {
    pub keynote_id: String,
    #[serde(rename = "odientId")]
    pub participant_id: String,
    pub poll_id: String,
    pub choice: PollChoice,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponseMessage {
    #[serde(rename = "odientId")]
    pub participant_id: String,
    pub timestamp: u64,
}
