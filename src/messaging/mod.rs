use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub mod presenter;
pub mod user;
pub mod validate;

pub use presenter::*;
pub use user::*;
pub use validate::{validate, ValidationError};

/// The four broker topics shared by both apps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// presentation to everyone
    Session,
    /// vote app to presentation
    Votes,
    /// vote app to presentation
    Avatars,
    Heartbeat,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Session,
        Channel::Votes,
        Channel::Avatars,
        Channel::Heartbeat,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Session => "lighthouse:session",
            Channel::Votes => "lighthouse:votes",
            Channel::Avatars => "lighthouse:avatars",
            Channel::Heartbeat => "lighthouse:heartbeat",
        }
    }

    /// Whether messages of this kind belong on this channel.
    pub fn carries(&self, kind: MessageKind) -> bool {
        kind.channel() == *self
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The literal `type` discriminator of every message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    AvatarCreated,
    VoteCast,
    PollCast,
    HeartbeatResponse,
    SessionState,
    HeartbeatRequest,
    VoteStarted,
    VoteEnded,
    PollStarted,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::AvatarCreated => "avatar-created",
            MessageKind::VoteCast => "vote-cast",
            MessageKind::PollCast => "poll-cast",
            MessageKind::HeartbeatResponse => "heartbeat-response",
            MessageKind::SessionState => "session-state",
            MessageKind::HeartbeatRequest => "heartbeat-request",
            MessageKind::VoteStarted => "vote-started",
            MessageKind::VoteEnded => "vote-ended",
            MessageKind::PollStarted => "poll-started",
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            MessageKind::AvatarCreated => Channel::Avatars,
            MessageKind::VoteCast | MessageKind::PollCast => Channel::Votes,
            MessageKind::HeartbeatResponse => Channel::Heartbeat,
            MessageKind::SessionState
            | MessageKind::HeartbeatRequest
            | MessageKind::VoteStarted
            | MessageKind::VoteEnded
            | MessageKind::PollStarted => Channel::Session,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteChoice {
    A,
    B,
}

impl std::fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteChoice::A => f.write_str("A"),
            VoteChoice::B => f.write_str("B"),
        }
    }
}

impl std::str::FromStr for VoteChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(VoteChoice::A),
            "B" => Ok(VoteChoice::B),
            other => Err(format!("{other} is not a vote choice")),
        }
    }
}

/// Crew rank a participant can pick during a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollChoice {
    CabinBoy,
    Quartermaster,
    Captain,
}

impl std::fmt::Display for PollChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollChoice::CabinBoy => f.write_str("cabin_boy"),
            PollChoice::Quartermaster => f.write_str("quartermaster"),
            PollChoice::Captain => f.write_str("captain"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Intro,
    Voting,
    Results,
    Application,
    Recap,
}

impl std::str::FromStr for SessionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intro" => Ok(SessionPhase::Intro),
            "voting" => Ok(SessionPhase::Voting),
            "results" => Ok(SessionPhase::Results),
            "application" => Ok(SessionPhase::Application),
            "recap" => Ok(SessionPhase::Recap),
            other => Err(format!("{other} is not a session phase")),
        }
    }
}

/// Lifecycle of one voting or polling round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotePhase {
    #[default]
    Waiting,
    Voting,
    Ended,
}

/// Every message exchanged over the broker, tagged by its `type` field.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    AvatarCreated(AvatarCreatedMessage),
    VoteCast(VoteCastMessage),
    PollCast(PollCastMessage),
    HeartbeatResponse(HeartbeatResponseMessage),
    SessionState(SessionStateMessage),
    HeartbeatRequest(HeartbeatRequestMessage),
    VoteStarted(VoteStartedMessage),
    VoteEnded(VoteEndedMessage),
    PollStarted(PollStartedMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::AvatarCreated(_) => MessageKind::AvatarCreated,
            Message::VoteCast(_) => MessageKind::VoteCast,
            Message::PollCast(_) => MessageKind::PollCast,
            Message::HeartbeatResponse(_) => MessageKind::HeartbeatResponse,
            Message::SessionState(_) => MessageKind::SessionState,
            Message::HeartbeatRequest(_) => MessageKind::HeartbeatRequest,
            Message::VoteStarted(_) => MessageKind::VoteStarted,
            Message::VoteEnded(_) => MessageKind::VoteEnded,
            Message::PollStarted(_) => MessageKind::PollStarted,
        }
    }

    pub fn channel(&self) -> Channel {
        self.kind().channel()
    }

    pub fn to_payload(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::AvatarCreated(m) => write!(f, "{} joined as {}", m.participant_id, m.name),
            Message::VoteCast(m) => write!(
                f,
                "{} voted {} in vote {}",
                m.participant_id, m.choice, m.vote_index
            ),
            Message::PollCast(m) => write!(
                f,
                "{} picked {} in poll {}",
                m.participant_id, m.choice, m.poll_id
            ),
            Message::HeartbeatResponse(m) => write!(f, "{} is alive", m.participant_id),
            Message::SessionState(m) => write!(
                f,
                "session {} on slide {} ({:?})",
                m.session_id, m.current_slide, m.phase
            ),
            Message::HeartbeatRequest(_) => write!(f, "heartbeat request"),
            Message::VoteStarted(m) => {
                write!(f, "vote {} started for {}s", m.vote_index, m.duration)
            }
            Message::VoteEnded(m) => write!(f, "vote {} won by {}", m.vote_index, m.winner),
            Message::PollStarted(m) => write!(f, "poll {} started for {}s", m.poll_id, m.duration),
        }
    }
}

/// Accepts `null` or a value but, unlike a bare `Option`, refuses a
/// missing field.
pub(crate) fn required_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}
