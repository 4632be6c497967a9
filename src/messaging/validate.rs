//! Runtime guards for inbound payloads.
//!
//! A payload is accepted only when its `type` names a known message and
//! every required field is present with the right primitive type. Extra
//! fields are ignored. Numbers come out of `serde_json` values, which can
//! never hold `NaN`, and counters are unsigned integers, so anything but
//! a non-negative integer index is rejected. Guards never panic; they
//! return a [`ValidationError`] instead.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::{Message, MessageKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no string `type` discriminator")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("invalid {kind} message: {reason}")]
    Malformed { kind: MessageKind, reason: String },
}

type Validator = fn(&Value) -> Result<Message, ValidationError>;

const VALIDATORS: [(MessageKind, Validator); 9] = [
    (MessageKind::AvatarCreated, avatar_created),
    (MessageKind::VoteCast, vote_cast),
    (MessageKind::PollCast, poll_cast),
    (MessageKind::HeartbeatResponse, heartbeat_response),
    (MessageKind::SessionState, session_state),
    (MessageKind::HeartbeatRequest, heartbeat_request),
    (MessageKind::VoteStarted, vote_started),
    (MessageKind::VoteEnded, vote_ended),
    (MessageKind::PollStarted, poll_started),
];

/// Pick the guard matching the payload's `type` and run it.
pub fn validate(value: &Value) -> Result<Message, ValidationError> {
    let object = value.as_object().ok_or(ValidationError::NotAnObject)?;
    let type_name = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingType)?;

    let (_, validator) = VALIDATORS
        .iter()
        .find(|(kind, _)| kind.as_str() == type_name)
        .ok_or_else(|| ValidationError::UnknownType(type_name.to_string()))?;

    validator(value)
}

fn decode<'a, T: Deserialize<'a>>(
    kind: MessageKind,
    value: &'a Value,
) -> Result<T, ValidationError> {
    T::deserialize(value).map_err(|e| ValidationError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

fn avatar_created(value: &Value) -> Result<Message, ValidationError> {
    decode(MessageKind::AvatarCreated, value).map(Message::AvatarCreated)
}

fn vote_cast(value: &Value) -> Result<Message, ValidationError> {
    decode(MessageKind::VoteCast, value).map(Message::VoteCast)
}

fn poll_cast(value: &Value) -> Result<Message, ValidationError> {
    decode(MessageKind::PollCast, value).map(Message::PollCast)
}

fn heartbeat_response(value: &Value) -> Result<Message, ValidationError> {
    decode(MessageKind::HeartbeatResponse, value).map(Message::HeartbeatResponse)
}

fn session_state(value: &Value) -> Result<Message, ValidationError> {
    decode(MessageKind::SessionState, value).map(Message::SessionState)
}

fn heartbeat_request(value: &Value) -> Result<Message, ValidationError> {
    decode(MessageKind::HeartbeatRequest, value).map(Message::HeartbeatRequest)
}

fn vote_started(value: &Value) -> Result<Message, ValidationError> {
    decode(MessageKind::VoteStarted, value).map(Message::VoteStarted)
}

fn vote_ended(value: &Value) -> Result<Message, ValidationError> {
    decode(MessageKind::VoteEnded, value).map(Message::VoteEnded)
}

fn poll_started(value: &Value) -> Result<Message, ValidationError> {
    decode(MessageKind::PollStarted, value).map(Message::PollStarted)
}
