use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::{
    http::StatusCode,
    reply::{json, with_status, Json, WithStatus},
    Rejection, Reply,
};
use zeroize::Zeroizing;

use crate::authentication::{OperatorClaims, Unauthorized};
use crate::broker::{Broker, Credentials, LinkState};
use crate::messaging::{SessionPhase, VoteChoice};
use crate::presentation::PresentationHost;
use crate::ws;

type Result<T> = std::result::Result<T, Rejection>;
type Response = WithStatus<Json>;

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    with_status(json(&ErrorResponse { error: error.to_string() }), status)
}

/// Mutations reply with the new session snapshot, or 502 when the
/// broadcast to the audience failed.
fn after_broadcast(result: crate::error::Result<()>, host: &PresentationHost) -> Response {
    match result {
        Ok(()) => with_status(json(&host.store().snapshot()), StatusCode::OK),
        Err(e) => {
            error!("Broadcast failed: {e}");
            error_response(StatusCode::BAD_GATEWAY, e)
        }
    }
}

pub async fn health_handler() -> Result<impl Reply> {
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct BridgeQuery {
    key: String,
}

/// Open a broker connection for a vote app and upgrade to the websocket
/// bridge. A key the broker does not accept is refused with 401.
pub async fn bridge_handler(
    ws: warp::ws::Ws,
    query: BridgeQuery,
    broker: Arc<dyn Broker>,
) -> Result<impl Reply> {
    let client_id = format!("bridge-{}", Uuid::new_v4().as_simple());
    let connection = broker.open(Credentials {
        api_key: Zeroizing::new(query.key),
        client_id: client_id.clone(),
    });

    let state = connection.state().borrow().clone();
    if state != LinkState::Connected {
        warn!("Refusing bridge {client_id}: broker link is {state:?}");
        connection.close();
        return Err(warp::reject::custom(Unauthorized));
    }

    Ok(ws
        .max_message_size(1024 * 4) // Set max message size to 4KiB
        .on_upgrade(move |socket| ws::client_connection(socket, client_id, connection)))
}

pub async fn session_handler(host: Arc<PresentationHost>) -> Result<impl Reply> {
    Ok(json(&host.store().snapshot()))
}

pub async fn reset_session_handler(
    claims: OperatorClaims,
    host: Arc<PresentationHost>,
) -> Result<Response> {
    info!("{} reset the session", claims.sub);
    Ok(after_broadcast(host.reset_session().await, &host))
}

pub async fn new_session_handler(
    claims: OperatorClaims,
    host: Arc<PresentationHost>,
) -> Result<Response> {
    info!("{} started a new keynote", claims.sub);
    Ok(after_broadcast(host.start_new_session().await, &host))
}

pub async fn slide_handler(
    slide: u32,
    _claims: OperatorClaims,
    host: Arc<PresentationHost>,
) -> Result<Response> {
    Ok(after_broadcast(host.go_to_slide(slide).await, &host))
}

pub async fn start_vote_handler(
    vote_index: usize,
    _claims: OperatorClaims,
    host: Arc<PresentationHost>,
) -> Result<Response> {
    Ok(match host.start_vote(vote_index).await {
        Ok(true) => with_status(json(&host.store().snapshot()), StatusCode::OK),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("no vote {vote_index}")),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    })
}

pub async fn end_vote_handler(
    vote_index: usize,
    _claims: OperatorClaims,
    host: Arc<PresentationHost>,
) -> Result<Response> {
    Ok(match host.end_vote(vote_index).await {
        Ok(Some(outcome)) => with_status(json(&outcome), StatusCode::OK),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no vote {vote_index}")),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    })
}

pub async fn start_poll_handler(
    poll_id: String,
    _claims: OperatorClaims,
    host: Arc<PresentationHost>,
) -> Result<Response> {
    Ok(after_broadcast(host.start_poll(&poll_id).await, &host))
}

pub async fn end_poll_handler(
    poll_id: String,
    _claims: OperatorClaims,
    host: Arc<PresentationHost>,
) -> Result<Response> {
    Ok(match host.end_poll(&poll_id).await {
        Ok(Some(counts)) => with_status(json(&counts), StatusCode::OK),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no poll {poll_id}")),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    })
}

pub async fn phase_handler(
    phase: String,
    _claims: OperatorClaims,
    host: Arc<PresentationHost>,
) -> Result<Response> {
    let phase: SessionPhase = match phase.parse() {
        Ok(phase) => phase,
        Err(e) => return Ok(error_response(StatusCode::BAD_REQUEST, e)),
    };

    Ok(after_broadcast(host.set_phase(phase).await, &host))
}

pub async fn path_handler(
    vote_index: usize,
    choice: String,
    _claims: OperatorClaims,
    host: Arc<PresentationHost>,
) -> Result<Response> {
    let choice: VoteChoice = match choice.parse() {
        Ok(choice) => choice,
        Err(e) => return Ok(error_response(StatusCode::BAD_REQUEST, e)),
    };

    if vote_index >= crate::presentation::VOTE_COUNT {
        return Ok(error_response(StatusCode::NOT_FOUND, format!("no vote {vote_index}")));
    }

    let result = host.choose_path(vote_index, Some(choice)).await;
    Ok(after_broadcast(result.map(|_| ()), &host))
}

pub async fn handle_rejection(err: Rejection) -> std::result::Result<Response, Infallible> {
    if err.find::<Unauthorized>().is_some() {
        return Ok(error_response(StatusCode::UNAUTHORIZED, "not authorized"));
    }
    if err.is_not_found() {
        return Ok(error_response(StatusCode::NOT_FOUND, "not found"));
    }

    debug!("Unhandled rejection: {err:?}");
    Ok(error_response(StatusCode::BAD_REQUEST, "bad request"))
}
