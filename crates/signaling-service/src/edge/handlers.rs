//! Edge handlers.
//!
//! - `GET /ws/rooms/:room_id` - signaling WebSocket for the caller in that room
//! - `POST /webrtc/offer` - apply a client offer (or, without `sdp`, start a server offer)
//! - `POST /webrtc/answer` - apply a client answer to the server's offer
//! - `POST /webrtc/ice-candidate` - trickle a candidate to the caller's session
//! - `GET /webrtc/ice-servers` - ICE servers with a fresh relay credential
//!
//! Every route runs behind [`require_auth`](super::auth::require_auth); the
//! session key is always `(room, authenticated user)`.

use super::auth::Caller;
use super::AppState;
use crate::errors::SignalingError;
use crate::sessions::{CandidateOutcome, IceServer};
use crate::signaling::envelope::sdp_of;
use crate::transport::run_connection;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    Extension, Json,
};
use common::types::{RoomId, SessionKey};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Longest accepted room id.
pub const MAX_ROOM_ID_LEN: usize = 128;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    pub room_id: String,
    /// Must match the caller when present.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client offer; absent to request a server-initiated offer.
    #[serde(default)]
    pub sdp: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub room_id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub sdp: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRequest {
    pub room_id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub candidate: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sdp: String,
}

/// `{"offer": …}` or `{"answer": …}`.
#[derive(Debug, Serialize)]
pub struct DescriptionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    /// Set for candidates that arrived before a remote description.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub buffered: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// Handler for `GET /ws/rooms/:room_id`.
#[instrument(skip_all, name = "sig.edge.ws", fields(room = %room_id))]
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, SignalingError> {
    let key = authorize(&state, &caller, &room_id, None).await?;
    if state.hub.is_cancelled() {
        return Err(SignalingError::Draining);
    }

    Ok(ws
        .max_message_size(state.pump.max_message_bytes)
        .on_upgrade(move |socket| serve_socket(socket, key, state)))
}

async fn serve_socket(socket: WebSocket, key: SessionKey, state: Arc<AppState>) {
    let connection = match state.hub.register(key.clone()).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!(target: "sig.edge", client = %key, error = %e, "Registration failed");
            return;
        }
    };
    info!(
        target: "sig.edge",
        client = %key,
        connection_id = %connection.connection_id,
        "WebSocket connected"
    );

    let (sink, stream) = socket.split();
    run_connection(
        stream,
        sink,
        connection,
        state.hub.clone(),
        state.router.clone(),
        state.pump,
    )
    .await;
}

/// Handler for `POST /webrtc/offer`.
#[instrument(skip_all, name = "sig.edge.offer")]
pub async fn offer(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<OfferRequest>,
) -> Result<Json<DescriptionResponse>, SignalingError> {
    let key = authorize(
        &state,
        &caller,
        &request.room_id,
        request.client_id.as_deref(),
    )
    .await?;

    let response = match request.sdp {
        Some(body) => {
            let sdp = sdp_of(&body)
                .ok_or_else(|| SignalingError::Validation("sdp is empty".to_string()))?;
            let answer =
                negotiated(&state, &key, state.sessions.handle_offer(&key, sdp).await).await?;
            DescriptionResponse {
                offer: None,
                answer: Some(SessionDescription {
                    kind: "answer",
                    sdp: answer,
                }),
            }
        }
        None => {
            let offer =
                negotiated(&state, &key, state.sessions.create_offer(&key).await).await?;
            DescriptionResponse {
                offer: Some(SessionDescription {
                    kind: "offer",
                    sdp: offer,
                }),
                answer: None,
            }
        }
    };

    Ok(Json(response))
}

/// Handler for `POST /webrtc/answer`.
#[instrument(skip_all, name = "sig.edge.answer")]
pub async fn answer(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<StatusResponse>, SignalingError> {
    let key = authorize(
        &state,
        &caller,
        &request.room_id,
        request.client_id.as_deref(),
    )
    .await?;
    let sdp = sdp_of(&request.sdp)
        .ok_or_else(|| SignalingError::Validation("sdp is empty".to_string()))?;

    negotiated(&state, &key, state.sessions.handle_answer(&key, sdp).await).await?;
    Ok(Json(StatusResponse {
        status: "success",
        buffered: false,
    }))
}

/// Handler for `POST /webrtc/ice-candidate`.
#[instrument(skip_all, name = "sig.edge.ice_candidate")]
pub async fn ice_candidate(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<CandidateRequest>,
) -> Result<Json<StatusResponse>, SignalingError> {
    let key = authorize(
        &state,
        &caller,
        &request.room_id,
        request.client_id.as_deref(),
    )
    .await?;

    let outcome = negotiated(
        &state,
        &key,
        state.sessions.add_candidate(&key, &request.candidate).await,
    )
    .await?;
    Ok(Json(StatusResponse {
        status: "success",
        buffered: outcome == CandidateOutcome::Buffered,
    }))
}

/// Handler for `GET /webrtc/ice-servers`.
#[instrument(skip_all, name = "sig.edge.ice_servers")]
pub async fn ice_servers(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<IceServersResponse>, SignalingError> {
    let ice_servers = state.sessions.ice_servers_for(&caller.user_id)?;
    Ok(Json(IceServersResponse { ice_servers }))
}

/// A failed negotiation closes the session without telling the Hub; any
/// signaling socket the caller holds is dropped here instead.
async fn negotiated<T>(
    state: &AppState,
    key: &SessionKey,
    result: Result<T, SignalingError>,
) -> Result<T, SignalingError> {
    if let Err(SignalingError::Negotiation(_)) = &result {
        state.sessions.notify_closed(key).await;
    }
    result
}

/// Build the session key for `caller` in `room_id`, checking the claimed
/// client id and room membership.
async fn authorize(
    state: &AppState,
    caller: &Caller,
    room_id: &str,
    claimed_client: Option<&str>,
) -> Result<SessionKey, SignalingError> {
    if room_id.is_empty() || room_id.len() > MAX_ROOM_ID_LEN {
        return Err(SignalingError::Validation("invalid room id".to_string()));
    }
    if let Some(claimed) = claimed_client {
        if claimed != caller.user_id {
            return Err(SignalingError::Forbidden(
                "client id does not match caller".to_string(),
            ));
        }
    }

    let room = RoomId::new(room_id);
    if !state.membership.is_member(&room, &caller.user_id).await? {
        return Err(SignalingError::Forbidden(format!(
            "{} is not a member of {room}",
            caller.user_id
        )));
    }

    Ok(SessionKey::new(room_id, caller.user_id.as_str()))
}
