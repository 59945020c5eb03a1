//! Authenticated WebSocket endpoint. Each text frame names an event that is
//! routed through the `EventTable`; the `SocketHub` lets the rest of the
//! service push events to a user's open sockets.

pub mod dispatcher;
pub mod events;
pub mod hub;

use std::ops::ControlFlow;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use lazy_static::lazy_static;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{decode_auth_token, extractors::bearer_token},
    error::ApiError,
    state::AppState,
    users::repo_types::User,
};
use dispatcher::{EventCtx, EventTable, Inbound};

lazy_static! {
    static ref EVENTS: EventTable = events::default_table();
}

pub fn router() -> Router<AppState> {
    Router::new().route("/socket", get(socket_upgrade))
}

#[instrument(skip_all)]
pub async fn socket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::Unauthorized)?.to_string();
    let user = decode_auth_token(&state, &token).await.map_err(|e| {
        warn!(error = %e, "socket handshake rejected");
        ApiError::Unauthorized
    })?;
    let ws = ws.ok_or_else(|| ApiError::BadRequest("expected a websocket upgrade".into()))?;
    let session = Session {
        id: Uuid::new_v4(),
        user,
        token,
    };
    Ok(ws
        .on_upgrade(move |socket| run_socket(socket, state, session))
        .into_response())
}

/// Connection state of one socket.
pub struct Session {
    pub id: Uuid,
    pub user: User,
    /// Token the socket authenticated with; re-checked on every frame.
    pub token: String,
}

async fn run_socket(socket: WebSocket, state: AppState, mut session: Session) {
    let mut outbox = state.hub.register(session.user.id, session.id).await;
    let (mut sink, mut stream) = socket.split();
    info!(socket_id = %session.id, user_id = %session.user.id, "socket connected");

    loop {
        tokio::select! {
            out = outbox.recv() => {
                let Some(out) = out else {
                    info!(socket_id = %session.id, "socket closed by server");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let Ok(text) = serde_json::to_string(&out) else { continue };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match handle_frame(&state, &mut session, &text).await {
                    ControlFlow::Continue(reply) => {
                        if let Some(reply) = reply {
                            if sink.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    ControlFlow::Break(last) => {
                        let _ = sink.send(Message::Text(last)).await;
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(socket_id = %session.id, error = %e, "socket receive failed");
                    break;
                }
            }
        }
    }

    state.hub.unregister(session.user.id, session.id).await;
    info!(socket_id = %session.id, user_id = %session.user.id, "socket disconnected");
}

fn unauthorized_frame() -> String {
    json!({ "event": "unauthorized", "data": { "error": "Unauthorized" } }).to_string()
}

/// Runs one inbound text frame. `Continue` carries the serialized reply, if
/// any; `Break` carries the last frame to send before closing because the
/// session's token is no longer valid. Malformed frames, unknown events and
/// handler failures are logged and swallowed so the socket stays open.
pub async fn handle_frame(state: &AppState, session: &mut Session, text: &str) -> ControlFlow<String, Option<String>> {
    let frame: Inbound = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(socket_id = %session.id, error = %e, "malformed socket frame");
            return ControlFlow::Continue(None);
        }
    };

    match decode_auth_token(state, &session.token).await {
        Ok(user) => session.user = user,
        Err(e) => {
            info!(socket_id = %session.id, user_id = %session.user.id, error = %e, "socket session expired");
            return ControlFlow::Break(unauthorized_frame());
        }
    }

    let ctx = EventCtx {
        state: state.clone(),
        socket_id: session.id,
        user: session.user.clone(),
        data: frame.data,
    };
    let outcome = match EVENTS.dispatch(&frame.event, ctx).await {
        Some(Ok(outcome)) => outcome,
        Some(Err(e)) => {
            error!(socket_id = %session.id, event = %frame.event, error = %e, "socket event failed");
            return ControlFlow::Continue(None);
        }
        None => {
            warn!(socket_id = %session.id, event = %frame.event, "unknown socket event");
            return ControlFlow::Continue(None);
        }
    };

    if let Some(auth) = outcome.rebind {
        state.hub.rebind(session.id, session.user.id, auth.user.id).await;
        session.user = auth.user;
        session.token = auth.token;
    }
    ControlFlow::Continue(outcome.emit.and_then(|out| serde_json::to_string(&out).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::{header, Request, StatusCode}};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::users::repo_types::{Role, UserChanges};

    fn app(state: AppState) -> Router {
        router().with_state(state)
    }

    #[tokio::test]
    async fn handshake_requires_authorization() {
        let state = AppState::fake();
        let res = app(state)
            .oneshot(Request::get("/socket").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn handshake_rejects_invalid_token() {
        let state = AppState::fake();
        let res = app(state)
            .oneshot(
                Request::get("/socket")
                    .header(header::AUTHORIZATION, "Bearer forged")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_without_upgrade_is_bad_request() {
        let state = AppState::fake();
        let (_, token) = state.seed_user("ws@example.com", "+700", Role::User).await;
        let res = app(state)
            .oneshot(
                Request::get("/socket")
                    .header(header::AUTHORIZATION, token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    fn reply_of(step: ControlFlow<String, Option<String>>) -> Option<Value> {
        match step {
            ControlFlow::Continue(reply) => reply.map(|r| serde_json::from_str(&r).unwrap()),
            ControlFlow::Break(last) => panic!("socket closed: {last}"),
        }
    }

    #[tokio::test]
    async fn frames_dispatch_and_unknown_events_are_ignored() {
        let state = AppState::fake();
        let (user, token) = state.seed_user("f@example.com", "+701", Role::User).await;
        let mut session = Session { id: Uuid::new_v4(), user, token };

        let reply = reply_of(handle_frame(&state, &mut session, r#"{"event":"ping"}"#).await).unwrap();
        assert_eq!(reply["event"], "pong");

        assert!(reply_of(handle_frame(&state, &mut session, r#"{"event":"nope"}"#).await).is_none());
        assert!(reply_of(handle_frame(&state, &mut session, "not json").await).is_none());
    }

    #[tokio::test]
    async fn authenticate_frame_rebinds_session() {
        let state = AppState::fake();
        let (first, first_token) = state.seed_user("a1@example.com", "+702", Role::User).await;
        let (second, token) = state.seed_user("a2@example.com", "+703", Role::User).await;
        let mut session = Session { id: Uuid::new_v4(), user: first.clone(), token: first_token };
        let _rx = state.hub.register(first.id, session.id).await;

        let frame = serde_json::json!({ "event": "authenticate", "data": { "token": token } });
        let reply = reply_of(handle_frame(&state, &mut session, &frame.to_string()).await).unwrap();
        assert_eq!(reply["event"], "authenticated");
        assert_eq!(session.user.id, second.id);
        assert_eq!(session.token, token);
        assert_eq!(state.hub.connected(first.id).await, 0);
        assert_eq!(state.hub.connected(second.id).await, 1);
    }

    #[tokio::test]
    async fn frames_see_fresh_user_data() {
        let state = AppState::fake();
        let (user, token) = state.seed_user("fr@example.com", "+704", Role::User).await;
        let mut session = Session { id: Uuid::new_v4(), user: user.clone(), token };
        state
            .store
            .update(
                user.id,
                &UserChanges {
                    full_name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let reply = reply_of(handle_frame(&state, &mut session, r#"{"event":"whoami"}"#).await).unwrap();
        assert_eq!(reply["data"]["fullName"], "Renamed");
    }

    #[tokio::test]
    async fn revoked_or_removed_session_closes_socket() {
        let state = AppState::fake();
        let (user, token) = state.seed_user("gone@example.com", "+705", Role::User).await;
        let mut session = Session { id: Uuid::new_v4(), user: user.clone(), token: token.clone() };

        state.store.close_session(user.id, &token).await.unwrap();
        let step = handle_frame(&state, &mut session, r#"{"event":"whoami"}"#).await;
        let ControlFlow::Break(last) = step else {
            panic!("socket stayed open after logout");
        };
        let last: Value = serde_json::from_str(&last).unwrap();
        assert_eq!(last["event"], "unauthorized");

        let (other, other_token) = state.seed_user("gone2@example.com", "+706", Role::User).await;
        let mut session = Session { id: Uuid::new_v4(), user: other.clone(), token: other_token };
        state.store.remove(other.id).await.unwrap();
        assert!(handle_frame(&state, &mut session, r#"{"event":"ping"}"#).await.is_break());
    }
}
