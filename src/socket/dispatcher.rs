use std::collections::HashMap;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{auth::AuthUser, socket::hub::Outbound, state::AppState, users::repo_types::User};

/// Inbound frame: `{"event": "...", "data": ...}`.
#[derive(Debug, Deserialize)]
pub struct Inbound {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Everything a handler gets to see about the socket that sent the event.
#[derive(Clone)]
pub struct EventCtx {
    pub state: AppState,
    pub socket_id: Uuid,
    pub user: User,
    pub data: Value,
}

#[derive(Debug, Default)]
pub struct Outcome {
    pub emit: Option<Outbound>,
    /// New owner and token of the socket, after a successful re-authentication.
    pub rebind: Option<AuthUser>,
}

impl Outcome {
    pub fn reply(event: &str, data: Value) -> Self {
        Self {
            emit: Some(Outbound {
                event: event.to_string(),
                data,
            }),
            rebind: None,
        }
    }
}

pub type EventHandler = fn(EventCtx) -> BoxFuture<'static, anyhow::Result<Outcome>>;

/// Event name → handler. An inbound event runs only if its name is
/// registered here.
#[derive(Default)]
pub struct EventTable {
    handlers: HashMap<&'static str, EventHandler>,
}

impl EventTable {
    pub fn on(mut self, event: &'static str, handler: EventHandler) -> Self {
        self.handlers.insert(event, handler);
        self
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// `None` when no handler is registered under `event`.
    pub async fn dispatch(&self, event: &str, ctx: EventCtx) -> Option<anyhow::Result<Outcome>> {
        let handler = self.handlers.get(event)?;
        Some(handler(ctx).await)
    }
}
