use futures::{future::BoxFuture, FutureExt};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

use crate::{
    auth::{decode_auth_token, AuthUser},
    socket::dispatcher::{EventCtx, EventTable, Outcome},
    users::dto::PublicUser,
};

pub fn default_table() -> EventTable {
    EventTable::default()
        .on("ping", ping)
        .on("whoami", whoami)
        .on("authenticate", authenticate)
}

fn ping(_ctx: EventCtx) -> BoxFuture<'static, anyhow::Result<Outcome>> {
    async move {
        let at = OffsetDateTime::now_utc().format(&Rfc3339)?;
        Ok(Outcome::reply("pong", json!({ "at": at })))
    }
    .boxed()
}

fn whoami(ctx: EventCtx) -> BoxFuture<'static, anyhow::Result<Outcome>> {
    async move {
        let user = serde_json::to_value(PublicUser::from(&ctx.user))?;
        Ok(Outcome::reply("whoami", user))
    }
    .boxed()
}

/// `{"token": "..."}`: swaps the socket over to the token's owner, e.g.
/// after the client logged in as someone else.
fn authenticate(ctx: EventCtx) -> BoxFuture<'static, anyhow::Result<Outcome>> {
    async move {
        let Some(token) = ctx.data.get("token").and_then(Value::as_str) else {
            return Ok(Outcome::reply("unauthorized", json!({ "error": "Unauthorized" })));
        };
        match decode_auth_token(&ctx.state, token).await {
            Ok(user) => {
                info!(socket_id = %ctx.socket_id, user_id = %user.id, "socket re-authenticated");
                let public = serde_json::to_value(PublicUser::from(&user))?;
                Ok(Outcome {
                    rebind: Some(AuthUser {
                        user,
                        token: token.to_string(),
                    }),
                    ..Outcome::reply("authenticated", public)
                })
            }
            Err(e) => {
                warn!(socket_id = %ctx.socket_id, error = %e, "socket authenticate rejected");
                Ok(Outcome::reply("unauthorized", json!({ "error": "Unauthorized" })))
            }
        }
    }
    .boxed()
}
