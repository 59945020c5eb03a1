//! Entity functions. Each takes a normalized request plus the application
//! state and resolves to a `Reply`; store failures become `EntityError`.

use axum::http::StatusCode;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::password::{hash_password, verify_password},
    error::EntityError,
    images::services::store_upload,
    request::{HttpRequest, Reply},
    state::AppState,
    users::{
        dto::{parse_bool, parse_list_query, Page, ProfileView, PublicUser},
        repo_types::{NewUser, Role, User, UserChanges},
    },
};

pub const CREATE_ALLOWED: &[&str] = &["fullName", "email", "password", "phone"];
pub const OWN_UPDATE_ALLOWED: &[&str] = &["fullName", "email", "avatar", "phone", "bio", "online"];
pub const UPDATE_ALLOWED: &[&str] = &["fullName", "email", "avatar", "phone", "bio", "role", "active"];

type EntityResult = Result<Reply, EntityError>;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn only_allowed(body: &Map<String, Value>, allowed: &[&str]) -> bool {
    body.keys().all(|k| allowed.contains(&k.as_str()))
}

fn non_empty_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn optional_string(value: &Value) -> Option<Option<String>> {
    match value {
        Value::Null => Some(None),
        Value::String(s) => Some(Some(s.clone())),
        _ => None,
    }
}

/// JSON bool, or the `"true"`/`"false"` text a form field carries.
fn flag(value: &Value) -> Option<bool> {
    value.as_bool().or_else(|| value.as_str().and_then(parse_bool))
}

/// Reads one allow-listed field into `changes`. `None` when the value has
/// the wrong shape for that field.
fn read_field(changes: &mut UserChanges, key: &str, value: &Value) -> Option<()> {
    match key {
        "fullName" => changes.full_name = Some(non_empty_string(value)?),
        "email" => {
            let email = normalize_email(value.as_str()?);
            if !is_valid_email(&email) {
                return None;
            }
            changes.email = Some(email);
        }
        "phone" => changes.phone = Some(non_empty_string(value)?),
        "avatar" => changes.avatar = Some(optional_string(value)?),
        "bio" => changes.bio = Some(optional_string(value)?),
        "online" => changes.online = Some(flag(value)?),
        "active" => changes.active = Some(flag(value)?),
        "role" => changes.role = Some(Role::parse(value.as_str()?)?),
        _ => return None,
    }
    Some(())
}

fn changes_from(body: &Map<String, Value>) -> Option<UserChanges> {
    let mut changes = UserChanges::default();
    body.iter()
        .try_for_each(|(k, v)| read_field(&mut changes, k, v))?;
    Some(changes)
}

fn require_user(req: &HttpRequest) -> Result<&User, EntityError> {
    req.user
        .as_ref()
        .ok_or_else(|| EntityError::from(anyhow::anyhow!("entity called without an authenticated user")))
}

async fn delete_image(state: &AppState, name: &str) {
    if let Err(e) = state.images.delete(name).await {
        warn!(error = %e, image = %name, "failed to delete image");
    }
}

/// Stores an uploaded `avatar` file and points `changes` at it. Returns the
/// stored name so a failed write can take it back.
async fn stage_avatar(
    state: &AppState,
    req: &HttpRequest,
    changes: &mut UserChanges,
) -> Result<Option<String>, EntityError> {
    let Some(file) = req.files.get("avatar") else {
        return Ok(None);
    };
    let name = store_upload(state.images.as_ref(), file).await?;
    changes.avatar = Some(Some(name.clone()));
    Ok(Some(name))
}

/// Writes `changes` for `id`. An avatar staged for this request is deleted
/// again unless the write lands.
async fn write_changes(
    state: &AppState,
    id: Uuid,
    changes: &UserChanges,
    staged: Option<String>,
) -> Result<Option<User>, EntityError> {
    let written = state.store.update(id, changes).await;
    if !matches!(written, Ok(Some(_))) {
        if let Some(name) = staged {
            delete_image(state, &name).await;
        }
    }
    Ok(written?)
}

/// Drops the avatar file a successful write replaced.
async fn discard_avatar(state: &AppState, changes: &UserChanges, previous: Option<String>, saved: &User) {
    if changes.avatar.is_none() {
        return;
    }
    match previous {
        Some(previous) if Some(&previous) != saved.avatar.as_ref() => delete_image(state, &previous).await,
        _ => {}
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    full_name: String,
    email: String,
    password: String,
    phone: String,
}

pub async fn create(req: HttpRequest, state: &AppState) -> EntityResult {
    if !only_allowed(&req.body, CREATE_ALLOWED) {
        return Ok(Reply::bad_request());
    }
    let Ok(payload) = serde_json::from_value::<RegisterRequest>(Value::Object(req.body)) else {
        return Ok(Reply::bad_request());
    };
    let email = normalize_email(&payload.email);
    let full_name = payload.full_name.trim().to_string();
    let phone = payload.phone.trim().to_string();
    if !is_valid_email(&email) || full_name.is_empty() || phone.is_empty() || payload.password.is_empty() {
        warn!(email = %email, "registration rejected");
        return Ok(Reply::bad_request());
    }

    let password_hash = hash_password(&payload.password)?;
    let id = Uuid::new_v4();
    let token = state.jwt.sign(id)?;

    let user = state
        .store
        .insert(NewUser {
            id,
            full_name,
            email,
            password_hash,
            phone,
            role: Role::User,
            tokens: vec![token.clone()],
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(Reply::ok(&PublicUser::from(&user))?.with_token(token))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

pub async fn login(req: HttpRequest, state: &AppState) -> EntityResult {
    let Ok(payload) = serde_json::from_value::<LoginRequest>(Value::Object(req.body)) else {
        return Ok(Reply::bad_request());
    };
    let email = normalize_email(&payload.email);

    let Some(user) = state.store.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Ok(Reply::bad_request());
    };
    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Ok(Reply::bad_request());
    }

    let token = state.jwt.sign(user.id)?;
    let Some(user) = state.store.open_session(user.id, &token).await? else {
        warn!(user_id = %user.id, "user removed during login");
        return Ok(Reply::bad_request());
    };

    info!(user_id = %user.id, "user logged in");
    Ok(Reply::ok(&PublicUser::from(&user))?.with_token(token))
}

pub async fn profile(req: HttpRequest, state: &AppState) -> EntityResult {
    let Some(id) = req.param("id").and_then(|raw| Uuid::parse_str(raw).ok()) else {
        return Ok(Reply::bad_request());
    };
    match state.store.find_by_id(id).await? {
        Some(user) => Reply::ok(&ProfileView::from(&user)),
        None => Ok(Reply::bad_request()),
    }
}

pub async fn me(req: HttpRequest, _state: &AppState) -> EntityResult {
    let user = require_user(&req)?;
    Reply::ok(&PublicUser::from(user))
}

pub async fn logout(req: HttpRequest, state: &AppState) -> EntityResult {
    let user = require_user(&req)?;
    let token = req
        .token
        .as_deref()
        .ok_or_else(|| EntityError::from(anyhow::anyhow!("logout without a session token")))?;
    state.store.close_session(user.id, token).await?;

    info!(user_id = %user.id, "user logged out");
    Ok(Reply::message(StatusCode::OK, "Success"))
}

pub async fn get_all(req: HttpRequest, state: &AppState) -> EntityResult {
    let (filter, page) = parse_list_query(&req.query);
    let (users, total) = state.store.find(&filter, page).await?;
    let docs: Vec<PublicUser> = users.iter().map(PublicUser::from).collect();
    Reply::ok(&Page::new(docs, total, page))
}

pub async fn update_own(req: HttpRequest, state: &AppState) -> EntityResult {
    if !only_allowed(&req.body, OWN_UPDATE_ALLOWED) {
        return Ok(Reply::reason(StatusCode::BAD_REQUEST, "Bad request"));
    }
    let user = require_user(&req)?;
    let Some(mut changes) = changes_from(&req.body) else {
        return Ok(Reply::reason(StatusCode::BAD_REQUEST, "Bad request"));
    };
    let staged = stage_avatar(state, &req, &mut changes).await?;
    let Some(saved) = write_changes(state, user.id, &changes, staged).await? else {
        return Ok(Reply::reason(StatusCode::NOT_FOUND, "Bad request"));
    };
    discard_avatar(state, &changes, user.avatar.clone(), &saved).await;

    info!(user_id = %saved.id, fields = ?req.body.keys().collect::<Vec<_>>(), "user updated own profile");
    Reply::ok(&PublicUser::from(&saved))
}

pub async fn update(req: HttpRequest, state: &AppState) -> EntityResult {
    if !only_allowed(&req.body, UPDATE_ALLOWED) {
        return Ok(Reply::reason(StatusCode::BAD_REQUEST, "Bad request"));
    }
    let Some(id) = req.param("id").and_then(|raw| Uuid::parse_str(raw).ok()) else {
        return Ok(Reply::reason(StatusCode::NOT_FOUND, "Bad request"));
    };
    let Some(user) = state.store.find_by_id(id).await? else {
        return Ok(Reply::reason(StatusCode::NOT_FOUND, "Bad request"));
    };
    let Some(mut changes) = changes_from(&req.body) else {
        return Ok(Reply::reason(StatusCode::BAD_REQUEST, "Bad request"));
    };
    let staged = stage_avatar(state, &req, &mut changes).await?;
    let Some(saved) = write_changes(state, id, &changes, staged).await? else {
        return Ok(Reply::reason(StatusCode::NOT_FOUND, "Bad request"));
    };
    discard_avatar(state, &changes, user.avatar, &saved).await;

    let public = PublicUser::from(&saved);
    state
        .hub
        .emit_to_user(saved.id, "user:updated", serde_json::to_value(&public)?)
        .await;
    info!(user_id = %saved.id, by = ?req.user.as_ref().map(|u| u.id), "user updated");
    Reply::ok(&public)
}

pub async fn remove(req: HttpRequest, state: &AppState) -> EntityResult {
    let Some(id) = req.param("id").and_then(|raw| Uuid::parse_str(raw).ok()) else {
        return Ok(Reply::message(StatusCode::NOT_FOUND, "Bad request"));
    };
    let Some(user) = state.store.remove(id).await? else {
        return Ok(Reply::message(StatusCode::NOT_FOUND, "Bad request"));
    };
    if let Some(avatar) = &user.avatar {
        delete_image(state, avatar).await;
    }
    state
        .hub
        .emit_to_user(user.id, "user:removed", json!({ "id": user.id }))
        .await;
    state.hub.disconnect_user(user.id).await;

    info!(user_id = %user.id, by = ?req.user.as_ref().map(|u| u.id), "user removed");
    Reply::ok(&PublicUser::from(&user))
}
