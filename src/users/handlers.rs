use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, patch, post},
    Router,
};
use tracing::instrument;

use crate::{
    auth::{AuthUser, StaffUser},
    error::EntityError,
    request::{HttpRequest, Reply},
    state::AppState,
    users::services,
};

type EntityResponse = Result<Reply, EntityError>;

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user", post(create_user).get(list_users))
        .route("/user/login", post(login_user))
        .route("/user/logout", post(logout_user))
        .route("/user/me", get(get_me).patch(update_me))
        .route("/user/profile/:id", get(get_profile))
        .route("/user/:id", patch(update_user).delete(delete_user))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // avatars
}

/// POST /v1/user
#[instrument(skip_all)]
pub async fn create_user(State(state): State<AppState>, req: HttpRequest) -> EntityResponse {
    services::create(req, &state).await
}

/// POST /v1/user/login
#[instrument(skip_all)]
pub async fn login_user(State(state): State<AppState>, req: HttpRequest) -> EntityResponse {
    services::login(req, &state).await
}

/// GET /v1/user, admin or owner only.
#[instrument(skip_all, fields(caller = %staff.0.user.id))]
pub async fn list_users(
    State(state): State<AppState>,
    staff: StaffUser,
    req: HttpRequest,
) -> EntityResponse {
    services::get_all(req.authenticated(staff.0), &state).await
}

#[instrument(skip_all, fields(caller = %auth.user.id))]
pub async fn get_me(State(state): State<AppState>, auth: AuthUser, req: HttpRequest) -> EntityResponse {
    services::me(req.authenticated(auth), &state).await
}

#[instrument(skip_all, fields(caller = %auth.user.id))]
pub async fn get_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    req: HttpRequest,
) -> EntityResponse {
    services::profile(req.authenticated(auth), &state).await
}

#[instrument(skip_all, fields(caller = %auth.user.id))]
pub async fn update_me(State(state): State<AppState>, auth: AuthUser, req: HttpRequest) -> EntityResponse {
    services::update_own(req.authenticated(auth), &state).await
}

/// PATCH /v1/user/:id, admin or owner only.
#[instrument(skip_all, fields(caller = %staff.0.user.id))]
pub async fn update_user(
    State(state): State<AppState>,
    staff: StaffUser,
    req: HttpRequest,
) -> EntityResponse {
    services::update(req.authenticated(staff.0), &state).await
}

/// DELETE /v1/user/:id, admin or owner only.
#[instrument(skip_all, fields(caller = %staff.0.user.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    staff: StaffUser,
    req: HttpRequest,
) -> EntityResponse {
    services::remove(req.authenticated(staff.0), &state).await
}

#[instrument(skip_all, fields(caller = %auth.user.id))]
pub async fn logout_user(
    State(state): State<AppState>,
    auth: AuthUser,
    req: HttpRequest,
) -> EntityResponse {
    services::logout(req.authenticated(auth), &state).await
}
