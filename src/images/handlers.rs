use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::{error, instrument};

use crate::{images::services::mime_from_name, state::AppState, storage::is_plain_name};

pub fn image_routes() -> Router<AppState> {
    Router::new().route("/images/:path", get(get_image))
}

#[instrument(skip(state))]
pub async fn get_image(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    if !is_plain_name(&path) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": 400, "reason": "Please provide the path" })),
        )
            .into_response();
    }

    match state.images.get(&path).await {
        Ok(Some(bytes)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime_from_name(&path))],
            bytes,
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response(),
        Err(e) => {
            error!(error = %e, %path, "image read failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong.").into_response()
        }
    }
}
