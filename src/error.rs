use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

/// Failures raised outside entity functions: auth extractors, the request
/// normalizer, the image route.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Please authenticate")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("{0}")]
    BadRequest(String),
    #[error("Not found")]
    NotFound,
    #[error("Something went wrong.")]
    Internal(#[source] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(e) => {
                error!(error = %e, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

/// Rejection of an entity function. Always surfaces as a 400 with a
/// generic message; the cause only goes to the log.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("Something went wrong.")]
    Store(#[source] anyhow::Error),
    #[error("Something went wrong.")]
    Encode(#[from] serde_json::Error),
}

impl From<anyhow::Error> for EntityError {
    fn from(err: anyhow::Error) -> Self {
        EntityError::Store(err)
    }
}

impl IntoResponse for EntityError {
    fn into_response(self) -> Response {
        match &self {
            EntityError::Store(e) => error!(error = %e, "entity rejected"),
            EntityError::Encode(e) => warn!(error = %e, "entity reply encoding failed"),
        }
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_maps_to_401() {
        let res = ApiError::Unauthorized.into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["error"], "Please authenticate");
    }

    #[tokio::test]
    async fn entity_error_hides_cause() {
        let res = EntityError::from(anyhow::anyhow!("duplicate key users_email_key")).into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["error"], "Something went wrong.");
    }
}
