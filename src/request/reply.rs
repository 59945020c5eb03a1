use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::{auth::extractors::TOKEN_COOKIE, error::EntityError};

/// Resolved value of an entity function.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    /// Session token to hand out. Sent as a cookie, never in the body.
    pub token: Option<String>,
    pub body: Value,
}

impl Reply {
    pub fn ok<T: Serialize>(body: &T) -> Result<Self, EntityError> {
        Ok(Self {
            status: StatusCode::OK,
            token: None,
            body: serde_json::to_value(body)?,
        })
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }

    /// `{status, message}` body with a matching HTTP status.
    pub fn message(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            token: None,
            body: json!({ "status": status.as_u16(), "message": message }),
        }
    }

    /// `{status, reason}` body with a matching HTTP status.
    pub fn reason(status: StatusCode, reason: &str) -> Self {
        Self {
            status,
            token: None,
            body: json!({ "status": status.as_u16(), "reason": reason }),
        }
    }

    pub fn bad_request() -> Self {
        Self::message(StatusCode::BAD_REQUEST, "Bad request")
    }
}

pub fn session_cookie(token: &str) -> String {
    format!("{TOKEN_COOKIE}={token}; HttpOnly; Secure; SameSite=Strict; Path=/")
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut res = (self.status, Json(self.body)).into_response();
        if let Some(token) = self.token {
            match HeaderValue::from_str(&session_cookie(&token)) {
                Ok(cookie) => {
                    res.headers_mut().insert(header::SET_COOKIE, cookie);
                }
                Err(e) => {
                    error!(error = %e, "session token is not a valid header value");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }
        res
    }
}
