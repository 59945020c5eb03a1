use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
};

use axum::{
    async_trait,
    body::Bytes,
    extract::{ConnectInfo, Form, FromRequest, FromRequestParts, Multipart, Path, Query, Request},
    http::{header, request::Parts, HeaderMap, Method},
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{auth::AuthUser, error::ApiError, users::repo_types::User};

/// A file part of a multipart body, kept in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestHeaders {
    #[serde(rename = "Content-Type")]
    pub content_type: Option<String>,
    #[serde(rename = "Referer")]
    pub referer: Option<String>,
    #[serde(rename = "User-Agent")]
    pub user_agent: Option<String>,
}

impl RequestHeaders {
    fn from_map(headers: &HeaderMap) -> Self {
        let get = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            content_type: get(header::CONTENT_TYPE),
            referer: get(header::REFERER),
            user_agent: get(header::USER_AGENT),
        }
    }
}

/// Fixed-shape view of a request handed to entity functions.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub token: Option<String>,
    pub user: Option<User>,
    pub body: Map<String, Value>,
    pub files: HashMap<String, UploadedFile>,
    pub query: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub ip: Option<IpAddr>,
    pub method: Method,
    pub path: String,
    pub headers: RequestHeaders,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            token: None,
            user: None,
            body: Map::new(),
            files: HashMap::new(),
            query: HashMap::new(),
            params: HashMap::new(),
            ip: None,
            method: Method::GET,
            path: "/".into(),
            headers: RequestHeaders::default(),
        }
    }
}

impl HttpRequest {
    /// Attaches the caller resolved by the auth extractor.
    pub fn authenticated(mut self, auth: AuthUser) -> Self {
        self.token = Some(auth.token);
        self.user = Some(auth.user);
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// `{...}`-shaped `data` text field of a form submission.
fn embedded_json(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn fields_to_body(fields: HashMap<String, String>) -> Result<Map<String, Value>, ApiError> {
    if let Some(data) = fields.get("data") {
        if data.trim().starts_with('{') {
            return embedded_json(data)
                .ok_or_else(|| ApiError::BadRequest("invalid JSON in data field".into()));
        }
    }
    Ok(fields
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect())
}

type Body = (Map<String, Value>, HashMap<String, UploadedFile>);

async fn read_multipart<S: Send + Sync>(req: Request, state: &S) -> Result<Body, ApiError> {
    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut fields = HashMap::new();
    let mut files = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let body = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            debug!(field = %name, size = body.len(), "multipart file received");
            files.insert(
                name,
                UploadedFile {
                    file_name,
                    content_type,
                    body,
                },
            );
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            fields.insert(name, text);
        }
    }

    Ok((fields_to_body(fields)?, files))
}

async fn read_body<S: Send + Sync>(req: Request, state: &S) -> Result<Body, ApiError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        return read_multipart(req, state).await;
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        return Ok((fields_to_body(fields)?, HashMap::new()));
    }

    let bytes = Bytes::from_request(req, state)
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok((Map::new(), HashMap::new()));
    }
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok((map, HashMap::new())),
        Ok(_) => Err(ApiError::BadRequest("body must be a JSON object".into())),
        Err(e) => Err(ApiError::BadRequest(format!("invalid JSON body: {e}"))),
    }
}

async fn path_params<S: Send + Sync>(parts: &mut Parts, state: &S) -> HashMap<String, String> {
    Path::<HashMap<String, String>>::from_request_parts(parts, state)
        .await
        .map(|Path(params)| params)
        .unwrap_or_default()
}

#[async_trait]
impl<S> FromRequest<S> for HttpRequest
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();

        let params = path_params(&mut parts, state).await;
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let headers = RequestHeaders::from_map(&parts.headers);
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();

        let (body, files) = if carries_body(&method) {
            read_body(Request::from_parts(parts, body), state).await?
        } else {
            (Map::new(), HashMap::new())
        };

        Ok(HttpRequest {
            token: None,
            user: None,
            body,
            files,
            query,
            params,
            ip,
            method,
            path,
            headers,
        })
    }
}
