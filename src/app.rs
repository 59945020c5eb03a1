use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{images, socket, users};

fn cors_layer(origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let Some(origin) = origin else {
        return Ok(CorsLayer::permissive());
    };
    let origin = HeaderValue::from_str(origin).with_context(|| format!("invalid CORS_ORIGIN {origin:?}"))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}

pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(state.config.cors_origin.as_deref())?;
    Ok(Router::new()
        .nest(
            "/v1",
            Router::new()
                .merge(users::router())
                .merge(images::router())
                .merge(socket::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        ))
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use bytes::Bytes;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::storage::ImageStore;
    use crate::users::{repo::UserStore, repo_types::Role};

    fn app(state: &AppState) -> Router {
        build_app(state.clone()).unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: Method, uri: &str, body: Value, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = cookie {
            req = req.header(header::COOKIE, format!("token={token}"));
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn token_from(res: &Response) -> String {
        let cookie = res.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        cookie
            .split(';')
            .next()
            .and_then(|kv| kv.strip_prefix("token="))
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn health() {
        let state = AppState::fake();
        let res = app(&state)
            .oneshot(Request::get("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_me_logout_flow() {
        let state = AppState::fake();

        let res = app(&state)
            .oneshot(json_request(
                Method::POST,
                "/v1/user",
                json!({ "fullName": "Ann", "email": "ann@example.com", "password": "pw-123456", "phone": "+1" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let token = token_from(&res);
        let body = json_body(res).await;
        assert!(body.get("token").is_none());
        assert_eq!(body["fullName"], "Ann");

        let me = app(&state)
            .oneshot(json_request(Method::GET, "/v1/user/me", json!({}), Some(&token)))
            .await
            .unwrap();
        assert_eq!(me.status(), StatusCode::OK);
        assert_eq!(json_body(me).await["email"], "ann@example.com");

        let out = app(&state)
            .oneshot(json_request(Method::POST, "/v1/user/logout", json!({}), Some(&token)))
            .await
            .unwrap();
        assert_eq!(out.status(), StatusCode::OK);

        let me = app(&state)
            .oneshot(json_request(Method::GET, "/v1/user/me", json!({}), Some(&token)))
            .await
            .unwrap();
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(me).await["error"], "Please authenticate");
    }

    #[tokio::test]
    async fn create_with_unknown_field_is_400() {
        let state = AppState::fake();
        let res = app(&state)
            .oneshot(json_request(
                Method::POST,
                "/v1/user",
                json!({ "fullName": "Ann", "email": "a@example.com", "password": "p", "phone": "+1", "role": "owner" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(res.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(json_body(res).await, json!({ "status": 400, "message": "Bad request" }));
    }

    #[tokio::test]
    async fn duplicate_registration_is_400_with_generic_error() {
        let state = AppState::fake();
        state.seed_user("dup@example.com", "+9", Role::User).await;
        let res = app(&state)
            .oneshot(json_request(
                Method::POST,
                "/v1/user",
                json!({ "fullName": "Dup", "email": "dup@example.com", "password": "p", "phone": "+10" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await, json!({ "error": "Something went wrong." }));
    }

    #[tokio::test]
    async fn login_sets_cookie() {
        let state = AppState::fake();
        state.seed_user("li@example.com", "+2", Role::User).await;
        let res = app(&state)
            .oneshot(json_request(
                Method::POST,
                "/v1/user/login",
                json!({ "email": "li@example.com", "password": "password123" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let token = token_from(&res);
        assert!(state.store.find_by_email("li@example.com").await.unwrap().unwrap().holds_token(&token));
    }

    #[tokio::test]
    async fn role_gated_routes() {
        let state = AppState::fake();
        let (user, user_token) = state.seed_user("plain@example.com", "+3", Role::User).await;
        let (_, owner_token) = state.seed_user("owner@example.com", "+4", Role::Owner).await;

        let res = app(&state)
            .oneshot(json_request(Method::GET, "/v1/user", json!({}), None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app(&state)
            .oneshot(json_request(Method::GET, "/v1/user", json!({}), Some(&user_token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let uri = format!("/v1/user/{}", user.id);
        let res = app(&state)
            .oneshot(json_request(Method::DELETE, &uri, json!({}), Some(&user_token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app(&state)
            .oneshot(json_request(Method::GET, "/v1/user?limit=5", json!({}), Some(&owner_token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["totalDocs"], 2);

        let res = app(&state)
            .oneshot(json_request(Method::PATCH, &uri, json!({ "role": "admin" }), Some(&owner_token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["role"], "admin");

        let res = app(&state)
            .oneshot(json_request(Method::DELETE, &uri, json!({}), Some(&owner_token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(state.store.find_by_id(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profile_requires_auth() {
        let state = AppState::fake();
        let (user, token) = state.seed_user("pr@example.com", "+5", Role::User).await;
        let uri = format!("/v1/user/profile/{}", user.id);

        let res = app(&state)
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app(&state)
            .oneshot(json_request(Method::GET, &uri, json!({}), Some(&token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["email"], "pr@example.com");
    }

    #[tokio::test]
    async fn form_fields_update_own_profile() {
        let state = AppState::fake();
        let (user, token) = state.seed_user("form@example.com", "+6", Role::User).await;

        let boundary = "user-service-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"online\"\r\n\r\ntrue\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"bio\"\r\n\r\nfrom a form\r\n\
             --{boundary}--\r\n"
        );
        let req = Request::builder()
            .method(Method::PATCH)
            .uri("/v1/user/me")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .header(header::COOKIE, format!("token={token}"))
            .body(Body::from(body))
            .unwrap();
        let res = app(&state).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["online"], true);
        assert_eq!(body["bio"], "from a form");

        let req = Request::builder()
            .method(Method::PATCH)
            .uri("/v1/user/me")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, format!("token={token}"))
            .body(Body::from("online=false"))
            .unwrap();
        let res = app(&state).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!state.store.find_by_id(user.id).await.unwrap().unwrap().online);
    }

    #[tokio::test]
    async fn images_are_served() {
        let state = AppState::fake();
        state
            .images
            .put("logo.png", Bytes::from_static(b"\x89PNG"))
            .await
            .unwrap();

        let res = app(&state)
            .oneshot(Request::get("/v1/images/logo.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"\x89PNG");

        let res = app(&state)
            .oneshot(Request::get("/v1/images/missing.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app(&state)
            .oneshot(Request::get("/v1/images/..").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn cors_origin_must_be_a_header_value() {
        assert!(cors_layer(Some("https://app.example.com")).is_ok());
        assert!(cors_layer(Some("bad\norigin")).is_err());
        assert!(cors_layer(None).is_ok());
    }
}
