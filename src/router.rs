//! 路由装配：端点、会话中间件、安全头、请求追踪与共享依赖。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth;
use crate::config::{OAuthConfig, TrackerConfig, UploadConfig};
use crate::http::{self, build_cors_layer, resolve_client_ip};
use crate::tracker::{self, TrackerApi};
use crate::upload::{self, Uploader};
use crate::webhook::{self, WebhookContext};

/// 路由共享的依赖，逐个以 Extension 注入。
#[derive(Clone)]
pub struct Services {
    pub oauth: Arc<OAuthConfig>,
    pub client: reqwest::Client,
    pub uploader: Arc<Uploader>,
    pub tracker: Arc<dyn TrackerApi>,
    pub tracker_config: Arc<TrackerConfig>,
    pub webhook: Arc<WebhookContext>,
    pub upload: Arc<UploadConfig>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn body_limit(config: &UploadConfig) -> DefaultBodyLimit {
    match usize::try_from(config.max_body_size) {
        Ok(0) => DefaultBodyLimit::disable(),
        Ok(limit) => DefaultBodyLimit::max(limit),
        Err(_) => DefaultBodyLimit::disable(),
    }
}

/// 构建完整路由；`static_dir` 存在时作为未匹配路径的静态站点。
pub fn build_router(
    services: Services,
    static_dir: Option<&str>,
    cors_origins: Option<&str>,
) -> Router {
    let mut app = Router::new()
        .route("/auth", get(auth::auth_redirect))
        .route("/callback", get(auth::oauth_callback))
        .route("/queues", get(tracker::list_queues))
        .route("/get-upload-url", post(upload::get_upload_url))
        .route(
            "/upload",
            post(upload::upload_files).layer(body_limit(&services.upload)),
        )
        .route("/tracker-webhook", post(webhook::tracker_webhook))
        .route("/health", get(health));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    let mut app = app
        .layer(middleware::from_fn(auth::session_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(services.oauth))
        .layer(Extension(services.client))
        .layer(Extension(services.uploader))
        .layer(Extension(services.tracker))
        .layer(Extension(services.tracker_config))
        .layer(Extension(services.webhook))
        .layer(Extension(services.upload));

    if let Some(cors_layer) = build_cors_layer(cors_origins) {
        app = app.layer(cors_layer);
    }
    app
}
