//! OAuth 跳转、回调换取令牌与会话 Cookie 校验中间件。

use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{body::Body as AxumBody, middleware};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use cookie::time::Duration as CookieDuration;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{OAUTH_SCOPE, OAuthConfig, SESSION_COOKIE_NAME};
use crate::cookies::{cookie_from_headers, is_plausible_token};
use crate::error::ApiError;

/// 请求携带的访问令牌，由中间件写入扩展。
#[derive(Clone)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

fn requires_session(path: &str) -> bool {
    matches!(path, "/queues" | "/get-upload-url" | "/upload")
}

/// 会话中间件：受保护路径必须带有效的令牌 Cookie。
pub async fn session_middleware(
    mut req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    if !requires_session(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let Some(token) = session_token(req.headers()) else {
        warn!(path = req.uri().path(), "request without session cookie");
        return Err(ApiError::Unauthorized(
            "Unauthorized: access token not found in cookies".into(),
        ));
    };
    req.extensions_mut().insert(token);
    Ok(next.run(req).await)
}

fn session_token(headers: &HeaderMap) -> Option<SessionToken> {
    cookie_from_headers(headers, SESSION_COOKIE_NAME)
        .filter(|token| is_plausible_token(token))
        .map(SessionToken::new)
}

/// 构造授权页地址。
pub fn authorize_url(oauth: &OAuthConfig) -> Result<Url, ApiError> {
    Url::parse_with_params(
        &format!("{}/authorize", oauth.base_url),
        &[
            ("response_type", "code"),
            ("client_id", oauth.client_id.as_str()),
            ("redirect_uri", oauth.redirect_uri.as_str()),
            ("scope", OAUTH_SCOPE),
        ],
    )
    .map_err(|err| ApiError::Internal(format!("invalid oauth base url: {err}")))
}

fn found(location: &str) -> Result<Response, ApiError> {
    let location =
        HeaderValue::from_str(location).map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// HEAD 且已有会话时返回 200，否则跳转到授权页。
pub async fn auth_redirect(
    Extension(oauth): Extension<Arc<OAuthConfig>>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if method == Method::HEAD && session_token(&headers).is_some() {
        return Ok(StatusCode::OK.into_response());
    }
    found(authorize_url(&oauth)?.as_str())
}

#[derive(Deserialize)]
pub(crate) struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// 回调：用授权码换取令牌，写入 Cookie 后跳回首页。
pub async fn oauth_callback(
    Extension(oauth): Extension<Arc<OAuthConfig>>,
    Extension(client): Extension<Client>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<(CookieJar, Response), ApiError> {
    if let Some(error) = query.error {
        return Err(ApiError::upstream(
            400,
            "authorize",
            error,
            query.error_description,
        ));
    }
    let code = query
        .code
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Authorization code not provided.".into()))?;

    let token = exchange_code(&client, &oauth, &code).await?;
    let (value, expires_in) = match token {
        TokenResponse {
            error: Some(error),
            error_description,
            ..
        } => {
            warn!(error = %error, "token exchange rejected");
            return Err(ApiError::upstream(
                400,
                "token_exchange",
                error,
                error_description,
            ));
        }
        TokenResponse {
            access_token: Some(access_token),
            expires_in,
            ..
        } => {
            info!(expires_in, "session issued");
            (access_token, expires_in)
        }
        _ => {
            return Err(ApiError::upstream(
                0,
                "token_exchange",
                "token response is missing `access_token`",
                None,
            ));
        }
    };

    let mut cookie = Cookie::build((SESSION_COOKIE_NAME, value))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .build();
    if let Some(seconds) = expires_in {
        cookie.set_max_age(CookieDuration::seconds(seconds));
    }
    Ok((jar.add(cookie), found("/")?))
}

async fn exchange_code(
    client: &Client,
    oauth: &OAuthConfig,
    code: &str,
) -> Result<TokenResponse, ApiError> {
    let response = client
        .post(format!("{}/token", oauth.base_url))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
        ])
        .send()
        .await
        .map_err(|err| ApiError::Internal(format!("token exchange failed: {err}")))?;
    response
        .json::<TokenResponse>()
        .await
        .map_err(|err| ApiError::Internal(format!("token response unreadable: {err}")))
}
