//! 任务跟踪系统客户端：队列、任务详情与附件下载。

use async_trait::async_trait;
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::SessionToken;
use crate::config::TrackerConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStep {
    Queues,
    Issue,
    Attachments,
    AttachmentContent,
}

impl TrackerStep {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackerStep::Queues => "queues",
            TrackerStep::Issue => "issue",
            TrackerStep::Attachments => "attachments",
            TrackerStep::AttachmentContent => "attachment_content",
        }
    }
}

impl fmt::Display for TrackerStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker {step} returned status {status}")]
    Status {
        step: TrackerStep,
        status: u16,
        body: String,
    },
    #[error("tracker {step} request failed: {message}")]
    Transport { step: TrackerStep, message: String },
}

/// 调用凭据：令牌与组织 ID。
#[derive(Clone, Copy)]
pub struct TrackerAuth<'a> {
    pub token: &'a str,
    pub org_id: &'a str,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub key: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// 附件内容，以流的形式转交给上传。
pub struct AttachmentContent {
    pub body: reqwest::Body,
    pub length: Option<u64>,
    pub content_type: Option<String>,
}

/// 原样转发的响应：状态码与 JSON。
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerReply {
    pub status: u16,
    pub body: Value,
}

#[async_trait]
pub trait TrackerApi: Send + Sync {
    async fn queues(&self, auth: TrackerAuth<'_>) -> Result<TrackerReply, TrackerError>;

    async fn issue(&self, auth: TrackerAuth<'_>, key: &str) -> Result<Issue, TrackerError>;

    async fn attachments(
        &self,
        auth: TrackerAuth<'_>,
        key: &str,
    ) -> Result<Vec<AttachmentRef>, TrackerError>;

    async fn attachment_content(
        &self,
        auth: TrackerAuth<'_>,
        key: &str,
        attachment: &AttachmentRef,
    ) -> Result<AttachmentContent, TrackerError>;
}

#[derive(Clone, Debug)]
pub struct YandexTracker {
    client: Client,
    base_url: String,
}

impl YandexTracker {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn get(&self, path: &str, auth: TrackerAuth<'_>) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header(AUTHORIZATION, format!("OAuth {}", auth.token))
            .header("X-Org-ID", auth.org_id)
    }

    async fn send_ok(
        &self,
        step: TrackerStep,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, TrackerError> {
        let response = request.send().await.map_err(|err| transport(step, err))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Status { step, status, body });
        }
        Ok(response)
    }
}

fn transport(step: TrackerStep, err: reqwest::Error) -> TrackerError {
    TrackerError::Transport {
        step,
        message: err.to_string(),
    }
}

fn issue_path(key: &str) -> String {
    format!("/v2/issues/{}", crate::path::encode_segment(key))
}

#[async_trait]
impl TrackerApi for YandexTracker {
    async fn queues(&self, auth: TrackerAuth<'_>) -> Result<TrackerReply, TrackerError> {
        let step = TrackerStep::Queues;
        let response = self
            .get("/v3/queues/", auth)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| transport(step, err))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|err| transport(step, err))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|err| TrackerError::Transport {
                step,
                message: format!("invalid json: {err}"),
            })?
        };
        Ok(TrackerReply { status, body })
    }

    async fn issue(&self, auth: TrackerAuth<'_>, key: &str) -> Result<Issue, TrackerError> {
        let step = TrackerStep::Issue;
        let response = self.send_ok(step, self.get(&issue_path(key), auth)).await?;
        response.json().await.map_err(|err| transport(step, err))
    }

    async fn attachments(
        &self,
        auth: TrackerAuth<'_>,
        key: &str,
    ) -> Result<Vec<AttachmentRef>, TrackerError> {
        let step = TrackerStep::Attachments;
        let path = format!("{}/attachments", issue_path(key));
        let response = self.send_ok(step, self.get(&path, auth)).await?;
        response.json().await.map_err(|err| transport(step, err))
    }

    async fn attachment_content(
        &self,
        auth: TrackerAuth<'_>,
        key: &str,
        attachment: &AttachmentRef,
    ) -> Result<AttachmentContent, TrackerError> {
        let step = TrackerStep::AttachmentContent;
        let path = format!(
            "{}/attachments/{}",
            issue_path(key),
            crate::path::encode_segment(&attachment.id)
        );
        let request = self
            .get(&path, auth)
            .header(ACCEPT, "application/octet-stream");
        let response = self.send_ok(step, request).await?;
        let header_str = |name| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header_str(CONTENT_TYPE);
        let length = header_str(CONTENT_LENGTH).and_then(|value| value.parse().ok());
        Ok(AttachmentContent {
            body: reqwest::Body::wrap_stream(response.bytes_stream()),
            length,
            content_type,
        })
    }
}

/// 组织 ID：优先配置，其次请求头 `x-org-id`。
fn resolve_org_id(config: &TrackerConfig, headers: &HeaderMap) -> Option<String> {
    config.org_id.clone().or_else(|| {
        headers
            .get("x-org-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

/// 用会话令牌代理队列列表。
pub async fn list_queues(
    Extension(tracker): Extension<Arc<dyn TrackerApi>>,
    Extension(config): Extension<Arc<TrackerConfig>>,
    Extension(token): Extension<SessionToken>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let org_id = resolve_org_id(&config, &headers)
        .ok_or_else(|| ApiError::BadRequest("organization id is not configured".into()))?;
    let reply = tracker
        .queues(TrackerAuth {
            token: token.as_str(),
            org_id: &org_id,
        })
        .await?;

    if reply.status == StatusCode::UNAUTHORIZED.as_u16() {
        warn!("tracker rejected session token");
        return Err(ApiError::Unauthorized(
            "Unauthorized by Tracker: token invalid or expired".into(),
        ));
    }
    info!(status = reply.status, "queues proxied");
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, JsonResponse(reply.body)).into_response())
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet};

    /// 内存实现：固定任务与附件，可指定下载失败的附件。
    #[derive(Default)]
    pub(crate) struct FakeTracker {
        pub issues: HashMap<String, Issue>,
        pub attachments: HashMap<String, Vec<(AttachmentRef, &'static str)>>,
        pub broken: HashSet<String>,
        pub queues: Option<TrackerReply>,
    }

    impl FakeTracker {
        pub(crate) fn with_issue(
            mut self,
            key: &str,
            description: Option<&str>,
            files: &[(&str, &str, &'static str)],
        ) -> Self {
            self.issues.insert(
                key.to_string(),
                Issue {
                    key: key.to_string(),
                    summary: Some(format!("Summary of {key}")),
                    description: description.map(str::to_string),
                },
            );
            self.attachments.insert(
                key.to_string(),
                files
                    .iter()
                    .map(|(id, name, data)| {
                        (
                            AttachmentRef {
                                id: id.to_string(),
                                name: name.to_string(),
                            },
                            *data,
                        )
                    })
                    .collect(),
            );
            self
        }

        pub(crate) fn broken(mut self, id: &str) -> Self {
            self.broken.insert(id.to_string());
            self
        }
    }

    #[async_trait]
    impl TrackerApi for FakeTracker {
        async fn queues(&self, _auth: TrackerAuth<'_>) -> Result<TrackerReply, TrackerError> {
            Ok(self.queues.clone().unwrap_or(TrackerReply {
                status: 200,
                body: Value::Array(Vec::new()),
            }))
        }

        async fn issue(&self, _auth: TrackerAuth<'_>, key: &str) -> Result<Issue, TrackerError> {
            self.issues
                .get(key)
                .cloned()
                .ok_or_else(|| TrackerError::Status {
                    step: TrackerStep::Issue,
                    status: 404,
                    body: "Issue does not exist".into(),
                })
        }

        async fn attachments(
            &self,
            _auth: TrackerAuth<'_>,
            key: &str,
        ) -> Result<Vec<AttachmentRef>, TrackerError> {
            Ok(self
                .attachments
                .get(key)
                .map(|files| files.iter().map(|(r, _)| r.clone()).collect())
                .unwrap_or_default())
        }

        async fn attachment_content(
            &self,
            _auth: TrackerAuth<'_>,
            key: &str,
            attachment: &AttachmentRef,
        ) -> Result<AttachmentContent, TrackerError> {
            if self.broken.contains(&attachment.id) {
                return Err(TrackerError::Status {
                    step: TrackerStep::AttachmentContent,
                    status: 500,
                    body: "download failed".into(),
                });
            }
            let data = self
                .attachments
                .get(key)
                .and_then(|files| files.iter().find(|(r, _)| r.id == attachment.id))
                .map(|(_, data)| *data)
                .unwrap_or_default();
            Ok(AttachmentContent {
                body: reqwest::Body::from(data),
                length: Some(data.len() as u64),
                content_type: None,
            })
        }
    }
}
