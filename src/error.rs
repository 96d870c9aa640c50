//! 统一的 API 错误类型与 JSON 错误信封。

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value, json};
use tracing::error;

use crate::disk::DiskError;
use crate::ensure::EnsureError;
use crate::path::PathError;
use crate::tracker::TrackerError;
use crate::upload::UploadError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    PayloadTooLarge(String),
    Upstream {
        status: StatusCode,
        step: &'static str,
        message: String,
        details: Option<String>,
    },
    Internal(String),
}

impl ApiError {
    /// 上游返回错误状态时透传，其余情况按 500 处理。
    pub fn upstream(
        status: u16,
        step: &'static str,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        let status = StatusCode::from_u16(status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError::Upstream {
            status,
            step,
            message: message.into(),
            details: details.filter(|d| !d.is_empty()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upstream { status, .. } => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 生成 `{error, ...details}` 错误信封。
    pub fn envelope(&self) -> Value {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::PayloadTooLarge(msg) => json!({ "error": msg }),
            ApiError::Upstream {
                step,
                message,
                details,
                ..
            } => {
                let mut body = Map::new();
                body.insert("error".into(), Value::from(message.as_str()));
                body.insert("step".into(), Value::from(*step));
                if let Some(details) = details {
                    body.insert("details".into(), Value::from(details.as_str()));
                }
                Value::Object(body)
            }
            ApiError::Internal(_) => json!({ "error": "Internal Server Error" }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            error!(detail = %detail, "internal error");
        }
        (self.status(), Json(self.envelope())).into_response()
    }
}

impl From<PathError> for ApiError {
    fn from(error: PathError) -> Self {
        ApiError::BadRequest(error.to_string())
    }
}

impl From<DiskError> for ApiError {
    fn from(error: DiskError) -> Self {
        let step = error.step().as_str();
        match error {
            DiskError::Status { status, body, .. } => {
                ApiError::upstream(status, step, format!("storage {step} failed"), Some(body))
            }
            other => ApiError::upstream(0, step, other.to_string(), None),
        }
    }
}

impl From<EnsureError> for ApiError {
    fn from(error: EnsureError) -> Self {
        let message = error.to_string();
        let disk = error.disk_error();
        let status = match disk {
            DiskError::Status { status, .. } => *status,
            _ => 0,
        };
        let details = match disk {
            DiskError::Status { body, .. } => Some(body.clone()),
            _ => None,
        };
        ApiError::upstream(status, disk.step().as_str(), message, details)
    }
}

/// 保留多部分表单错误自带的状态（超出大小限制为 413）。
impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        match error.status() {
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge(error.body_text()),
            _ => ApiError::BadRequest(error.body_text()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::Unauthorized => ApiError::Unauthorized("missing session token".into()),
            UploadError::MissingParameters(field) => {
                ApiError::BadRequest(format!("missing required field `{field}`"))
            }
            UploadError::Path(err) => err.into(),
            UploadError::Ensure(err) => err.into(),
            UploadError::Disk(err) => err.into(),
        }
    }
}

impl From<TrackerError> for ApiError {
    fn from(error: TrackerError) -> Self {
        match error {
            TrackerError::Status { step, status, body } => ApiError::upstream(
                status,
                step.as_str(),
                format!("tracker {step} failed"),
                Some(body),
            ),
            TrackerError::Transport { step, message } => {
                ApiError::upstream(0, step.as_str(), message, None)
            }
        }
    }
}
