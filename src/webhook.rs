//! 跟踪系统 Webhook：复制任务附件到云盘，发布链接并发送通知邮件。

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json};
use axum::response::Json as JsonResponse;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::LinkMode;
use crate::error::ApiError;
use crate::mail::{Mailer, Notification};
use crate::naming::stem_of;
use crate::path::LogicalPath;
use crate::tracker::{Issue, TrackerApi, TrackerAuth};
use crate::upload::{FileFailed, FileResult, FileSaved, FileSource, Uploader};

const NO_DESCRIPTION: &str = "Нет описания";
const FILES_HEADING: &str = "Файлы по задаче:";

/// Webhook 运行所需的服务凭据与依赖。
pub struct WebhookContext {
    pub tracker: Arc<dyn TrackerApi>,
    pub uploader: Arc<Uploader>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub tracker_token: Option<String>,
    pub org_id: Option<String>,
    pub disk_token: Option<String>,
    pub link_mode: LinkMode,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebhookRequest {
    #[serde(default)]
    issue_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SharedFile {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSummary {
    pub success: bool,
    pub issue_key: String,
    pub results: Vec<FileResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_files: Option<Vec<SharedFile>>,
    pub email_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_error: Option<String>,
}

/// 处理 `{issueKey}` 事件；单个附件失败只记录并跳过。
pub async fn tracker_webhook(
    Extension(ctx): Extension<Arc<WebhookContext>>,
    payload: Result<Json<WebhookRequest>, JsonRejection>,
) -> Result<JsonResponse<WebhookSummary>, ApiError> {
    let Json(payload) = payload.map_err(|err| ApiError::BadRequest(err.body_text()))?;
    let issue_key = payload
        .issue_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No issueKey provided".into()))?;
    info!(issue_key = %issue_key, "tracker webhook triggered");

    let (Some(tracker_token), Some(org_id), Some(disk_token)) =
        (&ctx.tracker_token, &ctx.org_id, &ctx.disk_token)
    else {
        return Err(ApiError::Internal(
            "tracker webhook requires tracker token, org id and disk token".into(),
        ));
    };
    let auth = TrackerAuth {
        token: tracker_token,
        org_id,
    };

    let issue = ctx.tracker.issue(auth, &issue_key).await?;
    let folder = ctx.uploader.folder_path(&issue_key)?;
    let attachments = match ctx.tracker.attachments(auth, &issue_key).await {
        Ok(attachments) => attachments,
        Err(err) => {
            warn!(issue_key = %issue_key, error = %err, "attachment list unavailable, continuing without files");
            Vec::new()
        }
    };
    info!(issue_key = %issue_key, count = attachments.len(), "attachments found");

    let mut results = Vec::with_capacity(attachments.len());
    for attachment in &attachments {
        let outcome = async {
            let content = ctx
                .tracker
                .attachment_content(auth, &issue_key, attachment)
                .await
                .map_err(|err| err.to_string())?;
            let prefix = match stem_of(&attachment.name).trim() {
                "" => issue_key.as_str(),
                stem => stem,
            };
            ctx.uploader
                .upload(
                    disk_token,
                    &folder,
                    prefix,
                    FileSource {
                        original_name: attachment.name.clone(),
                        body: content.body,
                        length: content.length,
                        declared_type: content.content_type,
                    },
                )
                .await
                .map_err(|err| err.to_string())
        }
        .await;

        match outcome {
            Ok(descriptor) => results.push(FileResult::Saved(FileSaved {
                original_name: attachment.name.clone(),
                saved_as: descriptor.saved_as,
                folder: issue_key.clone(),
                path: descriptor.path,
            })),
            Err(err) => {
                warn!(
                    issue_key = %issue_key,
                    attachment = %attachment.name,
                    error = %err,
                    "attachment skipped"
                );
                results.push(FileResult::Failed(FileFailed {
                    original_name: attachment.name.clone(),
                    error: err,
                }));
            }
        }
    }

    let saved = results
        .iter()
        .filter_map(|result| match result {
            FileResult::Saved(saved) => Some(saved),
            FileResult::Failed(_) => None,
        })
        .collect::<Vec<_>>();
    let mut folder_url = None;
    let mut sent_files = None;
    match ctx.link_mode {
        LinkMode::Folder if !saved.is_empty() => {
            folder_url = share(&ctx.uploader, disk_token, &folder).await;
        }
        LinkMode::Files => {
            let mut links = Vec::new();
            for file in &saved {
                let Ok(path) = folder.join(&file.saved_as) else {
                    continue;
                };
                if let Some(url) = share(&ctx.uploader, disk_token, &path).await {
                    links.push(SharedFile {
                        name: file.original_name.clone(),
                        url,
                    });
                }
            }
            sent_files = Some(links);
        }
        _ => {}
    }

    let notification = compose_notification(&issue, folder_url.as_deref(), sent_files.as_deref());
    let (email_id, email_error) = match &ctx.mailer {
        Some(mailer) => match mailer.send(notification).await {
            Ok(id) => (Some(id), None),
            Err(err) => {
                error!(issue_key = %issue_key, error = %err, "notification failed");
                (None, Some(err.to_string()))
            }
        },
        None => {
            info!(issue_key = %issue_key, "mail disabled, notification skipped");
            (None, None)
        }
    };

    Ok(JsonResponse(WebhookSummary {
        success: true,
        issue_key,
        results,
        folder_url,
        sent_files,
        email_id,
        email_error,
    }))
}

/// 发布资源并读取公开链接，失败时返回 None。
async fn share(uploader: &Uploader, token: &str, path: &LogicalPath) -> Option<String> {
    let encoded = path.encoded();
    let result = async {
        uploader.disk().publish(token, &encoded).await?;
        uploader.disk().public_url(token, &encoded).await
    }
    .await;
    match result {
        Ok(Some(url)) => Some(url),
        Ok(None) => {
            warn!(path = %path, "published resource has no public url");
            None
        }
        Err(err) => {
            warn!(path = %path, error = %err, "publish failed");
            None
        }
    }
}

/// 邮件正文：任务描述，后附文件夹或逐个文件的链接。
pub fn compose_notification(
    issue: &Issue,
    folder_url: Option<&str>,
    files: Option<&[SharedFile]>,
) -> Notification {
    let mut body = issue
        .description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(NO_DESCRIPTION)
        .to_string();
    if let Some(url) = folder_url {
        body.push_str(&format!("\n\n{FILES_HEADING} {url}"));
    }
    if let Some(files) = files.filter(|files| !files.is_empty()) {
        body.push_str(&format!("\n\n{FILES_HEADING}\n"));
        let lines = files
            .iter()
            .map(|file| format!("- {}: {}", file.name, file.url))
            .collect::<Vec<_>>();
        body.push_str(&lines.join("\n"));
    }
    Notification {
        subject: format!(
            "Re: {}: {}",
            issue.key,
            issue.summary.as_deref().unwrap_or_default()
        ),
        body,
    }
}
