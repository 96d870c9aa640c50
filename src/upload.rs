//! 上传编排：确保目录、生成文件名、申请上传地址并推送内容。

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, Multipart};
use axum::response::Json as JsonResponse;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::auth::SessionToken;
use crate::disk::{DiskApi, DiskError, UploadContent};
use crate::ensure::{EnsureError, VisibilityPoll, ensure_folder};
use crate::error::ApiError;
use crate::naming::{SuffixGenerator, generate_name, resolve_content_type};
use crate::path::{LogicalPath, PathError};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("missing session token")]
    Unauthorized,
    #[error("missing required field `{0}`")]
    MissingParameters(&'static str),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Ensure(#[from] EnsureError),
    #[error(transparent)]
    Disk(#[from] DiskError),
}

/// 一次性上传地址及最终文件信息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDescriptor {
    pub href: String,
    pub path: String,
    pub saved_as: String,
}

/// 待上传文件：原始名称、内容与可选的声明类型。
pub struct FileSource {
    pub original_name: String,
    pub body: reqwest::Body,
    pub length: Option<u64>,
    pub declared_type: Option<String>,
}

/// 上传编排器，所有请求共享，自身不保存请求状态。
pub struct Uploader {
    disk: Arc<dyn DiskApi>,
    suffixes: Arc<dyn SuffixGenerator>,
    root: LogicalPath,
    poll: VisibilityPoll,
}

impl Uploader {
    pub fn new(
        disk: Arc<dyn DiskApi>,
        suffixes: Arc<dyn SuffixGenerator>,
        root: LogicalPath,
        poll: VisibilityPoll,
    ) -> Self {
        Self {
            disk,
            suffixes,
            root,
            poll,
        }
    }

    pub fn disk(&self) -> &dyn DiskApi {
        self.disk.as_ref()
    }

    /// 根目录下的业务目录。
    pub fn folder_path(&self, folder: &str) -> Result<LogicalPath, PathError> {
        self.root.join(folder)
    }

    /// 确保目录存在并申请上传地址，不传输内容。
    pub async fn prepare(
        &self,
        token: &str,
        folder: &LogicalPath,
        prefix: &str,
        original_name: &str,
    ) -> Result<UploadDescriptor, UploadError> {
        if token.trim().is_empty() {
            return Err(UploadError::Unauthorized);
        }
        if prefix.trim().is_empty() {
            return Err(UploadError::MissingParameters("subfolder"));
        }
        if original_name.trim().is_empty() {
            return Err(UploadError::MissingParameters("filename"));
        }

        ensure_folder(self.disk.as_ref(), token, folder, self.poll).await?;

        let new_name = generate_name(prefix, original_name, self.suffixes.as_ref());
        let file_path = folder.join(&new_name)?;
        let saved_as = file_path
            .segments()
            .last()
            .cloned()
            .unwrap_or(new_name);
        let href = self.disk.upload_link(token, &file_path.encoded()).await?;

        Ok(UploadDescriptor {
            href,
            path: file_path.to_string(),
            saved_as,
        })
    }

    /// 完整上传：准备后将内容推送到一次性地址。
    pub async fn upload(
        &self,
        token: &str,
        folder: &LogicalPath,
        prefix: &str,
        source: FileSource,
    ) -> Result<UploadDescriptor, UploadError> {
        let descriptor = self
            .prepare(token, folder, prefix, &source.original_name)
            .await?;
        let content_type =
            resolve_content_type(&source.original_name, source.declared_type.as_deref());
        self.disk
            .upload_content(
                &descriptor.href,
                UploadContent {
                    body: source.body,
                    content_type,
                    length: source.length,
                },
            )
            .await?;
        info!(
            original = %source.original_name,
            path = %descriptor.path,
            "file uploaded"
        );
        Ok(descriptor)
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadUrlRequest {
    #[serde(default)]
    folder: Option<String>,
    #[serde(default)]
    subfolder: Option<String>,
    #[serde(default, alias = "fileName")]
    filename: Option<String>,
}

/// 返回请求中的非空字段，否则报 400。
fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing required field `{name}`")))
}

/// 申请上传地址，客户端随后直接向该地址上传。
pub async fn get_upload_url(
    Extension(uploader): Extension<Arc<Uploader>>,
    Extension(token): Extension<SessionToken>,
    payload: Result<Json<UploadUrlRequest>, JsonRejection>,
) -> Result<JsonResponse<UploadDescriptor>, ApiError> {
    let Json(payload) = payload.map_err(|err| ApiError::BadRequest(err.body_text()))?;
    let folder = required(&payload.folder, "folder")?;
    let subfolder = required(&payload.subfolder, "subfolder")?;
    let filename = required(&payload.filename, "filename")?;

    let folder_path = uploader.folder_path(folder)?;
    let descriptor = uploader
        .prepare(token.as_str(), &folder_path, subfolder, filename)
        .await?;
    info!(path = %descriptor.path, "upload url issued");
    Ok(JsonResponse(descriptor))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSaved {
    pub original_name: String,
    pub saved_as: String,
    pub folder: String,
    pub path: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileFailed {
    pub original_name: String,
    pub error: String,
}

/// 单个文件的处理结果。
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FileResult {
    Saved(FileSaved),
    Failed(FileFailed),
}

impl FileResult {
    pub fn is_saved(&self) -> bool {
        matches!(self, FileResult::Saved(_))
    }
}

#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub message: String,
    pub results: Vec<FileResult>,
}

struct SpooledFile {
    original_name: String,
    declared_type: Option<String>,
    file: File,
    length: u64,
}

/// 多部分表单上传：文件先落到临时文件，字段齐全后再逐个推送。
pub async fn upload_files(
    Extension(uploader): Extension<Arc<Uploader>>,
    Extension(token): Extension<SessionToken>,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadSummary>, ApiError> {
    let mut folder = None;
    let mut subfolder = None;
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "folder" => folder = Some(field.text().await?),
            "subfolder" => subfolder = Some(field.text().await?),
            "file" => {
                let original_name = field.file_name().unwrap_or("file").to_string();
                let declared_type = field.content_type().map(str::to_string);
                let std_file =
                    tempfile::tempfile().map_err(|err| ApiError::Internal(err.to_string()))?;
                let mut file = File::from_std(std_file);
                let mut length: u64 = 0;
                while let Some(chunk) = field.chunk().await? {
                    length += chunk.len() as u64;
                    file.write_all(&chunk)
                        .await
                        .map_err(|err| ApiError::Internal(err.to_string()))?;
                }
                file.flush()
                    .await
                    .map_err(|err| ApiError::Internal(err.to_string()))?;
                file.rewind()
                    .await
                    .map_err(|err| ApiError::Internal(err.to_string()))?;
                files.push(SpooledFile {
                    original_name,
                    declared_type,
                    file,
                    length,
                });
            }
            _ => {}
        }
    }

    let folder = required(&folder, "folder")?.to_string();
    let subfolder = required(&subfolder, "subfolder")?.to_string();
    if files.is_empty() {
        return Err(ApiError::BadRequest("missing required field `file`".into()));
    }
    let folder_path = uploader.folder_path(&folder)?;

    let mut results = Vec::with_capacity(files.len());
    for spooled in files {
        let original_name = spooled.original_name;
        let source = FileSource {
            original_name: original_name.clone(),
            body: reqwest::Body::wrap_stream(ReaderStream::new(spooled.file)),
            length: Some(spooled.length),
            declared_type: spooled.declared_type,
        };
        match uploader
            .upload(token.as_str(), &folder_path, &subfolder, source)
            .await
        {
            Ok(descriptor) => results.push(FileResult::Saved(FileSaved {
                original_name,
                saved_as: descriptor.saved_as,
                folder: folder.clone(),
                path: descriptor.path,
            })),
            Err(err) => {
                warn!(original = %original_name, error = %err, "file upload failed");
                results.push(FileResult::Failed(FileFailed {
                    original_name,
                    error: err.to_string(),
                }));
            }
        }
    }

    let saved = results.iter().filter(|r| r.is_saved()).count();
    Ok(JsonResponse(UploadSummary {
        message: format!(
            "Saved {saved} of {} file(s) to \"{folder}\"",
            results.len()
        ),
        results,
    }))
}
