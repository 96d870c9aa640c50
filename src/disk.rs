//! 云盘 REST 客户端：资源检查、建目录、上传链接、内容上传与发布。

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// 云盘调用所处的步骤，用于错误定位。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskStep {
    CheckFolder,
    CreateFolder,
    UploadLink,
    UploadContent,
    Publish,
    ResourceInfo,
}

impl DiskStep {
    pub fn as_str(self) -> &'static str {
        match self {
            DiskStep::CheckFolder => "check_folder",
            DiskStep::CreateFolder => "create_folder",
            DiskStep::UploadLink => "upload_link",
            DiskStep::UploadContent => "upload_content",
            DiskStep::Publish => "publish",
            DiskStep::ResourceInfo => "resource_info",
        }
    }
}

impl fmt::Display for DiskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("{step} returned status {status}")]
    Status {
        step: DiskStep,
        status: u16,
        body: String,
    },
    #[error("{step} request failed: {message}")]
    Transport { step: DiskStep, message: String },
    #[error("content transfer interrupted: {0}")]
    Stream(String),
    #[error("{step} response is missing `{field}`")]
    MissingField {
        step: DiskStep,
        field: &'static str,
    },
}

impl DiskError {
    pub fn step(&self) -> DiskStep {
        match self {
            DiskError::Status { step, .. }
            | DiskError::Transport { step, .. }
            | DiskError::MissingField { step, .. } => *step,
            DiskError::Stream(_) => DiskStep::UploadContent,
        }
    }
}

/// 建目录结果：已存在与新建同样视为成功。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderCreated {
    Created,
    AlreadyExists,
}

/// 待上传的内容及其元信息。
pub struct UploadContent {
    pub body: reqwest::Body,
    pub content_type: String,
    pub length: Option<u64>,
}

/// 云盘后端操作。`path` 参数均为已编码的路径。
#[async_trait]
pub trait DiskApi: Send + Sync {
    /// 200 返回 true，404 返回 false，其余状态为错误。
    async fn folder_exists(&self, token: &str, path: &str) -> Result<bool, DiskError>;

    async fn create_folder(&self, token: &str, path: &str) -> Result<FolderCreated, DiskError>;

    /// 申请一次性上传地址（覆盖写）。
    async fn upload_link(&self, token: &str, path: &str) -> Result<String, DiskError>;

    async fn upload_content(&self, href: &str, content: UploadContent) -> Result<(), DiskError>;

    async fn publish(&self, token: &str, path: &str) -> Result<(), DiskError>;

    /// 资源的公开链接，未发布时为 None。
    async fn public_url(&self, token: &str, path: &str) -> Result<Option<String>, DiskError>;
}

#[derive(Deserialize)]
struct UploadLinkResponse {
    href: Option<String>,
}

#[derive(Deserialize)]
struct ResourceInfoResponse {
    public_url: Option<String>,
}

/// 基于 reqwest 的云盘 REST 实现。
#[derive(Clone, Debug)]
pub struct YandexDisk {
    client: Client,
    base_url: String,
}

impl YandexDisk {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// 编码路径原样放入查询串，避免二次编码。
    fn resource_url(&self, endpoint: &str, path: &str) -> String {
        format!("{}/v1/disk/resources{endpoint}?path={path}", self.base_url)
    }

    async fn send(&self, step: DiskStep, request: RequestBuilder) -> Result<Response, DiskError> {
        request.send().await.map_err(|err| DiskError::Transport {
            step,
            message: err.to_string(),
        })
    }
}

fn oauth_header(token: &str) -> String {
    format!("OAuth {token}")
}

async fn status_error(step: DiskStep, response: Response) -> DiskError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    DiskError::Status { step, status, body }
}

#[async_trait]
impl DiskApi for YandexDisk {
    async fn folder_exists(&self, token: &str, path: &str) -> Result<bool, DiskError> {
        let step = DiskStep::CheckFolder;
        let request = self
            .client
            .get(self.resource_url("", path))
            .header(AUTHORIZATION, oauth_header(token));
        let response = self.send(step, request).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(step, response).await),
        }
    }

    async fn create_folder(&self, token: &str, path: &str) -> Result<FolderCreated, DiskError> {
        let step = DiskStep::CreateFolder;
        let request = self
            .client
            .put(self.resource_url("", path))
            .header(AUTHORIZATION, oauth_header(token));
        let response = self.send(step, request).await?;
        match response.status() {
            status if status.is_success() => Ok(FolderCreated::Created),
            StatusCode::CONFLICT => {
                // 父目录缺失同样返回 409，需复查。
                let error = status_error(step, response).await;
                if self.folder_exists(token, path).await? {
                    Ok(FolderCreated::AlreadyExists)
                } else {
                    Err(error)
                }
            }
            _ => Err(status_error(step, response).await),
        }
    }

    async fn upload_link(&self, token: &str, path: &str) -> Result<String, DiskError> {
        let step = DiskStep::UploadLink;
        let url = format!("{}&overwrite=true", self.resource_url("/upload", path));
        let request = self
            .client
            .get(url)
            .header(AUTHORIZATION, oauth_header(token));
        let response = self.send(step, request).await?;
        if !response.status().is_success() {
            return Err(status_error(step, response).await);
        }
        let payload: UploadLinkResponse =
            response.json().await.map_err(|err| DiskError::Transport {
                step,
                message: err.to_string(),
            })?;
        payload
            .href
            .filter(|href| !href.is_empty())
            .ok_or(DiskError::MissingField {
                step,
                field: "href",
            })
    }

    async fn upload_content(&self, href: &str, content: UploadContent) -> Result<(), DiskError> {
        let step = DiskStep::UploadContent;
        let mut request = self
            .client
            .put(href)
            .header(CONTENT_TYPE, content.content_type);
        if let Some(length) = content.length {
            request = request.header(CONTENT_LENGTH, length);
        }
        let response = request
            .body(content.body)
            .send()
            .await
            .map_err(|err| DiskError::Stream(err.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(step, response).await);
        }
        debug!(status = response.status().as_u16(), "content uploaded");
        Ok(())
    }

    async fn publish(&self, token: &str, path: &str) -> Result<(), DiskError> {
        let step = DiskStep::Publish;
        let request = self
            .client
            .put(self.resource_url("/publish", path))
            .header(AUTHORIZATION, oauth_header(token));
        let response = self.send(step, request).await?;
        if !response.status().is_success() {
            return Err(status_error(step, response).await);
        }
        Ok(())
    }

    async fn public_url(&self, token: &str, path: &str) -> Result<Option<String>, DiskError> {
        let step = DiskStep::ResourceInfo;
        let request = self
            .client
            .get(self.resource_url("", path))
            .header(AUTHORIZATION, oauth_header(token));
        let response = self.send(step, request).await?;
        if !response.status().is_success() {
            return Err(status_error(step, response).await);
        }
        let info: ResourceInfoResponse =
            response.json().await.map_err(|err| DiskError::Transport {
                step,
                message: err.to_string(),
            })?;
        Ok(info.public_url)
    }
}

/// 内存实现，按顺序记录调用，供各模块测试使用。
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum DiskCall {
        Check(String),
        Create(String),
        UploadLink(String),
        UploadContent {
            href: String,
            content_type: String,
            bytes: Option<usize>,
        },
        Publish(String),
        Info(String),
    }

    #[derive(Default)]
    pub(crate) struct FakeDisk {
        existing: Mutex<HashSet<String>>,
        published: Mutex<HashSet<String>>,
        failures: Mutex<HashMap<(DiskStep, String), u16>>,
        lag: Mutex<HashMap<String, u32>>,
        visibility_lag: u32,
        calls: Mutex<Vec<DiskCall>>,
    }

    impl FakeDisk {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// 新建目录后前 `checks` 次检查仍报告不存在。
        pub(crate) fn with_visibility_lag(checks: u32) -> Self {
            Self {
                visibility_lag: checks,
                ..Self::default()
            }
        }

        pub(crate) fn with_existing(self, paths: &[&str]) -> Self {
            self.existing
                .lock()
                .unwrap()
                .extend(paths.iter().map(|p| p.to_string()));
            self
        }

        pub(crate) fn fail(self, step: DiskStep, key: &str, status: u16) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert((step, key.to_string()), status);
            self
        }

        pub(crate) fn calls(&self) -> Vec<DiskCall> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn href_for(path: &str) -> String {
            format!("https://upload.test/{path}")
        }

        fn record(&self, call: DiskCall) {
            self.calls.lock().unwrap().push(call);
        }

        fn check_failure(&self, step: DiskStep, key: &str) -> Result<(), DiskError> {
            match self.failures.lock().unwrap().get(&(step, key.to_string())) {
                Some(status) => Err(DiskError::Status {
                    step,
                    status: *status,
                    body: "injected".into(),
                }),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl DiskApi for FakeDisk {
        async fn folder_exists(&self, _token: &str, path: &str) -> Result<bool, DiskError> {
            self.record(DiskCall::Check(path.to_string()));
            self.check_failure(DiskStep::CheckFolder, path)?;
            if let Some(remaining) = self.lag.lock().unwrap().get_mut(path)
                && *remaining > 0
            {
                *remaining -= 1;
                return Ok(false);
            }
            Ok(self.existing.lock().unwrap().contains(path))
        }

        async fn create_folder(&self, _token: &str, path: &str) -> Result<FolderCreated, DiskError> {
            self.record(DiskCall::Create(path.to_string()));
            self.check_failure(DiskStep::CreateFolder, path)?;
            if !self.existing.lock().unwrap().insert(path.to_string()) {
                return Ok(FolderCreated::AlreadyExists);
            }
            self.lag
                .lock()
                .unwrap()
                .insert(path.to_string(), self.visibility_lag);
            Ok(FolderCreated::Created)
        }

        async fn upload_link(&self, _token: &str, path: &str) -> Result<String, DiskError> {
            self.record(DiskCall::UploadLink(path.to_string()));
            self.check_failure(DiskStep::UploadLink, path)?;
            Ok(Self::href_for(path))
        }

        async fn upload_content(&self, href: &str, content: UploadContent) -> Result<(), DiskError> {
            self.record(DiskCall::UploadContent {
                href: href.to_string(),
                content_type: content.content_type.clone(),
                bytes: content.body.as_bytes().map(<[u8]>::len),
            });
            self.check_failure(DiskStep::UploadContent, href)?;
            if let Some(path) = href.strip_prefix("https://upload.test/") {
                self.existing.lock().unwrap().insert(path.to_string());
            }
            Ok(())
        }

        async fn publish(&self, _token: &str, path: &str) -> Result<(), DiskError> {
            self.record(DiskCall::Publish(path.to_string()));
            self.check_failure(DiskStep::Publish, path)?;
            self.published.lock().unwrap().insert(path.to_string());
            Ok(())
        }

        async fn public_url(&self, _token: &str, path: &str) -> Result<Option<String>, DiskError> {
            self.record(DiskCall::Info(path.to_string()));
            self.check_failure(DiskStep::ResourceInfo, path)?;
            Ok(self
                .published
                .lock()
                .unwrap()
                .contains(path)
                .then(|| format!("https://disk.test/public/{path}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn disk(server: &MockServer) -> YandexDisk {
        YandexDisk::new(Client::new(), server.base_url())
    }

    #[tokio::test]
    async fn folder_exists_maps_status_codes() {
        let server = MockServer::start_async().await;
        let present = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/disk/resources")
                    .query_param("path", "Root/Q1")
                    .header("authorization", "OAuth secret");
                then.status(200).json_body(json!({"type": "dir"}));
            })
            .await;
        let missing = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/disk/resources")
                    .query_param("path", "Root/Q2");
                then.status(404);
            })
            .await;
        let broken = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/disk/resources")
                    .query_param("path", "Root/Q3");
                then.status(503).body("unavailable");
            })
            .await;

        let disk = disk(&server);
        assert!(disk.folder_exists("secret", "Root/Q1").await.expect("check"));
        assert!(!disk.folder_exists("secret", "Root/Q2").await.expect("check"));
        let err = disk
            .folder_exists("secret", "Root/Q3")
            .await
            .expect_err("503 is an error");
        assert!(matches!(
            err,
            DiskError::Status { step: DiskStep::CheckFolder, status: 503, ref body } if body == "unavailable"
        ));
        present.assert_async().await;
        missing.assert_async().await;
        broken.assert_async().await;
    }

    #[tokio::test]
    async fn create_folder_treats_conflict_as_existing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v1/disk/resources")
                    .query_param("path", "Root/new");
                then.status(201);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v1/disk/resources")
                    .query_param("path", "Root/raced");
                then.status(409)
                    .json_body(json!({"error": "DiskPathPointsToExistentDirectoryError"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/disk/resources")
                    .query_param("path", "Root/raced");
                then.status(200).json_body(json!({"type": "dir"}));
            })
            .await;

        let disk = disk(&server);
        assert_eq!(
            disk.create_folder("t", "Root/new").await.expect("create"),
            FolderCreated::Created
        );
        assert_eq!(
            disk.create_folder("t", "Root/raced").await.expect("create"),
            FolderCreated::AlreadyExists
        );
    }

    #[tokio::test]
    async fn create_folder_conflict_without_folder_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v1/disk/resources")
                    .query_param("path", "Root/Q1");
                then.status(409)
                    .json_body(json!({"error": "DiskPathDoesntExistsError"}));
            })
            .await;
        let recheck = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/disk/resources")
                    .query_param("path", "Root/Q1");
                then.status(404);
            })
            .await;

        let err = disk(&server)
            .create_folder("t", "Root/Q1")
            .await
            .expect_err("missing parent is not success");
        assert!(matches!(
            err,
            DiskError::Status { step: DiskStep::CreateFolder, status: 409, ref body }
                if body.contains("DiskPathDoesntExistsError")
        ));
        recheck.assert_async().await;
    }

    #[tokio::test]
    async fn upload_link_requests_overwrite_and_requires_href() {
        let server = MockServer::start_async().await;
        let link = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/disk/resources/upload")
                    .query_param("path", "Root/a.png")
                    .query_param("overwrite", "true");
                then.status(200)
                    .json_body(json!({"href": "https://uploader.test/put/1", "method": "PUT"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/disk/resources/upload")
                    .query_param("path", "Root/b.png");
                then.status(200).json_body(json!({"method": "PUT"}));
            })
            .await;

        let disk = disk(&server);
        let href = disk.upload_link("t", "Root/a.png").await.expect("link");
        assert_eq!(href, "https://uploader.test/put/1");
        link.assert_async().await;

        let err = disk
            .upload_link("t", "Root/b.png")
            .await
            .expect_err("href missing");
        assert!(matches!(err, DiskError::MissingField { field: "href", .. }));
    }

    #[tokio::test]
    async fn upload_content_puts_body_with_content_type() {
        let server = MockServer::start_async().await;
        let put = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/put/1")
                    .header("content-type", "image/png")
                    .body("pixels");
                then.status(201);
            })
            .await;

        let disk = disk(&server);
        disk.upload_content(
            &server.url("/put/1"),
            UploadContent {
                body: reqwest::Body::from("pixels"),
                content_type: "image/png".into(),
                length: Some(6),
            },
        )
        .await
        .expect("upload");
        put.assert_async().await;
    }

    #[tokio::test]
    async fn publish_then_read_public_url() {
        let server = MockServer::start_async().await;
        let publish = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v1/disk/resources/publish")
                    .query_param("path", "Root/KEY-1");
                then.status(200).json_body(json!({"href": "ignored"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/disk/resources")
                    .query_param("path", "Root/KEY-1");
                then.status(200)
                    .json_body(json!({"public_url": "https://disk.test/d/xyz"}));
            })
            .await;

        let disk = disk(&server);
        disk.publish("t", "Root/KEY-1").await.expect("publish");
        let url = disk.public_url("t", "Root/KEY-1").await.expect("info");
        assert_eq!(url.as_deref(), Some("https://disk.test/d/xyz"));
        publish.assert_async().await;
    }
}
