//! CLI arguments, environment configuration and per-component settings.

use clap::Parser;
use std::time::Duration;

use crate::path::LogicalPath;

pub const SESSION_COOKIE_NAME: &str = "accessToken";
pub const OAUTH_SCOPE: &str = "cloud_api:disk.read cloud_api:disk.write tracker:write tracker:read";
pub const DEFAULT_OAUTH_BASE_URL: &str = "https://oauth.yandex.ru";
pub const DEFAULT_DISK_API_URL: &str = "https://cloud-api.yandex.net";
pub const DEFAULT_TRACKER_API_URL: &str = "https://api.tracker.yandex.net";
pub const DEFAULT_DISK_ROOT: &str = "Системы ТАУ - Общее/Фото ТАУ контроль";
pub const DEFAULT_SMTP_HOST: &str = "smtp.yandex.ru";
pub const DEFAULT_SMTP_PORT: u16 = 465;
pub const DEFAULT_MAIL_FROM_NAME: &str = "QC TAU";
pub const DEFAULT_HTTP_PORT: u16 = 3000;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 512 * 1024 * 1024;
pub const DEFAULT_NAME_SUFFIX_LEN: usize = 4;
pub const MIN_NAME_SUFFIX_LEN: usize = 4;
pub const MAX_NAME_SUFFIX_LEN: usize = 6;
pub const DEFAULT_VISIBILITY_ATTEMPTS: u32 = 3;
pub const DEFAULT_VISIBILITY_BACKOFF_MS: u64 = 200;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "disk-bridge", version, about = "Disk / Tracker bridge server")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "BRIDGE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "BRIDGE_HTTP_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "BRIDGE_HTTPS_PORT",
        help = "HTTPS port (TLS listener is disabled when unset)"
    )]
    pub https_port: Option<u16>,
    #[arg(short = 'c', long, env = "BRIDGE_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "BRIDGE_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "BRIDGE_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "BRIDGE_STATIC_DIR",
        help = "Directory served as the browser application root"
    )]
    pub static_dir: Option<String>,

    #[arg(long, env = "CLIENT_ID", default_value = "", help = "OAuth client id")]
    pub client_id: String,
    #[arg(
        long,
        env = "CLIENT_SECRET",
        default_value = "",
        hide_env_values = true,
        help = "OAuth client secret"
    )]
    pub client_secret: String,
    #[arg(
        long,
        env = "REDIRECT_URI",
        default_value = "",
        help = "OAuth redirect URI registered with the provider"
    )]
    pub redirect_uri: String,
    #[arg(
        long,
        env = "OAUTH_BASE_URL",
        default_value = DEFAULT_OAUTH_BASE_URL,
        help = "OAuth provider base URL"
    )]
    pub oauth_base_url: String,

    #[arg(
        long,
        env = "DISK_API_URL",
        default_value = DEFAULT_DISK_API_URL,
        help = "Storage API base URL"
    )]
    pub disk_api_url: String,
    #[arg(
        long,
        env = "DISK_ROOT",
        default_value = DEFAULT_DISK_ROOT,
        help = "Slash separated root folder for uploads"
    )]
    pub disk_root: String,
    #[arg(
        long,
        env = "DISK_TOKEN",
        hide_env_values = true,
        help = "Storage service token used by the tracker webhook"
    )]
    pub disk_token: Option<String>,
    #[arg(
        long,
        env = "FOLDER_VISIBILITY_ATTEMPTS",
        default_value_t = DEFAULT_VISIBILITY_ATTEMPTS,
        help = "Existence polls after folder creation (0 to disable)"
    )]
    pub folder_visibility_attempts: u32,
    #[arg(
        long,
        env = "FOLDER_VISIBILITY_BACKOFF_MS",
        default_value_t = DEFAULT_VISIBILITY_BACKOFF_MS,
        help = "Initial backoff between visibility polls in milliseconds"
    )]
    pub folder_visibility_backoff_ms: u64,
    #[arg(
        long,
        env = "NAME_SUFFIX_LEN",
        default_value_t = DEFAULT_NAME_SUFFIX_LEN,
        help = "Random suffix length for generated file names (4-6)"
    )]
    pub name_suffix_len: usize,

    #[arg(
        long,
        env = "TRACKER_API_URL",
        default_value = DEFAULT_TRACKER_API_URL,
        help = "Tracker API base URL"
    )]
    pub tracker_api_url: String,
    #[arg(long, env = "TRACKER_ORG_ID", help = "Tracker organization id")]
    pub tracker_org_id: Option<String>,
    #[arg(
        long,
        env = "TRACKER_TOKEN",
        hide_env_values = true,
        help = "Tracker service token used by the webhook"
    )]
    pub tracker_token: Option<String>,
    #[arg(
        long,
        env = "WEBHOOK_LINK_MODE",
        value_enum,
        default_value_t = LinkMode::Folder,
        help = "Links included in webhook notifications"
    )]
    pub webhook_link_mode: LinkMode,

    #[arg(long, env = "SMTP_HOST", default_value = DEFAULT_SMTP_HOST, help = "SMTP relay host")]
    pub smtp_host: String,
    #[arg(
        long,
        env = "SMTP_PORT",
        default_value_t = DEFAULT_SMTP_PORT,
        help = "SMTP relay port (implicit TLS)"
    )]
    pub smtp_port: u16,
    #[arg(long, env = "MAIL_USER", help = "SMTP account, also used as sender")]
    pub mail_user: Option<String>,
    #[arg(
        long,
        env = "MAIL_PASS",
        hide_env_values = true,
        help = "SMTP account password"
    )]
    pub mail_pass: Option<String>,
    #[arg(long, env = "MAIL_TO", help = "Notification recipient")]
    pub mail_to: Option<String>,
    #[arg(
        long,
        env = "MAIL_FROM_NAME",
        default_value = DEFAULT_MAIL_FROM_NAME,
        help = "Display name of the notification sender"
    )]
    pub mail_from_name: String,

    #[arg(
        long,
        env = "UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max multipart upload body size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
}

/// Which shareable links the tracker webhook publishes.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkMode {
    Folder,
    Files,
    None,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct DiskConfig {
    pub api_url: String,
    pub root: LogicalPath,
    pub service_token: Option<String>,
    pub visibility_attempts: u32,
    pub visibility_backoff: Duration,
    pub suffix_len: usize,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub api_url: String,
    pub org_id: Option<String>,
    pub service_token: Option<String>,
    pub link_mode: LinkMode,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub recipient: Option<String>,
    pub from_name: String,
}

impl MailConfig {
    /// `(user, password, recipient)`; mail is sent only when all are configured.
    pub fn account(&self) -> Option<(&str, &str, &str)> {
        Some((
            self.user.as_deref()?,
            self.password.as_deref()?,
            self.recipient.as_deref()?,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_body_size: u64,
}

impl Args {
    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uri: self.redirect_uri.clone(),
            base_url: trim_base_url(&self.oauth_base_url),
        }
    }

    pub fn disk_config(&self) -> Result<DiskConfig, crate::path::PathError> {
        Ok(DiskConfig {
            api_url: trim_base_url(&self.disk_api_url),
            root: LogicalPath::parse(&self.disk_root)?,
            service_token: non_empty(&self.disk_token),
            visibility_attempts: self.folder_visibility_attempts,
            visibility_backoff: Duration::from_millis(self.folder_visibility_backoff_ms),
            suffix_len: self
                .name_suffix_len
                .clamp(MIN_NAME_SUFFIX_LEN, MAX_NAME_SUFFIX_LEN),
        })
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            api_url: trim_base_url(&self.tracker_api_url),
            org_id: non_empty(&self.tracker_org_id),
            service_token: non_empty(&self.tracker_token),
            link_mode: self.webhook_link_mode,
        }
    }

    pub fn mail_config(&self) -> MailConfig {
        MailConfig {
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.smtp_port,
            user: non_empty(&self.mail_user),
            password: non_empty(&self.mail_pass),
            recipient: non_empty(&self.mail_to),
            from_name: self.mail_from_name.clone(),
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            max_body_size: self.upload_max_size,
        }
    }
}

fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
