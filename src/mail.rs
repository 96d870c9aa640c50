//! 通知邮件：SMTP 发送与可替换的发送接口。

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::MailConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// 一封纯文本通知。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// 发送并返回 Message-ID。
    async fn send(&self, notification: Notification) -> Result<String, MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    domain: String,
}

impl SmtpMailer {
    /// 配置不完整时返回 None（不发送邮件）。
    pub fn from_config(config: &MailConfig) -> Result<Option<Self>, MailError> {
        let Some((user, password, recipient)) = config.account() else {
            return Ok(None);
        };

        let sender: Address = user.parse()?;
        let domain = sender.domain().to_string();
        let from = Mailbox::new(Some(config.from_name.clone()), sender);
        let to: Mailbox = recipient.parse()?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(user.to_string(), password.to_string()))
            .build();

        Ok(Some(Self {
            transport,
            from,
            to,
            domain,
        }))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, notification: Notification) -> Result<String, MailError> {
        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.domain);
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(notification.subject)
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body)?;
        self.transport.send(email).await?;
        info!(message_id, to = %self.to, "notification sent");
        Ok(message_id)
    }
}
