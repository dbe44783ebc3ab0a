use std::{io, path::PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const IMPLICIT_TLS_PORT: u16 = 465;
pub const DEFAULT_SENDER_NAME: &str = "AWS Cloud Club Univali";
pub const DEFAULT_EVENT_TITLE: &str = "1º Meetup AWS Cloud Club Univali";
pub const DEFAULT_SUBJECT: &str = "Seu Certificado - 1º Meetup AWS Cloud Club Univali";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Connection details for the outbound mail relay.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: Option<String>,
}

impl ChannelConfig {
    /// Assemble a config when host, user and password are all present and
    /// non-blank; otherwise mail delivery is unavailable for the run.
    pub fn from_parts(
        host: Option<String>,
        port: Option<u16>,
        user: Option<String>,
        password: Option<String>,
        from: Option<String>,
    ) -> Option<Self> {
        let host = non_blank(host)?;
        let user = non_blank(user)?;
        let password = password.filter(|value| !value.is_empty())?;
        Some(Self {
            host,
            port: port.unwrap_or(DEFAULT_SMTP_PORT),
            user,
            password,
            from: non_blank(from),
        })
    }

    /// Envelope sender: the explicit `from` address, else the login user.
    pub fn sender_address(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.user)
    }

    pub fn implicit_tls(&self) -> bool {
        self.port == IMPLICIT_TLS_PORT
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Wording of the certificate email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailTemplate {
    pub sender_name: String,
    pub subject: String,
    pub event_title: String,
}

impl Default for MailTemplate {
    fn default() -> Self {
        Self {
            sender_name: DEFAULT_SENDER_NAME.to_string(),
            subject: DEFAULT_SUBJECT.to_string(),
            event_title: DEFAULT_EVENT_TITLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// A fully composed message, independent of the transport that sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub sender_name: String,
    pub sender_address: String,
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
    pub attachment: MailAttachment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Skipped,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid mail address `{address}`: {reason}")]
    Address { address: String, reason: String },
    #[error("failed to read attachment `{path}`: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to build message: {0}")]
    Message(String),
    #[error("mail transport failed: {0}")]
    Transport(String),
}

impl DeliveryError {
    pub fn address(address: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Address {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Outbound mail transport shared by every dispatch in a run.
#[async_trait]
pub trait MailChannel: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), DeliveryError>;
}
