//! Certificate email dispatch.
//!
//! Delivery is optional. Without a complete [`ChannelConfig`] the dispatcher
//! reports [`DispatchOutcome::Skipped`] and never touches the channel.

mod types;

use std::{path::Path, sync::Arc};

use tracing::debug;

pub use types::{
    ChannelConfig, DEFAULT_EVENT_TITLE, DEFAULT_SENDER_NAME, DEFAULT_SMTP_PORT, DEFAULT_SUBJECT,
    DeliveryError, DispatchOutcome, IMPLICIT_TLS_PORT, MailAttachment, MailChannel, MailTemplate,
    OutgoingMail, PDF_CONTENT_TYPE,
};

use crate::{config::MailSettings, domain::filename::attachment_file_name};

impl From<&MailSettings> for MailTemplate {
    fn from(settings: &MailSettings) -> Self {
        Self {
            sender_name: settings.sender_name.clone(),
            subject: settings.subject.clone(),
            event_title: settings.event_title.clone(),
        }
    }
}

impl ChannelConfig {
    /// Channel for this run, or `None` when mail is disabled or the SMTP
    /// fields are incomplete.
    pub fn from_settings(settings: &MailSettings) -> Option<Self> {
        if settings.disabled {
            return None;
        }
        Self::from_parts(
            settings.host.clone(),
            Some(settings.port),
            settings.user.clone(),
            settings.password.clone(),
            settings.from.clone(),
        )
    }
}

pub struct NotificationDispatcher {
    template: MailTemplate,
    channel: Option<(ChannelConfig, Arc<dyn MailChannel>)>,
}

impl NotificationDispatcher {
    /// Dispatcher that skips every notification.
    pub fn unconfigured(template: MailTemplate) -> Self {
        Self {
            template,
            channel: None,
        }
    }

    /// Dispatcher bound to `channel` when `config` is present; an absent
    /// config leaves the channel unused.
    pub fn new(
        template: MailTemplate,
        config: Option<ChannelConfig>,
        channel: Arc<dyn MailChannel>,
    ) -> Self {
        Self {
            template,
            channel: config.map(|config| (config, channel)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.channel.is_some()
    }

    pub async fn dispatch(
        &self,
        recipient: &str,
        participant_name: &str,
        attachment_path: &Path,
    ) -> Result<DispatchOutcome, DeliveryError> {
        let Some((config, channel)) = self.channel.as_ref() else {
            return Ok(DispatchOutcome::Skipped);
        };

        let bytes = tokio::fs::read(attachment_path)
            .await
            .map_err(|source| DeliveryError::Attachment {
                path: attachment_path.to_path_buf(),
                source,
            })?;
        let mail = compose(&self.template, config, recipient, participant_name, bytes);
        debug!(
            target = "certgen::notify",
            recipient,
            attachment = %mail.attachment.file_name,
            "Sending certificate email"
        );
        channel.send(mail).await?;
        Ok(DispatchOutcome::Sent)
    }
}

/// Build the certificate email for one participant.
pub fn compose(
    template: &MailTemplate,
    config: &ChannelConfig,
    recipient: &str,
    participant_name: &str,
    attachment: Vec<u8>,
) -> OutgoingMail {
    OutgoingMail {
        sender_name: template.sender_name.clone(),
        sender_address: config.sender_address().to_string(),
        recipient: recipient.to_string(),
        subject: template.subject.clone(),
        html_body: html_body(template, participant_name),
        attachment: MailAttachment {
            file_name: attachment_file_name(participant_name),
            content_type: PDF_CONTENT_TYPE,
            bytes: attachment,
        },
    }
}

fn html_body(template: &MailTemplate, participant_name: &str) -> String {
    format!(
        "<p>Olá, <strong>{participant_name}</strong>!</p>\n\
         <p>\n  Segue em anexo o seu certificado de participação no\n  \
         <strong>{event}</strong>.\n</p>\n\
         <p>\n  Foi um prazer ter você conosco. Esperamos vê-lo nos próximos eventos!\n</p>\n\
         <br>\n\
         <p>Atenciosamente,<br>Equipe {sender}</p>\n",
        event = template.event_title,
        sender = template.sender_name,
    )
}
