use async_trait::async_trait;
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use tracing::info;

use crate::application::notify::{ChannelConfig, DeliveryError, MailChannel, OutgoingMail};

/// SMTP relay channel backed by a single lettre transport reused for every
/// message in the run.
pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpChannel {
    /// Port 465 speaks TLS from the first byte; any other port upgrades with
    /// STARTTLS when the relay offers it.
    pub fn new(config: &ChannelConfig) -> Result<Self, DeliveryError> {
        let parameters =
            TlsParameters::new(config.host.clone()).map_err(DeliveryError::transport)?;
        let tls = if config.implicit_tls() {
            Tls::Wrapper(parameters)
        } else {
            Tls::Opportunistic(parameters)
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(tls)
            .credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl MailChannel for SmtpChannel {
    async fn send(&self, mail: OutgoingMail) -> Result<(), DeliveryError> {
        let recipient = mail.recipient.clone();
        let message = build_message(mail)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(DeliveryError::transport)?;
        info!(
            target = "certgen::smtp",
            recipient = %recipient,
            code = %response.code(),
            "Relay accepted certificate email"
        );
        Ok(())
    }
}

pub(crate) fn build_message(mail: OutgoingMail) -> Result<Message, DeliveryError> {
    let from = Mailbox::new(
        Some(mail.sender_name),
        parse_address(&mail.sender_address)?,
    );
    let to = Mailbox::new(None, parse_address(&mail.recipient)?);
    let content_type = ContentType::parse(mail.attachment.content_type)
        .map_err(|err| DeliveryError::Message(err.to_string()))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject)
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::html(mail.html_body))
                .singlepart(
                    Attachment::new(mail.attachment.file_name)
                        .body(mail.attachment.bytes, content_type),
                ),
        )
        .map_err(|err| DeliveryError::Message(err.to_string()))
}

fn parse_address(raw: &str) -> Result<Address, DeliveryError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|err| DeliveryError::address(raw, err))
}
