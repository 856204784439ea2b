//! SMTP delivery via lettre.
//!
//! A fresh transport is built for every send; the service sends one message
//! a day, so connection reuse buys nothing and a stale pooled connection
//! would only add a failure mode.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{MailError, MailSender, MenuEmail, MENU_IMAGE_CID};
use crate::config::MailSettings;

/// Per-command SMTP timeout.
pub const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Clone)]
pub struct SmtpMailer {
    settings: MailSettings,
}

impl SmtpMailer {
    pub fn new(settings: MailSettings) -> Self {
        Self { settings }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let host = self.settings.smtp_host.trim();
        let builder = if self.settings.smtp_use_tls && self.settings.smtp_port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|err| MailError::transport(err.to_string()))?
        } else if self.settings.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|err| MailError::transport(err.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };

        let mut builder = builder
            .port(self.settings.smtp_port)
            .timeout(Some(SMTP_TIMEOUT));

        if !self.settings.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.settings.smtp_username.clone(),
                self.settings.smtp_password.clone(),
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, email: &MenuEmail) -> Result<(), MailError> {
        let message = build_message(email)?;
        let transport = self.transport()?;

        let response = transport
            .send(message)
            .await
            .map_err(|err| MailError::transport(err.to_string()))?;

        tracing::debug!("SMTP server accepted message: {:?}", response.code());
        Ok(())
    }

    fn sender_name(&self) -> &str {
        "smtp"
    }
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.trim().parse::<Mailbox>().map_err(|err| MailError::Address {
        address: address.to_string(),
        message: err.to_string(),
    })
}

/// `multipart/related` { `multipart/alternative` { text, html }, inline PNG }.
pub fn build_message(email: &MenuEmail) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(mailbox(&email.from)?)
        .subject(email.subject.clone());
    for recipient in &email.to {
        builder = builder.to(mailbox(recipient)?);
    }

    let png = header::ContentType::parse("image/png")
        .map_err(|err| MailError::build(err.to_string()))?;
    let image = SinglePart::builder()
        .header(png)
        .header(header::ContentDisposition::inline_with_name(&email.image_filename))
        .header(header::ContentId::from(format!("<{}>", MENU_IMAGE_CID)))
        .body(email.image.clone());

    let body = MultiPart::related()
        .multipart(MultiPart::alternative_plain_html(
            email.text_body.clone(),
            email.html_body.clone(),
        ))
        .singlepart(image);

    builder
        .multipart(body)
        .map_err(|err| MailError::build(err.to_string()))
}
