//! Outbound mail transport.
//!
//! The campaign runner only needs the ability to send one HTML email
//! with optional inline attachments, async, possibly failing. That
//! capability is the [`MailTransport`] trait; [`SmtpMailer`] is the
//! lettre-backed production implementation.

pub mod bounce;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, SmtpSecurity};
use crate::content::InlineImage;
use crate::token::issue_token;

/// One outbound message handed to the transport.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    /// Sender display name. Kept separate from the address so names
    /// containing RFC 5322 specials (commas, quotes) survive intact.
    pub from_name: Option<String>,
    pub from_email: String,
    pub to: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<InlineImage>,
}

/// Transport acknowledgement for an accepted message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("message build failed: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("invalid attachment content type: {0}")]
    ContentType(String),

    #[error("smtp send failed: {0}")]
    Smtp(String),
}

impl MailError {
    /// Heuristic check whether this failure indicates the recipient
    /// address is invalid. Only transport failures carry a server
    /// verdict; local build errors never count.
    pub fn is_hard_bounce(&self) -> bool {
        match self {
            MailError::Smtp(detail) => bounce::looks_like_invalid_recipient("", detail, ""),
            _ => false,
        }
    }
}

/// Capability to send one email. Implemented by [`SmtpMailer`] in
/// production and by recording mocks in tests.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<SendReceipt, MailError>;
}

/// Lettre-backed SMTP transport with pooled connections.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build the transport from configuration.
    pub fn from_config(config: &Config) -> Result<Self, MailError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                .port(config.smtp_port)
                .timeout(Some(Duration::from_millis(config.smtp_timeout_ms)))
                .pool_config(PoolConfig::new().max_size(1));

        match config.smtp_security {
            SmtpSecurity::None => {
                builder = builder.tls(Tls::None);
            }
            SmtpSecurity::StartTls => {
                let params = tls_parameters(&config.smtp_host)?;
                builder = builder.tls(Tls::Required(params));
            }
            SmtpSecurity::Tls => {
                let params = tls_parameters(&config.smtp_host)?;
                builder = builder.tls(Tls::Wrapper(params));
            }
        }

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            security = ?config.smtp_security,
            auth_configured = config.smtp_user.is_some(),
            "smtp_transport_built"
        );

        Ok(Self {
            transport: builder.build(),
        })
    }

    /// Assemble the MIME message. HTML-only when there are no inline
    /// attachments, multipart/related otherwise.
    fn build_message(email: &OutgoingEmail) -> Result<(Message, String), MailError> {
        let from = Mailbox::new(email.from_name.clone(), email.from_email.parse()?);
        let sender_domain = email
            .from_email
            .rsplit('@')
            .next()
            .unwrap_or("localhost")
            .to_string();
        let message_id = format!("<{}@{}>", issue_token(), sender_domain);

        let mut builder = Message::builder()
            .from(from)
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()))
            .date_now();

        for to in &email.to {
            builder = builder.to(to.parse()?);
        }
        for bcc in &email.bcc {
            builder = builder.bcc(bcc.parse()?);
        }

        let html_part = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone());

        let message = if email.attachments.is_empty() {
            builder.singlepart(html_part)?
        } else {
            let mut related = MultiPart::related().singlepart(html_part);
            for att in &email.attachments {
                let content_type = ContentType::parse(&att.mime)
                    .map_err(|_| MailError::ContentType(att.mime.clone()))?;
                related = related.singlepart(
                    Attachment::new_inline(att.content_id.clone())
                        .body(att.content.clone(), content_type),
                );
            }
            builder.multipart(related)?
        };

        Ok((message, message_id))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<SendReceipt, MailError> {
        let (message, message_id) = Self::build_message(&email)?;

        debug!(
            to_count = email.to.len(),
            bcc_count = email.bcc.len(),
            attachment_count = email.attachments.len(),
            message_id = %message_id,
            "smtp_send_starting"
        );

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Smtp(error_chain(&e)))?;

        Ok(SendReceipt { message_id })
    }
}

/// Flatten an error and its sources into one searchable string. The
/// SMTP server's response text lives in the source chain, which is
/// what the bounce classifier needs to see.
fn error_chain(e: &(dyn std::error::Error)) -> String {
    let mut detail = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        detail.push_str(": ");
        detail.push_str(&s.to_string());
        source = s.source();
    }
    detail
}

fn tls_parameters(host: &str) -> Result<TlsParameters, MailError> {
    TlsParameters::builder(host.to_string())
        .build()
        .map_err(|e| MailError::Smtp(format!("TLS configuration failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(attachments: Vec<InlineImage>) -> OutgoingEmail {
        OutgoingEmail {
            from_name: Some("Mailer".to_string()),
            from_email: "mailer@example.com".to_string(),
            to: vec!["someone@example.com".to_string()],
            bcc: Vec::new(),
            subject: "Hello".to_string(),
            html: "<html><body>Hi</body></html>".to_string(),
            attachments,
        }
    }

    #[test]
    fn test_build_message_html_only() {
        let (message, message_id) = SmtpMailer::build_message(&email(Vec::new())).unwrap();

        assert!(message_id.ends_with("@example.com>"));
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn test_build_message_with_inline_attachment() {
        let att = InlineImage {
            filename: "inline-1.png".to_string(),
            content: vec![0x89, 0x50, 0x4e, 0x47],
            mime: "image/png".to_string(),
            content_id: "abc123".to_string(),
        };
        let (message, _) = SmtpMailer::build_message(&email(vec![att])).unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/related"));
        assert!(raw.contains("Content-ID: <abc123>"));
    }

    #[test]
    fn test_build_message_allows_specials_in_from_name() {
        let mut msg = email(Vec::new());
        msg.from_name = Some("Acme, Inc.".to_string());
        let (message, _) = SmtpMailer::build_message(&msg).unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Acme, Inc."));
        assert!(raw.contains("mailer@example.com"));
    }

    #[test]
    fn test_build_message_rejects_bad_from() {
        let mut bad = email(Vec::new());
        bad.from_email = "not an address".to_string();
        assert!(matches!(
            SmtpMailer::build_message(&bad),
            Err(MailError::Address(_))
        ));
    }

    #[test]
    fn test_hard_bounce_detection_on_smtp_error() {
        let err = MailError::Smtp("permanent error: 550 5.1.1 User unknown".to_string());
        assert!(err.is_hard_bounce());

        let err = MailError::Smtp("Connection timed out".to_string());
        assert!(!err.is_hard_bounce());
    }
}
