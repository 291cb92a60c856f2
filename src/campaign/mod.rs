//! Campaign orchestration: request validation, the sequential send
//! loop with throttling, the single-address resend path and the BCC
//! bulk variant.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::content::{inject_pixel, rewrite_inline_images};
use crate::mailer::{MailError, MailTransport, OutgoingEmail};
use crate::store::{Recipient, RecipientStore};
use crate::token::issue_token;

/// Minimum plausible template length after trimming.
const MIN_TEMPLATE_LEN: usize = 20;

/// Check the `local@domain.tld` shape with no embedded whitespace.
pub fn is_valid_email(addr: &str) -> bool {
    if addr.is_empty() || addr.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

/// Send mode selected by the request-level `mode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// One transport call per recipient, throttled, with tracking.
    Individual,
    /// One transport call with every valid recipient in BCC. No
    /// per-recipient tracking, no throttle.
    Bcc,
}

impl SendMode {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("bcc") => SendMode::Bcc,
            _ => SendMode::Individual,
        }
    }
}

/// Validated input for a bulk campaign.
#[derive(Debug, Clone)]
pub struct CampaignRequest {
    pub subject: String,
    pub from_name: String,
    pub from_email: String,
    pub html: String,
    pub mode: SendMode,
}

/// Input for the single-address resend path.
#[derive(Debug, Clone)]
pub struct SendOneRequest {
    pub to: String,
    pub subject: String,
    pub from_name: String,
    pub from_email: String,
    pub html: String,
}

/// Outcome for a single recipient.
#[derive(Debug, Clone, Serialize)]
pub struct RecipientOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub to: String,
    pub ok: bool,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecipientOutcome {
    fn sent(id: Option<i64>, to: String, message_id: String) -> Self {
        Self {
            id,
            to,
            ok: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    fn failed(id: Option<i64>, to: String, error: impl Into<String>) -> Self {
        Self {
            id,
            to,
            ok: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate result of one campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignSummary {
    pub total: usize,
    pub sent: usize,
    pub results: Vec<RecipientOutcome>,
}

impl CampaignSummary {
    fn from_results(results: Vec<RecipientOutcome>) -> Self {
        let sent = results.iter().filter(|r| r.ok).count();
        Self {
            total: results.len(),
            sent,
            results,
        }
    }
}

/// Request-level validation failure: the campaign is never started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Subject is required.")]
    MissingSubject,
    #[error("Valid From Email is required.")]
    InvalidFrom,
    #[error("HTML file is required (field name: template).")]
    MissingTemplate,
    #[error("HTML file looks empty.")]
    EmptyTemplate,
    #[error("Recipient (to) is required.")]
    MissingRecipient,
    #[error("Invalid recipient email.")]
    InvalidRecipient,
}

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("DB read failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Send(#[from] MailError),
}

/// Receipt for a successful single-address resend.
#[derive(Debug, Clone)]
pub struct SendOneReceipt {
    pub to: String,
    pub message_id: String,
}

fn validate_common(subject: &str, from_email: &str, html: &str) -> Result<(), ValidationError> {
    if subject.trim().is_empty() {
        return Err(ValidationError::MissingSubject);
    }
    if !is_valid_email(from_email) {
        return Err(ValidationError::InvalidFrom);
    }
    if html.trim().len() < MIN_TEMPLATE_LEN {
        return Err(ValidationError::EmptyTemplate);
    }
    Ok(())
}

/// Orchestrates send campaigns over the recipient store.
///
/// Sends are strictly sequential within one campaign, and the internal
/// mutex serializes concurrently triggered campaigns so two loops
/// never interleave writes over the same recipient set.
pub struct CampaignRunner {
    store: RecipientStore,
    mailer: Arc<dyn MailTransport>,
    public_base_url: Option<String>,
    send_delay: Duration,
    campaign_lock: Mutex<()>,
}

impl CampaignRunner {
    pub fn new(
        store: RecipientStore,
        mailer: Arc<dyn MailTransport>,
        public_base_url: Option<String>,
        send_delay: Duration,
    ) -> Self {
        Self {
            store,
            mailer,
            public_base_url,
            send_delay,
            campaign_lock: Mutex::new(()),
        }
    }

    /// Run one campaign over every stored recipient.
    ///
    /// Each per-recipient outcome is also pushed to `progress` as it
    /// completes, so long campaigns can report incrementally.
    pub async fn run(
        &self,
        request: CampaignRequest,
        progress: Option<mpsc::UnboundedSender<RecipientOutcome>>,
    ) -> Result<CampaignSummary, CampaignError> {
        validate_common(&request.subject, &request.from_email, &request.html)?;

        let _guard = self.campaign_lock.lock().await;

        let recipients = self.store.list_recipients().await?;
        info!(
            mode = ?request.mode,
            recipients = recipients.len(),
            "campaign_started"
        );

        let summary = match request.mode {
            SendMode::Individual => {
                self.run_individual(&request, recipients, progress.as_ref())
                    .await
            }
            SendMode::Bcc => self.run_bcc(&request, recipients).await,
        };

        info!(
            total = summary.total,
            sent = summary.sent,
            "campaign_complete"
        );
        Ok(summary)
    }

    async fn run_individual(
        &self,
        request: &CampaignRequest,
        recipients: Vec<Recipient>,
        progress: Option<&mpsc::UnboundedSender<RecipientOutcome>>,
    ) -> CampaignSummary {
        let mut results = Vec::with_capacity(recipients.len());

        for recipient in recipients {
            let to = recipient.email.trim().to_string();
            let valid_syntax = is_valid_email(&to);
            let token = issue_token();

            if let Err(e) = self
                .store
                .begin_attempt(recipient.id, &token, valid_syntax)
                .await
            {
                error!(id = recipient.id, error = %e, "store_begin_attempt_failed");
            }

            let (outcome, attempted) = if valid_syntax {
                let outcome = self
                    .attempt_send(request, Some(recipient.id), &to, &token)
                    .await;
                (outcome, true)
            } else {
                info!(id = recipient.id, "recipient_invalid_syntax");
                let outcome =
                    RecipientOutcome::failed(Some(recipient.id), to, "invalid email format");
                (outcome, false)
            };

            if let Some(tx) = progress {
                let _ = tx.send(outcome.clone());
            }
            results.push(outcome);

            // throttle between live sends to avoid remote rate limits
            if attempted {
                tokio::time::sleep(self.send_delay).await;
            }
        }

        CampaignSummary::from_results(results)
    }

    /// One transport call with every valid recipient blind-copied.
    /// The shared body cannot carry per-recipient pixels, so none is
    /// injected; inline images are still rewritten.
    async fn run_bcc(
        &self,
        request: &CampaignRequest,
        recipients: Vec<Recipient>,
    ) -> CampaignSummary {
        let mut results = Vec::with_capacity(recipients.len());
        let mut live: Vec<(i64, String)> = Vec::new();

        for recipient in recipients {
            let to = recipient.email.trim().to_string();
            let valid_syntax = is_valid_email(&to);
            let token = issue_token();

            if let Err(e) = self
                .store
                .begin_attempt(recipient.id, &token, valid_syntax)
                .await
            {
                error!(id = recipient.id, error = %e, "store_begin_attempt_failed");
            }

            if valid_syntax {
                live.push((recipient.id, to));
            } else {
                results.push(RecipientOutcome::failed(
                    Some(recipient.id),
                    to,
                    "invalid email format",
                ));
            }
        }

        if live.is_empty() {
            return CampaignSummary::from_results(results);
        }

        let (html, attachments) = rewrite_inline_images(&request.html);
        let email = OutgoingEmail {
            from_name: display_name(&request.from_name),
            from_email: request.from_email.clone(),
            to: Vec::new(),
            bcc: live.iter().map(|(_, to)| to.clone()).collect(),
            subject: request.subject.clone(),
            html,
            attachments,
        };

        match self.mailer.send(email).await {
            Ok(receipt) => {
                for (id, to) in live {
                    if let Err(e) = self.store.mark_sent(id).await {
                        error!(id, error = %e, "store_mark_sent_failed");
                    }
                    results.push(RecipientOutcome::sent(
                        Some(id),
                        to,
                        receipt.message_id.clone(),
                    ));
                }
            }
            Err(e) => {
                let still_valid = !e.is_hard_bounce();
                warn!(still_valid, error = %e, "bcc_send_failed");
                for (id, to) in live {
                    if let Err(se) = self.store.mark_send_failed(id, still_valid).await {
                        error!(id, error = %se, "store_mark_send_failed_failed");
                    }
                    results.push(RecipientOutcome::failed(Some(id), to, e.to_string()));
                }
            }
        }

        CampaignSummary::from_results(results)
    }

    /// Transform the template for one recipient, send it, persist the
    /// result. Store failures degrade that recipient's reported status
    /// but never propagate.
    async fn attempt_send(
        &self,
        request: &CampaignRequest,
        id: Option<i64>,
        to: &str,
        token: &str,
    ) -> RecipientOutcome {
        let (html, attachments) = rewrite_inline_images(&request.html);
        let html = inject_pixel(&html, token, self.public_base_url.as_deref());

        let email = OutgoingEmail {
            from_name: display_name(&request.from_name),
            from_email: request.from_email.clone(),
            to: vec![to.to_string()],
            bcc: Vec::new(),
            subject: request.subject.clone(),
            html,
            attachments,
        };

        match self.mailer.send(email).await {
            Ok(receipt) => {
                if let Some(id) = id {
                    if let Err(e) = self.store.mark_sent(id).await {
                        error!(id, error = %e, "store_mark_sent_failed");
                    }
                }
                info!(id = ?id, message_id = %receipt.message_id, "recipient_sent");
                RecipientOutcome::sent(id, to.to_string(), receipt.message_id)
            }
            Err(e) => {
                let still_valid = !e.is_hard_bounce();
                if let Some(id) = id {
                    if let Err(se) = self.store.mark_send_failed(id, still_valid).await {
                        error!(id, error = %se, "store_mark_send_failed_failed");
                    }
                }
                warn!(id = ?id, still_valid, error = %e, "recipient_send_failed");
                RecipientOutcome::failed(id, to.to_string(), e.to_string())
            }
        }
    }

    /// Resend to one explicit address, tolerating the absence of a
    /// matching store row.
    pub async fn send_one(&self, request: SendOneRequest) -> Result<SendOneReceipt, CampaignError> {
        if request.to.is_empty() {
            return Err(ValidationError::MissingRecipient.into());
        }
        if !is_valid_email(&request.to) {
            return Err(ValidationError::InvalidRecipient.into());
        }
        validate_common(&request.subject, &request.from_email, &request.html)?;

        let id = match self.store.find_by_address(&request.to).await {
            Ok(id) => id,
            Err(e) => {
                // graceful absence: resend works without a row
                error!(error = %e, "store_lookup_failed");
                None
            }
        };

        let token = issue_token();
        if let Some(id) = id {
            if let Err(e) = self.store.begin_attempt(id, &token, true).await {
                error!(id, error = %e, "store_begin_attempt_failed");
            }
        }

        let bulk = CampaignRequest {
            subject: request.subject.clone(),
            from_name: request.from_name.clone(),
            from_email: request.from_email.clone(),
            html: request.html.clone(),
            mode: SendMode::Individual,
        };

        let outcome = self.attempt_send(&bulk, id, &request.to, &token).await;

        match outcome.message_id {
            Some(message_id) => Ok(SendOneReceipt {
                to: request.to,
                message_id,
            }),
            None => Err(MailError::Smtp(
                outcome.error.unwrap_or_else(|| "send failed".to_string()),
            )
            .into()),
        }
    }
}

/// A blank display name means "send as the bare address".
fn display_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
