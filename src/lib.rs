//! mailblast - bulk email sender with per-recipient open tracking.
//!
//! Reads recipient addresses from a SQLite table, sends an uploaded
//! HTML template to each one over SMTP, rewrites inline base64 images
//! into CID attachments, injects a per-recipient tracking pixel, and
//! records send/read status per recipient.
//!
//! ## Architecture
//!
//! ```text
//! POST /api/send → CampaignRunner → SmtpMailer → recipient inboxes
//!                       ↓                              ↓
//!                 RecipientStore  ←  GET /t/{token}.png (pixel fetch)
//! ```

pub mod campaign;
pub mod config;
pub mod content;
pub mod mailer;
pub mod store;
pub mod token;
pub mod web;

// Re-export commonly used types
pub use campaign::{CampaignRunner, CampaignSummary, RecipientOutcome};
pub use config::Config;
pub use mailer::{MailTransport, SmtpMailer};
pub use store::RecipientStore;
pub use web::AppState;
