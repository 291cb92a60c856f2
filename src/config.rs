//! Configuration module for environment variable parsing.

use std::env;
use tracing::warn;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    None,
    StartTls,
    Tls,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SMTP relay host
    pub smtp_host: String,

    /// SMTP relay port
    pub smtp_port: u16,

    /// SMTP username; also the default From address
    pub smtp_user: Option<String>,

    /// SMTP password
    pub smtp_pass: Option<String>,

    /// Connection security mode (none / starttls / tls)
    pub smtp_security: SmtpSecurity,

    /// SMTP I/O timeout in milliseconds
    pub smtp_timeout_ms: u64,

    /// Display name used when the request does not supply one
    pub from_name: String,

    /// Externally reachable base URL for tracking-pixel links.
    /// Pixel injection is silently disabled when unset.
    pub public_base_url: Option<String>,

    /// Path of the SQLite recipient database
    pub sqlite_path: String,

    /// Port for the web server to listen on
    pub port: u16,

    /// Fixed delay between individual sends in milliseconds
    pub send_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            smtp_host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),

            smtp_port: env::var("SMTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25),

            smtp_user: env::var("SMTP_USER").ok().filter(|v| !v.is_empty()),

            smtp_pass: env::var("SMTP_PASS").ok().filter(|v| !v.is_empty()),

            smtp_security: parse_security("SMTP_SECURITY", SmtpSecurity::None),

            smtp_timeout_ms: env::var("SMTP_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),

            from_name: env::var("FROM_NAME").unwrap_or_else(|_| "Mailer".to_string()),

            public_base_url: env::var("PUBLIC_BASE_URL")
                .ok()
                .and_then(|v| trim_base_url(&v)),

            sqlite_path: env::var("SQLITE_PATH").unwrap_or_else(|_| "./db.sqlite".to_string()),

            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),

            send_delay_ms: env::var("SEND_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
        }
    }
}

/// Parse an SMTP security mode, falling back to the default on
/// unknown values.
fn parse_security(name: &str, default: SmtpSecurity) -> SmtpSecurity {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "none" => SmtpSecurity::None,
        "starttls" => SmtpSecurity::StartTls,
        "tls" => SmtpSecurity::Tls,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid SMTP security mode, using default");
            default
        }
    }
}

/// Normalize the public base URL: strip trailing slashes, treat an
/// empty value as unset.
fn trim_base_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
