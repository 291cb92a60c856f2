//! HTTP endpoint handlers: tracking pixel, status listings and the
//! two send endpoints.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::campaign::{
    is_valid_email, CampaignError, CampaignRequest, CampaignRunner, SendMode, SendOneRequest,
    ValidationError,
};
use crate::config::Config;
use crate::store::RecipientStore;

/// Stored user-agent strings are capped to bound storage.
const MAX_AGENT_LEN: usize = 300;

/// 1x1 transparent PNG served for every tracking request.
static TRACKING_PIXEL: [u8; 68] = [
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x04, 0x00, 0x00, 0x00, 0xb5,
    0x1c, 0x0c, 0x02, 0x00, 0x00, 0x00, 0x0b, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0xfc,
    0xff, 0x1f, 0x00, 0x03, 0x03, 0x01, 0xff, 0xa5, 0xfd, 0x97, 0x77, 0x00, 0x00, 0x00, 0x00,
    0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: RecipientStore,
    pub runner: Arc<CampaignRunner>,
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Tracking Pixel
// =============================================================================

/// `GET /t/{token}.png` — mark the matching recipient read and always
/// answer with a valid pixel. Mail clients must never see a broken
/// image, and the response must not reveal whether the token matched.
pub async fn tracking_pixel(
    State(state): State<AppState>,
    Path(raw_token): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let token = trim_token(&raw_token);
    if token.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let ip = client_ip(&headers, addr);
    let agent: String = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .chars()
        .take(MAX_AGENT_LEN)
        .collect();

    match state.store.mark_read(token, &ip, &agent).await {
        Ok(matched) => info!(matched, ip = %ip, "pixel_hit"),
        Err(e) => error!(error = %e, "pixel_store_update_failed"),
    }

    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        TRACKING_PIXEL.as_slice(),
    )
        .into_response()
}

/// Strip the file-extension suffix from the captured path segment.
fn trim_token(raw: &str) -> &str {
    raw.split('.').next().unwrap_or("").trim()
}

/// Pick the requester's apparent IP, preferring trusted proxy headers
/// and taking only the first comma-separated value.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    for name in ["cf-connecting-ip", "x-forwarded-for"] {
        let first = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .unwrap_or("");
        if !first.is_empty() {
            return first.to_string();
        }
    }
    addr.ip().to_string()
}

// =============================================================================
// Status Listings
// =============================================================================

/// `GET /api/status` — all recipient rows, newest first.
pub async fn status(State(state): State<AppState>) -> Response {
    match state.store.status_rows().await {
        Ok(rows) => (StatusCode::OK, Json(json!({ "ok": true, "rows": rows }))).into_response(),
        Err(e) => {
            error!(error = %e, "status_read_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "DB read failed.", "details": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// `GET /api/recipients` — deduplicated, syntax-valid addresses only.
pub async fn recipients(State(state): State<AppState>) -> Response {
    match state.store.addresses().await {
        Ok(addresses) => {
            let mut seen = HashSet::new();
            let recipients: Vec<String> = addresses
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| is_valid_email(a))
                .filter(|a| seen.insert(a.clone()))
                .collect();

            (
                StatusCode::OK,
                Json(json!({ "ok": true, "recipients": recipients })),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "recipients_read_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "DB read failed.", "details": e.to_string() })),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Send Endpoints
// =============================================================================

/// Fields collected from the multipart upload shared by both send
/// endpoints.
#[derive(Default)]
struct UploadForm {
    to: String,
    subject: String,
    from_name: Option<String>,
    from_email: Option<String>,
    mode: Option<String>,
    template: Option<String>,
}

async fn read_upload_form(multipart: &mut Multipart) -> anyhow::Result<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await? {
        match field.name().unwrap_or("") {
            "to" => form.to = field.text().await?.trim().to_string(),
            "subject" => form.subject = field.text().await?.trim().to_string(),
            "fromName" => form.from_name = Some(field.text().await?.trim().to_string()),
            "fromEmail" => form.from_email = Some(field.text().await?.trim().to_string()),
            "mode" => form.mode = Some(field.text().await?.trim().to_string()),
            "template" => {
                let bytes = field.bytes().await?;
                form.template = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            other => warn!(field = other, "multipart_field_ignored"),
        }
    }

    Ok(form)
}

impl UploadForm {
    /// Resolve the From mailbox parts, falling back to configuration.
    fn from_parts(&self, config: &Config) -> (String, String) {
        let name = self
            .from_name
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| config.from_name.clone());
        let email = self
            .from_email
            .clone()
            .filter(|v| !v.is_empty())
            .or_else(|| config.smtp_user.clone())
            .unwrap_or_default();
        (name, email)
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Map a non-validation campaign failure to the API's error taxonomy:
/// store reads report `DB read failed.`, everything else `Send failed.`
fn campaign_failure(e: &CampaignError) -> Response {
    let message = match e {
        CampaignError::Store(_) => "DB read failed.",
        _ => "Send failed.",
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message, "details": e.to_string() })),
    )
        .into_response()
}

/// `POST /api/send` — run one campaign over every stored recipient.
pub async fn send(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let form = match read_upload_form(&mut multipart).await {
        Ok(form) => form,
        Err(e) => {
            warn!(error = %e, "send_multipart_invalid");
            return bad_request(format!("Malformed upload: {e}"));
        }
    };

    let Some(template) = form.template.clone() else {
        return bad_request(ValidationError::MissingTemplate.to_string());
    };

    let (from_name, from_email) = form.from_parts(&state.config);
    let request = CampaignRequest {
        subject: form.subject,
        from_name,
        from_email,
        html: template,
        mode: SendMode::parse(form.mode.as_deref()),
    };

    match state.runner.run(request, None).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "total": summary.total,
                "sent": summary.sent,
                "results": summary.results,
            })),
        )
            .into_response(),
        Err(CampaignError::Invalid(e)) => bad_request(e.to_string()),
        Err(e) => {
            error!(error = %e, "campaign_failed");
            campaign_failure(&e)
        }
    }
}

/// `POST /api/send-one` — resend to a single explicit address.
pub async fn send_one(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let form = match read_upload_form(&mut multipart).await {
        Ok(form) => form,
        Err(e) => {
            warn!(error = %e, "send_one_multipart_invalid");
            return bad_request(format!("Malformed upload: {e}"));
        }
    };

    let Some(template) = form.template.clone() else {
        return bad_request(ValidationError::MissingTemplate.to_string());
    };

    let (from_name, from_email) = form.from_parts(&state.config);
    let request = SendOneRequest {
        to: form.to,
        subject: form.subject,
        from_name,
        from_email,
        html: template,
    };

    match state.runner.send_one(request).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "to": receipt.to,
                "messageId": receipt.message_id,
            })),
        )
            .into_response(),
        Err(CampaignError::Invalid(e)) => bad_request(e.to_string()),
        Err(e) => {
            error!(error = %e, "send_one_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "ok": false,
                    "error": "Send-one failed.",
                    "details": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}
