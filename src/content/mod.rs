//! HTML template transformation: tracking-pixel injection and
//! inline-image extraction into CID attachments.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::token::issue_token;

/// A decoded inline image to be sent as an attachment and referenced
/// from the HTML body via `cid:`. Produced per send, never persisted.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub filename: String,
    pub content: Vec<u8>,
    pub mime: String,
    pub content_id: String,
}

/// Inject an invisible 1x1 tracking pixel tied to `token`.
///
/// Without a configured base URL the template is returned unchanged:
/// tracking is silently disabled, never an error. The pixel goes
/// immediately before `</body>` when present, otherwise it is appended
/// to the end of the document.
pub fn inject_pixel(html: &str, token: &str, base_url: Option<&str>) -> String {
    let base = match base_url {
        Some(b) if !b.is_empty() => b,
        _ => return html.to_string(),
    };

    let pixel = format!(
        r#"<img src="{base}/t/{token}.png" width="1" height="1" style="display:none" alt="" />"#
    );

    match html.find("</body>") {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + pixel.len());
            out.push_str(&html[..idx]);
            out.push_str(&pixel);
            out.push_str(&html[idx..]);
            out
        }
        None => format!("{html}{pixel}"),
    }
}

/// Rewrite every `data:image/...;base64,...` image into a CID
/// attachment reference.
///
/// Returns the rewritten HTML plus the decoded attachments. Non
/// data-URI images and malformed data URIs are left untouched, and a
/// template with no inline images comes back unchanged with an empty
/// attachment list. Parsing is best effort: broken markup never fails
/// the transformation.
pub fn rewrite_inline_images(html: &str) -> (String, Vec<InlineImage>) {
    let sources: Vec<String> = {
        let document = Html::parse_document(html);
        let selector = Selector::parse("img[src]").expect("Invalid selector");
        document
            .select(&selector)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| src.starts_with("data:image/"))
            .map(|s| s.to_string())
            .collect()
    };

    if sources.is_empty() {
        return (html.to_string(), Vec::new());
    }

    let mut rewritten = html.to_string();
    let mut attachments = Vec::new();

    for (idx, src) in sources.iter().enumerate() {
        let Some((mime, payload)) = split_data_uri(src) else {
            warn!(img_index = idx, "inline_image_malformed_data_uri");
            continue;
        };

        let content = match BASE64.decode(payload.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(img_index = idx, error = %e, "inline_image_decode_failed");
                continue;
            }
        };

        let content_id = issue_token();
        let subtype = mime.strip_prefix("image/").unwrap_or("bin");
        let filename = format!("inline-{}.{}", idx + 1, subtype);

        // Data-URI payloads are plain base64 text, so the parsed
        // attribute value appears verbatim in the raw template.
        rewritten = rewritten.replacen(src.as_str(), &format!("cid:{content_id}"), 1);

        debug!(
            img_index = idx,
            mime = %mime,
            content_length = content.len(),
            "inline_image_extracted"
        );

        attachments.push(InlineImage {
            filename,
            content,
            mime: mime.to_string(),
            content_id,
        });
    }

    (rewritten, attachments)
}

/// Split `data:image/<subtype>;base64,<payload>` into mime type and
/// payload. Anything else is rejected.
fn split_data_uri(src: &str) -> Option<(&str, &str)> {
    let rest = src.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    match mime.strip_prefix("image/") {
        Some(subtype) if !subtype.is_empty() => Some((mime, payload)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64 of the 8-byte PNG magic prefix
    const PNG_MAGIC_B64: &str = "iVBORw0KGgo=";
    const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];

    #[test]
    fn test_inject_pixel_before_closing_body() {
        let html = "<html><body><p>Hi</p></body></html>";
        let out = inject_pixel(html, "tok123", Some("https://mail.example.com"));

        let pixel_at = out.find("https://mail.example.com/t/tok123.png").unwrap();
        let body_at = out.find("</body>").unwrap();
        assert!(pixel_at < body_at);
        assert!(out.contains(r#"width="1" height="1" style="display:none""#));
    }

    #[test]
    fn test_inject_pixel_appends_without_body_tag() {
        let html = "<p>Hi</p>";
        let out = inject_pixel(html, "tok123", Some("https://mail.example.com"));

        assert!(out.starts_with("<p>Hi</p><img "));
        assert!(out.ends_with("/>"));
    }

    #[test]
    fn test_inject_pixel_noop_without_base_url() {
        let html = "<html><body></body></html>";
        assert_eq!(inject_pixel(html, "tok123", None), html);
        assert_eq!(inject_pixel(html, "tok123", Some("")), html);
    }

    #[test]
    fn test_rewrite_single_inline_image() {
        let html = format!(
            r#"<html><body><img src="data:image/png;base64,{PNG_MAGIC_B64}"></body></html>"#
        );
        let (out, attachments) = rewrite_inline_images(&html);

        assert_eq!(attachments.len(), 1);
        let att = &attachments[0];
        assert_eq!(att.mime, "image/png");
        assert_eq!(att.content, PNG_MAGIC);
        assert!(out.contains(&format!("cid:{}", att.content_id)));
        assert!(!out.contains("data:image/png"));
    }

    #[test]
    fn test_rewrite_without_inline_images_is_identity() {
        let html = r#"<html><body><img src="https://example.com/logo.png"></body></html>"#;
        let (out, attachments) = rewrite_inline_images(html);

        assert_eq!(out, html);
        assert!(attachments.is_empty());
    }

    #[test]
    fn test_rewrite_leaves_malformed_payload_untouched() {
        let html = r#"<img src="data:image/png;base64,@@not-base64@@">"#;
        let (out, attachments) = rewrite_inline_images(html);

        assert_eq!(out, html);
        assert!(attachments.is_empty());
    }

    #[test]
    fn test_rewrite_assigns_distinct_content_ids() {
        let html = format!(
            r#"<img src="data:image/png;base64,{PNG_MAGIC_B64}"><img src="data:image/gif;base64,{PNG_MAGIC_B64}">"#
        );
        let (out, attachments) = rewrite_inline_images(&html);

        assert_eq!(attachments.len(), 2);
        assert_ne!(attachments[0].content_id, attachments[1].content_id);
        assert_eq!(attachments[1].mime, "image/gif");
        assert!(out.contains(&format!("cid:{}", attachments[0].content_id)));
        assert!(out.contains(&format!("cid:{}", attachments[1].content_id)));
    }

    #[test]
    fn test_rewrite_tolerates_broken_markup() {
        let html = format!(r#"<div><img src="data:image/png;base64,{PNG_MAGIC_B64}"<p>"#);
        let (_, attachments) = rewrite_inline_images(&html);
        // best effort: either extracted or skipped, but never a panic
        assert!(attachments.len() <= 1);
    }

    #[test]
    fn test_split_data_uri() {
        assert_eq!(
            split_data_uri("data:image/png;base64,AAAA"),
            Some(("image/png", "AAAA"))
        );
        assert_eq!(split_data_uri("data:text/plain;base64,AAAA"), None);
        assert_eq!(split_data_uri("data:image/;base64,AAAA"), None);
        assert_eq!(split_data_uri("https://example.com/x.png"), None);
    }
}
