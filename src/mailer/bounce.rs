//! Heuristic classification of failed sends into hard bounces.

/// Substrings that indicate the recipient address itself was rejected.
///
/// The list is deliberately fixed: soft bounces (421/450), greylisting
/// and asynchronously reported failures all classify as "still valid",
/// and the bare `550` can match unrelated text. Best effort only.
const HARD_BOUNCE_MARKERS: &[&str] = &[
    "5.1.1",
    "user unknown",
    "no such user",
    "recipient address rejected",
    "mailbox unavailable",
    "550",
];

/// Decide whether a failed send looks like an invalid-recipient hard
/// bounce.
///
/// The error message, server response text and response code are
/// searched case-insensitively as one haystack. Anything that does not
/// match a marker (timeouts, auth failures, connection resets, soft
/// bounces) is presumed transient and must not downgrade the address's
/// validity flag.
pub fn looks_like_invalid_recipient(message: &str, response: &str, code: &str) -> bool {
    let hay = format!("{message} {response} {code}").to_lowercase();
    HARD_BOUNCE_MARKERS.iter().any(|marker| hay.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_unknown_response_is_hard_bounce() {
        assert!(looks_like_invalid_recipient(
            "send failed",
            "550 5.1.1 User unknown",
            ""
        ));
    }

    #[test]
    fn test_enhanced_status_code_alone_is_hard_bounce() {
        assert!(looks_like_invalid_recipient("", "5.1.1", ""));
    }

    #[test]
    fn test_markers_match_case_insensitively() {
        assert!(looks_like_invalid_recipient("No Such User here", "", ""));
        assert!(looks_like_invalid_recipient("", "Recipient Address Rejected", ""));
        assert!(looks_like_invalid_recipient("", "Mailbox Unavailable", ""));
    }

    #[test]
    fn test_code_field_is_searched() {
        assert!(looks_like_invalid_recipient("delivery failed", "", "550"));
    }

    #[test]
    fn test_timeout_is_not_hard_bounce() {
        assert!(!looks_like_invalid_recipient("Connection timed out", "", ""));
    }

    #[test]
    fn test_soft_bounce_codes_are_not_hard_bounces() {
        assert!(!looks_like_invalid_recipient("", "450 mailbox busy, try later", ""));
        assert!(!looks_like_invalid_recipient("", "421 service not available", "421"));
    }
}
