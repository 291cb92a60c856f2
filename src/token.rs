//! Read-token and content-id generation.

use rand::RngCore;

/// Random bytes per token (128 bits of entropy).
const TOKEN_BYTES: usize = 16;

/// Generate a fresh opaque token: 16 cryptographically random bytes,
/// hex encoded.
///
/// Tokens correlate a tracking-pixel fetch back to a recipient row and
/// double as content-ids for inline attachments, so collisions would
/// misattribute a read event. Generation is pure; the caller persists
/// the token.
pub fn issue_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
