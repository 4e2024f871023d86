//! Session cookie handling.
//!
//! The session key is an opaque random token stored in the `session_id`
//! cookie. The server never interprets it beyond using it as a ledger key.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;

pub const SESSION_COOKIE: &str = "session_id";

/// Cookie lifetime. Longer than any sensible cooldown window.
const SESSION_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Session key carried by the request's `Cookie` header(s), if any.
pub fn from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}

/// Generate a fresh 128-bit session key, hex encoded.
pub fn issue() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

/// `Set-Cookie` value for `key`.
pub fn set_cookie(key: &str) -> String {
    format!("{SESSION_COOKIE}={key}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_MAX_AGE_SECS}")
}
