//! Bypass credentials: a captured session cookie plus the client fingerprint
//! that earned it.
//!
//! A record is created externally when a human solves a challenge, read at
//! the start of every bypass-needing fetch, and discarded by the engine the
//! instant a challenge is detected despite the record being applied: a
//! challenge while credentialed means the record is stale.

pub mod store;

pub use store::CredentialStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One captured cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Absent means session-scoped (no expiry).
    pub expires_at: Option<DateTime<Utc>>,
}

impl CookieRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

/// Per-domain bypass credentials: the session cookie, auxiliary cookies, and
/// the user-agent/platform fingerprint that earned them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassCredentials {
    /// The primary clearance cookie.
    pub session: CookieRecord,
    /// Any additional cookies captured alongside it.
    pub extra_cookies: Vec<CookieRecord>,
    /// The bypass is tied to the agent that earned it; replaying the cookie
    /// under a fresh user-agent gets flagged.
    pub user_agent: String,
    pub platform: String,
    pub captured_at: DateTime<Utc>,
}

impl BypassCredentials {
    /// Whether the record can still be applied: the session cookie must not
    /// have expired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.session.is_expired(now)
    }

    /// All cookies, session first, skipping expired entries.
    pub fn live_cookies(&self, now: DateTime<Utc>) -> Vec<&CookieRecord> {
        std::iter::once(&self.session)
            .chain(self.extra_cookies.iter())
            .filter(|c| !c.is_expired(now))
            .collect()
    }

    /// Render the live cookies into a single `Cookie:` header value.
    /// Returns `None` when the session cookie has expired.
    pub fn cookie_header(&self, now: DateTime<Utc>) -> Option<String> {
        if !self.is_usable(now) {
            return None;
        }
        let header = self
            .live_cookies(now)
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }
}

/// Force a leading dot onto a cookie domain so subdomains match.
///
/// Clearance cookies are routinely needed on CDN hosts (`img.example.com`)
/// that share a session with the main domain; without the dot the browser
/// scopes the cookie to the bare host and those requests silently fail.
pub fn normalize_cookie_domain(domain: &str) -> String {
    let trimmed = domain.trim();
    if trimmed.is_empty() || trimmed.starts_with('.') {
        return trimmed.to_string();
    }
    format!(".{trimmed}")
}
