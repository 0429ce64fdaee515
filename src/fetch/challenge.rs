//! Challenge-detection heuristics.
//!
//! `detect` is a pure function from a response's status and body to a
//! verdict. Rules are additive: every matching signal appends an indicator,
//! and most of them also flip the verdict to "challenge". The caller owns
//! body buffering; detection never consumes anything.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Fixed keyword set matched case-insensitively against the body. Any hit
/// means an interstitial, not content.
pub const CHALLENGE_KEYWORDS: &[&str] = &[
    "checking your browser",
    "just a moment",
    "cf-browser-verification",
    "cf-challenge",
    "ddos protection",
    "verify you are human",
    "attention required",
    "captcha",
    "cloudflare",
    "ray id",
];

/// Bodies shorter than this carry no usable body-level signal; status-based
/// rules still apply.
const MIN_BODY_LEN: usize = 32;

/// How much of the body the verdict snapshots for diagnostics.
const SNIPPET_LEN: usize = 2048;

/// Verdict on one response. Recomputed per response, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeVerdict {
    pub is_challenge: bool,
    pub status: u16,
    /// Every signal that fired, in rule order.
    pub indicators: Vec<String>,
    /// Leading slice of the body for diagnostics.
    pub body_snippet: String,
}

fn meta_refresh_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<meta[^>]+http-equiv\s*=\s*["']?refresh"#)
            .expect("meta-refresh pattern is valid")
    })
}

/// Classify a response. Pure and idempotent: identical input always yields
/// an identical verdict with no side effects.
pub fn detect(status: u16, body: &str) -> ChallengeVerdict {
    let mut indicators = Vec::new();
    let mut is_challenge = false;

    match status {
        403 | 503 => {
            indicators.push(format!("status {status}"));
            is_challenge = true;
        }
        // Rate limiting alone is not a challenge, but callers want to know.
        429 => indicators.push("status 429 (rate limited)".to_string()),
        _ => {}
    }

    if body.len() >= MIN_BODY_LEN {
        let lowered = body.to_lowercase();
        for keyword in CHALLENGE_KEYWORDS {
            if lowered.contains(keyword) {
                indicators.push(format!("keyword \"{keyword}\""));
                is_challenge = true;
            }
        }
        if meta_refresh_re().is_match(body) {
            indicators.push("meta-refresh redirect".to_string());
            is_challenge = true;
        }
    }

    ChallengeVerdict {
        is_challenge,
        status,
        indicators,
        body_snippet: truncated(body, SNIPPET_LEN),
    }
}

fn truncated(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
