//! Transport fetcher: one direct HTTP attempt, no rendering engine.
//!
//! Applies stored bypass credentials when given: the credential's *original*
//! captured user-agent together with its cookies, never a fresh agent, since
//! the bypass is tied to the fingerprint that earned it. Decompresses
//! transparently and classifies the final body through the challenge
//! detector. Falls back to HTTP/1.1 on protocol errors (some CDNs reject
//! HTTP/2); that fallback is part of this single attempt, not a retry.

use super::challenge;
use super::{ChallengePolicy, FetchedPage};
use crate::cancel::CancelToken;
use crate::credentials::BypassCredentials;
use crate::error::FetchError;
use crate::site::Target;
use chrono::Utc;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;

/// Generic modern-browser identity for credential-less fetches.
pub const GENERIC_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/131.0.0.0 Safari/537.36";

const GENERIC_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const GENERIC_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// HTTP client pair for the fetch engine.
pub struct TransportFetcher {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
    base_timeout: Duration,
    policy: Arc<ChallengePolicy>,
}

impl TransportFetcher {
    /// Create a transport fetcher. `base_timeout` is the attempt-0 timeout;
    /// later attempts grow it linearly.
    pub fn new(base_timeout: Duration, policy: Arc<ChallengePolicy>) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(GENERIC_USER_AGENT)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(GENERIC_USER_AGENT)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self {
            client,
            h1_client,
            base_timeout,
            policy,
        }
    }

    /// Timeout for a given 0-based attempt number: `base * (attempt + 1)`.
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        self.base_timeout.saturating_mul(attempt.saturating_add(1))
    }

    /// One transport attempt. A detected challenge short-circuits with
    /// credential teardown already performed; non-2xx without a challenge
    /// signal is transient; a malformed request is terminal.
    pub async fn fetch(
        &self,
        target: &Target,
        creds: Option<&BypassCredentials>,
        attempt: u32,
        cancel: &CancelToken,
    ) -> Result<FetchedPage, FetchError> {
        cancel.ensure()?;
        let timeout = self.attempt_timeout(attempt);
        cancel.bound(self.attempt(target, creds, timeout)).await
    }

    async fn attempt(
        &self,
        target: &Target,
        creds: Option<&BypassCredentials>,
        timeout: Duration,
    ) -> Result<FetchedPage, FetchError> {
        let response = match self.send(&self.client, target, creds, timeout).await {
            Ok(r) => r,
            Err(e) if looks_like_protocol_error(&e) => self
                .send(&self.h1_client, target, creds, timeout)
                .await
                .map_err(classify_transport_error)?,
            Err(e) => return Err(classify_transport_error(e)),
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::transient(format!("failed to read body: {e}")))?
            .to_vec();

        let text = String::from_utf8_lossy(&body);
        let verdict = challenge::detect(status, &text);
        if verdict.is_challenge {
            return Err(self.policy.on_challenge(target, verdict, final_url));
        }

        if !(200..300).contains(&status) {
            return Err(FetchError::transient(format!(
                "status {status} from {final_url}"
            )));
        }

        Ok(FetchedPage {
            url: target.url.clone(),
            final_url,
            status,
            body,
            script_value: None,
            rendered: false,
        })
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        target: &Target,
        creds: Option<&BypassCredentials>,
        timeout: Duration,
    ) -> reqwest::Result<reqwest::Response> {
        let mut request = client
            .get(&target.url)
            .timeout(timeout)
            .header(ACCEPT, GENERIC_ACCEPT)
            .header(ACCEPT_LANGUAGE, GENERIC_ACCEPT_LANGUAGE);

        let now = Utc::now();
        if let Some(creds) = creds.filter(|c| c.is_usable(now)) {
            request = request.header(USER_AGENT, &creds.user_agent);
            if let Some(cookie) = creds.cookie_header(now) {
                request = request.header(COOKIE, cookie);
            }
        }

        request.send().await
    }
}

/// Whether an error looks like an HTTP/2 negotiation problem worth one
/// HTTP/1.1 retry within the same attempt.
fn looks_like_protocol_error(e: &reqwest::Error) -> bool {
    let text = format!("{e}");
    text.contains("http2") || text.contains("protocol") || text.contains("connection closed")
}

fn classify_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::transient(format!("request timed out: {e}"))
    } else if e.is_builder() || (e.is_request() && e.url().is_none()) {
        FetchError::terminal(format!("malformed request: {e}"))
    } else {
        FetchError::transient(format!("transport error: {e}"))
    }
}
