//! Render fetcher: one script-capable browser attempt.
//!
//! Credential injection, navigation, and readiness-wait execute as one
//! sequence against the same browser context; splitting them across
//! contexts risks the context expiring mid-sequence. The rendered markup is
//! always classified through the challenge detector, even when the caller
//! only wants a script result, because a challenge page can itself satisfy a
//! loose readiness condition. The context is exclusive to this call and torn
//! down on every exit path.

use super::challenge;
use super::{ChallengePolicy, FetchedPage};
use crate::cancel::CancelToken;
use crate::credentials::{normalize_cookie_domain, BypassCredentials};
use crate::error::FetchError;
use crate::renderer::{BrowserCookie, RenderContext, Renderer};
use crate::site::Target;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What "the page is ready" means for a given fetch.
#[derive(Debug, Clone)]
pub enum WaitCondition {
    /// Generic document-ready wait.
    DocumentReady,
    /// An element matching this CSS selector must be visible.
    Selector(String),
}

impl WaitCondition {
    fn describe(&self) -> String {
        match self {
            Self::DocumentReady => "document ready".to_string(),
            Self::Selector(sel) => format!("selector '{sel}'"),
        }
    }
}

pub struct RenderFetcher {
    renderer: Arc<dyn Renderer>,
    policy: Arc<ChallengePolicy>,
    nav_timeout: Duration,
    wait_timeout: Duration,
}

impl RenderFetcher {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        policy: Arc<ChallengePolicy>,
        nav_timeout: Duration,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            policy,
            nav_timeout,
            wait_timeout,
        }
    }

    /// One render attempt: inject credentials, navigate, wait for readiness,
    /// classify, then extract markup or a script result.
    pub async fn fetch(
        &self,
        target: &Target,
        creds: Option<&BypassCredentials>,
        wait: &WaitCondition,
        script: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<FetchedPage, FetchError> {
        cancel.ensure()?;
        let mut ctx = self
            .renderer
            .new_context()
            .await
            .map_err(|e| FetchError::transient(format!("failed to open browser context: {e:#}")))?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.drive(ctx.as_mut(), target, creds, wait, script) => result,
        };

        if let Err(e) = ctx.close().await {
            debug!("failed to close browser context: {e:#}");
        }
        outcome
    }

    async fn drive(
        &self,
        ctx: &mut dyn RenderContext,
        target: &Target,
        creds: Option<&BypassCredentials>,
        wait: &WaitCondition,
        script: Option<&str>,
    ) -> Result<FetchedPage, FetchError> {
        let now = Utc::now();
        if let Some(creds) = creds.filter(|c| c.is_usable(now)) {
            ctx.set_user_agent(&creds.user_agent, &creds.platform)
                .await
                .map_err(transient)?;
            let cookies = creds
                .live_cookies(now)
                .into_iter()
                .map(|c| BrowserCookie {
                    name: c.name.clone(),
                    value: c.value.clone(),
                    domain: normalize_cookie_domain(&c.domain),
                    path: c.path.clone(),
                    secure: c.secure,
                    http_only: c.http_only,
                    expires_unix: c.expires_at.map(|t| t.timestamp()),
                })
                .collect();
            ctx.set_cookies(cookies).await.map_err(transient)?;
        }

        let nav = ctx
            .navigate(&target.url, self.nav_timeout.as_millis() as u64)
            .await
            .map_err(transient)?;

        let wait_ms = self.wait_timeout.as_millis() as u64;
        let satisfied = match wait {
            WaitCondition::Selector(selector) => ctx
                .wait_for_selector(selector, wait_ms)
                .await
                .map_err(transient)?,
            WaitCondition::DocumentReady => {
                ctx.wait_for_ready(wait_ms).await.map_err(transient)?
            }
        };

        let html = ctx.get_html().await.map_err(transient)?;
        let final_url = ctx
            .get_url()
            .await
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or(nav.final_url);

        // The browser does not expose the HTTP status; classification rests
        // on body signals alone.
        let verdict = challenge::detect(200, &html);
        if verdict.is_challenge {
            return Err(self.policy.on_challenge(target, verdict, final_url));
        }

        if !satisfied {
            return Err(FetchError::transient(format!(
                "timed out waiting for {} on {}",
                wait.describe(),
                target.url
            )));
        }

        let script_value = match script {
            Some(code) => Some(ctx.execute_js(code).await.map_err(transient)?),
            None => None,
        };

        Ok(FetchedPage {
            url: target.url.clone(),
            final_url,
            status: 200,
            body: html.into_bytes(),
            script_value,
            rendered: true,
        })
    }
}

fn transient(e: anyhow::Error) -> FetchError {
    FetchError::transient(format!("{e:#}"))
}
