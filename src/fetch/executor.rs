//! Request executor: the dual-path retrieval policy.
//!
//! Try the lightweight transport first; fall back to the browser exactly
//! once, and only on a transient transport failure. A challenge never
//! triggers the fallback: the human hand-off is already in motion, and
//! re-probing a site that just flagged us is how credentials get burned for
//! the whole run.

use super::render::{RenderFetcher, WaitCondition};
use super::transport::TransportFetcher;
use super::FetchedPage;
use crate::cancel::CancelToken;
use crate::credentials::{BypassCredentials, CredentialStore};
use crate::error::FetchError;
use crate::events::{EngineEvent, EventBus};
use crate::site::Target;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RequestExecutor {
    transport: Arc<TransportFetcher>,
    render: Arc<RenderFetcher>,
    store: Arc<CredentialStore>,
    events: Arc<EventBus>,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<TransportFetcher>,
        render: Arc<RenderFetcher>,
        store: Arc<CredentialStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            transport,
            render,
            store,
            events,
        }
    }

    /// The prepared transport client, for site API extractors.
    pub fn transport(&self) -> &TransportFetcher {
        &self.transport
    }

    /// Credentials are re-read at the start of every bypass-needing fetch so
    /// a record captured mid-run is picked up immediately. A store read
    /// failure degrades to "absent", since absence is a normal outcome.
    fn load_credentials(&self, target: &Target) -> Option<BypassCredentials> {
        if !target.expects_defense {
            return None;
        }
        match self.store.load(&target.domain) {
            Ok(creds) => creds,
            Err(e) => {
                warn!("credential load failed for {}: {e:#}", target.domain);
                None
            }
        }
    }

    /// Dual-path fetch: transport first, browser fallback on transient
    /// failure only. `attempt` feeds the transport's escalating timeout.
    pub async fn fetch(
        &self,
        target: &Target,
        wait: &WaitCondition,
        attempt: u32,
        cancel: &CancelToken,
    ) -> Result<FetchedPage, FetchError> {
        let creds = self.load_credentials(target);
        match self
            .transport
            .fetch(target, creds.as_ref(), attempt, cancel)
            .await
        {
            Ok(page) => Ok(page),
            Err(FetchError::Transient { reason }) => {
                debug!("transport failed for {} ({reason}), rendering", target.url);
                self.events.emit(EngineEvent::RenderFallback {
                    url: target.url.clone(),
                    reason,
                });
                self.render
                    .fetch(target, creds.as_ref(), wait, None, cancel)
                    .await
            }
            Err(other) => Err(other),
        }
    }

    /// Script-based extraction goes straight to the browser: the content
    /// only exists after client-side script execution, so a transport body
    /// would be a false success.
    pub async fn fetch_rendered(
        &self,
        target: &Target,
        wait: &WaitCondition,
        script: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<FetchedPage, FetchError> {
        let creds = self.load_credentials(target);
        self.render
            .fetch(target, creds.as_ref(), wait, script, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ChallengePolicy;
    use crate::renderer::{BrowserCookie, NavigationResult, RenderContext, Renderer};
    use crate::storage::LoggingHandoff;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Renderer stub that counts how many contexts were ever opened.
    struct CountingRenderer {
        html: String,
        opened: Arc<AtomicUsize>,
    }

    struct CountingContext {
        html: String,
        url: String,
    }

    #[async_trait]
    impl Renderer for CountingRenderer {
        async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingContext {
                html: self.html.clone(),
                url: String::new(),
            }))
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn active_contexts(&self) -> usize {
            0
        }
    }

    #[async_trait]
    impl RenderContext for CountingContext {
        async fn set_user_agent(&mut self, _ua: &str, _platform: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn set_cookies(&mut self, _cookies: Vec<BrowserCookie>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> anyhow::Result<NavigationResult> {
            self.url = url.to_string();
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 1,
            })
        }
        async fn wait_for_selector(&self, _s: &str, _t: u64) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn wait_for_ready(&self, _t: u64) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn execute_js(&self, _script: &str) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn get_html(&self) -> anyhow::Result<String> {
            Ok(self.html.clone())
        }
        async fn get_url(&self) -> anyhow::Result<String> {
            Ok(self.url.clone())
        }
        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn executor_with(html: &str) -> (tempfile::TempDir, Arc<AtomicUsize>, RequestExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::open(&dir.path().join("c.db")).unwrap());
        let events = Arc::new(EventBus::new(32));
        let policy = Arc::new(ChallengePolicy::new(
            store.clone(),
            Arc::new(LoggingHandoff),
            events.clone(),
        ));
        let opened = Arc::new(AtomicUsize::new(0));
        let renderer = Arc::new(CountingRenderer {
            html: html.to_string(),
            opened: opened.clone(),
        });
        let transport = Arc::new(TransportFetcher::new(Duration::from_secs(5), policy.clone()));
        let render = Arc::new(RenderFetcher::new(
            renderer,
            policy,
            Duration::from_secs(5),
            Duration::from_secs(5),
        ));
        let executor = RequestExecutor::new(transport, render, store, events);
        (dir, opened, executor)
    }

    #[tokio::test]
    async fn test_transport_success_skips_render() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain transport body here"))
            .mount(&server)
            .await;

        let (_dir, opened, executor) = executor_with("<html>rendered</html>");
        let target = Target::new(&format!("{}/x", server.uri()), false).unwrap();
        let page = executor
            .fetch(&target, &WaitCondition::DocumentReady, 0, &CancelToken::new())
            .await
            .unwrap();
        assert!(!page.rendered);
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_transport_failure_falls_back_to_render() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error, try later"))
            .mount(&server)
            .await;

        let (_dir, opened, executor) =
            executor_with("<html><body>full rendered chapter list</body></html>");
        let target = Target::new(&format!("{}/x", server.uri()), false).unwrap();
        let page = executor
            .fetch(&target, &WaitCondition::DocumentReady, 0, &CancelToken::new())
            .await
            .unwrap();
        assert!(page.rendered);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_challenge_never_falls_back_to_render() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string(""))
            .mount(&server)
            .await;

        let (_dir, opened, executor) = executor_with("<html>rendered</html>");
        let target = Target::new(&format!("{}/x", server.uri()), false).unwrap();
        let err = executor
            .fetch(&target, &WaitCondition::DocumentReady, 0, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_challenge());
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }
}
