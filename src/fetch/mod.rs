//! Dual-path fetch engine.
//!
//! Two ways to retrieve a page: a lightweight transport attempt
//! ([`transport::TransportFetcher`]) and a full script-capable render
//! ([`render::RenderFetcher`]), combined under the
//! [`executor::RequestExecutor`] policy. Both paths classify every response
//! through [`challenge::detect`] and run the same credential-teardown
//! side effects when a challenge surfaces.

pub mod challenge;
pub mod executor;
pub mod render;
pub mod transport;

use crate::credentials::CredentialStore;
use crate::error::FetchError;
use crate::events::{EngineEvent, EventBus};
use crate::site::Target;
use crate::storage::HumanHandoff;
use challenge::ChallengeVerdict;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::warn;

/// A successfully fetched page or sub-resource.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// The URL as requested.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    /// Raw body bytes, already decompressed.
    pub body: Vec<u8>,
    /// Structured result of script extraction, when a script was supplied to
    /// the render path.
    pub script_value: Option<serde_json::Value>,
    /// Whether the body came from a browser render rather than transport.
    pub rendered: bool,
}

impl FetchedPage {
    /// Body as text for markup parsing and challenge classification.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Shared challenge side effects: the moment either fetch path detects a
/// challenge, stored credentials for the domain are presumed stale and
/// discarded, and the challenge URL is handed to a human: exactly once per
/// detection, without blocking on resolution.
pub struct ChallengePolicy {
    store: Arc<CredentialStore>,
    handoff: Arc<dyn HumanHandoff>,
    events: Arc<EventBus>,
}

impl ChallengePolicy {
    pub fn new(
        store: Arc<CredentialStore>,
        handoff: Arc<dyn HumanHandoff>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            handoff,
            events,
        }
    }

    /// Run the teardown and return the error the fetch path must surface.
    /// Invalidate before delete so a racing concurrent `load` can never hand
    /// out the known-bad record.
    pub fn on_challenge(
        &self,
        target: &Target,
        verdict: ChallengeVerdict,
        resolved_url: String,
    ) -> FetchError {
        self.events.emit(EngineEvent::ChallengeDetected {
            domain: target.domain.clone(),
            url: resolved_url.clone(),
            status: verdict.status,
            indicators: verdict.indicators.clone(),
        });

        match self
            .store
            .invalidate(&target.domain)
            .and_then(|_| self.store.delete(&target.domain))
        {
            Ok(_) => self.events.emit(EngineEvent::CredentialsDiscarded {
                domain: target.domain.clone(),
            }),
            Err(e) => warn!(
                "failed to discard credentials for {}: {e:#}",
                target.domain
            ),
        }

        self.handoff.open_for_resolution(&resolved_url);
        self.events.emit(EngineEvent::HandoffRequested {
            domain: target.domain.clone(),
            url: resolved_url.clone(),
        });

        FetchError::Challenge {
            verdict,
            url: resolved_url,
        }
    }
}
