// Copyright 2026 Gatecrash Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gatecrash: fetch orchestration for sites that defend themselves.
//!
//! The engine acquires catalogs of items (and each item's sub-resources)
//! from sites that deploy anti-bot interstitials. Every response is
//! classified by a challenge detector; stored bypass credentials are applied
//! to fetches and discarded the moment a challenge proves them stale; a
//! dual-path executor tries plain HTTP first and falls back to a real
//! browser render when that fails transiently. The download manager drives
//! whole runs: list, diff, then strictly sequential rate-limited item
//! acquisition with staged artifacts.
//!
//! External concerns stay behind trait seams: [`storage::DestinationStore`]
//! owns artifact packaging and catalog bookkeeping,
//! [`storage::HumanHandoff`] owns the manual challenge-resolution UI, and
//! [`renderer::Renderer`] owns the browser.

pub mod cancel;
pub mod credentials;
pub mod error;
pub mod events;
pub mod fetch;
pub mod limiter;
pub mod manager;
pub mod progress;
pub mod renderer;
pub mod retry;
pub mod site;
pub mod storage;

pub use cancel::CancelToken;
pub use credentials::{BypassCredentials, CookieRecord, CredentialStore};
pub use error::FetchError;
pub use events::{EngineEvent, EventBus};
pub use fetch::challenge::{detect, ChallengeVerdict};
pub use fetch::executor::RequestExecutor;
pub use fetch::render::{RenderFetcher, WaitCondition};
pub use fetch::transport::TransportFetcher;
pub use fetch::{ChallengePolicy, FetchedPage};
pub use limiter::FixedIntervalLimiter;
pub use manager::{DownloadManager, RunReport, RunRequest};
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSender};
pub use renderer::{NoopRenderer, RenderContext, Renderer};
pub use retry::{with_retry, RetryPolicy};
pub use site::{
    ApiExtractor, Extraction, ExtractionMethod, NormalizedRecord, Normalizer, RawRecord,
    SiteDescriptor, Target,
};
pub use storage::{DestinationStore, HumanHandoff, LoggingHandoff};
