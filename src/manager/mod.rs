// Copyright 2026 Gatecrash Contributors
// SPDX-License-Identifier: Apache-2.0

//! Download manager: full acquisition runs.
//!
//! A run fetches a site's catalog list, diffs it against what the
//! destination already holds, then works through the pending items strictly
//! sequentially: extract the item's sub-resource list, fetch each
//! sub-resource through the rate limiter and retry driver, stage the bytes,
//! and package the staged directory into the destination artifact. Item
//! order follows the sorted item set, never source order.
//!
//! Failure handling is deliberately asymmetric. A challenge or cancellation
//! aborts the whole run (artifacts already written stay); a structural or
//! retries-exhausted failure on one item skips that item only; a failed
//! sub-resource is dropped from its item, and the item is abandoned only
//! when every sub-resource failed.

pub mod workspace;

use crate::cancel::CancelToken;
use crate::error::FetchError;
use crate::events::{EngineEvent, EventBus};
use crate::fetch::executor::RequestExecutor;
use crate::fetch::render::WaitCondition;
use crate::limiter::FixedIntervalLimiter;
use crate::progress::{self, ProgressEvent, ProgressSender};
use crate::retry::{with_retry, RetryPolicy};
use crate::site::{
    build_item_set, records_from_value, Extraction, ExtractionMethod, RawRecord, SiteDescriptor,
    Target,
};
use crate::storage::DestinationStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use workspace::{asset_file_name, ItemWorkspace};

/// One acquisition run: which catalog, where its list lives, and how the
/// site is scraped.
pub struct RunRequest {
    /// Destination namespace for artifacts (series name, collection id).
    pub catalog: String,
    /// URL of the catalog list page.
    pub list_url: String,
    pub site: SiteDescriptor,
    /// Optional progress sink for this run.
    pub progress: Option<ProgressSender>,
}

/// What a finished run accomplished.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub catalog: String,
    /// Size of the full extracted item set.
    pub items_total: usize,
    /// Items that were pending after the diff.
    pub items_pending: usize,
    pub items_completed: usize,
    pub items_abandoned: usize,
    pub items_skipped: usize,
    pub elapsed: Duration,
}

pub struct DownloadManager {
    executor: Arc<RequestExecutor>,
    store: Arc<dyn DestinationStore>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
    limiter: FixedIntervalLimiter,
}

impl DownloadManager {
    pub fn new(
        executor: Arc<RequestExecutor>,
        store: Arc<dyn DestinationStore>,
        events: Arc<EventBus>,
        retry: RetryPolicy,
        request_interval: Duration,
    ) -> Self {
        Self {
            executor,
            store,
            events,
            retry,
            limiter: FixedIntervalLimiter::new(request_interval),
        }
    }

    /// Execute a full run. Completed items' artifacts survive an abort; the
    /// in-flight item's staging directory never does.
    pub async fn run(
        &self,
        request: &RunRequest,
        cancel: &CancelToken,
    ) -> Result<RunReport, FetchError> {
        let started = Instant::now();
        self.events.emit(EngineEvent::RunStarted {
            catalog: request.catalog.clone(),
            list_url: request.list_url.clone(),
        });
        progress::emit(
            &request.progress,
            ProgressEvent::stage(format!("fetching catalog list for {}", request.catalog), 0.0, None),
        );

        let list_target = match Target::new(&request.list_url, request.site.needs_bypass) {
            Ok(t) => t,
            Err(e) => return Err(self.abort(&request.catalog, e)),
        };

        let records = match self
            .extract_with_retry(&request.site.list, &list_target, cancel)
            .await
        {
            Ok(records) => records,
            Err(e) => return Err(self.abort(&request.catalog, e)),
        };

        let item_set = build_item_set(&records, &request.site.list.normalize);
        if item_set.is_empty() {
            let e = FetchError::terminal(format!(
                "catalog list for {} produced no items",
                request.catalog
            ));
            return Err(self.abort(&request.catalog, e));
        }

        let acquired = match self.store.acquired_keys(&request.catalog) {
            Ok(keys) => keys,
            Err(e) => {
                let e = FetchError::terminal(format!("destination query failed: {e:#}"));
                return Err(self.abort(&request.catalog, e));
            }
        };

        // Pending items keep their 0-based position in the full sorted set.
        let pending: Vec<(usize, &String, &String)> = item_set
            .iter()
            .enumerate()
            .filter(|(_, (key, _))| !acquired.contains(*key))
            .map(|(index, (key, locator))| (index, key, locator))
            .collect();

        let items_total = item_set.len();
        let items_pending = pending.len();
        self.events.emit(EngineEvent::ListDiffed {
            catalog: request.catalog.clone(),
            items_total,
            items_pending,
        });
        info!(
            "{}: {items_total} item(s) listed, {items_pending} pending",
            request.catalog
        );

        let mut tracker = ProgressTracker::new(
            request.progress.clone(),
            items_total,
            items_total - items_pending,
        );
        tracker.emit("catalog list diffed".to_string(), 0, 0.0, None, None);

        let mut completed = 0usize;
        let mut abandoned = 0usize;
        let mut skipped = 0usize;

        for (ordinal, (index, key, locator)) in pending.iter().enumerate() {
            let ordinal = ordinal + 1;
            if let Err(e) = cancel.ensure() {
                return Err(self.abort(&request.catalog, e));
            }
            tracker.emit(
                format!("fetching {key}"),
                completed + abandoned + skipped,
                0.0,
                Some(ordinal),
                Some(*index),
            );

            match self
                .acquire_item(request, key, locator, cancel, &mut tracker, ordinal, *index,
                    completed + abandoned + skipped)
                .await
            {
                Ok(ItemOutcome::Archived) => completed += 1,
                Ok(ItemOutcome::Abandoned) => abandoned += 1,
                Ok(ItemOutcome::Skipped) => skipped += 1,
                Err(e) => return Err(self.abort(&request.catalog, e)),
            }
        }

        let elapsed = started.elapsed();
        self.events.emit(EngineEvent::RunCompleted {
            catalog: request.catalog.clone(),
            items_completed: completed,
            items_abandoned: abandoned,
            items_skipped: skipped,
            elapsed_ms: elapsed.as_millis() as u64,
        });
        tracker.emit(
            format!("run complete: {completed} archived, {abandoned} abandoned, {skipped} skipped"),
            items_pending,
            0.0,
            None,
            None,
        );

        Ok(RunReport {
            catalog: request.catalog.clone(),
            items_total,
            items_pending,
            items_completed: completed,
            items_abandoned: abandoned,
            items_skipped: skipped,
            elapsed,
        })
    }

    /// One item end to end: sub-resource list, staged fetches, artifact.
    /// `Err` is reserved for run-fatal outcomes (challenge, cancellation);
    /// everything else resolves to a per-item outcome.
    #[allow(clippy::too_many_arguments)]
    async fn acquire_item(
        &self,
        request: &RunRequest,
        key: &str,
        locator: &str,
        cancel: &CancelToken,
        tracker: &mut ProgressTracker,
        ordinal: usize,
        index: usize,
        done_before: usize,
    ) -> Result<ItemOutcome, FetchError> {
        let target = match Target::new(locator, request.site.needs_bypass) {
            Ok(t) => t,
            Err(e) => {
                self.skip_item(key, format!("bad item locator: {e}"));
                return Ok(ItemOutcome::Skipped);
            }
        };

        let sub_records = match self
            .extract_with_retry(&request.site.assets, &target, cancel)
            .await
        {
            Ok(records) => records,
            Err(e) if is_run_fatal(&e) => return Err(e),
            Err(e) => {
                self.skip_item(key, format!("sub-resource list failed: {e}"));
                return Ok(ItemOutcome::Skipped);
            }
        };

        let sub_items = build_item_set(&sub_records, &request.site.assets.normalize);
        if sub_items.is_empty() {
            self.skip_item(key, "no sub-resources extracted".to_string());
            return Ok(ItemOutcome::Skipped);
        }

        let ws = match ItemWorkspace::create(self.store.work_dir(&request.catalog, key)) {
            Ok(ws) => ws,
            Err(e) => {
                self.skip_item(key, format!("staging dir creation failed: {e:#}"));
                return Ok(ItemOutcome::Skipped);
            }
        };

        let sub_total = sub_items.len();
        let mut fetched = 0usize;
        let mut failed = 0usize;
        for (done, (file_key, url)) in sub_items.iter().enumerate() {
            cancel.ensure()?;
            match self.fetch_sub_resource(&request.site, url, cancel).await {
                Ok(body) => {
                    if let Err(e) = ws.write_asset(&asset_file_name(file_key, url), &body) {
                        warn!("{key}: failed to stage {file_key}: {e:#}");
                        failed += 1;
                    } else {
                        fetched += 1;
                    }
                }
                Err(e) if is_run_fatal(&e) => return Err(e),
                Err(e) => {
                    let attempts = match &e {
                        FetchError::RetriesExhausted { attempts, .. } => *attempts,
                        _ => 1,
                    };
                    self.events.emit(EngineEvent::SubResourceSkipped {
                        item: key.to_string(),
                        url: url.clone(),
                        attempts,
                    });
                    warn!("{key}: sub-resource {url} skipped: {e}");
                    failed += 1;
                }
            }
            tracker.emit(
                format!("{key}: {} of {sub_total} sub-resources", done + 1),
                done_before,
                (done + 1) as f32 / sub_total as f32,
                Some(ordinal),
                Some(index),
            );
        }

        if fetched == 0 {
            self.events.emit(EngineEvent::ItemAbandoned {
                item: key.to_string(),
            });
            warn!("{key}: every sub-resource failed, abandoning");
            ws.cleanup();
            return Ok(ItemOutcome::Abandoned);
        }

        if let Err(e) = self.store.write_artifact(&request.catalog, key, ws.path()) {
            self.skip_item(key, format!("artifact packaging failed: {e:#}"));
            ws.cleanup();
            return Ok(ItemOutcome::Skipped);
        }

        self.events.emit(EngineEvent::ItemArchived {
            item: key.to_string(),
            sub_resources: fetched,
            failed,
        });
        info!("{key}: archived with {fetched} sub-resource(s), {failed} failed");
        ws.cleanup();
        Ok(ItemOutcome::Archived)
    }

    /// One rate-limited sub-resource fetch under the retry driver. The
    /// limiter sits inside the retried operation so spacing holds across
    /// retries too.
    async fn fetch_sub_resource(
        &self,
        site: &SiteDescriptor,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, FetchError> {
        let target = Target::new(url, site.needs_bypass)?;
        let target = &target;
        let page = with_retry(&self.retry, cancel, |attempt| {
            self.note_retry(url, attempt);
            async move {
                self.limiter.acquire().await;
                self.executor
                    .fetch(target, &WaitCondition::DocumentReady, attempt, cancel)
                    .await
            }
        })
        .await?;
        Ok(page.body)
    }

    async fn extract_with_retry(
        &self,
        extraction: &Extraction,
        target: &Target,
        cancel: &CancelToken,
    ) -> Result<Vec<RawRecord>, FetchError> {
        with_retry(&self.retry, cancel, |attempt| {
            self.note_retry(&target.url, attempt);
            self.extract_records(extraction, target, attempt, cancel)
        })
        .await
    }

    /// Dispatch one extraction attempt over the strategy variants.
    async fn extract_records(
        &self,
        extraction: &Extraction,
        target: &Target,
        attempt: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<RawRecord>, FetchError> {
        match &extraction.method {
            // Script output only exists in a rendered page; no transport path.
            ExtractionMethod::Script {
                code,
                await_selector,
            } => {
                let wait = match await_selector {
                    Some(sel) => WaitCondition::Selector(sel.clone()),
                    None => WaitCondition::DocumentReady,
                };
                let page = self
                    .executor
                    .fetch_rendered(target, &wait, Some(code), cancel)
                    .await?;
                let value = page
                    .script_value
                    .ok_or_else(|| FetchError::terminal("extraction script produced no result"))?;
                records_from_value(&value)
            }
            ExtractionMethod::Selector {
                selector,
                attribute,
            } => {
                let page = self
                    .executor
                    .fetch(target, &WaitCondition::DocumentReady, attempt, cancel)
                    .await?;
                let html = page.text().into_owned();
                let selector = selector.clone();
                let attribute = attribute.clone();
                // Markup parsing is CPU-bound and the parsed tree is not Send.
                tokio::task::spawn_blocking(move || {
                    select_records(&html, &selector, attribute.as_deref())
                })
                .await
                .map_err(|e| FetchError::terminal(format!("markup parse task failed: {e}")))?
            }
            ExtractionMethod::Custom(parser) => {
                let page = self
                    .executor
                    .fetch(target, &WaitCondition::DocumentReady, attempt, cancel)
                    .await?;
                let html = page.text().into_owned();
                let parser = parser.clone();
                tokio::task::spawn_blocking(move || {
                    parser(&html)
                        .map_err(|e| FetchError::terminal(format!("custom parser failed: {e:#}")))
                })
                .await
                .map_err(|e| FetchError::terminal(format!("markup parse task failed: {e}")))?
            }
            ExtractionMethod::Api(extractor) => {
                extractor
                    .extract(self.executor.transport(), target, cancel)
                    .await
            }
        }
    }

    fn note_retry(&self, url: &str, attempt: u32) {
        if attempt > 0 {
            self.events.emit(EngineEvent::RetryScheduled {
                url: url.to_string(),
                attempt,
                delay_ms: self.retry.backoff(attempt - 1).as_millis() as u64,
            });
        }
    }

    fn skip_item(&self, key: &str, reason: String) {
        warn!("{key}: skipped: {reason}");
        self.events.emit(EngineEvent::ItemSkipped {
            item: key.to_string(),
            reason,
        });
    }

    fn abort(&self, catalog: &str, err: FetchError) -> FetchError {
        self.events.emit(EngineEvent::RunAborted {
            catalog: catalog.to_string(),
            reason: err.to_string(),
        });
        err
    }
}

enum ItemOutcome {
    Archived,
    Abandoned,
    Skipped,
}

/// Outcomes that stop the whole run rather than one item.
fn is_run_fatal(err: &FetchError) -> bool {
    matches!(err, FetchError::Challenge { .. } | FetchError::Cancelled)
}

/// Select records from raw markup: one record per matching element, locator
/// taken from `attribute` when named, element text otherwise. Elements with
/// an empty value are dropped.
fn select_records(
    html: &str,
    selector: &scraper::Selector,
    attribute: Option<&str>,
) -> Result<Vec<RawRecord>, FetchError> {
    let document = scraper::Html::parse_document(html);
    let mut records = Vec::new();
    for element in document.select(selector) {
        let value = match attribute {
            Some(attr) => element.value().attr(attr).map(str::to_string),
            None => Some(element.text().collect::<String>()),
        };
        if let Some(locator) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            records.push(RawRecord {
                id: (records.len() + 1).to_string(),
                locator,
            });
        }
    }
    Ok(records)
}

/// Progress bookkeeping for one run: blends whole-item and intra-item
/// progress into a fraction that never decreases.
struct ProgressTracker {
    tx: Option<ProgressSender>,
    total: usize,
    /// Items already acquired before the run started.
    base: usize,
    last: f32,
}

impl ProgressTracker {
    fn new(tx: Option<ProgressSender>, total: usize, base: usize) -> Self {
        Self {
            tx,
            total,
            base,
            last: 0.0,
        }
    }

    fn emit(
        &mut self,
        message: String,
        done_this_run: usize,
        intra: f32,
        item_ordinal: Option<usize>,
        item_index: Option<usize>,
    ) {
        let raw = if self.total == 0 {
            1.0
        } else {
            (self.base as f32 + done_this_run as f32 + intra.clamp(0.0, 1.0)) / self.total as f32
        };
        let fraction = raw.clamp(0.0, 1.0).max(self.last);
        self.last = fraction;
        progress::emit(
            &self.tx,
            ProgressEvent {
                message,
                fraction,
                item_ordinal,
                item_index,
                item_total: Some(self.total),
            },
        );
    }
}
