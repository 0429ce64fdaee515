//! Seams to external collaborators.
//!
//! The engine decides *when* things happen; these traits own *how*. Archive
//! packaging, catalog bookkeeping, and the human hand-off UI all live on the
//! other side of this boundary.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Destination for completed artifacts.
pub trait DestinationStore: Send + Sync {
    /// Keys of items already materialized for a catalog. Computed once per
    /// run and used to filter the item set before any work starts, so
    /// idempotent re-runs never re-fetch or overwrite completed items.
    fn acquired_keys(&self, catalog: &str) -> anyhow::Result<BTreeSet<String>>;

    /// Temporary working area for one item. The manager creates it lazily at
    /// item start and guarantees its removal on every exit path.
    fn work_dir(&self, catalog: &str, item_key: &str) -> PathBuf;

    /// Package the staged directory into the destination artifact for an
    /// item. Member order inside the artifact is the implementation's
    /// business (sorted by filename by convention); the staged files already
    /// carry zero-padded names.
    fn write_artifact(&self, catalog: &str, item_key: &str, staged: &Path) -> anyhow::Result<()>;
}

/// Human hand-off for challenge resolution.
///
/// Invoked exactly once per detected challenge. Must not block: the engine
/// returns the challenge outcome to its caller instead of waiting for the
/// human.
pub trait HumanHandoff: Send + Sync {
    fn open_for_resolution(&self, url: &str);
}

/// Hand-off that only logs. Useful for headless deployments and tests.
pub struct LoggingHandoff;

impl HumanHandoff for LoggingHandoff {
    fn open_for_resolution(&self, url: &str) {
        tracing::warn!("challenge requires manual resolution: {url}");
    }
}
