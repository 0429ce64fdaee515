//! Per-item staging workspace.
//!
//! Sub-resources are staged on disk under a temporary directory and only
//! packaged into the destination artifact once the item is done. The
//! workspace is removed on every exit path (success, abandonment, skip,
//! abort) so interrupted runs never leave partial items behind.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

pub struct ItemWorkspace {
    path: PathBuf,
    cleaned: bool,
}

impl ItemWorkspace {
    /// Create the staging directory (and parents) at `path`.
    pub fn create(path: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            cleaned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stage one fetched sub-resource under its zero-padded file name.
    pub fn write_asset(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        fs::write(self.path.join(file_name), bytes)?;
        Ok(())
    }

    /// Remove the staging directory. Consumes the workspace so nothing can
    /// write into a removed directory.
    pub fn cleanup(mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            debug!("failed to remove staging dir {}: {e}", self.path.display());
        }
        self.cleaned = true;
    }
}

impl Drop for ItemWorkspace {
    // Backstop for early returns that bypass `cleanup`.
    fn drop(&mut self) {
        if !self.cleaned {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

/// Staged file name for a sub-resource: the zero-padded key plus the
/// locator's file extension when it has a sensible one.
pub fn asset_file_name(file_key: &str, locator: &str) -> String {
    let ext = Url::parse(locator)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
        })
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{file_key}.{}", ext.to_lowercase()),
        None => file_key.to_string(),
    }
}
