//! Per-domain persisted credential store backed by SQLite.
//!
//! One row per domain; the full record is stored as a JSON column so it
//! round-trips losslessly. `INSERT OR REPLACE` gives last-writer-wins under
//! concurrent writers, which is all the engine needs: the store must not
//! corrupt, but it need not serialize.
//!
//! Absence is a normal outcome, never an error. An invalidated record is
//! kept on disk but [`CredentialStore::load`] refuses to return it, so it can
//! never be applied to a new request.

use super::BypassCredentials;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct CredentialStore {
    db: Mutex<Connection>,
}

impl CredentialStore {
    /// Open or create a credential store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)
            .with_context(|| format!("failed to open credential store: {}", path.display()))?;

        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS bypass_credentials (
                domain TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                invalidated INTEGER NOT NULL DEFAULT 0,
                saved_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .context("failed to create bypass_credentials table")?;

        Ok(Self { db: Mutex::new(db) })
    }

    /// Open the default store at `~/.gatecrash/credentials.db`.
    pub fn default_store() -> Result<Self> {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".gatecrash")
            .join("credentials.db");
        Self::open(&path)
    }

    /// Load the credentials for a domain. Returns `None` when no record
    /// exists or the record has been invalidated.
    pub fn load(&self, domain: &str) -> Result<Option<BypassCredentials>> {
        let db = self.db.lock().expect("credential store lock poisoned");
        let mut stmt = db.prepare(
            "SELECT record FROM bypass_credentials WHERE domain = ?1 AND invalidated = 0",
        )?;

        let result = stmt.query_row(rusqlite::params![domain], |row| {
            let record: String = row.get(0)?;
            Ok(record)
        });

        match result {
            Ok(record) => {
                let creds = serde_json::from_str(&record).with_context(|| {
                    format!("corrupt credential record for domain '{domain}'")
                })?;
                Ok(Some(creds))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Save (or overwrite) the credentials for a domain, clearing any
    /// invalidation flag.
    pub fn save(&self, domain: &str, creds: &BypassCredentials) -> Result<()> {
        let record = serde_json::to_string(creds)?;
        let db = self.db.lock().expect("credential store lock poisoned");
        db.execute(
            "INSERT OR REPLACE INTO bypass_credentials (domain, record, invalidated)
             VALUES (?1, ?2, 0)",
            rusqlite::params![domain, record],
        )?;
        Ok(())
    }

    /// Mark a domain's record as stale without removing it. `load` will no
    /// longer return it. Returns whether a record was present.
    pub fn invalidate(&self, domain: &str) -> Result<bool> {
        let db = self.db.lock().expect("credential store lock poisoned");
        let rows = db.execute(
            "UPDATE bypass_credentials SET invalidated = 1 WHERE domain = ?1",
            rusqlite::params![domain],
        )?;
        Ok(rows > 0)
    }

    /// Remove a domain's record entirely. Returns whether a record existed.
    pub fn delete(&self, domain: &str) -> Result<bool> {
        let db = self.db.lock().expect("credential store lock poisoned");
        let rows = db.execute(
            "DELETE FROM bypass_credentials WHERE domain = ?1",
            rusqlite::params![domain],
        )?;
        Ok(rows > 0)
    }

    /// List all domains with a stored (possibly invalidated) record.
    pub fn list_domains(&self) -> Result<Vec<String>> {
        let db = self.db.lock().expect("credential store lock poisoned");
        let mut stmt = db.prepare("SELECT domain FROM bypass_credentials ORDER BY domain")?;
        let domains = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(domains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CookieRecord;
    use chrono::Utc;

    fn sample_creds(value: &str) -> BypassCredentials {
        BypassCredentials {
            session: CookieRecord {
                name: "cf_clearance".to_string(),
                value: value.to_string(),
                domain: ".example.com".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: true,
                expires_at: None,
            },
            extra_cookies: Vec::new(),
            user_agent: "Mozilla/5.0 test".to_string(),
            platform: "Linux".to_string(),
            captured_at: Utc::now(),
        }
    }

    fn open_temp() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(&dir.path().join("creds.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (_dir, store) = open_temp();
        let creds = sample_creds("token-1");
        store.save("example.com", &creds).unwrap();
        assert_eq!(store.load("example.com").unwrap().unwrap(), creds);
    }

    #[test]
    fn test_absence_is_not_an_error() {
        let (_dir, store) = open_temp();
        assert!(store.load("unknown.com").unwrap().is_none());
        assert!(!store.delete("unknown.com").unwrap());
        assert!(!store.invalidate("unknown.com").unwrap());
    }

    #[test]
    fn test_invalidated_record_is_never_loaded() {
        let (_dir, store) = open_temp();
        store.save("example.com", &sample_creds("t")).unwrap();
        assert!(store.invalidate("example.com").unwrap());
        assert!(store.load("example.com").unwrap().is_none());
        // Still present until deleted.
        assert_eq!(store.list_domains().unwrap(), vec!["example.com"]);
    }

    #[test]
    fn test_save_clears_invalidation() {
        let (_dir, store) = open_temp();
        store.save("example.com", &sample_creds("old")).unwrap();
        store.invalidate("example.com").unwrap();
        store.save("example.com", &sample_creds("fresh")).unwrap();
        let loaded = store.load("example.com").unwrap().unwrap();
        assert_eq!(loaded.session.value, "fresh");
    }

    #[test]
    fn test_last_writer_wins() {
        let (_dir, store) = open_temp();
        store.save("example.com", &sample_creds("first")).unwrap();
        store.save("example.com", &sample_creds("second")).unwrap();
        let loaded = store.load("example.com").unwrap().unwrap();
        assert_eq!(loaded.session.value, "second");
    }

    #[test]
    fn test_delete_removes_record() {
        let (_dir, store) = open_temp();
        store.save("example.com", &sample_creds("t")).unwrap();
        assert!(store.delete("example.com").unwrap());
        assert!(store.load("example.com").unwrap().is_none());
        assert!(store.list_domains().unwrap().is_empty());
    }
}
