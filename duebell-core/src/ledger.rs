//! Reminder ledger: the at-most-once record of reminders already delivered.
//!
//! Keyed by `(task, kind)`. Entries are written the moment a reminder fires,
//! never mutated, and pruned once older than the retention window. Storage is
//! pluggable via [`PersistenceBackend`]; any storage failure drops the ledger
//! to in-memory mode with a single warning.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::error::{ReminderError, Result};
use crate::reminders::ReminderKey;

pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// One delivered reminder. Serialized as `{ "taskId", "kind", "firedAt" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub key: ReminderKey,
    pub fired_at: DateTime<Utc>,
}

/// Durable storage for ledger entries. Best-effort.
pub trait PersistenceBackend: Send {
    fn load(&self) -> Result<Vec<LedgerEntry>>;
    fn save(&mut self, entries: &[LedgerEntry]) -> Result<()>;
}

/// Process-local backend. Clones share storage, so a fresh ledger built
/// on a clone behaves like a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<LedgerEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PersistenceBackend for MemoryBackend {
    fn load(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.snapshot())
    }

    fn save(&mut self, entries: &[LedgerEntry]) -> Result<()> {
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = entries.to_vec();
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDocument {
    session: String,
    #[serde(default)]
    entries: Vec<LedgerEntry>,
}

/// One JSON document per user session, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
    session: String,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session: session.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where an unreadable ledger document is kept for inspection.
    pub fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".corrupt");
        self.path.with_file_name(name)
    }
}

impl PersistenceBackend for JsonFileBackend {
    fn load(&self) -> Result<Vec<LedgerEntry>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ReminderError::PersistenceUnavailable(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let doc: LedgerDocument = match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                // Move it aside so the next save cannot destroy it.
                let aside = self.corrupt_path();
                std::fs::rename(&self.path, &aside).map_err(|re| {
                    ReminderError::PersistenceUnavailable(format!(
                        "malformed ledger at {} ({e}) could not be moved aside: {re}",
                        self.path.display()
                    ))
                })?;
                warn!(
                    "malformed reminder ledger moved to {}, starting empty: {e}",
                    aside.display()
                );
                return Ok(Vec::new());
            }
        };

        if doc.session != self.session {
            debug!(
                "reminder ledger at {} belongs to session '{}', starting empty",
                self.path.display(),
                doc.session
            );
            return Ok(Vec::new());
        }
        Ok(doc.entries)
    }

    fn save(&mut self, entries: &[LedgerEntry]) -> Result<()> {
        let unavailable = |what: &str, e: &dyn std::fmt::Display| {
            ReminderError::PersistenceUnavailable(format!("{what} {}: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| unavailable("cannot create dir for", &e))?;
        }

        let doc = LedgerDocument {
            session: self.session.clone(),
            entries: entries.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&doc).map_err(|e| unavailable("cannot encode", &e))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| unavailable("cannot write", &e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| unavailable("cannot finalize", &e))?;
        Ok(())
    }
}

pub struct ReminderLedger {
    entries: HashMap<ReminderKey, DateTime<Utc>>,
    backend: Option<Box<dyn PersistenceBackend>>,
    retention: Duration,
}

impl std::fmt::Debug for ReminderLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderLedger")
            .field("entries", &self.entries.len())
            .field("persistent", &self.backend.is_some())
            .field("retention", &self.retention)
            .finish()
    }
}

impl Default for ReminderLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ReminderLedger {
    pub fn in_memory() -> Self {
        Self {
            entries: HashMap::new(),
            backend: None,
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
        }
    }

    /// Build a ledger on `backend`, loading its entries now. If loading
    /// fails the ledger runs in memory only.
    pub fn with_backend(backend: impl PersistenceBackend + 'static) -> Self {
        let mut ledger = Self::in_memory();
        match backend.load() {
            Ok(entries) => {
                for e in entries {
                    ledger.entries.entry(e.key).or_insert(e.fired_at);
                }
                debug!("loaded {} reminder ledger entries", ledger.entries.len());
                ledger.backend = Some(Box::new(backend));
            }
            Err(e) => warn!("reminder ledger running in memory only: {e}"),
        }
        ledger
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Raise retention to at least `window`. Returns true if it changed.
    pub fn cover_window(&mut self, window: Duration) -> bool {
        if self.retention >= window {
            return false;
        }
        warn!(
            "reminder ledger retention {}h is shorter than the {}h reminder window, raising it",
            self.retention.num_hours(),
            window.num_hours()
        );
        self.retention = window;
        true
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_some()
    }

    pub fn has_fired(&self, key: &ReminderKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn fired_at(&self, key: &ReminderKey) -> Option<DateTime<Utc>> {
        self.entries.get(key).copied()
    }

    /// Record a delivery. Returns false (and changes nothing) if the key is
    /// already recorded.
    pub fn mark_fired(&mut self, key: &ReminderKey, at: DateTime<Utc>) -> bool {
        if self.entries.contains_key(key) {
            return false;
        }
        self.entries.insert(key.clone(), at);
        self.persist();
        true
    }

    /// Drop entries with `fired_at < now - retention`. Returns how many.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let before = self.entries.len();
        self.entries.retain(|_, fired_at| *fired_at >= cutoff);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("pruned {removed} reminder ledger entries");
            self.persist();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    /// Entries ordered by firing time, then key.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut out: Vec<LedgerEntry> = self
            .entries
            .iter()
            .map(|(key, fired_at)| LedgerEntry {
                key: key.clone(),
                fired_at: *fired_at,
            })
            .collect();
        out.sort_by(|a, b| a.fired_at.cmp(&b.fired_at).then_with(|| a.key.cmp(&b.key)));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&mut self) {
        if self.backend.is_none() {
            return;
        }
        let entries = self.entries();
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.save(&entries) {
                warn!("reminder ledger running in memory only: {e}");
                self.backend = None;
            }
        }
    }
}
