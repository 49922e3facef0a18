use anyhow::{Context, Result};
use duebell_core::{TaskRecord, TaskSource, WatchTaskSource, decode_records};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Accepted layouts of a task export: a bare array or `{ "tasks": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskFile {
    List(Vec<serde_json::Value>),
    Wrapped { tasks: Vec<serde_json::Value> },
}

pub fn parse_snapshot(raw: &str) -> Result<Vec<TaskRecord>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    // Only the outer layout is strict; each task is decoded on its own.
    let file: TaskFile = serde_json::from_str(raw).context("parse task list")?;
    let values = match file {
        TaskFile::List(values) => values,
        TaskFile::Wrapped { tasks } => tasks,
    };
    Ok(decode_records(values))
}

/// Read a task export. A missing file is an empty list.
pub fn read_snapshot(path: &Path) -> Result<Vec<TaskRecord>> {
    match fs::read_to_string(path) {
        Ok(raw) => parse_snapshot(&raw).with_context(|| format!("read {}", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}

/// Task source backed by a JSON file, re-read every `poll` and published
/// when its contents change.
#[derive(Debug, Clone)]
pub struct FileTaskSource {
    path: PathBuf,
    poll: Duration,
    inner: WatchTaskSource,
}

impl FileTaskSource {
    pub fn new(path: impl Into<PathBuf>, poll: Duration) -> Self {
        Self {
            path: path.into(),
            poll: poll.max(Duration::from_millis(100)),
            inner: WatchTaskSource::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file once and publish it. Returns whether the snapshot
    /// changed; unreadable or malformed files keep the previous snapshot.
    pub fn poll_once(&self, last_raw: &mut Option<String>) -> bool {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!(path = %self.path.display(), "cannot read task file: {e}");
                return false;
            }
        };
        if last_raw.as_deref() == Some(raw.as_str()) {
            return false;
        }

        match parse_snapshot(&raw) {
            Ok(records) => {
                *last_raw = Some(raw);
                let n = records.len();
                let changed = self.inner.publish_if_changed(records);
                if changed {
                    debug!(path = %self.path.display(), tasks = n, "task snapshot updated");
                }
                changed
            }
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring malformed task file: {e:#}");
                *last_raw = Some(raw);
                false
            }
        }
    }

    /// Poll in the background until `shutdown` flips to true.
    pub fn spawn(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move {
            let mut last_raw = None;
            let mut interval = tokio::time::interval(source.poll);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(path = %source.path.display(), "watching task file");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        source.poll_once(&mut last_raw);
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl TaskSource for FileTaskSource {
    fn subscribe(&self) -> watch::Receiver<Vec<TaskRecord>> {
        self.inner.subscribe()
    }
}
