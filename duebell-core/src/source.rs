//! TaskSource port: full-state task snapshots from the task store.
//!
//! Every delivery is the complete current list, not a diff, so a `watch`
//! channel fits: slow consumers just see the latest list.

use std::sync::Arc;
use tokio::sync::watch;

use crate::task::TaskRecord;

pub trait TaskSource {
    /// Receiver whose current value is the latest snapshot.
    fn subscribe(&self) -> watch::Receiver<Vec<TaskRecord>>;
}

/// In-process task source; whoever owns the task list calls `publish`.
#[derive(Debug, Clone)]
pub struct WatchTaskSource {
    tx: Arc<watch::Sender<Vec<TaskRecord>>>,
}

impl Default for WatchTaskSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchTaskSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, records: Vec<TaskRecord>) {
        self.tx.send_replace(records);
    }

    /// Publish only if the snapshot differs from the current one.
    pub fn publish_if_changed(&self, records: Vec<TaskRecord>) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == records {
                false
            } else {
                *current = records;
                true
            }
        })
    }
}

impl TaskSource for WatchTaskSource {
    fn subscribe(&self) -> watch::Receiver<Vec<TaskRecord>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> TaskRecord {
        TaskRecord {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn subscribers_see_latest_snapshot() {
        let source = WatchTaskSource::new();
        let mut rx = source.subscribe();

        source.publish(vec![record("a")]);
        source.publish(vec![record("a"), record("b")]);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 2);
    }

    #[test]
    fn unchanged_snapshot_is_not_republished() {
        let source = WatchTaskSource::new();
        assert!(source.publish_if_changed(vec![record("a")]));
        assert!(!source.publish_if_changed(vec![record("a")]));
        assert!(source.publish_if_changed(vec![]));
    }
}
