//! Reminder service: the long-running loop around a [`ReminderScheduler`].
//!
//! One task owns the scheduler and multiplexes four inputs:
//! task snapshots, timer fires, a fixed background tick (windows open purely
//! because time passes) and shutdown.

use chrono_tz::Tz;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::scheduler::ReminderScheduler;
use crate::sink::NotificationSink;
use crate::source::TaskSource;
use crate::task::{TaskRecord, project_snapshot};

/// Interval between background reconciliation ticks (seconds).
pub const DEFAULT_TICK_SECS: u64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub tick: Duration,
    /// Zone for due dates stored as local wall time.
    pub timezone: Tz,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(DEFAULT_TICK_SECS),
            timezone: chrono_tz::UTC,
        }
    }
}

pub struct ReminderService<C: Clock, S: NotificationSink> {
    scheduler: ReminderScheduler<C, S>,
    config: ServiceConfig,
}

impl<C: Clock, S: NotificationSink> ReminderService<C, S> {
    pub fn new(scheduler: ReminderScheduler<C, S>, config: ServiceConfig) -> Self {
        Self { scheduler, config }
    }

    pub fn scheduler(&self) -> &ReminderScheduler<C, S> {
        &self.scheduler
    }

    fn apply_snapshot(&mut self, records: Vec<TaskRecord>) {
        let tasks = project_snapshot(records, self.config.timezone);
        let now = self.scheduler.clock().now();
        self.scheduler.reconcile(&tasks, now);
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    /// Returns the scheduler with all timers cancelled.
    pub async fn run<T: TaskSource>(
        mut self,
        source: &T,
        mut shutdown: watch::Receiver<bool>,
    ) -> ReminderScheduler<C, S> {
        let mut tasks_rx = source.subscribe();
        let initial = tasks_rx.borrow_and_update().clone();
        self.apply_snapshot(initial);

        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately; the initial snapshot covered it.
        interval.tick().await;

        let mut source_open = true;
        info!(tick_secs = self.config.tick.as_secs(), "reminder service started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = tasks_rx.changed(), if source_open => {
                    if changed.is_err() {
                        debug!("task source closed; continuing on ticks only");
                        source_open = false;
                        continue;
                    }
                    let records = tasks_rx.borrow_and_update().clone();
                    self.apply_snapshot(records);
                }
                Some(event) = self.scheduler.next_fired() => {
                    self.scheduler.handle_fired(event);
                }
                _ = interval.tick() => {
                    self.scheduler.tick();
                }
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        self.scheduler.shutdown();
        info!("reminder service stopped");
        self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::ledger::ReminderLedger;
    use crate::sink::InAppSink;
    use crate::source::WatchTaskSource;
    use crate::time::DueDateValue;
    use chrono::Utc;

    fn record(id: &str, due_in_minutes: i64, completed: bool) -> TaskRecord {
        let due = Utc::now() + chrono::Duration::minutes(due_in_minutes);
        TaskRecord {
            id: Some(id.to_string()),
            text: format!("task {id}"),
            due_date: Some(DueDateValue::Text(due.to_rfc3339())),
            completed,
            ..Default::default()
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn delivers_from_snapshots_and_stops_cleanly() {
        let sink = InAppSink::default();
        let scheduler = ReminderScheduler::new(TokioClock, sink.clone(), ReminderLedger::in_memory());
        let service = ReminderService::new(scheduler, ServiceConfig::default());

        let source = WatchTaskSource::new();
        source.publish(vec![record("soon", 30, false), record("later", 60 * 48, false)]);

        let (stop_tx, stop_rx) = watch::channel(false);
        let src = source.clone();
        let handle = tokio::spawn(async move { service.run(&src, stop_rx).await });

        wait_for(|| sink.banners().len() >= 2).await;
        assert_eq!(sink.banners().len(), 2);

        // A new snapshot with a freshly overdue task delivers once more.
        source.publish(vec![record("soon", 30, false), record("late", -5, false)]);
        wait_for(|| sink.banners().len() >= 3).await;

        stop_tx.send(true).unwrap();
        let scheduler = handle.await.unwrap();

        assert_eq!(sink.banners().len(), 3);
        assert_eq!(scheduler.ledger().len(), 3);
        assert!(scheduler.pending_keys().is_empty());
    }
}
