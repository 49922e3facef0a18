//! duebell-core: due-date reminder engine for a to-do list.
//!
//! Given a changing set of tasks, decide which reminders are due, fire each
//! one at most once, cancel the ones that stop applying, and remember what
//! fired across restarts.

pub mod clock;
pub mod error;
pub mod ledger;
pub mod reminders;
pub mod scheduler;
pub mod service;
pub mod sink;
pub mod source;
pub mod task;
pub mod time;

pub use clock::{CancellationToken, Clock, ManualClock, TimerCallback, TokioClock};
pub use error::{ReminderError, Result};
pub use ledger::{
    DEFAULT_RETENTION_HOURS, JsonFileBackend, LedgerEntry, MemoryBackend, PersistenceBackend,
    ReminderLedger,
};
pub use reminders::{
    Notification, ReminderKey, ReminderKind, ReminderPolicy, ReminderWindow, desired_reminders,
};
pub use scheduler::{FireOutcome, ReconcileReport, ReminderScheduler, ScheduledTimer, TimerFired};
pub use service::{DEFAULT_TICK_SECS, ReminderService, ServiceConfig};
pub use sink::{Authorization, Banner, InAppSink, NotificationSink, PermissionState};
pub use source::{TaskSource, WatchTaskSource};
pub use task::{Task, TaskId, TaskRecord, decode_records, project_snapshot};
pub use time::{DueDateValue, parse_due_date, parse_local_deadline_to_utc, parse_timezone};
