use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use duebell_core::{
    Authorization, Clock, JsonFileBackend, LedgerEntry, ManualClock, MemoryBackend, Notification,
    NotificationSink, PersistenceBackend, ReminderLedger, ReminderPolicy, ReminderScheduler,
    ReminderService, ServiceConfig, TokioClock, project_snapshot,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::sinks::CliSink;
use crate::state::ledger_path;
use crate::task_file::{FileTaskSource, read_snapshot};

#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// Show persisted reminder ledger entries
    Status {
        #[arg(long)]
        session: Option<String>,
    },

    /// Forget every fired reminder for a session
    Clear {
        #[arg(long)]
        session: Option<String>,
    },
}

fn resolve_session(cfg: &Config, session: Option<String>) -> String {
    session.unwrap_or_else(|| cfg.session.user_id.clone())
}

fn file_backend(session: &str) -> Result<JsonFileBackend> {
    Ok(JsonFileBackend::new(ledger_path(session)?, session))
}

fn open_ledger(cfg: &Config, session: &str) -> Result<ReminderLedger> {
    let ledger = ReminderLedger::with_backend(file_backend(session)?).with_retention(cfg.retention());
    if !ledger.is_persistent() {
        warn!(session, "reminder ledger is not persistent; reminders may repeat after restart");
    }
    Ok(ledger)
}

/// Long-running engine: watch the task file, fire reminders, stop on Ctrl-C.
pub async fn run(cfg: &Config, tasks: Option<PathBuf>, session: Option<String>) -> Result<()> {
    let tz = cfg.timezone()?;
    let session = resolve_session(cfg, session);
    let tasks_path = match tasks {
        Some(p) => p,
        None => cfg.tasks_path()?,
    };

    let mut sink = CliSink::from_config(cfg);
    if sink.request_authorization() == Authorization::Denied {
        warn!("notifications are not permitted; reminders will be recorded but not shown");
    }

    let ledger = open_ledger(cfg, &session)?;
    let scheduler = ReminderScheduler::new(TokioClock, sink, ledger);
    let service = ReminderService::new(
        scheduler,
        ServiceConfig {
            tick: Duration::from_secs(cfg.reminders.tick_secs.max(1)),
            timezone: tz,
        },
    );

    let source = FileTaskSource::new(&tasks_path, Duration::from_secs(cfg.tasks.poll_secs));
    let (stop_tx, stop_rx) = watch::channel(false);
    let poller = source.spawn(stop_rx.clone());

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => {
                warn!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        }
        let _ = stop_tx.send(true);
    });

    println!(
        "duebell watching {} (session {session}); Ctrl-C to stop",
        tasks_path.display()
    );
    let scheduler = service.run(&source, stop_rx).await;
    poller.await.context("task file poller")?;

    println!(
        "Stopped. {} reminders recorded for session {session}.",
        scheduler.ledger().len()
    );
    Ok(())
}

/// One pass at `at` (default now): reconcile, fire what is due, persist.
pub fn check(
    cfg: &Config,
    tasks: Option<PathBuf>,
    at: Option<String>,
    dry_run: bool,
    session: Option<String>,
) -> Result<()> {
    let tz = cfg.timezone()?;
    let session = resolve_session(cfg, session);
    let tasks_path = match tasks {
        Some(p) => p,
        None => cfg.tasks_path()?,
    };
    let now = match at.as_deref() {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("--at {s:?} is not RFC3339"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let records = read_snapshot(&tasks_path)?;
    let tasks = project_snapshot(records, tz);

    if dry_run {
        let entries = file_backend(&session)?.load()?;
        let mut ledger = ReminderLedger::with_backend(MemoryBackend::with_entries(entries))
            .with_retention(cfg.retention());
        ledger.prune(now);

        let policy = ReminderPolicy::default();
        let mut shown = 0usize;
        for task in &tasks {
            for key in policy.desired_reminders(task, now) {
                let state = match ledger.fired_at(&key) {
                    Some(at) => format!("already fired at {}", at.to_rfc3339()),
                    None => "would fire".to_string(),
                };
                println!("[DRY RUN] {key} {:?}: {state}", task.text);
                shown += 1;
            }
        }
        if shown == 0 {
            println!("No reminders due at {}.", now.to_rfc3339());
        }
        return Ok(());
    }

    let clock = ManualClock::new(now);
    let ledger = open_ledger(cfg, &session)?;
    let mut scheduler = ReminderScheduler::new(clock.clone(), CliSink::from_config(cfg), ledger);

    let report = scheduler.reconcile(&tasks, clock.now());
    clock.fire_due();
    let handled = scheduler.run_due();
    scheduler.shutdown();

    println!(
        "Checked {} tasks at {}: {} reminders due, {} handled, {} pruned.",
        tasks.len(),
        now.to_rfc3339(),
        report.desired,
        handled,
        report.pruned
    );
    Ok(())
}

pub fn ledger(cfg: &Config, cmd: LedgerCommand) -> Result<()> {
    match cmd {
        LedgerCommand::Status { session } => {
            let session = resolve_session(cfg, session);
            let backend = file_backend(&session)?;
            let mut entries: Vec<LedgerEntry> = backend.load()?;
            entries.sort_by(|a, b| a.fired_at.cmp(&b.fired_at));

            println!("Ledger: {} (session {session})", backend.path().display());
            println!("Entries: {}", entries.len());
            let cutoff = Utc::now() - cfg.retention();
            for e in &entries {
                let note = if e.fired_at < cutoff { " (expired)" } else { "" };
                println!("- {} fired at {}{note}", e.key, e.fired_at.to_rfc3339());
            }
            Ok(())
        }
        LedgerCommand::Clear { session } => {
            let session = resolve_session(cfg, session);
            let mut backend = file_backend(&session)?;
            backend
                .save(&[])
                .with_context(|| format!("clear {}", backend.path().display()))?;
            println!("Cleared reminder ledger for session {session}.");
            Ok(())
        }
    }
}

pub fn notify_test(cfg: &Config) -> Result<()> {
    let mut sink = CliSink::from_config(cfg);
    if sink.request_authorization() == Authorization::Denied {
        bail!("notifications are not available (check [reminders].sink and notify_command)");
    }
    sink.show(&Notification::welcome())
        .context("send welcome notification")?;
    println!("Sent test notification.");
    Ok(())
}
