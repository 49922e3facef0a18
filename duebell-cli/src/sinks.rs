use duebell_core::{
    Authorization, Notification, NotificationSink, ReminderError, ReminderKey, Task,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Config, SinkKind};

/// Prints reminders as banners on a writer (stdout by default).
pub struct ConsoleSink<W: Write = std::io::Stdout> {
    out: W,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn show(&mut self, n: &Notification) -> duebell_core::Result<()> {
        writeln!(self.out, "[{}] {}  ({})", n.title, n.body, n.tag)
            .and_then(|_| self.out.flush())
            .map_err(|e| ReminderError::Delivery(e.to_string()))
    }
}

impl<W: Write> NotificationSink for ConsoleSink<W> {
    fn deliver(&mut self, key: &ReminderKey, task: &Task) -> duebell_core::Result<()> {
        self.show(&Notification::for_reminder(key.kind, task))
    }

    fn is_available(&self) -> bool {
        true
    }

    fn request_authorization(&mut self) -> Authorization {
        Authorization::Granted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notifier {
    NotifySend,
    Osascript,
    /// User-configured command, called as `<cmd> <title> <body>`.
    Custom,
}

/// Native desktop notifications through an external notifier binary.
#[derive(Debug, Clone)]
pub struct DesktopSink {
    notifier: Notifier,
    program: Option<PathBuf>,
}

impl DesktopSink {
    pub fn detect(notify_command: Option<&str>) -> Self {
        let (notifier, name) = match notify_command {
            Some(cmd) => (Notifier::Custom, cmd),
            None if cfg!(target_os = "macos") => (Notifier::Osascript, "osascript"),
            None => (Notifier::NotifySend, "notify-send"),
        };
        let program = which::which(name).ok();
        if program.is_none() {
            debug!(notifier = name, "desktop notifier not found on PATH");
        }
        Self { notifier, program }
    }

    fn program(&self) -> duebell_core::Result<&PathBuf> {
        self.program.as_ref().ok_or_else(|| {
            ReminderError::PermissionDenied("no desktop notifier available".into())
        })
    }

    /// Run the notifier and wait for it to exit.
    pub fn show(&self, n: &Notification) -> duebell_core::Result<()> {
        let program = self.program()?;
        let output = Command::new(program)
            .args(command_args(self.notifier, n))
            .output()
            .map_err(|e| ReminderError::Delivery(format!("running {}: {e}", program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReminderError::Delivery(format!(
                "{} failed: {}",
                program.display(),
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Start the notifier without waiting for it. Inside a tokio runtime the
    /// child is reaped by a background task and killed if it outlives
    /// [`NOTIFIER_TIMEOUT`]. Outside a runtime this falls back to [`Self::show`].
    pub fn launch(&self, n: &Notification) -> duebell_core::Result<()> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return self.show(n);
        };
        let program = self.program()?;
        let child = tokio::process::Command::new(program)
            .args(command_args(self.notifier, n))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ReminderError::Delivery(format!("running {}: {e}", program.display())))?;

        handle.spawn(reap(child, program.display().to_string()));
        Ok(())
    }
}

pub const NOTIFIER_TIMEOUT: Duration = Duration::from_secs(10);

async fn reap(mut child: tokio::process::Child, program: String) {
    match tokio::time::timeout(NOTIFIER_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) if status.success() => {}
        Ok(Ok(status)) => warn!(notifier = %program, "notification failed: {status}"),
        Ok(Err(e)) => warn!(notifier = %program, "notification failed: {e}"),
        Err(_) => {
            warn!(notifier = %program, "notifier timed out, killing it");
            if let Err(e) = child.start_kill() {
                warn!(notifier = %program, "cannot kill notifier: {e}");
            }
        }
    }
}

impl NotificationSink for DesktopSink {
    fn deliver(&mut self, key: &ReminderKey, task: &Task) -> duebell_core::Result<()> {
        self.launch(&Notification::for_reminder(key.kind, task))
    }

    fn is_available(&self) -> bool {
        self.program.is_some()
    }

    fn request_authorization(&mut self) -> Authorization {
        if self.is_available() {
            Authorization::Granted
        } else {
            Authorization::Denied
        }
    }
}

pub fn command_args(notifier: Notifier, n: &Notification) -> Vec<String> {
    match notifier {
        Notifier::NotifySend => vec![
            "--app-name=duebell".to_string(),
            format!("--hint=string:x-duebell-tag:{}", n.tag),
            n.title.clone(),
            n.body.clone(),
        ],
        Notifier::Osascript => vec![
            "-e".to_string(),
            format!(
                "display notification \"{}\" with title \"{}\"",
                escape_applescript(&n.body),
                escape_applescript(&n.title)
            ),
        ],
        Notifier::Custom => vec![n.title.clone(), n.body.clone()],
    }
}

fn escape_applescript(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// The sink selected by config.
pub enum CliSink {
    Console(ConsoleSink),
    Desktop(DesktopSink),
}

impl CliSink {
    pub fn from_config(cfg: &Config) -> Self {
        match cfg.reminders.sink {
            SinkKind::Console => Self::Console(ConsoleSink::stdout()),
            SinkKind::Desktop => {
                Self::Desktop(DesktopSink::detect(cfg.reminders.notify_command.as_deref()))
            }
        }
    }

    /// Show an arbitrary notification, outside the reminder flow.
    pub fn show(&mut self, n: &Notification) -> duebell_core::Result<()> {
        match self {
            Self::Console(s) => s.show(n),
            Self::Desktop(s) => s.show(n),
        }
    }
}

impl NotificationSink for CliSink {
    fn deliver(&mut self, key: &ReminderKey, task: &Task) -> duebell_core::Result<()> {
        match self {
            Self::Console(s) => s.deliver(key, task),
            Self::Desktop(s) => s.deliver(key, task),
        }
    }

    fn is_available(&self) -> bool {
        match self {
            Self::Console(s) => s.is_available(),
            Self::Desktop(s) => s.is_available(),
        }
    }

    fn request_authorization(&mut self) -> Authorization {
        match self {
            Self::Console(s) => s.request_authorization(),
            Self::Desktop(s) => s.request_authorization(),
        }
    }
}
