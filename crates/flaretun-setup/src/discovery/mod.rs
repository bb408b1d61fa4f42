//! Recovery of the public tunnel URL.
//!
//! The URL is assigned by the remote edge and only ever appears in the
//! tunnel's own output. [`EndpointDiscoverer`] tries the available
//! observation channels in order under one overall deadline:
//!
//! 1. the service log file, re-read on every poll;
//! 2. the system journal for the unit (POSIX service mode only);
//! 3. a disposable foreground run whose output is scanned live.
//!
//! A backup URL captured before installation is used only when all three
//! fail, and is reported as unverified.

mod disposable;
mod journal;

use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use flaretun_core::config::DiscoverySettings;
use flaretun_core::{Clock, EndpointPattern, PollPolicy, Result};

pub use disposable::ProcessRunner;
pub use journal::JournalctlReader;

/// Channel that produced a discovered URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    LogFile,
    SystemJournal,
    DisposableRun,
    /// Captured by a throwaway run before the service existed. Usually a
    /// different tunnel instance than the one the service runs.
    Backup,
    None,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogFile => write!(f, "log file"),
            Self::SystemJournal => write!(f, "system journal"),
            Self::DisposableRun => write!(f, "disposable run"),
            Self::Backup => write!(f, "backup run (unverified)"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub url: Option<String>,
    pub source: DiscoverySource,
}

impl DiscoveryResult {
    pub fn found_in(url: impl Into<String>, source: DiscoverySource) -> Self {
        Self {
            url: Some(url.into()),
            source,
        }
    }

    pub const fn not_found() -> Self {
        Self {
            url: None,
            source: DiscoverySource::None,
        }
    }

    pub const fn found(&self) -> bool {
        self.url.is_some()
    }

    /// Found through a channel that observed the service itself (or, for
    /// disposable runs, the same binary and target).
    pub fn is_verified(&self) -> bool {
        self.found() && self.source != DiscoverySource::Backup
    }
}

/// Reader for the service manager's structured log.
pub trait JournalReader {
    fn read_recent(&self, unit: &str, lines: usize) -> Result<String>;
}

/// What a disposable run observed before it was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposableOutcome {
    pub url: Option<String>,
    /// Process id of the reaped child, if one was spawned.
    pub pid: Option<u32>,
}

/// Spawns an unmanaged instance of the tunnel binary and scans its output.
///
/// Implementations must have terminated and reaped the instance before
/// `run` returns, on every path.
pub trait DisposableRunner {
    fn run(&self, timeout: Duration) -> Result<DisposableOutcome>;

    /// Worst-case extra time spent terminating the instance after `timeout`.
    fn termination_grace(&self) -> Duration {
        Duration::ZERO
    }
}

/// Timing for every discovery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    pub log: PollPolicy,
    pub journal: PollPolicy,
    pub journal_lines: usize,
    pub disposable_timeout: Duration,
    /// Overall budget across all channels.
    pub deadline: Duration,
}

impl From<&DiscoverySettings> for DiscoveryPolicy {
    fn from(settings: &DiscoverySettings) -> Self {
        Self {
            log: settings.log_policy(),
            journal: settings.journal_policy(),
            journal_lines: settings.journal_lines,
            disposable_timeout: settings.disposable_timeout(),
            deadline: settings.deadline(),
        }
    }
}

pub struct EndpointDiscoverer<'a> {
    pattern: EndpointPattern,
    log_path: PathBuf,
    journal: Option<(String, &'a dyn JournalReader)>,
    disposable: Option<&'a dyn DisposableRunner>,
    policy: DiscoveryPolicy,
    clock: &'a dyn Clock,
}

impl<'a> EndpointDiscoverer<'a> {
    pub fn new(
        pattern: EndpointPattern,
        log_path: impl Into<PathBuf>,
        policy: DiscoveryPolicy,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            pattern,
            log_path: log_path.into(),
            journal: None,
            disposable: None,
            policy,
            clock,
        }
    }

    /// Enable the structured-log fallback for `unit`.
    #[must_use]
    pub fn with_journal(mut self, unit: impl Into<String>, reader: &'a dyn JournalReader) -> Self {
        self.journal = Some((unit.into(), reader));
        self
    }

    /// Enable the disposable-run fallback.
    #[must_use]
    pub fn with_disposable(mut self, runner: &'a dyn DisposableRunner) -> Self {
        self.disposable = Some(runner);
        self
    }

    /// Run the channels in order and return the first URL found.
    ///
    /// `backup` is substituted only when every channel fails.
    pub fn discover(&self, backup: Option<&str>) -> DiscoveryResult {
        let deadline = self.clock.now() + self.policy.deadline;

        if let Some(url) = self.scan_log_file(deadline) {
            return DiscoveryResult::found_in(url, DiscoverySource::LogFile);
        }
        if let Some(url) = self.scan_journal(deadline) {
            return DiscoveryResult::found_in(url, DiscoverySource::SystemJournal);
        }
        if let Some(url) = self.disposable_run(deadline) {
            return DiscoveryResult::found_in(url, DiscoverySource::DisposableRun);
        }
        if let Some(url) = backup {
            tracing::warn!(
                "falling back to the backup URL {url}: it came from a separate run and \
                 probably does not belong to the running service"
            );
            return DiscoveryResult::found_in(url, DiscoverySource::Backup);
        }
        DiscoveryResult::not_found()
    }

    fn scan_log_file(&self, deadline: Instant) -> Option<String> {
        let policy = self.policy.log;
        tracing::info!(
            "waiting for the tunnel URL in {} (up to {:?})",
            self.log_path.display(),
            policy.budget()
        );
        policy.poll(self.clock, deadline, |attempt| {
            let found = match std::fs::read(&self.log_path) {
                Ok(bytes) => self
                    .pattern
                    .find_last(&String::from_utf8_lossy(&bytes))
                    .map(str::to_string),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::trace!("log file not created yet");
                    None
                }
                Err(e) => {
                    tracing::debug!("cannot read {}: {e}", self.log_path.display());
                    None
                }
            };
            if found.is_none() && attempt % 5 == 0 {
                tracing::info!("still waiting for the tunnel URL ({attempt}/{})", policy.max_attempts);
            }
            found
        })
    }

    fn scan_journal(&self, deadline: Instant) -> Option<String> {
        let (unit, reader) = self.journal.as_ref()?;
        tracing::info!("log file had no URL, checking the system journal for {unit}");
        self.policy.journal.poll(self.clock, deadline, |attempt| {
            match reader.read_recent(unit, self.policy.journal_lines) {
                Ok(text) => self.pattern.find_last(&text).map(str::to_string),
                Err(e) => {
                    tracing::debug!("journal read {attempt} failed: {e}");
                    None
                }
            }
        })
    }

    fn disposable_run(&self, deadline: Instant) -> Option<String> {
        let runner = self.disposable?;
        let remaining = deadline
            .saturating_duration_since(self.clock.now())
            .saturating_sub(runner.termination_grace());
        let timeout = self.policy.disposable_timeout.min(remaining);
        if timeout.is_zero() {
            tracing::warn!("discovery deadline reached, skipping the disposable run");
            return None;
        }

        tracing::info!("starting a disposable tunnel run to observe its output ({timeout:?})");
        match runner.run(timeout) {
            Ok(outcome) => outcome.url,
            Err(e) => {
                tracing::warn!("disposable run failed: {e}");
                None
            }
        }
    }
}

/// Run a disposable instance before the service is installed and keep its
/// URL as an unverified backup.
pub fn capture_backup(runner: &dyn DisposableRunner, timeout: Duration) -> Option<String> {
    tracing::info!("capturing a backup URL from a throwaway run");
    match runner.run(timeout) {
        Ok(DisposableOutcome { url: Some(url), .. }) => {
            tracing::info!("backup URL captured (unverified): {url}");
            Some(url)
        }
        Ok(_) => {
            tracing::warn!("throwaway run produced no URL");
            None
        }
        Err(e) => {
            tracing::warn!("throwaway run failed: {e}");
            None
        }
    }
}
