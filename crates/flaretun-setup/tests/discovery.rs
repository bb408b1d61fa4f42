#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Endpoint discovery across log file, journal and disposable runs.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use flaretun_core::{Clock, EndpointPattern, Error, ManualClock, PollPolicy, Result};
use flaretun_setup::discovery::{
    DiscoveryPolicy, DiscoverySource, DisposableOutcome, DisposableRunner, EndpointDiscoverer,
    JournalReader, capture_backup,
};

const SECOND: Duration = Duration::from_secs(1);
const NOISE: &str = "2024-12-20T10:00:00Z INF Starting tunnel\n\
                     2024-12-20T10:00:01Z INF Requesting new quick Tunnel on trycloudflare.com...\n";

fn policy() -> DiscoveryPolicy {
    DiscoveryPolicy {
        log: PollPolicy::new(SECOND, 15),
        journal: PollPolicy::new(2 * SECOND, 3),
        journal_lines: 50,
        disposable_timeout: Duration::from_secs(20),
        deadline: Duration::from_secs(90),
    }
}

/// Journal that always returns the same text and counts reads.
struct FakeJournal {
    text: String,
    reads: Cell<u32>,
}

impl FakeJournal {
    fn returning(text: &str) -> Self {
        Self {
            text: text.to_string(),
            reads: Cell::new(0),
        }
    }
}

impl JournalReader for FakeJournal {
    fn read_recent(&self, _unit: &str, lines: usize) -> Result<String> {
        assert_eq!(lines, 50);
        self.reads.set(self.reads.get() + 1);
        Ok(self.text.clone())
    }
}

/// Disposable runner that records the timeouts it was given.
struct FakeRunner {
    url: Option<String>,
    grace: Duration,
    runs: RefCell<Vec<Duration>>,
}

impl FakeRunner {
    fn yielding(url: Option<&str>) -> Self {
        Self {
            url: url.map(str::to_string),
            grace: Duration::ZERO,
            runs: RefCell::new(Vec::new()),
        }
    }

    fn runs(&self) -> Vec<Duration> {
        self.runs.borrow().clone()
    }
}

impl DisposableRunner for FakeRunner {
    fn run(&self, timeout: Duration) -> Result<DisposableOutcome> {
        self.runs.borrow_mut().push(timeout);
        Ok(DisposableOutcome {
            url: self.url.clone(),
            pid: None,
        })
    }

    fn termination_grace(&self) -> Duration {
        self.grace
    }
}

/// Manual clock that writes `content` to `path` on the n-th sleep, as if the
/// service produced it while the discoverer waited.
struct WritingClock {
    inner: ManualClock,
    path: PathBuf,
    content: String,
    on_sleep: u32,
}

impl Clock for WritingClock {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
        if self.inner.sleeps() == self.on_sleep {
            fs::write(&self.path, &self.content).unwrap();
        }
    }
}

fn log_in(dir: &Path) -> PathBuf {
    dir.join("cloudflared.log")
}

#[test]
fn log_file_match_on_third_poll_skips_other_channels() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_in(dir.path());
    let clock = WritingClock {
        inner: ManualClock::new(),
        path: log.clone(),
        content: format!("{NOISE}INF |  https://abc-123.trycloudflare.com  |\n"),
        on_sleep: 2,
    };
    let journal = FakeJournal::returning("");
    let runner = FakeRunner::yielding(Some("https://other.trycloudflare.com"));

    let result = EndpointDiscoverer::new(EndpointPattern::default(), &log, policy(), &clock)
        .with_journal("cloudflared-tunnel", &journal)
        .with_disposable(&runner)
        .discover(None);

    assert_eq!(result.url.as_deref(), Some("https://abc-123.trycloudflare.com"));
    assert_eq!(result.source, DiscoverySource::LogFile);
    assert!(result.is_verified());
    assert_eq!(clock.inner.sleeps(), 2, "matched on the third check");
    assert_eq!(journal.reads.get(), 0);
    assert!(runner.runs().is_empty());
}

#[test]
fn log_file_reports_most_recent_url() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_in(dir.path());
    fs::write(
        &log,
        "INF https://before-restart.trycloudflare.com\nINF https://after-restart.trycloudflare.com\n",
    )
    .unwrap();
    let clock = ManualClock::new();

    let result = EndpointDiscoverer::new(EndpointPattern::default(), &log, policy(), &clock)
        .discover(None);

    assert_eq!(result.url.as_deref(), Some("https://after-restart.trycloudflare.com"));
    assert_eq!(clock.sleeps(), 0);
}

#[test]
fn journal_is_consulted_after_log_polling_is_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_in(dir.path());
    fs::write(&log, NOISE).unwrap();
    let clock = ManualClock::new();
    let journal = FakeJournal::returning("cloudflared[42]: INF https://from-journal.trycloudflare.com");
    let runner = FakeRunner::yielding(None);

    let result = EndpointDiscoverer::new(EndpointPattern::default(), &log, policy(), &clock)
        .with_journal("cloudflared-tunnel", &journal)
        .with_disposable(&runner)
        .discover(None);

    assert_eq!(result.url.as_deref(), Some("https://from-journal.trycloudflare.com"));
    assert_eq!(result.source, DiscoverySource::SystemJournal);
    assert_eq!(journal.reads.get(), 1);
    assert!(runner.runs().is_empty());
    assert_eq!(clock.sleeps(), 14, "15 log checks, 14 pauses");
}

#[test]
fn disposable_run_is_last_channel_before_backup() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_in(dir.path());
    let clock = ManualClock::new();
    let journal = FakeJournal::returning(NOISE);
    let runner = FakeRunner::yielding(Some("https://disposable.trycloudflare.com"));

    let result = EndpointDiscoverer::new(EndpointPattern::default(), &log, policy(), &clock)
        .with_journal("cloudflared-tunnel", &journal)
        .with_disposable(&runner)
        .discover(Some("https://backup.trycloudflare.com"));

    assert_eq!(result.url.as_deref(), Some("https://disposable.trycloudflare.com"));
    assert_eq!(result.source, DiscoverySource::DisposableRun);
    assert_eq!(journal.reads.get(), 3);
    assert_eq!(runner.runs(), vec![Duration::from_secs(20)]);
}

#[test]
fn backup_is_substituted_only_when_every_channel_fails() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_in(dir.path());
    let clock = ManualClock::new();
    let runner = FakeRunner::yielding(None);

    let result = EndpointDiscoverer::new(EndpointPattern::default(), &log, policy(), &clock)
        .with_disposable(&runner)
        .discover(Some("https://backup.trycloudflare.com"));

    assert_eq!(result.url.as_deref(), Some("https://backup.trycloudflare.com"));
    assert_eq!(result.source, DiscoverySource::Backup);
    assert!(!result.is_verified());
    assert_eq!(runner.runs().len(), 1);
}

#[test]
fn nothing_found_without_backup() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_in(dir.path());
    let clock = ManualClock::new();

    let result =
        EndpointDiscoverer::new(EndpointPattern::default(), &log, policy(), &clock).discover(None);

    assert!(!result.found());
    assert_eq!(result.source, DiscoverySource::None);
}

#[test]
fn discovery_respects_overall_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_in(dir.path());
    let clock = ManualClock::new();
    let journal = FakeJournal::returning(NOISE);
    let runner = FakeRunner::yielding(Some("https://too-late.trycloudflare.com"));
    let policy = DiscoveryPolicy {
        log: PollPolicy::new(Duration::from_millis(700), 1_000),
        deadline: Duration::from_secs(5),
        ..policy()
    };

    let result = EndpointDiscoverer::new(EndpointPattern::default(), &log, policy, &clock)
        .with_journal("cloudflared-tunnel", &journal)
        .with_disposable(&runner)
        .discover(None);

    assert!(!result.found());
    assert!(
        clock.elapsed() <= policy.deadline + policy.log.interval,
        "elapsed {:?}",
        clock.elapsed()
    );
    assert!(runner.runs().is_empty(), "no time left for a disposable run");
}

#[test]
fn disposable_timeout_is_clipped_to_remaining_budget() {
    let dir = tempfile::tempdir().unwrap();
    let log = log_in(dir.path());
    let clock = ManualClock::new();
    let runner = FakeRunner {
        grace: 2 * SECOND,
        ..FakeRunner::yielding(None)
    };
    let policy = DiscoveryPolicy {
        log: PollPolicy::new(SECOND, 3),
        deadline: Duration::from_secs(10),
        ..policy()
    };

    EndpointDiscoverer::new(EndpointPattern::default(), &log, policy, &clock)
        .with_disposable(&runner)
        .discover(None);

    // 2s spent polling the log, 2s reserved for termination.
    assert_eq!(runner.runs(), vec![Duration::from_secs(6)]);
}

#[test]
fn journal_errors_are_not_fatal() {
    struct BrokenJournal;
    impl JournalReader for BrokenJournal {
        fn read_recent(&self, _unit: &str, _lines: usize) -> Result<String> {
            Err(Error::Discovery("journalctl missing".into()))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let log = log_in(dir.path());
    let clock = ManualClock::new();
    let runner = FakeRunner::yielding(Some("https://after-journal.trycloudflare.com"));

    let result = EndpointDiscoverer::new(EndpointPattern::default(), &log, policy(), &clock)
        .with_journal("cloudflared-tunnel", &BrokenJournal)
        .with_disposable(&runner)
        .discover(None);

    assert_eq!(result.source, DiscoverySource::DisposableRun);
}

#[test]
fn backup_capture_keeps_only_urls() {
    let found = FakeRunner::yielding(Some("https://backup.trycloudflare.com"));
    let empty = FakeRunner::yielding(None);

    assert_eq!(
        capture_backup(&found, SECOND).as_deref(),
        Some("https://backup.trycloudflare.com")
    );
    assert_eq!(capture_backup(&empty, SECOND), None);
    assert_eq!(found.runs(), vec![SECOND]);
}

/// Real child processes: the disposable run must never outlive the call.
#[cfg(unix)]
mod process {
    use std::time::{Duration, Instant};

    use std::cell::RefCell;

    use flaretun_core::{EndpointPattern, ManualClock, Result};
    use flaretun_setup::discovery::{
        DiscoverySource, DisposableOutcome, DisposableRunner, EndpointDiscoverer, ProcessRunner,
    };
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    use super::{FakeJournal, NOISE, policy};

    /// Real runner that remembers the pid of every child it spawned.
    struct PidRecorder {
        inner: ProcessRunner,
        pids: RefCell<Vec<u32>>,
    }

    impl DisposableRunner for PidRecorder {
        fn run(&self, timeout: Duration) -> Result<DisposableOutcome> {
            let outcome = self.inner.run(timeout)?;
            self.pids.borrow_mut().extend(outcome.pid);
            Ok(outcome)
        }

        fn termination_grace(&self) -> Duration {
            self.inner.termination_grace()
        }
    }

    fn shell(script: &str, grace: Duration) -> ProcessRunner {
        ProcessRunner::new(
            "/bin/sh",
            vec!["-c".to_string(), script.to_string()],
            EndpointPattern::default(),
            grace,
        )
    }

    #[allow(clippy::cast_possible_wrap)]
    fn assert_reaped(pid: u32) {
        assert_eq!(
            kill(Pid::from_raw(pid as i32), None),
            Err(Errno::ESRCH),
            "process {pid} is still alive"
        );
    }

    #[test]
    fn url_on_fourth_line_is_found_and_process_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("cloudflared.log");
        let clock = ManualClock::new();
        let journal = FakeJournal::returning(NOISE);
        let runner = PidRecorder {
            inner: shell(
                "echo starting; echo connecting; echo registering; \
                 echo 'INF |  https://line-four.trycloudflare.com  |'; exec sleep 30",
                Duration::from_secs(3),
            ),
            pids: RefCell::new(Vec::new()),
        };

        let result = EndpointDiscoverer::new(EndpointPattern::default(), &log, policy(), &clock)
            .with_journal("cloudflared-tunnel", &journal)
            .with_disposable(&runner)
            .discover(None);

        assert_eq!(result.url.as_deref(), Some("https://line-four.trycloudflare.com"));
        assert_eq!(result.source, DiscoverySource::DisposableRun);

        let pids = runner.pids.borrow();
        assert_eq!(pids.len(), 1, "exactly one disposable child");
        assert_reaped(pids[0]);
    }

    #[test]
    fn url_on_stderr_is_found() {
        let runner = shell(
            "echo 'INF https://on-stderr.trycloudflare.com' >&2; exec sleep 30",
            Duration::from_secs(3),
        );

        let outcome = runner.run(Duration::from_secs(10)).unwrap();

        assert_eq!(outcome.url.as_deref(), Some("https://on-stderr.trycloudflare.com"));
        assert_reaped(outcome.pid.unwrap());
    }

    #[test]
    fn silent_process_is_reaped_after_timeout() {
        let runner = shell("echo nothing to see; exec sleep 30", Duration::from_secs(3));
        let started = Instant::now();

        let outcome = runner.run(Duration::from_millis(300)).unwrap();

        assert_eq!(outcome.url, None);
        assert_reaped(outcome.pid.unwrap());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn process_ignoring_sigterm_is_killed() {
        let runner = shell("trap '' TERM; exec sleep 30", Duration::from_millis(200));
        let started = Instant::now();

        let outcome = runner.run(Duration::from_millis(300)).unwrap();

        assert_eq!(outcome.url, None);
        assert_reaped(outcome.pid.unwrap());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_an_error() {
        let runner = ProcessRunner::new(
            "/nonexistent/cloudflared",
            Vec::new(),
            EndpointPattern::default(),
            Duration::from_millis(100),
        );

        assert!(runner.run(Duration::from_secs(1)).is_err());
    }
}
