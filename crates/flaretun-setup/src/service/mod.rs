//! Host service lifecycle: state probing, registration and removal.
//!
//! Platform differences live behind [`ServiceManagerBackend`]; the
//! [`ServiceReconciler`] only speaks in terms of that trait, so the same
//! install/remove policy applies to systemd units and Windows services.

mod sc;
mod systemd;
pub(crate) mod templates;

use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result as AnyResult;
use flaretun_core::{Clock, Error, Result, Settings};

pub use sc::ScBackend;
pub use systemd::SystemdBackend;

/// Observed state of a named service. Never cached: always re-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// The probe ran and the manager knows no such service.
    Absent,
    Stopped,
    Running,
    /// The probe itself failed.
    Unknown,
}

impl ServiceState {
    /// The manager confirmed a registration exists.
    pub const fn exists(self) -> bool {
        matches!(self, Self::Running | Self::Stopped)
    }

    /// Conservative check used before destructive operations: an unknown
    /// state is assumed to be present.
    pub const fn may_exist(self) -> bool {
        !matches!(self, Self::Absent)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "ABSENT"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Everything needed to register the tunnel binary as a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub log_path: PathBuf,
    /// POSIX user the service runs as; `None` keeps the manager default.
    pub run_as: Option<String>,
}

impl ServiceDescriptor {
    /// Descriptor for a quick tunnel to `local_addr` that logs to `log_path`.
    pub fn tunnel(
        name: impl Into<String>,
        binary: impl Into<PathBuf>,
        local_addr: &str,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        let log_path = log_path.into();
        Self {
            name: name.into(),
            binary: binary.into(),
            args: tunnel_args(local_addr, Some(&log_path)),
            log_path,
            run_as: None,
        }
    }

    #[must_use]
    pub fn with_run_as(mut self, user: Option<String>) -> Self {
        self.run_as = user;
        self
    }
}

/// Arguments for a quick tunnel; `log_path` is omitted for runs whose
/// output is read directly.
pub fn tunnel_args(local_addr: &str, log_path: Option<&Path>) -> Vec<String> {
    let mut args = vec!["tunnel".to_string(), "--url".to_string(), local_addr.to_string()];
    if let Some(path) = log_path {
        args.push("--logfile".to_string());
        args.push(path.display().to_string());
    }
    args
}

/// Host service manager capability set.
pub trait ServiceManagerBackend {
    /// Short name for log lines (`systemd`, `sc`).
    fn kind(&self) -> &'static str;

    /// Probe the manager. `Err` means the probe could not run.
    fn query(&self, name: &str) -> Result<ServiceState>;

    fn create(&self, descriptor: &ServiceDescriptor) -> Result<()>;

    fn delete(&self, name: &str) -> Result<()>;

    /// Request a start; acceptance is not confirmation, re-query for that.
    fn start(&self, name: &str) -> Result<()>;

    /// Request a stop; acceptance is not confirmation, re-query for that.
    fn stop(&self, name: &str) -> Result<()>;

    /// Commands an operator can run to inspect or manage the service by hand.
    fn manual_commands(&self, descriptor: &ServiceDescriptor) -> Vec<String>;

    /// Whether the manager keeps a structured log that can be queried by unit.
    fn has_journal(&self) -> bool {
        false
    }

    /// Log file named by the `--logfile` argument of the installed
    /// registration. `Ok(None)` when nothing is registered or the command
    /// line carries no log file.
    fn registered_log_path(&self, _name: &str) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Pick the backend for the running host. Called once at startup.
pub fn select_backend(settings: &Settings) -> Box<dyn ServiceManagerBackend> {
    if cfg!(windows) {
        Box::new(ScBackend::new(settings.service.restart_sec))
    } else {
        Box::new(SystemdBackend::new(settings.service.restart_sec))
    }
}

/// Drives a named service towards a requested state. Every operation is
/// best-effort: failures are logged and reported as `false`, never raised.
pub struct ServiceReconciler<'a> {
    backend: &'a dyn ServiceManagerBackend,
    clock: &'a dyn Clock,
    settle: Duration,
}

impl<'a> ServiceReconciler<'a> {
    /// `settle` is the pause between stop and delete that lets the OS
    /// release the binary and log handles.
    pub fn new(backend: &'a dyn ServiceManagerBackend, clock: &'a dyn Clock, settle: Duration) -> Self {
        Self {
            backend,
            clock,
            settle,
        }
    }

    pub fn backend(&self) -> &'a dyn ServiceManagerBackend {
        self.backend
    }

    /// `descriptor` with its log path replaced by the one the installed
    /// registration writes to, when the manager can tell.
    pub fn as_installed(&self, descriptor: &ServiceDescriptor) -> ServiceDescriptor {
        let mut installed = descriptor.clone();
        match self.backend.registered_log_path(&descriptor.name) {
            Ok(Some(path)) => {
                if path != descriptor.log_path {
                    tracing::info!(
                        "installed service {} logs to {}",
                        descriptor.name,
                        path.display()
                    );
                }
                installed.log_path = path;
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("registered log path of {} unavailable: {e}", descriptor.name),
        }
        installed
    }

    pub fn query(&self, name: &str) -> ServiceState {
        match self.backend.query(name) {
            Ok(state) => {
                tracing::debug!("{} reports {name}: {state}", self.backend.kind());
                state
            }
            Err(e) => {
                tracing::warn!("could not determine state of {name}: {e}");
                ServiceState::Unknown
            }
        }
    }

    /// Stop and delete the service, then delete its log file.
    ///
    /// Idempotent: an absent service only has its log file cleaned up.
    pub fn remove(&self, descriptor: &ServiceDescriptor) -> bool {
        let name = &descriptor.name;
        let deleted = if self.query(name) == ServiceState::Absent {
            tracing::info!("service {name} is not registered, nothing to delete");
            true
        } else {
            tracing::info!("removing service {name}");
            if let Err(e) = self.backend.stop(name) {
                tracing::debug!("stop before delete ignored: {e}");
            }
            self.clock.sleep(self.settle);
            report(self.backend.delete(name))
        };

        let log_removed = remove_log_file(&descriptor.log_path);
        deleted && log_removed
    }

    /// Prepare the log sink and binary, then register the service.
    ///
    /// The unit is not created when the log sink cannot be prepared: a
    /// service with an unwritable log runs but never reveals its URL. The
    /// log starts empty so URLs from earlier tunnels are never reported.
    pub fn install(&self, descriptor: &ServiceDescriptor) -> bool {
        if let Err(e) = prepare_log_sink(&descriptor.log_path, descriptor.run_as.as_deref()) {
            tracing::warn!(
                "cannot prepare log file {}: {e:#}; service not created",
                descriptor.log_path.display()
            );
            return false;
        }
        if let Err(e) = ensure_executable(&descriptor.binary) {
            tracing::warn!(
                "binary {} is not runnable: {e:#}; service not created",
                descriptor.binary.display()
            );
            return false;
        }
        tracing::info!("registering service {} ({})", descriptor.name, self.backend.kind());
        report(self.backend.create(descriptor))
    }

    pub fn start(&self, name: &str) -> bool {
        tracing::info!("starting service {name}");
        report(self.backend.start(name))
    }

    pub fn stop(&self, name: &str) -> bool {
        tracing::info!("stopping service {name}");
        report(self.backend.stop(name))
    }
}

fn report(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("{e}");
            false
        }
    }
}

fn remove_log_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("deleted log file {}", path.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("could not delete log file {}: {e}", path.display());
            false
        }
    }
}

/// Create the log directory and an empty log file, and hand them to the
/// service user.
fn prepare_log_sink(path: &Path, run_as: Option<&str>) -> AnyResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).write(true).truncate(true).open(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
        if let Some(user) = run_as {
            chown_to(path, user)?;
            if let Some(dir) = path.parent() {
                chown_to(dir, user)?;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Some(user) = run_as {
            tracing::debug!("run_as={user} ignored on this platform");
        }
    }

    tracing::debug!("log sink ready: {}", path.display());
    Ok(())
}

#[cfg(unix)]
fn chown_to(path: &Path, user: &str) -> AnyResult<()> {
    use nix::unistd::{User, chown};

    let Some(account) = User::from_name(user)? else {
        anyhow::bail!("system user '{user}' does not exist");
    };
    chown(path, Some(account.uid), Some(account.gid))?;
    Ok(())
}

/// Make sure the binary exists and has its execute bits set.
fn ensure_executable(path: &Path) -> AnyResult<()> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        anyhow::bail!("not a regular file");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = metadata.permissions().mode();
        if mode & 0o111 != 0o111 {
            tracing::info!("marking {} executable", path.display());
            fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o755))?;
        }
    }
    Ok(())
}

/// Result of reconciling an already registered service before install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing was registered.
    Fresh,
    /// The old registration was removed; `clean` is false if part of the
    /// removal failed.
    Removed { clean: bool },
    /// The operator kept the existing service. Its configuration, including
    /// the target address, is left untouched.
    KeptExisting(ServiceState),
}

/// Offer to remove an existing registration before a fresh install.
///
/// `confirm` is asked only when the service may exist (an unknown state is
/// treated as present). Declining performs no manager calls at all.
pub fn reconcile_existing(
    reconciler: &ServiceReconciler<'_>,
    descriptor: &ServiceDescriptor,
    confirm: impl FnOnce(ServiceState) -> AnyResult<bool>,
) -> AnyResult<ReconcileOutcome> {
    let state = reconciler.query(&descriptor.name);
    if !state.may_exist() {
        return Ok(ReconcileOutcome::Fresh);
    }

    tracing::info!("existing service detected: {} ({state})", descriptor.name);
    if !confirm(state)? {
        tracing::warn!(
            "keeping existing service {}; its previous configuration stays in effect",
            descriptor.name
        );
        return Ok(ReconcileOutcome::KeptExisting(state));
    }

    let clean = reconciler.remove(descriptor);
    Ok(ReconcileOutcome::Removed { clean })
}

/// Split a registered command line into arguments. Double quotes group
/// words; with `backslash_escapes`, a backslash inside quotes makes the next
/// character literal.
pub(crate) fn split_command_line(line: &str, backslash_escapes: bool) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted && backslash_escapes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        args.push(current);
    }
    args
}

/// Value of `--logfile` in a tunnel argument list.
pub(crate) fn logfile_arg(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--logfile" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--logfile=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Map a failed manager command onto [`Error::ServiceManager`].
pub(crate) fn manager_cmd(
    op: &'static str,
    service: &str,
    description: &str,
    program: &str,
    args: &[&str],
) -> Result<()> {
    crate::cmd::run_cmd(description, program, args)
        .map_err(|e| Error::service_manager(op, service, format!("{e:#}")))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn only_running_and_stopped_exist() {
        assert!(ServiceState::Running.exists());
        assert!(ServiceState::Stopped.exists());
        assert!(!ServiceState::Absent.exists());
        assert!(!ServiceState::Unknown.exists());
    }

    #[test]
    fn unknown_is_treated_as_present() {
        assert!(ServiceState::Unknown.may_exist());
        assert!(!ServiceState::Absent.may_exist());
    }

    #[test]
    fn tunnel_descriptor_directs_output_to_log() {
        let d = ServiceDescriptor::tunnel(
            "cloudflared-tunnel",
            "/opt/cloudflared/cloudflared",
            "127.0.0.1:8080",
            "/var/log/cloudflared/cloudflared.log",
        );
        assert_eq!(
            d.args,
            vec![
                "tunnel",
                "--url",
                "127.0.0.1:8080",
                "--logfile",
                "/var/log/cloudflared/cloudflared.log"
            ]
        );
        assert_eq!(d.run_as, None);
    }

    #[test]
    fn tunnel_args_without_log_for_direct_runs() {
        assert_eq!(
            tunnel_args("localhost:3000", None),
            vec!["tunnel", "--url", "localhost:3000"]
        );
    }

    #[test]
    fn prepare_log_sink_creates_missing_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("nested/deeper/tunnel.log");

        prepare_log_sink(&log, None).expect("prepare");

        assert!(log.is_file());
    }

    #[test]
    fn prepare_log_sink_empties_log_of_earlier_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("tunnel.log");
        fs::write(&log, "INF https://old-run.trycloudflare.com\n").expect("write");

        prepare_log_sink(&log, None).expect("prepare");

        assert_eq!(fs::read_to_string(&log).expect("read"), "");
    }

    #[test]
    fn split_command_line_groups_quoted_words() {
        assert_eq!(
            split_command_line(r#""/opt/my tunnel/cloudflared" tunnel --url x"#, true),
            vec!["/opt/my tunnel/cloudflared", "tunnel", "--url", "x"]
        );
        assert_eq!(
            split_command_line(r#"a "say \"hi\"" b"#, true),
            vec!["a", r#"say "hi""#, "b"]
        );
    }

    #[test]
    fn split_command_line_keeps_windows_backslashes() {
        assert_eq!(
            split_command_line(r#""C:\Program Files\cf.exe" --logfile C:\logs\cf.log"#, false),
            vec![r"C:\Program Files\cf.exe", "--logfile", r"C:\logs\cf.log"]
        );
    }

    #[test]
    fn logfile_arg_accepts_both_spellings() {
        let split = |s: &str| split_command_line(s, false);
        assert_eq!(
            logfile_arg(&split("tunnel --url x --logfile /var/log/t.log")),
            Some(PathBuf::from("/var/log/t.log"))
        );
        assert_eq!(
            logfile_arg(&split("tunnel --logfile=/srv/t.log --url x")),
            Some(PathBuf::from("/srv/t.log"))
        );
        assert_eq!(logfile_arg(&split("tunnel --url x")), None);
        assert_eq!(logfile_arg(&split("tunnel --logfile")), None);
    }

    #[cfg(unix)]
    #[test]
    fn prepare_log_sink_rejects_unknown_user() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("tunnel.log");
        assert!(prepare_log_sink(&log, Some("flaretun-no-such-user")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn ensure_executable_sets_execute_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("cloudflared");
        fs::write(&bin, "#!/bin/sh\n").expect("write");
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o644)).expect("chmod");

        ensure_executable(&bin).expect("ensure");

        let mode = fs::metadata(&bin).expect("stat").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn ensure_executable_fails_for_missing_binary() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(ensure_executable(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn remove_log_file_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(remove_log_file(&dir.path().join("missing.log")));
    }
}
