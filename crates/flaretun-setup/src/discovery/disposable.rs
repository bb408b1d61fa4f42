//! Throwaway foreground run of the tunnel binary.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use flaretun_core::{EndpointPattern, Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::{DisposableOutcome, DisposableRunner};

/// Spawns `program args...`, scans stdout and stderr line by line for the
/// first URL, and tears the process down once it is found or `timeout`
/// expires.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
    pattern: EndpointPattern,
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        pattern: EndpointPattern,
        grace: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            pattern,
            grace,
        }
    }

    async fn run_async(&self, timeout: Duration) -> Result<DisposableOutcome> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Discovery(format!("cannot start {}: {e}", self.program.display()))
            })?;
        let pid = child.id();
        tracing::debug!(?pid, "disposable run started");

        let url = tokio::time::timeout(timeout, self.scan_output(&mut child))
            .await
            .unwrap_or_else(|_| {
                tracing::debug!("disposable run produced no URL within {timeout:?}");
                None
            });

        terminate(&mut child, self.grace).await;
        Ok(DisposableOutcome { url, pid })
    }

    /// Read both streams until a URL shows up or both reach EOF.
    async fn scan_output(&self, child: &mut Child) -> Option<String> {
        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        while stdout.is_some() || stderr.is_some() {
            let line = tokio::select! {
                line = next_line(stdout.as_mut()), if stdout.is_some() => {
                    if line.is_none() {
                        stdout = None;
                    }
                    line
                }
                line = next_line(stderr.as_mut()), if stderr.is_some() => {
                    if line.is_none() {
                        stderr = None;
                    }
                    line
                }
            };
            if let Some(url) = line.as_deref().and_then(|l| self.pattern.find(l)) {
                return Some(url.to_string());
            }
        }
        None
    }
}

async fn next_line<R>(lines: Option<&mut tokio::io::Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines?.next_line().await {
        Ok(line) => line,
        Err(e) => {
            tracing::debug!("stopped reading disposable run output: {e}");
            None
        }
    }
}

/// Ask the process to exit, then force it after `grace`. Always reaps.
/// Windows has no polite request, so the first step there is already a kill.
async fn terminate(child: &mut Child, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        tracing::debug!("disposable run already exited: {status}");
        return;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            #[allow(clippy::cast_possible_wrap)]
            let target = Pid::from_raw(pid as i32);
            if let Err(e) = kill(target, Signal::SIGTERM) {
                tracing::warn!(pid, "failed to send SIGTERM: {e}");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = child.start_kill() {
            tracing::warn!("failed to stop disposable run: {e}");
        }
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        tracing::warn!("disposable run ignored termination, killing it");
        if let Err(e) = child.kill().await {
            tracing::warn!("failed to kill disposable run: {e}");
        }
    }
}

impl DisposableRunner for ProcessRunner {
    fn run(&self, timeout: Duration) -> Result<DisposableOutcome> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run_async(timeout))
    }

    fn termination_grace(&self) -> Duration {
        self.grace
    }
}
