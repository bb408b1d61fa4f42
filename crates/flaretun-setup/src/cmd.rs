use std::process::Command;

use anyhow::{Context, Result, bail};

/// Execute a command with logging. Logs the full command line at debug level
/// and a human-friendly description at info level.
pub fn run_cmd(description: &str, program: &str, args: &[&str]) -> Result<()> {
    let cmd_line = format!("{program} {}", args.join(" "));
    tracing::info!("{description}");
    tracing::debug!("exec: {cmd_line}");

    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to execute: {cmd_line}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!("command failed: {cmd_line}\nstderr: {stderr}");
        bail!("{description} failed ({}): {}", output.status, stderr.trim());
    }
    Ok(())
}

/// Captured result of a probe command whose exit status is informative
/// rather than an error (e.g. `sc query` on a missing service).
#[derive(Debug, Clone)]
pub struct Captured {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Execute a command and capture both streams regardless of exit status.
/// Fails only if the program could not be started.
pub fn capture(program: &str, args: &[&str]) -> std::io::Result<Captured> {
    tracing::debug!("exec (probe): {program} {}", args.join(" "));
    let output = Command::new(program).args(args).output()?;
    Ok(Captured {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Check whether a program exists on PATH.
pub fn command_exists(program: &str) -> bool {
    let finder = if cfg!(windows) { "where" } else { "which" };
    Command::new(finder)
        .arg(program)
        .output()
        .is_ok_and(|o| o.status.success())
}

#[cfg(all(test, unix))]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn capture_keeps_output_of_failing_command() {
        let captured = capture("sh", &["-c", "echo out; echo err >&2; exit 3"]).expect("spawn sh");
        assert!(!captured.success);
        assert_eq!(captured.stdout.trim(), "out");
        assert_eq!(captured.stderr.trim(), "err");
    }

    #[test]
    fn capture_reports_missing_program() {
        assert!(capture("flaretun-definitely-not-a-program", &[]).is_err());
    }

    #[test]
    fn run_cmd_fails_on_non_zero_exit() {
        let err = run_cmd("failing step", "sh", &["-c", "echo boom >&2; exit 1"])
            .expect_err("should fail");
        assert!(err.to_string().contains("failing step failed"));
        assert!(err.to_string().contains("boom"));
    }
}
