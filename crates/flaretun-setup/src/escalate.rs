use anyhow::Result;

/// Check if the current process has the privileges needed to register services.
#[cfg(unix)]
pub fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Check if the current process has the privileges needed to register services.
///
/// `net session` only succeeds from an elevated shell.
#[cfg(not(unix))]
pub fn is_privileged() -> bool {
    std::process::Command::new("net")
        .arg("session")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Make sure service registration can proceed.
///
/// On POSIX hosts this is fatal when root is unavailable: if not root, the
/// user is offered a re-exec via sudo, with `replay_args` appended so the
/// answers already given are not asked again. This replaces the current
/// process and does not return on success.
///
/// On Windows the service control manager reports its own access errors,
/// which are handled as non-fatal service-manager failures, so only a
/// warning is emitted.
#[cfg(unix)]
pub fn require_privileges(non_interactive: bool, replay_args: &[String]) -> Result<()> {
    use std::env;
    use std::process::Command;

    use dialoguer::Confirm;
    use flaretun_core::Error;

    if is_privileged() {
        return Ok(());
    }

    if non_interactive {
        return Err(Error::Setup(
            "service setup requires root privileges. Re-run with sudo, \
             or use --mode foreground to run the tunnel without a service."
                .into(),
        )
        .into());
    }

    let confirmed = Confirm::new()
        .with_prompt("Service setup requires root privileges. Re-run with sudo?")
        .default(true)
        .interact()?;

    if !confirmed {
        return Err(Error::Setup(
            "root privileges declined. Use --mode foreground for an unprivileged run, \
             or re-run manually with sudo."
                .into(),
        )
        .into());
    }

    let exe = env::current_exe()?;
    let args = sudo_args(env::args().skip(1), replay_args);

    tracing::info!("re-executing with sudo");
    tracing::debug!("exec: sudo {} {}", exe.display(), args.join(" "));

    let status = Command::new("sudo").arg(exe).args(&args).status()?;

    // sudo process completed, exit with its code
    std::process::exit(status.code().unwrap_or(1));
}

#[cfg(not(unix))]
pub fn require_privileges(_non_interactive: bool, _replay_args: &[String]) -> Result<()> {
    if !is_privileged() {
        tracing::warn!("creating a Windows service usually requires an elevated shell");
        tracing::warn!("if service creation fails, re-run this tool as Administrator");
    }
    Ok(())
}

/// Original arguments followed by the answers collected interactively.
#[cfg_attr(not(unix), allow(dead_code))]
fn sudo_args(original: impl Iterator<Item = String>, replay_args: &[String]) -> Vec<String> {
    original.chain(replay_args.iter().cloned()).collect()
}
