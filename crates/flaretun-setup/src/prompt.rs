use std::path::{Path, PathBuf};

use anyhow::Result;
use dialoguer::{Confirm, Input, Select};

use crate::config::{RunMode, validate_local_addr};
use crate::service::ServiceState;

/// Prompt for the run mode.
pub fn prompt_run_mode(non_interactive: bool) -> Result<RunMode> {
    if non_interactive {
        return Ok(RunMode::Service);
    }

    let items = &[
        "service (recommended, keeps running after reboot)",
        "foreground (runs in this terminal)",
    ];
    let selection = Select::new()
        .with_prompt("How should the tunnel run?")
        .items(items)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => RunMode::Service,
        _ => RunMode::Foreground,
    })
}

/// Prompt for the local origin the tunnel forwards to.
pub fn prompt_local_addr(non_interactive: bool, default: &str) -> Result<String> {
    if non_interactive {
        return validate_local_addr(default).map_err(anyhow::Error::msg);
    }
    let addr: String = Input::new()
        .with_prompt("Local address to expose (host:port or URL)")
        .default(default.to_string())
        .validate_with(|input: &String| validate_local_addr(input).map(|_| ()))
        .interact_text()?;
    validate_local_addr(&addr).map_err(anyhow::Error::msg)
}

/// Prompt for where the service writes its log: the system log directory or
/// next to the binary.
pub fn prompt_log_location(
    non_interactive: bool,
    system_default: &Path,
    install_dir: &Path,
) -> Result<PathBuf> {
    if non_interactive {
        return Ok(system_default.to_path_buf());
    }

    let beside_binary = install_dir.join("cloudflared.log");
    if beside_binary == system_default {
        return Ok(beside_binary);
    }
    let items = &[
        format!("{} (system log directory)", system_default.display()),
        format!("{} (next to the binary)", beside_binary.display()),
    ];
    let selection = Select::new()
        .with_prompt("Where should the service write its log?")
        .items(items)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => system_default.to_path_buf(),
        _ => beside_binary,
    })
}

/// Ask whether to remove an existing registration before reinstalling.
/// Non-interactive runs keep it unless `replace` was requested.
pub fn prompt_remove_existing(
    non_interactive: bool,
    replace: bool,
    name: &str,
    state: ServiceState,
) -> Result<bool> {
    if non_interactive || replace {
        return Ok(replace);
    }
    let remove = Confirm::new()
        .with_prompt(format!(
            "Service {name} already exists ({state}). Remove it and install fresh? \
             (No keeps its current address)"
        ))
        .default(true)
        .interact()?;
    Ok(remove)
}

/// Ask whether to capture a backup URL from a throwaway run before install.
pub fn prompt_backup_url(non_interactive: bool, default: bool) -> Result<bool> {
    if non_interactive {
        return Ok(default);
    }
    let backup = Confirm::new()
        .with_prompt("Capture a backup URL first? (unverified, usually differs from the service's)")
        .default(default)
        .interact()?;
    Ok(backup)
}

/// Confirm service removal. Non-interactive runs need `--yes`.
pub fn prompt_confirm_uninstall(non_interactive: bool, yes: bool, name: &str) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if non_interactive {
        anyhow::bail!("--yes is required to uninstall in non-interactive mode");
    }
    let confirmed = Confirm::new()
        .with_prompt(format!("Stop and remove service {name} and its log file?"))
        .default(false)
        .interact()?;
    Ok(confirmed)
}
