use std::fs;
use std::path::PathBuf;

use flaretun_core::{Error, Result};

use super::{
    ServiceDescriptor, ServiceManagerBackend, ServiceState, logfile_arg, manager_cmd,
    split_command_line, templates,
};

/// Directory holding locally installed unit files.
pub const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

/// POSIX init-system backend driving `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdBackend {
    unit_dir: PathBuf,
    restart_sec: u64,
}

impl SystemdBackend {
    pub fn new(restart_sec: u64) -> Self {
        Self {
            unit_dir: PathBuf::from(SYSTEM_UNIT_DIR),
            restart_sec,
        }
    }

    pub fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(unit_name(name))
    }
}

fn unit_name(name: &str) -> String {
    if name.ends_with(".service") {
        name.to_string()
    } else {
        format!("{name}.service")
    }
}

impl ServiceManagerBackend for SystemdBackend {
    fn kind(&self) -> &'static str {
        "systemd"
    }

    fn query(&self, name: &str) -> Result<ServiceState> {
        let unit = unit_name(name);
        let output = crate::cmd::capture(
            "systemctl",
            &["show", &unit, "--property=LoadState,ActiveState"],
        )
        .map_err(|e| Error::Probe(format!("failed to run systemctl: {e}")))?;

        if !output.success {
            return Err(Error::Probe(format!(
                "systemctl show {unit} failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(parse_show_output(&output.stdout))
    }

    fn create(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let unit = unit_name(&descriptor.name);
        let path = self.unit_path(&descriptor.name);
        tracing::info!("writing systemd unit: {}", path.display());
        fs::write(&path, templates::systemd_unit(descriptor, self.restart_sec)).map_err(|e| {
            Error::service_manager("create", &descriptor.name, format!("{}: {e}", path.display()))
        })?;

        manager_cmd(
            "create",
            &descriptor.name,
            "reloading systemd daemon",
            "systemctl",
            &["daemon-reload"],
        )?;
        manager_cmd(
            "create",
            &descriptor.name,
            &format!("enabling {unit}"),
            "systemctl",
            &["enable", &unit],
        )
    }

    fn delete(&self, name: &str) -> Result<()> {
        let unit = unit_name(name);
        let disabling = format!("disabling {unit}");
        if let Err(e) = manager_cmd("delete", name, &disabling, "systemctl", &["disable", &unit]) {
            tracing::debug!("disable ignored: {e}");
        }

        let path = self.unit_path(name);
        match fs::remove_file(&path) {
            Ok(()) => tracing::info!("removed unit file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no unit file at {}", path.display());
            }
            Err(e) => {
                return Err(Error::service_manager(
                    "delete",
                    name,
                    format!("{}: {e}", path.display()),
                ));
            }
        }

        manager_cmd(
            "delete",
            name,
            "reloading systemd daemon",
            "systemctl",
            &["daemon-reload"],
        )?;
        // Clears a lingering "failed" record so the unit reads as not-found.
        if let Err(e) = crate::cmd::capture("systemctl", &["reset-failed", &unit]) {
            tracing::debug!("reset-failed ignored: {e}");
        }
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        let unit = unit_name(name);
        manager_cmd("start", name, &format!("starting {unit}"), "systemctl", &["start", &unit])
    }

    fn stop(&self, name: &str) -> Result<()> {
        let unit = unit_name(name);
        manager_cmd("stop", name, &format!("stopping {unit}"), "systemctl", &["stop", &unit])
    }

    fn manual_commands(&self, descriptor: &ServiceDescriptor) -> Vec<String> {
        let unit = unit_name(&descriptor.name);
        vec![
            format!("systemctl status {unit}"),
            format!("journalctl -u {unit} -n 50 --no-pager"),
            format!("tail -f {}", descriptor.log_path.display()),
            format!("sudo systemctl restart {unit}"),
            format!("sudo systemctl stop {unit}"),
            "sudo flaretun-setup uninstall".to_string(),
        ]
    }

    fn has_journal(&self) -> bool {
        true
    }

    fn registered_log_path(&self, name: &str) -> Result<Option<PathBuf>> {
        let path = self.unit_path(name);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(parse_unit_log_path(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Probe(format!("cannot read {}: {e}", path.display()))),
        }
    }
}

/// Log file passed to the tunnel on the unit's `ExecStart=` line.
pub(crate) fn parse_unit_log_path(unit: &str) -> Option<PathBuf> {
    let exec = unit
        .lines()
        .find_map(|line| line.trim().strip_prefix("ExecStart="))?;
    let args: Vec<String> = split_command_line(exec, true)
        .into_iter()
        .map(|arg| arg.replace("%%", "%").replace("$$", "$"))
        .collect();
    logfile_arg(args.get(1..)?)
}

/// Map `systemctl show --property=LoadState,ActiveState` output to a state.
pub(crate) fn parse_show_output(output: &str) -> ServiceState {
    let mut load_state = None;
    let mut active_state = None;
    for line in output.lines() {
        if let Some(v) = line.trim().strip_prefix("LoadState=") {
            load_state = Some(v);
        } else if let Some(v) = line.trim().strip_prefix("ActiveState=") {
            active_state = Some(v);
        }
    }

    match load_state {
        None => ServiceState::Unknown,
        Some("not-found") => ServiceState::Absent,
        Some(_) => match active_state {
            Some("active" | "reloading" | "activating" | "refreshing") => ServiceState::Running,
            Some("inactive" | "failed" | "deactivating" | "maintenance") => ServiceState::Stopped,
            _ => ServiceState::Unknown,
        },
    }
}
