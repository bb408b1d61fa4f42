use std::path::PathBuf;

use flaretun_core::{Error, Result};

use super::{
    ServiceDescriptor, ServiceManagerBackend, ServiceState, logfile_arg, manager_cmd,
    split_command_line, templates,
};

/// Windows "service does not exist" error code reported by `sc`.
const ERROR_SERVICE_DOES_NOT_EXIST: &str = "FAILED 1060";

/// Windows service control manager backend driving `sc.exe`.
#[derive(Debug, Clone)]
pub struct ScBackend {
    restart_delay_ms: u64,
}

impl ScBackend {
    pub const fn new(restart_sec: u64) -> Self {
        Self {
            restart_delay_ms: restart_sec.saturating_mul(1000),
        }
    }
}

impl ServiceManagerBackend for ScBackend {
    fn kind(&self) -> &'static str {
        "sc"
    }

    fn query(&self, name: &str) -> Result<ServiceState> {
        // `sc query` exits non-zero for a missing service; that is still a
        // successful probe, so inspect the text instead of the status.
        let output = crate::cmd::capture("sc", &["query", name])
            .map_err(|e| Error::Probe(format!("failed to run sc: {e}")))?;
        Ok(parse_sc_query(&format!("{}\n{}", output.stdout, output.stderr)))
    }

    fn create(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let name = descriptor.name.as_str();
        let command_line = templates::windows_command_line(descriptor);
        manager_cmd(
            "create",
            name,
            &format!("creating service {name}"),
            "sc",
            &["create", name, "binPath=", &command_line, "start=", "auto"],
        )?;

        let actions = format!("restart/{}", self.restart_delay_ms);
        if let Err(e) = manager_cmd(
            "create",
            name,
            "configuring restart on failure",
            "sc",
            &["failure", name, "reset=", "86400", "actions=", &actions],
        ) {
            tracing::warn!("service created without restart policy: {e}");
        }
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        manager_cmd("delete", name, &format!("deleting service {name}"), "sc", &["delete", name])
    }

    fn start(&self, name: &str) -> Result<()> {
        manager_cmd("start", name, &format!("starting service {name}"), "sc", &["start", name])
    }

    fn stop(&self, name: &str) -> Result<()> {
        manager_cmd("stop", name, &format!("stopping service {name}"), "sc", &["stop", name])
    }

    fn manual_commands(&self, descriptor: &ServiceDescriptor) -> Vec<String> {
        let name = &descriptor.name;
        vec![
            format!("sc query {name}"),
            format!("Get-Content -Wait \"{}\"", descriptor.log_path.display()),
            format!("sc start {name}"),
            format!("sc stop {name}"),
            format!("sc delete {name}"),
        ]
    }

    fn registered_log_path(&self, name: &str) -> Result<Option<PathBuf>> {
        let output = crate::cmd::capture("sc", &["qc", name])
            .map_err(|e| Error::Probe(format!("failed to run sc: {e}")))?;
        if !output.success {
            return Ok(None);
        }
        Ok(parse_sc_qc_log_path(&output.stdout))
    }
}

/// Log file passed to the tunnel in the `BINARY_PATH_NAME` of `sc qc` output.
pub(crate) fn parse_sc_qc_log_path(output: &str) -> Option<PathBuf> {
    let (_, command_line) = output
        .lines()
        .find(|line| line.trim_start().starts_with("BINARY_PATH_NAME"))?
        .split_once(':')?;
    let args = split_command_line(command_line.trim(), false);
    logfile_arg(args.get(1..)?)
}

/// Map `sc query` output to a state.
pub(crate) fn parse_sc_query(output: &str) -> ServiceState {
    if output.contains(ERROR_SERVICE_DOES_NOT_EXIST) {
        return ServiceState::Absent;
    }
    let Some(state_line) = output
        .lines()
        .find(|line| line.trim_start().starts_with("STATE"))
    else {
        return ServiceState::Unknown;
    };
    if state_line.contains("RUNNING") || state_line.contains("START_PENDING") {
        ServiceState::Running
    } else if ["STOPPED", "STOP_PENDING", "PAUSED", "PAUSE_PENDING", "CONTINUE_PENDING"]
        .iter()
        .any(|s| state_line.contains(s))
    {
        ServiceState::Stopped
    } else {
        ServiceState::Unknown
    }
}
