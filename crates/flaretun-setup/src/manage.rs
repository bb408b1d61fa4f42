//! Day-two commands against an installed service.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use flaretun_core::{EndpointPattern, Settings, SystemClock};

use crate::service::{ServiceDescriptor, ServiceReconciler, ServiceState, select_backend};
use crate::tunnel::{Layout, discover_existing, report};
use crate::{escalate, prompt};

/// Identifies the installed service.
#[derive(Debug, Clone, Default, Args)]
pub struct ServiceArgs {
    /// Service name override
    #[arg(long)]
    pub service_name: Option<String>,

    /// Service log file (defaults to the system log directory)
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// Directory holding the tunnel binary
    #[arg(long)]
    pub install_dir: Option<PathBuf>,
}

impl ServiceArgs {
    fn descriptor(&self, settings: &Settings) -> ServiceDescriptor {
        let layout = Layout::resolve(settings, self.install_dir.clone(), self.service_name.clone());
        let log_path = self
            .log_path
            .clone()
            .unwrap_or_else(|| layout.platform.default_log_path());
        ServiceDescriptor {
            name: layout.service_name,
            binary: layout.binary,
            args: Vec::new(),
            log_path,
            run_as: settings.service.run_as.clone(),
        }
    }

    /// Descriptor of the installed service. Without `--log-path` the log
    /// file is read back from the registration.
    fn resolve(&self, settings: &Settings, reconciler: &ServiceReconciler<'_>) -> ServiceDescriptor {
        let descriptor = self.descriptor(settings);
        if self.log_path.is_some() {
            descriptor
        } else {
            reconciler.as_installed(&descriptor)
        }
    }
}

/// Arguments for the `uninstall` subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct UninstallArgs {
    #[command(flatten)]
    pub service: ServiceArgs,

    /// Remove without asking
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Print the service state and where to look next.
pub fn status(args: &ServiceArgs, settings: &Settings) -> Result<()> {
    let backend = select_backend(settings);
    let clock = SystemClock;
    let reconciler = ServiceReconciler::new(backend.as_ref(), &clock, settings.service.settle());
    let descriptor = args.resolve(settings, &reconciler);
    let state = reconciler.query(&descriptor.name);

    #[allow(clippy::print_stdout)]
    {
        println!();
        println!("  Service:  {} ({state})", descriptor.name);
        println!("  Manager:  {}", backend.kind());
        println!("  Log file: {}", descriptor.log_path.display());
        println!();
    }
    if state != ServiceState::Absent {
        report::diagnostics(&descriptor, backend.as_ref());
    }
    Ok(())
}

/// Stop and remove the service and its log file.
pub fn uninstall(args: &UninstallArgs, settings: &Settings, non_interactive: bool) -> Result<()> {
    let backend = select_backend(settings);
    let clock = SystemClock;
    let reconciler = ServiceReconciler::new(backend.as_ref(), &clock, settings.service.settle());
    let descriptor = args.service.resolve(settings, &reconciler);

    if !prompt::prompt_confirm_uninstall(non_interactive, args.yes, &descriptor.name)? {
        tracing::info!("uninstall cancelled");
        return Ok(());
    }
    let replay = if args.yes { Vec::new() } else { vec!["--yes".to_string()] };
    escalate::require_privileges(non_interactive, &replay)?;

    if reconciler.remove(&descriptor) {
        tracing::info!("service {} removed", descriptor.name);
    } else {
        tracing::warn!("service {} was only partly removed", descriptor.name);
        report::diagnostics(&descriptor, backend.as_ref());
    }
    Ok(())
}

/// Look up the public URL of the running service.
pub fn url(args: &ServiceArgs, settings: &Settings) -> Result<()> {
    let backend = select_backend(settings);
    let clock = SystemClock;
    let reconciler = ServiceReconciler::new(backend.as_ref(), &clock, settings.service.settle());
    let descriptor = args.resolve(settings, &reconciler);

    let state = reconciler.query(&descriptor.name);
    if state == ServiceState::Absent {
        tracing::warn!("service {} is not installed; run setup first", descriptor.name);
        return Ok(());
    }

    let pattern = EndpointPattern::new(&settings.discovery.url_suffix)?;
    let result = discover_existing(&reconciler, &descriptor, settings, &clock, pattern);
    report::summary(&result, reconciler.query(&descriptor.name), &descriptor, backend.as_ref());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_uses_flags_then_settings() {
        let mut settings = Settings::default();
        settings.service.name = "configured".into();
        settings.service.run_as = Some("cloudflared".into());

        let args = ServiceArgs {
            service_name: None,
            log_path: Some(PathBuf::from("/tmp/tunnel.log")),
            install_dir: None,
        };
        let descriptor = args.descriptor(&settings);
        assert_eq!(descriptor.name, "configured");
        assert_eq!(descriptor.log_path, PathBuf::from("/tmp/tunnel.log"));
        assert_eq!(descriptor.run_as.as_deref(), Some("cloudflared"));
    }
}
