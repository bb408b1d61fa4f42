pub mod report;

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use clap::Args;
use flaretun_core::{Clock, EndpointPattern, Settings, SystemClock};

use crate::config::{RunMode, parse_mode, validate_local_addr};
use crate::discovery::{
    DiscoveryPolicy, DiscoveryResult, EndpointDiscoverer, JournalctlReader, ProcessRunner,
    capture_backup,
};
use crate::os::HostPlatform;
use crate::service::{
    ReconcileOutcome, ServiceDescriptor, ServiceReconciler, reconcile_existing, select_backend,
    tunnel_args,
};
use crate::{cmd, download, escalate, prompt};

const DEFAULT_LOCAL_ADDR: &str = "localhost:8080";

/// Arguments for the `setup` subcommand (also the default command).
#[derive(Debug, Clone, Default, Args)]
pub struct TunnelArgs {
    /// Run mode: "service" or "foreground"
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<RunMode>,

    /// Local origin to expose, e.g. localhost:8080 or http://127.0.0.1:3000
    #[arg(long, value_parser = validate_local_addr)]
    pub local_addr: Option<String>,

    /// Service log file (defaults to the system log directory)
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// Directory holding the tunnel binary
    #[arg(long)]
    pub install_dir: Option<PathBuf>,

    /// Service name override
    #[arg(long)]
    pub service_name: Option<String>,

    /// Replace an existing service without asking
    #[arg(long)]
    pub replace: bool,

    /// Capture an unverified backup URL from a throwaway run before install
    #[arg(long)]
    pub backup_url: bool,
}

/// Where things live on this host after flags and settings are applied.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub platform: HostPlatform,
    pub binary: PathBuf,
    pub service_name: String,
}

impl Layout {
    pub(crate) fn resolve(
        settings: &Settings,
        install_dir: Option<PathBuf>,
        service_name: Option<String>,
    ) -> Self {
        let platform = HostPlatform::detect();
        let install_dir = install_dir
            .or_else(|| settings.binary.install_dir.clone())
            .unwrap_or_else(|| platform.default_install_dir());
        Self {
            binary: install_dir.join(platform.binary_file_name()),
            service_name: service_name.unwrap_or_else(|| settings.service.name.clone()),
            platform,
        }
    }

    fn install_dir(&self) -> &Path {
        self.binary.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Run the tunnel setup flow.
pub fn run(args: TunnelArgs, settings: &Settings, non_interactive: bool) -> Result<()> {
    let layout = Layout::resolve(settings, args.install_dir.clone(), args.service_name.clone());
    layout.platform.ensure_supported()?;

    let mut replay = Vec::new();
    let mode = match args.mode {
        Some(mode) => mode,
        None => {
            let mode = prompt::prompt_run_mode(non_interactive)?;
            replay.extend(["--mode".to_string(), mode.to_string()]);
            mode
        }
    };
    let local_addr = match args.local_addr.clone() {
        Some(addr) => addr,
        None => {
            let addr = prompt::prompt_local_addr(non_interactive, DEFAULT_LOCAL_ADDR)?;
            replay.extend(["--local-addr".to_string(), addr.clone()]);
            addr
        }
    };

    // Foreground runs only need privileges to install the binary.
    if mode == RunMode::Service || !layout.binary.exists() {
        escalate::require_privileges(non_interactive, &replay)?;
    }

    let url = match &settings.binary.download_url {
        Some(url) => url.clone(),
        None => layout.platform.download_url(&settings.binary.version)?,
    };
    download::ensure_binary(&url, &layout.binary)?;

    match mode {
        RunMode::Foreground => run_foreground(&layout, settings, &local_addr),
        RunMode::Service => {
            let log_path = match args.log_path.clone() {
                Some(path) => path,
                None => prompt::prompt_log_location(
                    non_interactive,
                    &layout.platform.default_log_path(),
                    layout.install_dir(),
                )?,
            };
            run_service(&args, &layout, settings, &local_addr, log_path, non_interactive)
        }
    }
}

fn run_foreground(layout: &Layout, settings: &Settings, local_addr: &str) -> Result<()> {
    let backend = select_backend(settings);
    let state = backend.query(&layout.service_name);
    if let Ok(state) = state
        && state.exists()
    {
        tracing::warn!(
            "service {} is also registered ({state}); it keeps running independently",
            layout.service_name
        );
    }

    tracing::info!("starting the tunnel in the foreground, press Ctrl+C to stop");
    tracing::info!("the public URL appears in the output below");
    let status = Command::new(&layout.binary)
        .args(tunnel_args(local_addr, None))
        .status()
        .with_context(|| format!("failed to start {}", layout.binary.display()))?;
    if !status.success() {
        tracing::warn!("tunnel exited with {status}");
    }
    Ok(())
}

fn run_service(
    args: &TunnelArgs,
    layout: &Layout,
    settings: &Settings,
    local_addr: &str,
    log_path: PathBuf,
    non_interactive: bool,
) -> Result<()> {
    let backend = select_backend(settings);
    let clock = SystemClock;
    let reconciler = ServiceReconciler::new(backend.as_ref(), &clock, settings.service.settle());
    let descriptor =
        ServiceDescriptor::tunnel(&layout.service_name, &layout.binary, local_addr, log_path)
            .with_run_as(settings.service.run_as.clone());
    let pattern = EndpointPattern::new(&settings.discovery.url_suffix)?;

    // An existing registration may log somewhere other than the path just chosen.
    let installed = reconciler.as_installed(&descriptor);
    let outcome = reconcile_existing(&reconciler, &installed, |state| {
        prompt::prompt_remove_existing(non_interactive, args.replace, &installed.name, state)
    })?;
    if let ReconcileOutcome::KeptExisting(state) = outcome {
        report::kept_existing(&installed, state, local_addr);
        let result = discover_existing(&reconciler, &installed, settings, &clock, pattern);
        report::summary(&result, reconciler.query(&installed.name), &installed, backend.as_ref());
        return Ok(());
    }
    if matches!(outcome, ReconcileOutcome::Removed { clean: false }) {
        tracing::warn!("previous service was only partly removed, continuing with install");
    }

    let runner = ProcessRunner::new(
        &layout.binary,
        tunnel_args(local_addr, None),
        pattern.clone(),
        settings.discovery.termination_grace(),
    );
    let backup = if prompt::prompt_backup_url(non_interactive, args.backup_url)? {
        capture_backup(&runner, settings.discovery.disposable_timeout())
    } else {
        None
    };

    if !reconciler.install(&descriptor) {
        reconciler.remove(&descriptor);
        report::install_failed("create", &descriptor, backend.as_ref());
        return Ok(());
    }
    clock.sleep(settings.service.settle());
    if !reconciler.start(&descriptor.name) {
        reconciler.remove(&descriptor);
        report::install_failed("start", &descriptor, backend.as_ref());
        return Ok(());
    }

    let journal = JournalctlReader;
    let mut discoverer = EndpointDiscoverer::new(
        pattern,
        &descriptor.log_path,
        DiscoveryPolicy::from(&settings.discovery),
        &clock,
    )
    .with_disposable(&runner);
    if journal_available(&reconciler) {
        discoverer = discoverer.with_journal(&descriptor.name, &journal);
    }
    let result = discoverer.discover(backup.as_deref());

    let state = reconciler.query(&descriptor.name);
    report::summary(&result, state, &descriptor, backend.as_ref());
    Ok(())
}

/// Discovery against an already running service: its log file and journal
/// only. A disposable run would report a different tunnel's URL.
pub(crate) fn discover_existing(
    reconciler: &ServiceReconciler<'_>,
    descriptor: &ServiceDescriptor,
    settings: &Settings,
    clock: &dyn Clock,
    pattern: EndpointPattern,
) -> DiscoveryResult {
    let journal = JournalctlReader;
    let mut discoverer = EndpointDiscoverer::new(
        pattern,
        &descriptor.log_path,
        DiscoveryPolicy::from(&settings.discovery),
        clock,
    );
    if journal_available(reconciler) {
        discoverer = discoverer.with_journal(&descriptor.name, &journal);
    }
    discoverer.discover(None)
}

fn journal_available(reconciler: &ServiceReconciler<'_>) -> bool {
    let available = reconciler.backend().has_journal() && cmd::command_exists("journalctl");
    if !available {
        tracing::debug!("no system journal on this host");
    }
    available
}
