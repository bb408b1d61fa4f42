//! Operator-facing summaries printed at the end of a flow.

use crate::discovery::DiscoveryResult;
use crate::service::{ServiceDescriptor, ServiceManagerBackend, ServiceState};

/// Outcome of a service-mode run: the URL if one was found, otherwise the
/// last known state and how to look further.
pub fn summary(
    result: &DiscoveryResult,
    state: ServiceState,
    descriptor: &ServiceDescriptor,
    backend: &dyn ServiceManagerBackend,
) {
    #[allow(clippy::print_stdout)]
    {
        println!();
        match &result.url {
            Some(url) if result.is_verified() => {
                println!("Tunnel is up!");
                println!();
                println!("  Public URL: {url}");
                println!("  Found in:   {}", result.source);
            }
            Some(url) => {
                println!("Tunnel URL could not be confirmed.");
                println!();
                println!("  Backup URL: {url}");
                println!("  This came from a separate throwaway run and most likely does NOT");
                println!("  belong to the running service. Check the log before sharing it.");
            }
            None => {
                println!("Could not find the tunnel URL yet. The service may still be starting.");
            }
        }
        println!("  Service:    {} ({state})", descriptor.name);
        println!("  Log file:   {}", descriptor.log_path.display());
        println!();
    }
    if !result.is_verified() {
        diagnostics(descriptor, backend);
    }
}

/// Manual commands for inspecting the service.
pub fn diagnostics(descriptor: &ServiceDescriptor, backend: &dyn ServiceManagerBackend) {
    #[allow(clippy::print_stdout)]
    {
        println!("To inspect the service by hand:");
        for command in backend.manual_commands(descriptor) {
            println!("  {command}");
        }
        println!();
    }
}

/// The operator kept an existing registration.
pub fn kept_existing(descriptor: &ServiceDescriptor, state: ServiceState, local_addr: &str) {
    #[allow(clippy::print_stdout)]
    {
        println!();
        println!("Kept the existing service {} ({state}).", descriptor.name);
        println!("  Its previous configuration is still in effect: the address {local_addr}");
        println!("  was NOT applied. Run setup again with --replace to change it.");
        println!();
    }
}

/// Registration or start failed and leftovers were cleaned up.
pub fn install_failed(
    step: &str,
    descriptor: &ServiceDescriptor,
    backend: &dyn ServiceManagerBackend,
) {
    #[allow(clippy::print_stdout)]
    {
        println!();
        println!("Could not {step} service {}.", descriptor.name);
        println!("  Partial registration was removed. Check the messages above, then");
        println!("  run setup again, or start the tunnel in the foreground with --mode foreground.");
        println!();
    }
    diagnostics(descriptor, backend);
}
