//! frpwarden CLI binary
//!
//! Thin host glue around the supervision core: wires the registry, the
//! supervisor task, and crash recovery together, then drives them from a
//! handful of subcommands. All supervision logic lives in
//! `frpwarden-core`; this binary only translates between the terminal and
//! the control API.

use clap::{Parser, Subcommand};
use frpwarden_core::recovery::{CrashRecoveryCoordinator, LogNotifier};
use frpwarden_core::registry::PidRegistry;
use frpwarden_core::supervisor::{
    spawn_supervisor, NativeProcessAdapter, SupervisorConfig, SupervisorHandle,
};
use frpwarden_core::{config, utils};
use schema::{TunnelEvent, TunnelSpec};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "frpwarden")]
#[command(about = "Supervise a reverse-tunnel client binary")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory holding the tunnel binary, its config, and state
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover orphans, start the tunnel client, and supervise it until Ctrl-C
    Run,
    /// Apply the configuration compatibility patch once and exit
    Sanitize,
    /// Kill an orphaned tunnel process by its recorded PID
    KillPid {
        /// PID reported by the crash-recovery prompt
        pid: u32,
    },
}

fn build(spec: TunnelSpec) -> (SupervisorHandle, Arc<PidRegistry>, broadcast::Receiver<TunnelEvent>) {
    let registry = Arc::new(PidRegistry::new(&spec.data_dir));
    let (event_tx, event_rx) = broadcast::channel(256);
    let handle = spawn_supervisor(SupervisorConfig {
        spec,
        process_adapter: Arc::new(NativeProcessAdapter::new()),
        registry: registry.clone(),
        event_tx,
    });
    (handle, registry, event_rx)
}

async fn run(spec: TunnelSpec) -> frpwarden_core::Result<()> {
    let (handle, registry, mut event_rx) = build(spec);

    // Lifecycle events go to the debug log; the relay under the `frpc`
    // target stays the primary output
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            debug!("event: {:?}", event);
        }
    });

    let coordinator =
        CrashRecoveryCoordinator::new(registry, handle.clone(), Arc::new(LogNotifier));
    coordinator.run().await;

    if !handle.start().await? {
        error!("Tunnel client failed to start");
        handle.shutdown()?;
        std::process::exit(1);
    }

    info!("Supervisor running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    handle.stop().await?;
    handle.shutdown()?;
    Ok(())
}

#[tokio::main]
async fn main() -> frpwarden_core::Result<()> {
    let cli = Cli::parse();
    utils::init_tracing(&cli.log_level)?;

    let spec = TunnelSpec::for_data_dir(&cli.data_dir);

    match cli.command {
        Commands::Run => run(spec).await,
        Commands::Sanitize => {
            let removed = config::sanitize_config(&spec.config_path)?;
            info!("Removed {} incompatible line(s)", removed);
            Ok(())
        }
        Commands::KillPid { pid } => {
            let (handle, _registry, _event_rx) = build(spec);
            let killed = handle.kill_by_recorded_pid(pid).await?;
            handle.shutdown()?;
            if killed {
                info!("Killed recorded process {}", pid);
                Ok(())
            } else {
                error!("Pid {} does not match the recorded tunnel process", pid);
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_kill_pid() {
        let cli = Cli::parse_from(["frpwarden", "--data-dir", "/srv/tunnel", "kill-pid", "4321"]);
        assert_eq!(cli.data_dir, PathBuf::from("/srv/tunnel"));
        match cli.command {
            Commands::KillPid { pid } => assert_eq!(pid, 4321),
            _ => panic!("expected kill-pid command"),
        }
    }

    #[test]
    fn data_dir_defaults_to_cwd() {
        let cli = Cli::parse_from(["frpwarden", "run"]);
        assert_eq!(cli.data_dir, PathBuf::from("."));
    }
}
