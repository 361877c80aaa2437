//! The long-running gateway (`warden start`)

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use warden_config::{AppConfig, ConfigDir};
use warden_proxy::{AuthorizationRegistry, ProcessSupervisor, Reconciler, SupervisorOptions};
use warden_transport::{start_stdio_server, InterfaceHost};

/// Run until the upstream client closes stdin or the process is interrupted,
/// then stop every provider.
pub async fn run_gateway(config_dir: ConfigDir, config: AppConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(config_dir.log_dir()).with_context(|| {
        format!(
            "Failed to create log directory {}",
            config_dir.log_dir().display()
        )
    })?;

    info!(
        config_root = %config_dir.root().display(),
        poll_interval_ms = config.poll_interval_ms,
        "Starting warden gateway"
    );

    let host = Arc::new(InterfaceHost::new());
    let supervisor = Arc::new(ProcessSupervisor::new(SupervisorOptions::new(
        &config_dir,
        &config,
    )));
    let registry = AuthorizationRegistry::new(supervisor.clone(), host.clone());
    let reconciler = Reconciler::new(Arc::new(config_dir), supervisor.clone(), registry);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let reconcile_task = tokio::spawn(reconciler.run(config.poll_interval(), async move {
        let _ = stop_rx.await;
    }));

    tokio::select! {
        result = start_stdio_server(host) => match result {
            Ok(()) => info!("Upstream client disconnected"),
            Err(e) => error!(error = %e, "Upstream transport failed"),
        },
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for interrupt");
            }
            info!("Interrupted");
        }
    }

    // An in-progress tick finishes before the loop observes the stop signal
    let _ = stop_tx.send(());
    if let Err(e) = reconcile_task.await {
        error!(error = %e, "Reconciliation task failed");
    }

    supervisor.stop_all().await;
    info!("Gateway stopped");
    Ok(())
}
