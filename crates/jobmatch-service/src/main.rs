use jobmatch_service::{init_tracing, ServiceConfig, ServiceRuntime};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();
    let _log_guard = init_tracing()?;

    let runtime = match ServiceRuntime::start(config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(subsystem = "service", error = %e, "Failed to start match service");
            return Err(e.into());
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(subsystem = "service", error = %e, "Failed to listen for shutdown signal");
    }
    info!(subsystem = "service", "Shutdown signal received");
    runtime.shutdown().await?;
    Ok(())
}
