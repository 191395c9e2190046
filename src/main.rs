use lightship::{Lightship, LightshipConfig};
use std::time::Duration;
use tracing::info;

/// Simulated startup work that must finish before the service is ready
const WARMUP: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = LightshipConfig::from_env()?;
    info!(?config, "Starting lightship");

    let lightship = Lightship::new(config).await?;
    info!(addr = %lightship.local_addr(), "Probe endpoints available");

    lightship.register_shutdown_handler(|| async {
        info!("Shutdown handler running");
        Ok(())
    });

    lightship.queue_blocking_task(async {
        tokio::time::sleep(WARMUP).await;
        info!("Warmup finished");
        Ok(())
    });
    lightship.signal_ready();

    lightship.when_first_ready().await;
    info!("Service ready; waiting for shutdown");

    // Returning from main once the probe listener closes lets the process
    // exit before the exit watchdog fires
    lightship.shutdown_signal().wait().await;

    info!("Lightship shut down gracefully");
    Ok(())
}
