use rental_bench::config::Config;
use rental_bench::harness::run_configured;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration
    let config = Config::parse_args();

    // Initialize tracing
    let log_level = match config.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("rental-bench v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration: strategy={}, element={:?}, rental_size={}, iterations={}, clear={}, scan={}, discipline={:?}, shared_pool={}",
        config.strategy,
        config.element,
        config.rental_size,
        config.iterations,
        config.clear,
        config.scan,
        config.discipline,
        config.shared_pool
    );

    let report = run_configured(&config).await?;
    info!("{:.0} ops/sec", report.ops_per_sec());

    Ok(())
}
