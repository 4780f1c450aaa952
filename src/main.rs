use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::{error, info};
use tracing_subscriber::prelude::*;

use slotaudit::audit::run_audit;
use slotaudit::config::AuditConfig;
use slotaudit::report::{Reporter, TracingReporter};
use slotaudit::store::AwsCliStore;

/// Log to stderr and append the same events to the durable audit log.
fn init_logging(log_path: &Path) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AuditConfig::from_env()?;

    let log_path = config.log_path();
    init_logging(&log_path)?;
    slotaudit::observability::init(config.metrics_port)?;

    info!("slotaudit starting");
    info!("  profile: {}", config.profile);
    info!("  category: {}", config.category);
    info!("  calendars: {}", config.calendars_table);
    info!("  results: {}", config.results_table);
    info!("  log: {}", log_path.display());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let store = AwsCliStore::new(config.profile.clone(), config.tables());
    let outcome = match run_audit(&store, &config.request()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("audit of {} aborted: {e}", config.category);
            return Err(e.into());
        }
    };

    TracingReporter.report(&outcome);
    info!("slotaudit run {} finished", outcome.run_id());
    Ok(())
}
