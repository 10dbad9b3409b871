use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use workqueue_messaging_core::{logging, SimulatedWork};
use workqueue_messaging_rabbitmq::{run_consumer, shutdown_signal, RabbitMqOptions};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    logging::init("consumer", "info");
    info!("Starting Consumer...");

    let opts = match RabbitMqOptions::from_env() {
        Ok(opts) => opts,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Environment: RABBITMQ_URL={}", opts.redacted_uri());
    info!(
        "Hostname: {}",
        opts.hostname.as_deref().unwrap_or("unknown")
    );

    let handler = Arc::new(SimulatedWork::default());
    match run_consumer(&opts, handler, shutdown_signal()).await {
        Ok(report) => {
            info!(
                acknowledged = report.acknowledged,
                rejected = report.rejected,
                "Consumer stopped by user"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Consumer failed: {e}");
            ExitCode::FAILURE
        }
    }
}
