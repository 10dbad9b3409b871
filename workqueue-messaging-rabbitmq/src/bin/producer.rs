use std::process::ExitCode;

use tracing::{error, info};
use workqueue_messaging_core::logging;
use workqueue_messaging_rabbitmq::{run_producer, shutdown_signal, RabbitMqOptions};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    logging::init("producer", "info");
    info!("Starting Producer...");

    let opts = match RabbitMqOptions::from_env() {
        Ok(opts) => opts,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Environment: RABBITMQ_URL={}", opts.redacted_uri());

    match run_producer(&opts, shutdown_signal()).await {
        Ok(report) => {
            info!(
                published = report.published,
                failed = report.failed,
                "Producer stopped by user"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Producer failed: {e}");
            ExitCode::FAILURE
        }
    }
}
