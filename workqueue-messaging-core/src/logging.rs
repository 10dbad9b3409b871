// workqueue-messaging-core/src/logging.rs
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Maps `LOG_LEVEL` style names onto tracing levels. Unknown names fall back to INFO.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "critical" | "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Initialize tracing for a process. `RUST_LOG` wins when set, otherwise
/// `LOG_LEVEL`, otherwise `default_level`.
pub fn init(service: &str, default_level: &str) {
    let level_name = std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
    let level = parse_level(&level_name);

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    tracing::info!(service, "log level set to {level}");
}
