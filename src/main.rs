use std::io::Write;
use log::{info, error};
use batchrelay::batchrelay::config::ServerConfig;
use batchrelay::batchrelay::init;

fn init_logger(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}:{}] {} - {}",
                buf.timestamp_millis(),
                record.module_path().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let path = std::env::var("BATCHRELAY_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let loaded = ServerConfig::from_toml_file(&path);

    // RUST_LOG wins over the configured level
    init_logger(loaded.as_ref().map(|c| c.log_level.as_str()).unwrap_or("info"));
    info!("Batch relay starting up");

    let config = match loaded {
        Ok(config) => {
            info!("Configuration loaded from {}", path);
            config
        },
        Err(e) => {
            error!("Failed to load configuration from {}: {}", path, e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    info!("🚀 Starting relay {}", config.id);
    if let Err(e) = init(config).await {
        error!("❌ Error in relay: {e}");
        return Err(e);
    }

    info!("Relay stopped");
    Ok(())
}
