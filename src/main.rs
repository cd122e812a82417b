//! vitalwatch Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - VITALWATCH_HOST: Bind address (default: 0.0.0.0)
//! - VITALWATCH_PORT: HTTP port (default: 8080)
//! - VITALWATCH_LINE_PORT: Port for the live TCP line feed (default: disabled)
//! - VITALWATCH_DATA_DIR: Directory of `.txt` files loaded at startup
//! - VITALWATCH_EVAL_INTERVAL_SECS: Seconds between alert checks (default: 1)
//! - VITALWATCH_EVAL_THREADS: Evaluation workers (default: one per CPU)
//! - VITALWATCH_LOCK_TIMEOUT_MS: Bounded wait for a patient's lock (default: unbounded)
//! - VITALWATCH_RULES: Path to a JSON rule set (default: all rules, standard thresholds)
//! - VITALWATCH_WEBHOOK_URL: Endpoint receiving alerts as JSON
//! - VITALWATCH_HISTORY: Alerts kept in memory for `/alerts` (default: 1000)
//! - RUST_LOG: Log level (default: info)

use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitalwatch::alerts::RuleSetConfig;
use vitalwatch::api::{run_server, ServerConfig};

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vitalwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let defaults = ServerConfig::default();

    let rules = match std::env::var("VITALWATCH_RULES") {
        Ok(path) => {
            tracing::info!("Loading rule set from {}", path);
            RuleSetConfig::from_file(&path)?
        }
        Err(_) => RuleSetConfig::default(),
    };

    let config = ServerConfig {
        host: std::env::var("VITALWATCH_HOST").unwrap_or(defaults.host),
        port: env_parse("VITALWATCH_PORT").unwrap_or(defaults.port),
        line_port: env_parse("VITALWATCH_LINE_PORT"),
        data_dir: std::env::var("VITALWATCH_DATA_DIR").ok().map(PathBuf::from),
        eval_interval_secs: env_parse("VITALWATCH_EVAL_INTERVAL_SECS")
            .unwrap_or(defaults.eval_interval_secs),
        eval_threads: env_parse("VITALWATCH_EVAL_THREADS"),
        lock_timeout_ms: env_parse("VITALWATCH_LOCK_TIMEOUT_MS"),
        rules,
        webhook_url: std::env::var("VITALWATCH_WEBHOOK_URL").ok(),
        history_capacity: env_parse("VITALWATCH_HISTORY").unwrap_or(defaults.history_capacity),
    };

    tracing::info!("vitalwatch configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    match config.line_port {
        Some(port) => tracing::info!("  Line feed port: {}", port),
        None => tracing::info!("  Line feed: DISABLED"),
    }
    if let Some(dir) = &config.data_dir {
        tracing::info!("  Data directory: {}", dir.display());
    }
    tracing::info!(
        "  Evaluation interval: {} seconds",
        config.eval_interval_secs
    );
    match config.eval_threads {
        Some(threads) => tracing::info!("  Evaluation threads: {}", threads),
        None => tracing::info!("  Evaluation threads: {} (per CPU)", num_cpus::get()),
    }
    match config.lock_timeout_ms {
        Some(ms) => tracing::info!("  Lock timeout: {} ms", ms),
        None => tracing::info!("  Lock timeout: unbounded"),
    }
    tracing::info!("  Enabled rules: {:?}", config.rules.enabled);
    tracing::info!("  Alert history: {} entries", config.history_capacity);

    println!(
        r#"
        _ _        _                 _       _
 __   _(_) |_ __ _| |_      ____ _| |_ ___| |__
 \ \ / / | __/ _` | \ \ /\ / / _` | __/ __| '_ \
  \ V /| | || (_| | |\ V  V / (_| | || (__| | | |
   \_/ |_|\__\__,_|_| \_/\_/ \__,_|\__\___|_| |_|

 Patient Vital-Sign Monitoring
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
