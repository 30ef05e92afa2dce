//! Tracing initialization.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Clone)]
pub struct TelemetryConfig {
    pub verbosity: u8,
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, logging: LoggingConfig) -> Self {
        Self { verbosity, logging }
    }
}

/// Install the global subscriber. Call once at process start.
pub fn init(config: TelemetryConfig) {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(config.verbosity).into())
        .with_env_var("NEXTUP_LOG")
        .from_env_lossy();
    if let Some(directives) = config.logging.filter.as_deref()
        && let Ok(parsed) = directives.parse()
    {
        filter = parsed;
    }

    let stdout = config
        .logging
        .stdout
        .then(|| build_stdout_layer(config.logging.stdout_format));

    Registry::default().with(stdout).with(filter).init();
}

fn build_stdout_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => Box::new(tracing_subscriber::fmt::layer().pretty()),
        LogFormat::Compact => Box::new(tracing_subscriber::fmt::layer().compact()),
        LogFormat::Json => Box::new(tracing_subscriber::fmt::layer().json()),
    }
}

fn level_from_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
