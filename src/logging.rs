use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

/// Initializes the global tracing subscriber from configuration.
///
/// Safe to call more than once; later calls are no-ops (relevant in test
/// binaries where several harnesses may race to initialize).
pub fn init(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.log_json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}
