use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` always wins. Otherwise the configured filter is used, and
/// without one debug builds log this crate at debug level while release
/// builds log at info. Calling this more than once is harmless.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if let Some(directive) = config.filter.as_deref() {
            EnvFilter::new(directive)
        } else if cfg!(debug_assertions) {
            EnvFilter::new("sync_core=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn fmt_ms(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 { "<1ms".into() } else { format!("{}ms", ms) }
}
