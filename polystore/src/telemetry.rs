//! Logging Initialisation
//!
//! TigerStyle: Optional, idempotent, never panics. Libraries only emit
//! `tracing` events; binaries and tests call [`init_logging`] once.
//!
//! ## Environment Variables
//!
//! - `POLYSTORE_LOG` - filter directives, e.g. `polystore=debug`
//! - `RUST_LOG` - fallback when `POLYSTORE_LOG` is unset

use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives.
pub const LOG_FILTER_ENV: &str = "POLYSTORE_LOG";

/// Filter used when neither environment variable is set.
pub const LOG_FILTER_DEFAULT: &str = "polystore=info,polystore_core=info";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directives; environment wins when set
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include the event target
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: LOG_FILTER_DEFAULT.to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Set filter directives.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Emit JSON lines.
    #[must_use]
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        std::env::var(LOG_FILTER_ENV)
            .ok()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .or_else(|| EnvFilter::try_new(&self.filter).ok())
            .unwrap_or_else(|| EnvFilter::new(LOG_FILTER_DEFAULT))
    }
}

/// Install a global fmt subscriber.
///
/// Returns `false` when a subscriber was already installed, in which case
/// the existing one stays in place.
pub fn init_logging(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.with_target);

    let installed = if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(filter = %config.filter, json = config.json, "logging initialised");
    }
    installed
}
