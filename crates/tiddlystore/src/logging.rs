//! # Logging
//!
//! The library only emits `tracing` events. Applications that want to see
//! them can install a formatted subscriber with [`init`]:
//!
//! ```no_run
//! tiddlystore::logging::init("info");
//! ```
//!
//! `TIDDLYSTORE_LOG` takes precedence over the level passed in, using the
//! usual `EnvFilter` directive syntax (`tiddlystore=debug`). [`init_from`]
//! takes the fallback level from a [`StoreConfig`].

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::StoreConfig;

pub const LOG_ENV: &str = "TIDDLYSTORE_LOG";

/// Build the filter: `TIDDLYSTORE_LOG` if set and valid, else `default_level`.
pub fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install a global fmt subscriber. Returns `false` if one was already set.
pub fn init(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// [`init`] with the config's `log_level` as the fallback.
pub fn init_from(config: &StoreConfig) -> bool {
    init(&config.log_level)
}
