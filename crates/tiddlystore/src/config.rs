//! # Configuration
//!
//! Store settings are managed by [`confique`]: compiled defaults, overridden by
//! a TOML file, overridden by environment variables.
//!
//! ## Available Settings
//!
//! | Key | Env | Default | Description |
//! |-----|-----|---------|-------------|
//! | `host` | `TIDDLYSTORE_HOST` | `/` | Base host for containers the store builds |
//! | `pull_from` | `TIDDLYSTORE_PULL_FROM` | none | `bag:NAME` or `recipe:NAME` to read from |
//! | `push_to` | `TIDDLYSTORE_PUSH_TO` | none | `bag:NAME` or `recipe:NAME` to write to |
//! | `load_cached` | `TIDDLYSTORE_LOAD_CACHED` | `true` | Import cached pending edits at startup |
//! | `cache_dir` | `TIDDLYSTORE_CACHE_DIR` | none | Directory for the file-backed cache |
//! | `log_level` | `TIDDLYSTORE_LOG_LEVEL` | `warn` | Fallback filter for [`crate::logging::init_from`] |
//!
//! Setting either of `pull_from`/`push_to` skips discovery. One of them on its
//! own is used for both directions.
//!
//! Without a `cache_dir` no durable cache is used unless one is handed to the
//! [`crate::store::StoreBuilder`]. [`StoreConfig::default_cache_dir`] gives the
//! platform location for callers that want one.

use confique::Config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::defaults::Defaults;
use crate::error::{Result, StoreError};
use crate::model::Container;

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Base host for containers, e.g. "/" or "http://tiddlyspace.com".
    #[config(default = "/", env = "TIDDLYSTORE_HOST")]
    pub host: String,

    /// Container to read from, as "bag:NAME" or "recipe:NAME".
    #[config(env = "TIDDLYSTORE_PULL_FROM")]
    pub pull_from: Option<String>,

    /// Container new tiddlers are written to.
    #[config(env = "TIDDLYSTORE_PUSH_TO")]
    pub push_to: Option<String>,

    #[config(default = true, env = "TIDDLYSTORE_LOAD_CACHED")]
    pub load_cached: bool,

    #[config(env = "TIDDLYSTORE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[config(default = "warn", env = "TIDDLYSTORE_LOG_LEVEL")]
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "/".to_string(),
            pull_from: None,
            push_to: None,
            load_cached: true,
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl StoreConfig {
    /// Load from `path`, with environment variables taking precedence.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder()
            .env()
            .file(path.as_ref())
            .load()
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Defaults and environment only.
    pub fn from_env() -> Result<Self> {
        Self::builder()
            .env()
            .load()
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    /// The configured containers, if any were set.
    pub fn explicit_defaults(&self) -> Result<Option<Defaults>> {
        let parse = |spec: &Option<String>| -> Result<Option<Container>> {
            spec.as_deref()
                .map(|s| s.parse::<Container>().map(|c| c.with_host(&self.host)))
                .transpose()
        };
        let defaults = match (parse(&self.pull_from)?, parse(&self.push_to)?) {
            (Some(pull_from), Some(push_to)) => Some(Defaults::pair(pull_from, push_to)),
            (Some(only), None) | (None, Some(only)) => Some(Defaults::single(only)),
            (None, None) => None,
        };
        Ok(defaults)
    }

    /// Platform cache directory for tiddlystore, if the platform has one.
    pub fn default_cache_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tiddlystore", "tiddlystore")
            .map(|dirs| dirs.cache_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.host, "/");
        assert!(config.load_cached);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.explicit_defaults().unwrap(), None);
    }

    #[test]
    fn test_single_container_is_used_both_ways() {
        let config = StoreConfig {
            pull_from: Some("recipe:foo_public".to_string()),
            ..Default::default()
        };
        let defaults = config.explicit_defaults().unwrap().unwrap();
        assert!(defaults.push_to.is_recipe());
        assert_eq!(defaults.pull_from, defaults.push_to);
    }

    #[test]
    fn test_pair_keeps_host() {
        let config = StoreConfig {
            host: "http://example.com".to_string(),
            pull_from: Some("recipe:foo_public".to_string()),
            push_to: Some("bag:foo_public".to_string()),
            ..Default::default()
        };
        let defaults = config.explicit_defaults().unwrap().unwrap();
        assert!(defaults.push_to.is_bag());
        assert_eq!(defaults.push_to.host, "http://example.com");
    }

    #[test]
    fn test_bad_container_spec() {
        let config = StoreConfig {
            push_to: Some("shelf:nope".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.explicit_defaults(),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiddlystore.toml");
        fs::write(
            &path,
            "host = \"http://example.com\"\npull_from = \"bag:notes\"\nload_cached = false\n",
        )
        .unwrap();

        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.host, "http://example.com");
        assert_eq!(config.pull_from.as_deref(), Some("bag:notes"));
        assert!(!config.load_cached);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = StoreConfig {
            cache_dir: Some(PathBuf::from("/tmp/tiddlers")),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        let back: StoreConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
