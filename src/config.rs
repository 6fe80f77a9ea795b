//! Configuration shared by the pull and push pipelines

use crate::logging::Logger;
use crate::registry::retry::RetryPolicy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the Docker configuration directory
pub const DOCKER_CONFIG_ENV: &str = "DOCKER_CONFIG";
pub const DOCKER_CONFIG_FILE: &str = "config.json";

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    /// Docker-style credentials file; `None` means anonymous access
    pub credentials_path: Option<PathBuf>,
    /// Talk to the registry over plain HTTP
    pub plain_http: bool,
    pub skip_tls: bool,
    /// Per-request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub verbose: bool,
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_path: None,
            plain_http: false,
            skip_tls: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            verbose: false,
            quiet: false,
        }
    }
}

impl Config {
    pub fn logger(&self) -> Logger {
        if self.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(self.verbose)
        }
    }

    pub fn with_credentials_path(mut self, path: Option<PathBuf>) -> Self {
        self.credentials_path = path;
        self
    }

    /// URL scheme used for registry requests
    pub fn scheme(&self) -> &'static str {
        if self.plain_http { "http" } else { "https" }
    }
}

/// Docker's lookup order: `$DOCKER_CONFIG/config.json`, then `~/.docker/config.json`
pub fn default_credentials_path() -> Option<PathBuf> {
    if let Ok(dir) = env::var(DOCKER_CONFIG_ENV) {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir).join(DOCKER_CONFIG_FILE));
        }
    }

    dirs::home_dir().map(|home| home.join(".docker").join(DOCKER_CONFIG_FILE))
}
