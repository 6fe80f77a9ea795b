//! Command-line argument parsing

use crate::config::{self, Config};
use crate::registry::RetryPolicy;
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PLAIN_HTTP: &str = "PACKAGE_OCI_PLAIN_HTTP";
pub const ENV_SKIP_TLS: &str = "PACKAGE_OCI_SKIP_TLS";
pub const ENV_VERBOSE: &str = "PACKAGE_OCI_VERBOSE";
pub const ENV_RETRIES: &str = "PACKAGE_OCI_RETRIES";
pub const ENV_TIMEOUT: &str = "PACKAGE_OCI_TIMEOUT";

#[derive(Parser, Debug)]
#[command(name = "package-oci")]
#[command(about = "Push package directories to OCI registries and pull them back")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Docker-style credentials file
    #[arg(
        long = "registry-config",
        global = true,
        value_name = "FILE",
        help = "Path to a Docker config.json holding registry credentials"
    )]
    pub registry_config: Option<PathBuf>,

    #[arg(
        long = "plain-http",
        global = true,
        env = ENV_PLAIN_HTTP,
        value_parser = BoolishValueParser::new(),
        help = "Talk to the registry over plain HTTP"
    )]
    pub plain_http: bool,

    /// Skip TLS verification
    #[arg(
        long = "skip-tls",
        short = 'k',
        global = true,
        env = ENV_SKIP_TLS,
        value_parser = BoolishValueParser::new(),
        help = "Skip TLS certificate verification"
    )]
    pub skip_tls: bool,

    /// Retry attempts for transient failures
    #[arg(
        long = "retries",
        global = true,
        env = ENV_RETRIES,
        value_name = "N",
        help = "Number of retries for transient network failures [default: 5]"
    )]
    pub retries: Option<u32>,

    /// Timeout in seconds for network operations
    #[arg(
        long = "timeout",
        short = 't',
        global = true,
        env = ENV_TIMEOUT,
        value_name = "SECS",
        help = "Timeout for each registry request in seconds [default: 300]"
    )]
    pub timeout: Option<u64>,

    /// Verbose output
    #[arg(
        long = "verbose",
        short = 'v',
        global = true,
        env = ENV_VERBOSE,
        value_parser = BoolishValueParser::new(),
        help = "Enable verbose output"
    )]
    pub verbose: bool,

    /// Takes precedence over verbose
    #[arg(long = "quiet", short = 'q', global = true, help = "Only print errors")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Download a package from a registry into a directory
    Pull {
        /// Package reference, e.g. registry.example.com/packages/nginx:1.2.0
        reference: String,
        /// Directory to write the package into; created if missing
        destdir: PathBuf,
    },
    /// Upload a package directory to a registry
    Push {
        /// Directory holding the package
        sourcedir: PathBuf,
        /// Package reference to push to
        reference: String,
    },
}

impl Args {
    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout == Some(0) {
            return Err("Timeout must be greater than 0".to_string());
        }

        let dir = match &self.command {
            Command::Pull { destdir, .. } => destdir,
            Command::Push { sourcedir, .. } => sourcedir,
        };
        if dir.as_os_str().is_empty() {
            return Err("Directory path must not be empty".to_string());
        }

        Ok(())
    }

    /// Build the runtime configuration; the credentials file falls back to
    /// Docker's default location
    pub fn to_config(&self) -> Config {
        let defaults = Config::default();
        let retry = RetryPolicy {
            max_retries: self.retries.unwrap_or(defaults.retry.max_retries),
            ..RetryPolicy::default()
        };

        Config {
            credentials_path: self
                .registry_config
                .clone()
                .or_else(config::default_credentials_path),
            plain_http: self.plain_http,
            skip_tls: self.skip_tls,
            timeout: self.timeout.map(Duration::from_secs).unwrap_or(defaults.timeout),
            retry,
            verbose: self.verbose && !self.quiet,
            quiet: self.quiet,
        }
    }
}
